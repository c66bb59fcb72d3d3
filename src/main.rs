// Módulos de la aplicación
mod analysis;
mod api;
mod app_state;
mod chunker;
mod columns;
mod config;
mod error;
mod ingest;
mod llm;
mod models;
mod neo4j_client;
mod rag;
mod responsible;
mod scoring;
mod store;
mod treatment;
mod vector_store;

use crate::app_state::AppState;
use anyhow::Context;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 3. Conectar el almacén, asegurar esquemas y montar el núcleo
    let app_state = AppState::from_config(cfg, shutdown_tx)
        .await
        .context("Error inicializando el estado de la aplicación")?;

    // 4. Generar chunks del histórico si el índice está vacío (acotado)
    {
        let mut status = app_state.status.lock().unwrap_or_else(|p| p.into_inner());
        status.is_busy = true;
        status.message = "Procesando histórico de riesgos...".to_string();
    }
    tokio::spawn(api::run_backfill(app_state.clone()));

    // 5. Configurar el router de la API
    let app = api::create_router(app_state.clone()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
