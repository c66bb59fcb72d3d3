use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};
use url::Url;

use crate::{
    analysis::{self, Recommendations, RiskPatterns},
    app_state::{AppState, Status},
    error::{PipelineError, ValidationError},
    ingest::{AssessedRow, BatchReport, RowRejection},
    models::{Personnel, RawRow, RiskRecord, RiskStats},
    rag::ConversationState,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct RiskBatchPayload {
    rows: Vec<RawRow>,
    /// Fecha del informe; hoy si no se indica.
    report_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    accepted: Vec<AssessedRow>,
    rejected: Vec<RowRejection>,
    patterns: RiskPatterns,
    recommendations: Recommendations,
}

#[derive(Deserialize)]
pub struct CompletePayload {
    /// Vacío reabre el riesgo; ausente usa la fecha de hoy.
    date_completed: Option<String>,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    company: Option<String>,
}

#[derive(Deserialize)]
pub struct RagQueryPayload {
    question: String,
    records: Option<Vec<RiskRecord>>,
    #[serde(default)]
    conversation: ConversationState,
}

#[derive(Debug, Serialize)]
pub struct RagQueryResponse {
    answer: String,
    degraded: bool,
    stats: RiskStats,
    sources: Vec<String>,
    conversation: ConversationState,
}

#[derive(Deserialize)]
pub struct DocumentPayload {
    source: String,
    text: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/risks/preview", post(preview_handler))
        .route("/api/risks", post(ingest_handler))
        .route("/api/risks/:id/complete", post(complete_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/rag-query", post(rag_query_handler))
        .route("/api/documents", post(document_handler))
        .route("/api/backfill", post(backfill_handler))
        .route("/api/personnel", get(list_personnel_handler).post(upsert_personnel_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn preview_handler(
    State(state): State<AppState>,
    Json(payload): Json<RiskBatchPayload>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let report_date = payload.report_date.unwrap_or_else(|| Local::now().date_naive());
    let assessment = state
        .pipeline
        .assess_batch(&payload.rows, report_date)
        .await
        .map_err(validation_error)?;

    let records = assessment.records();
    let patterns = analysis::analyze_patterns(&records);
    let recommendations = analysis::recommend(&records, &patterns);
    Ok(Json(PreviewResponse {
        accepted: assessment.accepted,
        rejected: assessment.rejected,
        patterns,
        recommendations,
    }))
}

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    Json(payload): Json<RiskBatchPayload>,
) -> Result<Json<BatchReport>, ApiError> {
    let report_date = payload.report_date.unwrap_or_else(|| Local::now().date_naive());
    match state.pipeline.ingest_batch(&payload.rows, report_date).await {
        Ok(report) => Ok(Json(report)),
        Err(PipelineError::Validation(err)) => Err(validation_error(err)),
        Err(err) => {
            error!("Error de ingesta: {err}");
            Err(internal_error(format!("Error al guardar el lote: {err}")))
        }
    }
}

#[axum::debug_handler]
async fn complete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CompletePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value = payload
        .date_completed
        .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string());

    match state.store.set_date_completed(&id, value.trim()).await {
        Ok(true) => Ok(Json(json!({ "id": id, "date_completed": value.trim() }))),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No existe el riesgo '{id}'.")})),
        )),
        Err(err) => Err(internal_error(format!("Error actualizando el riesgo: {err}"))),
    }
}

#[axum::debug_handler]
async fn stats_handler(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let company = params.company.as_deref().filter(|c| !c.trim().is_empty());
    let stats = state
        .store
        .stats(company)
        .await
        .map_err(|e| internal_error(format!("Error calculando estadísticas: {e}")))?;
    Ok(Json(json!({
        "total": stats.total,
        "critical": stats.critical,
        "high": stats.high,
        "medium": stats.medium,
        "low": stats.low,
        "mitigated": stats.mitigated,
        "active": stats.active(),
    })))
}

#[axum::debug_handler]
async fn rag_query_handler(
    State(state): State<AppState>,
    Json(payload): Json<RagQueryPayload>,
) -> Result<Json<RagQueryResponse>, ApiError> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "La pregunta no puede estar vacía."})),
        ));
    }

    let (conversation, result) = state
        .rag
        .reply(payload.conversation, question, payload.records.as_deref())
        .await;

    Ok(Json(RagQueryResponse {
        answer: result.answer,
        degraded: result.degraded,
        stats: result.stats,
        sources: result.sources,
        conversation,
    }))
}

#[axum::debug_handler]
async fn document_handler(
    State(state): State<AppState>,
    Json(payload): Json<DocumentPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = payload.source.trim();
    if source.is_empty() || payload.text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Se requieren 'source' y 'text' no vacíos."})),
        ));
    }

    match state.pipeline.ingest_document(source, &payload.text).await {
        Ok(chunks) => Ok(Json(json!({ "source": source, "chunks": chunks }))),
        Err(err) => {
            error!("Error ingiriendo el documento '{source}': {err}");
            Err(internal_error(format!("Error al ingerir el documento: {err}")))
        }
    }
}

#[axum::debug_handler]
async fn backfill_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    {
        let mut status = state.status.lock().unwrap_or_else(|p| p.into_inner());
        if status.is_busy {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({"error": "Ya hay una tarea en curso."})),
            ));
        }
        status.is_busy = true;
        status.message = "Iniciando procesamiento del histórico...".to_string();
        status.progress = 0.0;
    }

    spawn(run_backfill(state));
    Ok(StatusCode::ACCEPTED)
}

/// Ejecuta el backfill y deja el resultado en `Status`.
pub async fn run_backfill(state: AppState) {
    let result = state.pipeline.backfill(Some(state.status.clone())).await;

    let mut status = state.status.lock().unwrap_or_else(|p| p.into_inner());
    status.is_busy = false;
    status.progress = 0.0;
    match result {
        Ok(created) => {
            status.message = format!("Histórico procesado: {created} chunks creados.");
        }
        Err(err) => {
            status.message = format!("Error procesando el histórico: {err}");
            error!("Error de backfill: {err}");
        }
    }
}

#[axum::debug_handler]
async fn list_personnel_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Personnel>>, ApiError> {
    state
        .roster
        .roster()
        .await
        .map(Json)
        .map_err(|e| internal_error(format!("Error leyendo el personal: {e}")))
}

#[axum::debug_handler]
async fn upsert_personnel_handler(
    State(state): State<AppState>,
    Json(people): Json<Vec<Personnel>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if people.iter().any(|p| p.name.trim().is_empty()) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Todo el personal necesita un nombre."})),
        ));
    }
    let updated = state
        .roster
        .upsert_personnel(&people)
        .await
        .map_err(|e| internal_error(format!("Error guardando el personal: {e}")))?;
    Ok(Json(json!({ "updated": updated })))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap_or_else(|p| p.into_inner()).clone())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(neo4j) = &state.neo4j else {
        return Ok(Json(json!({ "status": "memory" })));
    };

    let browser_url = match Url::parse(&state.config.neo4j_uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    };

    match neo4j.ping().await {
        Ok(_) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap_or_else(|p| p.into_inner()).take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

fn validation_error(err: ValidationError) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()})))
}

fn internal_error(message: String) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": message})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ChunkingConfig, LlmProvider, OwnerMode, StoreBackend};
    use crate::llm::{EmbeddingClient, TextGenerator};
    use crate::store::MemoryStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl TextGenerator for Offline {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(anyhow!("sin red"))
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            store_backend: StoreBackend::Memory,
            neo4j_uri: String::new(),
            neo4j_user: String::new(),
            neo4j_password: String::new(),
            server_addr: "127.0.0.1:0".into(),
            llm_provider: LlmProvider::OpenAI,
            openai_api_key: None,
            llm_embedding_model: "text-embedding-3-small".into(),
            llm_chat_model: "gpt-4o-mini".into(),
            embedding_dimensions: 16,
            service_timeout: Duration::from_millis(200),
            company: "TechNova S.A.".into(),
            control_effectiveness: 60,
            rag_top_k: 5,
            owner_mode: OwnerMode::Propagate,
            matcher_seed: Some(9),
            backfill_limit: 100,
            record_chunking: ChunkingConfig::records(),
            document_chunking: ChunkingConfig::documents(),
        }
    }

    fn state() -> AppState {
        AppState::assemble(
            config(),
            Arc::new(MemoryStore::new()),
            EmbeddingClient::offline(16),
            Arc::new(Offline),
            None,
        )
    }

    fn batch(rows: serde_json::Value) -> RiskBatchPayload {
        RiskBatchPayload {
            rows: rows.as_array().unwrap().iter().map(|r| r.as_object().cloned().unwrap()).collect(),
            report_date: NaiveDate::from_ymd_opt(2025, 10, 30),
        }
    }

    #[tokio::test]
    async fn ingest_then_complete_then_stats() {
        let state = state();
        let Json(report) = ingest_handler(
            State(state.clone()),
            Json(batch(json!([
                {"Activo": "Portal web", "Probabilidad": 8, "Impacto": 9},
                {"Activo": "Impresora", "Probabilidad": 1, "Impacto": 1},
            ]))),
        )
        .await
        .unwrap();
        assert_eq!(report.records.len(), 2);

        let id = report.records[0].id.clone();
        let Json(body) = complete_handler(
            State(state.clone()),
            Path(id.clone()),
            Json(CompletePayload { date_completed: Some("2025-11-01".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["date_completed"], "2025-11-01");

        let Json(stats) = stats_handler(State(state), Query(StatsQuery { company: None }))
            .await
            .unwrap();
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["critical"], 1);
        assert_eq!(stats["mitigated"], 1);
        assert_eq!(stats["active"], 1);
    }

    #[tokio::test]
    async fn missing_columns_are_a_bad_request() {
        let err = ingest_handler(State(state()), Json(batch(json!([{"Activo": "Portal"}]))))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1["error"].as_str().unwrap().contains("probability"));
    }

    #[tokio::test]
    async fn completing_an_unknown_risk_is_not_found() {
        let err = complete_handler(
            State(state()),
            Path("no-existe".into()),
            Json(CompletePayload { date_completed: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preview_persists_nothing() {
        let state = state();
        let Json(preview) = preview_handler(
            State(state.clone()),
            Json(batch(json!([
                {"asset": "Correo", "probability": 9, "impact": 9, "risk_details": "phishing"},
                {"asset": "", "probability": 9, "impact": 9},
            ]))),
        )
        .await
        .unwrap();
        assert_eq!(preview.accepted.len(), 1);
        assert_eq!(preview.rejected.len(), 1);
        assert_eq!(preview.patterns.common_vulnerabilities, vec!["Phishing/Spear-phishing"]);
        assert_eq!(state.store.stats(None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn rag_query_degrades_and_threads_the_conversation() {
        let Json(response) = rag_query_handler(
            State(state()),
            Json(RagQueryPayload {
                question: "¿Cuántos riesgos hay?".into(),
                records: None,
                conversation: ConversationState::default(),
            }),
        )
        .await
        .unwrap();
        assert!(response.degraded);
        assert!(response.answer.contains("Total de riesgos registrados: 0"));
        assert_eq!(response.conversation.turns.len(), 2);

        let err = rag_query_handler(
            State(state()),
            Json(RagQueryPayload {
                question: "   ".into(),
                records: None,
                conversation: ConversationState::default(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn backfill_clears_the_busy_flag() {
        let state = state();
        state.status.lock().unwrap().is_busy = true;
        run_backfill(state.clone()).await;
        let status = state.status.lock().unwrap().clone();
        assert!(!status.is_busy);
        assert!(status.message.contains("0 chunks"));
    }
}
