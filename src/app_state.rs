use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{
    config::{AppConfig, LlmProvider, StoreBackend},
    ingest::{PipelineSettings, RecordPipeline},
    llm::{EmbeddingClient, LlmManager, TextGenerator},
    neo4j_client::{self, Neo4jStore},
    rag::RagEngine,
    responsible::ResponsibleMatcher,
    store::{ChunkIndex, MemoryStore, RiskStore, RosterSource},
    vector_store::{self, VectorStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn RiskStore>,
    pub roster: Arc<dyn RosterSource>,
    pub pipeline: Arc<RecordPipeline>,
    pub rag: Arc<RagEngine>,
    /// Sólo presente con el backend Neo4j.
    pub neo4j: Option<Neo4jStore>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl AppState {
    /// Conecta el backend configurado y monta los componentes del núcleo.
    pub async fn from_config(
        cfg: AppConfig,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Result<Self> {
        let llm = LlmManager::from_config(&cfg);
        let embedder = match (&cfg.llm_provider, cfg.openai_api_key.is_some()) {
            (LlmProvider::OpenAI, true) => EmbeddingClient::new(
                Arc::new(llm.clone()),
                cfg.embedding_dimensions,
                cfg.service_timeout,
            ),
            _ => {
                warn!("Sin servicio de embeddings configurado; se usarán vectores hash.");
                EmbeddingClient::offline(cfg.embedding_dimensions)
            }
        };
        let generator: Arc<dyn TextGenerator> = Arc::new(llm);

        let state = match cfg.store_backend {
            StoreBackend::Neo4j => {
                let graph = neo4j_client::connect(&cfg.neo4j_uri, &cfg.neo4j_user, &cfg.neo4j_password).await?;
                neo4j_client::ensure_schema(&graph).await?;
                vector_store::ensure_chunk_vector_index(&graph, cfg.embedding_dimensions).await?;
                let store = Neo4jStore::new(Arc::new(graph));
                Self::assemble(cfg, Arc::new(store.clone()), embedder, generator, Some(store))
            }
            StoreBackend::Memory => {
                info!("Backend en memoria: los datos no sobreviven al reinicio.");
                Self::assemble(cfg, Arc::new(MemoryStore::new()), embedder, generator, None)
            }
        };

        *state.shutdown_sender.lock().unwrap_or_else(|p| p.into_inner()) = Some(shutdown_sender);
        Ok(state)
    }

    pub fn assemble<S>(
        cfg: AppConfig,
        backend: Arc<S>,
        embedder: EmbeddingClient,
        generator: Arc<dyn TextGenerator>,
        neo4j: Option<Neo4jStore>,
    ) -> Self
    where
        S: RiskStore + ChunkIndex + RosterSource + 'static,
    {
        let store: Arc<dyn RiskStore> = backend.clone();
        let roster: Arc<dyn RosterSource> = backend.clone();
        let vectors = VectorStore::new(backend);

        let pipeline = RecordPipeline::new(
            store.clone(),
            roster.clone(),
            vectors.clone(),
            embedder.clone(),
            ResponsibleMatcher::new(cfg.owner_mode, cfg.matcher_seed),
            PipelineSettings::from_config(&cfg),
        );
        let rag = RagEngine::new(
            store.clone(),
            vectors,
            embedder,
            generator,
            cfg.company.clone(),
            cfg.rag_top_k,
            cfg.service_timeout,
        );

        Self {
            config: cfg,
            store,
            roster,
            pipeline: Arc::new(pipeline),
            rag: Arc::new(rag),
            neo4j,
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                progress: 0.0,
            })),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }
}
