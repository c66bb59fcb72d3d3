//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro
//! y, mientras tanto, degradan a las rutas de respaldo.
//!
//! El resto del crate sólo ve dos costuras: `EmbeddingService` (texto → vector)
//! y `TextGenerator` (prompt → texto).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{AppConfig, LlmProvider};
use crate::error::ServiceError;

const SYSTEM_PROMPT: &str = r#"
Eres el asistente de seguridad de la información de la organización.
Respondes en español, de forma clara, profesional y concisa.
Sólo puedes usar los datos suministrados en el mensaje: estadísticas, ejemplos de riesgos y contexto recuperado.
Si los datos no contienen la respuesta, dilo explícitamente. No inventes cifras.
"#;

/// Servicio externo de embeddings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
}

/// Modelo generativo externo.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    api_key: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            api_key: cfg.openai_api_key.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        }
    }

    fn openai_client(&self) -> Result<rig::providers::openai::Client> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Falta OPENAI_API_KEY en la configuración"))?;
        Ok(rig::providers::openai::Client::new(key))
    }

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai::TEXT_EMBEDDING_3_SMALL;
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = self.openai_client()?;
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        let embeddings = embedding_model.embed_texts(texts).await?;
        if embeddings.len() != expected {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            ));
        }
        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    async fn answer_with_openai(&self, prompt: &str) -> Result<String> {
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = self.openai_client()?;
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(SYSTEM_PROMPT).build();
        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

#[async_trait]
impl EmbeddingService for LlmManager {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }
}

#[async_trait]
impl TextGenerator for LlmManager {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.answer_with_openai(prompt).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}

/// Ejecuta `call` con límite de tiempo; ante un fallo reintenta una única vez.
pub async fn call_with_retry<T, F, Fut>(
    service: &'static str,
    timeout: Duration,
    mut call: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    for attempt in 1..=2 {
        let err = match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(source)) => ServiceError::Failed { service, source },
            Err(_) => ServiceError::Timeout { service, secs: timeout.as_secs() },
        };
        debug!("Intento {attempt} de '{service}' fallido: {err}");
        last_error = Some(err);
    }
    Err(last_error.unwrap_or(ServiceError::Timeout { service, secs: timeout.as_secs() }))
}

/// Vector determinista derivado de SHA-256, repetido hasta `dimensions` y con
/// cada byte normalizado a [0, 1].
pub fn fallback_embedding(text: &str, dimensions: usize) -> Vec<f64> {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .cycle()
        .take(dimensions)
        .map(|b| f64::from(*b) / 255.0)
        .collect()
}

/// Cliente de embeddings que nunca falla: sin servicio o con error, degrada
/// al vector hash.
#[derive(Clone)]
pub struct EmbeddingClient {
    service: Option<Arc<dyn EmbeddingService>>,
    dimensions: usize,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(service: Arc<dyn EmbeddingService>, dimensions: usize, timeout: Duration) -> Self {
        Self { service: Some(service), dimensions, timeout }
    }

    /// Cliente sin servicio externo: siempre usa el vector hash.
    pub fn offline(dimensions: usize) -> Self {
        Self { service: None, dimensions, timeout: Duration::from_secs(1) }
    }

    pub async fn embed(&self, text: &str) -> Vec<f64> {
        self.embed_many(&[text.to_string()])
            .await
            .pop()
            .unwrap_or_else(|| fallback_embedding(text, self.dimensions))
    }

    /// Un vector por texto, en el mismo orden.
    pub async fn embed_many(&self, texts: &[String]) -> Vec<Vec<f64>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let Some(service) = &self.service else {
            return self.fallback_all(texts);
        };

        let result = call_with_retry("embeddings", self.timeout, || {
            service.embed_texts(texts.to_vec())
        })
        .await;

        match result {
            Ok(vectors) if vectors.iter().any(|v| v.len() != self.dimensions) => {
                warn!(
                    "El servicio de embeddings devolvió vectores de dimensión distinta a {}; usando vectores hash.",
                    self.dimensions
                );
                self.fallback_all(texts)
            }
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                warn!(
                    "El servicio de embeddings devolvió {} vectores para {} textos; usando vectores hash.",
                    vectors.len(),
                    texts.len()
                );
                self.fallback_all(texts)
            }
            Err(err) => {
                warn!("Embeddings no disponibles ({err}); usando vectores hash.");
                self.fallback_all(texts)
            }
        }
    }

    fn fallback_all(&self, texts: &[String]) -> Vec<Vec<f64>> {
        texts.iter().map(|t| fallback_embedding(t, self.dimensions)).collect()
    }
}
