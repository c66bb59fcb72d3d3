//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + pipeline).
//!
//! Sólo `AppConfig::from_env` lee el entorno; el resto de componentes recibe
//! su parte de la configuración en el constructor.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Dónde viven registros, chunks y plantilla.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreBackend {
    #[default]
    Neo4j,
    /// En proceso; se pierde al apagar el servidor.
    Memory,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" | "memoria" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de almacenamiento no soportado: {other}")),
        }
    }
}

/// Cómo trata el asignador de responsables un propietario declarado.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OwnerMode {
    /// Un `asset_owner` no vacío se devuelve tal cual.
    #[default]
    Propagate,
    /// El propietario sólo aporta señal a la puntuación ponderada.
    Suggest,
}

impl OwnerMode {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "propagate" | "propagar" => Ok(Self::Propagate),
            "suggest" | "sugerir" => Ok(Self::Suggest),
            other => Err(anyhow!("Modo de propietario no soportado: {other}")),
        }
    }
}

/// Parámetros de la ventana deslizante del chunker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Longitud (recortada) que un chunk debe superar para conservarse.
    pub min_chars: usize,
}

impl ChunkingConfig {
    /// Chunks de registros de riesgo: más pequeños, con suelo más alto.
    pub const fn records() -> Self {
        Self { chunk_size: 300, overlap: 50, min_chars: 50 }
    }

    /// Chunks de documentos de texto libre.
    pub const fn documents() -> Self {
        Self { chunk_size: 400, overlap: 100, min_chars: 30 }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub embedding_dimensions: usize,
    pub service_timeout: Duration,

    pub company: String,
    pub control_effectiveness: u8,
    pub rag_top_k: usize,
    pub owner_mode: OwnerMode,
    pub matcher_seed: Option<u64>,
    pub backfill_limit: usize,
    pub record_chunking: ChunkingConfig,
    pub document_chunking: ChunkingConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let store_backend = StoreBackend::from_str(
            &env::var("STORE_BACKEND").unwrap_or_else(|_| "neo4j".to_string()),
        )?;

        // Las credenciales sólo son obligatorias con el backend Neo4j.
        let neo4j_var = |name: &str| match env::var(name) {
            Ok(value) => Ok(value),
            Err(_) if store_backend == StoreBackend::Memory => Ok(String::new()),
            Err(_) => Err(anyhow!("Falta {name} en el entorno")),
        };
        let neo4j_uri = neo4j_var("NEO4J_URI")?;
        let neo4j_user = neo4j_var("NEO4J_USER")?;
        let neo4j_password = neo4j_var("NEO4J_PASSWORD")?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let owner_mode = OwnerMode::from_str(
            &env::var("OWNER_MODE").unwrap_or_else(|_| "propagate".to_string()),
        )?;

        let control_effectiveness: u8 = parse_var("CONTROL_EFFECTIVENESS", 60)?;
        if control_effectiveness > 100 {
            return Err(anyhow!(
                "CONTROL_EFFECTIVENESS debe estar entre 0 y 100 (recibido {control_effectiveness})"
            ));
        }

        Ok(Self {
            store_backend,
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            openai_api_key,
            llm_embedding_model,
            llm_chat_model,
            embedding_dimensions: parse_var("EMBEDDING_DIMENSIONS", 1536)?,
            service_timeout: Duration::from_secs(parse_var("SERVICE_TIMEOUT_SECS", 30)?),
            company: env::var("COMPANY").unwrap_or_else(|_| "TechNova S.A.".to_string()),
            control_effectiveness,
            rag_top_k: parse_var("RAG_TOP_K", 5)?,
            owner_mode,
            matcher_seed: env::var("MATCHER_SEED")
                .ok()
                .map(|s| s.parse::<u64>())
                .transpose()
                .context("MATCHER_SEED no es un entero válido")?,
            backfill_limit: parse_var("BACKFILL_LIMIT", 100)?,
            record_chunking: ChunkingConfig::records(),
            document_chunking: ChunkingConfig::documents(),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} tiene un valor inválido: '{raw}'")),
        Err(_) => Ok(default),
    }
}
