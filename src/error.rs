//! Taxonomía de errores del núcleo.
//!
//! - `ValidationError`: entrada mal formada en la ruta de escritura.
//! - `ServiceError`: fallo de un modelo externo; nunca cruza la frontera del
//!   componente que lo consume.
//! - `StoreError`: fallo de persistencia o de consulta.
//! - `ChunkingError`: configuración de ventana inválida.
//!
//! Un resultado vacío de búsqueda no es un error y no tiene variante aquí.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("columnas requeridas no encontradas: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("el activo está vacío")]
    EmptyAsset,
    #[error("falta el campo '{0}'")]
    MissingField(&'static str),
    #[error("'{field}' no es un entero válido: {value}")]
    NotAnInteger { field: &'static str, value: String },
    #[error("'{field}' fuera de rango [1, 10]: {value}")]
    RatingOutOfRange { field: &'static str, value: i64 },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("el servicio '{service}' no respondió en {secs}s")]
    Timeout { service: &'static str, secs: u64 },
    #[error("el servicio '{service}' falló: {source}")]
    Failed {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error de Neo4j: {0}")]
    Neo4j(#[from] neo4rs::Error),
    #[error("falta el campo '{0}' en el resultado")]
    MissingField(&'static str),
    #[error("valor inválido en el almacén: {0}")]
    InvalidValue(String),
    #[error("almacén no disponible: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("chunk_size debe ser mayor que cero")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) debe ser menor que chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Errores de la ruta de escritura a nivel de lote.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error("error de persistencia: {0}")]
    Persistence(#[from] StoreError),
}
