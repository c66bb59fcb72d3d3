//! Integración con Neo4j como vector store para los `:Chunk`, y el adaptador
//! que usa el resto del crate.
//!
//! API pública:
//!   - `ensure_chunk_vector_index(&Graph, dimensions)`
//!   - `VectorStore::upsert` / `VectorStore::search`.
//!
//! `search` nunca falla: un índice ausente o una consulta rota se traducen en
//! "sin contexto relevante".

use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{query, Graph};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{EmbeddingChunk, ScoredChunk};
use crate::neo4j_client::Neo4jStore;
use crate::store::ChunkIndex;

pub const CHUNK_INDEX_NAME: &str = "chunkEmbeddingIndex";

/// Adaptador de sólo-anexar sobre un `ChunkIndex`.
#[derive(Clone)]
pub struct VectorStore {
    index: Arc<dyn ChunkIndex>,
}

impl VectorStore {
    pub fn new(index: Arc<dyn ChunkIndex>) -> Self {
        Self { index }
    }

    pub async fn upsert(&self, chunks: &[EmbeddingChunk]) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.index.insert_chunks(chunks).await?;
        Ok(chunks.len())
    }

    /// Como mucho `k` resultados ordenados por puntuación descendente.
    pub async fn search(&self, query_vector: &[f64], k: usize) -> Vec<ScoredChunk> {
        if k == 0 || query_vector.is_empty() {
            return Vec::new();
        }
        match self.index.similarity_search(query_vector, k).await {
            Ok(mut hits) => {
                hits.sort_by(|a, b| b.score.total_cmp(&a.score));
                hits.truncate(k);
                hits
            }
            Err(err) => {
                warn!("Búsqueda vectorial no disponible: {err}. Se continúa sin contexto.");
                Vec::new()
            }
        }
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.index.count_chunks().await
    }
}

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista.
pub async fn ensure_chunk_vector_index(graph: &Graph, dimensions: usize) -> Result<(), StoreError> {
    // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", CHUNK_INDEX_NAME),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{CHUNK_INDEX_NAME}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {CHUNK_INDEX_NAME} IF NOT EXISTS
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{CHUNK_INDEX_NAME}' creado ({dimensions} dimensiones).");

    Ok(())
}

#[async_trait]
impl ChunkIndex for Neo4jStore {
    async fn insert_chunks(&self, chunks: &[EmbeddingChunk]) -> Result<(), StoreError> {
        let tx = self.graph().start_txn().await?;
        for chunk in chunks {
            tx.run(
                query(
                    "CREATE (c:Chunk {id: $id, texto: $texto, embedding: $embedding,
                                      fuente: $fuente, ingested_at: $ingested_at})",
                )
                .param("id", chunk.id.clone())
                .param("texto", chunk.text.clone())
                .param("embedding", chunk.embedding.clone())
                .param("fuente", chunk.source.clone())
                .param("ingested_at", chunk.ingested_at.to_rfc3339()),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn similarity_search(&self, query_vec: &[f64], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let mut cursor = self
            .graph()
            .execute(
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node, score
                     RETURN node.texto AS texto, node.fuente AS fuente, score
                     ORDER BY score DESC",
                )
                .param("index_name", CHUNK_INDEX_NAME)
                .param("k", k as i64)
                .param("embedding", query_vec.to_vec()),
            )
            .await?;

        let mut output = Vec::new();
        while let Some(row) = cursor.next().await? {
            let text: String = row.get("texto").ok_or(StoreError::MissingField("texto"))?;
            let source: String = row.get("fuente").unwrap_or_default();
            let score: f64 = row.get("score").ok_or(StoreError::MissingField("score"))?;
            output.push(ScoredChunk { text, source, score });
        }
        Ok(output)
    }

    async fn count_chunks(&self) -> Result<u64, StoreError> {
        let mut cursor = self
            .graph()
            .execute(query("MATCH (c:Chunk) RETURN count(c) AS total"))
            .await?;
        let total: i64 = match cursor.next().await? {
            Some(row) => row.get("total").unwrap_or(0),
            None => 0,
        };
        Ok(total.max(0) as u64)
    }
}
