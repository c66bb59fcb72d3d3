//! Costuras de almacenamiento y una implementación en memoria.
//!
//! `RiskStore` guarda registros y responde a las consultas agregadas,
//! `ChunkIndex` guarda chunks y ofrece búsqueda por similitud, y
//! `RosterSource` expone la plantilla de personal. Neo4j implementa las tres
//! en `neo4j_client`; `MemoryStore` permite arrancar sin base de datos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Criticality, EmbeddingChunk, Personnel, RiskRecord, RiskStats, ScoredChunk};

#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn insert_record(&self, record: &RiskRecord) -> Result<(), StoreError>;

    /// Escritura puntual e idempotente de `date_completed`. Devuelve `false`
    /// si el registro no existe.
    async fn set_date_completed(&self, id: &str, value: &str) -> Result<bool, StoreError>;

    async fn stats(&self, company: Option<&str>) -> Result<RiskStats, StoreError>;

    /// Primeros `limit` registros en orden de inserción.
    async fn sample_records(&self, limit: usize) -> Result<Vec<RiskRecord>, StoreError>;
}

#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Sólo inserta; nunca actualiza ni borra.
    async fn insert_chunks(&self, chunks: &[EmbeddingChunk]) -> Result<(), StoreError>;

    async fn similarity_search(&self, query: &[f64], k: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn count_chunks(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn roster(&self) -> Result<Vec<Personnel>, StoreError>;

    /// Inserta o actualiza por nombre.
    async fn upsert_personnel(&self, people: &[Personnel]) -> Result<usize, StoreError>;
}

/// Almacén en proceso con búsqueda exhaustiva por coseno.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<RiskRecord>>,
    chunks: RwLock<Vec<EmbeddingChunk>>,
    personnel: RwLock<Vec<Personnel>>,
    reject_records: AtomicBool,
    reject_chunks: AtomicBool,
    index_offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn with_roster(people: Vec<Personnel>) -> Self {
        let store = Self::default();
        *write(&store.personnel) = people;
        store
    }

    /// Simula caídas del almacén para ejercitar las rutas degradadas.
    pub fn set_reject_records(&self, on: bool) {
        self.reject_records.store(on, Ordering::SeqCst);
    }

    pub fn set_reject_chunks(&self, on: bool) {
        self.reject_chunks.store(on, Ordering::SeqCst);
    }

    pub fn set_index_offline(&self, on: bool) {
        self.index_offline.store(on, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<RiskRecord> {
        read(&self.records).clone()
    }

    pub fn chunks(&self) -> Vec<EmbeddingChunk> {
        read(&self.chunks).clone()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RiskStore for MemoryStore {
    async fn insert_record(&self, record: &RiskRecord) -> Result<(), StoreError> {
        if self.reject_records.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("inserción de registros deshabilitada".into()));
        }
        write(&self.records).push(record.clone());
        Ok(())
    }

    async fn set_date_completed(&self, id: &str, value: &str) -> Result<bool, StoreError> {
        let mut records = write(&self.records);
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.date_completed = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stats(&self, company: Option<&str>) -> Result<RiskStats, StoreError> {
        let records = read(&self.records);
        let mut stats = RiskStats::default();
        for r in records.iter().filter(|r| company.map_or(true, |c| r.company == c)) {
            stats.total += 1;
            match r.criticality {
                Criticality::Critico => stats.critical += 1,
                Criticality::Alto => stats.high += 1,
                Criticality::Medio => stats.medium += 1,
                Criticality::Bajo => stats.low += 1,
            }
            if r.is_mitigated() {
                stats.mitigated += 1;
            }
        }
        Ok(stats)
    }

    async fn sample_records(&self, limit: usize) -> Result<Vec<RiskRecord>, StoreError> {
        Ok(read(&self.records).iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl ChunkIndex for MemoryStore {
    async fn insert_chunks(&self, chunks: &[EmbeddingChunk]) -> Result<(), StoreError> {
        if self.reject_chunks.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("inserción de chunks deshabilitada".into()));
        }
        write(&self.chunks).extend_from_slice(chunks);
        Ok(())
    }

    async fn similarity_search(&self, query: &[f64], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if self.index_offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("índice vectorial no disponible".into()));
        }
        let chunks = read(&self.chunks);
        let mut hits: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| c.embedding.len() == query.len())
            .map(|c| ScoredChunk {
                text: c.text.clone(),
                source: c.source.clone(),
                score: cosine_similarity(query, &c.embedding),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count_chunks(&self) -> Result<u64, StoreError> {
        Ok(read(&self.chunks).len() as u64)
    }
}

#[async_trait]
impl RosterSource for MemoryStore {
    async fn roster(&self) -> Result<Vec<Personnel>, StoreError> {
        Ok(read(&self.personnel).clone())
    }

    async fn upsert_personnel(&self, people: &[Personnel]) -> Result<usize, StoreError> {
        let mut roster = write(&self.personnel);
        for person in people {
            match roster.iter_mut().find(|p| p.name == person.name) {
                Some(existing) => *existing = person.clone(),
                None => roster.push(person.clone()),
            }
        }
        Ok(people.len())
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
