//! Ruta de escritura: filas de riesgo → registros puntuados, clasificados y
//! asignados → persistencia del registro y de sus chunks con embedding.
//!
//! Cada fila recorre `Received → Validated → Scored → Classified → Advised →
//! Assigned → Embedded → Persisted`; una fila inválida termina en `Rejected`
//! sin afectar a sus hermanas del mismo lote.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    app_state::Status,
    chunker,
    columns::{self, ColumnMapping, ParsedRow},
    config::{AppConfig, ChunkingConfig},
    error::{PipelineError, ValidationError},
    llm::EmbeddingClient,
    models::{EmbeddingChunk, Personnel, RawRow, RiskRecord},
    responsible::{AssignmentInput, ResponsibleMatcher},
    scoring,
    store::{RiskStore, RosterSource},
    treatment,
    vector_store::VectorStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowStage {
    Received,
    Validated,
    Scored,
    Classified,
    Advised,
    Assigned,
    Embedded,
    Persisted,
    Rejected,
}

/// Fila descartada y la etapa que alcanzó antes de descartarse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRejection {
    /// Posición de la fila en el lote, empezando en 1.
    pub row: usize,
    pub reached: RowStage,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub record_id: String,
    pub reason: String,
}

/// Registro evaluado junto a la fila de la que procede.
#[derive(Debug, Clone, Serialize)]
pub struct AssessedRow {
    pub row: usize,
    #[serde(flatten)]
    pub record: RiskRecord,
}

/// Evaluación de un lote sin persistir.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub mapping: ColumnMapping,
    pub accepted: Vec<AssessedRow>,
    pub rejected: Vec<RowRejection>,
}

impl Assessment {
    pub fn records(&self) -> Vec<RiskRecord> {
        self.accepted.iter().map(|a| a.record.clone()).collect()
    }
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub rows_received: usize,
    pub records: Vec<RiskRecord>,
    pub rejected: Vec<RowRejection>,
    pub chunks_stored: usize,
    pub chunk_failures: Vec<ChunkFailure>,
}

/// Implementa cómo se mostrará el resumen como texto.
impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen: {} filas recibidas, {} registros guardados, {} filas rechazadas. {} chunks creados ({} registros sin chunks).",
            self.rows_received,
            self.records.len(),
            self.rejected.len(),
            self.chunks_stored,
            self.chunk_failures.len()
        )
    }
}

/// Parámetros de la ruta de escritura tomados de `AppConfig`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub company: String,
    pub control_effectiveness: u8,
    pub record_chunking: ChunkingConfig,
    pub document_chunking: ChunkingConfig,
    pub backfill_limit: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            company: cfg.company.clone(),
            control_effectiveness: cfg.control_effectiveness,
            record_chunking: cfg.record_chunking,
            document_chunking: cfg.document_chunking,
            backfill_limit: cfg.backfill_limit,
        }
    }
}

pub struct RecordPipeline {
    store: Arc<dyn RiskStore>,
    roster: Arc<dyn RosterSource>,
    vectors: VectorStore,
    embedder: EmbeddingClient,
    matcher: ResponsibleMatcher,
    settings: PipelineSettings,
}

impl RecordPipeline {
    pub fn new(
        store: Arc<dyn RiskStore>,
        roster: Arc<dyn RosterSource>,
        vectors: VectorStore,
        embedder: EmbeddingClient,
        matcher: ResponsibleMatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self { store, roster, vectors, embedder, matcher, settings }
    }

    /// Valida, puntúa, clasifica, asigna y calcula el embedding propio de cada
    /// fila, sin persistir nada.
    ///
    /// Si falta alguna columna requerida se rechaza el lote entero.
    pub async fn assess_batch(
        &self,
        rows: &[RawRow],
        report_date: NaiveDate,
    ) -> Result<Assessment, ValidationError> {
        let mapping = columns::map_columns(columns::batch_headers(rows));
        mapping.require_complete()?;
        debug!("Mapeo de columnas: {:?}", mapping.bindings());

        let roster = match self.roster.roster().await {
            Ok(roster) => roster,
            Err(err) => {
                warn!("No se pudo leer la plantilla de personal ({err}); se usa la tabla por defecto.");
                Vec::new()
            }
        };

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            match columns::parse_row(row, &mapping) {
                Ok(parsed) => {
                    debug!("Fila {} → {:?}", index + 1, RowStage::Validated);
                    accepted.push(AssessedRow {
                        row: index + 1,
                        record: self.assess_row(parsed, report_date, &roster),
                    });
                }
                Err(errors) => {
                    warn!("Fila {} → {:?}: {:?}", index + 1, RowStage::Rejected, errors);
                    rejected.push(RowRejection {
                        row: index + 1,
                        reached: RowStage::Received,
                        reasons: errors.iter().map(ToString::to_string).collect(),
                    });
                }
            }
        }

        let summaries: Vec<String> = accepted.iter().map(|a| a.record.summary_text()).collect();
        let vectors = self.embedder.embed_many(&summaries).await;
        for (assessed, embedding) in accepted.iter_mut().zip(vectors) {
            assessed.record.embedding = embedding;
            debug!("Fila {} → {:?}", assessed.row, RowStage::Embedded);
        }

        Ok(Assessment { mapping, accepted, rejected })
    }

    fn assess_row(&self, row: ParsedRow, report_date: NaiveDate, roster: &[Personnel]) -> RiskRecord {
        let score = scoring::score(row.probability, row.impact);
        let criticality = score.criticality;
        debug!("'{}' → {:?} ({})", row.asset, RowStage::Scored, score.threat_score);
        debug!("'{}' → {:?} ({criticality})", row.asset, RowStage::Classified);
        let treatment =
            treatment::suggest_treatment(criticality, &row.data_type, &row.asset, &row.risk_details);
        debug!("'{}' → {:?} ({treatment})", row.asset, RowStage::Advised);
        let responsible = self.matcher.assign(
            AssignmentInput {
                asset: &row.asset,
                asset_owner: &row.asset_owner,
                data_type: &row.data_type,
                criticality,
            },
            roster,
        );
        debug!("'{}' → {:?} ({responsible})", row.asset, RowStage::Assigned);

        RiskRecord {
            id: Uuid::new_v4().to_string(),
            company: self.settings.company.clone(),
            report_date,
            probability: row.probability.get(),
            impact: row.impact.get(),
            threat_score: score.threat_score,
            risk_level_nr: score.risk_level_nr,
            residual_risk_rr: score.residual_risk(self.settings.control_effectiveness),
            control_effectiveness: self.settings.control_effectiveness,
            criticality,
            color_probability: score.color_probability,
            color_impact: score.color_impact,
            color_score: score.color_score,
            treatment,
            responsible_party: responsible,
            target_remediation_date: report_date + Duration::days(criticality.remediation_days()),
            date_completed: String::new(),
            embedding: Vec::new(),
            ingested_at: Utc::now(),
            asset: row.asset,
            asset_owner: row.asset_owner,
            data_type: row.data_type,
            risk_details: row.risk_details,
        }
    }

    /// Ruta completa: evalúa el lote y persiste cada registro con sus chunks.
    ///
    /// Un fallo al guardar un registro lo rechaza sólo a él; un fallo al
    /// guardar sus chunks se registra y el registro se conserva.
    pub async fn ingest_batch(
        &self,
        rows: &[RawRow],
        report_date: NaiveDate,
    ) -> Result<BatchReport, PipelineError> {
        let assessment = self.assess_batch(rows, report_date).await?;
        let mut report = BatchReport {
            rows_received: rows.len(),
            rejected: assessment.rejected,
            ..BatchReport::default()
        };

        for AssessedRow { row, record } in assessment.accepted {
            if let Err(err) = self.store.insert_record(&record).await {
                error!("Error guardando el registro '{}': {err}", record.asset);
                report.rejected.push(RowRejection {
                    row,
                    reached: RowStage::Embedded,
                    reasons: vec![err.to_string()],
                });
                continue;
            }

            match self
                .store_chunks(&record.source_tag(), &record.narrative(), self.settings.record_chunking)
                .await
            {
                Ok(stored) => report.chunks_stored += stored,
                Err(err) => {
                    warn!("Registro '{}' guardado sin chunks: {err}", record.id);
                    report.chunk_failures.push(ChunkFailure {
                        record_id: record.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
            debug!("Registro '{}' → {:?}", record.id, RowStage::Persisted);
            report.records.push(record);
        }

        report.rejected.sort_by_key(|r| r.row);
        info!("{report}");
        Ok(report)
    }

    /// Trocea y guarda un documento de texto libre bajo su etiqueta de fuente.
    pub async fn ingest_document(&self, source: &str, text: &str) -> Result<usize, PipelineError> {
        let stored = self
            .store_chunks(source, text, self.settings.document_chunking)
            .await?;
        info!("Documento '{source}' ingerido con {stored} chunks.");
        Ok(stored)
    }

    /// Genera chunks para registros históricos si el índice está vacío.
    /// Procesa como mucho `backfill_limit` registros.
    pub async fn backfill(&self, status_arc: Option<Arc<Mutex<Status>>>) -> Result<usize, PipelineError> {
        if self.vectors.count().await? > 0 {
            info!("El índice vectorial ya contiene chunks; no se procesa el histórico.");
            return Ok(0);
        }

        let records = self.store.sample_records(self.settings.backfill_limit).await?;
        let total = records.len();
        let mut created = 0;
        for (index, record) in records.iter().enumerate() {
            if let Some(status_arc) = &status_arc {
                let mut status = status_arc.lock().unwrap_or_else(|p| p.into_inner());
                status.message = format!("[{}/{}] Procesando histórico: {}...", index + 1, total, record.asset);
                status.progress = (index + 1) as f32 / total as f32;
            }

            let source = format!("riesgo_historico_{}", record.id);
            match self
                .store_chunks(&source, &record.narrative(), self.settings.record_chunking)
                .await
            {
                Ok(stored) => created += stored,
                Err(err) => warn!("Histórico '{}' sin chunks: {err}", record.id),
            }
        }

        info!("{created} chunks creados a partir de {total} registros históricos.");
        Ok(created)
    }

    async fn store_chunks(
        &self,
        source: &str,
        text: &str,
        chunking: ChunkingConfig,
    ) -> Result<usize, PipelineError> {
        let pieces = chunker::chunk(text, chunking)?;
        if pieces.is_empty() {
            return Ok(0);
        }

        let vectors = self.embedder.embed_many(&pieces).await;
        let now = Utc::now();
        let chunks: Vec<EmbeddingChunk> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| EmbeddingChunk {
                id: format!("{source}_{i}"),
                text,
                embedding,
                source: source.to_string(),
                ingested_at: now,
            })
            .collect();

        Ok(self.vectors.upsert(&chunks).await?)
    }
}
