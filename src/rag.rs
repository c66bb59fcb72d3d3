//! Consulta RAG sobre los registros de riesgo.
//!
//! Flujo:
//!   1. Estadísticas agregadas en vivo (siempre disponibles).
//!   2. Embedding de la pregunta.
//!   3. Búsqueda de los `top_k` chunks más parecidos; sin resultados se sigue
//!      sólo con estadísticas.
//!   4. Construcción del prompt con fecha, estadísticas, ejemplos, contexto y
//!      pregunta literal.
//!   5. Llamada al modelo generativo; si falla, respuesta enlatada construida
//!      con las estadísticas del paso 1.
//!
//! El motor no guarda estado entre llamadas: el historial de la conversación
//! es un `ConversationState` que pertenece a quien llama.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    analysis::{self, Recommendations, RiskPatterns},
    llm::{call_with_retry, EmbeddingClient, TextGenerator},
    models::{RiskRecord, RiskStats, ScoredChunk},
    store::RiskStore,
    vector_store::VectorStore,
};

const MAX_EXAMPLES: usize = 5;
const EXAMPLE_DETAIL_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Historial de una conversación, propiedad del llamante.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl ConversationState {
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn { role, content: content.into() });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub stats: RiskStats,
    pub sources: Vec<String>,
    /// `true` cuando la respuesta es la enlatada.
    pub degraded: bool,
}

pub struct RagEngine {
    store: Arc<dyn RiskStore>,
    vectors: VectorStore,
    embedder: EmbeddingClient,
    generator: Arc<dyn TextGenerator>,
    company: String,
    top_k: usize,
    timeout: Duration,
}

impl RagEngine {
    pub fn new(
        store: Arc<dyn RiskStore>,
        vectors: VectorStore,
        embedder: EmbeddingClient,
        generator: Arc<dyn TextGenerator>,
        company: String,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self { store, vectors, embedder, generator, company, top_k, timeout }
    }

    /// Responde a `question`. Si se pasan `records`, los ejemplos y los
    /// patrones del prompt salen de ellos en lugar del almacén.
    pub async fn answer(&self, question: &str, records: Option<&[RiskRecord]>) -> RagAnswer {
        let stats = match self.store.stats(None).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!("No se pudieron calcular las estadísticas: {err}");
                RiskStats::default()
            }
        };

        let (examples, analysis) = match records {
            Some(records) if !records.is_empty() => {
                let patterns = analysis::analyze_patterns(records);
                let recs = analysis::recommend(records, &patterns);
                (records.iter().take(MAX_EXAMPLES).cloned().collect(), Some((patterns, recs)))
            }
            _ => match self.store.sample_records(MAX_EXAMPLES).await {
                Ok(sample) => (sample, None),
                Err(err) => {
                    warn!("No se pudieron leer ejemplos de riesgos: {err}");
                    (Vec::new(), None)
                }
            },
        };

        let query_vector = self.embedder.embed(question).await;
        let chunks = self.vectors.search(&query_vector, self.top_k).await;
        info!("RAG: {} chunks recuperados para la consulta.", chunks.len());

        let prompt = build_prompt(
            Local::now().date_naive(),
            &stats,
            &examples,
            &chunks,
            question,
            analysis.as_ref().map(|(p, r)| (p, r)),
        );

        let generator = &self.generator;
        let sources = chunks.into_iter().map(|c| c.source).collect();
        match call_with_retry("chat", self.timeout, || generator.generate(&prompt)).await {
            Ok(answer) => RagAnswer { answer, stats, sources, degraded: false },
            Err(err) => {
                warn!("Modelo generativo no disponible ({err}); se usa la respuesta enlatada.");
                RagAnswer {
                    answer: canned_response(&self.company, &stats),
                    stats,
                    sources,
                    degraded: true,
                }
            }
        }
    }

    /// Añade la pregunta y la respuesta al historial recibido y lo devuelve.
    pub async fn reply(
        &self,
        mut conversation: ConversationState,
        question: &str,
        records: Option<&[RiskRecord]>,
    ) -> (ConversationState, RagAnswer) {
        conversation.push(Role::User, question);
        let answer = self.answer(question, records).await;
        conversation.push(Role::Assistant, answer.answer.clone());
        (conversation, answer)
    }
}

pub fn build_prompt(
    date: NaiveDate,
    stats: &RiskStats,
    examples: &[RiskRecord],
    chunks: &[ScoredChunk],
    query: &str,
    analysis: Option<(&RiskPatterns, &Recommendations)>,
) -> String {
    let examples_text = if examples.is_empty() {
        "- (sin registros disponibles)".to_string()
    } else {
        examples
            .iter()
            .take(MAX_EXAMPLES)
            .map(|r| {
                let details: String = r.risk_details.chars().take(EXAMPLE_DETAIL_CHARS).collect();
                format!("- {}: {}... (Criticidad: {})", r.asset, details, r.criticality)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut prompt = format!(
        "ASISTENTE DE SEGURIDAD DE LA INFORMACIÓN - ANÁLISIS CON DATOS REALES\n\
         Fecha de Análisis: {}\n\n\
         ESTADÍSTICAS ACTUALES DE LA BASE DE DATOS:\n\
         - Total de riesgos registrados: {}\n\
         - Riesgos críticos: {}\n\
         - Riesgos altos: {}\n\
         - Riesgos mitigados: {}\n\
         - Riesgos activos: {}\n\n\
         EJEMPLOS DE RIESGOS REGISTRADOS:\n{}\n",
        date.format("%Y-%m-%d"),
        stats.total,
        stats.critical,
        stats.high,
        stats.mitigated,
        stats.active(),
        examples_text,
    );

    if let Some((patterns, recs)) = analysis {
        let mut vulns: Vec<&str> = patterns.common_vulnerabilities.iter().map(String::as_str).collect();
        vulns.sort_unstable();
        vulns.dedup();
        prompt.push_str(&format!(
            "\nPATRONES IDENTIFICADOS:\n\
             - Activos de riesgo alto o crítico: {}\n\
             - Vulnerabilidades frecuentes: {}\n\
             - Recomendaciones: {} acciones inmediatas, {} iniciativas estratégicas, {} brechas de cumplimiento\n",
            patterns.high_risk_assets.len(),
            if vulns.is_empty() { "ninguna".to_string() } else { vulns.join(", ") },
            recs.immediate_actions.len(),
            recs.strategic_initiatives.len(),
            recs.compliance_gaps.len(),
        ));
    }

    if !chunks.is_empty() {
        let context: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        prompt.push_str("\nCONTEXTO VECTORIAL:\n");
        prompt.push_str(&context.join("\n\n"));
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\nCONSULTA DEL USUARIO: {query}\n\n\
         INSTRUCCIONES:\n\
         1. Responde basándote ÚNICAMENTE en los datos reales mostrados arriba\n\
         2. Si la consulta es sobre estadísticas, usa las cifras exactas de la base de datos\n\
         3. Si la consulta es sobre riesgos específicos, menciona los ejemplos reales proporcionados\n\
         4. Si no hay suficiente información específica, indica que se necesita consultar más datos\n\
         5. Mantén la respuesta profesional y enfocada en la seguridad de la información\n\
         6. NO inventes datos\n\n\
         Responde en español de forma clara y concisa.\n"
    ));
    prompt
}

/// Respuesta usada cuando el modelo generativo no está disponible.
pub fn canned_response(company: &str, stats: &RiskStats) -> String {
    format!(
        "Hola, soy el Asistente de Seguridad de la Información de {company}.\n\n\
         Basándome en los datos actuales de nuestra base de datos:\n\n\
         **Estadísticas Generales:**\n\
         - Total de riesgos registrados: {}\n\
         - Riesgos críticos: {}\n\
         - Riesgos altos: {}\n\
         - Riesgos mitigados: {}\n\n\
         El servicio de análisis no está disponible en este momento. Si tienes preguntas \
         específicas sobre riesgos, tratamientos o análisis de seguridad, vuelve a intentarlo \
         en unos minutos.",
        stats.total, stats.critical, stats.high, stats.mitigated,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::tests::record;
    use crate::models::EmbeddingChunk;
    use crate::store::{ChunkIndex, MemoryStore, RiskStore};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Broken;

    #[async_trait]
    impl TextGenerator for Broken {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(anyhow!("cuota agotada"))
        }
    }

    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Recorder {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("Hay 2 riesgos críticos.".into())
        }
    }

    fn engine(store: Arc<MemoryStore>, generator: Arc<dyn TextGenerator>) -> RagEngine {
        RagEngine::new(
            store.clone(),
            VectorStore::new(store),
            EmbeddingClient::offline(16),
            generator,
            "TechNova S.A.".into(),
            5,
            Duration::from_millis(200),
        )
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut closed = record("Portal web", 8, 9, "phishing dirigido", "J. Pérez");
        closed.date_completed = "2025-11-02".into();
        for r in [
            closed,
            record("Correo", 9, 9, "spear phishing", "J. Pérez"),
            record("API pagos", 6, 6, "sin mfa", "R. Torres"),
            record("Impresora", 1, 2, "atasco", "P. Ruiz"),
        ] {
            store.insert_record(&r).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn degraded_answer_carries_live_counts() {
        let store = seeded().await;
        store.set_index_offline(true);

        let result = engine(store, Arc::new(Broken)).answer("¿Cuántos riesgos críticos hay?", None).await;
        assert!(result.degraded);
        assert!(result.sources.is_empty());
        assert!(result.answer.contains("TechNova S.A."));
        assert!(result.answer.contains("Total de riesgos registrados: 4"));
        assert!(result.answer.contains("Riesgos críticos: 2"));
        assert!(result.answer.contains("Riesgos altos: 1"));
    }

    #[tokio::test]
    async fn prompt_carries_stats_examples_context_and_query() {
        let store = seeded().await;
        store
            .insert_chunks(&[EmbeddingChunk {
                id: "doc_0".into(),
                text: "Política: MFA obligatorio en VPN".into(),
                embedding: vec![1.0; 16],
                source: "politica".into(),
                ingested_at: Utc::now(),
            }])
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());

        let result = engine(store, recorder.clone()).answer("¿Qué pasa con la VPN?", None).await;
        assert!(!result.degraded);
        assert_eq!(result.answer, "Hay 2 riesgos críticos.");
        assert_eq!(result.sources, vec!["politica"]);

        let prompts = recorder.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.contains("Riesgos mitigados: 1"));
        assert!(prompt.contains("Riesgos activos: 3"));
        assert!(prompt.contains("- Correo: spear phishing... (Criticidad: Crítico)"));
        assert!(prompt.contains("CONTEXTO VECTORIAL:\nPolítica: MFA obligatorio en VPN"));
        assert!(prompt.contains("CONSULTA DEL USUARIO: ¿Qué pasa con la VPN?"));
        assert!(!prompt.contains("PATRONES IDENTIFICADOS"));
    }

    #[tokio::test]
    async fn caller_records_replace_samples_and_add_patterns() {
        let store = seeded().await;
        let recorder = Arc::new(Recorder::default());
        let batch = vec![record("Servidor VPN", 7, 7, "credenciales sin cifrado", "D. Quispe")];

        engine(store, recorder.clone()).answer("resumen", Some(&batch)).await;
        let prompts = recorder.prompts.lock().unwrap();
        assert!(prompts[0].contains("- Servidor VPN: credenciales sin cifrado..."));
        assert!(!prompts[0].contains("- Impresora"));
        assert!(prompts[0].contains("Vulnerabilidades frecuentes: Falta de cifrado"));
    }

    #[test]
    fn example_details_are_truncated_by_characters() {
        let long = "ñ".repeat(150);
        let r = record("Activo", 2, 2, &long, "");
        let prompt = build_prompt(
            NaiveDate::from_ymd_opt(2025, 10, 30).unwrap(),
            &RiskStats::default(),
            &[r],
            &[],
            "x",
            None,
        );
        assert!(prompt.contains(&format!("- Activo: {}...", "ñ".repeat(100))));
        assert!(prompt.contains("Fecha de Análisis: 2025-10-30"));
        assert!(!prompt.contains("CONTEXTO VECTORIAL"));
    }

    #[tokio::test]
    async fn conversation_belongs_to_the_caller() {
        let store = seeded().await;
        let engine = engine(store, Arc::new(Recorder::default()));

        let (conversation, _) = engine.reply(ConversationState::default(), "hola", None).await;
        let (conversation, _) = engine.reply(conversation, "¿y los altos?", None).await;
        assert_eq!(conversation.turns.len(), 4);
        assert_eq!(conversation.turns[2], Turn { role: Role::User, content: "¿y los altos?".into() });
        assert_eq!(conversation.turns[3].role, Role::Assistant);
        assert_eq!(conversation.turns[3].content, "Hay 2 riesgos críticos.");
    }
}
