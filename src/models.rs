//! Modelos de dominio: registros de riesgo, chunks con embedding y personal.
//!
//! Los nombres serializados de `RiskRecord` son la superficie estable que usan
//! las consultas agregadas (`criticidad`, `date_completed`, `company`).

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Fila de entrada sin normalizar (cabecera → valor), tal como llega de una
/// hoja de cálculo o de un formulario.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Nivel ordinal de riesgo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Criticality {
    Bajo,
    Medio,
    Alto,
    #[serde(rename = "Crítico")]
    Critico,
}

impl Criticality {
    pub const ALL: [Criticality; 4] = [Self::Bajo, Self::Medio, Self::Alto, Self::Critico];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bajo => "Bajo",
            Self::Medio => "Medio",
            Self::Alto => "Alto",
            Self::Critico => "Crítico",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Plazo de remediación en días desde la fecha del informe.
    pub fn remediation_days(&self) -> i64 {
        match self {
            Self::Critico => 7,
            Self::Alto => 15,
            Self::Medio => 30,
            Self::Bajo => 90,
        }
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    Verde,
    Amarillo,
    Naranja,
    Rojo,
}

impl ColorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verde => "verde",
            Self::Amarillo => "amarillo",
            Self::Naranja => "naranja",
            Self::Rojo => "rojo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Verde, Self::Amarillo, Self::Naranja, Self::Rojo]
            .into_iter()
            .find(|c| c.as_str() == s)
    }
}

/// Estrategia de respuesta al riesgo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Treatment {
    Tratar,
    Transferir,
    Evitar,
    Aceptar,
}

impl Treatment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tratar => "Tratar",
            Self::Transferir => "Transferir",
            Self::Evitar => "Evitar",
            Self::Aceptar => "Aceptar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Tratar, Self::Transferir, Self::Evitar, Self::Aceptar]
            .into_iter()
            .find(|t| t.as_str() == s)
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Un riesgo evaluado. Los campos derivados se recalculan siempre a partir de
/// `probability` e `impact`; sólo `date_completed` cambia tras la creación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub id: String,
    pub company: String,
    pub report_date: NaiveDate,

    pub asset: String,
    pub asset_owner: String,
    pub data_type: String,
    pub risk_details: String,

    pub probability: u8,
    pub impact: u8,
    pub threat_score: u8,
    #[serde(rename = "nivel_riesgo_NR")]
    pub risk_level_nr: u8,
    #[serde(rename = "riesgo_residual_RR")]
    pub residual_risk_rr: f64,
    #[serde(rename = "eficacia_control_EC")]
    pub control_effectiveness: u8,

    #[serde(rename = "criticidad")]
    pub criticality: Criticality,
    #[serde(rename = "color_probabilidad")]
    pub color_probability: ColorTag,
    #[serde(rename = "color_impacto")]
    pub color_impact: ColorTag,
    #[serde(rename = "color_puntuacion")]
    pub color_score: ColorTag,

    #[serde(rename = "treatment_suggested")]
    pub treatment: Treatment,
    #[serde(rename = "risk_owner_suggested")]
    pub responsible_party: String,
    #[serde(rename = "target_remediation_date_proposed")]
    pub target_remediation_date: NaiveDate,

    /// Vacío = activo; cualquier otro valor = mitigado.
    #[serde(default)]
    pub date_completed: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f64>,
    pub ingested_at: DateTime<Utc>,
}

impl RiskRecord {
    pub fn is_mitigated(&self) -> bool {
        !self.date_completed.trim().is_empty()
    }

    /// Fuente con la que se etiquetan los chunks derivados de este registro.
    pub fn source_tag(&self) -> String {
        format!("riesgo_{}", self.id)
    }

    /// Texto compacto para el embedding propio del registro.
    pub fn summary_text(&self) -> String {
        format!(
            "{} | {} | {} | prob:{} imp:{} | {}",
            self.asset,
            self.asset_owner,
            self.risk_details,
            self.probability,
            self.impact,
            self.criticality
        )
    }

    /// Representación legible del registro completo, entrada del chunker.
    pub fn narrative(&self) -> String {
        format!(
            "Activo: {}\n\
             Propietario: {}\n\
             Tipo de dato: {}\n\
             Detalles del riesgo: {}\n\
             Probabilidad: {}/10\n\
             Impacto: {}/10\n\
             Puntuación de amenaza: {}/20\n\
             Nivel de riesgo: {:.1}\n\
             Riesgo residual: {:.1}\n\
             Criticidad: {}\n\
             Tratamiento sugerido: {}\n\
             Responsable: {}\n\
             Fecha objetivo: {}\n\
             Empresa: {}\n",
            self.asset,
            self.asset_owner,
            self.data_type,
            self.risk_details,
            self.probability,
            self.impact,
            self.threat_score,
            f64::from(self.risk_level_nr),
            self.residual_risk_rr,
            self.criticality,
            self.treatment,
            self.responsible_party,
            self.target_remediation_date.format("%Y-%m-%d"),
            self.company,
        )
    }
}

/// Unidad de recuperación: un trozo de texto con su vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub id: String,
    #[serde(rename = "texto")]
    pub text: String,
    pub embedding: Vec<f64>,
    #[serde(rename = "fuente")]
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

/// Resultado de una búsqueda por similitud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "fuente")]
    pub source: String,
    pub score: f64,
}

/// Candidato a responsable, mantenido por un proceso externo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personnel {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub area: String,
}

/// Estadísticas agregadas en vivo sobre los registros almacenados.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskStats {
    pub total: u64,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub mitigated: u64,
}

impl RiskStats {
    pub fn active(&self) -> u64 {
        self.total.saturating_sub(self.mitigated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::tests::record;

    #[test]
    fn risk_record_keeps_its_serialized_names() {
        let mut record = record("Servidor base datos", 7, 9, "Acceso no autorizado", "M. Gómez");
        record.date_completed = "2025-11-01".into();

        let value = serde_json::to_value(&record).unwrap();
        let keys = value.as_object().unwrap();
        for key in [
            "id",
            "company",
            "report_date",
            "asset",
            "asset_owner",
            "data_type",
            "risk_details",
            "probability",
            "impact",
            "threat_score",
            "nivel_riesgo_NR",
            "riesgo_residual_RR",
            "eficacia_control_EC",
            "criticidad",
            "color_probabilidad",
            "color_impacto",
            "color_puntuacion",
            "treatment_suggested",
            "risk_owner_suggested",
            "target_remediation_date_proposed",
            "date_completed",
            "ingested_at",
        ] {
            assert!(keys.contains_key(key), "falta la clave {key}");
        }
        for key in ["criticality", "risk_level_nr", "treatment", "responsible_party", "embedding"] {
            assert!(!keys.contains_key(key), "clave inesperada {key}");
        }

        assert_eq!(value["criticidad"], "Crítico");
        assert_eq!(value["nivel_riesgo_NR"], 63);
        assert_eq!(value["treatment_suggested"], "Tratar");
        assert_eq!(value["risk_owner_suggested"], "M. Gómez");
        assert_eq!(value["target_remediation_date_proposed"], "2025-11-06");

        let back: RiskRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.criticality, Criticality::Critico);
        assert_eq!(back.treatment, Treatment::Tratar);
        assert_eq!(back.responsible_party, "M. Gómez");
        assert!(back.is_mitigated());
    }
}
