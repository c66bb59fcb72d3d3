//! Conexión a Neo4j, restricciones de esquema y persistencia de registros de
//! riesgo y personal.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use neo4rs::{query, Graph, Node};
use tracing::info;
use url::Url;

use crate::error::StoreError;
use crate::models::{ColorTag, Criticality, Personnel, RiskRecord, RiskStats, Treatment};
use crate::store::{RiskStore, RosterSource};

pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Graph> {
    let url = Url::parse(uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, user, password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints básicos para las etiquetas usadas en el grafo:
/// :RiskRecord, :Chunk y :Personnel
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT risk_record_id IF NOT EXISTS
         FOR (r:RiskRecord)
         REQUIRE r.id IS UNIQUE",
        "CREATE CONSTRAINT chunk_id IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.id IS UNIQUE",
        "CREATE CONSTRAINT personnel_name IF NOT EXISTS
         FOR (p:Personnel)
         REQUIRE p.name IS UNIQUE",
        // Las consultas agregadas filtran por estos campos.
        "CREATE INDEX risk_record_criticidad IF NOT EXISTS
         FOR (r:RiskRecord) ON (r.criticidad)",
        "CREATE INDEX risk_record_company IF NOT EXISTS
         FOR (r:RiskRecord) ON (r.company)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints e índices creados).");
    Ok(())
}

/// Implementación Neo4j de todas las costuras de almacenamiento.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }
}

#[async_trait]
impl RiskStore for Neo4jStore {
    async fn insert_record(&self, r: &RiskRecord) -> Result<(), StoreError> {
        self.graph
            .run(
                query(
                    "CREATE (r:RiskRecord {
                        id: $id, company: $company, report_date: $report_date,
                        asset: $asset, asset_owner: $asset_owner, data_type: $data_type,
                        risk_details: $risk_details, probability: $probability, impact: $impact,
                        threat_score: $threat_score, nivel_riesgo_NR: $nr,
                        riesgo_residual_RR: $rr, eficacia_control_EC: $ec,
                        criticidad: $criticidad, color_probabilidad: $color_prob,
                        color_impacto: $color_imp, color_puntuacion: $color_score,
                        treatment_suggested: $treatment, risk_owner_suggested: $responsible,
                        target_remediation_date_proposed: $target_date,
                        date_completed: $date_completed, embedding: $embedding,
                        ingested_at: $ingested_at
                    })",
                )
                .param("id", r.id.clone())
                .param("company", r.company.clone())
                .param("report_date", r.report_date.format("%Y-%m-%d").to_string())
                .param("asset", r.asset.clone())
                .param("asset_owner", r.asset_owner.clone())
                .param("data_type", r.data_type.clone())
                .param("risk_details", r.risk_details.clone())
                .param("probability", i64::from(r.probability))
                .param("impact", i64::from(r.impact))
                .param("threat_score", i64::from(r.threat_score))
                .param("nr", i64::from(r.risk_level_nr))
                .param("rr", r.residual_risk_rr)
                .param("ec", i64::from(r.control_effectiveness))
                .param("criticidad", r.criticality.as_str())
                .param("color_prob", r.color_probability.as_str())
                .param("color_imp", r.color_impact.as_str())
                .param("color_score", r.color_score.as_str())
                .param("treatment", r.treatment.as_str())
                .param("responsible", r.responsible_party.clone())
                .param(
                    "target_date",
                    r.target_remediation_date.format("%Y-%m-%d").to_string(),
                )
                .param("date_completed", r.date_completed.clone())
                .param("embedding", r.embedding.clone())
                .param("ingested_at", r.ingested_at.to_rfc3339()),
            )
            .await?;
        Ok(())
    }

    async fn set_date_completed(&self, id: &str, value: &str) -> Result<bool, StoreError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (r:RiskRecord {id: $id})
                     SET r.date_completed = $value
                     RETURN r.id AS id",
                )
                .param("id", id)
                .param("value", value),
            )
            .await?;
        Ok(cursor.next().await?.is_some())
    }

    async fn stats(&self, company: Option<&str>) -> Result<RiskStats, StoreError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (r:RiskRecord)
                     WHERE $company = '' OR r.company = $company
                     RETURN count(r) AS total,
                            count(CASE WHEN r.criticidad = 'Crítico' THEN 1 END) AS critical,
                            count(CASE WHEN r.criticidad = 'Alto' THEN 1 END) AS high,
                            count(CASE WHEN r.criticidad = 'Medio' THEN 1 END) AS medium,
                            count(CASE WHEN r.criticidad = 'Bajo' THEN 1 END) AS low,
                            count(CASE WHEN coalesce(trim(r.date_completed), '') <> '' THEN 1 END) AS mitigated",
                )
                .param("company", company.unwrap_or_default()),
            )
            .await?;

        let Some(row) = cursor.next().await? else {
            return Ok(RiskStats::default());
        };
        let count = |key: &str| row.get::<i64>(key).unwrap_or(0).max(0) as u64;
        Ok(RiskStats {
            total: count("total"),
            critical: count("critical"),
            high: count("high"),
            medium: count("medium"),
            low: count("low"),
            mitigated: count("mitigated"),
        })
    }

    async fn sample_records(&self, limit: usize) -> Result<Vec<RiskRecord>, StoreError> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (r:RiskRecord) RETURN r ORDER BY r.ingested_at LIMIT $limit")
                    .param("limit", limit as i64),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = cursor.next().await? {
            let node: Node = row.get("r").ok_or(StoreError::MissingField("r"))?;
            records.push(record_from_node(&node)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RosterSource for Neo4jStore {
    async fn roster(&self) -> Result<Vec<Personnel>, StoreError> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (p:Personnel) RETURN p.name AS name, p.role AS role, p.area AS area
                 ORDER BY name",
            ))
            .await?;

        let mut roster = Vec::new();
        while let Some(row) = cursor.next().await? {
            roster.push(Personnel {
                name: row.get("name").ok_or(StoreError::MissingField("name"))?,
                role: row.get("role").unwrap_or_default(),
                area: row.get("area").unwrap_or_default(),
            });
        }
        Ok(roster)
    }

    async fn upsert_personnel(&self, people: &[Personnel]) -> Result<usize, StoreError> {
        let tx = self.graph.start_txn().await?;
        for person in people {
            tx.run(
                query("MERGE (p:Personnel {name: $name}) SET p.role = $role, p.area = $area")
                    .param("name", person.name.clone())
                    .param("role", person.role.clone())
                    .param("area", person.area.clone()),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(people.len())
    }
}

fn record_from_node(node: &Node) -> Result<RiskRecord, StoreError> {
    let text = |key: &'static str| node.get::<String>(key).unwrap_or_default();
    let small = |key: &'static str| -> Result<u8, StoreError> {
        let value: i64 = node.get(key).ok_or(StoreError::MissingField(key))?;
        u8::try_from(value).map_err(|_| StoreError::InvalidValue(format!("{key} = {value}")))
    };
    let date = |key: &'static str| -> Result<NaiveDate, StoreError> {
        let raw = text(key);
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| StoreError::InvalidValue(format!("{key} = '{raw}'")))
    };
    let color = |key: &'static str| -> Result<ColorTag, StoreError> {
        let raw = text(key);
        ColorTag::parse(&raw).ok_or_else(|| StoreError::InvalidValue(format!("{key} = '{raw}'")))
    };

    let criticidad = text("criticidad");
    let treatment = text("treatment_suggested");
    let ingested_at = DateTime::parse_from_rfc3339(&text("ingested_at"))
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(RiskRecord {
        id: node.get("id").ok_or(StoreError::MissingField("id"))?,
        company: text("company"),
        report_date: date("report_date")?,
        asset: text("asset"),
        asset_owner: text("asset_owner"),
        data_type: text("data_type"),
        risk_details: text("risk_details"),
        probability: small("probability")?,
        impact: small("impact")?,
        threat_score: small("threat_score")?,
        risk_level_nr: small("nivel_riesgo_NR")?,
        residual_risk_rr: node.get("riesgo_residual_RR").unwrap_or(0.0),
        control_effectiveness: small("eficacia_control_EC")?,
        criticality: Criticality::parse(&criticidad)
            .ok_or_else(|| StoreError::InvalidValue(format!("criticidad = '{criticidad}'")))?,
        color_probability: color("color_probabilidad")?,
        color_impact: color("color_impacto")?,
        color_score: color("color_puntuacion")?,
        treatment: Treatment::parse(&treatment)
            .ok_or_else(|| StoreError::InvalidValue(format!("treatment_suggested = '{treatment}'")))?,
        responsible_party: text("risk_owner_suggested"),
        target_remediation_date: date("target_remediation_date_proposed")?,
        date_completed: text("date_completed"),
        // El vector propio no se necesita para contexto ni para el backfill.
        embedding: Vec::new(),
        ingested_at,
    })
}
