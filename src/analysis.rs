//! Análisis de patrones y recomendaciones algorítmicas sobre un conjunto de
//! registros ya evaluados.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Criticality, RiskRecord, Treatment};

/// Familias de vulnerabilidad reconocidas en `risk_details`, por orden de
/// precedencia.
const VULNERABILITY_FAMILIES: [(&[&str], &str); 4] = [
    (&["phishing", "spear"], "Phishing/Spear-phishing"),
    (&["csrf"], "CSRF"),
    (&["autenticacion", "autenticación", "mfa"], "Autenticación débil"),
    (&["cifrado", "encriptacion", "encriptación"], "Falta de cifrado"),
];

const OVERLOAD_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreatmentStats {
    pub count: usize,
    pub avg_risk: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskPatterns {
    pub high_risk_assets: Vec<String>,
    pub common_vulnerabilities: Vec<String>,
    pub owner_workload: BTreeMap<String, usize>,
    pub criticality_distribution: BTreeMap<Criticality, usize>,
    pub treatment_effectiveness: BTreeMap<Treatment, TreatmentStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendations {
    pub immediate_actions: Vec<String>,
    pub strategic_initiatives: Vec<String>,
    pub resource_allocation: Vec<String>,
    pub compliance_gaps: Vec<String>,
}

pub fn analyze_patterns(records: &[RiskRecord]) -> RiskPatterns {
    let mut patterns = RiskPatterns::default();
    let mut nr_totals: BTreeMap<Treatment, f64> = BTreeMap::new();

    for record in records {
        if matches!(record.criticality, Criticality::Alto | Criticality::Critico) {
            patterns.high_risk_assets.push(record.asset.clone());
        }

        if let Some(family) = vulnerability_family(&record.risk_details) {
            patterns.common_vulnerabilities.push(family.to_string());
        }

        *patterns
            .owner_workload
            .entry(record.responsible_party.clone())
            .or_default() += 1;
        *patterns
            .criticality_distribution
            .entry(record.criticality)
            .or_default() += 1;

        patterns
            .treatment_effectiveness
            .entry(record.treatment)
            .or_default()
            .count += 1;
        *nr_totals.entry(record.treatment).or_default() += f64::from(record.risk_level_nr);
    }

    for (treatment, stats) in patterns.treatment_effectiveness.iter_mut() {
        let total = nr_totals.get(treatment).copied().unwrap_or_default();
        stats.avg_risk = total / stats.count as f64;
    }

    patterns
}

pub fn vulnerability_family(risk_details: &str) -> Option<&'static str> {
    let details = risk_details.to_lowercase();
    VULNERABILITY_FAMILIES
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| details.contains(m)))
        .map(|(_, family)| *family)
}

pub fn recommend(records: &[RiskRecord], patterns: &RiskPatterns) -> Recommendations {
    let mut recs = Recommendations::default();

    let critical = records
        .iter()
        .filter(|r| r.criticality == Criticality::Critico)
        .count();
    if critical > 0 {
        recs.immediate_actions.push(format!(
            "ATENCIÓN CRÍTICA: {critical} riesgos críticos requieren acción inmediata en los próximos {} días",
            Criticality::Critico.remediation_days()
        ));
    }

    let overloaded: Vec<&str> = patterns
        .owner_workload
        .iter()
        .filter(|(_, count)| **count >= OVERLOAD_THRESHOLD)
        .map(|(owner, _)| owner.as_str())
        .collect();
    if !overloaded.is_empty() {
        recs.resource_allocation.push(format!(
            "REDISTRIBUIR CARGA: {} tienen {OVERLOAD_THRESHOLD}+ riesgos asignados - considerar redistribución",
            overloaded.join(", ")
        ));
    }

    let mut vuln_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for vuln in &patterns.common_vulnerabilities {
        *vuln_counts.entry(vuln.as_str()).or_default() += 1;
    }
    let mut top: Vec<(&str, usize)> = vuln_counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1));
    top.truncate(3);
    if !top.is_empty() {
        let listed: Vec<String> = top.iter().map(|(v, c)| format!("{v} ({c})")).collect();
        recs.strategic_initiatives.push(format!(
            "PATRONES IDENTIFICADOS: Principales vulnerabilidades - {}",
            listed.join(", ")
        ));
    }

    let mut treatments: Vec<(&Treatment, &TreatmentStats)> =
        patterns.treatment_effectiveness.iter().collect();
    treatments.sort_by(|a, b| a.1.avg_risk.total_cmp(&b.1.avg_risk));
    if !treatments.is_empty() {
        let best: Vec<&str> = treatments.iter().take(2).map(|(t, _)| t.as_str()).collect();
        recs.strategic_initiatives.push(format!(
            "TRATAMIENTOS EFECTIVOS: {} muestran mejor reducción de riesgo",
            best.join(", ")
        ));
    }

    let mentions = |word: &str| {
        records
            .iter()
            .any(|r| r.risk_details.to_lowercase().contains(word))
    };
    let gaps: Vec<&str> = [("mfa", "mfa_missing"), ("cifrado", "encryption_missing"), ("acceso", "access_control")]
        .into_iter()
        .filter(|(word, _)| mentions(word))
        .map(|(_, gap)| gap)
        .collect();
    if !gaps.is_empty() {
        recs.compliance_gaps.push(format!(
            "BRECHAS DE CUMPLIMIENTO: {} áreas requieren atención - {}",
            gaps.len(),
            gaps.join(", ")
        ));
    }

    recs
}
