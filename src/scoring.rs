//! Puntuación determinista de riesgos.
//!
//! Esquema canónico: la criticidad se deriva de la puntuación de amenaza
//! `probabilidad + impacto` (2..=20). El nivel de riesgo `NR = p * i` se
//! calcula y persiste, pero no clasifica.

use serde::Serialize;

use crate::error::ValidationError;
use crate::models::{ColorTag, Criticality};

/// Calificación entera validada en [1, 10].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 10;

    pub fn new(field: &'static str, value: i64) -> Result<Self, ValidationError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::RatingOutOfRange { field, value })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Salida del puntuador.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskScore {
    pub threat_score: u8,
    pub risk_level_nr: u8,
    pub criticality: Criticality,
    pub color_probability: ColorTag,
    pub color_impact: ColorTag,
    pub color_score: ColorTag,
}

impl RiskScore {
    /// `NR * (1 - EC/100)`.
    pub fn residual_risk(&self, control_effectiveness: u8) -> f64 {
        let ec = f64::from(control_effectiveness.min(100));
        f64::from(self.risk_level_nr) * (1.0 - ec / 100.0)
    }
}

pub fn score(probability: Rating, impact: Rating) -> RiskScore {
    let (p, i) = (probability.get(), impact.get());
    let threat_score = p + i;
    RiskScore {
        threat_score,
        risk_level_nr: p * i,
        criticality: criticality_for(threat_score),
        color_probability: rating_color(p),
        color_impact: rating_color(i),
        color_score: score_color(threat_score),
    }
}

/// Variante sobre enteros sin validar; rechaza valores fuera de rango.
#[cfg(test)]
pub fn score_raw(probability: i64, impact: i64) -> Result<RiskScore, ValidationError> {
    Ok(score(
        Rating::new("probability", probability)?,
        Rating::new("impact", impact)?,
    ))
}

pub fn criticality_for(threat_score: u8) -> Criticality {
    match threat_score {
        0..=5 => Criticality::Bajo,
        6..=10 => Criticality::Medio,
        11..=15 => Criticality::Alto,
        _ => Criticality::Critico,
    }
}

/// Banda de color de una calificación individual (probabilidad o impacto).
pub fn rating_color(value: u8) -> ColorTag {
    match value {
        0..=3 => ColorTag::Verde,
        4..=5 => ColorTag::Amarillo,
        6..=8 => ColorTag::Naranja,
        _ => ColorTag::Rojo,
    }
}

pub fn score_color(threat_score: u8) -> ColorTag {
    match threat_score {
        0..=5 => ColorTag::Verde,
        6..=10 => ColorTag::Amarillo,
        11..=15 => ColorTag::Naranja,
        _ => ColorTag::Rojo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_score_is_sum_and_in_range_for_every_pair() {
        for p in 1..=10 {
            for i in 1..=10 {
                let s = score_raw(p, i).unwrap();
                assert_eq!(i64::from(s.threat_score), p + i);
                assert!((2..=20).contains(&s.threat_score));
                assert_eq!(i64::from(s.risk_level_nr), p * i);
            }
        }
    }

    #[test]
    fn criticality_is_monotonic_in_threat_score() {
        let mut previous = criticality_for(2);
        for ts in 3..=20 {
            let current = criticality_for(ts);
            assert!(current >= previous, "{ts}: {current:?} < {previous:?}");
            previous = current;
        }
    }

    #[test]
    fn seven_and_nine_is_critical() {
        let s = score_raw(7, 9).unwrap();
        assert_eq!(s.threat_score, 16);
        assert_eq!(s.risk_level_nr, 63);
        assert_eq!(s.criticality, Criticality::Critico);
        assert_eq!(s.color_probability, ColorTag::Naranja);
        assert_eq!(s.color_impact, ColorTag::Rojo);
        assert_eq!(s.color_score, ColorTag::Rojo);
    }

    #[test]
    fn thresholds_sit_on_band_edges() {
        assert_eq!(criticality_for(5), Criticality::Bajo);
        assert_eq!(criticality_for(6), Criticality::Medio);
        assert_eq!(criticality_for(10), Criticality::Medio);
        assert_eq!(criticality_for(11), Criticality::Alto);
        assert_eq!(criticality_for(15), Criticality::Alto);
        assert_eq!(criticality_for(16), Criticality::Critico);

        assert_eq!(rating_color(3), ColorTag::Verde);
        assert_eq!(rating_color(4), ColorTag::Amarillo);
        assert_eq!(rating_color(8), ColorTag::Naranja);
        assert_eq!(rating_color(9), ColorTag::Rojo);
    }

    #[test]
    fn colors_are_deterministic() {
        for v in 1..=10 {
            assert_eq!(rating_color(v), rating_color(v));
        }
        for ts in 2..=20 {
            assert_eq!(score_color(ts), score_color(ts));
        }
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(
            score_raw(0, 5),
            Err(ValidationError::RatingOutOfRange { field: "probability", value: 0 })
        );
        assert_eq!(
            score_raw(5, 11),
            Err(ValidationError::RatingOutOfRange { field: "impact", value: 11 })
        );
    }

    #[test]
    fn residual_risk_applies_control_effectiveness() {
        let s = score_raw(5, 4).unwrap();
        assert!((s.residual_risk(60) - 8.0).abs() < 1e-9);
        assert!((s.residual_risk(0) - 20.0).abs() < 1e-9);
        assert_eq!(s.residual_risk(100), 0.0);
    }
}
