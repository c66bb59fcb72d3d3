//! Asignación de responsables por puntuación ponderada sobre la plantilla.
//!
//! Sin plantilla se recurre a una tabla fija de palabras clave y, si nada
//! coincide, a una elección aleatoria de una lista por defecto. La fuente
//! aleatoria es inyectable para que los tests sean deterministas.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::config::OwnerMode;
use crate::models::{Criticality, Personnel};

/// Responsable cuando ninguna regla aporta señal.
pub const DEFAULT_RESPONSIBLE: &str = "Seguridad";

pub const DEFAULT_NAMES: [&str; 15] = [
    "J. Pérez", "M. Gómez", "L. Huaman", "A. Valdez", "R. Torres",
    "S. Castillo", "D. Quispe", "M. Ramos", "V. León", "C. Morales",
    "P. Ruiz", "E. Silva", "F. Mendoza", "G. Castro", "H. Vargas",
];

/// Palabras en el propietario, palabras en el activo, nombre asignado.
const KEYWORD_TABLE: [(&[&str], &[&str], &str); 8] = [
    (&["dba"], &["base"], "M. Gómez"),
    (&["seguridad"], &["security"], "J. Pérez"),
    (&["devops"], &["dev"], "L. Huaman"),
    (&["compliance"], &["kyc"], "C. Morales"),
    (&["rrhh"], &[], "P. Ruiz"),
    (&["infra"], &["vpn"], "D. Quispe"),
    (&[], &["web", "portal"], "A. Valdez"),
    (&[], &["api"], "R. Torres"),
];

/// Datos del riesgo que alimentan la asignación.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentInput<'a> {
    pub asset: &'a str,
    pub asset_owner: &'a str,
    pub data_type: &'a str,
    pub criticality: Criticality,
}

/// Asignador con modo fijo y fuente aleatoria propia.
pub struct ResponsibleMatcher {
    mode: OwnerMode,
    rng: Mutex<StdRng>,
}

impl ResponsibleMatcher {
    pub fn new(mode: OwnerMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { mode, rng: Mutex::new(rng) }
    }

    pub fn assign(&self, input: AssignmentInput<'_>, roster: &[Personnel]) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        assign_responsible(input, roster, self.mode, &mut *rng)
    }
}

pub fn assign_responsible<R: Rng + ?Sized>(
    input: AssignmentInput<'_>,
    roster: &[Personnel],
    mode: OwnerMode,
    rng: &mut R,
) -> String {
    let owner = input.asset_owner.trim();
    if mode == OwnerMode::Propagate && !owner.is_empty() {
        return owner.to_string();
    }

    if roster.is_empty() {
        return keyword_fallback(input.asset, input.asset_owner, rng);
    }

    best_candidate(input, roster)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| DEFAULT_RESPONSIBLE.to_string())
}

/// Candidato con la puntuación estrictamente más alta; los empates conservan
/// el primero visto. `None` si nadie supera cero.
pub fn best_candidate<'r>(input: AssignmentInput<'_>, roster: &'r [Personnel]) -> Option<&'r Personnel> {
    let mut best: Option<(&Personnel, u32)> = None;
    for person in roster {
        let score = candidate_score(input, person);
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((person, score));
        }
    }
    best.map(|(p, _)| p)
}

pub fn candidate_score(input: AssignmentInput<'_>, person: &Personnel) -> u32 {
    let role = person.role.to_lowercase();
    let area = person.area.trim().to_lowercase();
    let asset = input.asset.to_lowercase();
    let owner = input.asset_owner.to_lowercase();
    let asset_has = |words: &[&str]| words.iter().any(|w| asset.contains(w));

    let mut score = if role.contains("dba") && asset_has(&["base", "datos"]) {
        10
    } else if role.contains("seguridad") && asset_has(&["seguridad", "vpn", "correo"]) {
        10
    } else if role.contains("devops") && asset_has(&["app", "ios", "web"]) {
        10
    } else if role.contains("compliance") && input.data_type == "Confidencial" {
        10
    } else if role.contains("rrhh") && asset.contains("rrhh") {
        10
    } else if role.contains("ti") && (owner.contains("ti") || asset.contains("infra")) {
        8
    } else {
        0
    };

    if !area.is_empty() && (owner.contains(&area) || asset.contains(&area)) {
        score += 5;
    }

    if matches!(input.criticality, Criticality::Alto | Criticality::Critico)
        && role.contains("seguridad")
    {
        score += 3;
    }

    score
}

fn keyword_fallback<R: Rng + ?Sized>(asset: &str, owner: &str, rng: &mut R) -> String {
    let asset = asset.to_lowercase();
    let owner = owner.to_lowercase();

    for (owner_words, asset_words, name) in KEYWORD_TABLE {
        if owner_words.iter().any(|w| owner.contains(w))
            || asset_words.iter().any(|w| asset.contains(w))
        {
            return name.to_string();
        }
    }

    DEFAULT_NAMES
        .choose(rng)
        .copied()
        .unwrap_or(DEFAULT_RESPONSIBLE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, role: &str, area: &str) -> Personnel {
        Personnel { name: name.into(), role: role.into(), area: area.into() }
    }

    fn input<'a>(asset: &'a str, owner: &'a str, data_type: &'a str, c: Criticality) -> AssignmentInput<'a> {
        AssignmentInput { asset, asset_owner: owner, data_type, criticality: c }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn empty_roster_uses_keyword_table() {
        let name = assign_responsible(
            input("Servidor base datos", "", "Confidencial", Criticality::Alto),
            &[],
            OwnerMode::Propagate,
            &mut rng(),
        );
        assert_eq!(name, "M. Gómez");

        let name = assign_responsible(
            input("Infraestructura VPN", "", "", Criticality::Medio),
            &[],
            OwnerMode::Propagate,
            &mut rng(),
        );
        assert_eq!(name, "D. Quispe");
    }

    #[test]
    fn declared_owner_wins_in_propagate_mode_only() {
        let roster = vec![person("Ana García", "DBA", "TI")];
        let i = input("Servidor base datos", "Finanzas", "", Criticality::Bajo);
        assert_eq!(assign_responsible(i, &roster, OwnerMode::Propagate, &mut rng()), "Finanzas");
        assert_eq!(assign_responsible(i, &roster, OwnerMode::Suggest, &mut rng()), "Ana García");
    }

    #[test]
    fn highest_score_wins_and_ties_keep_first() {
        let roster = vec![
            person("Carlos Rivas", "DevOps", "Operaciones"),
            person("Lucía Mendoza", "Seguridad", "Seguridad"),
            person("Diego López", "Seguridad", "Seguridad"),
        ];
        let i = input("Correo corporativo", "", "Integridad", Criticality::Alto);
        // 10 (rol) + 3 (criticidad) para ambos especialistas de seguridad.
        assert_eq!(candidate_score(i, &roster[1]), 13);
        assert_eq!(assign_responsible(i, &roster, OwnerMode::Suggest, &mut rng()), "Lucía Mendoza");
    }

    #[test]
    fn area_bonus_stacks_on_role_rule() {
        let p = person("Javier Morales", "Administrador TI", "infra");
        let i = input("Infraestructura red", "", "", Criticality::Medio);
        assert_eq!(candidate_score(i, &p), 8 + 5);
    }

    #[test]
    fn role_rules_are_a_chain() {
        // Coincide con dba y con seguridad; sólo cuenta la primera regla.
        let p = person("X", "DBA seguridad", "");
        let i = input("base de datos de seguridad", "", "", Criticality::Bajo);
        assert_eq!(candidate_score(i, &p), 10);
    }

    #[test]
    fn empty_area_never_matches() {
        let p = person("X", "Operaciones", "");
        assert_eq!(candidate_score(input("cualquier cosa", "alguien", "", Criticality::Bajo), &p), 0);
    }

    #[test]
    fn no_signal_defaults_to_seguridad() {
        let roster = vec![person("Elena Vargas", "Operaciones", "Logística")];
        let i = input("Impresora", "", "Integridad", Criticality::Bajo);
        assert_eq!(assign_responsible(i, &roster, OwnerMode::Suggest, &mut rng()), DEFAULT_RESPONSIBLE);
    }

    #[test]
    fn random_fallback_is_reproducible_with_a_seed() {
        let i = input("Impresora", "", "", Criticality::Bajo);
        let a = assign_responsible(i, &[], OwnerMode::Propagate, &mut StdRng::seed_from_u64(42));
        let b = assign_responsible(i, &[], OwnerMode::Propagate, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        assert!(DEFAULT_NAMES.contains(&a.as_str()));
    }

    #[test]
    fn matcher_serializes_access_to_its_rng() {
        let matcher = ResponsibleMatcher::new(OwnerMode::Suggest, Some(1));
        let other = ResponsibleMatcher::new(OwnerMode::Suggest, Some(1));
        let i = input("Impresora", "", "", Criticality::Bajo);
        for _ in 0..5 {
            assert_eq!(matcher.assign(i, &[]), other.assign(i, &[]));
        }
    }
}
