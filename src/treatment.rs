//! Tabla de decisión de tratamientos. Primera regla que coincide gana.

use crate::models::{Criticality, Treatment};

const THIRD_PARTY_MARKERS: [&str; 5] = ["third", "3rd", "externo", "api", "integracion"];
const PHISHING_MARKERS: [&str; 2] = ["phishing", "spear"];
const NETWORK_MARKERS: [&str; 2] = ["vpn", "red"];

pub fn suggest_treatment(
    criticality: Criticality,
    data_type: &str,
    asset: &str,
    risk_details: &str,
) -> Treatment {
    let asset = asset.to_lowercase();
    let details = risk_details.to_lowercase();

    match criticality {
        Criticality::Critico => Treatment::Tratar,
        Criticality::Alto if mentions_any(&asset, &THIRD_PARTY_MARKERS) => Treatment::Transferir,
        Criticality::Alto if mentions_any(&details, &PHISHING_MARKERS) => Treatment::Evitar,
        Criticality::Alto => Treatment::Tratar,
        Criticality::Medio
            if data_type.to_lowercase().contains("disponibilidad")
                || mentions_any(&asset, &NETWORK_MARKERS) =>
        {
            Treatment::Evitar
        }
        Criticality::Medio => Treatment::Tratar,
        Criticality::Bajo => Treatment::Aceptar,
    }
}

pub(crate) fn mentions_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_api_asset_is_transferred() {
        assert_eq!(
            suggest_treatment(Criticality::Alto, "Confidencial", "API interna pagos", ""),
            Treatment::Transferir
        );
    }

    #[test]
    fn third_party_wins_over_phishing() {
        assert_eq!(
            suggest_treatment(Criticality::Alto, "", "Integración 3rd-party KYC", "spear phishing"),
            Treatment::Transferir
        );
        assert_eq!(
            suggest_treatment(Criticality::Alto, "", "Correo corporativo", "Campaña de PHISHING"),
            Treatment::Evitar
        );
        assert_eq!(
            suggest_treatment(Criticality::Alto, "", "Servidor de logs", "borrado"),
            Treatment::Tratar
        );
    }

    #[test]
    fn medium_availability_or_network_is_avoided() {
        assert_eq!(
            suggest_treatment(Criticality::Medio, "Disponibilidad", "Portal", ""),
            Treatment::Evitar
        );
        assert_eq!(
            suggest_treatment(Criticality::Medio, "Integridad", "Infraestructura VPN", ""),
            Treatment::Evitar
        );
        assert_eq!(
            suggest_treatment(Criticality::Medio, "Integridad", "Portal de RRHH", ""),
            Treatment::Tratar
        );
    }

    #[test]
    fn critical_and_low_ignore_text() {
        assert_eq!(
            suggest_treatment(Criticality::Critico, "Disponibilidad", "api vpn", "phishing"),
            Treatment::Tratar
        );
        assert_eq!(
            suggest_treatment(Criticality::Bajo, "Disponibilidad", "api vpn", "phishing"),
            Treatment::Aceptar
        );
    }

    #[test]
    fn advisor_is_total() {
        let texts = ["", "api", "vpn", "phishing", "red externa", "Otro"];
        for c in Criticality::ALL {
            for asset in texts {
                for details in texts {
                    for data_type in ["Confidencial", "Integridad", "Disponibilidad", ""] {
                        let t = suggest_treatment(c, data_type, asset, details);
                        assert!(Treatment::parse(t.as_str()).is_some());
                    }
                }
            }
        }
    }
}
