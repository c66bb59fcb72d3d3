//! Enlace de cabeceras arbitrarias a los campos canónicos de una fila de
//! riesgo, y coerción de los valores.

use serde::Serialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::models::RawRow;
use crate::scoring::Rating;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Asset,
    AssetOwner,
    DataType,
    RiskDetails,
    Probability,
    Impact,
}

impl Field {
    /// Orden de enlace: un campo no puede reutilizar una cabecera ya tomada.
    pub const ALL: [Field; 6] = [
        Self::Asset,
        Self::AssetOwner,
        Self::DataType,
        Self::RiskDetails,
        Self::Probability,
        Self::Impact,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::AssetOwner => "asset_owner",
            Self::DataType => "data_type",
            Self::RiskDetails => "risk_details",
            Self::Probability => "probability",
            Self::Impact => "impact",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Self::Asset | Self::Probability | Self::Impact)
    }

    fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Self::Asset => &["activo de información", "activo", "informacion", "asset", "recurso"],
            Self::AssetOwner => &["propietario del activo", "propietario", "owner", "responsable", "dueno", "dueño"],
            Self::DataType => &["tipo de dato", "tipo", "data", "dato", "clasificacion"],
            Self::RiskDetails => &[
                "detalles del riesgo", "riesgo", "detalles", "details", "amenazas", "descripcion", "desc",
            ],
            Self::Probability => &[
                "calificación de probabilidad", "probabilidad", "probability", "prob", "calificacion_prob", "rating_prob",
            ],
            Self::Impact => &[
                "calificación de impacto", "impacto", "impact", "imp", "calificacion_imp", "rating_imp",
            ],
        }
    }
}

/// Minúsculas, sin comillas ni saltos de línea, espacios colapsados a `_`.
pub fn normalize_header(header: &str) -> String {
    header
        .replace(['\n', '\r'], " ")
        .replace('"', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Resultado del enlace de columnas.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnMapping {
    bindings: Vec<(Field, String)>,
}

impl ColumnMapping {
    /// Cabecera original enlazada a `field`.
    pub fn column(&self, field: Field) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, header)| header.as_str())
    }

    pub fn bindings(&self) -> &[(Field, String)] {
        &self.bindings
    }

    pub fn missing_required(&self) -> Vec<String> {
        Field::ALL
            .iter()
            .filter(|f| f.is_required() && self.column(**f).is_none())
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Falla si falta alguna columna requerida, enumerándolas.
    pub fn require_complete(&self) -> Result<(), ValidationError> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingColumns(missing))
        }
    }

    fn value<'r>(&self, row: &'r RawRow, field: Field) -> Option<&'r Value> {
        self.column(field).and_then(|c| row.get(c))
    }
}

/// Enlaza cada campo con la primera cabecera que contenga uno de sus sinónimos.
pub fn map_columns<'a>(headers: impl IntoIterator<Item = &'a str>) -> ColumnMapping {
    let headers: Vec<(&str, String)> = headers.into_iter().map(|h| (h, normalize_header(h))).collect();
    let mut mapping = ColumnMapping::default();

    for field in Field::ALL {
        let found = field.synonyms().iter().find_map(|synonym| {
            let pattern = normalize_header(synonym);
            headers.iter().find(|(original, normalized)| {
                normalized.contains(&pattern)
                    && !mapping.bindings.iter().any(|(_, bound)| bound == original)
            })
        });
        if let Some((original, _)) = found {
            mapping.bindings.push((field, original.to_string()));
        }
    }
    mapping
}

/// Cabeceras de un lote, en orden de primera aparición.
pub fn batch_headers(rows: &[RawRow]) -> Vec<&str> {
    let mut headers: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !headers.contains(&key.as_str()) {
                headers.push(key.as_str());
            }
        }
    }
    headers
}

/// Fila validada con los nombres canónicos.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub asset: String,
    pub asset_owner: String,
    pub data_type: String,
    pub risk_details: String,
    pub probability: Rating,
    pub impact: Rating,
}

/// Valida una fila y devuelve todos sus problemas a la vez.
pub fn parse_row(row: &RawRow, mapping: &ColumnMapping) -> Result<ParsedRow, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let asset = text_value(mapping.value(row, Field::Asset));
    if asset.is_empty() {
        errors.push(ValidationError::EmptyAsset);
    }
    let probability = rating_value(mapping.value(row, Field::Probability), "probability")
        .map_err(|e| errors.push(e))
        .ok();
    let impact = rating_value(mapping.value(row, Field::Impact), "impact")
        .map_err(|e| errors.push(e))
        .ok();

    match (probability, impact) {
        (Some(probability), Some(impact)) if errors.is_empty() => Ok(ParsedRow {
            asset,
            asset_owner: text_value(mapping.value(row, Field::AssetOwner)),
            data_type: text_value(mapping.value(row, Field::DataType)),
            risk_details: text_value(mapping.value(row, Field::RiskDetails)),
            probability,
            impact,
        }),
        _ => Err(errors),
    }
}

fn text_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn rating_value(value: Option<&Value>, field: &'static str) -> Result<Rating, ValidationError> {
    let not_integer = |raw: String| ValidationError::NotAnInteger { field, value: raw };

    let integer = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => return Err(ValidationError::MissingField(field)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => n
                .as_f64()
                .and_then(integral)
                .ok_or_else(|| not_integer(n.to_string()))?,
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => i,
                Err(_) => s
                    .parse::<f64>()
                    .ok()
                    .and_then(integral)
                    .ok_or_else(|| not_integer(s.to_string()))?,
            }
        }
        Some(other) => return Err(not_integer(other.to_string())),
    };

    Rating::new(field, integer)
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn spreadsheet_headers_are_bound() {
        let headers = [
            "ACTIVO DE INFORMACIÓN",
            "PROPIETARIO DEL ACTIVO",
            "TIPO DE DATO",
            "DETALLES DEL RIESGO",
            "CALIFICACIÓN DE PROBABILIDAD",
            "CALIFICACIÓN DE IMPACTO",
        ];
        let mapping = map_columns(headers);
        assert_eq!(mapping.column(Field::Asset), Some("ACTIVO DE INFORMACIÓN"));
        assert_eq!(mapping.column(Field::AssetOwner), Some("PROPIETARIO DEL ACTIVO"));
        assert_eq!(mapping.column(Field::DataType), Some("TIPO DE DATO"));
        assert_eq!(mapping.column(Field::RiskDetails), Some("DETALLES DEL RIESGO"));
        assert_eq!(mapping.column(Field::Probability), Some("CALIFICACIÓN DE PROBABILIDAD"));
        assert_eq!(mapping.column(Field::Impact), Some("CALIFICACIÓN DE IMPACTO"));
        assert!(mapping.missing_required().is_empty());
    }

    #[test]
    fn canonical_names_bind_to_themselves() {
        let mapping = map_columns(["asset", "asset_owner", "data_type", "risk_details", "probability", "impact"]);
        for field in Field::ALL {
            assert_eq!(mapping.column(field), Some(field.name()));
        }
    }

    #[test]
    fn missing_required_columns_are_listed() {
        let mapping = map_columns(["Activo", "Notas"]);
        assert_eq!(
            mapping.require_complete(),
            Err(ValidationError::MissingColumns(vec!["probability".into(), "impact".into()]))
        );
    }

    #[test]
    fn headers_are_normalized() {
        assert_eq!(normalize_header("  Calificación \n de  \"Impacto\" "), "calificación_de_impacto");
    }

    #[test]
    fn ratings_coerce_from_numbers_and_strings() {
        let mapping = map_columns(["asset", "probability", "impact"]);
        let parsed = parse_row(&row(json!({"asset": " Portal web ", "probability": "7", "impact": 9.0})), &mapping)
            .unwrap();
        assert_eq!(parsed.asset, "Portal web");
        assert_eq!(parsed.probability.get(), 7);
        assert_eq!(parsed.impact.get(), 9);
        assert_eq!(parsed.asset_owner, "");
    }

    #[test]
    fn every_problem_in_a_row_is_reported() {
        let mapping = map_columns(["asset", "probability", "impact"]);
        let errors = parse_row(&row(json!({"asset": "", "probability": 7.5, "impact": 12})), &mapping).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyAsset,
                ValidationError::NotAnInteger { field: "probability", value: "7.5".into() },
                ValidationError::RatingOutOfRange { field: "impact", value: 12 },
            ]
        );

        let errors = parse_row(&row(json!({"asset": "VPN", "probability": null, "impact": "alto"})), &mapping)
            .unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingField("probability"),
                ValidationError::NotAnInteger { field: "impact", value: "alto".into() },
            ]
        );
    }

    #[test]
    fn batch_headers_keep_sheet_order() {
        let rows = vec![row(json!({"b": 1, "a": 2})), row(json!({"c": 3, "a": 4}))];
        assert_eq!(batch_headers(&rows), vec!["b", "a", "c"]);
    }

    #[test]
    fn binding_follows_sheet_order_not_alphabetical() {
        let rows = vec![row(json!({
            "Activo": "Servidor base datos",
            "Riesgo": "Acceso no autorizado",
            "Probabilidad": 7,
            "Impacto": 9,
            "Nivel de riesgo": 63,
        }))];
        let headers = batch_headers(&rows);
        assert_eq!(headers, vec!["Activo", "Riesgo", "Probabilidad", "Impacto", "Nivel de riesgo"]);

        let mapping = map_columns(headers);
        assert_eq!(mapping.column(Field::RiskDetails), Some("Riesgo"));
        let parsed = parse_row(&rows[0], &mapping).unwrap();
        assert_eq!(parsed.risk_details, "Acceso no autorizado");
    }
}
