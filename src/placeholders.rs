//! Placeholder resolution: template tokens → values and font profiles.
//!
//! Each `{{token}}` in a template is bound to a configured field. The field's
//! configuration decides whether the value comes from the submitted form
//! (`variable`) or from a configured literal (`fixed`). The font profile of a
//! substituted token depends only on the token itself.

use crate::config_store::{FieldType, PlaceholderConfig};
use crate::error::{FieldError, ReportError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Anchor marking the single insertion point of generated content.
pub const ANCHOR_TOKEN: &str = "{{start_here}}";

/// Report type shown in output names and used as the default service type.
pub const REPORT_TYPE: &str = "LEVANTAMENTO PREVENTIVO";

/// Form fields required on every request regardless of configuration.
pub const PROJECT_FIELD: &str = "nome_projeto";
pub const TEMPLATE_FIELD: &str = "modelo";

const DATE_FIELDS: [&str; 2] = ["data_elaboracao", "data_atendimento"];

/// Template token → configured field key.
pub const TOKEN_FIELDS: [(&str, &str); 13] = [
    ("{{prefixo_sb}}", "prefixo_agencia"),
    ("{{nome_ag}}", "nome_dependencia"),
    ("{{uf}}", "uf"),
    ("{{numero_contrato}}", "numero_contrato"),
    ("{{ordem_servico}}", "ordem_servico"),
    ("{{data_elaboracao}}", "data_elaboracao"),
    ("{{tipo_atendimento}}", "tipo_atendimento"),
    ("{{data_atendimento}}", "data_atendimento"),
    ("{{endereco_dependencia}}", "endereco_completo"),
    ("{{responsavel_dependencia}}", "responsavel_dependencia"),
    ("{{responsavel_tecnico}}", "responsavel_tecnico"),
    ("{{elaborado_por}}", "elaborado_por"),
    ("{{empresa}}", "empresa"),
];

pub const BRAZILIAN_STATES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

// ─── Form data ──────────────────────────────────────────────────────────────

/// Flat key/value form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormData(pub BTreeMap<String, String>);

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    /// Trimmed value, `None` when absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Parse `key=value` pairs as given on a command line.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, ReportError> {
        let mut form = FormData::new();
        let mut errors = Vec::new();
        for pair in pairs {
            match pair.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => form.insert(k.trim(), v),
                _ => errors.push(FieldError::new(pair, "expected key=value")),
            }
        }
        if errors.is_empty() {
            Ok(form)
        } else {
            Err(ReportError::Validation(errors))
        }
    }
}

// ─── Specs and styles ───────────────────────────────────────────────────────

/// Where a token's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Variable { field: String },
    Fixed { value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleClass {
    Arial,
    Calibri,
    Default,
}

/// Font family and size applied to a substituted run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontProfile {
    pub family: &'static str,
    pub size_pt: f32,
}

const ARIAL_TOKENS: [&str; 3] = [
    "{{endereco_dependencia}}",
    "{{responsavel_dependencia}}",
    "{{responsavel_tecnico}}",
];

const CALIBRI_TOKENS: [&str; 7] = [
    "{{ordem_servico}}",
    "{{data_elaboracao}}",
    "{{data_atendimento}}",
    "{{tipo_atendimento}}",
    "{{prefixo_sb}}",
    "{{nome_ag}}",
    "{{uf}}",
];

impl StyleClass {
    pub fn for_token(token: &str) -> Self {
        if ARIAL_TOKENS.contains(&token) {
            StyleClass::Arial
        } else if CALIBRI_TOKENS.contains(&token) {
            StyleClass::Calibri
        } else {
            StyleClass::Default
        }
    }

    pub fn profile(self) -> FontProfile {
        match self {
            StyleClass::Arial => FontProfile {
                family: "Arial",
                size_pt: 11.0,
            },
            StyleClass::Calibri | StyleClass::Default => FontProfile {
                family: "Calibri",
                size_pt: 11.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderSpec {
    pub token: String,
    pub binding: Binding,
    pub style: StyleClass,
    pub required: bool,
}

/// Build one spec per known token from the current configuration. Tokens
/// whose field is not configured bind to the form field of the same key.
pub fn specs_from_config(config: &PlaceholderConfig) -> Vec<PlaceholderSpec> {
    TOKEN_FIELDS
        .iter()
        .map(|(token, field)| {
            let entry = config.placeholders.get(*field);
            let binding = match entry {
                Some(e) if e.field_type == FieldType::Fixed => Binding::Fixed {
                    value: e.value.clone(),
                },
                _ => Binding::Variable {
                    field: field.to_string(),
                },
            };
            PlaceholderSpec {
                token: token.to_string(),
                binding,
                style: StyleClass::for_token(token),
                required: entry.map(|e| e.required).unwrap_or(false),
            }
        })
        .collect()
}

// ─── Resolution ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: String,
    pub style: StyleClass,
}

/// Token → resolved value. Tokens absent here stay untouched in the output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPlaceholders {
    values: HashMap<String, ResolvedValue>,
}

impl ResolvedPlaceholders {
    pub fn insert(&mut self, token: &str, value: impl Into<String>) {
        self.values.insert(
            token.to_string(),
            ResolvedValue {
                value: value.into(),
                style: StyleClass::for_token(token),
            },
        );
    }

    pub fn get(&self, token: &str) -> Option<&ResolvedValue> {
        self.values.get(token)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Tokens sorted longest first so overlapping names never shadow
    /// each other during substitution.
    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.values.keys().map(|k| k.as_str()).collect();
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        tokens
    }
}

/// `YYYY-MM-DD` becomes `DD/MM/YYYY`; anything else is passed through.
pub fn format_date(value: &str) -> String {
    match chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        Ok(date) => date.format("%d/%m/%Y").to_string(),
        Err(_) => value.to_string(),
    }
}

fn form_value(form: &FormData, field: &str) -> Option<String> {
    let raw = match form.get(field) {
        Some(v) => v.to_string(),
        None if field == "tipo_atendimento" => REPORT_TYPE.to_string(),
        None => return None,
    };
    if DATE_FIELDS.contains(&field) {
        Some(format_date(&raw))
    } else {
        Some(raw)
    }
}

/// Check the request-level fields every report needs.
pub fn validate_form(form: &FormData, config: &PlaceholderConfig) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for field in [PROJECT_FIELD, TEMPLATE_FIELD] {
        if form.get(field).is_none() {
            errors.push(FieldError::new(field, "required field is missing"));
        }
    }
    if let Some(uf) = form.get("uf") {
        if !BRAZILIAN_STATES.contains(&uf.to_uppercase().as_str()) {
            errors.push(FieldError::new("uf", format!("unknown state code '{uf}'")));
        }
    }
    for (key, entry) in &config.placeholders {
        if entry.field_type == FieldType::Variable
            && entry.required
            && form_value(form, key).is_none()
        {
            errors.push(FieldError::new(
                key.as_str(),
                format!("{} is required", entry.label),
            ));
        }
    }
    errors
}

/// Resolve every known token. Missing required values are collected and
/// reported together; optional missing values are simply left unresolved.
pub fn resolve(form: &FormData, config: &PlaceholderConfig) -> Result<ResolvedPlaceholders, ReportError> {
    let mut resolved = ResolvedPlaceholders::default();
    let mut errors = Vec::new();

    for spec in specs_from_config(config) {
        let value = match &spec.binding {
            Binding::Variable { field } => form_value(form, field),
            Binding::Fixed { value } => Some(value.clone()),
        };
        match value {
            Some(v) => resolved.insert(&spec.token, v),
            None if spec.required => {
                let field = match &spec.binding {
                    Binding::Variable { field } => field.clone(),
                    Binding::Fixed { .. } => spec.token.clone(),
                };
                errors.push(FieldError::new(field, "required value is missing"));
            }
            None => log::debug!("Placeholder {} left unresolved", spec.token),
        }
    }

    if !errors.is_empty() {
        return Err(ReportError::Validation(errors));
    }
    log::info!("Resolved {} placeholders", resolved.len());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::default_config;

    fn full_form() -> FormData {
        FormData::new()
            .with("nome_projeto", "Agência Centro")
            .with("modelo", "modelo_3575")
            .with("numero_contrato", "123/2024")
            .with("ordem_servico", "OS-77")
            .with("data_elaboracao", "2024-03-05")
            .with("data_atendimento", "01/03/2024")
            .with("prefixo_agencia", "0908")
            .with("nome_dependencia", "Centro")
            .with("endereco_completo", "Rua A, 10")
            .with("uf", "SP")
            .with("responsavel_dependencia", "Maria")
            .with("responsavel_tecnico", "João")
    }

    #[test]
    fn test_style_is_a_function_of_the_token() {
        assert_eq!(StyleClass::for_token("{{responsavel_tecnico}}"), StyleClass::Arial);
        assert_eq!(StyleClass::for_token("{{uf}}"), StyleClass::Calibri);
        assert_eq!(StyleClass::for_token("{{empresa}}"), StyleClass::Default);
        for (token, _) in TOKEN_FIELDS {
            let first = StyleClass::for_token(token).profile();
            let second = StyleClass::for_token(token).profile();
            assert_eq!(first, second);
            assert_eq!(first.size_pt, 11.0);
        }
        assert_eq!(StyleClass::Arial.profile().family, "Arial");
    }

    #[test]
    fn test_resolve_variable_and_fixed() {
        let config = default_config();
        let resolved = resolve(&full_form(), &config).unwrap();

        assert_eq!(resolved.get("{{nome_ag}}").unwrap().value, "Centro");
        assert_eq!(resolved.get("{{endereco_dependencia}}").unwrap().value, "Rua A, 10");
        assert_eq!(resolved.get("{{data_elaboracao}}").unwrap().value, "05/03/2024");
        assert_eq!(resolved.get("{{data_atendimento}}").unwrap().value, "01/03/2024");
        assert_eq!(resolved.get("{{tipo_atendimento}}").unwrap().value, REPORT_TYPE);
        assert_eq!(
            resolved.get("{{empresa}}").unwrap().value,
            "MAFFENG - Engenharia e Manutenção Profissional"
        );
        assert_eq!(resolved.len(), TOKEN_FIELDS.len());
    }

    #[test]
    fn test_missing_required_fields_are_collected() {
        let config = default_config();
        let mut form = full_form();
        form.0.remove("ordem_servico");
        form.0.remove("uf");

        match resolve(&form, &config) {
            Err(ReportError::Validation(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields.len(), 2);
                assert!(fields.contains(&"ordem_servico"));
                assert!(fields.contains(&"uf"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_field_stays_unresolved() {
        let mut config = default_config();
        config.placeholders.get_mut("ordem_servico").unwrap().required = false;
        let mut form = full_form();
        form.0.remove("ordem_servico");

        let resolved = resolve(&form, &config).unwrap();
        assert!(resolved.get("{{ordem_servico}}").is_none());
    }

    #[test]
    fn test_validate_form_checks_request_fields() {
        let config = default_config();
        let form = full_form().with("uf", "XX");
        let mut form = form;
        form.0.remove("nome_projeto");

        let errors = validate_form(&form, &config);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"nome_projeto"));
        assert!(fields.contains(&"uf"));
        assert!(!fields.contains(&"modelo"));
    }

    #[test]
    fn test_from_pairs() {
        let form = FormData::from_pairs(["uf=MT", "nome_projeto=A=B"]).unwrap();
        assert_eq!(form.get("uf"), Some("MT"));
        assert_eq!(form.get("nome_projeto"), Some("A=B"));
        assert!(FormData::from_pairs(["novalue"]).is_err());
    }

    #[test]
    fn test_tokens_sorted_longest_first() {
        let mut resolved = ResolvedPlaceholders::default();
        resolved.insert("{{uf}}", "SP");
        resolved.insert("{{responsavel_tecnico}}", "João");
        assert_eq!(resolved.tokens()[0], "{{responsavel_tecnico}}");
    }
}
