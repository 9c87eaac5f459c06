//! Persisted placeholder configuration.
//!
//! A single JSON record describes every configurable field: its label,
//! whether it is taken from the form (`variable`) or fixed to a literal,
//! whether it is required, and which form section it belongs to.
//!
//! The store is opened once at start-up and passed by reference. Saves are
//! explicit. There is no locking: two processes saving at the same time can
//! overwrite each other, which is acceptable for rare administrative edits.

use crate::error::ReportError;
use crate::placeholders::FormData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/placeholders_config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Variable,
    Fixed,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Variable => "variable",
            FieldType::Fixed => "fixed",
        }
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "variable" => Ok(FieldType::Variable),
            "fixed" => Ok(FieldType::Fixed),
            other => Err(format!("unknown field type '{other}' (expected variable or fixed)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_section")]
    pub section: String,
}

fn default_section() -> String {
    "outros".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderConfig {
    pub placeholders: BTreeMap<String, PlaceholderEntry>,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default)]
    pub updated_at: String,
}

/// A form section with its fields, for building an input form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionGroup {
    pub name: String,
    pub placeholders: BTreeMap<String, PlaceholderEntry>,
}

fn entry(label: &str, field_type: FieldType, value: &str, section: &str) -> PlaceholderEntry {
    PlaceholderEntry {
        label: label.to_string(),
        field_type,
        value: value.to_string(),
        required: true,
        section: section.to_string(),
    }
}

/// Built-in configuration used for new stores and to back-fill old ones.
pub fn default_config() -> PlaceholderConfig {
    use FieldType::{Fixed, Variable};

    let fields = [
        ("numero_contrato", entry("Número do Contrato", Variable, "", "projeto")),
        ("ordem_servico", entry("Ordem de Serviço", Variable, "", "projeto")),
        ("data_elaboracao", entry("Data de Elaboração", Variable, "", "projeto")),
        ("data_atendimento", entry("Data de Atendimento", Variable, "", "projeto")),
        ("prefixo_agencia", entry("Prefixo da Agência", Variable, "", "dependencia")),
        ("nome_dependencia", entry("Nome da Dependência", Variable, "", "dependencia")),
        ("endereco_completo", entry("Endereço Completo", Variable, "", "dependencia")),
        ("uf", entry("UF", Variable, "", "dependencia")),
        ("tipo_atendimento", entry("Tipo de Atendimento", Variable, "", "dependencia")),
        (
            "responsavel_dependencia",
            entry("Responsável da Dependência", Variable, "", "responsaveis"),
        ),
        (
            "responsavel_tecnico",
            entry("Responsável Técnico", Variable, "", "responsaveis"),
        ),
        (
            "elaborado_por",
            entry("Elaborado por", Fixed, "Ygor Augusto Fernandes", "empresa"),
        ),
        (
            "empresa",
            entry(
                "Empresa",
                Fixed,
                "MAFFENG - Engenharia e Manutenção Profissional",
                "empresa",
            ),
        ),
    ];

    let sections = [
        ("projeto", "Informações do Projeto"),
        ("dependencia", "Informações da Dependência"),
        ("responsaveis", "Responsáveis"),
        ("empresa", "Informações da Empresa"),
    ];

    PlaceholderConfig {
        placeholders: fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        sections: sections
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        updated_at: chrono::Local::now().to_rfc3339(),
    }
}

/// Back-fill fields that exist in the defaults but not in `config`. Stored
/// entries always win; section names are refreshed from the defaults.
pub fn merge_with_defaults(config: &mut PlaceholderConfig, defaults: &PlaceholderConfig) -> usize {
    let mut added = 0;
    for (key, value) in &defaults.placeholders {
        if !config.placeholders.contains_key(key) {
            config.placeholders.insert(key.clone(), value.clone());
            added += 1;
        }
    }
    config.sections = defaults.sections.clone();
    added
}

// ─── Store ──────────────────────────────────────────────────────────────────

pub struct PlaceholderStore {
    path: PathBuf,
    config: PlaceholderConfig,
}

impl PlaceholderStore {
    /// Load the store at `path`, creating it from defaults when missing.
    ///
    /// A file that cannot be read or parsed is logged and replaced in memory
    /// by the defaults; it is not overwritten until the next explicit save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let defaults = default_config();
        if !path.exists() {
            let mut store = Self {
                path,
                config: defaults,
            };
            store.save()?;
            log::info!("Created placeholder configuration at {}", store.path.display());
            return Ok(store);
        }

        let config = match load_config(&path) {
            Ok(mut config) => {
                let added = merge_with_defaults(&mut config, &defaults);
                if added > 0 {
                    log::info!("Back-filled {} placeholder fields from defaults", added);
                }
                config
            }
            Err(e) => {
                log::warn!(
                    "Could not load placeholder configuration {}: {}; using defaults",
                    path.display(),
                    e
                );
                defaults
            }
        };
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &PlaceholderConfig {
        &self.config
    }

    /// Write the configuration, stamping `updated_at`.
    pub fn save(&mut self) -> Result<(), ReportError> {
        self.config.updated_at = chrono::Local::now().to_rfc3339();
        let json = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.path, json).map_err(|e| {
            ReportError::Config(format!("cannot write {}: {e}", self.path.display()))
        })
    }

    pub fn placeholder(&self, key: &str) -> Option<&PlaceholderEntry> {
        self.config.placeholders.get(key)
    }

    /// Change a field's binding, value and label, then save. `None` keeps
    /// the stored setting. Returns `Ok(false)` when the key is unknown.
    pub fn update_placeholder(
        &mut self,
        key: &str,
        field_type: Option<FieldType>,
        value: Option<&str>,
        label: Option<&str>,
    ) -> Result<bool, ReportError> {
        let Some(entry) = self.config.placeholders.get_mut(key) else {
            return Ok(false);
        };
        if let Some(field_type) = field_type {
            entry.field_type = field_type;
        }
        if let Some(value) = value {
            entry.value = value.to_string();
        }
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            entry.label = label.to_string();
        }
        self.save()?;
        Ok(true)
    }

    pub fn variable_fields(&self) -> BTreeMap<&str, &PlaceholderEntry> {
        self.fields_of(FieldType::Variable)
    }

    pub fn fixed_fields(&self) -> BTreeMap<&str, &PlaceholderEntry> {
        self.fields_of(FieldType::Fixed)
    }

    fn fields_of(&self, field_type: FieldType) -> BTreeMap<&str, &PlaceholderEntry> {
        self.config
            .placeholders
            .iter()
            .filter(|(_, e)| e.field_type == field_type)
            .map(|(k, e)| (k.as_str(), e))
            .collect()
    }

    /// Fields grouped by section. Sections without a configured name are
    /// titled from their key.
    pub fn grouped_by_section(&self) -> BTreeMap<String, SectionGroup> {
        let mut groups: BTreeMap<String, SectionGroup> = self
            .config
            .sections
            .iter()
            .map(|(k, name)| {
                (
                    k.clone(),
                    SectionGroup {
                        name: name.clone(),
                        placeholders: BTreeMap::new(),
                    },
                )
            })
            .collect();

        for (key, entry) in &self.config.placeholders {
            groups
                .entry(entry.section.clone())
                .or_insert_with(|| SectionGroup {
                    name: title_case(&entry.section),
                    placeholders: BTreeMap::new(),
                })
                .placeholders
                .insert(key.clone(), entry.clone());
        }
        groups
    }

    /// Every field grouped by section, one line each: key, label, type,
    /// required flag and configured value.
    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        for group in self.grouped_by_section().values() {
            out.push('\n');
            out.push_str(&group.name);
            out.push('\n');
            for (key, entry) in &group.placeholders {
                let required = if entry.required { "required" } else { "optional" };
                out.push_str(&format!(
                    "  {:<26} {:<36} {:<8} {:<8} {}\n",
                    key,
                    entry.label,
                    entry.field_type.as_str(),
                    required,
                    entry.value
                ));
            }
        }
        if !self.config.updated_at.is_empty() {
            out.push_str(&format!("\nLast updated: {}\n", self.config.updated_at));
        }
        out
    }

    /// Form data with every fixed field's configured value filled in.
    pub fn form_data_with_defaults(&self, form: &FormData) -> FormData {
        let mut result = form.clone();
        for (key, entry) in self.fixed_fields() {
            result.insert(key, &entry.value);
        }
        result
    }
}

fn load_config(path: &Path) -> Result<PlaceholderConfig, ReportError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("placeholders_config.json");
        let store = PlaceholderStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.config().placeholders.len(), 13);
        assert_eq!(store.fixed_fields().len(), 2);
        assert_eq!(store.variable_fields().len(), 11);
    }

    #[test]
    fn test_save_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholders_config.json");
        let mut store = PlaceholderStore::open(&path).unwrap();
        assert!(store
            .update_placeholder("uf", Some(FieldType::Fixed), Some("MT"), Some("Estado"))
            .unwrap());
        assert!(!store
            .update_placeholder("nao_existe", Some(FieldType::Fixed), Some("x"), None)
            .unwrap());

        let reloaded = PlaceholderStore::open(&path).unwrap();
        for (key, entry) in &store.config().placeholders {
            let other = reloaded.placeholder(key).unwrap();
            assert_eq!(other.field_type, entry.field_type);
            assert_eq!(other.value, entry.value);
            assert_eq!(other.label, entry.label);
        }
        let uf = reloaded.placeholder("uf").unwrap();
        assert_eq!(uf.field_type, FieldType::Fixed);
        assert_eq!(uf.value, "MT");
        assert_eq!(uf.label, "Estado");
    }

    #[test]
    fn test_update_keeps_settings_not_given() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholders_config.json");
        let mut store = PlaceholderStore::open(&path).unwrap();
        let before = store.placeholder("empresa").unwrap().clone();
        assert_eq!(before.field_type, FieldType::Fixed);

        assert!(store
            .update_placeholder("empresa", None, Some("ACME Engenharia"), None)
            .unwrap());
        let after = store.placeholder("empresa").unwrap();
        assert_eq!(after.field_type, FieldType::Fixed);
        assert_eq!(after.value, "ACME Engenharia");
        assert_eq!(after.label, before.label);

        assert!(store
            .update_placeholder("empresa", None, None, Some("Razão social"))
            .unwrap());
        let reloaded = PlaceholderStore::open(&path).unwrap();
        let entry = reloaded.placeholder("empresa").unwrap();
        assert_eq!(entry.field_type, FieldType::Fixed);
        assert_eq!(entry.value, "ACME Engenharia");
        assert_eq!(entry.label, "Razão social");
    }

    #[test]
    fn test_missing_fields_are_back_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholders_config.json");
        fs::write(
            &path,
            r#"{
  "placeholders": {
    "empresa": {"label": "Empresa X", "type": "fixed", "value": "ACME", "required": true, "section": "empresa"}
  },
  "sections": {},
  "updated_at": "2024-01-01T00:00:00"
}"#,
        )
        .unwrap();

        let store = PlaceholderStore::open(&path).unwrap();
        // stored entry wins
        assert_eq!(store.placeholder("empresa").unwrap().value, "ACME");
        // absent entry comes from defaults
        let contrato = store.placeholder("numero_contrato").unwrap();
        assert_eq!(contrato.field_type, FieldType::Variable);
        assert_eq!(contrato.label, "Número do Contrato");
        assert_eq!(store.config().sections.len(), 4);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholders_config.json");
        fs::write(&path, "{ not json").unwrap();
        let store = PlaceholderStore::open(&path).unwrap();
        assert_eq!(store.config().placeholders.len(), 13);
    }

    #[test]
    fn test_grouping_and_form_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PlaceholderStore::open(dir.path().join("c.json")).unwrap();
        store.config.placeholders.insert(
            "observacao".to_string(),
            PlaceholderEntry {
                label: "Observação".to_string(),
                field_type: FieldType::Variable,
                value: String::new(),
                required: false,
                section: "extras".to_string(),
            },
        );

        let groups = store.grouped_by_section();
        assert_eq!(groups["responsaveis"].placeholders.len(), 2);
        assert_eq!(groups["extras"].name, "Extras");

        let form = FormData::new().with("empresa", "ignored");
        let merged = store.form_data_with_defaults(&form);
        assert_eq!(
            merged.get("empresa"),
            Some("MAFFENG - Engenharia e Manutenção Profissional")
        );
        assert_eq!(merged.get("elaborado_por"), Some("Ygor Augusto Fernandes"));
    }

    #[test]
    fn test_listing_groups_fields_by_section() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaceholderStore::open(dir.path().join("placeholders_config.json")).unwrap();
        let listing = store.render_listing();

        let company = listing.find("Informações da Empresa").unwrap();
        let line = listing
            .lines()
            .find(|l| l.trim_start().starts_with("empresa "))
            .unwrap();
        assert!(line.contains("fixed"));
        assert!(line.contains("MAFFENG - Engenharia e Manutenção Profissional"));
        assert!(listing.find(line).unwrap() > company);
        for key in store.config().placeholders.keys() {
            assert!(listing.lines().any(|l| l.trim_start().starts_with(&format!("{key} "))));
        }
        assert!(listing.contains("Last updated: "));
    }

    #[test]
    fn test_field_type_from_str() {
        assert_eq!("Fixed".parse::<FieldType>().unwrap(), FieldType::Fixed);
        assert_eq!("variable".parse::<FieldType>().unwrap(), FieldType::Variable);
        assert!("other".parse::<FieldType>().is_err());
    }
}
