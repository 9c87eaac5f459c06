//! Report templates available for selection.

use crate::error::ReportError;
use std::path::{Path, PathBuf};

/// Known template identifiers and their display labels.
pub const TEMPLATES: [(&str, &str); 5] = [
    ("modelo_3575", "Modelo 3575 - Mato Grosso"),
    ("modelo_6122", "Modelo 6122 - Mato Grosso do Sul"),
    ("modelo_0908", "Modelo 0908 - São Paulo"),
    ("modelo_2056", "Modelo 2056 - Divinópolis"),
    ("modelo_2057", "Modelo 2057 - Varginha"),
];

/// Directory of `<id>.docx` template files.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    dir: PathBuf,
}

impl TemplateCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.docx"))
    }

    /// Path of the template file for `id`, or `MissingTemplate`.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, ReportError> {
        let path = self.path_for(id);
        if id.is_empty() || id.contains(['/', '\\']) || !path.is_file() {
            return Err(ReportError::MissingTemplate {
                id: id.to_string(),
                path,
            });
        }
        Ok(path)
    }

    /// Every known template with whether its file is present.
    pub fn available(&self) -> Vec<(&'static str, &'static str, bool)> {
        TEMPLATES
            .iter()
            .map(|(id, label)| (*id, *label, self.path_for(id).is_file()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_existing_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("modelo_3575.docx"), b"x").unwrap();
        let catalog = TemplateCatalog::new(dir.path());

        assert!(catalog.resolve("modelo_3575").is_ok());
        assert!(matches!(
            catalog.resolve("modelo_2057"),
            Err(ReportError::MissingTemplate { .. })
        ));
        assert!(catalog.resolve("../modelo_3575").is_err());

        let available = catalog.available();
        assert_eq!(available.len(), 5);
        assert!(available[0].2);
        assert!(!available[1].2);
    }
}
