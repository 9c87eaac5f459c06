//! Pipeline functions for programmatic use by the CLI.
//!
//! Each operation takes a request plus configuration and returns structured
//! data instead of printing, so the same flow can be driven from tests.

use crate::archive::{discard_scratch, walk_archive, WalkOptions};
use crate::catalog::TemplateCatalog;
use crate::config_store::PlaceholderStore;
use crate::content::{build_preview, decode_form_order, normalize, ContentItem, PreviewFolder};
use crate::error::{FieldError, ReportError};
use crate::injector::{inject, InjectOptions, ItemWarning};
use crate::placeholders::{
    resolve, validate_form, FormData, PROJECT_FIELD, REPORT_TYPE, TEMPLATE_FIELD,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Form field that names the uploaded archive in validation errors.
pub const ARCHIVE_FIELD: &str = "arquivo_zip";

// ============================================================================
// Configuration & results
// ============================================================================

/// Where templates come from and where reports go.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Template catalog (`<dir>/<id>.docx`)
    pub catalog: TemplateCatalog,
    /// Directory the finished report is written to
    pub output_dir: PathBuf,
    /// Archive traversal options
    pub walk: WalkOptions,
    /// Template injection options
    pub inject: InjectOptions,
}

impl PipelineConfig {
    pub fn new(templates_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: TemplateCatalog::new(templates_dir),
            output_dir: output_dir.into(),
            walk: WalkOptions::default(),
            inject: InjectOptions::default(),
        }
    }
}

/// One report generation request.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    /// ZIP archive of categorized photos
    pub archive: PathBuf,
    /// Template identifier; the form's `modelo` field takes precedence
    pub template_id: String,
    /// Flat key/value form data
    pub form: FormData,
    /// Reordered content in the parallel `item_*_{i}` encoding, as produced
    /// from an edited preview. When set, the archive is not walked again.
    pub order: Option<HashMap<String, String>>,
}

impl ReportRequest {
    /// Request whose template is taken from the form's `modelo` field.
    pub fn new(archive: impl Into<PathBuf>, form: FormData) -> Self {
        let template_id = form.get(TEMPLATE_FIELD).unwrap_or_default().to_string();
        Self {
            archive: archive.into(),
            template_id,
            form,
            order: None,
        }
    }

    pub fn with_order(mut self, order: HashMap<String, String>) -> Self {
        self.order = Some(order);
        self
    }
}

/// Outcome of a successful generation.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub output_path: PathBuf,
    /// Images actually inserted (skipped ones excluded)
    pub image_count: usize,
    pub warnings: Vec<ItemWarning>,
}

// ============================================================================
// Naming & validation
// ============================================================================

/// Replace characters that are not allowed in file names.
fn safe_file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
            {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// `RELATÓRIO FOTOGRÁFICO - <project> - LEVANTAMENTO PREVENTIVO.docx`
pub fn output_file_name(project: &str) -> String {
    format!(
        "RELATÓRIO FOTOGRÁFICO - {} - {}.docx",
        safe_file_component(project).trim(),
        REPORT_TYPE
    )
}

fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn archive_errors(archive: &Path) -> Vec<FieldError> {
    if !has_zip_extension(archive) {
        vec![FieldError::new(ARCHIVE_FIELD, "only ZIP files are accepted")]
    } else if !archive.is_file() {
        vec![FieldError::new(
            ARCHIVE_FIELD,
            format!("archive not found: {}", archive.display()),
        )]
    } else {
        Vec::new()
    }
}

// ============================================================================
// Preview
// ============================================================================

/// Walk an archive and group its content for a reorder step.
///
/// The scratch copies referenced by the preview are kept: they are consumed
/// by the generation that follows, or released with [`discard_preview`].
pub fn prepare_preview(
    archive: &Path,
    form: &FormData,
    config: &PipelineConfig,
) -> Result<Vec<PreviewFolder>, ReportError> {
    let errors = archive_errors(archive);
    if !errors.is_empty() {
        return Err(ReportError::Validation(errors));
    }
    let items = normalize(walk_archive(archive, form, &config.walk)?);
    let preview = build_preview(&items);
    log::info!(
        "Preview ready: {} folders, {} images",
        preview.len(),
        crate::content::image_count(&items)
    );
    Ok(preview)
}

/// Delete the scratch copies behind a preview that will not be generated.
pub fn discard_preview(preview: &[PreviewFolder]) -> usize {
    let items: Vec<ContentItem> = preview
        .iter()
        .flat_map(|folder| folder.images.iter())
        .map(|image| ContentItem::image(image.path.clone()))
        .collect();
    discard_scratch(&items)
}

// ============================================================================
// Generate
// ============================================================================

/// Run one request end to end.
///
/// Validation and template lookup happen before any archive work. Scratch
/// copies still on disk after injection are removed whether or not
/// injection succeeded.
pub fn generate_report(
    request: &ReportRequest,
    config: &PipelineConfig,
    store: &PlaceholderStore,
) -> Result<GeneratedReport, ReportError> {
    let mut form = store.form_data_with_defaults(&request.form);
    if form.get(TEMPLATE_FIELD).is_none() && !request.template_id.trim().is_empty() {
        form.insert(TEMPLATE_FIELD, &request.template_id);
    }

    let mut errors = validate_form(&form, store.config());
    if request.order.is_none() {
        errors.extend(archive_errors(&request.archive));
    }
    if !errors.is_empty() {
        log::warn!("Request rejected with {} validation errors", errors.len());
        return Err(ReportError::Validation(errors));
    }

    let template_id = form
        .get(TEMPLATE_FIELD)
        .unwrap_or(request.template_id.as_str());
    let template = config.catalog.resolve(template_id)?;

    let raw = match &request.order {
        Some(fields) => decode_form_order(fields)?,
        None => walk_archive(&request.archive, &form, &config.walk)?,
    };
    let items = normalize(raw);

    let resolved = match resolve(&form, store.config()) {
        Ok(r) => r,
        Err(e) => {
            discard_scratch(&items);
            return Err(e);
        }
    };

    let project = form.get(PROJECT_FIELD).unwrap_or_default();
    let output_path = config.output_dir.join(output_file_name(project));
    let injected = inject(&template, &output_path, &items, &resolved, &config.inject);

    let leftover = discard_scratch(&items);
    if leftover > 0 {
        log::debug!("Removed {leftover} leftover scratch images");
    }
    let report = injected?;

    log::info!(
        "Report generated: {} ({} images inserted)",
        output_path.display(),
        report.images_inserted
    );
    Ok(GeneratedReport {
        output_path,
        image_count: report.images_inserted,
        warnings: report.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> PlaceholderStore {
        PlaceholderStore::open(dir.join("config").join("placeholders_config.json")).unwrap()
    }

    #[test]
    fn test_output_file_name_sanitized() {
        assert_eq!(
            output_file_name("Agência Centro"),
            "RELATÓRIO FOTOGRÁFICO - Agência Centro - LEVANTAMENTO PREVENTIVO.docx"
        );
        assert_eq!(
            output_file_name("a/b:c*?\t"),
            "RELATÓRIO FOTOGRÁFICO - a_b_c___ - LEVANTAMENTO PREVENTIVO.docx"
        );
        // control characters become `_` before surrounding spaces are trimmed
        assert_eq!(
            output_file_name("  Agência\tNorte  "),
            "RELATÓRIO FOTOGRÁFICO - Agência_Norte - LEVANTAMENTO PREVENTIVO.docx"
        );
    }

    #[test]
    fn test_validation_collects_all_errors_before_template_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let config = PipelineConfig::new(dir.path().join("models"), dir.path().join("output"));
        let request = ReportRequest::new(dir.path().join("fotos.rar"), FormData::new());

        let err = generate_report(&request, &config, &store).unwrap_err();
        let ReportError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&PROJECT_FIELD));
        assert!(fields.contains(&TEMPLATE_FIELD));
        assert!(fields.contains(&"numero_contrato"));
        assert!(fields.contains(&ARCHIVE_FIELD));
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_missing_template_aborts_before_walk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let config = PipelineConfig::new(dir.path().join("models"), dir.path().join("output"));
        // not a real archive: reaching the walker would fail differently
        let archive = dir.path().join("fotos.zip");
        std::fs::write(&archive, b"not a zip").unwrap();

        let mut form = FormData::new()
            .with(PROJECT_FIELD, "Teste")
            .with(TEMPLATE_FIELD, "modelo_0908");
        for key in store.variable_fields().keys() {
            if form.get(key).is_none() {
                form.insert(key, "x");
            }
        }
        form.insert("uf", "SP");

        let err = generate_report(&ReportRequest::new(&archive, form), &config, &store).unwrap_err();
        assert!(matches!(err, ReportError::MissingTemplate { ref id, .. } if id == "modelo_0908"));
    }

    #[test]
    fn test_request_template_id_fills_form() {
        let request = ReportRequest::new("a.zip", FormData::new().with(TEMPLATE_FIELD, "modelo_2056"));
        assert_eq!(request.template_id, "modelo_2056");
        assert!(request.order.is_none());
    }
}
