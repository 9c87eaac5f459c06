//! Error taxonomy for report generation.
//!
//! Structural and validation failures abort a request before any output is
//! written. Per-item content problems are not errors; the injector reports
//! them as [`crate::injector::ItemWarning`] values instead.

use std::fmt;
use std::path::PathBuf;

/// A single missing or invalid form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug)]
pub enum ReportError {
    /// The uploaded archive failed to open or its integrity check failed.
    CorruptArchive { path: PathBuf, reason: String },
    /// All missing/invalid fields of one request, reported together.
    Validation(Vec<FieldError>),
    /// The selected template identifier has no backing file.
    MissingTemplate { id: String, path: PathBuf },
    /// The template package is missing a required part.
    InvalidTemplate(String),
    /// Placeholder configuration could not be persisted.
    Config(String),
    Io(std::io::Error),
    Zip(zip::result::ZipError),
    Json(serde_json::Error),
}

impl ReportError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        ReportError::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::CorruptArchive { path, reason } => {
                write!(f, "corrupt or invalid ZIP archive {}: {reason}", path.display())
            }
            ReportError::Validation(errors) => {
                let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "validation failed: {}", joined.join("; "))
            }
            ReportError::MissingTemplate { id, path } => {
                write!(f, "template not found: {id} ({})", path.display())
            }
            ReportError::InvalidTemplate(reason) => write!(f, "invalid template: {reason}"),
            ReportError::Config(reason) => write!(f, "configuration error: {reason}"),
            ReportError::Io(e) => write!(f, "IO error: {e}"),
            ReportError::Zip(e) => write!(f, "ZIP error: {e}"),
            ReportError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Io(e) => Some(e),
            ReportError::Zip(e) => Some(e),
            ReportError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::Io(e)
    }
}

impl From<zip::result::ZipError> for ReportError {
    fn from(e: zip::result::ZipError) -> Self {
        ReportError::Zip(e)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Json(e)
    }
}
