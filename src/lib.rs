//! Photo Report Toolkit
//!
//! Turns a ZIP of categorized site photographs plus form metadata into a
//! formatted Word report built from a `.docx` template.
//!
//! This library provides:
//! - `archive`: ZIP verification, extraction and folder/image traversal
//! - `content`: the ordered content model, normalization and preview grouping
//! - `placeholders` / `config_store`: `{{token}}` resolution and its persisted configuration
//! - `injector`: placeholder substitution and photo-section injection into a template
//! - `reflow`: post-processing that packs narrow photos into side-by-side tables
//! - `pipeline`: request orchestration used by the binaries
//!
//! Binaries:
//! - `photo-report`: generate reports, previews, and manage placeholder configuration
//! - `docx-reflow`: run the reflow pass over an existing document

pub mod archive;
pub mod catalog;
pub mod config_store;
pub mod content;
pub mod docx_common;
pub mod error;
pub mod image_fit;
pub mod injector;
pub mod pipeline;
pub mod placeholders;
pub mod reflow;

pub use content::ContentItem;
pub use error::ReportError;
pub use placeholders::FormData;
