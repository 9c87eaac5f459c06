//! Canonical content sequence for a report.
//!
//! The walker produces a raw list of [`ContentItem`]s; everything here turns
//! raw or user-reordered input into the canonical sequence the injector
//! consumes: folder titles, images, and page breaks in visual order.

use crate::error::{FieldError, ReportError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Character used to encode folder depth in serialized titles.
pub const DEPTH_MARKER: char = '»';

/// Depths at or beyond this value share a single visual style.
pub const MAX_MARKED_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    FolderTitle { name: String, depth: usize },
    Image { source_path: PathBuf },
    PageBreak,
}

impl ContentItem {
    pub fn folder(name: impl Into<String>, depth: usize) -> Self {
        ContentItem::FolderTitle {
            name: name.into(),
            depth,
        }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        ContentItem::Image {
            source_path: path.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentItem::Image { .. })
    }
}

/// Count the images in a sequence.
pub fn image_count(items: &[ContentItem]) -> usize {
    items.iter().filter(|i| i.is_image()).count()
}

// ─── Titles ─────────────────────────────────────────────────────────────────

/// Encode a folder name with its depth prefix: `name`, `»name`, `»»name`,
/// and `»»»name` for every depth from 3 upward.
pub fn marked_title(name: &str, depth: usize) -> String {
    let markers = depth.min(MAX_MARKED_DEPTH);
    let mut out = String::with_capacity(name.len() + markers * 2);
    for _ in 0..markers {
        out.push(DEPTH_MARKER);
    }
    out.push_str(name);
    out
}

/// Decode a marker-prefixed title into (name, depth).
pub fn parse_marked_title(marked: &str) -> (String, usize) {
    let depth = marked.chars().filter(|&c| c == DEPTH_MARKER).count();
    (marked.replace(DEPTH_MARKER, ""), depth)
}

/// Strip depth markers and the doubled-hyphen artifact (`- - Foo` → `- Foo`).
pub fn clean_title(title: &str) -> String {
    let stripped = title.replace(DEPTH_MARKER, "");
    let trimmed = stripped.trim();
    if trimmed.starts_with("- -") {
        trimmed[2..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

// ─── Normalization ──────────────────────────────────────────────────────────

/// Rebuild the canonical sequence from raw or reordered items.
///
/// Existing page breaks are discarded and re-derived: every run of images
/// that follows a folder title gets one trailing page break, including a run
/// at the very end of the sequence. Folder titles are cleaned and their depth
/// clamped to [`MAX_MARKED_DEPTH`].
pub fn normalize(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut out = Vec::with_capacity(items.len() + 8);
    let mut pending_images: Vec<ContentItem> = Vec::new();

    for item in items {
        match item {
            ContentItem::FolderTitle { name, depth } => {
                flush_images(&mut out, &mut pending_images);
                out.push(ContentItem::FolderTitle {
                    name: clean_title(&name),
                    depth: depth.min(MAX_MARKED_DEPTH),
                });
            }
            image @ ContentItem::Image { .. } => pending_images.push(image),
            ContentItem::PageBreak => {}
        }
    }
    flush_images(&mut out, &mut pending_images);
    out
}

fn flush_images(out: &mut Vec<ContentItem>, pending: &mut Vec<ContentItem>) {
    if pending.is_empty() {
        return;
    }
    out.append(pending);
    out.push(ContentItem::PageBreak);
}

// ─── Reorder form encoding ──────────────────────────────────────────────────

/// Decode a user-edited ordering expressed as parallel form fields
/// (`item_type_N`, `item_title_N`, `item_level_N`, `item_path_N`).
///
/// Reading stops at the first index without an `item_type_N` field. The
/// result is already normalized. Image paths are not checked here.
pub fn decode_form_order(fields: &HashMap<String, String>) -> Result<Vec<ContentItem>, ReportError> {
    let mut items = Vec::new();
    let mut errors = Vec::new();

    let mut i = 0usize;
    while let Some(kind) = fields.get(&format!("item_type_{i}")) {
        match kind.as_str() {
            "folder" => {
                let title = fields
                    .get(&format!("item_title_{i}"))
                    .cloned()
                    .unwrap_or_default();
                let level_key = format!("item_level_{i}");
                let level = fields.get(&level_key).map(|s| s.trim()).unwrap_or("0");
                match level.parse::<usize>() {
                    Ok(depth) => items.push(ContentItem::folder(title, depth)),
                    Err(_) => errors.push(FieldError::new(
                        level_key,
                        format!("invalid folder level '{level}'"),
                    )),
                }
            }
            "image" => match fields.get(&format!("item_path_{i}")) {
                Some(path) if !path.trim().is_empty() => {
                    items.push(ContentItem::image(path.trim()))
                }
                _ => errors.push(FieldError::new(
                    format!("item_path_{i}"),
                    "image entry without a path",
                )),
            },
            other => log::debug!("Ignoring reorder entry {i} of unknown type '{other}'"),
        }
        i += 1;
    }

    if !errors.is_empty() {
        return Err(ReportError::Validation(errors));
    }
    Ok(normalize(items))
}

// ─── Preview grouping ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewImage {
    pub name: String,
    pub path: PathBuf,
}

/// One folder of the preview with the images that follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewFolder {
    pub title: String,
    pub original_title: String,
    pub level: usize,
    pub images: Vec<PreviewImage>,
}

/// Group a sequence into folders for a reorder step. Images appearing before
/// any folder title have nowhere to go and are dropped from the preview.
pub fn build_preview(items: &[ContentItem]) -> Vec<PreviewFolder> {
    let mut folders: Vec<PreviewFolder> = Vec::new();
    for item in items {
        match item {
            ContentItem::FolderTitle { name, depth } => folders.push(PreviewFolder {
                title: clean_title(name),
                original_title: marked_title(name, *depth),
                level: (*depth).min(MAX_MARKED_DEPTH),
                images: Vec::new(),
            }),
            ContentItem::Image { source_path } => {
                if let Some(folder) = folders.last_mut() {
                    folder.images.push(PreviewImage {
                        name: file_name_of(source_path),
                        path: source_path.clone(),
                    });
                }
            }
            ContentItem::PageBreak => {}
        }
    }
    folders
}

/// Flatten preview folders back into the parallel form-field encoding
/// accepted by [`decode_form_order`].
pub fn preview_to_form_fields(folders: &[PreviewFolder]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut i = 0usize;
    for folder in folders {
        fields.insert(format!("item_type_{i}"), "folder".to_string());
        fields.insert(format!("item_title_{i}"), folder.title.clone());
        fields.insert(format!("item_level_{i}"), folder.level.to_string());
        i += 1;
        for image in &folder.images {
            fields.insert(format!("item_type_{i}"), "image".to_string());
            fields.insert(
                format!("item_path_{i}"),
                image.path.to_string_lossy().into_owned(),
            );
            i += 1;
        }
    }
    fields
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(items: &[ContentItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| match i {
                ContentItem::FolderTitle { name, .. } => name.clone(),
                ContentItem::Image { .. } => "img".to_string(),
                ContentItem::PageBreak => "break".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_marked_title_collapses_deep_levels() {
        assert_eq!(marked_title("A", 0), "A");
        assert_eq!(marked_title("A", 1), "»A");
        assert_eq!(marked_title("A", 2), "»»A");
        assert_eq!(marked_title("A", 3), "»»»A");
        assert_eq!(marked_title("A", 7), "»»»A");
        assert_eq!(parse_marked_title("»»B"), ("B".to_string(), 2));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("»»- - Fachada"), "- Fachada");
        assert_eq!(clean_title("  - Área externa "), "- Área externa");
        assert_eq!(clean_title("Telhado"), "Telhado");
    }

    #[test]
    fn test_normalize_rederives_page_breaks() {
        let items = vec![
            ContentItem::folder("A", 0),
            ContentItem::PageBreak,
            ContentItem::image("/tmp/a1.jpg"),
            ContentItem::image("/tmp/a2.jpg"),
            ContentItem::folder("B", 1),
            ContentItem::folder("C", 0),
            ContentItem::image("/tmp/c1.jpg"),
        ];
        let out = normalize(items);
        assert_eq!(
            titles(&out),
            vec!["A", "img", "img", "break", "B", "C", "img", "break"]
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let items = vec![
            ContentItem::folder("A", 0),
            ContentItem::image("/tmp/a.jpg"),
            ContentItem::PageBreak,
            ContentItem::folder("B", 0),
        ];
        let once = normalize(items);
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_decode_form_order() {
        let mut fields = HashMap::new();
        fields.insert("item_type_0".to_string(), "folder".to_string());
        fields.insert("item_title_0".to_string(), "- - Detalhes".to_string());
        fields.insert("item_level_0".to_string(), "5".to_string());
        fields.insert("item_type_1".to_string(), "image".to_string());
        fields.insert("item_path_1".to_string(), "/tmp/x.png".to_string());
        fields.insert("item_type_2".to_string(), "image".to_string());
        fields.insert("item_path_2".to_string(), "/tmp/y.png".to_string());
        // gap: index 3 missing, so index 4 is never read
        fields.insert("item_type_4".to_string(), "folder".to_string());

        let items = decode_form_order(&fields).unwrap();
        assert_eq!(
            items,
            vec![
                ContentItem::folder("- Detalhes", 3),
                ContentItem::image("/tmp/x.png"),
                ContentItem::image("/tmp/y.png"),
                ContentItem::PageBreak,
            ]
        );
    }

    #[test]
    fn test_decode_form_order_rejects_bad_level() {
        let mut fields = HashMap::new();
        fields.insert("item_type_0".to_string(), "folder".to_string());
        fields.insert("item_title_0".to_string(), "A".to_string());
        fields.insert("item_level_0".to_string(), "deep".to_string());
        match decode_form_order(&fields) {
            Err(ReportError::Validation(errs)) => assert_eq!(errs[0].field, "item_level_0"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_preview_round_trip_through_form_fields() {
        let items = normalize(vec![
            ContentItem::folder("- Área externa", 0),
            ContentItem::image("/tmp/temp_img_1_a.jpg"),
            ContentItem::folder("Fundos", 1),
            ContentItem::image("/tmp/temp_img_2_b.jpg"),
        ]);
        let preview = build_preview(&items);
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[1].original_title, "»Fundos");
        assert_eq!(preview[0].images[0].name, "temp_img_1_a.jpg");

        let fields = preview_to_form_fields(&preview);
        assert_eq!(decode_form_order(&fields).unwrap(), items);
    }
}
