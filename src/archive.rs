//! Archive walker: ZIP of photo folders → raw content sequence.
//!
//! The archive is verified, extracted into a temporary directory that is
//! removed when the walk returns, and traversed depth-first. Images are
//! copied to scratch files that deliberately outlive the extraction; the
//! injector deletes each one after inserting it.

use crate::content::ContentItem;
use crate::error::ReportError;
use crate::placeholders::FormData;
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Fixed ordering of the known top-level folders.
pub const FOLDER_PRIORITY: [&str; 5] = [
    "- Área externa",
    "- Área interna",
    "- Segundo piso",
    "- Detalhes",
    "- Vista ampla",
];

/// File extensions (lowercase) treated as photos.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Prefix of every scratch copy created by the walker.
pub const SCRATCH_PREFIX: &str = "temp_img_";

/// How directories below the top level are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubfolderOrder {
    /// Keep the order the filesystem lists them in.
    #[default]
    Listing,
    /// Sort by name.
    Alphabetical,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Where scratch image copies are written.
    pub scratch_dir: PathBuf,
    pub subfolder_order: SubfolderOrder,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            subfolder_order: SubfolderOrder::default(),
        }
    }
}

/// A directory of the extracted tree with its photos in capture order.
#[derive(Debug, Clone)]
pub struct FolderNode {
    pub path: PathBuf,
    pub name: String,
    pub depth: usize,
    pub images: Vec<PathBuf>,
    pub children: Vec<FolderNode>,
}

// ─── Ordering ───────────────────────────────────────────────────────────────

fn priority_rank(name: &str) -> usize {
    FOLDER_PRIORITY
        .iter()
        .position(|p| *p == name)
        .unwrap_or(FOLDER_PRIORITY.len())
}

/// Top-level ordering: known folders by priority, unknown ones afterwards
/// in alphabetical order.
pub fn compare_top_level(a: &str, b: &str) -> Ordering {
    priority_rank(a)
        .cmp(&priority_rank(b))
        .then_with(|| a.cmp(b))
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Capture timestamp: creation time where the filesystem reports one,
/// modification time otherwise.
fn capture_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

// ─── Extraction ─────────────────────────────────────────────────────────────

/// Open the archive and read every entry to the end so CRC mismatches and
/// truncated data surface before anything is extracted.
pub fn verify_archive(zip_path: &Path) -> Result<(), ReportError> {
    let file = fs::File::open(zip_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ReportError::corrupt(zip_path, e))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ReportError::corrupt(zip_path, e))?;
        io::copy(&mut entry, &mut io::sink())
            .map_err(|e| ReportError::corrupt(zip_path, format!("{}: {e}", entry.name())))?;
    }
    Ok(())
}

fn extract_to(zip_path: &Path, dest: &Path) -> Result<(), ReportError> {
    let file = fs::File::open(zip_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ReportError::corrupt(zip_path, e))?;
    archive
        .extract(dest)
        .map_err(|e| ReportError::corrupt(zip_path, e))?;
    Ok(())
}

/// A single top-level directory is a wrapper and becomes the logical root.
fn logical_root(extracted: &Path) -> io::Result<PathBuf> {
    let entries: Vec<PathBuf> = fs::read_dir(extracted)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    if entries.len() == 1 && entries[0].is_dir() {
        Ok(entries[0].clone())
    } else {
        Ok(extracted.to_path_buf())
    }
}

// ─── Tree ───────────────────────────────────────────────────────────────────

/// Build the folder tree below `root` (the root itself is not a node).
pub fn build_tree(root: &Path, order: SubfolderOrder) -> io::Result<Vec<FolderNode>> {
    read_children(root, 0, order)
}

fn read_children(dir: &Path, depth: usize, order: SubfolderOrder) -> io::Result<Vec<FolderNode>> {
    let mut dirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            dirs.push((name, entry.path()));
        }
    }

    if depth == 0 {
        dirs.sort_by(|a, b| compare_top_level(&a.0, &b.0));
    } else if order == SubfolderOrder::Alphabetical {
        dirs.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let mut nodes = Vec::with_capacity(dirs.len());
    for (name, path) in dirs {
        let images = images_in(&path)?;
        let children = read_children(&path, depth + 1, order)?;
        nodes.push(FolderNode {
            path,
            name,
            depth,
            images,
            children,
        });
    }
    Ok(nodes)
}

/// Photos directly inside `dir`, oldest first. The sort is stable, so equal
/// timestamps keep listing order.
fn images_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_image_file(&path) {
            images.push((capture_time(&path), path));
        }
    }
    images.sort_by_key(|(t, _)| *t);
    Ok(images.into_iter().map(|(_, p)| p).collect())
}

// ─── Emission ───────────────────────────────────────────────────────────────

/// Copy an image to a uniquely named scratch file that survives the
/// extraction directory.
fn scratch_copy(src: &Path, scratch_dir: &Path) -> io::Result<PathBuf> {
    let base = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let tmp = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .suffix(&format!("_{base}"))
        .tempfile_in(scratch_dir)?;
    let (_, path) = tmp.keep().map_err(|e| e.error)?;
    fs::copy(src, &path)?;
    Ok(path)
}

/// Flatten a folder tree into the raw content sequence (pre-order).
pub fn emit_items(nodes: &[FolderNode], scratch_dir: &Path, out: &mut Vec<ContentItem>) {
    for node in nodes {
        out.push(ContentItem::folder(node.name.clone(), node.depth));

        for image in &node.images {
            match scratch_copy(image, scratch_dir) {
                Ok(copy) => {
                    log::debug!("Copied image {} -> {}", image.display(), copy.display());
                    out.push(ContentItem::image(copy));
                }
                Err(e) => log::warn!("Could not copy image {}: {}", image.display(), e),
            }
        }
        if !node.images.is_empty() {
            out.push(ContentItem::PageBreak);
        }

        emit_items(&node.children, scratch_dir, out);
    }
}

/// Extract a ZIP and produce its raw content sequence.
///
/// `form` is caller context only and is not interpreted. Returned `Image`
/// items point at scratch copies the caller must eventually delete.
pub fn walk_archive(
    zip_path: &Path,
    _form: &FormData,
    options: &WalkOptions,
) -> Result<Vec<ContentItem>, ReportError> {
    log::info!("Processing ZIP file: {}", zip_path.display());
    verify_archive(zip_path)?;

    // removed on drop, on every exit path
    let extraction = tempfile::tempdir()?;
    extract_to(zip_path, extraction.path())?;
    let root = logical_root(extraction.path())?;

    let tree = build_tree(&root, options.subfolder_order)?;
    fs::create_dir_all(&options.scratch_dir)?;

    let mut items = Vec::new();
    emit_items(&tree, &options.scratch_dir, &mut items);

    log::info!(
        "Walked {} folders, {} images",
        items
            .iter()
            .filter(|i| matches!(i, ContentItem::FolderTitle { .. }))
            .count(),
        crate::content::image_count(&items)
    );
    Ok(items)
}

/// Whether `path` names a scratch copy made by [`walk_archive`].
pub fn is_scratch_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SCRATCH_PREFIX))
}

/// Delete scratch copies still referenced by a sequence. Only files created
/// by the walker (prefixed [`SCRATCH_PREFIX`]) are touched.
pub fn discard_scratch(items: &[ContentItem]) -> usize {
    let mut removed = 0;
    for item in items {
        let ContentItem::Image { source_path } = item else {
            continue;
        };
        if !is_scratch_file(source_path) || !source_path.exists() {
            continue;
        }
        match fs::remove_file(source_path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!(
                "Could not clean up scratch image {}: {}",
                source_path.display(),
                e
            ),
        }
    }
    removed
}
