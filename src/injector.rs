//! Template injection: placeholder substitution plus the photo section.
//!
//! The template's `word/document.xml` is edited as text. Placeholders are
//! substituted paragraph by paragraph, the `{{start_here}}` anchor is
//! located and stripped, and the XML for the whole content sequence is built
//! in order and spliced in once, directly before the anchor paragraph.

use crate::archive::is_scratch_file;
use crate::content::{clean_title, ContentItem};
use crate::docx_common::{
    add_relationships, document_end_offset, ensure_content_types, escape_xml, find_paragraphs,
    max_drawing_id, paragraph_open_tag, paragraph_properties, paragraph_text,
    replace_in_paragraph, DocxPackage, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART,
    STYLES_PART,
};
use crate::error::ReportError;
use crate::image_fit::{load_for_embedding, ImageLoadError, PreparedImage};
use crate::placeholders::{ResolvedPlaceholders, StyleClass, ANCHOR_TOKEN};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Folder names rendered as bold body text instead of headings.
pub const PLAIN_TEXT_FOLDERS: [&str; 2] = ["- Detalhes", "- Vista ampla"];

const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

/// Size of folder titles nested deeper than the heading levels.
const DEEP_TITLE_SIZE_PT: f32 = 12.0;

lazy_static! {
    static ref STYLE_RE: Regex = Regex::new(r"(?s)<w:style\b([^>]*)>(.*?)</w:style>").unwrap();
    static ref STYLE_ID_RE: Regex = Regex::new(r#"w:styleId="([^"]*)""#).unwrap();
    static ref STYLE_NAME_RE: Regex = Regex::new(r#"<w:name w:val="([^"]*)"\s*/>"#).unwrap();
}

// ─── Options & results ──────────────────────────────────────────────────────

/// How placeholder tokens are written back into a paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionMode {
    /// Rebuild the paragraph as a single run holding its full text with
    /// tokens replaced, in the token's font profile. Paragraph properties
    /// survive, run formatting does not.
    #[default]
    ResetParagraph,
    /// Edit `<w:t>` text in place and keep every run's formatting.
    SpliceText,
}

#[derive(Debug, Clone)]
pub struct InjectOptions {
    pub mode: SubstitutionMode,
    /// Titles containing any of these render as bold Arial body text.
    pub plain_folders: Vec<String>,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            mode: SubstitutionMode::default(),
            plain_folders: PLAIN_TEXT_FOLDERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A non-fatal problem with a single item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemWarning {
    MissingOrEmptyImage { path: PathBuf },
    ImageDecodeFailure { path: PathBuf, reason: String },
    AnchorNotFound,
    CleanupFailure { path: PathBuf, reason: String },
}

impl fmt::Display for ItemWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemWarning::MissingOrEmptyImage { path } => {
                write!(f, "image missing or empty: {}", path.display())
            }
            ItemWarning::ImageDecodeFailure { path, reason } => {
                write!(f, "could not decode image {}: {}", path.display(), reason)
            }
            ItemWarning::AnchorNotFound => write!(
                f,
                "anchor {ANCHOR_TOKEN} not found, content appended at document end"
            ),
            ItemWarning::CleanupFailure { path, reason } => {
                write!(f, "could not delete {}: {}", path.display(), reason)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InjectionReport {
    pub images_inserted: usize,
    pub placeholders_replaced: usize,
    pub warnings: Vec<ItemWarning>,
    /// Scratch copies now embedded in the package, to delete once it is written.
    pub consumed_scratch: Vec<PathBuf>,
}

/// Delete the scratch copies of embedded images. Failures are logged only.
pub fn remove_consumed_scratch(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => {
                let warning = ItemWarning::CleanupFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                log::warn!("{warning}");
            }
        }
    }
    removed
}

// ─── Placeholder substitution ───────────────────────────────────────────────

fn run_properties(style: StyleClass, bold: bool) -> String {
    let profile = style.profile();
    sized_run_properties(profile.family, profile.size_pt, bold)
}

fn sized_run_properties(family: &str, size_pt: f32, bold: bool) -> String {
    let half_points = (size_pt * 2.0).round() as u32;
    format!(
        r#"<w:rPr><w:rFonts w:ascii="{f}" w:hAnsi="{f}" w:cs="{f}"/>{b}<w:color w:val="auto"/><w:sz w:val="{s}"/><w:szCs w:val="{s}"/><w:u w:val="none"/></w:rPr>"#,
        f = family,
        b = if bold { "<w:b/>" } else { "" },
        s = half_points
    )
}

/// Rebuild one paragraph with every resolved token replaced. `None` when the
/// paragraph holds no resolved token.
fn reset_paragraph(para: &str, resolved: &ResolvedPlaceholders) -> Option<(String, usize)> {
    let text = paragraph_text(para);
    if !text.contains("{{") {
        return None;
    }

    // the token appearing last in the paragraph decides the font
    let mut last: Option<(usize, StyleClass)> = None;
    let mut count = 0;
    for token in resolved.tokens() {
        let Some(pos) = text.rfind(token) else {
            continue;
        };
        count += text.matches(token).count();
        let value = resolved.get(token)?;
        if last.map_or(true, |(p, _)| pos > p) {
            last = Some((pos, value.style));
        }
    }
    let (_, style) = last?;

    let mut new_text = text;
    for token in resolved.tokens() {
        if let Some(value) = resolved.get(token) {
            new_text = new_text.replace(token, &value.value);
        }
    }

    let mut out = String::with_capacity(para.len());
    out.push_str(paragraph_open_tag(para));
    if let Some(ppr) = paragraph_properties(para) {
        out.push_str(ppr);
    }
    out.push_str("<w:r>");
    out.push_str(&run_properties(style, false));
    out.push_str(&format!(
        r#"<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        escape_xml(&new_text)
    ));
    Some((out, count))
}

/// Substitute resolved tokens in every leaf paragraph of `xml`.
pub fn substitute_placeholders(
    xml: &str,
    resolved: &ResolvedPlaceholders,
    mode: SubstitutionMode,
) -> (String, usize) {
    if resolved.is_empty() {
        return (xml.to_string(), 0);
    }
    let splice_rules: Vec<(String, String)> = resolved
        .tokens()
        .into_iter()
        .filter_map(|t| resolved.get(t).map(|v| (escape_xml(t), escape_xml(&v.value))))
        .collect();

    let mut result = xml.to_string();
    let mut total = 0;
    for span in find_paragraphs(xml).iter().rev().filter(|s| s.leaf) {
        let para = &xml[span.start..span.end];
        let replaced = match mode {
            SubstitutionMode::ResetParagraph => reset_paragraph(para, resolved),
            SubstitutionMode::SpliceText => match replace_in_paragraph(para, &splice_rules) {
                (_, 0) => None,
                hit => Some(hit),
            },
        };
        if let Some((new_para, n)) = replaced {
            result.replace_range(span.start..span.end, &new_para);
            total += n;
        }
    }
    (result, total)
}

// ─── Content XML ────────────────────────────────────────────────────────────

fn folder_title_xml(
    name: &str,
    depth: usize,
    plain_folders: &[String],
    headings: &HeadingStyles,
) -> String {
    let title = escape_xml(&format!("{}:", clean_title(name)));
    let is_plain = plain_folders.iter().any(|p| name.contains(p.as_str()));

    if is_plain {
        format!(
            r#"<w:p><w:pPr><w:jc w:val="both"/></w:pPr><w:r>{}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            run_properties(StyleClass::Arial, true),
            title
        )
    } else if depth <= 2 {
        format!(
            r#"<w:p><w:pPr><w:pStyle w:val="{}"/></w:pPr><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            headings.id(depth + 1),
            title
        )
    } else {
        format!(
            r#"<w:p><w:r>{}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            sized_run_properties(StyleClass::Arial.profile().family, DEEP_TITLE_SIZE_PT, true),
            title
        )
    }
}

fn image_xml(rel_id: &str, drawing_id: u32, name: &str, image: &PreparedImage) -> String {
    let size = image.size();
    let (cx, cy) = (size.width_emu(), size.height_emu());
    let name = escape_xml(name);
    format!(
        r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing"><wp:extent cx="{cx}" cy="{cy}"/><wp:docPr id="{drawing_id}" name="Picture {drawing_id}" descr="{name}"/><a:graphic xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:pic xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:nvPicPr><pic:cNvPr id="{drawing_id}" name="{name}"/><pic:cNvPicPr/></pic:nvPicPr><pic:blipFill><a:blip r:embed="{rel_id}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill><pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p><w:p/>"#
    )
}

const PAGE_BREAK_XML: &str = r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#;

/// Media, relationships and warnings collected while building the fragment.
struct FragmentBuilder<'a> {
    package: &'a DocxPackage,
    rels_xml: &'a str,
    next_drawing_id: u32,
    next_media: usize,
    media: Vec<(String, Vec<u8>)>,
    relationships: Vec<(String, String, String)>,
    extensions: Vec<&'static str>,
    images_inserted: usize,
    warnings: Vec<ItemWarning>,
    consumed_scratch: Vec<PathBuf>,
}

impl<'a> FragmentBuilder<'a> {
    fn new(package: &'a DocxPackage, document_xml: &str, rels_xml: &'a str) -> Self {
        Self {
            package,
            rels_xml,
            next_drawing_id: max_drawing_id(document_xml) + 1,
            next_media: 1,
            media: Vec::new(),
            relationships: Vec::new(),
            extensions: Vec::new(),
            images_inserted: 0,
            warnings: Vec::new(),
            consumed_scratch: Vec::new(),
        }
    }

    fn warn(&mut self, warning: ItemWarning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Next unused media number; the same number keys the relationship id.
    fn claim_media_slot(&mut self, ext: &str) -> (String, String) {
        loop {
            let n = self.next_media;
            self.next_media += 1;
            let part = format!("word/media/report_image{n}.{ext}");
            let rel_id = format!("rIdReport{n}");
            let rel_taken = self.rels_xml.contains(&format!(r#"Id="{rel_id}""#));
            if !rel_taken && !self.package.contains(&part) {
                return (part, rel_id);
            }
        }
    }

    fn image(&mut self, path: &Path) -> Option<String> {
        let prepared = match load_for_embedding(path) {
            Ok(p) => p,
            Err(ImageLoadError::Missing) | Err(ImageLoadError::Empty) => {
                self.warn(ItemWarning::MissingOrEmptyImage {
                    path: path.to_path_buf(),
                });
                return None;
            }
            Err(ImageLoadError::Decode(reason)) => {
                self.warn(ItemWarning::ImageDecodeFailure {
                    path: path.to_path_buf(),
                    reason,
                });
                return None;
            }
        };

        let (part, rel_id) = self.claim_media_slot(prepared.extension);
        let target = part.trim_start_matches("word/").to_string();
        let drawing_id = self.next_drawing_id;
        self.next_drawing_id += 1;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let xml = image_xml(&rel_id, drawing_id, &name, &prepared);
        log::debug!(
            "Inserted {} as {} ({}x{} px)",
            path.display(),
            part,
            prepared.width_px,
            prepared.height_px
        );

        if !self.extensions.contains(&prepared.extension) {
            self.extensions.push(prepared.extension);
        }
        self.relationships
            .push((rel_id, IMAGE_REL_TYPE.to_string(), target));
        self.media.push((part, prepared.data));
        self.images_inserted += 1;

        if is_scratch_file(path) && !self.consumed_scratch.iter().any(|p| p == path) {
            self.consumed_scratch.push(path.to_path_buf());
        }
        Some(xml)
    }

    fn build(
        &mut self,
        items: &[ContentItem],
        options: &InjectOptions,
        headings: &HeadingStyles,
    ) -> String {
        let mut fragment = String::new();
        for item in items {
            match item {
                ContentItem::FolderTitle { name, depth } => {
                    fragment.push_str(&folder_title_xml(
                        name,
                        *depth,
                        &options.plain_folders,
                        headings,
                    ));
                }
                ContentItem::Image { source_path } => {
                    if let Some(xml) = self.image(source_path) {
                        fragment.push_str(&xml);
                    }
                }
                ContentItem::PageBreak => fragment.push_str(PAGE_BREAK_XML),
            }
        }
        fragment
    }
}

// ─── Styles ─────────────────────────────────────────────────────────────────

fn heading_style_xml(level: usize) -> String {
    let size = match level {
        1 => 32,
        2 => 28,
        _ => 24,
    };
    format!(
        r#"<w:style w:type="paragraph" w:styleId="Heading{level}"><w:name w:val="heading {level}"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="{outline}"/></w:pPr><w:rPr><w:b/><w:bCs/><w:sz w:val="{size}"/><w:szCs w:val="{size}"/></w:rPr></w:style>"#,
        outline = level - 1
    )
}

/// Paragraph style ids for heading levels 1 to 3.
///
/// Word keys styles by a localized id (`Ttulo1` in Portuguese, `berschrift1`
/// in German) but keeps the built-in name `heading N`, so levels are looked
/// up by name first and by the `HeadingN` id second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingStyles {
    ids: [String; 3],
    missing: Vec<usize>,
}

impl HeadingStyles {
    pub fn resolve(styles_xml: &str) -> Self {
        let mut by_name: Vec<(String, String)> = Vec::new();
        let mut known_ids = HashSet::new();
        for caps in STYLE_RE.captures_iter(styles_xml) {
            let Some(id) = STYLE_ID_RE.captures(&caps[1]) else {
                continue;
            };
            let id = id[1].to_string();
            if let Some(name) = STYLE_NAME_RE.captures(&caps[2]) {
                by_name.push((name[1].to_lowercase(), id.clone()));
            }
            known_ids.insert(id);
        }

        let mut missing = Vec::new();
        let ids = [1, 2, 3].map(|level| {
            let name = format!("heading {level}");
            let fallback = format!("Heading{level}");
            match by_name.iter().find(|(n, _)| *n == name) {
                Some((_, id)) => id.clone(),
                None => {
                    if !known_ids.contains(&fallback) {
                        missing.push(level);
                    }
                    fallback
                }
            }
        });
        Self { ids, missing }
    }

    /// Style id for `level` (1 to 3).
    pub fn id(&self, level: usize) -> &str {
        &self.ids[level.clamp(1, 3) - 1]
    }

    /// Levels with no usable style in the template.
    pub fn missing(&self) -> &[usize] {
        &self.missing
    }
}

/// Add a `HeadingN` style for each heading level the template has no style for.
pub fn ensure_heading_styles(styles_xml: &str) -> String {
    let Some(close) = styles_xml.rfind("</w:styles>") else {
        return styles_xml.to_string();
    };
    let headings = HeadingStyles::resolve(styles_xml);
    let missing: String = headings
        .missing()
        .iter()
        .map(|level| heading_style_xml(*level))
        .collect();
    let mut result = String::with_capacity(styles_xml.len() + missing.len());
    result.push_str(&styles_xml[..close]);
    result.push_str(&missing);
    result.push_str(&styles_xml[close..]);
    result
}

// ─── Entry points ───────────────────────────────────────────────────────────

/// Inject into an already loaded package.
pub fn inject_package(
    package: &mut DocxPackage,
    items: &[ContentItem],
    resolved: &ResolvedPlaceholders,
    options: &InjectOptions,
) -> Result<InjectionReport, ReportError> {
    let original = package.document_xml()?;
    let (mut xml, placeholders_replaced) =
        substitute_placeholders(&original, resolved, options.mode);
    log::info!("Replaced {placeholders_replaced} placeholder occurrences");

    let mut warnings = Vec::new();
    let anchor = find_paragraphs(&xml)
        .into_iter()
        .filter(|s| s.leaf)
        .find(|s| paragraph_text(&xml[s.start..s.end]).contains(ANCHOR_TOKEN));
    let offset = match anchor {
        Some(span) => {
            let para = xml[span.start..span.end].to_string();
            let (stripped, _) =
                replace_in_paragraph(&para, &[(ANCHOR_TOKEN.to_string(), String::new())]);
            xml.replace_range(span.start..span.end, &stripped);
            span.start
        }
        None => {
            let warning = ItemWarning::AnchorNotFound;
            log::warn!("{warning}");
            warnings.push(warning);
            document_end_offset(&xml)
                .ok_or_else(|| ReportError::InvalidTemplate("document has no <w:body>".into()))?
        }
    };

    let styles = package.get_text(STYLES_PART);
    let headings = HeadingStyles::resolve(styles.as_deref().unwrap_or_default());

    let rels_xml = package.get_text(DOCUMENT_RELS_PART).unwrap_or_default();
    let mut builder = FragmentBuilder::new(package, &xml, &rels_xml);
    let fragment = builder.build(items, options, &headings);
    warnings.append(&mut builder.warnings);
    let images_inserted = builder.images_inserted;
    let media = std::mem::take(&mut builder.media);
    let relationships = std::mem::take(&mut builder.relationships);
    let extensions = std::mem::take(&mut builder.extensions);
    let consumed_scratch = std::mem::take(&mut builder.consumed_scratch);
    drop(builder);

    xml.insert_str(offset, &fragment);
    package.set(DOCUMENT_PART, xml.into_bytes());

    if !relationships.is_empty() {
        if rels_xml.is_empty() {
            return Err(ReportError::InvalidTemplate(format!(
                "no {DOCUMENT_RELS_PART} found"
            )));
        }
        let rels = add_relationships(&rels_xml, &relationships)?;
        package.set(DOCUMENT_RELS_PART, rels.into_bytes());

        let types = package.get_text(CONTENT_TYPES_PART).ok_or_else(|| {
            ReportError::InvalidTemplate(format!("no {CONTENT_TYPES_PART} found"))
        })?;
        let types = ensure_content_types(&types, &extensions)?;
        package.set(CONTENT_TYPES_PART, types.into_bytes());
    }
    for (part, data) in media {
        package.set(&part, data);
    }

    match styles {
        Some(styles) => {
            let updated = ensure_heading_styles(&styles);
            if updated != styles {
                package.set(STYLES_PART, updated.into_bytes());
            }
        }
        None => log::debug!("template has no {STYLES_PART}; heading styles not added"),
    }

    Ok(InjectionReport {
        images_inserted,
        placeholders_replaced,
        warnings,
        consumed_scratch,
    })
}

/// Read `template`, inject `items` and the resolved placeholders, and write
/// the result to `output`. Scratch copies are deleted only after the write
/// succeeds.
pub fn inject(
    template: &Path,
    output: &Path,
    items: &[ContentItem],
    resolved: &ResolvedPlaceholders,
    options: &InjectOptions,
) -> Result<InjectionReport, ReportError> {
    log::info!("Injecting into template {}", template.display());
    let mut package = DocxPackage::read(template)?;
    let report = inject_package(&mut package, items, resolved, options)?;
    package.write(output)?;
    let removed = remove_consumed_scratch(&report.consumed_scratch);
    log::debug!("Deleted {removed} scratch images");
    log::info!(
        "Wrote {} ({} images, {} warnings)",
        output.display(),
        report.images_inserted,
        report.warnings.len()
    );
    Ok(report)
}
