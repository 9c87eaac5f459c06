//! Layout pass over a finished report.
//!
//! Independent of generation: takes any `.docx`, normalizes placeholder
//! fonts, and packs runs of consecutive narrow photos into borderless
//! tables so two or three sit side by side.

use crate::docx_common::{
    body_blocks, paragraph_text, BodyBlock, DocxPackage, DOCUMENT_PART, EMU_PER_CM, WT_RE,
};
use crate::error::ReportError;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

pub const OUTPUT_SUFFIX: &str = "_FORMATADO";

lazy_static! {
    static ref RUN_RE: Regex = Regex::new(r"(?s)<w:r(?:\s[^>/]*)?>.*?</w:r>").unwrap();
    static ref RPR_RE: Regex = Regex::new(r"(?s)<w:rPr>(.*?)</w:rPr>|<w:rPr\s*/>").unwrap();
    static ref FONT_PROPS_RE: Regex =
        Regex::new(r"<w:(?:rFonts|sz|szCs)(?:\s[^>]*)?/>").unwrap();
    static ref PARA_LAYOUT_RE: Regex = Regex::new(r"<w:(?:jc|spacing)(?:\s[^>]*)?/>").unwrap();
    static ref EXTENT_RE: Regex = Regex::new(r#"<wp:extent\s[^>]*?cx="(\d+)""#).unwrap();
}

/// `w:rPr` children that must come after `w:sz`/`w:szCs`.
const AFTER_SIZE: [&str; 16] = [
    "<w:highlight", "<w:u ", "<w:u/", "<w:effect", "<w:bdr", "<w:shd", "<w:fitText",
    "<w:vertAlign", "<w:rtl", "<w:cs", "<w:em ", "<w:em/", "<w:lang", "<w:eastAsianLayout",
    "<w:specVanish", "<w:oMath",
];
/// `w:pPr` children that must come after `w:spacing`.
const AFTER_SPACING: [&str; 14] = [
    "<w:ind", "<w:contextualSpacing", "<w:mirrorIndents", "<w:suppressOverlap", "<w:jc",
    "<w:textDirection", "<w:textAlignment", "<w:textboxTightWrap", "<w:outlineLvl",
    "<w:divId", "<w:cnfStyle", "<w:rPr", "<w:sectPr", "<w:pPrChange",
];
/// `w:pPr` children that must come after `w:jc`.
const AFTER_JC: [&str; 9] = [
    "<w:textDirection", "<w:textAlignment", "<w:textboxTightWrap", "<w:outlineLvl",
    "<w:divId", "<w:cnfStyle", "<w:rPr", "<w:sectPr", "<w:pPrChange",
];

#[derive(Debug, Clone)]
pub struct ReflowOptions {
    /// Photos at most this wide (cm) go three per row.
    pub three_per_row_max_cm: f64,
    /// Photos at most this wide (cm) go two per row.
    pub two_per_row_max_cm: f64,
    pub spacing_after_twips: u32,
    pub table_width_twips: u32,
    pub placeholder_font: &'static str,
    pub placeholder_size_pt: u32,
}

impl Default for ReflowOptions {
    fn default() -> Self {
        Self {
            three_per_row_max_cm: 5.92,
            two_per_row_max_cm: 7.50,
            spacing_after_twips: 240,
            table_width_twips: 8505,
            placeholder_font: "Calibri",
            placeholder_size_pt: 11,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflowReport {
    pub placeholder_runs: usize,
    pub images_seen: usize,
    pub tables_created: usize,
}

/// `report.docx` → `report_FORMATADO.docx`, next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "documento".to_string());
    input.with_file_name(format!("{stem}{OUTPUT_SUFFIX}.docx"))
}

// ─── Placeholder fonts ──────────────────────────────────────────────────────

/// Insert `element` into `inner` before the first of `followers`, or at the end.
fn insert_ordered(inner: &str, element: &str, followers: &[&str]) -> String {
    let pos = followers
        .iter()
        .filter_map(|f| inner.find(f))
        .min()
        .unwrap_or(inner.len());
    let mut out = String::with_capacity(inner.len() + element.len());
    out.push_str(&inner[..pos]);
    out.push_str(element);
    out.push_str(&inner[pos..]);
    out
}

fn set_run_font(run: &str, family: &str, half_points: u32) -> String {
    let fonts = format!(r#"<w:rFonts w:ascii="{family}" w:hAnsi="{family}" w:cs="{family}"/>"#);
    let size = format!(r#"<w:sz w:val="{half_points}"/><w:szCs w:val="{half_points}"/>"#);

    let Some(caps) = RPR_RE.captures(run) else {
        // no properties yet: add them right after the run's opening tag
        let open_end = run.find('>').map(|i| i + 1).unwrap_or(0);
        return format!("{}<w:rPr>{fonts}{size}</w:rPr>{}", &run[..open_end], &run[open_end..]);
    };
    let whole = caps.get(0).unwrap();
    let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let inner = FONT_PROPS_RE.replace_all(inner, "").into_owned();

    // rFonts follows rStyle, if any
    let fonts_at = match inner.find("<w:rStyle") {
        Some(start) => start + inner[start..].find("/>").map(|i| i + 2).unwrap_or(0),
        None => 0,
    };
    let mut inner = inner;
    inner.insert_str(fonts_at, &fonts);
    let inner = insert_ordered(&inner, &size, &AFTER_SIZE);

    format!(
        "{}<w:rPr>{}</w:rPr>{}",
        &run[..whole.start()],
        inner,
        &run[whole.end()..]
    )
}

/// Give every run whose text holds a `{{...}}` token the placeholder font.
pub fn format_placeholder_runs(xml: &str, options: &ReflowOptions) -> (String, usize) {
    let mut count = 0;
    let out = RUN_RE.replace_all(xml, |caps: &regex::Captures| {
        let run = &caps[0];
        if run.contains("<w:drawing") || run.contains("<w:pict") {
            return run.to_string();
        }
        let text: String = WT_RE.captures_iter(run).map(|c| c[2].to_string()).collect();
        if text.contains("{{") && text.contains("}}") {
            count += 1;
            set_run_font(run, options.placeholder_font, options.placeholder_size_pt * 2)
        } else {
            run.to_string()
        }
    });
    (out.into_owned(), count)
}

// ─── Paragraph layout ───────────────────────────────────────────────────────

/// Set alignment and (optionally) space-after on a paragraph.
fn with_layout(para: &str, jc: &str, spacing_after: Option<u32>) -> String {
    let jc_el = format!(r#"<w:jc w:val="{jc}"/>"#);
    let spacing_el = spacing_after
        .map(|after| format!(r#"<w:spacing w:after="{after}"/>"#))
        .unwrap_or_default();

    if para.ends_with("/>") && !para.contains("</w:p>") {
        return format!("<w:p><w:pPr>{spacing_el}{jc_el}</w:pPr></w:p>");
    }
    let open_end = para.find('>').map(|i| i + 1).unwrap_or(0);
    let (open, rest) = para.split_at(open_end);

    let (ppr_inner, body) = if let Some(after_open) = rest.strip_prefix("<w:pPr>") {
        match after_open.find("</w:pPr>") {
            Some(end) => (
                PARA_LAYOUT_RE.replace_all(&after_open[..end], "").into_owned(),
                &after_open[end + "</w:pPr>".len()..],
            ),
            None => (String::new(), rest),
        }
    } else {
        (String::new(), rest)
    };
    let mut inner = ppr_inner;
    // jc first so spacing lands ahead of it
    inner = insert_ordered(&inner, &jc_el, &AFTER_JC);
    if !spacing_el.is_empty() {
        inner = insert_ordered(&inner, &spacing_el, &AFTER_SPACING);
    }
    format!("{open}<w:pPr>{inner}</w:pPr>{body}")
}

fn spacing_paragraph(after: u32) -> String {
    format!(r#"<w:p><w:pPr><w:spacing w:after="{after}"/></w:pPr></w:p>"#)
}

fn borderless_table(cells: &[&str], columns: usize, options: &ReflowOptions) -> String {
    let col_width = options.table_width_twips / columns as u32;
    let borders: String = ["top", "left", "bottom", "right", "insideH", "insideV"]
        .iter()
        .map(|b| format!(r#"<w:{b} w:val="none" w:sz="0" w:space="0" w:color="auto"/>"#))
        .collect();
    let grid: String = (0..columns)
        .map(|_| format!(r#"<w:gridCol w:w="{col_width}"/>"#))
        .collect();
    let row: String = (0..columns)
        .map(|i| {
            let content = cells
                .get(i)
                .map(|p| with_layout(p, "center", None))
                .unwrap_or_else(|| "<w:p/>".to_string());
            format!(
                r#"<w:tc><w:tcPr><w:tcW w:w="{col_width}" w:type="dxa"/><w:vAlign w:val="center"/></w:tcPr>{content}</w:tc>"#
            )
        })
        .collect();
    format!(
        r#"<w:tbl><w:tblPr><w:tblW w:w="{}" w:type="dxa"/><w:jc w:val="center"/><w:tblBorders>{borders}</w:tblBorders><w:tblLayout w:type="fixed"/><w:tblLook w:val="0000"/></w:tblPr><w:tblGrid>{grid}</w:tblGrid><w:tr>{row}</w:tr></w:tbl>"#,
        options.table_width_twips
    )
}

// ─── Image grouping ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    /// Photo-only paragraph and its width in cm
    Image(Option<f64>),
    Blank,
    Other,
}

fn classify(xml: &str, block: &BodyBlock) -> BlockKind {
    if block.name != "w:p" {
        return BlockKind::Other;
    }
    let para = &xml[block.start..block.end];
    if !paragraph_text(para).is_empty() {
        return BlockKind::Other;
    }
    if para.contains("<pic:pic") {
        let extents: Vec<f64> = EXTENT_RE
            .captures_iter(para)
            .filter_map(|c| c[1].parse::<f64>().ok())
            .collect();
        return match extents.as_slice() {
            [cx] => BlockKind::Image(Some(cx / EMU_PER_CM)),
            [] => BlockKind::Image(None),
            _ => BlockKind::Other,
        };
    }
    let structural = ["<w:drawing", "<w:pict", "<w:br", "<w:sectPr", "<w:object"];
    if structural.iter().any(|s| para.contains(s)) {
        BlockKind::Other
    } else {
        BlockKind::Blank
    }
}

fn columns_for(width_cm: Option<f64>, options: &ReflowOptions) -> usize {
    match width_cm {
        Some(w) if w <= options.three_per_row_max_cm => 3,
        Some(w) if w <= options.two_per_row_max_cm => 2,
        _ => 1,
    }
}

/// Lay out one run of consecutive photos.
fn layout_group(
    images: &[(&str, usize)],
    options: &ReflowOptions,
    report: &mut ReflowReport,
) -> String {
    let mut out = String::new();
    let mut batch: Vec<&str> = Vec::new();
    let mut batch_columns = 0;

    let flush = |batch: &mut Vec<&str>, columns: usize, out: &mut String, report: &mut ReflowReport| {
        if batch.is_empty() {
            return;
        }
        out.push_str(&borderless_table(batch, columns, options));
        out.push_str(&spacing_paragraph(options.spacing_after_twips));
        report.tables_created += 1;
        batch.clear();
    };

    for &(para, columns) in images {
        if columns == 1 {
            flush(&mut batch, batch_columns, &mut out, report);
            out.push_str(&with_layout(para, "center", Some(options.spacing_after_twips)));
            continue;
        }
        if columns != batch_columns || batch.len() == batch_columns {
            flush(&mut batch, batch_columns, &mut out, report);
            batch_columns = columns;
        }
        batch.push(para);
    }
    flush(&mut batch, batch_columns, &mut out, report);
    out
}

/// Pack consecutive body-level photo paragraphs into tables.
pub fn arrange_images(xml: &str, options: &ReflowOptions, report: &mut ReflowReport) -> String {
    let blocks = body_blocks(xml);
    let kinds: Vec<BlockKind> = blocks.iter().map(|b| classify(xml, b)).collect();

    // (start, end, replacement) per run of photos; blanks inside a run drop out
    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    let mut i = 0;
    while i < blocks.len() {
        if !matches!(kinds[i], BlockKind::Image(_)) {
            i += 1;
            continue;
        }
        let mut group: Vec<(&str, usize)> = Vec::new();
        let mut last_image = i;
        let mut j = i;
        while j < blocks.len() {
            match kinds[j] {
                BlockKind::Image(width) => {
                    let para = &xml[blocks[j].start..blocks[j].end];
                    group.push((para, columns_for(width, options)));
                    last_image = j;
                }
                BlockKind::Blank => {}
                BlockKind::Other => break,
            }
            j += 1;
        }
        report.images_seen += group.len();
        let replacement = layout_group(&group, options, report);
        edits.push((blocks[i].start, blocks[last_image].end, replacement));
        i = last_image + 1;
    }

    let mut out = xml.to_string();
    for (start, end, replacement) in edits.into_iter().rev() {
        out.replace_range(start..end, &replacement);
    }
    out
}

// ─── Entry points ───────────────────────────────────────────────────────────

pub fn reflow_document(xml: &str, options: &ReflowOptions) -> (String, ReflowReport) {
    let mut report = ReflowReport::default();
    let (xml, runs) = format_placeholder_runs(xml, options);
    report.placeholder_runs = runs;
    let xml = arrange_images(&xml, options, &mut report);
    (xml, report)
}

pub fn reflow_file(
    input: &Path,
    output: &Path,
    options: &ReflowOptions,
) -> Result<ReflowReport, ReportError> {
    log::info!("Loading document: {}", input.display());
    let mut package = DocxPackage::read(input)?;
    let xml = package.document_xml()?;
    let (xml, report) = reflow_document(&xml, options);
    package.set(DOCUMENT_PART, xml.into_bytes());
    package.write(output)?;
    log::info!(
        "Saved {} ({} placeholder runs, {} photos, {} tables)",
        output.display(),
        report.placeholder_runs,
        report.images_seen,
        report.tables_created
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(content: &str) -> String {
        format!(r#"<w:document><w:body>{content}<w:sectPr/></w:body></w:document>"#)
    }

    fn photo(width_cm: f64) -> String {
        let cx = (width_cm * EMU_PER_CM) as u64;
        format!(
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:drawing><wp:inline><wp:extent cx="{cx}" cy="3600000"/><a:graphic><a:graphicData><pic:pic/></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#
        )
    }

    fn text(t: &str) -> String {
        format!("<w:p><w:r><w:t>{t}</w:t></w:r></w:p>")
    }

    fn names(xml: &str) -> Vec<String> {
        body_blocks(xml).into_iter().map(|b| b.name).collect()
    }

    #[test]
    fn test_placeholder_runs_get_calibri() {
        let xml = body(
            r#"<w:p><w:r><w:rPr><w:rStyle w:val="X"/><w:rFonts w:ascii="Times"/><w:b/><w:sz w:val="30"/><w:u w:val="single"/></w:rPr><w:t>{{uf}}</w:t></w:r><w:r><w:t>normal</w:t></w:r><w:r><w:t>{{nome_ag}}</w:t></w:r></w:p>"#,
        );
        let (out, n) = format_placeholder_runs(&xml, &ReflowOptions::default());
        assert_eq!(n, 2);
        assert!(out.contains(
            r#"<w:rPr><w:rStyle w:val="X"/><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:cs="Calibri"/><w:b/><w:sz w:val="22"/><w:szCs w:val="22"/><w:u w:val="single"/></w:rPr>"#
        ));
        assert!(!out.contains("Times"));
        assert!(out.contains("<w:r><w:t>normal</w:t></w:r>"));
        assert!(out.contains(r#"<w:r><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:cs="Calibri"/><w:sz w:val="22"/><w:szCs w:val="22"/></w:rPr><w:t>{{nome_ag}}</w:t></w:r>"#));
    }

    #[test]
    fn test_small_photos_three_per_row() {
        let xml = body(&format!(
            "{}{}<w:p/>{}<w:p/>{}{}",
            text("Fachada:"),
            photo(5.5),
            photo(5.0),
            photo(4.0),
            text("Fim")
        ));
        let mut report = ReflowReport::default();
        let out = arrange_images(&xml, &ReflowOptions::default(), &mut report);
        assert_eq!(report.images_seen, 3);
        assert_eq!(report.tables_created, 1);
        assert_eq!(names(&out), vec!["w:p", "w:tbl", "w:p", "w:p", "w:sectPr"]);
        assert_eq!(out.matches("<w:tc>").count(), 3);
        assert!(out.contains(r#"<w:gridCol w:w="2835"/>"#));
        assert!(out.contains(r#"<w:top w:val="none""#));
        assert!(out.contains(r#"<w:spacing w:after="240"/>"#));
    }

    #[test]
    fn test_medium_photos_two_per_row() {
        let xml = body(&format!("{}{}{}{}", photo(7.0), photo(7.5), photo(6.5), photo(7.2)));
        let mut report = ReflowReport::default();
        let out = arrange_images(&xml, &ReflowOptions::default(), &mut report);
        assert_eq!(report.tables_created, 2);
        assert_eq!(names(&out), vec!["w:tbl", "w:p", "w:tbl", "w:p", "w:sectPr"]);
    }

    #[test]
    fn test_wide_photo_stays_paragraph_and_mixed_sizes_split() {
        let xml = body(&format!("{}{}{}", photo(5.0), photo(13.3), photo(5.0)));
        let mut report = ReflowReport::default();
        let out = arrange_images(&xml, &ReflowOptions::default(), &mut report);
        assert_eq!(report.tables_created, 2);
        assert_eq!(names(&out), vec!["w:tbl", "w:p", "w:p", "w:tbl", "w:p", "w:sectPr"]);
        assert!(out.contains(
            r#"<w:p><w:pPr><w:spacing w:after="240"/><w:jc w:val="center"/></w:pPr><w:r><w:drawing>"#
        ));
    }

    #[test]
    fn test_page_breaks_end_a_group() {
        let xml = body(&format!(
            r#"{}<w:p><w:r><w:br w:type="page"/></w:r></w:p>{}"#,
            photo(5.0),
            photo(5.0)
        ));
        let mut report = ReflowReport::default();
        let out = arrange_images(&xml, &ReflowOptions::default(), &mut report);
        assert_eq!(report.tables_created, 2);
        assert!(out.contains(r#"<w:br w:type="page"/>"#));
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("out/relatorio.docx")),
            PathBuf::from("out/relatorio_FORMATADO.docx")
        );
    }

    #[test]
    fn test_reflow_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("r.docx");
        let package = DocxPackage {
            entries: vec![(
                DOCUMENT_PART.to_string(),
                body(&format!("{}{}", photo(5.0), photo(5.0))).into_bytes(),
            )],
        };
        package.write(&input).unwrap();

        let output = default_output_path(&input);
        let report = reflow_file(&input, &output, &ReflowOptions::default()).unwrap();
        assert_eq!(report.tables_created, 1);
        let written = DocxPackage::read(&output).unwrap().document_xml().unwrap();
        assert!(written.contains("<w:tbl>"));
    }
}
