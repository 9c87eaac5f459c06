//! Shared DOCX utilities for the injector and the reflow pass.
//!
//! A DOCX is a ZIP of XML parts. Both tools load every entry in order,
//! rewrite `word/document.xml` (and a few bookkeeping parts) as text, and
//! write the package back. WordprocessingML is scanned with regexes over
//! byte ranges rather than parsed into a tree so untouched markup survives
//! byte-for-byte.

use crate::error::ReportError;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::{Read, Write};
use std::path::Path;

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const STYLES_PART: &str = "word/styles.xml";

/// English Metric Units per centimetre.
pub const EMU_PER_CM: f64 = 360_000.0;
/// Twentieths of a point per centimetre.
pub const TWIPS_PER_CM: f64 = 566.929;

lazy_static! {
    /// `<w:t ...>text</w:t>`: group 1 is the opening tag, group 2 the text.
    pub static ref WT_RE: Regex = Regex::new(r"(<w:t(?:\s[^>]*)?>)([^<]*)</w:t>").unwrap();
    static ref PARA_TAG_RE: Regex = Regex::new(r"<(/?)w:p(?:\s[^>]*?)?(/?)>").unwrap();
    static ref ANY_TAG_RE: Regex =
        Regex::new(r"<(/?)([A-Za-z_][\w.\-]*(?::[\w.\-]+)?)(?:\s[^>]*?)?(/?)>").unwrap();
    static ref DOCPR_ID_RE: Regex = Regex::new(r#"<wp:docPr\s[^>]*?\bid="(\d+)""#).unwrap();
}

// ─── Package I/O ────────────────────────────────────────────────────────────

/// All entries of a DOCX package, in archive order.
#[derive(Debug, Clone, Default)]
pub struct DocxPackage {
    pub entries: Vec<(String, Vec<u8>)>,
}

impl DocxPackage {
    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            entries.push((name, data));
        }
        Ok(Self { entries })
    }

    /// Write the package. Media is STORED, everything else DEFLATED, the
    /// layout Word itself produces.
    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let deflated = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in &self.entries {
            let opts = if name.starts_with("word/media/") {
                stored
            } else {
                deflated
            };
            zip.start_file(name.as_str(), opts)?;
            zip.write_all(data)?;
        }
        zip.finish()?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|d| String::from_utf8_lossy(d).into_owned())
    }

    /// Replace an entry or append it when absent.
    pub fn set(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = data,
            None => self.entries.push((name.to_string(), data)),
        }
    }

    /// The main document part, which every template must have.
    pub fn document_xml(&self) -> Result<String, ReportError> {
        self.get_text(DOCUMENT_PART)
            .ok_or_else(|| ReportError::InvalidTemplate(format!("no {DOCUMENT_PART} found")))
    }
}

// ─── Text helpers ───────────────────────────────────────────────────────────

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Visible text of a paragraph: its `<w:t>` contents, unescaped.
pub fn paragraph_text(para_xml: &str) -> String {
    let raw: String = WT_RE
        .captures_iter(para_xml)
        .filter_map(|c| c.get(2).map(|m| m.as_str().to_string()))
        .collect();
    unescape_xml(&raw)
}

// ─── Structure scanning ─────────────────────────────────────────────────────

/// Byte range of one `<w:p>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParagraphSpan {
    pub start: usize,
    pub end: usize,
    /// No other paragraph nested inside (text boxes nest paragraphs).
    pub leaf: bool,
}

/// Every paragraph in document order (by start offset), nested ones included.
pub fn find_paragraphs(xml: &str) -> Vec<ParagraphSpan> {
    let mut spans = Vec::new();
    // (start offset, has nested paragraph)
    let mut stack: Vec<(usize, bool)> = Vec::new();

    for caps in PARA_TAG_RE.captures_iter(xml) {
        let m = caps.get(0).unwrap();
        let closing = !caps[1].is_empty();
        let self_closing = !caps[2].is_empty();

        if let Some(parent) = stack.last_mut() {
            if !closing {
                parent.1 = true;
            }
        }
        if self_closing {
            spans.push(ParagraphSpan {
                start: m.start(),
                end: m.end(),
                leaf: true,
            });
        } else if closing {
            if let Some((start, nested)) = stack.pop() {
                spans.push(ParagraphSpan {
                    start,
                    end: m.end(),
                    leaf: !nested,
                });
            }
        } else {
            stack.push((m.start(), false));
        }
    }
    spans.sort_by_key(|s| s.start);
    spans
}

/// Byte range of the content between `<w:body>` and `</w:body>`.
pub fn body_range(xml: &str) -> Option<(usize, usize)> {
    let open = xml.find("<w:body")?;
    let content_start = open + xml[open..].find('>')? + 1;
    let content_end = xml.rfind("</w:body>")?;
    (content_start <= content_end).then_some((content_start, content_end))
}

/// A direct child element of `<w:body>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyBlock {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

/// Direct children of the body in order (paragraphs, tables, section
/// properties, content controls, ...). Offsets are absolute.
pub fn body_blocks(xml: &str) -> Vec<BodyBlock> {
    let Some((start, end)) = body_range(xml) else {
        return Vec::new();
    };
    let body = &xml[start..end];
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<(String, usize)> = None;

    for caps in ANY_TAG_RE.captures_iter(body) {
        let m = caps.get(0).unwrap();
        let closing = !caps[1].is_empty();
        let self_closing = !caps[3].is_empty();
        let name = &caps[2];

        if closing {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                if let Some((block_name, block_start)) = open.take() {
                    blocks.push(BodyBlock {
                        name: block_name,
                        start: start + block_start,
                        end: start + m.end(),
                    });
                }
            }
        } else if self_closing {
            if depth == 0 {
                blocks.push(BodyBlock {
                    name: name.to_string(),
                    start: start + m.start(),
                    end: start + m.end(),
                });
            }
        } else {
            if depth == 0 {
                open = Some((name.to_string(), m.start()));
            }
            depth += 1;
        }
    }
    blocks
}

/// Offset where content appended "at the end" belongs: before the body-level
/// section properties, which must stay the last child of the body.
pub fn document_end_offset(xml: &str) -> Option<usize> {
    let (_, body_end) = body_range(xml)?;
    let blocks = body_blocks(xml);
    match blocks.last() {
        Some(last) if last.name == "w:sectPr" => Some(last.start),
        _ => Some(body_end),
    }
}

/// Highest `wp:docPr` id in use, so new drawings get unique ids.
pub fn max_drawing_id(xml: &str) -> u32 {
    DOCPR_ID_RE
        .captures_iter(xml)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

// ─── In-place text replacement ──────────────────────────────────────────────

/// Replace text across the `<w:t>` runs of one paragraph.
///
/// The paragraph's `<w:t>` contents are concatenated into a virtual string,
/// all rules are matched against it, and the result is distributed back into
/// the original elements: each replacement lands in the element holding the
/// first matched character and the rest of the match is removed from later
/// elements. Run formatting is untouched. Search and replacement strings
/// are raw (already escaped) XML text. Returns the new XML and the number
/// of replacements.
pub fn replace_in_paragraph(para_xml: &str, replacements: &[(String, String)]) -> (String, usize) {
    let wt_matches: Vec<(usize, usize, String)> = WT_RE
        .captures_iter(para_xml)
        .map(|caps| {
            let text = caps.get(2).unwrap();
            (text.start(), text.end(), text.as_str().to_string())
        })
        .collect();
    if wt_matches.is_empty() {
        return (para_xml.to_string(), 0);
    }

    // For every char of the virtual text: the <w:t> it came from
    let mut virtual_text: Vec<char> = Vec::new();
    let mut owner: Vec<usize> = Vec::new();
    for (idx, (_, _, text)) in wt_matches.iter().enumerate() {
        for ch in text.chars() {
            virtual_text.push(ch);
            owner.push(idx);
        }
    }

    // (start, end, replacement) over char positions, non-overlapping
    let mut modifications: Vec<(usize, usize, &str)> = Vec::new();
    for (search, replace) in replacements {
        if search.is_empty() {
            continue;
        }
        let needle: Vec<char> = search.chars().collect();
        let mut pos = 0;
        while pos + needle.len() <= virtual_text.len() {
            if virtual_text[pos..pos + needle.len()] == needle[..] {
                let end = pos + needle.len();
                let overlaps = modifications.iter().any(|(s, e, _)| pos < *e && end > *s);
                if !overlaps {
                    modifications.push((pos, end, replace.as_str()));
                }
                pos = end;
            } else {
                pos += 1;
            }
        }
    }
    if modifications.is_empty() {
        return (para_xml.to_string(), 0);
    }
    modifications.sort_by_key(|(s, _, _)| *s);

    let mut new_texts: Vec<String> = vec![String::new(); wt_matches.len()];
    let mut mods = modifications.iter().peekable();
    let mut i = 0;
    while i < virtual_text.len() {
        match mods.peek() {
            Some((start, end, replacement)) if *start == i => {
                new_texts[owner[i]].push_str(replacement);
                i = *end;
                mods.next();
            }
            _ => {
                new_texts[owner[i]].push(virtual_text[i]);
                i += 1;
            }
        }
    }

    let mut result = para_xml.to_string();
    for (idx, (start, end, old)) in wt_matches.iter().enumerate().rev() {
        if new_texts[idx] != *old {
            result.replace_range(*start..*end, &new_texts[idx]);
        }
    }
    let result = preserve_whitespace(&result);
    (result, modifications.len())
}

/// Mark every `<w:t>` as whitespace-preserving so spliced text keeps its
/// leading and trailing spaces.
fn preserve_whitespace(para_xml: &str) -> String {
    WT_RE
        .replace_all(para_xml, |caps: &regex::Captures| {
            let tag = &caps[1];
            if tag.contains("xml:space") {
                caps[0].to_string()
            } else {
                format!(r#"<w:t xml:space="preserve">{}</w:t>"#, &caps[2])
            }
        })
        .into_owned()
}

/// `<w:pPr>...</w:pPr>` of a paragraph, if it has one.
pub fn paragraph_properties(para_xml: &str) -> Option<&str> {
    let start = para_xml.find("<w:pPr")?;
    let rest = &para_xml[start..];
    if let Some(end) = rest.find("</w:pPr>") {
        return Some(&rest[..end + "</w:pPr>".len()]);
    }
    // self-closing <w:pPr/>
    rest.find("/>").map(|end| &rest[..end + 2])
}

/// Opening `<w:p ...>` tag of a paragraph.
pub fn paragraph_open_tag(para_xml: &str) -> &str {
    match para_xml.find('>') {
        Some(end) => {
            let tag = &para_xml[..=end];
            tag.strip_suffix("/>")
                .map(|_| "<w:p>")
                .unwrap_or(tag)
        }
        None => "<w:p>",
    }
}

// ─── Package bookkeeping ────────────────────────────────────────────────────

/// Append relationship entries to `document.xml.rels`.
pub fn add_relationships(rels_xml: &str, rels: &[(String, String, String)]) -> Result<String, ReportError> {
    if rels.is_empty() {
        return Ok(rels_xml.to_string());
    }
    let close = rels_xml.rfind("</Relationships>").ok_or_else(|| {
        ReportError::InvalidTemplate(format!("no </Relationships> in {DOCUMENT_RELS_PART}"))
    })?;
    let mut result = String::with_capacity(rels_xml.len() + rels.len() * 160);
    result.push_str(&rels_xml[..close]);
    for (id, rel_type, target) in rels {
        result.push_str(&format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
            id,
            rel_type,
            escape_xml(target)
        ));
    }
    result.push_str(&rels_xml[close..]);
    Ok(result)
}

/// Make sure `[Content_Types].xml` declares each image extension.
pub fn ensure_content_types(types_xml: &str, extensions: &[&str]) -> Result<String, ReportError> {
    let close = types_xml.rfind("</Types>").ok_or_else(|| {
        ReportError::InvalidTemplate(format!("no </Types> in {CONTENT_TYPES_PART}"))
    })?;
    let mut additions = String::new();
    for ext in extensions {
        let declared = format!(r#"Extension="{ext}""#);
        let declared_upper = format!(r#"Extension="{}""#, ext.to_uppercase());
        if types_xml.contains(&declared)
            || types_xml.contains(&declared_upper)
            || additions.contains(&declared)
        {
            continue;
        }
        let content_type = match *ext {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            _ => "application/octet-stream",
        };
        additions.push_str(&format!(
            r#"<Default Extension="{ext}" ContentType="{content_type}"/>"#
        ));
    }
    let mut result = String::with_capacity(types_xml.len() + additions.len());
    result.push_str(&types_xml[..close]);
    result.push_str(&additions);
    result.push_str(&types_xml[close..]);
    Ok(result)
}
