//! PDF / DOCX / PPTX decoding into sections, tables and heading-tagged HTML

use quick_xml::events::{BytesStart, Event};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use super::html;
use super::structure::{self, PAGE_BREAK};
use crate::error::{Error, Result};
use crate::mapping::PatternMatcher;
use crate::types::{ExtractedSection, ExtractedTable, FileType, SectionOrigin};

/// Glyph names some PDF fonts leave in extracted text
const GLYPH_NAMES: &[(&str, char)] = &[
    ("uni2010", '\u{2010}'),
    ("uni2011", '\u{2011}'),
    ("uni2012", '\u{2012}'),
    ("uni2013", '\u{2013}'),
    ("uni2014", '\u{2014}'),
    ("uni2015", '\u{2015}'),
    ("uni2018", '\u{2018}'),
    ("uni2019", '\u{2019}'),
    ("uni201A", '\u{201A}'),
    ("uni201C", '\u{201C}'),
    ("uni201D", '\u{201D}'),
    ("uni201E", '\u{201E}'),
    ("uni2022", '\u{2022}'),
    ("uni2026", '\u{2026}'),
    ("uni00A0", '\u{00A0}'),
    ("uni2002", '\u{2002}'),
    ("uni2003", '\u{2003}'),
    ("uni2009", '\u{2009}'),
    ("uni2212", '\u{2212}'),
    ("uni00D7", '\u{00D7}'),
    ("uni00A9", '\u{00A9}'),
    ("uni00AE", '\u{00AE}'),
    ("uni2122", '\u{2122}'),
];

/// Ligature glyph names, only replaced in bracketed form
const LIGATURE_NAMES: &[(&str, &str)] = &[
    ("ffi", "ffi"),
    ("ffl", "ffl"),
    ("f_f_i", "ffi"),
    ("f_f_l", "ffl"),
    ("fi", "fi"),
    ("fl", "fl"),
    ("ff", "ff"),
    ("f_i", "fi"),
    ("f_l", "fl"),
    ("f_f", "ff"),
];

/// Typographic characters folded to ASCII before line classification
const ASCII_FOLDS: &[(char, &str)] = &[
    ('\u{2010}', "-"),
    ('\u{2011}', "-"),
    ('\u{2013}', "-"),
    ('\u{2014}', "--"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2022}', "* "),
    ('\u{2026}', "..."),
    ('\u{00A0}', " "),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB00}', "ff"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
];

/// Replace leftover glyph names and fold typographic characters
fn cleanup_pdf_text(text: &str) -> String {
    let mut result = text.replace('\0', "");

    for (name, ch) in GLYPH_NAMES {
        for pattern in [format!("({})", name), format!("<{}>", name), name.to_string()] {
            if result.contains(&pattern) {
                result = result.replace(&pattern, &ch.to_string());
            }
        }
    }
    for (name, letters) in LIGATURE_NAMES {
        for pattern in [format!("({})", name), format!("<{}>", name)] {
            if result.contains(&pattern) {
                result = result.replace(&pattern, letters);
            }
        }
    }
    for (ch, ascii) in ASCII_FOLDS {
        if result.contains(*ch) {
            result = result.replace(*ch, ascii);
        }
    }
    result
}

/// Trim lines and drop blank ones within a single page
fn tidy_page(text: &str) -> String {
    text.lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 of raw bytes, lowercase hex
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Facts about the parsed document
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub file_type: FileType,
    pub filename: String,
    /// Always at least 1
    pub page_count: u32,
    pub word_count: usize,
    /// SHA-256 of the uploaded bytes
    pub content_hash: String,
    /// First detected heading
    pub title: Option<String>,
}

/// Parser output. Sections and tables carry a nil import id until
/// [`ParsedDocument::bind_to`] is called.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub metadata: DocumentMetadata,
    pub sections: Vec<ExtractedSection>,
    pub tables: Vec<ExtractedTable>,
    /// Decoded text, pages separated by a form feed
    pub raw_text: String,
    pub html_content: String,
}

impl ParsedDocument {
    /// Attach every section and table to an import
    pub fn bind_to(&mut self, import_id: Uuid) {
        for section in &mut self.sections {
            section.import_id = import_id;
        }
        for table in &mut self.tables {
            table.import_id = import_id;
        }
    }
}

/// Decoded text, one entry per page
struct DecodedPages {
    pages: Vec<String>,
}

impl DecodedPages {
    fn page_count(&self) -> u32 {
        (self.pages.len() as u32).max(1)
    }

    fn raw_text(&self) -> String {
        let separator = PAGE_BREAK.to_string();
        self.pages.join(separator.as_str())
    }
}

/// Document parser for self-study uploads
pub struct DocumentParser {
    matcher: Arc<PatternMatcher>,
    pdf_timeout: Duration,
}

impl DocumentParser {
    pub fn new(matcher: Arc<PatternMatcher>) -> Self {
        Self {
            matcher,
            pdf_timeout: Duration::from_secs(60),
        }
    }

    /// Bound on the whole-document PDF fallback extraction
    pub fn with_pdf_timeout(mut self, timeout: Duration) -> Self {
        self.pdf_timeout = timeout;
        self
    }

    /// Parse an upload by its extension
    pub fn parse(&self, filename: &str, data: &[u8]) -> Result<ParsedDocument> {
        let file_type = FileType::from_filename(filename);
        if let Some(reason) = file_type.unsupported_reason() {
            return Err(Error::UnsupportedFormat(format!("{} - {}", filename, reason)));
        }

        let decoded = match file_type {
            FileType::Pdf => self.decode_pdf(filename, data)?,
            FileType::Docx => decode_docx(filename, data)?,
            FileType::Pptx => decode_pptx(filename, data)?,
            other => {
                return Err(Error::UnsupportedFormat(format!(
                    "{} - {}",
                    filename,
                    other.display_name()
                )))
            }
        };

        let raw_text = decoded.raw_text();
        let blocks = structure::blocks(&raw_text);
        let html_content = html::render(&blocks);

        let mut sections = Vec::new();
        let mut tables = Vec::new();
        for draft in structure::sections(&blocks) {
            let mut section = ExtractedSection::new(
                Uuid::nil(),
                SectionOrigin::Parser,
                draft.section_type,
                draft.content,
            );
            section.page_number = draft.page;
            section.span_start = draft.start;
            section.span_end = draft.end;
            section.heading = draft.heading;

            if let Some(best) = self.matcher.best(&section.scoring_text()) {
                section.confidence = best.score;
                section.suggested_standard = Some(best.standard_code);
            }

            if let Some(table) = draft.table {
                tables.push(ExtractedTable {
                    id: Uuid::new_v4(),
                    import_id: Uuid::nil(),
                    section_id: section.id,
                    page_number: section.page_number,
                    headers: table.headers,
                    rows: table.rows,
                    table_type: table.table_type,
                });
            }
            sections.push(section);
        }

        let title = sections.iter().find_map(|s| s.heading.clone());
        let metadata = DocumentMetadata {
            file_type,
            filename: filename.to_string(),
            page_count: decoded.page_count(),
            word_count: raw_text.unicode_words().count(),
            content_hash: hash_bytes(data),
            title,
        };

        tracing::debug!(
            "[{}] parsed {} pages, {} sections, {} tables",
            filename,
            metadata.page_count,
            sections.len(),
            tables.len()
        );

        Ok(ParsedDocument {
            metadata,
            sections,
            tables,
            raw_text,
            html_content,
        })
    }

    /// Per-page text through lopdf, whole-document pdf-extract when that
    /// yields nothing
    fn decode_pdf(&self, filename: &str, data: &[u8]) -> Result<DecodedPages> {
        let doc = lopdf::Document::load_mem(data)
            .map_err(|e| Error::parse(filename, format!("Failed to load PDF: {}", e)))?;

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let mut pages = Vec::with_capacity(page_numbers.len());
        for number in &page_numbers {
            match doc.extract_text(&[*number]) {
                Ok(text) => pages.push(tidy_page(&cleanup_pdf_text(&text))),
                Err(e) => {
                    tracing::debug!("[{}] no text on page {}: {}", filename, number, e);
                    pages.push(String::new());
                }
            }
        }

        if pages.iter().all(|p| p.trim().is_empty()) {
            tracing::warn!("[{}] per-page extraction empty, trying pdf-extract", filename);
            if let Some(text) = self.extract_pdf_with_timeout(filename, data) {
                let text = tidy_page(&cleanup_pdf_text(&text));
                if !text.is_empty() {
                    // no page boundaries from the fallback; keep the page count
                    let blanks = page_numbers.len().saturating_sub(1);
                    pages = std::iter::once(text)
                        .chain(std::iter::repeat(String::new()).take(blanks))
                        .collect();
                }
            }
        }

        Ok(DecodedPages { pages })
    }

    /// pdf-extract on a separate thread so problematic fonts cannot hang the job
    fn extract_pdf_with_timeout(&self, filename: &str, data: &[u8]) -> Option<String> {
        use std::sync::mpsc;
        use std::thread;

        let data = data.to_vec();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(pdf_extract::extract_text_from_mem(&data));
        });

        match rx.recv_timeout(self.pdf_timeout) {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                tracing::warn!("[{}] pdf-extract failed: {}", filename, e);
                None
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::error!(
                    "[{}] pdf-extract timed out after {:?}",
                    filename,
                    self.pdf_timeout
                );
                None
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("[{}] pdf-extract thread crashed", filename);
                None
            }
        }
    }
}

fn open_archive<'a>(
    filename: &str,
    data: &'a [u8],
) -> Result<zip::ZipArchive<std::io::Cursor<&'a [u8]>>> {
    zip::ZipArchive::new(std::io::Cursor::new(data))
        .map_err(|e| Error::parse(filename, format!("not a valid archive: {}", e)))
}

fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    filename: &str,
    entry: &str,
) -> Result<String> {
    let mut file = archive
        .by_name(entry)
        .map_err(|_| Error::parse(filename, format!("missing {}", entry)))?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| Error::parse(filename, format!("unreadable {}: {}", entry, e)))?;
    Ok(xml)
}

fn decode_docx(filename: &str, data: &[u8]) -> Result<DecodedPages> {
    let mut archive = open_archive(filename, data)?;
    let xml = read_entry(&mut archive, filename, "word/document.xml")?;
    let pages = walk_ooxml(&xml).map_err(|e| Error::parse(filename, e))?;
    Ok(DecodedPages { pages })
}

/// One page per slide, in slide order
fn decode_pptx(filename: &str, data: &[u8]) -> Result<DecodedPages> {
    let mut archive = open_archive(filename, data)?;

    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(0)
    });

    let mut pages = Vec::with_capacity(slide_names.len());
    for name in &slide_names {
        let xml = read_entry(&mut archive, filename, name)?;
        let slide = walk_ooxml(&xml).map_err(|e| Error::parse(filename, e))?;
        pages.push(tidy_page(&slide.join("\n")));
    }
    Ok(DecodedPages { pages })
}

fn is_page_break(e: &BytesStart<'_>) -> bool {
    e.attributes()
        .flatten()
        .any(|a| a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page")
}

/// Accumulates WordprocessingML / DrawingML text into pages of lines
#[derive(Default)]
struct OoxmlText {
    pages: Vec<Vec<String>>,
    paragraph: String,
    table_depth: usize,
    row: Vec<String>,
    cell: String,
    in_text: bool,
    /// Inside `w:r` / `a:r`; tab stops in paragraph properties are not text
    run_depth: usize,
}

impl OoxmlText {
    fn current_page(&mut self) -> &mut Vec<String> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn end_line(&mut self) {
        let line = std::mem::take(&mut self.paragraph);
        if self.table_depth > 0 {
            let line = line.trim();
            if !line.is_empty() {
                if !self.cell.is_empty() {
                    self.cell.push(' ');
                }
                self.cell.push_str(line);
            }
        } else if !line.trim().is_empty() {
            self.current_page().push(line.trim_end().to_string());
        }
    }

    /// Consecutive breaks collapse into one
    fn page_break(&mut self) {
        self.end_line();
        if !self.current_page().is_empty() {
            self.pages.push(Vec::new());
        }
    }

    fn start(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"tbl" => self.table_depth += 1,
            b"tr" if self.table_depth == 1 => self.row.clear(),
            b"tc" if self.table_depth == 1 => self.cell.clear(),
            b"t" => self.in_text = true,
            b"r" => self.run_depth += 1,
            _ => {}
        }
    }

    fn empty(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"tab" if self.run_depth > 0 => {
                self.paragraph.push(if self.table_depth > 0 { ' ' } else { '\t' })
            }
            b"br" if is_page_break(e) => self.page_break(),
            b"br" | b"cr" => self.end_line(),
            b"lastRenderedPageBreak" => self.page_break(),
            _ => {}
        }
    }

    fn end(&mut self, local_name: &[u8]) {
        match local_name {
            b"t" => self.in_text = false,
            b"r" => self.run_depth = self.run_depth.saturating_sub(1),
            b"p" => self.end_line(),
            b"tc" if self.table_depth == 1 => {
                self.end_line();
                let cell = std::mem::take(&mut self.cell);
                self.row.push(cell.trim().to_string());
            }
            b"tr" if self.table_depth == 1 => {
                let row = std::mem::take(&mut self.row);
                if row.iter().any(|c| !c.is_empty()) {
                    self.current_page().push(row.join("\t"));
                }
            }
            b"tbl" => self.table_depth = self.table_depth.saturating_sub(1),
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.end_line();
        let mut pages: Vec<String> = self.pages.into_iter().map(|lines| lines.join("\n")).collect();
        if pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
            pages.pop();
        }
        pages
    }
}

/// Walk an OOXML part into pages of lines. Table rows become tab-delimited
/// lines; nested tables flatten into their enclosing cell.
fn walk_ooxml(xml: &str) -> std::result::Result<Vec<String>, String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut text = OoxmlText::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => text.start(&e),
            Ok(Event::Empty(e)) => text.empty(&e),
            Ok(Event::Text(e)) if text.in_text => {
                let value = e
                    .unescape()
                    .map_err(|err| format!("bad text at {}: {}", reader.buffer_position(), err))?;
                text.paragraph.push_str(&value);
            }
            Ok(Event::End(e)) => text.end(e.local_name().as_ref()),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "malformed XML at {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
    }
    Ok(text.finish())
}
