//! Line classification and section/table assembly over decoded page text

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{SectionType, TableType};

/// Separates pages in raw text
pub const PAGE_BREAK: char = '\x0C';

const MAX_HEADING_CHARS: usize = 100;
const MAX_CAPS_HEADING_CHARS: usize = 80;
const MAX_NUMBERED_HEADING_WORDS: usize = 10;

/// Titles that open a section even without numbering
pub const KNOWN_TITLES: &[&str] = &[
    "introduction",
    "executive summary",
    "overview",
    "background",
    "conclusion",
    "summary",
    "appendix",
    "self-study",
    "self study",
];

static KEYWORD_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(standard|part|chapter|section)\s+(\d+|[ivx]+)\b").expect("Invalid regex")
});
static NUMBERED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)*[.)]?\s+\S").expect("Invalid regex"));
static ROMAN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[IVX]+\.\s+\S").expect("Invalid regex"));
static LETTERED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-H][.)]\s+[A-Z]").expect("Invalid regex"));
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([-*\u{2022}\u{25AA}\u{25E6}]|[a-z][.)])\s+").expect("Invalid regex"));

/// What a single line of text looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Heading,
    Paragraph,
    ListItem,
    TableRow,
    Blank,
}

fn word_count(line: &str) -> usize {
    line.split_whitespace().count()
}

fn is_all_caps(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3
        && letters.iter().all(|c| c.is_uppercase())
        && line.chars().count() < MAX_CAPS_HEADING_CHARS
}

/// Known title, optionally followed by a short qualifier ("Appendix B")
pub fn known_title(line: &str) -> bool {
    let lower = line.trim().trim_end_matches(':').to_lowercase();
    word_count(&lower) <= 6
        && KNOWN_TITLES
            .iter()
            .any(|t| lower == *t || lower.starts_with(&format!("{} ", t)) || lower.starts_with(&format!("{}:", t)))
}

/// Heading test over a trimmed line
pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    if line.ends_with(',') || line.ends_with(';') {
        return false;
    }
    let sentence_end = line.ends_with('.');

    if KEYWORD_HEADING.is_match(line) && !sentence_end && word_count(line) <= 14 {
        return true;
    }
    if NUMBERED_HEADING.is_match(line) && !sentence_end && word_count(line) <= MAX_NUMBERED_HEADING_WORDS {
        return true;
    }
    if (ROMAN_HEADING.is_match(line) || LETTERED_HEADING.is_match(line))
        && !sentence_end
        && word_count(line) <= MAX_NUMBERED_HEADING_WORDS
    {
        return true;
    }
    if known_title(line) {
        return true;
    }
    is_all_caps(line) && !sentence_end
}

/// Split a line into tab-delimited cells
pub fn table_cells(line: &str) -> Vec<String> {
    line.split('\t').map(|c| c.trim().to_string()).collect()
}

fn is_table_line(line: &str) -> bool {
    line.contains('\t') && table_cells(line).iter().filter(|c| !c.is_empty()).count() >= 2
}

pub fn classify_line(line: &str) -> LineKind {
    if line.trim().is_empty() {
        return LineKind::Blank;
    }
    if is_table_line(line) {
        return LineKind::TableRow;
    }
    let trimmed = line.trim();
    if LIST_ITEM.is_match(trimmed) {
        return LineKind::ListItem;
    }
    if is_heading(trimmed) {
        return LineKind::Heading;
    }
    LineKind::Paragraph
}

/// Structural unit of a document, in reading order
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading {
        text: String,
        page: u32,
        start: usize,
        end: usize,
    },
    Paragraph {
        text: String,
        page: u32,
        start: usize,
        end: usize,
    },
    ListItem {
        text: String,
        page: u32,
        start: usize,
        end: usize,
    },
    Table {
        rows: Vec<Vec<String>>,
        page: u32,
        start: usize,
        end: usize,
    },
}

impl Block {
    pub fn page(&self) -> u32 {
        match self {
            Self::Heading { page, .. }
            | Self::Paragraph { page, .. }
            | Self::ListItem { page, .. }
            | Self::Table { page, .. } => *page,
        }
    }

    pub fn span(&self) -> (usize, usize) {
        match self {
            Self::Heading { start, end, .. }
            | Self::Paragraph { start, end, .. }
            | Self::ListItem { start, end, .. }
            | Self::Table { start, end, .. } => (*start, *end),
        }
    }
}

/// Walk raw text (pages separated by [`PAGE_BREAK`]) into blocks.
///
/// Runs of two or more table-like lines become one table; a lone table-like
/// line is kept as a paragraph.
pub fn blocks(raw_text: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let mut page = 1u32;
    let mut offset = 0usize;
    let mut pending_rows: Vec<(String, usize, usize)> = Vec::new();
    let mut table_page = 1u32;

    let flush_rows = |rows: &mut Vec<(String, usize, usize)>, page: u32, out: &mut Vec<Block>| {
        match rows.len() {
            0 => {}
            1 => {
                let (text, start, end) = rows.remove(0);
                out.push(Block::Paragraph {
                    text: text.split('\t').map(str::trim).filter(|c| !c.is_empty()).collect::<Vec<_>>().join(" "),
                    page,
                    start,
                    end,
                });
            }
            _ => {
                let start = rows[0].1;
                let end = rows[rows.len() - 1].2;
                out.push(Block::Table {
                    rows: rows.iter().map(|(line, _, _)| table_cells(line)).collect(),
                    page,
                    start,
                    end,
                });
                rows.clear();
            }
        }
    };

    for (page_index, page_text) in raw_text.split(PAGE_BREAK).enumerate() {
        if page_index > 0 {
            // page break marker is one byte
            offset += 1;
            page += 1;
        }
        for line in page_text.split('\n') {
            let start = offset;
            let end = start + line.len();
            offset = end + 1;

            match classify_line(line) {
                LineKind::TableRow => {
                    if pending_rows.is_empty() {
                        table_page = page;
                    }
                    pending_rows.push((line.to_string(), start, end));
                    continue;
                }
                kind => {
                    flush_rows(&mut pending_rows, table_page, &mut out);
                    let text = line.trim().to_string();
                    match kind {
                        LineKind::Blank | LineKind::TableRow => {}
                        LineKind::Heading => out.push(Block::Heading { text, page, start, end }),
                        LineKind::ListItem => out.push(Block::ListItem { text, page, start, end }),
                        LineKind::Paragraph => out.push(Block::Paragraph { text, page, start, end }),
                    }
                }
            }
        }
        // the last line of a page has no trailing newline
        offset = offset.saturating_sub(1);
        flush_rows(&mut pending_rows, table_page, &mut out);
    }
    flush_rows(&mut pending_rows, table_page, &mut out);
    out
}

/// Section assembled from blocks
#[derive(Debug, Clone, PartialEq)]
pub struct SectionDraft {
    pub heading: Option<String>,
    pub content: String,
    pub page: u32,
    pub start: usize,
    pub end: usize,
    pub section_type: SectionType,
    /// Set when this section carries a table
    pub table: Option<TableDraft>,
}

/// Table assembled from a run of tab-delimited lines
#[derive(Debug, Clone, PartialEq)]
pub struct TableDraft {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub table_type: TableType,
}

#[derive(Default)]
struct OpenSection {
    heading: Option<String>,
    /// Headings that had no body of their own
    folded: Vec<String>,
    lines: Vec<String>,
    page: u32,
    start: usize,
    end: usize,
}

impl OpenSection {
    fn is_empty(&self) -> bool {
        self.heading.is_none() && self.folded.is_empty() && self.lines.is_empty()
    }

    fn into_draft(self) -> Option<SectionDraft> {
        let mut lines = self.folded;
        lines.extend(self.lines);
        let content = lines.join("\n").trim().to_string();
        let content = if content.is_empty() {
            // trailing heading with nothing after it
            self.heading.clone()?
        } else {
            content
        };
        let section_type = section_type(self.heading.as_deref(), &content);
        Some(SectionDraft {
            heading: self.heading,
            content,
            page: self.page.max(1),
            start: self.start,
            end: self.end,
            section_type,
            table: None,
        })
    }
}

/// Group blocks into sections. Sections start at headings; a heading with no
/// body is folded into the next section's content as its first line.
pub fn sections(blocks: &[Block]) -> Vec<SectionDraft> {
    let mut out = Vec::new();
    let mut open = OpenSection::default();

    for block in blocks {
        let (start, end) = block.span();
        match block {
            Block::Heading { text, page, .. } => {
                if open.lines.is_empty() {
                    if let Some(previous) = open.heading.take() {
                        open.folded.push(previous);
                    }
                    if open.folded.is_empty() {
                        open.page = *page;
                        open.start = start;
                    }
                } else {
                    let finished = std::mem::take(&mut open);
                    out.extend(finished.into_draft());
                    open.page = *page;
                    open.start = start;
                }
                open.heading = Some(text.clone());
                open.end = end;
            }
            Block::Paragraph { text, page, .. } | Block::ListItem { text, page, .. } => {
                if open.is_empty() {
                    open.page = *page;
                    open.start = start;
                }
                open.lines.push(text.clone());
                open.end = end;
            }
            Block::Table { rows, page, .. } => {
                // a heading waiting for a body becomes the table's heading
                let heading = if open.lines.is_empty() {
                    let heading = open.heading.take();
                    if !open.folded.is_empty() {
                        let finished = std::mem::take(&mut open);
                        out.extend(finished.into_draft());
                    }
                    heading
                } else {
                    let finished = std::mem::take(&mut open);
                    out.extend(finished.into_draft());
                    None
                };
                out.push(table_section(heading, rows, *page, start, end));
                open = OpenSection::default();
            }
        }
    }
    if !open.is_empty() {
        out.extend(open.into_draft());
    }
    out
}

fn table_section(heading: Option<String>, rows: &[Vec<String>], page: u32, start: usize, end: usize) -> SectionDraft {
    let headers = rows.first().cloned().unwrap_or_default();
    let body: Vec<Vec<String>> = rows.iter().skip(1).cloned().collect();
    let table_type = classify_table(&headers, &body);
    let content = rows
        .iter()
        .map(|r| r.join("\t"))
        .collect::<Vec<_>>()
        .join("\n");
    let section_type = if table_type == TableType::CurriculumMatrix {
        SectionType::Matrix
    } else {
        SectionType::Table
    };

    SectionDraft {
        heading,
        content,
        page,
        start,
        end,
        section_type,
        table: Some(TableDraft {
            headers,
            rows: body,
            table_type,
        }),
    }
}

static SYLLABUS_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(syllabus|course description|course objectives|required texts?|office hours)\b")
        .expect("Invalid regex")
});
static CV_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(curriculum vitae|c\.v\.|resume|publications|professional experience)\b")
        .expect("Invalid regex")
});
static FORM_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(_{4,}|\bsignature\b|\bdate signed\b|\[\s?\]|\u{2610})").expect("Invalid regex")
});

/// Keyword heuristics; anything unrecognised is narrative
pub fn section_type(heading: Option<&str>, content: &str) -> SectionType {
    let text = match heading {
        Some(h) => format!("{}\n{}", h, content),
        None => content.to_string(),
    };
    if SYLLABUS_HINT.find_iter(&text).count() >= 2
        || heading.is_some_and(|h| h.to_lowercase().contains("syllabus"))
    {
        return SectionType::Syllabus;
    }
    if CV_HINT.find_iter(&text).count() >= 2
        || heading.is_some_and(|h| h.to_lowercase().contains("curriculum vitae"))
    {
        return SectionType::Cv;
    }
    if FORM_HINT.find_iter(&text).count() >= 2 {
        return SectionType::Form;
    }
    SectionType::Narrative
}

enum TablePattern {
    /// Matched against the whole table text
    Text(Regex),
    /// Matched against individual cells
    Cell(Regex),
}

fn text(pattern: &str) -> TablePattern {
    TablePattern::Text(Regex::new(pattern).expect("Invalid regex"))
}

fn cell(pattern: &str) -> TablePattern {
    TablePattern::Cell(Regex::new(pattern).expect("Invalid regex"))
}

/// Keyword-pattern sets per table type, in tie-break order
static TABLE_PATTERNS: Lazy<Vec<(TableType, Vec<TablePattern>)>> = Lazy::new(|| {
    vec![
        (
            TableType::CurriculumMatrix,
            vec![
                text(r"(?i)\bcourses?\b"),
                text(r"(?i)\b(standards?|competenc(y|ies)|outcomes?)\b"),
                text(r"(?i)\b(coverage|alignment|map(ping)?)\b"),
                text(r"(?i)\b(introduc(ed|e)|reinforc(ed|e)|master(ed|y)?)\b"),
                cell(r"^[IRMHE](/[IRMHE])*$"),
            ],
        ),
        (
            TableType::GradingScale,
            vec![
                text(r"(?i)\bgrades?\b"),
                text(r"(?i)(\bpercent(age)?\b|%)"),
                text(r"(?i)\bpoints?\b"),
                text(r"(?i)\bscale\b"),
                cell(r"^[A-DF][+-]?$"),
            ],
        ),
        (
            TableType::Schedule,
            vec![
                text(r"(?i)\bweeks?\b"),
                text(r"(?i)\bdates?\b"),
                text(r"(?i)\btopics?\b"),
                text(r"(?i)\bsessions?\b"),
                text(r"(?i)\b(monday|tuesday|wednesday|thursday|friday)\b"),
                text(r"(?i)\b(assignments?|readings?)\b"),
            ],
        ),
        (
            TableType::CourseList,
            vec![
                text(r"(?i)\bcourses?\b"),
                text(r"(?i)\bcredits?( hours?)?\b"),
                text(r"(?i)\btitles?\b"),
                text(r"(?i)\bprerequisites?\b"),
                cell(r"^[A-Z]{2,4}\s?\d{3,4}[A-Z]?$"),
            ],
        ),
    ]
});

/// A type needs at least this many distinct pattern hits
const MIN_TABLE_HITS: usize = 2;

/// Best-scoring table type; ties go to the earlier type
pub fn classify_table(headers: &[String], rows: &[Vec<String>]) -> TableType {
    let cells: Vec<&str> = headers
        .iter()
        .chain(rows.iter().flatten())
        .map(|c| c.as_str())
        .collect();
    let all_text = cells.join(" ");

    let mut best = (TableType::Unknown, 0usize);
    for (table_type, patterns) in TABLE_PATTERNS.iter() {
        let hits = patterns
            .iter()
            .filter(|p| match p {
                TablePattern::Text(re) => re.is_match(&all_text),
                TablePattern::Cell(re) => cells.iter().any(|c| re.is_match(c)),
            })
            .count();
        if hits >= MIN_TABLE_HITS && hits > best.1 {
            best = (*table_type, hits);
        }
    }
    best.0
}
