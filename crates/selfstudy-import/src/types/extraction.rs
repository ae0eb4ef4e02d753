//! Sections and tables extracted from an uploaded document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Heuristic kind of an extracted section
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Narrative,
    Table,
    Matrix,
    Syllabus,
    Cv,
    Form,
    Unknown,
}

impl SectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Narrative => "narrative",
            Self::Table => "table",
            Self::Matrix => "matrix",
            Self::Syllabus => "syllabus",
            Self::Cv => "cv",
            Self::Form => "form",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "narrative" => Self::Narrative,
            "table" => Self::Table,
            "matrix" => Self::Matrix,
            "syllabus" => Self::Syllabus,
            "cv" => Self::Cv,
            "form" => Self::Form,
            _ => Self::Unknown,
        }
    }
}

/// Where a section came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionOrigin {
    /// Produced by the local document parser
    Parser,
    /// Delivered by an external classifier callback
    External,
}

impl SectionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parser => "parser",
            Self::External => "external",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "external" => Self::External,
            _ => Self::Parser,
        }
    }
}

/// A unit of narrative content belonging to exactly one import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSection {
    pub id: Uuid,
    pub import_id: Uuid,
    pub origin: SectionOrigin,
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Byte offsets into the parsed raw text
    pub span_start: usize,
    pub span_end: usize,
    pub section_type: SectionType,
    pub heading: Option<String>,
    pub content: String,
    /// Detection confidence (0.0-1.0)
    pub confidence: f32,
    pub suggested_standard: Option<String>,
    /// Identifier supplied by the external classifier, used for dedupe
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExtractedSection {
    pub fn new(import_id: Uuid, origin: SectionOrigin, section_type: SectionType, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            import_id,
            origin,
            page_number: 1,
            span_start: 0,
            span_end: content.len(),
            section_type,
            heading: None,
            content,
            confidence: 0.0,
            suggested_standard: None,
            external_ref: None,
            created_at: Utc::now(),
        }
    }

    /// Heading and body together, as scored by the pattern matcher
    pub fn scoring_text(&self) -> String {
        match &self.heading {
            Some(heading) if !heading.is_empty() => format!("{}\n{}", heading, self.content),
            _ => self.content.clone(),
        }
    }

    /// First `max_chars` characters of the content
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.content.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head.trim_end())
        } else {
            head
        }
    }
}

/// Detected table kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    CurriculumMatrix,
    GradingScale,
    Schedule,
    CourseList,
    Unknown,
}

impl TableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurriculumMatrix => "curriculum_matrix",
            Self::GradingScale => "grading_scale",
            Self::Schedule => "schedule",
            Self::CourseList => "course_list",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "curriculum_matrix" => Self::CurriculumMatrix,
            "grading_scale" => Self::GradingScale,
            "schedule" => Self::Schedule,
            "course_list" => Self::CourseList,
            _ => Self::Unknown,
        }
    }
}

/// A table extracted from the document. Row 0 of the source is `headers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub id: Uuid,
    pub import_id: Uuid,
    /// The section carrying this table's text
    pub section_id: Uuid,
    pub page_number: u32,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub table_type: TableType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let section = ExtractedSection::new(
            Uuid::new_v4(),
            SectionOrigin::Parser,
            SectionType::Narrative,
            "Évaluation of program outcomes".to_string(),
        );
        assert_eq!(section.preview(10), "Évaluation...");
        assert_eq!(section.preview(100), "Évaluation of program outcomes");
    }

    #[test]
    fn test_scoring_text_includes_heading() {
        let mut section = ExtractedSection::new(
            Uuid::new_v4(),
            SectionOrigin::Parser,
            SectionType::Narrative,
            "Body".to_string(),
        );
        section.heading = Some("Standard 3".to_string());
        assert_eq!(section.scoring_text(), "Standard 3\nBody");
    }
}
