//! Local, synchronous section mapper used when no external classifier is configured

use std::sync::Arc;

use super::patterns::PatternMatcher;
use crate::types::{
    AlternativeMatch, ExtractedSection, ExtractedTable, MappingSuggestion, TableType,
    DEFAULT_FIELD_TYPE,
};

/// Below this a pattern score is not a suggestion at all
pub const MIN_SUGGESTION_SCORE: f32 = 0.2;

const MAX_ALTERNATIVES: usize = 2;
const MATRIX_CONFIDENCE: f32 = 0.9;
const SYLLABUS_TABLE_CONFIDENCE: f32 = 0.7;

pub const FIELD_MATRIX: &str = "matrix";
pub const FIELD_SYLLABUS_GRADING: &str = "syllabus_grading";
pub const FIELD_SYLLABUS_SCHEDULE: &str = "syllabus_schedule";

/// Turns extracted sections and tables into confidence-scored suggestions
pub struct LocalSectionMapper {
    matcher: Arc<PatternMatcher>,
}

impl LocalSectionMapper {
    pub fn new(matcher: Arc<PatternMatcher>) -> Self {
        Self { matcher }
    }

    /// Suggest a standard for a narrative section
    pub fn map_section(&self, section: &ExtractedSection) -> MappingSuggestion {
        let mut scores = self.matcher.score(&section.scoring_text()).into_iter();

        let Some(top) = scores.next().filter(|s| s.score >= MIN_SUGGESTION_SCORE) else {
            return MappingSuggestion::none(section.id, "no pattern found");
        };

        let alternatives = scores
            .filter(|s| s.score > MIN_SUGGESTION_SCORE)
            .take(MAX_ALTERNATIVES)
            .map(|s| AlternativeMatch {
                standard_code: s.standard_code,
                spec_code: s.spec_code,
                confidence: s.score,
            })
            .collect();

        MappingSuggestion {
            extracted_section_id: section.id,
            reason: format!("low confidence ({:.2}) for standard {}", top.score, top.standard_code),
            standard_code: Some(top.standard_code),
            spec_code: top.spec_code,
            field_type: DEFAULT_FIELD_TYPE.to_string(),
            confidence: top.score,
            alternatives,
        }
    }

    /// Route a table by its detected type
    pub fn map_table(&self, table: &ExtractedTable) -> MappingSuggestion {
        let taxonomy = self.matcher.taxonomy();
        let (standard, field, confidence) = match table.table_type {
            TableType::CurriculumMatrix => {
                (&taxonomy.curriculum_standard, FIELD_MATRIX, MATRIX_CONFIDENCE)
            }
            TableType::GradingScale => (
                &taxonomy.syllabus_standard,
                FIELD_SYLLABUS_GRADING,
                SYLLABUS_TABLE_CONFIDENCE,
            ),
            TableType::Schedule => (
                &taxonomy.syllabus_standard,
                FIELD_SYLLABUS_SCHEDULE,
                SYLLABUS_TABLE_CONFIDENCE,
            ),
            TableType::CourseList | TableType::Unknown => {
                return MappingSuggestion::none(
                    table.section_id,
                    format!("table type not recognized ({})", table.table_type.as_str()),
                );
            }
        };

        MappingSuggestion {
            extracted_section_id: table.section_id,
            standard_code: Some(standard.clone()),
            spec_code: None,
            field_type: field.to_string(),
            confidence,
            reason: format!("low confidence ({:.2}) for {} table", confidence, table.table_type.as_str()),
            alternatives: Vec::new(),
        }
    }

    /// Map every section, using the table route for sections that carry a table
    pub fn map_all(
        &self,
        sections: &[ExtractedSection],
        tables: &[ExtractedTable],
    ) -> Vec<MappingSuggestion> {
        sections
            .iter()
            .map(|section| match tables.iter().find(|t| t.section_id == section.id) {
                Some(table) => self.map_table(table),
                None => self.map_section(section),
            })
            .collect()
    }
}
