//! Standards taxonomy: numbered standards, each with lettered specs

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// A lettered sub-specification of a standard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    /// Letter code, e.g. "a"
    pub code: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One numbered standard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standard {
    /// Numeric code, e.g. "3"
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub specs: Vec<Spec>,
}

impl Standard {
    pub fn spec(&self, code: &str) -> Option<&Spec> {
        self.specs.iter().find(|s| s.code.eq_ignore_ascii_case(code))
    }
}

/// Named set of standards plus the fixed routing targets for tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    pub name: String,
    pub standards: Vec<Standard>,
    /// Where curriculum-matrix tables land
    pub curriculum_standard: String,
    /// Where grading/schedule tables from syllabi land
    pub syllabus_standard: String,
}

impl Taxonomy {
    /// Load a taxonomy from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let taxonomy: Taxonomy = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid taxonomy {}: {}", path.display(), e)))?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    /// Check the routing targets exist and codes are unique
    pub fn validate(&self) -> Result<()> {
        if self.standards.is_empty() {
            return Err(Error::Config(format!("Taxonomy '{}' has no standards", self.name)));
        }
        for (i, standard) in self.standards.iter().enumerate() {
            if self.standards[..i].iter().any(|s| s.code == standard.code) {
                return Err(Error::Config(format!(
                    "Taxonomy '{}' repeats standard code {}",
                    self.name, standard.code
                )));
            }
        }
        for target in [&self.curriculum_standard, &self.syllabus_standard] {
            if self.standard(target).is_none() {
                return Err(Error::Config(format!(
                    "Taxonomy '{}' routes tables to unknown standard {}",
                    self.name, target
                )));
            }
        }
        Ok(())
    }

    pub fn standard(&self, code: &str) -> Option<&Standard> {
        self.standards.iter().find(|s| s.code == code)
    }

    /// Position in declaration order, used to break score ties
    pub fn position(&self, code: &str) -> Option<usize> {
        self.standards.iter().position(|s| s.code == code)
    }

    /// Validate a (standard, spec) pair supplied by a human or a remote classifier
    pub fn check_codes(&self, standard_code: &str, spec_code: Option<&str>) -> Result<()> {
        let standard = self.standard(standard_code).ok_or_else(|| {
            Error::validation(format!(
                "Unknown standard code '{}' in taxonomy '{}'",
                standard_code, self.name
            ))
        })?;
        if let Some(spec) = spec_code.filter(|s| !s.is_empty()) {
            if standard.spec(spec).is_none() {
                return Err(Error::validation(format!(
                    "Unknown spec '{}' for standard {}",
                    spec, standard_code
                )));
            }
        }
        Ok(())
    }
}

fn spec(code: &str, keywords: &[&str]) -> Spec {
    Spec {
        code: code.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn standard(code: &str, title: &str, keywords: &[&str], specs: Vec<Spec>) -> Standard {
    Standard {
        code: code.to_string(),
        title: title.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        specs,
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            standards: vec![
                standard(
                    "1",
                    "Mission, Goals and Objectives",
                    &["mission", "vision", "goals", "objectives", "strategic plan", "values"],
                    vec![
                        spec("a", &["mission statement", "vision statement"]),
                        spec("b", &["strategic plan", "measurable objectives"]),
                    ],
                ),
                standard(
                    "2",
                    "Governance and Administration",
                    &["governance", "administration", "organizational chart", "bylaws", "committee", "leadership"],
                    vec![
                        spec("a", &["organizational chart", "reporting lines"]),
                        spec("b", &["bylaws", "committee structure", "shared governance"]),
                    ],
                ),
                standard(
                    "3",
                    "Faculty",
                    &["faculty", "credentials", "terminal degree", "qualifications", "teaching load", "adjunct"],
                    vec![
                        spec("a", &["terminal degree", "credentials", "qualifications"]),
                        spec("b", &["teaching load", "workload", "student-to-faculty ratio"]),
                        spec("c", &["faculty development", "scholarship", "professional development"]),
                    ],
                ),
                standard(
                    "4",
                    "Curriculum",
                    &["curriculum", "course", "syllabus", "learning outcomes", "competencies", "program of study"],
                    vec![
                        spec("a", &["curriculum map", "curriculum matrix", "competencies"]),
                        spec("b", &["syllabus", "course description", "grading"]),
                        spec("c", &["learning outcomes", "course objectives"]),
                    ],
                ),
                standard(
                    "5",
                    "Students",
                    &["admissions", "enrollment", "advising", "retention", "student services", "recruitment"],
                    vec![
                        spec("a", &["admissions", "admission criteria", "recruitment"]),
                        spec("b", &["advising", "student services", "retention"]),
                    ],
                ),
                standard(
                    "6",
                    "Assessment and Evaluation",
                    &["assessment", "evaluation", "outcomes data", "benchmark", "continuous improvement", "survey"],
                    vec![
                        spec("a", &["assessment plan", "direct measures", "indirect measures"]),
                        spec("b", &["continuous improvement", "data-driven", "closing the loop"]),
                    ],
                ),
                standard(
                    "7",
                    "Resources",
                    &["budget", "facilities", "library", "technology", "staff support", "financial resources"],
                    vec![
                        spec("a", &["budget", "financial resources", "funding"]),
                        spec("b", &["facilities", "library", "technology"]),
                    ],
                ),
                standard(
                    "8",
                    "Clinical and Field Experience",
                    &["clinical", "practicum", "internship", "field experience", "preceptor", "field placement"],
                    vec![
                        spec("a", &["clinical site", "affiliation agreement", "field placement"]),
                        spec("b", &["preceptor", "site supervisor", "field instructor"]),
                    ],
                ),
            ],
            curriculum_standard: "4".to_string(),
            syllabus_standard: "4".to_string(),
        }
    }
}
