//! Request bodies for the mapping and review endpoints

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mapping::DEFAULT_FIELD_TYPE;

fn default_field_type() -> String {
    DEFAULT_FIELD_TYPE.to_string()
}

/// Manual mapping of a section onto the taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMappingRequest {
    pub extracted_section_id: Uuid,
    pub standard_code: String,
    #[serde(default)]
    pub spec_code: Option<String>,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub mapped_by: Option<String>,
}

/// What a reviewer decided for an unmapped item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Assign,
    Discard,
}

/// Review of one unmapped item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub action: ReviewDecision,
    /// Required for `assign`
    #[serde(default)]
    pub standard_code: Option<String>,
    #[serde(default)]
    pub spec_code: Option<String>,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub reviewer: Option<String>,
}
