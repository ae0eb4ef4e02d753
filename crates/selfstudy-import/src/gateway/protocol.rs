//! Wire format shared with the external classifier

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Encoding of `encodedHtml`
pub const HTML_ENCODING: &str = "base64";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOptions {
    /// 0-100
    pub confidence_threshold: u32,
}

/// One outbound chunk of a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub callback_url: String,
    pub taxonomy_name: String,
    /// The import id
    pub document_id: Uuid,
    /// Shared by every chunk of one send
    pub job_id: Uuid,
    /// 0-based
    pub section_index: u32,
    pub total_sections: u32,
    pub section_heading: String,
    pub encoded_html: String,
    pub encoding: String,
    /// False only on the final chunk
    pub more_data_follows: bool,
    pub options: ChunkOptions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackType {
    SectionResult,
    Error,
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Unmatched,
    Error,
}

/// Classifier verdict for one content unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMatch {
    pub status: MatchStatus,
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default)]
    pub subspecification: Option<String>,
    /// 0-100
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl RemoteMatch {
    /// Confidence scaled to 0.0-1.0
    pub fn normalized_confidence(&self) -> f32 {
        (self.confidence / 100.0).clamp(0.0, 1.0)
    }
}

/// Content unit carried by a callback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackSection {
    /// Classifier-side identifier, used for dedupe when present
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub rich_text_content: String,
    #[serde(rename = "match")]
    pub remote_match: RemoteMatch,
}

fn more_data_default() -> bool {
    true
}

/// Inbound callback body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[serde(rename = "type")]
    pub kind: CallbackType,
    pub job_id: Uuid,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default = "more_data_default")]
    pub more_data: bool,
    #[serde(default)]
    pub section_index: u32,
    #[serde(default)]
    pub total_sections: u32,
    #[serde(default)]
    pub section: Option<CallbackSection>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CallbackPayload {
    /// Document id as an import id, if it parses
    pub fn import_id(&self) -> Option<Uuid> {
        self.document_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id.trim()).ok())
    }

    /// This callback ends the run
    pub fn is_final(&self) -> bool {
        !self.more_data || self.kind == CallbackType::Complete
    }
}
