//! Import job record and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::document::FileType;

/// Import job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    /// Completed and failed imports never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Transitions are monotonic: pending -> processing -> completed | failed.
    /// A pending import may also fail directly (e.g. it could not be queued).
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Coarse progress phase shown to pollers.
///
/// Derived only from whether the document was sent, whether any result came
/// back, and the terminal flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Preparing,
    AwaitingResults,
    ReceivingResults,
    Completed,
    Failed,
}

impl ImportPhase {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Preparing => "Reading document and extracting sections",
            Self::AwaitingResults => "Document sent for classification, waiting for results",
            Self::ReceivingResults => "Receiving classification results",
            Self::Completed => "Import complete",
            Self::Failed => "Import failed",
        }
    }
}

/// One document-ingestion attempt from upload to a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    /// Submission whose narrative receives the mapped content
    pub submission_id: String,
    /// Uploaded filename
    pub source_filename: String,
    /// SHA-256 of the uploaded bytes
    pub source_hash: String,
    pub file_type: FileType,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Identifier shared by all chunks sent to the external classifier
    pub external_job_id: Option<Uuid>,
    pub sent_at: Option<DateTime<Utc>>,
    pub first_callback_at: Option<DateTime<Utc>>,
    pub total_chunks: u32,
    pub received_chunks: u32,
    /// Distinct chunk indices acknowledged so far
    #[serde(skip)]
    pub received_indices: BTreeSet<u32>,
    pub taxonomy_name: String,
}

impl ImportJob {
    /// Create a pending import
    pub fn new(
        submission_id: impl Into<String>,
        source_filename: impl Into<String>,
        source_hash: impl Into<String>,
        file_type: FileType,
        taxonomy_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id: submission_id.into(),
            source_filename: source_filename.into(),
            source_hash: source_hash.into(),
            file_type,
            status: ImportStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            external_job_id: None,
            sent_at: None,
            first_callback_at: None,
            total_chunks: 0,
            received_chunks: 0,
            received_indices: BTreeSet::new(),
            taxonomy_name: taxonomy_name.into(),
        }
    }

    /// Move to `next`, returning false (and changing nothing) if the
    /// transition is not allowed.
    pub fn transition(&mut self, next: ImportStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            ImportStatus::Processing => self.started_at = Some(now),
            ImportStatus::Completed | ImportStatus::Failed => self.completed_at = Some(now),
            ImportStatus::Pending => {}
        }
        self.status = next;
        true
    }

    /// Mark failed with the captured message
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.transition(ImportStatus::Failed) {
            self.error = Some(message.into());
            true
        } else {
            false
        }
    }

    /// Record an outbound send to the classifier. Resets callback state so
    /// the first callback of the new send re-initialises results.
    pub fn record_sent(&mut self, external_job_id: Uuid, total_chunks: u32) {
        self.external_job_id = Some(external_job_id);
        self.sent_at = Some(Utc::now());
        self.total_chunks = total_chunks;
        self.received_chunks = 0;
        self.received_indices.clear();
        self.first_callback_at = None;
    }

    /// Count a chunk index once. Out-of-range indices are not counted.
    pub fn record_chunk(&mut self, index: u32) -> bool {
        if index >= self.total_chunks {
            return false;
        }
        let inserted = self.received_indices.insert(index);
        self.received_chunks = self.received_indices.len() as u32;
        inserted
    }

    pub fn phase(&self) -> ImportPhase {
        match self.status {
            ImportStatus::Failed => ImportPhase::Failed,
            ImportStatus::Completed => ImportPhase::Completed,
            _ if self.sent_at.is_none() => ImportPhase::Preparing,
            _ if self.received_chunks == 0 => ImportPhase::AwaitingResults,
            _ => ImportPhase::ReceivingResults,
        }
    }

    /// Seconds since processing started (or since creation if not started),
    /// frozen at completion.
    pub fn elapsed_secs(&self) -> i64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ImportJob {
        ImportJob::new("sub-1", "study.docx", "abc", FileType::Docx, "default")
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut job = job();
        assert!(!job.transition(ImportStatus::Completed));
        assert!(job.transition(ImportStatus::Processing));
        assert!(job.started_at.is_some());
        assert!(job.transition(ImportStatus::Completed));
        assert!(!job.transition(ImportStatus::Processing));
        assert!(!job.fail("late"));
        assert_eq!(job.status, ImportStatus::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_chunk_counter_is_idempotent() {
        let mut job = job();
        job.record_sent(Uuid::new_v4(), 3);
        assert!(job.record_chunk(0));
        assert!(!job.record_chunk(0));
        assert!(!job.record_chunk(7));
        assert_eq!(job.received_chunks, 1);
        assert!(job.received_chunks <= job.total_chunks);
    }

    #[test]
    fn test_phase_from_observable_facts() {
        let mut job = job();
        job.transition(ImportStatus::Processing);
        assert_eq!(job.phase(), ImportPhase::Preparing);
        job.record_sent(Uuid::new_v4(), 2);
        assert_eq!(job.phase(), ImportPhase::AwaitingResults);
        job.record_chunk(1);
        assert_eq!(job.phase(), ImportPhase::ReceivingResults);
        job.fail("classifier unavailable");
        assert_eq!(job.phase(), ImportPhase::Failed);
    }
}
