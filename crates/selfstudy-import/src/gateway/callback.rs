//! Inbound classification callbacks

use chrono::Utc;
use scraper::{Html, Node};
use std::sync::Arc;

use super::protocol::{CallbackPayload, CallbackSection, CallbackType, MatchStatus};
use crate::error::{Error, Result};
use crate::mapping::MappingReconciler;
use crate::storage::{ImportStore, StoreConn};
use crate::types::{
    CallbackAck, ExtractedSection, ImportJob, ImportStatus, MappingSuggestion, SectionOrigin,
    SectionType, DEFAULT_FIELD_TYPE,
};

/// Header carrying the shared callback secret
pub const CALLBACK_SECRET_HEADER: &str = "x-callback-secret";

pub const EXTERNAL_MAPPER: &str = "external-classifier";
pub const NOT_CLASSIFIED_REASON: &str = "not classified by external service";

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "table", "ul", "ol",
    "section", "blockquote",
];

/// Flatten rich text to plain lines, one per block element
pub fn flatten_rich_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();

    for node in fragment.tree.root().descendants() {
        match node.value() {
            Node::Element(element) => {
                let name = element.name();
                if BLOCK_ELEMENTS.contains(&name) {
                    text.push('\n');
                } else if name == "td" || name == "th" {
                    text.push(' ');
                }
            }
            Node::Text(fragment_text) => text.push_str(fragment_text),
            _ => {}
        }
    }

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Applies callbacks to import state, one transaction per callback
pub struct CallbackReceiver {
    store: ImportStore,
    reconciler: Arc<MappingReconciler>,
    external_threshold: f32,
    secret: Option<String>,
}

impl CallbackReceiver {
    pub fn new(
        store: ImportStore,
        reconciler: Arc<MappingReconciler>,
        external_threshold: f32,
        secret: Option<String>,
    ) -> Self {
        Self {
            store,
            reconciler,
            external_threshold,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Check the shared secret when one is configured
    pub fn verify(&self, provided: Option<&str>) -> Result<()> {
        match &self.secret {
            Some(expected) if provided != Some(expected.as_str()) => {
                Err(Error::Unauthorized("invalid callback secret".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn handle(&self, payload: &CallbackPayload) -> Result<CallbackAck> {
        self.store.transaction(|tx| self.apply(tx, payload))
    }

    fn resolve(&self, tx: &StoreConn<'_>, payload: &CallbackPayload) -> Result<ImportJob> {
        if let Some(import_id) = payload.import_id() {
            if let Some(job) = tx.get_job(import_id)? {
                return Ok(job);
            }
        }
        tx.get_job_by_external_id(payload.job_id)?.ok_or_else(|| {
            Error::not_found(format!("No import for classification job {}", payload.job_id))
        })
    }

    fn apply(&self, tx: &StoreConn<'_>, payload: &CallbackPayload) -> Result<CallbackAck> {
        let mut job = self.resolve(tx, payload)?;

        if job.status.is_terminal() {
            tracing::debug!(
                "[{}] callback for finished import ignored (index {})",
                job.id,
                payload.section_index
            );
            return Ok(CallbackAck::ignored(&job));
        }
        if job.external_job_id != Some(payload.job_id) {
            return Err(Error::validation(format!(
                "classification job {} is not the current job for import {}",
                payload.job_id, job.id
            )));
        }

        if job.first_callback_at.is_none() {
            job.first_callback_at = Some(Utc::now());
            job.received_chunks = 0;
            job.received_indices.clear();
            let cleared = self.reconciler.clear_auto(tx, job.id)?;
            tracing::info!(
                "[{}] first classification result; cleared {} auto mappings, {} pending items, {} external sections",
                job.id,
                cleared.auto_mappings,
                cleared.pending_unmapped,
                cleared.external_sections
            );
        }

        if payload.kind == CallbackType::Error {
            let message = payload
                .error
                .clone()
                .unwrap_or_else(|| "external classifier reported an error".to_string());
            tracing::error!("[{}] classifier error: {}", job.id, message);
            job.fail(message);
            tx.update_job(&job)?;
            return Ok(CallbackAck::accepted(&job));
        }

        if let Some(section) = &payload.section {
            self.ingest_section(tx, &job, payload, section)?;
        }

        if !job.record_chunk(payload.section_index) && payload.section_index >= job.total_chunks {
            tracing::warn!(
                "[{}] chunk index {} outside 0..{}",
                job.id,
                payload.section_index,
                job.total_chunks
            );
        }

        if payload.is_final() {
            let swept = self
                .reconciler
                .sweep_unresolved(tx, job.id, NOT_CLASSIFIED_REASON)?;
            job.transition(ImportStatus::Completed);
            tracing::info!(
                "[{}] classification complete ({}/{} chunks, {} sections left for review)",
                job.id,
                job.received_chunks,
                job.total_chunks,
                swept
            );
        }

        tx.update_job(&job)?;
        Ok(CallbackAck::accepted(&job))
    }

    fn ingest_section(
        &self,
        tx: &StoreConn<'_>,
        job: &ImportJob,
        payload: &CallbackPayload,
        unit: &CallbackSection,
    ) -> Result<()> {
        let external_ref = unit
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", payload.job_id, payload.section_index));

        if tx.section_by_external_ref(job.id, &external_ref)?.is_some() {
            tracing::debug!("[{}] duplicate section {} skipped", job.id, external_ref);
            return Ok(());
        }

        let content = flatten_rich_text(&unit.rich_text_content);
        let heading = unit
            .heading
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        if content.is_empty() && heading.is_none() {
            tracing::debug!("[{}] empty section {} skipped", job.id, external_ref);
            return Ok(());
        }

        let remote = &unit.remote_match;
        let confidence = remote.normalized_confidence();
        let mut section = ExtractedSection::new(
            job.id,
            SectionOrigin::External,
            SectionType::Narrative,
            if content.is_empty() {
                heading.clone().unwrap_or_default()
            } else {
                content
            },
        );
        section.heading = heading;
        section.confidence = confidence;
        section.suggested_standard = remote.standard.clone();
        section.external_ref = Some(external_ref);
        tx.insert_section(&section)?;

        let suggestion = match (remote.status, &remote.standard) {
            (MatchStatus::Matched, Some(standard)) => MappingSuggestion {
                extracted_section_id: section.id,
                standard_code: Some(standard.trim().to_string()),
                spec_code: remote.subspecification.clone(),
                field_type: DEFAULT_FIELD_TYPE.to_string(),
                confidence,
                reason: format!(
                    "external confidence {:.0} below threshold for standard {}",
                    remote.confidence,
                    standard.trim()
                ),
                alternatives: Vec::new(),
            },
            (MatchStatus::Error, _) => MappingSuggestion::none(
                section.id,
                format!(
                    "external classification error: {}",
                    remote.rationale.as_deref().unwrap_or("unknown")
                ),
            ),
            _ => MappingSuggestion::none(
                section.id,
                remote
                    .rationale
                    .clone()
                    .unwrap_or_else(|| "no match from external service".to_string()),
            ),
        };

        self.reconciler
            .apply_auto(tx, &suggestion, self.external_threshold, EXTERNAL_MAPPER)?;
        Ok(())
    }
}
