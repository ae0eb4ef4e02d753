//! Merges machine suggestions with human decisions into the durable mapping
//!
//! Every operation takes a [`StoreConn`] so the caller decides the transaction
//! boundary. Each write that creates a mapping removes the unmapped item for the
//! same section and vice versa, so a section never sits in both buckets.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::taxonomy::Taxonomy;
use crate::error::{Error, Result};
use crate::storage::StoreConn;
use crate::types::{
    ApplySummary, ImportJob, ImportLink, ManualMappingRequest, MappingSuggestion, Provenance,
    ReviewAction, ReviewDecision, ReviewRequest, SectionMapping, UnmappedItem,
};

/// Threshold comparisons tolerate float noise at the boundary
pub const THRESHOLD_EPSILON: f32 = 1e-6;

const DEFAULT_MANUAL_USER: &str = "manual";
const DEFAULT_REVIEWER: &str = "reviewer";

/// Result of feeding one suggestion through [`MappingReconciler::apply_auto`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoOutcome {
    Mapped,
    Unmapped,
    /// A manual mapping or a human review decision already owns the section
    Preserved,
}

/// What [`MappingReconciler::clear_auto`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearSummary {
    pub auto_mappings: usize,
    pub pending_unmapped: usize,
    pub external_sections: usize,
}

pub struct MappingReconciler {
    taxonomy: Arc<Taxonomy>,
}

impl MappingReconciler {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    /// Accept a suggestion at or above `threshold`, otherwise queue it for review.
    /// Manual mappings and reviewed items are never overwritten.
    pub fn apply_auto(
        &self,
        conn: &StoreConn<'_>,
        suggestion: &MappingSuggestion,
        threshold: f32,
        mapped_by: &str,
    ) -> Result<AutoOutcome> {
        let section_id = suggestion.extracted_section_id;
        let section = conn
            .get_section(section_id)?
            .ok_or_else(|| Error::not_found(format!("Section {} not found", section_id)))?;

        if let Some(existing) = conn.get_mapping(section_id)? {
            if existing.provenance == Provenance::Manual {
                return Ok(AutoOutcome::Preserved);
            }
        }
        let existing_item = conn.get_unmapped(section_id)?;
        if let Some(item) = &existing_item {
            if item.review_action != ReviewAction::Pending {
                return Ok(AutoOutcome::Preserved);
            }
        }

        let known_standard = suggestion
            .standard_code
            .as_deref()
            .filter(|code| self.taxonomy.standard(code).is_some());

        let accepted = known_standard.is_some() && meets_threshold(suggestion.confidence, threshold);

        if let (true, Some(standard_code)) = (accepted, known_standard) {
            let spec_code = normalize_spec(suggestion.spec_code.as_deref()).filter(|spec| {
                self.taxonomy
                    .check_codes(standard_code, Some(spec.as_str()))
                    .is_ok()
            });
            conn.upsert_mapping(&SectionMapping {
                extracted_section_id: section_id,
                import_id: section.import_id,
                standard_code: standard_code.to_string(),
                spec_code,
                field_type: suggestion.field_type.clone(),
                provenance: Provenance::Auto,
                confidence: suggestion.confidence.clamp(0.0, 1.0),
                mapped_by: mapped_by.to_string(),
                mapped_at: Utc::now(),
            })?;
            conn.delete_unmapped(section_id)?;
            return Ok(AutoOutcome::Mapped);
        }

        let reason = match (&suggestion.standard_code, known_standard) {
            (Some(code), None) => format!("unknown standard code '{}'", code),
            _ => suggestion.reason.clone(),
        };
        conn.upsert_unmapped(&UnmappedItem {
            extracted_section_id: section_id,
            import_id: section.import_id,
            reason,
            review_action: ReviewAction::Pending,
            reviewer: None,
            reviewed_at: None,
            created_at: existing_item.map(|i| i.created_at).unwrap_or_else(Utc::now),
            alternatives: suggestion.alternatives.clone(),
        })?;
        conn.delete_mapping(section_id)?;
        Ok(AutoOutcome::Unmapped)
    }

    /// Map a section by hand, replacing whatever was there
    pub fn map_manually(
        &self,
        conn: &StoreConn<'_>,
        request: &ManualMappingRequest,
    ) -> Result<SectionMapping> {
        let section_id = request.extracted_section_id;
        let section = conn
            .get_section(section_id)?
            .ok_or_else(|| Error::not_found(format!("Section {} not found", section_id)))?;

        let spec_code = normalize_spec(request.spec_code.as_deref());
        self.taxonomy
            .check_codes(&request.standard_code, spec_code.as_deref())?;
        check_field_type(&request.field_type)?;

        let mapping = SectionMapping {
            extracted_section_id: section_id,
            import_id: section.import_id,
            standard_code: request.standard_code.clone(),
            spec_code,
            field_type: request.field_type.clone(),
            provenance: Provenance::Manual,
            confidence: 1.0,
            mapped_by: request
                .mapped_by
                .clone()
                .unwrap_or_else(|| DEFAULT_MANUAL_USER.to_string()),
            mapped_at: Utc::now(),
        };
        conn.upsert_mapping(&mapping)?;
        conn.delete_unmapped(section_id)?;
        Ok(mapping)
    }

    /// Resolve an unmapped item. `assign` needs a standard code.
    pub fn review(
        &self,
        conn: &StoreConn<'_>,
        section_id: Uuid,
        request: &ReviewRequest,
    ) -> Result<UnmappedItem> {
        let mut item = conn.get_unmapped(section_id)?.ok_or_else(|| {
            Error::not_found(format!("No unmapped item for section {}", section_id))
        })?;
        let reviewer = request
            .reviewer
            .clone()
            .unwrap_or_else(|| DEFAULT_REVIEWER.to_string());

        match request.action {
            ReviewDecision::Assign => {
                let standard_code = request
                    .standard_code
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| Error::validation("standardCode is required to assign"))?;
                let spec_code = normalize_spec(request.spec_code.as_deref());
                self.taxonomy.check_codes(standard_code, spec_code.as_deref())?;
                check_field_type(&request.field_type)?;

                conn.upsert_mapping(&SectionMapping {
                    extracted_section_id: section_id,
                    import_id: item.import_id,
                    standard_code: standard_code.to_string(),
                    spec_code,
                    field_type: request.field_type.clone(),
                    provenance: Provenance::Manual,
                    confidence: 1.0,
                    mapped_by: reviewer.clone(),
                    mapped_at: Utc::now(),
                })?;
                item.review_action = ReviewAction::Assigned;
            }
            ReviewDecision::Discard => {
                conn.delete_mapping(section_id)?;
                item.review_action = ReviewAction::Discarded;
            }
        }

        item.reviewer = Some(reviewer);
        item.reviewed_at = Some(Utc::now());
        conn.upsert_unmapped(&item)?;
        Ok(item)
    }

    /// Drop machine output for an import: auto mappings, pending unmapped items
    /// and external sections nobody has touched.
    pub fn clear_auto(&self, conn: &StoreConn<'_>, import_id: Uuid) -> Result<ClearSummary> {
        let external_sections = conn.delete_unreviewed_external_sections(import_id)?;
        let auto_mappings = conn.delete_auto_mappings(import_id)?;
        let pending_unmapped = conn.delete_pending_unmapped(import_id)?;
        Ok(ClearSummary {
            auto_mappings,
            pending_unmapped,
            external_sections,
        })
    }

    /// Park every section that has neither a mapping nor an unmapped item
    pub fn sweep_unresolved(
        &self,
        conn: &StoreConn<'_>,
        import_id: Uuid,
        reason: &str,
    ) -> Result<usize> {
        let unresolved = conn.unresolved_section_ids(import_id)?;
        let now = Utc::now();
        for section_id in &unresolved {
            conn.upsert_unmapped(&UnmappedItem {
                extracted_section_id: *section_id,
                import_id,
                reason: reason.to_string(),
                review_action: ReviewAction::Pending,
                reviewer: None,
                reviewed_at: None,
                created_at: now,
                alternatives: Vec::new(),
            })?;
        }
        Ok(unresolved.len())
    }

    /// Append every mapped section of the import to its submission's narrative
    /// slots. Sections already applied to the same slot are skipped, so calling
    /// this twice leaves the narratives unchanged.
    pub fn apply_to_submission(
        &self,
        conn: &StoreConn<'_>,
        job: &ImportJob,
    ) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();
        let mut slots: HashSet<(String, String, String)> = HashSet::new();

        for mapping in conn.list_mappings(job.id)? {
            let Some(section) = conn.get_section(mapping.extracted_section_id)? else {
                continue;
            };
            let content = section.content.trim();
            if content.is_empty() {
                summary.sections_skipped += 1;
                continue;
            }

            let spec_key = mapping.spec_key().to_string();
            let fresh = conn.mark_applied(
                section.id,
                &job.submission_id,
                &mapping.standard_code,
                &spec_key,
                &mapping.field_type,
            )?;
            if !fresh {
                summary.sections_skipped += 1;
                continue;
            }

            conn.append_narrative(
                &job.submission_id,
                &mapping.standard_code,
                &spec_key,
                &mapping.field_type,
                content,
            )?;
            summary.sections_applied += 1;
            slots.insert((mapping.standard_code.clone(), spec_key, mapping.field_type.clone()));
        }

        summary.slots_touched = slots.len() as u32;
        conn.insert_import_link(&ImportLink {
            submission_id: job.submission_id.clone(),
            import_id: job.id,
            applied_at: Utc::now(),
            sections_applied: summary.sections_applied,
        })?;

        Ok(summary)
    }
}

pub fn meets_threshold(confidence: f32, threshold: f32) -> bool {
    confidence + THRESHOLD_EPSILON >= threshold
}

fn normalize_spec(spec: Option<&str>) -> Option<String> {
    spec.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

fn check_field_type(field_type: &str) -> Result<()> {
    if field_type.trim().is_empty() {
        return Err(Error::validation("fieldType must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ImportStore;
    use crate::types::{
        AlternativeMatch, ExtractedSection, FileType, SectionOrigin, SectionType,
        DEFAULT_FIELD_TYPE,
    };

    struct Fixture {
        store: ImportStore,
        reconciler: MappingReconciler,
        job: ImportJob,
        section: ExtractedSection,
    }

    fn fixture() -> Fixture {
        let store = ImportStore::in_memory().unwrap();
        let job = ImportJob::new("sub-1", "study.pdf", "hash", FileType::Pdf, "default");
        let section = ExtractedSection::new(
            job.id,
            SectionOrigin::Parser,
            SectionType::Narrative,
            "Faculty hold terminal degrees.".to_string(),
        );
        store
            .transaction(|tx| {
                tx.insert_job(&job, b"x")?;
                tx.insert_section(&section)
            })
            .unwrap();
        Fixture {
            store,
            reconciler: MappingReconciler::new(Arc::new(Taxonomy::default())),
            job,
            section,
        }
    }

    fn suggestion(section_id: Uuid, confidence: f32) -> MappingSuggestion {
        MappingSuggestion {
            extracted_section_id: section_id,
            standard_code: Some("3".to_string()),
            spec_code: Some("a".to_string()),
            field_type: DEFAULT_FIELD_TYPE.to_string(),
            confidence,
            reason: format!("low confidence ({:.2}) for standard 3", confidence),
            alternatives: Vec::new(),
        }
    }

    #[test]
    fn test_local_threshold_boundary() {
        let f = fixture();
        let outcome = f
            .store
            .transaction(|tx| f.reconciler.apply_auto(tx, &suggestion(f.section.id, 0.6), 0.6, "local"))
            .unwrap();
        assert_eq!(outcome, AutoOutcome::Mapped);

        let outcome = f
            .store
            .transaction(|tx| f.reconciler.apply_auto(tx, &suggestion(f.section.id, 0.59), 0.6, "local"))
            .unwrap();
        assert_eq!(outcome, AutoOutcome::Unmapped);

        // exactly one bucket after each write
        let (mapping, item) = f
            .store
            .read(|c| Ok((c.get_mapping(f.section.id)?, c.get_unmapped(f.section.id)?)))
            .unwrap();
        assert!(mapping.is_none());
        assert_eq!(item.unwrap().review_action, ReviewAction::Pending);
    }

    #[test]
    fn test_unmapped_item_keeps_runner_ups() {
        let f = fixture();
        let mut low = suggestion(f.section.id, 0.4);
        low.alternatives = vec![
            AlternativeMatch {
                standard_code: "5".to_string(),
                spec_code: None,
                confidence: 0.35,
            },
            AlternativeMatch {
                standard_code: "7".to_string(),
                spec_code: Some("b".to_string()),
                confidence: 0.3,
            },
        ];

        let outcome = f
            .store
            .transaction(|tx| f.reconciler.apply_auto(tx, &low, 0.6, "local"))
            .unwrap();
        assert_eq!(outcome, AutoOutcome::Unmapped);

        let item = f.store.read(|c| c.get_unmapped(f.section.id)).unwrap().unwrap();
        assert_eq!(item.alternatives, low.alternatives);

        let listed = f.store.read(|c| c.list_unmapped(f.section.import_id)).unwrap();
        assert_eq!(listed[0].alternatives.len(), 2);
        assert_eq!(listed[0].alternatives[1].spec_code.as_deref(), Some("b"));
    }

    #[test]
    fn test_external_threshold_boundary() {
        assert!(meets_threshold(50.0 / 100.0, 0.5));
        assert!(!meets_threshold(49.0 / 100.0, 0.5));
    }

    #[test]
    fn test_auto_never_overwrites_manual() {
        let f = fixture();
        f.store
            .transaction(|tx| {
                f.reconciler.map_manually(
                    tx,
                    &ManualMappingRequest {
                        extracted_section_id: f.section.id,
                        standard_code: "4".into(),
                        spec_code: None,
                        field_type: "narrative".into(),
                        mapped_by: Some("dean".into()),
                    },
                )
            })
            .unwrap();

        let outcome = f
            .store
            .transaction(|tx| f.reconciler.apply_auto(tx, &suggestion(f.section.id, 0.95), 0.6, "local"))
            .unwrap();
        assert_eq!(outcome, AutoOutcome::Preserved);
        let mapping = f.store.read(|c| c.get_mapping(f.section.id)).unwrap().unwrap();
        assert_eq!(mapping.standard_code, "4");
        assert_eq!(mapping.mapped_by, "dean");
    }

    #[test]
    fn test_manual_mapping_validates_codes() {
        let f = fixture();
        let err = f
            .store
            .transaction(|tx| {
                f.reconciler.map_manually(
                    tx,
                    &ManualMappingRequest {
                        extracted_section_id: f.section.id,
                        standard_code: "99".into(),
                        spec_code: None,
                        field_type: "narrative".into(),
                        mapped_by: None,
                    },
                )
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_review_assign_and_discard() {
        let f = fixture();
        f.store
            .transaction(|tx| f.reconciler.sweep_unresolved(tx, f.job.id, "no matching standard pattern found"))
            .unwrap();

        let missing_code = f.store.transaction(|tx| {
            f.reconciler.review(
                tx,
                f.section.id,
                &ReviewRequest {
                    action: ReviewDecision::Assign,
                    standard_code: None,
                    spec_code: None,
                    field_type: "narrative".into(),
                    reviewer: None,
                },
            )
        });
        assert!(matches!(missing_code, Err(Error::Validation(_))));

        let item = f
            .store
            .transaction(|tx| {
                f.reconciler.review(
                    tx,
                    f.section.id,
                    &ReviewRequest {
                        action: ReviewDecision::Assign,
                        standard_code: Some("3".into()),
                        spec_code: Some("A".into()),
                        field_type: "narrative".into(),
                        reviewer: Some("pat".into()),
                    },
                )
            })
            .unwrap();
        assert_eq!(item.review_action, ReviewAction::Assigned);
        assert_eq!(item.reviewer.as_deref(), Some("pat"));
        let mapping = f.store.read(|c| c.get_mapping(f.section.id)).unwrap().unwrap();
        assert_eq!(mapping.provenance, Provenance::Manual);
        assert_eq!(mapping.spec_code.as_deref(), Some("a"));

        let item = f
            .store
            .transaction(|tx| {
                f.reconciler.review(
                    tx,
                    f.section.id,
                    &ReviewRequest {
                        action: ReviewDecision::Discard,
                        standard_code: None,
                        spec_code: None,
                        field_type: "narrative".into(),
                        reviewer: Some("pat".into()),
                    },
                )
            })
            .unwrap();
        assert_eq!(item.review_action, ReviewAction::Discarded);
        assert!(f.store.read(|c| c.get_mapping(f.section.id)).unwrap().is_none());
    }

    #[test]
    fn test_clear_auto_keeps_reviewed_external_sections() {
        let f = fixture();
        let mut reviewed = ExtractedSection::new(
            f.job.id,
            SectionOrigin::External,
            SectionType::Narrative,
            "Kept".into(),
        );
        reviewed.external_ref = Some("r1".into());
        let mut untouched = ExtractedSection::new(
            f.job.id,
            SectionOrigin::External,
            SectionType::Narrative,
            "Dropped".into(),
        );
        untouched.external_ref = Some("r2".into());

        f.store
            .transaction(|tx| {
                tx.insert_section(&reviewed)?;
                tx.insert_section(&untouched)?;
                f.reconciler.sweep_unresolved(tx, f.job.id, "pending")?;
                f.reconciler.review(
                    tx,
                    reviewed.id,
                    &ReviewRequest {
                        action: ReviewDecision::Discard,
                        standard_code: None,
                        spec_code: None,
                        field_type: "narrative".into(),
                        reviewer: None,
                    },
                )
            })
            .unwrap();

        let summary = f
            .store
            .transaction(|tx| f.reconciler.clear_auto(tx, f.job.id))
            .unwrap();
        assert_eq!(summary.external_sections, 1);
        // parser section's pending item goes too
        assert_eq!(summary.pending_unmapped, 1);

        let sections = f.store.read(|c| c.list_sections(f.job.id)).unwrap();
        assert!(sections.iter().any(|s| s.id == reviewed.id));
        assert!(!sections.iter().any(|s| s.id == untouched.id));
    }

    #[test]
    fn test_apply_twice_leaves_content_unchanged() {
        let f = fixture();
        f.store
            .transaction(|tx| f.reconciler.apply_auto(tx, &suggestion(f.section.id, 0.9), 0.6, "local"))
            .unwrap();

        let first = f
            .store
            .transaction(|tx| f.reconciler.apply_to_submission(tx, &f.job))
            .unwrap();
        assert_eq!(first.sections_applied, 1);
        assert_eq!(first.slots_touched, 1);
        let before = f.store.read(|c| c.list_narratives("sub-1")).unwrap();

        let second = f
            .store
            .transaction(|tx| f.reconciler.apply_to_submission(tx, &f.job))
            .unwrap();
        assert_eq!(second.sections_applied, 0);
        assert_eq!(second.sections_skipped, 1);
        let after = f.store.read(|c| c.list_narratives("sub-1")).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].content, after[0].content);
        assert_eq!(after[0].standard_code, "3");
        assert_eq!(after[0].spec_code, "a");
        assert_eq!(f.store.read(|c| c.list_import_links("sub-1")).unwrap().len(), 2);
    }
}
