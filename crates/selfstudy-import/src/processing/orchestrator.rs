//! Import lifecycle: submit, background processing, cancellation and status

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::queue::{Enqueued, ImportQueue};
use crate::config::ImportConfig;
use crate::error::{Error, Result};
use crate::gateway::ExternalMappingGateway;
use crate::ingestion::{hash_bytes, DocumentParser, ParsedDocument};
use crate::mapping::{AutoOutcome, LocalSectionMapper, MappingReconciler, PatternMatcher, Taxonomy};
use crate::storage::ImportStore;
use crate::types::{
    FileType, ImportJob, ImportStatus, ImportStatusResponse, MappingActivity,
};

pub const LOCAL_MAPPER: &str = "local-mapper";
pub const NO_PATTERN_REASON: &str = "no matching standard pattern found";

const MAX_SUBMISSION_ID_CHARS: usize = 128;

/// Knobs the orchestrator reads from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub local_threshold: f32,
    pub parse_timeout: Duration,
    pub recent_activity: usize,
    pub taxonomy_name: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

impl From<&ImportConfig> for OrchestratorSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            local_threshold: config.mapping.local_threshold,
            parse_timeout: config.processing.parse_timeout(),
            recent_activity: config.mapping.recent_activity,
            taxonomy_name: config.classifier.taxonomy_name.clone(),
        }
    }
}

/// Drives an import from upload to a terminal state
pub struct ImportOrchestrator {
    store: ImportStore,
    parser: Arc<DocumentParser>,
    mapper: LocalSectionMapper,
    reconciler: Arc<MappingReconciler>,
    gateway: Option<Arc<ExternalMappingGateway>>,
    queue: ImportQueue,
    settings: OrchestratorSettings,
}

impl ImportOrchestrator {
    pub fn new(
        store: ImportStore,
        taxonomy: Arc<Taxonomy>,
        gateway: Option<Arc<ExternalMappingGateway>>,
        queue: ImportQueue,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        let matcher = Arc::new(PatternMatcher::new(taxonomy.clone())?);
        let parser = DocumentParser::new(matcher.clone()).with_pdf_timeout(settings.parse_timeout);

        Ok(Self {
            store,
            parser: Arc::new(parser),
            mapper: LocalSectionMapper::new(matcher),
            reconciler: Arc::new(MappingReconciler::new(taxonomy)),
            gateway,
            queue,
            settings,
        })
    }

    pub fn store(&self) -> &ImportStore {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<MappingReconciler> {
        &self.reconciler
    }

    pub fn queue(&self) -> &ImportQueue {
        &self.queue
    }

    /// External hand-off is configured
    pub fn uses_external_classifier(&self) -> bool {
        self.gateway.is_some()
    }

    /// Accept an upload and queue it. Returns as soon as the job is stored.
    pub fn submit(&self, submission_id: &str, filename: &str, data: Vec<u8>) -> Result<ImportJob> {
        let submission_id = submission_id.trim();
        if submission_id.is_empty() {
            return Err(Error::validation("submissionId is required"));
        }
        if submission_id.chars().count() > MAX_SUBMISSION_ID_CHARS {
            return Err(Error::validation("submissionId is too long"));
        }
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(Error::validation("file name is required"));
        }
        let file_type = FileType::from_filename(filename);
        if let Some(reason) = file_type.unsupported_reason() {
            return Err(Error::UnsupportedFormat(format!("{} - {}", filename, reason)));
        }
        if data.is_empty() {
            return Err(Error::validation("uploaded file is empty"));
        }

        let job = ImportJob::new(
            submission_id,
            filename,
            hash_bytes(&data),
            file_type,
            self.settings.taxonomy_name.clone(),
        );

        self.store.transaction(|tx| {
            if let Some(active) = tx.active_job_for_submission(submission_id)? {
                return Err(Error::Conflict(format!(
                    "submission {} already has import {} in progress",
                    submission_id, active.id
                )));
            }
            tx.insert_job(&job, &data)
        })?;

        tracing::info!(
            "[{}] accepted {} ({} bytes) for submission {}",
            job.id,
            filename,
            data.len(),
            submission_id
        );

        // a backlogged job stays pending; the worker picks it up when it has room
        if let Err(e) = self.queue.enqueue(job.id) {
            self.fail(job.id, &e.to_string())?;
            return Err(e);
        }
        Ok(job)
    }

    /// Run one queued import. Errors are recorded on the job before they are
    /// returned; nothing is retried.
    pub async fn process(&self, import_id: Uuid) -> Result<()> {
        let claimed = self.store.transaction(|tx| {
            let Some(mut job) = tx.get_job(import_id)? else {
                return Ok(None);
            };
            match job.status {
                ImportStatus::Pending => {
                    job.transition(ImportStatus::Processing);
                    tx.update_job(&job)?;
                }
                // interrupted before the hand-off; parse again
                ImportStatus::Processing if job.sent_at.is_none() => {}
                _ => return Ok(None),
            }
            let source = tx.get_source(import_id)?;
            Ok(Some((job, source)))
        })?;

        let Some((job, source)) = claimed else {
            tracing::info!("[{}] nothing to process (cancelled, finished or awaiting results)", import_id);
            return Ok(());
        };
        let Some(source) = source else {
            let err = Error::internal("source document is no longer available");
            self.fail(import_id, &err.to_string())?;
            return Err(err);
        };

        tracing::info!("[{}] parsing {}", import_id, job.source_filename);
        let mut doc = match self.parse(&job, source).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!("[{}] parse failed: {}", import_id, e);
                self.fail(import_id, &e.to_string())?;
                return Err(e);
            }
        };

        if doc.sections.is_empty() {
            let message = match job.file_type {
                FileType::Pdf => "no extractable text found; scanned PDFs need OCR, which is not supported",
                _ => "document contains no extractable text",
            };
            let err = Error::parse(&job.source_filename, message);
            self.fail(import_id, &err.to_string())?;
            return Err(err);
        }

        doc.bind_to(import_id);
        let persisted = self.store.transaction(|tx| {
            if tx.get_job(import_id)?.is_none() {
                return Ok(false);
            }
            tx.clear_extraction(import_id)?;
            for section in &doc.sections {
                tx.insert_section(section)?;
            }
            for table in &doc.tables {
                tx.insert_table(table)?;
            }
            Ok(true)
        });
        match persisted {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("[{}] cancelled during parsing", import_id);
                return Ok(());
            }
            Err(e) => {
                self.fail(import_id, &e.to_string())?;
                return Err(e);
            }
        }

        tracing::info!(
            "[{}] extracted {} sections and {} tables from {} pages",
            import_id,
            doc.sections.len(),
            doc.tables.len(),
            doc.metadata.page_count
        );

        match &self.gateway {
            Some(gateway) => self.hand_off(gateway, import_id, &doc).await,
            None => self.map_locally(import_id, &doc),
        }
    }

    async fn parse(&self, job: &ImportJob, source: Vec<u8>) -> Result<ParsedDocument> {
        let parser = self.parser.clone();
        let filename = job.source_filename.clone();
        let task = tokio::task::spawn_blocking(move || parser.parse(&filename, &source));

        match tokio::time::timeout(self.settings.parse_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::internal(format!("parser task failed: {}", e))),
            Err(_) => Err(Error::internal(format!(
                "parsing timed out after {}s",
                self.settings.parse_timeout.as_secs()
            ))),
        }
    }

    async fn hand_off(
        &self,
        gateway: &ExternalMappingGateway,
        import_id: Uuid,
        doc: &ParsedDocument,
    ) -> Result<()> {
        match gateway.dispatch(&self.store, import_id, &doc.html_content).await {
            Ok(total) => {
                tracing::info!("[{}] {} chunks sent, awaiting results", import_id, total);
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                tracing::info!("[{}] cancelled during hand-off", import_id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("[{}] hand-off failed: {}", import_id, e);
                self.fail(import_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Local mapping, sweep and completion in one transaction
    fn map_locally(&self, import_id: Uuid, doc: &ParsedDocument) -> Result<()> {
        let suggestions = self.mapper.map_all(&doc.sections, &doc.tables);
        let threshold = self.settings.local_threshold;

        let result = self.store.transaction(|tx| {
            let Some(mut job) = tx.get_job(import_id)? else {
                return Ok(None);
            };
            let mut mapped = 0usize;
            for suggestion in &suggestions {
                if self.reconciler.apply_auto(tx, suggestion, threshold, LOCAL_MAPPER)?
                    == AutoOutcome::Mapped
                {
                    mapped += 1;
                }
            }
            let swept = self
                .reconciler
                .sweep_unresolved(tx, import_id, NO_PATTERN_REASON)?;
            job.transition(ImportStatus::Completed);
            tx.update_job(&job)?;
            Ok(Some((mapped, swept)))
        });

        match result {
            Ok(Some((mapped, swept))) => {
                tracing::info!(
                    "[{}] completed: {} of {} sections mapped, {} swept to review",
                    import_id,
                    mapped,
                    suggestions.len(),
                    swept
                );
                Ok(())
            }
            Ok(None) => {
                tracing::info!("[{}] cancelled before mapping", import_id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("[{}] local mapping failed: {}", import_id, e);
                self.fail(import_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Mark an import failed. Missing or already finished imports are left alone.
    pub fn fail(&self, import_id: Uuid, message: &str) -> Result<()> {
        self.store.transaction(|tx| {
            let Some(mut job) = tx.get_job(import_id)? else {
                return Ok(());
            };
            if job.fail(message) {
                tx.update_job(&job)?;
            }
            Ok(())
        })
    }

    /// Delete a non-terminal import and everything extracted from it
    pub fn cancel(&self, import_id: Uuid) -> Result<()> {
        self.store.transaction(|tx| {
            let job = tx
                .get_job(import_id)?
                .ok_or_else(|| Error::not_found(format!("Import {} not found", import_id)))?;
            if job.status.is_terminal() {
                return Err(Error::Conflict(format!(
                    "Import {} is already {}",
                    import_id,
                    job.status.as_str()
                )));
            }
            tx.delete_job(import_id)?;
            Ok(())
        })?;
        tracing::info!("[{}] cancelled", import_id);
        Ok(())
    }

    pub fn status(&self, import_id: Uuid) -> Result<ImportStatusResponse> {
        self.store.read(|c| {
            let job = c
                .get_job(import_id)?
                .ok_or_else(|| Error::not_found(format!("Import {} not found", import_id)))?;
            let counts = c.counts(import_id)?;
            let activity = c
                .recent_mappings(import_id, self.settings.recent_activity)?
                .into_iter()
                .map(|m| {
                    let heading = c
                        .get_section(m.extracted_section_id)?
                        .and_then(|s| s.heading);
                    Ok(MappingActivity {
                        extracted_section_id: m.extracted_section_id,
                        heading,
                        standard_code: m.standard_code,
                        spec_code: m.spec_code,
                        field_type: m.field_type,
                        provenance: m.provenance,
                        confidence: m.confidence,
                        mapped_at: m.mapped_at,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ImportStatusResponse::build(&job, counts, activity))
        })
    }

    /// Re-queue imports interrupted by a restart. Jobs already handed to the
    /// classifier keep waiting for callbacks.
    pub fn resume_incomplete(&self) -> Result<usize> {
        let jobs = self.store.read(|c| {
            let mut jobs = c.list_jobs_by_status(ImportStatus::Pending)?;
            jobs.extend(c.list_jobs_by_status(ImportStatus::Processing)?);
            Ok(jobs)
        })?;

        let mut resumed = 0;
        for job in jobs {
            if job.sent_at.is_some() {
                tracing::info!("[{}] awaiting classifier callbacks, not resumed", job.id);
                continue;
            }
            if job.status == ImportStatus::Processing {
                let cleared = self.store.transaction(|tx| tx.clear_extraction(job.id))?;
                tracing::info!("[{}] cleared {} partial sections before resuming", job.id, cleared);
            }
            if self.queue.enqueue(job.id)? == Enqueued::Queued {
                resumed += 1;
            }
        }

        if resumed > 0 {
            tracing::info!("Resumed {} incomplete imports", resumed);
        }
        Ok(resumed)
    }

    /// Queue pending imports that did not fit in the channel when uploaded.
    /// Oldest first; stops at the first one that still does not fit.
    pub fn requeue_backlog(&self) -> Result<usize> {
        let pending = self.store.read(|c| c.list_jobs_by_status(ImportStatus::Pending))?;

        let mut queued = 0;
        for job in pending {
            if self.queue.is_in_flight(job.id) {
                continue;
            }
            match self.queue.enqueue(job.id)? {
                Enqueued::Queued => queued += 1,
                Enqueued::Duplicate => {}
                Enqueued::Backlogged => break,
            }
        }
        if queued > 0 {
            tracing::info!("Queued {} backlogged imports", queued);
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewaySettings;
    use crate::types::{ImportPhase, Provenance, TableType};
    use std::io::Write;
    use tokio::sync::mpsc;

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", text)
    }

    fn docx(body: &str) -> Vec<u8> {
        let xml = format!(
            "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn faculty_docx() -> Vec<u8> {
        docx(&[
            para("STANDARD 3 FACULTY"),
            para("All faculty hold terminal degree credentials and meet the qualifications for their teaching load."),
            para("PART II PROGRAM NOTES"),
            para("The weather was pleasant this year."),
        ]
        .concat())
    }

    fn orchestrator(
        gateway: Option<Arc<ExternalMappingGateway>>,
    ) -> (ImportOrchestrator, mpsc::Receiver<Uuid>) {
        orchestrator_with_capacity(gateway, 16)
    }

    fn orchestrator_with_capacity(
        gateway: Option<Arc<ExternalMappingGateway>>,
        capacity: usize,
    ) -> (ImportOrchestrator, mpsc::Receiver<Uuid>) {
        let (queue, receiver) = ImportQueue::new(capacity);
        let orchestrator = ImportOrchestrator::new(
            ImportStore::in_memory().unwrap(),
            Arc::new(Taxonomy::default()),
            gateway,
            queue,
            OrchestratorSettings::default(),
        )
        .unwrap();
        (orchestrator, receiver)
    }

    #[tokio::test]
    async fn test_local_path_maps_standard_reference() {
        let (orch, mut receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();
        assert_eq!(receiver.recv().await, Some(job.id));

        orch.process(job.id).await.unwrap();

        let status = orch.status(job.id).unwrap();
        assert_eq!(status.status, ImportStatus::Completed);
        assert_eq!(status.phase, ImportPhase::Completed);
        assert_eq!(status.counts.sections, 2);
        assert_eq!(status.counts.mapped, 1);
        assert_eq!(status.counts.unmapped, 1);
        assert_eq!(status.recent_activity.len(), 1);
        assert_eq!(status.recent_activity[0].standard_code, "3");
        assert_eq!(status.recent_activity[0].provenance, Provenance::Auto);

        // every section sits in exactly one bucket
        let store = orch.store();
        for section in store.read(|c| c.list_sections(job.id)).unwrap() {
            let (mapping, item) = store
                .read(|c| Ok((c.get_mapping(section.id)?, c.get_unmapped(section.id)?)))
                .unwrap();
            assert!(mapping.is_some() != item.is_some());
        }
        // source bytes are dropped once terminal
        assert!(store.read(|c| c.get_source(job.id)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_curriculum_matrix_routes_to_curriculum_standard() {
        let row = |cells: &[&str]| {
            let tcs: String = cells.iter().map(|c| format!("<w:tc>{}</w:tc>", para(c))).collect();
            format!("<w:tr>{}</w:tr>", tcs)
        };
        let body = format!(
            "{}<w:tbl>{}{}{}</w:tbl>",
            para("Curriculum Map"),
            row(&["Course", "Competency 1", "Competency 2"]),
            row(&["NUR 101", "I", "R"]),
            row(&["NUR 301", "R", "M"]),
        );
        let (orch, _receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "map.docx", docx(&body)).unwrap();
        orch.process(job.id).await.unwrap();

        let tables = orch.store().read(|c| c.list_tables(job.id)).unwrap();
        assert_eq!(tables.len(), 1);
        let mapping = orch
            .store()
            .read(|c| c.get_mapping(tables[0].section_id))
            .unwrap()
            .unwrap();
        assert_eq!(mapping.standard_code, Taxonomy::default().curriculum_standard);
        assert_eq!(mapping.field_type, "matrix");
    }

    #[tokio::test]
    async fn test_standard_heading_with_keyword_body_maps_once() {
        let body = [
            para("Standard 3"),
            para("faculty credentials include a terminal degree"),
        ]
        .concat();
        let (orch, _receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "standard3.docx", docx(&body)).unwrap();
        orch.process(job.id).await.unwrap();

        let mappings = orch.store().read(|c| c.list_mappings(job.id)).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].standard_code, "3");
        assert_eq!(mappings[0].provenance, Provenance::Auto);
        assert_eq!(orch.status(job.id).unwrap().status, ImportStatus::Completed);
    }

    #[tokio::test]
    async fn test_course_standard_coverage_table_maps_as_matrix() {
        let row = |cells: &[&str]| {
            let tcs: String = cells.iter().map(|c| format!("<w:tc>{}</w:tc>", para(c))).collect();
            format!("<w:tr>{}</w:tr>", tcs)
        };
        let body = format!(
            "{}<w:tbl>{}{}{}</w:tbl>",
            para("Curriculum Map"),
            row(&["Course", "Standard", "Coverage"]),
            row(&["NUR 101", "2", "I/H"]),
            row(&["NUR 301", "4", "H"]),
        );
        let (orch, _receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "coverage.docx", docx(&body)).unwrap();
        orch.process(job.id).await.unwrap();

        let tables = orch.store().read(|c| c.list_tables(job.id)).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_type, TableType::CurriculumMatrix);
        assert_eq!(tables[0].headers, vec!["Course", "Standard", "Coverage"]);

        let mapping = orch
            .store()
            .read(|c| c.get_mapping(tables[0].section_id))
            .unwrap()
            .unwrap();
        assert_eq!(mapping.standard_code, Taxonomy::default().curriculum_standard);
        assert_eq!(mapping.field_type, "matrix");
    }

    #[tokio::test]
    async fn test_submit_validation_and_conflict() {
        let (orch, _receiver) = orchestrator(None);
        assert!(matches!(
            orch.submit(" ", "study.docx", faculty_docx()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            orch.submit("sub-1", "study.doc", vec![1]),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(
            orch.submit("sub-1", "study.docx", Vec::new()),
            Err(Error::Validation(_))
        ));

        orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();
        assert!(matches!(
            orch.submit("sub-1", "again.docx", faculty_docx()),
            Err(Error::Conflict(_))
        ));
        // other submissions are unaffected
        orch.submit("sub-2", "study.docx", faculty_docx()).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let (orch, _receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();

        orch.cancel(job.id).unwrap();
        assert!(matches!(orch.status(job.id), Err(Error::NotFound(_))));
        assert!(matches!(orch.cancel(job.id), Err(Error::NotFound(_))));

        // the queued id finds nothing and does not resurrect the import
        orch.process(job.id).await.unwrap();
        assert!(matches!(orch.status(job.id), Err(Error::NotFound(_))));

        let done = orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();
        orch.process(done.id).await.unwrap();
        assert!(matches!(orch.cancel(done.id), Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_parse_failure_is_recorded() {
        let (orch, _receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "broken.docx", b"PK not really".to_vec()).unwrap();
        assert!(orch.process(job.id).await.is_err());

        let status = orch.status(job.id).unwrap();
        assert_eq!(status.status, ImportStatus::Failed);
        assert!(status.error.unwrap().contains("broken.docx"));
        assert!(status.completed_at.is_some());

        // failed imports are not picked up again
        orch.process(job.id).await.unwrap();
        assert_eq!(orch.status(job.id).unwrap().status, ImportStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_document_fails_with_message() {
        let (orch, _receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "blank.docx", docx("")).unwrap();
        assert!(orch.process(job.id).await.is_err());
        let status = orch.status(job.id).unwrap();
        assert!(status.error.unwrap().contains("no extractable text"));
    }

    #[tokio::test]
    async fn test_external_path_waits_for_callbacks() {
        use crate::gateway::{ChunkRequest, ChunkTransport};
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<ChunkRequest>>);

        #[async_trait::async_trait]
        impl ChunkTransport for Recorder {
            async fn send(&self, chunk: &ChunkRequest) -> Result<()> {
                self.0.lock().push(chunk.clone());
                Ok(())
            }
            fn name(&self) -> &str {
                "recorder"
            }
        }

        let transport = Arc::new(Recorder::default());
        let gateway = ExternalMappingGateway::new(
            transport.clone(),
            GatewaySettings {
                callback_url: "http://localhost/cb".into(),
                taxonomy_name: "default".into(),
                confidence_threshold: 50,
                chunk_delay: Duration::ZERO,
            },
        );
        let (orch, _receiver) = orchestrator(Some(Arc::new(gateway)));
        let job = orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();
        orch.process(job.id).await.unwrap();

        let status = orch.status(job.id).unwrap();
        assert_eq!(status.status, ImportStatus::Processing);
        assert_eq!(status.phase, ImportPhase::AwaitingResults);
        assert_eq!(status.progress.total_chunks, 2);
        assert_eq!(transport.0.lock().len(), 2);
        assert_eq!(status.counts.mapped, 0);

        // handed-off imports are not resumed after a restart
        assert_eq!(orch.resume_incomplete().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resume_requeues_pending_imports() {
        let (orch, mut receiver) = orchestrator(None);
        let job = orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();
        assert_eq!(receiver.recv().await, Some(job.id));
        orch.queue().started(job.id);
        orch.queue().finish(job.id);

        assert_eq!(orch.resume_incomplete().unwrap(), 1);
        assert_eq!(receiver.recv().await, Some(job.id));
    }

    #[tokio::test]
    async fn test_full_queue_leaves_upload_pending() {
        let (orch, mut receiver) = orchestrator_with_capacity(None, 1);
        let first = orch.submit("sub-1", "study.docx", faculty_docx()).unwrap();

        let second = orch.submit("sub-2", "study.docx", faculty_docx()).unwrap();

        assert_eq!(orch.status(second.id).unwrap().status, ImportStatus::Pending);
        assert!(!orch.queue().is_in_flight(second.id));
        assert_eq!(orch.requeue_backlog().unwrap(), 0);

        assert_eq!(receiver.recv().await, Some(first.id));
        orch.queue().started(first.id);
        orch.process(first.id).await.unwrap();
        orch.queue().finish(first.id);

        assert_eq!(orch.requeue_backlog().unwrap(), 1);
        assert_eq!(receiver.recv().await, Some(second.id));
    }
}
