//! SQLite persistence for imports, extracted content, mappings and narratives
//!
//! Every multi-row write goes through [`ImportStore::transaction`], which holds
//! the connection lock for the whole closure and commits only on `Ok`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    ExtractedSection, ExtractedTable, FileType, ImportCounts, ImportJob, ImportLink,
    ImportStatus, NarrativeSlot, Provenance, ReviewAction, SectionMapping, SectionOrigin,
    SectionType, TableType, UnmappedItem,
};

/// SQLite-backed store for the import pipeline
#[derive(Clone)]
pub struct ImportStore {
    conn: Arc<Mutex<Connection>>,
}

/// Typed access to the tables, either inside a transaction or for a plain read
pub struct StoreConn<'a> {
    conn: &'a Connection,
}

impl ImportStore {
    /// Create or open the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (tests and throwaway runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
        "#).map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS import_jobs (
                id TEXT PRIMARY KEY,
                submission_id TEXT NOT NULL,
                source_filename TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                file_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error TEXT,
                external_job_id TEXT,
                sent_at TEXT,
                first_callback_at TEXT,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                received_chunks INTEGER NOT NULL DEFAULT 0,
                received_indices TEXT NOT NULL DEFAULT '[]',
                taxonomy_name TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_import_jobs_status ON import_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_import_jobs_submission ON import_jobs(submission_id);
            CREATE INDEX IF NOT EXISTS idx_import_jobs_external ON import_jobs(external_job_id);

            -- Raw upload, dropped once the job is terminal
            CREATE TABLE IF NOT EXISTS import_sources (
                import_id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                FOREIGN KEY (import_id) REFERENCES import_jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS extracted_sections (
                id TEXT PRIMARY KEY,
                import_id TEXT NOT NULL,
                origin TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                span_start INTEGER NOT NULL,
                span_end INTEGER NOT NULL,
                section_type TEXT NOT NULL,
                heading TEXT,
                content TEXT NOT NULL,
                confidence REAL NOT NULL,
                suggested_standard TEXT,
                external_ref TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (import_id) REFERENCES import_jobs(id) ON DELETE CASCADE,
                UNIQUE(import_id, external_ref)
            );

            CREATE INDEX IF NOT EXISTS idx_extracted_sections_import ON extracted_sections(import_id);

            CREATE TABLE IF NOT EXISTS extracted_tables (
                id TEXT PRIMARY KEY,
                import_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                headers TEXT NOT NULL,
                rows TEXT NOT NULL,
                table_type TEXT NOT NULL,
                FOREIGN KEY (import_id) REFERENCES import_jobs(id) ON DELETE CASCADE,
                FOREIGN KEY (section_id) REFERENCES extracted_sections(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_extracted_tables_import ON extracted_tables(import_id);

            CREATE TABLE IF NOT EXISTS section_mappings (
                section_id TEXT PRIMARY KEY,
                import_id TEXT NOT NULL,
                standard_code TEXT NOT NULL,
                spec_code TEXT,
                field_type TEXT NOT NULL,
                provenance TEXT NOT NULL,
                confidence REAL NOT NULL,
                mapped_by TEXT NOT NULL,
                mapped_at TEXT NOT NULL,
                FOREIGN KEY (section_id) REFERENCES extracted_sections(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_section_mappings_import ON section_mappings(import_id);

            CREATE TABLE IF NOT EXISTS unmapped_items (
                section_id TEXT PRIMARY KEY,
                import_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                review_action TEXT NOT NULL DEFAULT 'pending',
                reviewer TEXT,
                reviewed_at TEXT,
                created_at TEXT NOT NULL,
                alternatives TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY (section_id) REFERENCES extracted_sections(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_unmapped_items_import ON unmapped_items(import_id);

            -- Collaborator-side narrative slots
            CREATE TABLE IF NOT EXISTS submission_narratives (
                submission_id TEXT NOT NULL,
                standard_code TEXT NOT NULL,
                spec_code TEXT NOT NULL DEFAULT '',
                field_type TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (submission_id, standard_code, spec_code, field_type)
            );

            CREATE TABLE IF NOT EXISTS submission_import_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                submission_id TEXT NOT NULL,
                import_id TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                sections_applied INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_submission_import_links_submission
                ON submission_import_links(submission_id);

            -- Re-application guard for apply-to-submission
            CREATE TABLE IF NOT EXISTS applied_sections (
                section_id TEXT NOT NULL,
                submission_id TEXT NOT NULL,
                standard_code TEXT NOT NULL,
                spec_code TEXT NOT NULL,
                field_type TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                PRIMARY KEY (section_id, submission_id, standard_code, spec_code, field_type)
            );
        "#)
        .map_err(|e| Error::storage(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Run `f` inside a single SQLite transaction. Any error rolls back.
    pub fn transaction<T>(&self, f: impl FnOnce(&StoreConn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&StoreConn { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    /// Run read-only work under the connection lock
    pub fn read<T>(&self, f: impl FnOnce(&StoreConn<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&StoreConn { conn: &conn })
    }

    /// Liveness probe for `/ready`
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

const JOB_COLUMNS: &str = "id, submission_id, source_filename, source_hash, file_type, status, \
    created_at, started_at, completed_at, error, external_job_id, sent_at, first_callback_at, \
    total_chunks, received_chunks, received_indices, taxonomy_name";

const SECTION_COLUMNS: &str = "id, import_id, origin, page_number, span_start, span_end, \
    section_type, heading, content, confidence, suggested_standard, external_ref, created_at";

const MAPPING_COLUMNS: &str = "section_id, import_id, standard_code, spec_code, field_type, \
    provenance, confidence, mapped_by, mapped_at";

const UNMAPPED_COLUMNS: &str =
    "section_id, import_id, reason, review_action, reviewer, reviewed_at, created_at, alternatives";

impl StoreConn<'_> {
    // ==================== Import Jobs ====================

    /// Insert a new job together with its source bytes
    pub fn insert_job(&self, job: &ImportJob, source: &[u8]) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO import_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                JOB_COLUMNS
            ),
            params![
                job.id.to_string(),
                job.submission_id,
                job.source_filename,
                job.source_hash,
                job.file_type.as_str(),
                job.status.as_str(),
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.error,
                job.external_job_id.map(|id| id.to_string()),
                job.sent_at.map(|t| t.to_rfc3339()),
                job.first_callback_at.map(|t| t.to_rfc3339()),
                job.total_chunks as i64,
                job.received_chunks as i64,
                indices_to_json(&job.received_indices)?,
                job.taxonomy_name,
            ],
        )?;

        self.conn.execute(
            "INSERT INTO import_sources (import_id, data) VALUES (?1, ?2)",
            params![job.id.to_string(), source],
        )?;

        Ok(())
    }

    /// Persist every mutable field of a job. Fails with NotFound if the row
    /// is gone (e.g. cancelled while work was in flight).
    pub fn update_job(&self, job: &ImportJob) -> Result<()> {
        let count = self.conn.execute(
            r#"
            UPDATE import_jobs SET
                status = ?2, started_at = ?3, completed_at = ?4, error = ?5,
                external_job_id = ?6, sent_at = ?7, first_callback_at = ?8,
                total_chunks = ?9, received_chunks = ?10, received_indices = ?11
            WHERE id = ?1
            "#,
            params![
                job.id.to_string(),
                job.status.as_str(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.error,
                job.external_job_id.map(|id| id.to_string()),
                job.sent_at.map(|t| t.to_rfc3339()),
                job.first_callback_at.map(|t| t.to_rfc3339()),
                job.total_chunks as i64,
                job.received_chunks as i64,
                indices_to_json(&job.received_indices)?,
            ],
        )?;

        if count == 0 {
            return Err(Error::not_found(format!("Import {} not found", job.id)));
        }
        if job.status.is_terminal() {
            self.conn.execute(
                "DELETE FROM import_sources WHERE import_id = ?1",
                params![job.id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<ImportJob>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {} FROM import_jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.to_string()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn get_job_by_external_id(&self, external_job_id: Uuid) -> Result<Option<ImportJob>> {
        let job = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_jobs WHERE external_job_id = ?1 LIMIT 1",
                    JOB_COLUMNS
                ),
                params![external_job_id.to_string()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Most recent non-terminal job for a submission
    pub fn active_job_for_submission(&self, submission_id: &str) -> Result<Option<ImportJob>> {
        let job = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_jobs WHERE submission_id = ?1 \
                     AND status IN ('pending', 'processing') ORDER BY created_at DESC LIMIT 1",
                    JOB_COLUMNS
                ),
                params![submission_id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_jobs_by_status(&self, status: ImportStatus) -> Result<Vec<ImportJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM import_jobs WHERE status = ?1 ORDER BY created_at ASC",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![status.as_str()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Source bytes, present only while the job is non-terminal
    pub fn get_source(&self, import_id: Uuid) -> Result<Option<Vec<u8>>> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM import_sources WHERE import_id = ?1",
                params![import_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    /// Delete a job; children go with it through the foreign keys
    pub fn delete_job(&self, id: Uuid) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM import_jobs WHERE id = ?1", params![id.to_string()])?;
        Ok(count > 0)
    }

    /// Drop everything extracted for a job, keeping the job row and its source
    pub fn clear_extraction(&self, import_id: Uuid) -> Result<usize> {
        let count = self.conn.execute(
            "DELETE FROM extracted_sections WHERE import_id = ?1",
            params![import_id.to_string()],
        )?;
        Ok(count)
    }

    // ==================== Sections & Tables ====================

    pub fn insert_section(&self, section: &ExtractedSection) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO extracted_sections ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                SECTION_COLUMNS
            ),
            params![
                section.id.to_string(),
                section.import_id.to_string(),
                section.origin.as_str(),
                section.page_number as i64,
                section.span_start as i64,
                section.span_end as i64,
                section.section_type.as_str(),
                section.heading,
                section.content,
                section.confidence as f64,
                section.suggested_standard,
                section.external_ref,
                section.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_section(&self, id: Uuid) -> Result<Option<ExtractedSection>> {
        let section = self
            .conn
            .query_row(
                &format!("SELECT {} FROM extracted_sections WHERE id = ?1", SECTION_COLUMNS),
                params![id.to_string()],
                row_to_section,
            )
            .optional()?;
        Ok(section)
    }

    pub fn section_by_external_ref(
        &self,
        import_id: Uuid,
        external_ref: &str,
    ) -> Result<Option<ExtractedSection>> {
        let section = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM extracted_sections WHERE import_id = ?1 AND external_ref = ?2",
                    SECTION_COLUMNS
                ),
                params![import_id.to_string(), external_ref],
                row_to_section,
            )
            .optional()?;
        Ok(section)
    }

    /// Sections in insertion order (document order for parser output)
    pub fn list_sections(&self, import_id: Uuid) -> Result<Vec<ExtractedSection>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM extracted_sections WHERE import_id = ?1 ORDER BY rowid ASC",
            SECTION_COLUMNS
        ))?;
        let sections = stmt
            .query_map(params![import_id.to_string()], row_to_section)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sections)
    }

    /// Remove external sections that carry no human decision
    pub fn delete_unreviewed_external_sections(&self, import_id: Uuid) -> Result<usize> {
        let count = self.conn.execute(
            r#"
            DELETE FROM extracted_sections
            WHERE import_id = ?1
              AND origin = 'external'
              AND id NOT IN (SELECT section_id FROM section_mappings WHERE provenance = 'manual')
              AND id NOT IN (SELECT section_id FROM unmapped_items WHERE review_action != 'pending')
            "#,
            params![import_id.to_string()],
        )?;
        Ok(count)
    }

    pub fn insert_table(&self, table: &ExtractedTable) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO extracted_tables (id, import_id, section_id, page_number, headers, rows, table_type)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                table.id.to_string(),
                table.import_id.to_string(),
                table.section_id.to_string(),
                table.page_number as i64,
                serde_json::to_string(&table.headers)?,
                serde_json::to_string(&table.rows)?,
                table.table_type.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn list_tables(&self, import_id: Uuid) -> Result<Vec<ExtractedTable>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, import_id, section_id, page_number, headers, rows, table_type \
             FROM extracted_tables WHERE import_id = ?1 ORDER BY rowid ASC",
        )?;
        let tables = stmt
            .query_map(params![import_id.to_string()], row_to_table)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }

    // ==================== Mappings ====================

    pub fn upsert_mapping(&self, mapping: &SectionMapping) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO section_mappings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                MAPPING_COLUMNS
            ),
            params![
                mapping.extracted_section_id.to_string(),
                mapping.import_id.to_string(),
                mapping.standard_code,
                mapping.spec_code,
                mapping.field_type,
                mapping.provenance.as_str(),
                mapping.confidence as f64,
                mapping.mapped_by,
                mapping.mapped_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_mapping(&self, section_id: Uuid) -> Result<Option<SectionMapping>> {
        let mapping = self
            .conn
            .query_row(
                &format!("SELECT {} FROM section_mappings WHERE section_id = ?1", MAPPING_COLUMNS),
                params![section_id.to_string()],
                row_to_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    pub fn delete_mapping(&self, section_id: Uuid) -> Result<bool> {
        let count = self.conn.execute(
            "DELETE FROM section_mappings WHERE section_id = ?1",
            params![section_id.to_string()],
        )?;
        Ok(count > 0)
    }

    /// Mappings in the order their sections were extracted
    pub fn list_mappings(&self, import_id: Uuid) -> Result<Vec<SectionMapping>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT m.section_id, m.import_id, m.standard_code, m.spec_code, m.field_type,
                   m.provenance, m.confidence, m.mapped_by, m.mapped_at
            FROM section_mappings m
            JOIN extracted_sections s ON s.id = m.section_id
            WHERE m.import_id = ?1
            ORDER BY s.rowid ASC
            "#,
        )?;
        let mappings = stmt
            .query_map(params![import_id.to_string()], row_to_mapping)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mappings)
    }

    /// Newest mapping writes first
    pub fn recent_mappings(&self, import_id: Uuid, limit: usize) -> Result<Vec<SectionMapping>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM section_mappings WHERE import_id = ?1 ORDER BY mapped_at DESC, rowid DESC LIMIT ?2",
            MAPPING_COLUMNS
        ))?;
        let mappings = stmt
            .query_map(params![import_id.to_string(), limit as i64], row_to_mapping)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mappings)
    }

    pub fn delete_auto_mappings(&self, import_id: Uuid) -> Result<usize> {
        let count = self.conn.execute(
            "DELETE FROM section_mappings WHERE import_id = ?1 AND provenance = 'auto'",
            params![import_id.to_string()],
        )?;
        Ok(count)
    }

    // ==================== Unmapped Items ====================

    pub fn upsert_unmapped(&self, item: &UnmappedItem) -> Result<()> {
        let alternatives = serde_json::to_string(&item.alternatives)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO unmapped_items ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                UNMAPPED_COLUMNS
            ),
            params![
                item.extracted_section_id.to_string(),
                item.import_id.to_string(),
                item.reason,
                item.review_action.as_str(),
                item.reviewer,
                item.reviewed_at.map(|t| t.to_rfc3339()),
                item.created_at.to_rfc3339(),
                alternatives,
            ],
        )?;
        Ok(())
    }

    pub fn get_unmapped(&self, section_id: Uuid) -> Result<Option<UnmappedItem>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {} FROM unmapped_items WHERE section_id = ?1", UNMAPPED_COLUMNS),
                params![section_id.to_string()],
                row_to_unmapped,
            )
            .optional()?;
        Ok(item)
    }

    pub fn delete_unmapped(&self, section_id: Uuid) -> Result<bool> {
        let count = self.conn.execute(
            "DELETE FROM unmapped_items WHERE section_id = ?1",
            params![section_id.to_string()],
        )?;
        Ok(count > 0)
    }

    pub fn list_unmapped(&self, import_id: Uuid) -> Result<Vec<UnmappedItem>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT u.section_id, u.import_id, u.reason, u.review_action, u.reviewer,
                   u.reviewed_at, u.created_at, u.alternatives
            FROM unmapped_items u
            JOIN extracted_sections s ON s.id = u.section_id
            WHERE u.import_id = ?1
            ORDER BY s.rowid ASC
            "#,
        )?;
        let items = stmt
            .query_map(params![import_id.to_string()], row_to_unmapped)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn delete_pending_unmapped(&self, import_id: Uuid) -> Result<usize> {
        let count = self.conn.execute(
            "DELETE FROM unmapped_items WHERE import_id = ?1 AND review_action = 'pending'",
            params![import_id.to_string()],
        )?;
        Ok(count)
    }

    /// Sections with neither a mapping nor an unmapped item
    pub fn unresolved_section_ids(&self, import_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.id FROM extracted_sections s
            WHERE s.import_id = ?1
              AND s.id NOT IN (SELECT section_id FROM section_mappings)
              AND s.id NOT IN (SELECT section_id FROM unmapped_items)
            ORDER BY s.rowid ASC
            "#,
        )?;
        let ids = stmt
            .query_map(params![import_id.to_string()], |row| {
                let id: String = row.get(0)?;
                Ok(parse_uuid(&id))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn counts(&self, import_id: Uuid) -> Result<ImportCounts> {
        let id = import_id.to_string();
        let count = |sql: &str| -> Result<u32> {
            let n: i64 = self.conn.query_row(sql, params![id], |row| row.get(0))?;
            Ok(n as u32)
        };

        Ok(ImportCounts {
            sections: count("SELECT COUNT(*) FROM extracted_sections WHERE import_id = ?1")?,
            tables: count("SELECT COUNT(*) FROM extracted_tables WHERE import_id = ?1")?,
            mapped: count("SELECT COUNT(*) FROM section_mappings WHERE import_id = ?1")?,
            manual: count(
                "SELECT COUNT(*) FROM section_mappings WHERE import_id = ?1 AND provenance = 'manual'",
            )?,
            unmapped: count(
                "SELECT COUNT(*) FROM unmapped_items WHERE import_id = ?1 AND review_action != 'assigned'",
            )?,
            pending_review: count(
                "SELECT COUNT(*) FROM unmapped_items WHERE import_id = ?1 AND review_action = 'pending'",
            )?,
        })
    }

    // ==================== Submission Narratives ====================

    /// Append to a narrative slot, separating from existing content with a blank line
    pub fn append_narrative(
        &self,
        submission_id: &str,
        standard_code: &str,
        spec_code: &str,
        field_type: &str,
        content: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO submission_narratives
                (submission_id, standard_code, spec_code, field_type, content, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(submission_id, standard_code, spec_code, field_type) DO UPDATE SET
                content = CASE
                    WHEN submission_narratives.content = '' THEN excluded.content
                    ELSE submission_narratives.content || char(10) || char(10) || excluded.content
                END,
                updated_at = excluded.updated_at
            "#,
            params![
                submission_id,
                standard_code,
                spec_code,
                field_type,
                content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_narratives(&self, submission_id: &str) -> Result<Vec<NarrativeSlot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT submission_id, standard_code, spec_code, field_type, content, updated_at
            FROM submission_narratives
            WHERE submission_id = ?1
            ORDER BY CAST(standard_code AS INTEGER), standard_code, spec_code, field_type
            "#,
        )?;
        let slots = stmt
            .query_map(params![submission_id], |row| {
                let updated_at: String = row.get(5)?;
                Ok(NarrativeSlot {
                    submission_id: row.get(0)?,
                    standard_code: row.get(1)?,
                    spec_code: row.get(2)?,
                    field_type: row.get(3)?,
                    content: row.get(4)?,
                    updated_at: parse_time(&updated_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots)
    }

    /// Record a section as applied to a slot. Returns false if it already was.
    pub fn mark_applied(
        &self,
        section_id: Uuid,
        submission_id: &str,
        standard_code: &str,
        spec_code: &str,
        field_type: &str,
    ) -> Result<bool> {
        let count = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO applied_sections
                (section_id, submission_id, standard_code, spec_code, field_type, applied_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                section_id.to_string(),
                submission_id,
                standard_code,
                spec_code,
                field_type,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(count > 0)
    }

    pub fn insert_import_link(&self, link: &ImportLink) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO submission_import_links (submission_id, import_id, applied_at, sections_applied)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                link.submission_id,
                link.import_id.to_string(),
                link.applied_at.to_rfc3339(),
                link.sections_applied as i64,
            ],
        )?;
        Ok(())
    }

    pub fn list_import_links(&self, submission_id: &str) -> Result<Vec<ImportLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT submission_id, import_id, applied_at, sections_applied \
             FROM submission_import_links WHERE submission_id = ?1 ORDER BY id ASC",
        )?;
        let links = stmt
            .query_map(params![submission_id], |row| {
                let import_id: String = row.get(1)?;
                let applied_at: String = row.get(2)?;
                let sections_applied: i64 = row.get(3)?;
                Ok(ImportLink {
                    submission_id: row.get(0)?,
                    import_id: parse_uuid(&import_id),
                    applied_at: parse_time(&applied_at),
                    sections_applied: sections_applied as u32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }
}

// ==================== Row Conversion ====================

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
    })
}

fn indices_to_json(indices: &BTreeSet<u32>) -> Result<String> {
    Ok(serde_json::to_string(indices)?)
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ImportJob> {
    let id_str: String = row.get(0)?;
    let file_type_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_at_str: String = row.get(6)?;
    let external_job_id: Option<String> = row.get(10)?;
    let total_chunks: i64 = row.get(13)?;
    let received_chunks: i64 = row.get(14)?;
    let indices_json: String = row.get(15)?;

    Ok(ImportJob {
        id: parse_uuid(&id_str),
        submission_id: row.get(1)?,
        source_filename: row.get(2)?,
        source_hash: row.get(3)?,
        file_type: FileType::from_extension(&file_type_str),
        status: ImportStatus::parse(&status_str).unwrap_or(ImportStatus::Failed),
        created_at: parse_time(&created_at_str),
        started_at: parse_opt_time(row.get(7)?),
        completed_at: parse_opt_time(row.get(8)?),
        error: row.get(9)?,
        external_job_id: external_job_id.and_then(|s| Uuid::parse_str(&s).ok()),
        sent_at: parse_opt_time(row.get(11)?),
        first_callback_at: parse_opt_time(row.get(12)?),
        total_chunks: total_chunks as u32,
        received_chunks: received_chunks as u32,
        received_indices: serde_json::from_str(&indices_json).unwrap_or_default(),
        taxonomy_name: row.get(16)?,
    })
}

fn row_to_section(row: &rusqlite::Row) -> rusqlite::Result<ExtractedSection> {
    let id_str: String = row.get(0)?;
    let import_id_str: String = row.get(1)?;
    let origin_str: String = row.get(2)?;
    let page_number: i64 = row.get(3)?;
    let span_start: i64 = row.get(4)?;
    let span_end: i64 = row.get(5)?;
    let section_type_str: String = row.get(6)?;
    let confidence: f64 = row.get(9)?;
    let created_at_str: String = row.get(12)?;

    Ok(ExtractedSection {
        id: parse_uuid(&id_str),
        import_id: parse_uuid(&import_id_str),
        origin: SectionOrigin::parse(&origin_str),
        page_number: page_number as u32,
        span_start: span_start as usize,
        span_end: span_end as usize,
        section_type: SectionType::parse(&section_type_str),
        heading: row.get(7)?,
        content: row.get(8)?,
        confidence: confidence as f32,
        suggested_standard: row.get(10)?,
        external_ref: row.get(11)?,
        created_at: parse_time(&created_at_str),
    })
}

fn row_to_table(row: &rusqlite::Row) -> rusqlite::Result<ExtractedTable> {
    let id_str: String = row.get(0)?;
    let import_id_str: String = row.get(1)?;
    let section_id_str: String = row.get(2)?;
    let page_number: i64 = row.get(3)?;
    let headers_json: String = row.get(4)?;
    let rows_json: String = row.get(5)?;
    let table_type_str: String = row.get(6)?;

    Ok(ExtractedTable {
        id: parse_uuid(&id_str),
        import_id: parse_uuid(&import_id_str),
        section_id: parse_uuid(&section_id_str),
        page_number: page_number as u32,
        headers: serde_json::from_str(&headers_json).unwrap_or_default(),
        rows: serde_json::from_str(&rows_json).unwrap_or_default(),
        table_type: TableType::parse(&table_type_str),
    })
}

fn row_to_mapping(row: &rusqlite::Row) -> rusqlite::Result<SectionMapping> {
    let section_id_str: String = row.get(0)?;
    let import_id_str: String = row.get(1)?;
    let provenance_str: String = row.get(5)?;
    let confidence: f64 = row.get(6)?;
    let mapped_at_str: String = row.get(8)?;

    Ok(SectionMapping {
        extracted_section_id: parse_uuid(&section_id_str),
        import_id: parse_uuid(&import_id_str),
        standard_code: row.get(2)?,
        spec_code: row.get(3)?,
        field_type: row.get(4)?,
        provenance: Provenance::parse(&provenance_str),
        confidence: confidence as f32,
        mapped_by: row.get(7)?,
        mapped_at: parse_time(&mapped_at_str),
    })
}

fn row_to_unmapped(row: &rusqlite::Row) -> rusqlite::Result<UnmappedItem> {
    let section_id_str: String = row.get(0)?;
    let import_id_str: String = row.get(1)?;
    let action_str: String = row.get(3)?;
    let created_at_str: String = row.get(6)?;
    let alternatives_json: String = row.get(7)?;

    Ok(UnmappedItem {
        extracted_section_id: parse_uuid(&section_id_str),
        import_id: parse_uuid(&import_id_str),
        reason: row.get(2)?,
        review_action: ReviewAction::parse(&action_str),
        reviewer: row.get(4)?,
        reviewed_at: parse_opt_time(row.get(5)?),
        created_at: parse_time(&created_at_str),
        alternatives: serde_json::from_str(&alternatives_json).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ImportJob {
        ImportJob::new("sub-1", "study.docx", "hash", FileType::Docx, "default")
    }

    fn section(import_id: Uuid, content: &str) -> ExtractedSection {
        ExtractedSection::new(
            import_id,
            SectionOrigin::Parser,
            SectionType::Narrative,
            content.to_string(),
        )
    }

    #[test]
    fn test_job_roundtrip_and_source_cleanup() {
        let store = ImportStore::in_memory().unwrap();
        let mut job = job();
        store.transaction(|tx| tx.insert_job(&job, b"bytes")).unwrap();

        let loaded = store.read(|c| c.get_job(job.id)).unwrap().unwrap();
        assert_eq!(loaded.submission_id, "sub-1");
        assert_eq!(loaded.status, ImportStatus::Pending);
        assert_eq!(store.read(|c| c.get_source(job.id)).unwrap().unwrap(), b"bytes");

        job.transition(ImportStatus::Processing);
        job.record_sent(Uuid::new_v4(), 3);
        job.record_chunk(2);
        store.transaction(|tx| tx.update_job(&job)).unwrap();
        let loaded = store.read(|c| c.get_job(job.id)).unwrap().unwrap();
        assert_eq!(loaded.received_indices.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(loaded.external_job_id, job.external_job_id);

        job.transition(ImportStatus::Completed);
        store.transaction(|tx| tx.update_job(&job)).unwrap();
        assert!(store.read(|c| c.get_source(job.id)).unwrap().is_none());
    }

    #[test]
    fn test_delete_job_cascades() {
        let store = ImportStore::in_memory().unwrap();
        let job = job();
        let s = section(job.id, "content");
        store
            .transaction(|tx| {
                tx.insert_job(&job, b"x")?;
                tx.insert_section(&s)?;
                tx.upsert_unmapped(&UnmappedItem {
                    extracted_section_id: s.id,
                    import_id: job.id,
                    reason: "no pattern found".into(),
                    review_action: ReviewAction::Pending,
                    reviewer: None,
                    reviewed_at: None,
                    created_at: Utc::now(),
                    alternatives: Vec::new(),
                })
            })
            .unwrap();

        assert!(store.transaction(|tx| tx.delete_job(job.id)).unwrap());
        assert!(store.read(|c| c.get_section(s.id)).unwrap().is_none());
        assert!(store.read(|c| c.get_unmapped(s.id)).unwrap().is_none());
    }

    #[test]
    fn test_update_missing_job_is_not_found() {
        let store = ImportStore::in_memory().unwrap();
        let err = store.transaction(|tx| tx.update_job(&job())).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = ImportStore::in_memory().unwrap();
        let job = job();
        let result: Result<()> = store.transaction(|tx| {
            tx.insert_job(&job, b"x")?;
            Err(Error::internal("boom"))
        });
        assert!(result.is_err());
        assert!(store.read(|c| c.get_job(job.id)).unwrap().is_none());
    }

    #[test]
    fn test_append_narrative_separator() {
        let store = ImportStore::in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.append_narrative("sub-1", "3", "", "narrative", "First.")?;
                tx.append_narrative("sub-1", "3", "", "narrative", "Second.")
            })
            .unwrap();
        let slots = store.read(|c| c.list_narratives("sub-1")).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].content, "First.\n\nSecond.");
    }

    #[test]
    fn test_mark_applied_once() {
        let store = ImportStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(store.transaction(|tx| tx.mark_applied(id, "sub", "3", "", "narrative")).unwrap());
        assert!(!store.transaction(|tx| tx.mark_applied(id, "sub", "3", "", "narrative")).unwrap());
    }
}
