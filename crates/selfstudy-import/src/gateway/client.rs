//! Outbound hand-off of a parsed document to the external classifier

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::protocol::{ChunkOptions, ChunkRequest, HTML_ENCODING};
use crate::config::{ClassifierAuth, ClassifierConfig};
use crate::error::{Error, Result};
use crate::ingestion::split_chunks;
use crate::storage::ImportStore;

/// Longest response body quoted in an error
const MAX_ERROR_BODY: usize = 500;

/// Delivers one chunk to the classifier
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn send(&self, chunk: &ChunkRequest) -> Result<()>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

/// reqwest transport with a bounded per-request timeout
pub struct HttpChunkTransport {
    client: Client,
    endpoint: String,
    auth: ClassifierAuth,
    timeout: Duration,
}

impl HttpChunkTransport {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth: config.auth.clone(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn send(&self, chunk: &ChunkRequest) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(chunk);
        request = match &self.auth {
            ClassifierAuth::None => request,
            ClassifierAuth::SharedSecret { header, secret } => {
                request.header(header.as_str(), secret.as_str())
            }
            ClassifierAuth::Bearer { token } => request.bearer_auth(token),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::external(format!(
                    "classifier did not answer within {}s",
                    self.timeout.as_secs()
                ))
            } else {
                Error::external(format!("classifier request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(Error::external(format!(
                "classifier rejected chunk {}/{}: {} - {}",
                chunk.section_index + 1,
                chunk.total_sections,
                status,
                body
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Fixed parameters of every send
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub callback_url: String,
    pub taxonomy_name: String,
    pub confidence_threshold: u32,
    pub chunk_delay: Duration,
}

impl From<&ClassifierConfig> for GatewaySettings {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            callback_url: config.callback_url.clone(),
            taxonomy_name: config.taxonomy_name.clone(),
            confidence_threshold: config.confidence_threshold,
            chunk_delay: config.chunk_delay(),
        }
    }
}

/// Splits rendered HTML into chunks and sends them in order
pub struct ExternalMappingGateway {
    transport: Arc<dyn ChunkTransport>,
    settings: GatewaySettings,
}

impl ExternalMappingGateway {
    pub fn new(transport: Arc<dyn ChunkTransport>, settings: GatewaySettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Reqwest-backed gateway from configuration
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let transport = HttpChunkTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), GatewaySettings::from(config)))
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Send a document's HTML. The job records a fresh external id and the
    /// chunk count before the first request goes out. Any failed send aborts
    /// the rest; there is no per-chunk retry.
    pub async fn dispatch(&self, store: &ImportStore, import_id: Uuid, html: &str) -> Result<u32> {
        let chunks = split_chunks(html);
        if chunks.is_empty() {
            return Err(Error::validation("document has no content to classify"));
        }
        let total = chunks.len() as u32;
        let external_job_id = Uuid::new_v4();

        store.transaction(|tx| {
            let mut job = tx
                .get_job(import_id)?
                .ok_or_else(|| Error::not_found(format!("Import {} not found", import_id)))?;
            job.record_sent(external_job_id, total);
            tx.update_job(&job)
        })?;

        tracing::info!(
            "[{}] sending {} chunks to classifier via {} (job {})",
            import_id,
            total,
            self.transport.name(),
            external_job_id
        );

        let engine = base64::engine::general_purpose::STANDARD;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let index = index as u32;
            if index > 0 {
                if !self.settings.chunk_delay.is_zero() {
                    tokio::time::sleep(self.settings.chunk_delay).await;
                }
                // stop early if the import was cancelled mid-send
                if store.read(|c| c.get_job(import_id))?.is_none() {
                    return Err(Error::not_found(format!("Import {} not found", import_id)));
                }
            }

            let request = ChunkRequest {
                callback_url: self.settings.callback_url.clone(),
                taxonomy_name: self.settings.taxonomy_name.clone(),
                document_id: import_id,
                job_id: external_job_id,
                section_index: index,
                total_sections: total,
                section_heading: chunk.heading,
                encoded_html: engine.encode(chunk.html.as_bytes()),
                encoding: HTML_ENCODING.to_string(),
                more_data_follows: index + 1 < total,
                options: ChunkOptions {
                    confidence_threshold: self.settings.confidence_threshold,
                },
            };
            self.transport.send(&request).await?;
            tracing::debug!("[{}] sent chunk {}/{}", import_id, index + 1, total);
        }

        Ok(total)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{FileType, ImportJob, ImportStatus};
    use parking_lot::Mutex;

    /// Records every chunk; optionally fails from a given index on
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<ChunkRequest>>,
        pub fail_at: Option<u32>,
    }

    #[async_trait]
    impl ChunkTransport for RecordingTransport {
        async fn send(&self, chunk: &ChunkRequest) -> Result<()> {
            if self.fail_at == Some(chunk.section_index) {
                return Err(Error::external("classifier rejected chunk: 503"));
            }
            self.sent.lock().push(chunk.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    pub fn settings() -> GatewaySettings {
        GatewaySettings {
            callback_url: "http://localhost/api/callbacks/classification".into(),
            taxonomy_name: "default".into(),
            confidence_threshold: 50,
            chunk_delay: Duration::ZERO,
        }
    }

    fn processing_job(store: &ImportStore) -> ImportJob {
        let mut job = ImportJob::new("sub-1", "study.docx", "hash", FileType::Docx, "default");
        job.transition(ImportStatus::Processing);
        store
            .transaction(|tx| {
                tx.insert_job(&job, b"x")?;
                tx.update_job(&job)
            })
            .unwrap();
        job
    }

    const HTML: &str = "<p>Preamble.</p>\n<h1>STANDARD 1</h1>\n<p>One.</p>\n<h1>STANDARD 2</h1>\n<p>Two.</p>\n";

    #[tokio::test]
    async fn test_dispatch_sends_ordered_chunks() {
        let store = ImportStore::in_memory().unwrap();
        let job = processing_job(&store);
        let transport = Arc::new(RecordingTransport::default());
        let gateway = ExternalMappingGateway::new(transport.clone(), settings());

        let total = gateway.dispatch(&store, job.id, HTML).await.unwrap();
        assert_eq!(total, 3);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].section_heading, "");
        assert_eq!(sent[1].section_heading, "STANDARD 1");
        assert!(sent[0].more_data_follows && sent[1].more_data_follows);
        assert!(!sent[2].more_data_follows);
        assert!(sent.iter().all(|c| c.job_id == sent[0].job_id && c.document_id == job.id));

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&sent[2].encoded_html)
            .unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("Two."));

        let stored = store.read(|c| c.get_job(job.id)).unwrap().unwrap();
        assert_eq!(stored.total_chunks, 3);
        assert_eq!(stored.external_job_id, Some(sent[0].job_id));
        assert!(stored.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_aborts_on_failure() {
        let store = ImportStore::in_memory().unwrap();
        let job = processing_job(&store);
        let transport = Arc::new(RecordingTransport {
            fail_at: Some(1),
            ..Default::default()
        });
        let gateway = ExternalMappingGateway::new(transport.clone(), settings());

        let err = gateway.dispatch(&store, job.id, HTML).await.unwrap_err();
        assert!(matches!(err, Error::ExternalService(_)));
        assert_eq!(transport.sent.lock().len(), 1);
    }
}
