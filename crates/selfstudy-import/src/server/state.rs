//! Application state for the import server

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ImportConfig;
use crate::error::Result;
use crate::gateway::{CallbackReceiver, ExternalMappingGateway};
use crate::mapping::Taxonomy;
use crate::processing::{ImportOrchestrator, ImportQueue, ImportWorker, OrchestratorSettings};
use crate::storage::ImportStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ImportConfig,
    store: ImportStore,
    taxonomy: Arc<Taxonomy>,
    orchestrator: Arc<ImportOrchestrator>,
    callbacks: CallbackReceiver,
    started_at: Instant,
    ready: RwLock<bool>,
}

impl AppState {
    /// Open the database, wire the pipeline, start the worker and re-queue
    /// imports interrupted by the last shutdown.
    pub async fn new(config: ImportConfig) -> Result<Self> {
        tracing::info!("Initializing import service state...");

        let store = ImportStore::open(&config.storage.database_path)?;
        tracing::info!("Database opened at {}", config.storage.database_path.display());

        let gateway = if config.classifier.enabled {
            let gateway = ExternalMappingGateway::from_config(&config.classifier)?;
            tracing::info!(
                "External classifier enabled: {} (callbacks to {})",
                config.classifier.endpoint,
                config.classifier.callback_url
            );
            Some(Arc::new(gateway))
        } else {
            tracing::info!("External classifier disabled, using local pattern mapper");
            None
        };

        let state = Self::from_parts(config, store, gateway)?;
        let resumed = state.orchestrator().resume_incomplete()?;
        tracing::info!("Import service ready ({} imports resumed)", resumed);
        Ok(state)
    }

    /// Build state around an existing store. Spawns the worker, so it must be
    /// called inside a tokio runtime.
    pub fn from_parts(
        config: ImportConfig,
        store: ImportStore,
        gateway: Option<Arc<ExternalMappingGateway>>,
    ) -> Result<Self> {
        let taxonomy = match &config.mapping.taxonomy_path {
            Some(path) => Taxonomy::load(path)?,
            None => Taxonomy::default(),
        };
        tracing::info!(
            "Taxonomy '{}' loaded with {} standards",
            taxonomy.name,
            taxonomy.standards.len()
        );
        let taxonomy = Arc::new(taxonomy);

        let (queue, receiver) = ImportQueue::new(config.processing.queue_capacity);
        let orchestrator = Arc::new(ImportOrchestrator::new(
            store.clone(),
            taxonomy.clone(),
            gateway,
            queue,
            OrchestratorSettings::from(&config),
        )?);

        let callbacks = CallbackReceiver::new(
            store.clone(),
            orchestrator.reconciler().clone(),
            config.mapping.external_threshold,
            config.classifier.callback_secret.clone(),
        );

        let worker_count = config.processing.worker_count();
        let worker = ImportWorker::new(orchestrator.clone(), worker_count);
        tokio::spawn(async move {
            worker.run(receiver).await;
        });

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                taxonomy,
                orchestrator,
                callbacks,
                started_at: Instant::now(),
                ready: RwLock::new(true),
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ImportConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ImportStore {
        &self.inner.store
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.inner.taxonomy
    }

    pub fn orchestrator(&self) -> &Arc<ImportOrchestrator> {
        &self.inner.orchestrator
    }

    pub fn callbacks(&self) -> &CallbackReceiver {
        &self.inner.callbacks
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Ready flag set and the database answering
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read() && self.inner.store.ping().is_ok()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
