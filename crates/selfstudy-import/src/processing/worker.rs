//! Background worker draining the import queue

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use super::orchestrator::ImportOrchestrator;
use super::queue::ImportQueue;

/// Runs queued imports, at most `concurrency` at a time
pub struct ImportWorker {
    orchestrator: Arc<ImportOrchestrator>,
    queue: ImportQueue,
    concurrency: usize,
}

impl ImportWorker {
    pub fn new(orchestrator: Arc<ImportOrchestrator>, concurrency: usize) -> Self {
        let queue = orchestrator.queue().clone();
        Self {
            orchestrator,
            queue,
            concurrency: concurrency.max(1),
        }
    }

    /// Start processing imports from the queue
    pub async fn run(self, mut receiver: mpsc::Receiver<Uuid>) {
        tracing::info!("Import worker started: {} concurrent imports", self.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        while let Some(import_id) = receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            self.queue.started(import_id);

            let orchestrator = self.orchestrator.clone();
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let start_time = std::time::Instant::now();
                match orchestrator.process(import_id).await {
                    Ok(()) => tracing::info!(
                        "[{}] processing step finished in {:.1}s",
                        import_id,
                        start_time.elapsed().as_secs_f64()
                    ),
                    Err(e) => tracing::error!("[{}] import failed: {}", import_id, e),
                }
                queue.finish(import_id);

                if let Err(e) = orchestrator.requeue_backlog() {
                    tracing::warn!("Failed to queue backlogged imports: {}", e);
                }
            });
        }

        tracing::info!("Import queue closed, worker stopping");
    }
}
