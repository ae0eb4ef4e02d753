//! Background import processing: queue, worker and lifecycle orchestration

mod orchestrator;
mod queue;
mod worker;

pub use orchestrator::{ImportOrchestrator, OrchestratorSettings, LOCAL_MAPPER, NO_PATTERN_REASON};
pub use queue::{Enqueued, ImportQueue, QueueStats};
pub use worker::ImportWorker;
