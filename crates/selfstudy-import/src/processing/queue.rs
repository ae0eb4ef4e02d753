//! Bounded queue of import ids waiting for the background worker

use dashmap::DashSet;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Queue depth snapshot for `/api/info`
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
}

/// What happened to an id handed to [`ImportQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Already queued or running
    Duplicate,
    /// Channel at capacity; the job stays pending until the worker has room
    Backlogged,
}

/// Sender side of the import queue. An id is accepted once until the worker
/// reports it finished.
#[derive(Clone)]
pub struct ImportQueue {
    sender: mpsc::Sender<Uuid>,
    in_flight: Arc<DashSet<Uuid>>,
    queued: Arc<AtomicUsize>,
}

impl ImportQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender,
            in_flight: Arc::new(DashSet::new()),
            queued: Arc::new(AtomicUsize::new(0)),
        };
        (queue, receiver)
    }

    /// Queue an import without waiting for channel capacity
    pub fn enqueue(&self, import_id: Uuid) -> Result<Enqueued> {
        if !self.in_flight.insert(import_id) {
            tracing::debug!("[{}] already queued", import_id);
            return Ok(Enqueued::Duplicate);
        }

        match self.sender.try_send(import_id) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                Ok(Enqueued::Queued)
            }
            Err(TrySendError::Full(_)) => {
                self.in_flight.remove(&import_id);
                tracing::warn!("[{}] import queue full, left pending", import_id);
                Ok(Enqueued::Backlogged)
            }
            Err(TrySendError::Closed(_)) => {
                self.in_flight.remove(&import_id);
                Err(Error::internal("import queue closed"))
            }
        }
    }

    /// Called by the worker when it picks an id off the channel
    pub fn started(&self, import_id: Uuid) {
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        tracing::debug!("[{}] dequeued", import_id);
    }

    /// Called by the worker once processing returns
    pub fn finish(&self, import_id: Uuid) {
        self.in_flight.remove(&import_id);
    }

    pub fn is_in_flight(&self, import_id: Uuid) -> bool {
        self.in_flight.contains(&import_id)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.queued.load(Ordering::SeqCst),
            in_flight: self.in_flight.len(),
        }
    }
}
