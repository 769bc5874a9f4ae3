//! Single-writer persistence queue.
//!
//! Mutations hand the latest document snapshot to [`WriteQueue::enqueue`],
//! which never blocks. A background task saves snapshots one at a time, so
//! writes reach the backend in mutation order. A snapshot that is still
//! waiting when a newer one arrives is replaced by it; the newer one
//! contains every earlier change.
//!
//! The task exits once the queue is dropped and the last snapshot is saved.
//! Outcomes are published as [`PersistEvent`]s. Save errors never travel
//! back into the mutation that triggered them.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::bridge::PersistBridge;
use crate::storage::adapter::WriteTarget;
use crate::types::BoardDocument;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum PersistEvent {
    Saved {
        generation: u64,
        target: WriteTarget,
    },
    Failed {
        generation: u64,
        message: String,
    },
}

#[derive(Clone)]
struct Snapshot {
    generation: u64,
    document: BoardDocument,
}

/// Event channel for [`WriteQueue::spawn`]. Created by the owner so that
/// receivers taken before the writer starts still see every event.
pub fn event_channel() -> broadcast::Sender<PersistEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

pub struct WriteQueue {
    pending: watch::Sender<Option<Snapshot>>,
    completed: watch::Receiver<u64>,
    events: broadcast::Sender<PersistEvent>,
    latest_generation: u64,
}

impl WriteQueue {
    /// Start the writer task, publishing outcomes on `events`. Must be
    /// called inside a tokio runtime.
    pub fn spawn(bridge: Arc<PersistBridge>, events: broadcast::Sender<PersistEvent>) -> Self {
        let (pending, pending_rx) = watch::channel(None);
        let (completed_tx, completed) = watch::channel(0u64);
        tokio::spawn(run(bridge, pending_rx, completed_tx, events.clone()));
        Self {
            pending,
            completed,
            events,
            latest_generation: 0,
        }
    }

    /// Queue `document` for saving, superseding any snapshot not yet started.
    /// Returns the generation assigned to this snapshot.
    pub fn enqueue(&mut self, document: &BoardDocument) -> u64 {
        self.latest_generation += 1;
        self.pending.send_replace(Some(Snapshot {
            generation: self.latest_generation,
            document: document.clone(),
        }));
        self.latest_generation
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest_generation
    }

    /// Wait until everything enqueued so far has been saved (or has failed).
    pub async fn flush(&self) {
        let target = self.latest_generation;
        let mut completed = self.completed.clone();
        if completed
            .wait_for(|done| *done >= target)
            .await
            .is_err()
        {
            log::warn!(
                target: "tabboard.writer",
                "Writer stopped before generation {} was saved",
                target
            );
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PersistEvent> {
        self.events.subscribe()
    }
}

async fn run(
    bridge: Arc<PersistBridge>,
    mut pending: watch::Receiver<Option<Snapshot>>,
    completed: watch::Sender<u64>,
    events: broadcast::Sender<PersistEvent>,
) {
    while pending.changed().await.is_ok() {
        let Some(snapshot) = pending.borrow_and_update().clone() else {
            continue;
        };

        let event = match bridge.save(&snapshot.document).await {
            Ok(target) => {
                log::debug!(
                    target: "tabboard.writer",
                    "Saved generation {} to {:?}",
                    snapshot.generation,
                    target
                );
                PersistEvent::Saved {
                    generation: snapshot.generation,
                    target,
                }
            }
            Err(e) => {
                log::error!(
                    target: "tabboard.writer",
                    "Saving generation {} failed: {}",
                    snapshot.generation,
                    e
                );
                PersistEvent::Failed {
                    generation: snapshot.generation,
                    message: e.to_string(),
                }
            }
        };
        // No subscribers is fine.
        let _ = events.send(event);
        completed.send_replace(snapshot.generation);
    }
}
