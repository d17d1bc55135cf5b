//! Best-effort live fan-out of decoded samples.
//!
//! Every observer gets its own bounded queue, so delivery to one observer is FIFO and a slow
//! observer only loses its own events. `publish` never blocks: a full queue drops the event for
//! that observer, a closed queue removes the observer.

use crate::sample::Sample;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One serialized live event, shared by every observer queue.
pub type LiveEvent = Arc<str>;

pub struct Subscription {
    pub id: u64,
    pub events: mpsc::Receiver<LiveEvent>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub skipped: usize,
    pub removed: usize,
}

pub struct FanoutHub {
    queue_capacity: usize,
    next_id: AtomicU64,
    observers: Mutex<HashMap<u64, mpsc::Sender<LiveEvent>>>,
}

impl FanoutHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(1),
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers_lock().insert(id, tx);
        tracing::debug!(observer = id, "live observer subscribed");
        Subscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.observers_lock().remove(&id).is_some() {
            tracing::debug!(observer = id, "live observer unsubscribed");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers_lock().len()
    }

    pub fn publish(&self, sample: &Sample) -> PublishReport {
        let mut report = PublishReport::default();
        let event: LiveEvent = match serde_json::to_string(sample) {
            Ok(json) => json.into(),
            Err(err) => {
                tracing::warn!(error = %err, channel = %sample.channel, "failed to encode live event");
                return report;
            }
        };

        let mut observers = self.observers_lock();
        observers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(observer = id, "live observer lagging; event skipped");
                report.skipped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(observer = id, "live observer gone; removing");
                report.removed += 1;
                false
            }
        });
        report
    }

    fn observers_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<LiveEvent>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
