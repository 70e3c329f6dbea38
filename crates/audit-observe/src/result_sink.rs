use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::AuditOutcome;

#[derive(Debug, Default)]
struct ResultQueue {
    pending: VecDeque<AuditOutcome>,
    next_sequence_id: u64,
}

#[derive(Debug, Default)]
struct ResultSinkShared {
    queue: Mutex<ResultQueue>,
    available: Notify,
}

/// Unbounded, append-only queue of audit outcomes.
///
/// Cloning yields another handle to the same queue, so one sink can be shared
/// by every session of a server run while an external consumer pulls from it.
/// Producers never block; there is no flow control.
#[derive(Debug, Default, Clone)]
pub struct ResultSink {
    shared: Arc<ResultSinkShared>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `outcome`, stamping it with the next sequence id. Returns the id.
    pub fn push(&self, mut outcome: AuditOutcome) -> u64 {
        let sequence_id = {
            let mut queue = self.shared.queue.lock();
            queue.next_sequence_id += 1;
            outcome.sequence_id = queue.next_sequence_id;
            queue.pending.push_back(outcome);
            queue.next_sequence_id
        };
        self.shared.available.notify_one();
        sequence_id
    }

    pub fn try_pull(&self) -> Option<AuditOutcome> {
        self.shared.queue.lock().pending.pop_front()
    }

    /// Waits until an outcome is available and removes it. Any number of
    /// clones may pull concurrently; each outcome is delivered once.
    pub async fn pull(&self) -> AuditOutcome {
        loop {
            // Register as a waiter before checking the queue so every push
            // either lands before try_pull or wakes a registered consumer.
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.try_pull() {
                return outcome;
            }
            notified.await;
        }
    }

    pub fn drain(&self) -> Vec<AuditOutcome> {
        self.shared.queue.lock().pending.drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<AuditOutcome> {
        self.shared.queue.lock().pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pushed_total(&self) -> u64 {
        self.shared.queue.lock().next_sequence_id
    }

    pub fn shares_queue_with(&self, other: &ResultSink) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}
