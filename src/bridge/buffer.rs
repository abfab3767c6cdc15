use super::envelope::matches_correlation_id;
use crate::config::RetentionConfig;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;
use tracing::debug;

struct BufferedResponse {
    value: Value,
    received_at: Instant,
}

/// Unclaimed responses in arrival order, claimed by correlation id.
///
/// The lock only ever guards the scan or mutation of the queue; it is never
/// held across I/O or an `.await`.
pub struct CorrelationBuffer {
    field: String,
    retention: RetentionConfig,
    entries: Mutex<VecDeque<BufferedResponse>>,
    arrivals: Notify,
}

impl CorrelationBuffer {
    pub fn new(field: impl Into<String>, retention: RetentionConfig) -> Self {
        Self {
            field: field.into(),
            retention,
            entries: Mutex::new(VecDeque::new()),
            arrivals: Notify::new(),
        }
    }

    /// Append a decoded response and wake every waiter
    pub fn insert(&self, value: Value) {
        let now = Instant::now();
        {
            let mut entries = self.live(now);
            entries.push_back(BufferedResponse {
                value,
                received_at: now,
            });
            if let Some(max) = self.retention.max_entries {
                while entries.len() > max {
                    entries.pop_front();
                    debug!("Evicted oldest unclaimed response (max_entries={})", max);
                }
            }
        }
        self.arrivals.notify_waiters();
    }

    /// Remove and return the first response whose correlation field equals `id`.
    /// Entries past `max_age` are gone even if nothing was inserted since.
    pub fn take(&self, id: &Value) -> Option<Value> {
        let mut entries = self.live(Instant::now());
        let index = entries
            .iter()
            .position(|entry| matches_correlation_id(&entry.value, &self.field, id))?;
        entries.remove(index).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.live(Instant::now()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.live(Instant::now()).is_empty()
    }

    /// Future resolved by the next `insert`. Enable it before checking `take`
    /// so an arrival in between is not missed.
    pub fn notified(&self) -> Notified<'_> {
        self.arrivals.notified()
    }

    fn evict(&self, entries: &mut VecDeque<BufferedResponse>, now: Instant) {
        let Some(max_age) = self.retention.max_age() else {
            return;
        };
        let before = entries.len();
        entries.retain(|entry| now.duration_since(entry.received_at) <= max_age);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Evicted {} unclaimed responses older than {:?}", evicted, max_age);
        }
    }

    /// Lock the queue with every expired entry already dropped
    fn live(&self, now: Instant) -> MutexGuard<'_, VecDeque<BufferedResponse>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        self.evict(&mut entries, now);
        entries
    }
}
