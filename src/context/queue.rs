//! Bounded FIFO queues for event records.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::record::ConnectRecord;

/// A bounded multi-producer queue of records.
///
/// Takes are non-blocking probes; offers acquire capacity permits and can
/// wait bounded (target queue) or unbounded (inbound event queue). The
/// semaphore carries the capacity accounting so waiting producers are
/// woken exactly when a take frees slots.
pub(crate) struct RecordQueue {
    capacity: usize,
    space: Semaphore,
    inner: Mutex<VecDeque<ConnectRecord>>,
}

impl RecordQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            space: Semaphore::new(capacity),
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Remove up to `max` records, preserving FIFO order. Never blocks;
    /// returns an empty vec when the queue is empty.
    pub fn take(&self, max: usize) -> Vec<ConnectRecord> {
        let mut queue = self.inner.lock();
        let n = max.min(queue.len());
        let taken: Vec<ConnectRecord> = queue.drain(..n).collect();
        drop(queue);
        if !taken.is_empty() {
            self.space.add_permits(taken.len());
        }
        taken
    }

    /// Append records, waiting up to `timeout` for capacity. Returns the
    /// records that did not fit within the deadline, in order.
    pub async fn offer(
        &self,
        records: Vec<ConnectRecord>,
        timeout: Duration,
    ) -> Vec<ConnectRecord> {
        let deadline = Instant::now() + timeout;
        let mut pending: VecDeque<ConnectRecord> = records.into();

        while let Some(record) = pending.pop_front() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let permit = if remaining.is_zero() {
                self.space.try_acquire().ok()
            } else {
                match tokio::time::timeout(remaining, self.space.acquire()).await {
                    Ok(Ok(permit)) => Some(permit),
                    // Timed out, or the semaphore was closed.
                    _ => None,
                }
            };

            match permit {
                Some(permit) => {
                    permit.forget();
                    self.inner.lock().push_back(record);
                }
                None => {
                    pending.push_front(record);
                    return pending.into();
                }
            }
        }
        Vec::new()
    }

    /// Append records, waiting for capacity without a deadline. Only the
    /// inbound event queue uses this; the source adapter provides its own
    /// cancellation by dropping the call.
    pub async fn offer_wait(&self, records: Vec<ConnectRecord>) -> Vec<ConnectRecord> {
        let mut pending: VecDeque<ConnectRecord> = records.into();
        while let Some(record) = pending.pop_front() {
            match self.space.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    self.inner.lock().push_back(record);
                }
                Err(_) => {
                    pending.push_front(record);
                    return pending.into();
                }
            }
        }
        Vec::new()
    }

    /// Empty the queue, returning everything that was left in it.
    pub fn drain(&self) -> Vec<ConnectRecord> {
        let mut queue = self.inner.lock();
        let drained: Vec<ConnectRecord> = queue.drain(..).collect();
        drop(queue);
        if !drained.is_empty() {
            self.space.add_permits(drained.len());
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.len()
    }
}
