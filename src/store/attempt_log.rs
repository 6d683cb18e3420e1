// src/store/attempt_log.rs
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::NewAttempt;

use super::SqliteStore;

/// Default queue capacity; overflow drops the oldest pending attempt.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Counters exposed for reconciliation and shutdown reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLogStats {
    pub queued: usize,
    pub written: u64,
    pub dropped: u64,
    pub write_errors: u64,
}

struct Shared {
    queue: Mutex<VecDeque<NewAttempt>>,
    capacity: usize,
    notify: Notify,
    written: AtomicU64,
    dropped: AtomicU64,
    write_errors: AtomicU64,
}

/// Best-effort, bounded buffer between the intercept decision path and the
/// store.
///
/// `record` never blocks and never fails the caller: when the queue is full
/// the oldest pending attempt is dropped and counted. Losing audit rows is
/// preferred to adding latency to an in-flight HTLC decision.
#[derive(Clone)]
pub struct AttemptLog {
    shared: Arc<Shared>,
}

impl AttemptLog {
    pub fn new(capacity: usize) -> Self {
        AttemptLog {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
                capacity: capacity.max(1),
                notify: Notify::new(),
                written: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                write_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue one attempt. Non-blocking; drop-oldest on overflow.
    pub fn record(&self, attempt: NewAttempt) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(attempt);
        }
        self.shared.notify.notify_one();
    }

    pub fn stats(&self) -> AttemptLogStats {
        AttemptLogStats {
            queued: self.shared.queue.lock().len(),
            written: self.shared.written.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            write_errors: self.shared.write_errors.load(Ordering::Relaxed),
        }
    }

    /// Spawn the writer task that drains the queue into the store.
    ///
    /// On shutdown the task flushes whatever is queued before exiting, so
    /// the supervisor can await it to guarantee the flush.
    pub fn spawn_writer(
        &self,
        store: Arc<SqliteStore>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut stopping = false;
            loop {
                let batch: Vec<NewAttempt> = {
                    let mut queue = shared.queue.lock();
                    queue.drain(..).collect()
                };

                if !batch.is_empty() {
                    for attempt in &batch {
                        match store.append_attempt(attempt) {
                            Ok(_) => {
                                shared.written.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                shared.write_errors.fetch_add(1, Ordering::Relaxed);
                                warn!(error = %e, "failed to persist attempt, dropping");
                            }
                        }
                    }
                    continue;
                }

                if stopping || *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = shared.notify.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            stopping = true;
                        }
                    }
                }
            }
            debug!(
                written = shared.written.load(Ordering::Relaxed),
                dropped = shared.dropped.load(Ordering::Relaxed),
                "attempt writer stopped"
            );
        })
    }
}
