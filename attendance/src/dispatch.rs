use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::config::DispatchConfig;
use crate::error::EngineError;
use crate::sink::{AttendanceSink, CommitStatus, ReviewQueue};
use crate::types::{AttendanceRecord, RecordStatus};

/// Why a record could not be delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The sink refused the record permanently.
    Rejected(String),
    /// Every attempt failed transiently; carries the last error.
    Exhausted(String),
}

/// Operator-visible report of a record that was not delivered.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub record: AttendanceRecord,
    pub attempts: u32,
    pub reason: FailureReason,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub committed: u64,
    pub duplicates: u64,
    pub reviewed: u64,
    pub retries: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    committed: AtomicU64,
    duplicates: AtomicU64,
    reviewed: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    cfg: DispatchConfig,
    sink: Arc<dyn AttendanceSink>,
    review: Arc<dyn ReviewQueue>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
    counters: Counters,
}

/// Delivers tracker output off the hot path.
///
/// Confirmed records go to the [`AttendanceSink`]; ambiguous and rejected
/// records go to the [`ReviewQueue`]. Each record is delivered by its own
/// task, so one failing record never delays another. Transient failures are
/// retried with exponential backoff; since sinks are idempotent on the
/// record key, a retry of an already-stored record is answered as a
/// duplicate and counts as delivered.
pub struct Dispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<AttendanceRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Starts the delivery loop on the current tokio runtime.
    ///
    /// Returns the dispatcher and the receiving end of the operator channel
    /// on which undeliverable records are reported.
    pub fn spawn(
        cfg: DispatchConfig,
        sink: Arc<dyn AttendanceSink>,
        review: Arc<dyn ReviewQueue>,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveryFailure>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            cfg,
            sink,
            review,
            failures,
            counters: Counters::default(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(Arc::clone(&shared), rx));
        (
            Self {
                tx: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
                shared,
            },
            failures_rx,
        )
    }

    /// Queues a record for delivery without waiting.
    pub fn send(&self, record: AttendanceRecord) -> Result<(), EngineError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(EngineError::DispatcherClosed)?;
        tx.send(record).map_err(|_| EngineError::DispatcherClosed)
    }

    /// Stops accepting records and waits until every queued record has been
    /// delivered or reported as failed.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("dispatch worker panicked: {e}");
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.shared.counters;
        DispatchStats {
            committed: c.committed.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            reviewed: c.reviewed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<AttendanceRecord>) {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => {
                    inflight.spawn(deliver(Arc::clone(&shared), record));
                }
                None => break,
            },
            Some(res) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = res {
                    error!("delivery task panicked: {e}");
                }
            }
        }
    }
    while let Some(res) = inflight.join_next().await {
        if let Err(e) = res {
            error!("delivery task panicked: {e}");
        }
    }
}

async fn deliver(shared: Arc<Shared>, record: AttendanceRecord) {
    let c = &shared.counters;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match record.status {
            RecordStatus::Confirmed => shared.sink.commit(&record).await,
            RecordStatus::Ambiguous | RecordStatus::Rejected => shared
                .review
                .submit(&record)
                .await
                .map(|()| CommitStatus::Accepted),
        };

        let reason = match result {
            Ok(CommitStatus::Accepted) => {
                let counter = if record.status == RecordStatus::Confirmed {
                    &c.committed
                } else {
                    &c.reviewed
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    identity = %record.identity_id,
                    session = %record.session_id,
                    status = %record.status,
                    attempt,
                    "record delivered"
                );
                return;
            }
            Ok(CommitStatus::Duplicate) => {
                c.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(
                    identity = %record.identity_id,
                    session = %record.session_id,
                    "sink already holds record"
                );
                return;
            }
            Ok(CommitStatus::Rejected(reason)) => FailureReason::Rejected(reason),
            Err(e) if attempt < shared.cfg.max_attempts => {
                c.retries.fetch_add(1, Ordering::Relaxed);
                let delay = shared.cfg.backoff(attempt);
                warn!(
                    identity = %record.identity_id,
                    session = %record.session_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "delivery failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(e) => FailureReason::Exhausted(e.to_string()),
        };

        c.failed.fetch_add(1, Ordering::Relaxed);
        error!(
            identity = %record.identity_id,
            session = %record.session_id,
            status = %record.status,
            attempts = attempt,
            "record not delivered: {:?}",
            reason
        );
        let _ = shared.failures.send(DeliveryFailure {
            record,
            attempts: attempt,
            reason,
        });
        return;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::error::SinkError;
    use crate::sink::{MemoryReviewQueue, MemorySink};

    fn record(id: &str, status: RecordStatus) -> AttendanceRecord {
        let now = Utc::now();
        AttendanceRecord {
            identity_id: id.into(),
            session_id: "s1".into(),
            first_seen_at: now,
            confirmed_at: now,
            confidence: 0.9,
            status,
            source_camera_id: "cam".into(),
        }
    }

    fn fast() -> DispatchConfig {
        DispatchConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    /// Fails the first `failures` commits, then delegates to a MemorySink.
    struct FlakySink {
        failures: AtomicU32,
        inner: MemorySink,
    }

    #[async_trait]
    impl AttendanceSink for FlakySink {
        async fn commit(&self, record: &AttendanceRecord) -> Result<CommitStatus, SinkError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(SinkError("connection reset".into()));
            }
            self.inner.commit(record).await
        }
    }

    struct RefusingSink;

    #[async_trait]
    impl AttendanceSink for RefusingSink {
        async fn commit(&self, _record: &AttendanceRecord) -> Result<CommitStatus, SinkError> {
            Ok(CommitStatus::Rejected("unknown student".into()))
        }
    }

    #[tokio::test]
    async fn test_routes_by_status() {
        let sink = Arc::new(MemorySink::new());
        let review = Arc::new(MemoryReviewQueue::new());
        let (d, _failures) = Dispatcher::spawn(fast(), sink.clone(), review.clone());

        d.send(record("a", RecordStatus::Confirmed)).unwrap();
        d.send(record("b", RecordStatus::Ambiguous)).unwrap();
        d.send(record("c", RecordStatus::Rejected)).unwrap();
        d.shutdown().await;

        assert_eq!(sink.len(), 1);
        assert_eq!(review.len(), 2);
        let stats = d.stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.reviewed, 2);
        assert!(d.send(record("d", RecordStatus::Confirmed)).is_err());
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let sink = Arc::new(FlakySink {
            failures: AtomicU32::new(2),
            inner: MemorySink::new(),
        });
        let (d, mut failures) =
            Dispatcher::spawn(fast(), sink.clone(), Arc::new(MemoryReviewQueue::new()));
        d.send(record("a", RecordStatus::Confirmed)).unwrap();
        d.shutdown().await;

        assert_eq!(sink.inner.len(), 1);
        assert_eq!(d.stats().retries, 2);
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_exhausted_retries_reported() {
        let sink = Arc::new(FlakySink {
            failures: AtomicU32::new(10),
            inner: MemorySink::new(),
        });
        let (d, mut failures) =
            Dispatcher::spawn(fast(), sink.clone(), Arc::new(MemoryReviewQueue::new()));
        d.send(record("a", RecordStatus::Confirmed)).unwrap();
        d.shutdown().await;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.reason, FailureReason::Exhausted(_)));
        assert_eq!(failure.record.identity_id, "a");
        assert!(sink.inner.is_empty());
        assert_eq!(d.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_is_success_and_rejection_is_reported() {
        let sink = Arc::new(MemorySink::new());
        let (d, mut failures) =
            Dispatcher::spawn(fast(), sink.clone(), Arc::new(MemoryReviewQueue::new()));
        d.send(record("a", RecordStatus::Confirmed)).unwrap();
        d.send(record("a", RecordStatus::Confirmed)).unwrap();
        d.shutdown().await;
        assert_eq!(sink.len(), 1);
        let stats = d.stats();
        assert_eq!(stats.committed + stats.duplicates, 2);
        assert!(failures.try_recv().is_err());

        let (d, mut failures) = Dispatcher::spawn(
            fast(),
            Arc::new(RefusingSink),
            Arc::new(MemoryReviewQueue::new()),
        );
        d.send(record("b", RecordStatus::Confirmed)).unwrap();
        d.shutdown().await;
        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.attempts, 1);
        assert_eq!(
            failure.reason,
            FailureReason::Rejected("unknown student".into())
        );
    }
}
