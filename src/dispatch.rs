//! Bounded search dispatch.
//!
//! A small thread pool that runs gateway searches off the controller
//! thread. Jobs go through a bounded `crossbeam-channel` queue and each job
//! carries its own reply channel. A worker announces when it picks a job up;
//! the search timeout runs from that moment, so time spent queued is not
//! charged to the search. Waiting for pickup is bounded by the same timeout.
//! A job whose caller already gave up is skipped without querying the
//! source. Results are consumed by the controller, which stays the only
//! writer of resolver and graph state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{SourceError, TrailError, TrailResult};
use crate::gateway::{SearchGateway, SearchQuery};
use crate::record::PersonRecord;

/// How long `Drop` waits for idle workers to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared between a caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type SearchReply = Result<Vec<PersonRecord>, SourceError>;

enum Progress {
    /// A worker picked the job up at this instant.
    Started(Instant),
    Done(SearchReply),
}

struct Job {
    query: SearchQuery,
    reply: Sender<Progress>,
}

/// Handle for one dispatched search.
#[derive(Debug)]
pub struct SearchHandle {
    rx: Receiver<Progress>,
    pickup_deadline: Instant,
    timeout: Duration,
}

impl SearchHandle {
    /// Waits for the result.
    ///
    /// The search has `timeout` from the moment a worker starts it, and the
    /// job may wait at most `timeout` in the queue before that. Either
    /// deadline missed becomes `SourceError::Timeout`; a worker that went
    /// away without answering becomes `SourceError::SourceUnavailable`.
    pub fn wait(self) -> SearchReply {
        let started = match self.rx.recv_deadline(self.pickup_deadline) {
            Ok(Progress::Started(at)) => at,
            Ok(Progress::Done(reply)) => return reply,
            Err(err) => return Err(self.failure(err)),
        };
        match self.rx.recv_deadline(started + self.timeout) {
            Ok(Progress::Done(reply)) => reply,
            Ok(Progress::Started(_)) => Err(SourceError::unavailable("search worker restarted a job")),
            Err(err) => Err(self.failure(err)),
        }
    }

    fn failure(&self, err: RecvTimeoutError) -> SourceError {
        match err {
            RecvTimeoutError::Timeout => SourceError::Timeout {
                duration_ms: self.timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => SourceError::unavailable("search worker disconnected"),
        }
    }
}

/// Fixed-size pool of search workers.
pub struct SearchPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    exited: Receiver<()>,
    queue_capacity: usize,
    timeout: Duration,
}

impl SearchPool {
    /// Starts `workers` threads sharing one gateway.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::Internal` if a worker thread cannot be spawned.
    pub fn start(
        gateway: Arc<dyn SearchGateway>,
        workers: usize,
        queue_capacity: usize,
        timeout: Duration,
    ) -> TrailResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let (exit_tx, exited) = bounded::<()>(workers);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let exit_tx = exit_tx.clone();
            let gateway = Arc::clone(&gateway);
            let handle = thread::Builder::new()
                .name(format!("kintrail-search-{idx}"))
                .spawn(move || {
                    while let Ok(Job { query, reply }) = rx.recv() {
                        // The caller stopped waiting while the job was queued.
                        if reply.send(Progress::Started(Instant::now())).is_err() {
                            debug!(query = %query.label(), "skipping abandoned search");
                            continue;
                        }
                        let result = panic::catch_unwind(AssertUnwindSafe(|| gateway.search(&query)))
                            .unwrap_or_else(|_| Err(SourceError::unavailable("gateway panicked")));
                        let _ = reply.send(Progress::Done(result));
                    }
                    let _ = exit_tx.send(());
                })
                .map_err(|e| TrailError::internal(format!("failed to spawn search worker: {e}")))?;
            handles.push(handle);
        }

        debug!(workers, queue_capacity, "search pool started");
        Ok(Self {
            tx: Some(tx),
            workers: handles,
            exited,
            queue_capacity,
            timeout,
        })
    }

    /// Queue capacity.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Largest batch that can run at once without queueing behind itself.
    #[must_use]
    pub fn wave_size(&self) -> usize {
        self.workers.len().min(self.queue_capacity)
    }

    /// Submits a search without blocking.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::SourceUnavailable` if the queue is full or the
    /// pool is shut down.
    pub fn try_submit(&self, query: SearchQuery) -> Result<SearchHandle, SourceError> {
        let Some(tx) = &self.tx else {
            return Err(SourceError::unavailable("search pool is shut down"));
        };
        let (reply, rx) = bounded::<Progress>(2);
        let submitted_at = Instant::now();
        match tx.try_send(Job { query, reply }) {
            Ok(()) => Ok(SearchHandle {
                rx,
                pickup_deadline: submitted_at + self.timeout,
                timeout: self.timeout,
            }),
            Err(TrySendError::Full(_)) => Err(SourceError::unavailable(format!(
                "search queue full (capacity {})",
                self.queue_capacity
            ))),
            Err(TrySendError::Disconnected(_)) => Err(SourceError::unavailable("search pool is shut down")),
        }
    }
}

impl Drop for SearchPool {
    fn drop(&mut self) {
        // Closing the queue lets idle workers exit. Workers stuck inside a
        // slow gateway call are detached instead of joined.
        drop(self.tx.take());
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for _ in 0..self.workers.len() {
            if self.exited.recv_deadline(deadline).is_err() {
                break;
            }
        }
        let mut detached = 0usize;
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                detached += 1;
            }
        }
        if detached > 0 {
            warn!(detached, "search workers still busy at shutdown; detaching");
        }
    }
}
