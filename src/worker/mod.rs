mod protocol;

pub use protocol::{WorkerOp, WorkerReply};

use crate::core::{Initialization, MessageEvent, SourceError, WorkerError};
use crate::source::{BackfillArgs, BatchLimit, IterableSource, IteratorArgs, Record};
use protocol::{Envelope, Request};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Timeouts applied to requests crossing the worker boundary.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Timeout for `initialize`; elapsing it is fatal.
    pub initialize_timeout: Duration,
    /// Timeout for block fetches and backfills; elapsing one is a problem
    /// and a data gap, not a fatal error.
    pub fetch_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            initialize_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Hosts an `IterableSource` on a dedicated thread.
///
/// The source and all of its buffers live inside the worker thread; the
/// orchestrator talks to it through correlated request/response envelopes.
/// Requests are tagged with a cancellation generation: when the player bumps
/// the generation (on seek), queued requests from the old generation are
/// skipped by the worker and their replies surface as `Cancelled`, which the
/// caller drops instead of emitting.
pub struct SourceWorker {
    handle: SourceWorkerHandle,
    thread: Option<JoinHandle<()>>,
}

/// Cloneable async client for a `SourceWorker`.
#[derive(Clone)]
pub struct SourceWorkerHandle {
    requests: mpsc::UnboundedSender<Request>,
    next_id: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
    options: WorkerOptions,
}

impl SourceWorker {
    /// Spawn the worker thread around `source`.
    pub fn spawn(source: Box<dyn IterableSource>, options: WorkerOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Request>();
        let generation = Arc::new(AtomicU64::new(0));
        let worker_generation = generation.clone();

        let thread = std::thread::Builder::new()
            .name("logplay-source".into())
            .spawn(move || run_worker(source, rx, worker_generation))
            .expect("failed to spawn source worker thread");

        Self {
            handle: SourceWorkerHandle {
                requests: tx,
                next_id: Arc::new(AtomicU64::new(0)),
                generation,
                options,
            },
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> SourceWorkerHandle {
        self.handle.clone()
    }

    /// Shut the worker down and reclaim the thread. Idempotent.
    pub async fn dispose(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        debug!("disposing source worker");
        let _ = self.handle.requests.send(Request::shutdown());
        let _ = tokio::task::spawn_blocking(move || {
            if thread.join().is_err() {
                error!("source worker thread panicked during shutdown");
            }
        })
        .await;
    }
}

impl SourceWorkerHandle {
    /// Current cancellation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate all outstanding requests. Returns the new generation.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn initialize(&self) -> Result<Initialization, WorkerError> {
        match self
            .request(WorkerOp::Initialize, self.options.initialize_timeout)
            .await?
        {
            WorkerReply::Initialized(init) => Ok(init),
            other => Err(unexpected_reply("Initialize", &other)),
        }
    }

    /// Read every record in `args`' range in one logical fetch. The worker
    /// pulls the source in read-ahead chunks and accumulates them, checking
    /// for cancellation between chunks.
    pub async fn fetch_range(
        &self,
        args: IteratorArgs,
        generation: u64,
    ) -> Result<Vec<Record>, WorkerError> {
        match self
            .request_with_generation(
                WorkerOp::FetchRange { args, limit: BatchLimit::default() },
                self.options.fetch_timeout,
                generation,
            )
            .await?
        {
            WorkerReply::Records(records) => Ok(records),
            other => Err(unexpected_reply("FetchRange", &other)),
        }
    }

    pub async fn backfill(
        &self,
        args: BackfillArgs,
        generation: u64,
    ) -> Result<Vec<MessageEvent>, WorkerError> {
        match self
            .request_with_generation(
                WorkerOp::Backfill(args),
                self.options.fetch_timeout,
                generation,
            )
            .await?
        {
            WorkerReply::Backfill(messages) => Ok(messages),
            other => Err(unexpected_reply("Backfill", &other)),
        }
    }

    async fn request(&self, op: WorkerOp, timeout: Duration) -> Result<WorkerReply, WorkerError> {
        let generation = self.generation();
        self.request_with_generation(op, timeout, generation).await
    }

    async fn request_with_generation(
        &self,
        op: WorkerOp,
        timeout: Duration,
        generation: u64,
    ) -> Result<WorkerReply, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::new(id, generation, op, reply_tx))
            .map_err(|_| WorkerError::Crashed("worker request channel closed".into()))?;

        let reply = match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => return Err(WorkerError::Timeout(timeout)),
            Ok(Err(_)) => {
                // reply sender dropped: either the request was superseded by
                // a newer generation or the worker died
                if generation < self.generation() {
                    return Err(WorkerError::Cancelled);
                }
                return Err(WorkerError::Crashed("worker dropped reply".into()));
            }
            Ok(Ok(reply)) => reply,
        };

        // a reply from a stale generation is never surfaced
        if reply.generation < self.generation() {
            return Err(WorkerError::Cancelled);
        }
        reply.result.map_err(WorkerError::Source)
    }
}

fn unexpected_reply(op: &str, reply: &WorkerReply) -> WorkerError {
    WorkerError::Crashed(format!("unexpected worker reply to {op}: {reply:?}"))
}

/// Worker thread main loop. Owns the source for its whole lifetime.
fn run_worker(
    mut source: Box<dyn IterableSource>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    generation: Arc<AtomicU64>,
) {
    info!("source worker started");
    while let Some(request) = requests.blocking_recv() {
        let Request { id, generation: req_generation, op, reply } = request;
        let Some(op) = op else {
            break; // shutdown sentinel
        };

        // skip work that was cancelled while queued
        if req_generation < generation.load(Ordering::SeqCst) {
            debug!("dropping stale request {} (generation {})", id, req_generation);
            drop(reply);
            continue;
        }

        let result = execute(&mut *source, op, req_generation, &generation);
        // the caller may have timed out and dropped the receiver
        let _ = reply.send(Envelope { id, generation: req_generation, result });
    }
    info!("source worker stopped");
}

fn execute(
    source: &mut dyn IterableSource,
    op: WorkerOp,
    req_generation: u64,
    generation: &AtomicU64,
) -> Result<WorkerReply, SourceError> {
    match op {
        WorkerOp::Initialize => source.initialize().map(WorkerReply::Initialized),
        WorkerOp::FetchRange { args, limit } => {
            source.seek_iterator(args)?;
            let mut records = Vec::new();
            loop {
                // bail between chunks once the fetch has been superseded
                if req_generation < generation.load(Ordering::SeqCst) {
                    debug!("abandoning fetch mid-range (generation {})", req_generation);
                    break;
                }
                let batch = source.next_batch(limit)?;
                records.extend(batch.records);
                if !batch.has_more {
                    break;
                }
            }
            Ok(WorkerReply::Records(records))
        }
        WorkerOp::Backfill(args) => source.backfill(args).map(WorkerReply::Backfill),
    }
}
