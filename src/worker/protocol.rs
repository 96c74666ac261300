use crate::core::{Initialization, MessageEvent, SourceError};
use crate::source::{BackfillArgs, BatchLimit, IteratorArgs, Record};
use tokio::sync::oneshot;

/// Operations the orchestrator can ask of the worker.
#[derive(Debug)]
pub enum WorkerOp {
    Initialize,
    /// Read all records in a time range, pulled from the source in chunks
    FetchRange { args: IteratorArgs, limit: BatchLimit },
    Backfill(BackfillArgs),
}

/// Successful results flowing back across the boundary.
#[derive(Debug)]
pub enum WorkerReply {
    Initialized(Initialization),
    Records(Vec<Record>),
    Backfill(Vec<MessageEvent>),
}

/// A correlated request envelope. `op == None` is the shutdown sentinel.
pub(crate) struct Request {
    pub id: u64,
    pub generation: u64,
    pub op: Option<WorkerOp>,
    pub reply: oneshot::Sender<Envelope>,
}

/// A correlated reply envelope.
pub(crate) struct Envelope {
    #[allow(dead_code)]
    pub id: u64,
    pub generation: u64,
    pub result: Result<WorkerReply, SourceError>,
}

impl Request {
    pub fn new(id: u64, generation: u64, op: WorkerOp, reply: oneshot::Sender<Envelope>) -> Self {
        Self { id, generation, op: Some(op), reply }
    }

    pub fn shutdown() -> Self {
        let (reply, _) = oneshot::channel();
        Self { id: u64::MAX, generation: u64::MAX, op: None, reply }
    }
}
