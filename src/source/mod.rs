pub mod csv;
pub mod memory;

pub use csv::CsvLogSource;
pub use memory::{MemorySource, ReadLedger};

use crate::core::{Initialization, MessageEvent, Problem, SourceError, Time};

/// Arguments for (re)starting the read cursor of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorArgs {
    /// Topics to read. Messages on other topics must not be decoded.
    pub topics: Vec<String>,
    /// Inclusive start time; defaults to the log start.
    pub start: Option<Time>,
    /// Inclusive end time; defaults to the log end.
    pub end: Option<Time>,
}

/// Arguments for a backfill lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillArgs {
    pub topics: Vec<String>,
    pub time: Time,
}

/// How much a single `next_batch` call may return.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimit {
    /// Maximum number of records per batch
    pub max_messages: usize,
    /// Maximum time span covered by one batch, in nanoseconds
    pub max_duration_nanos: Option<u64>,
}

impl Default for BatchLimit {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            max_duration_nanos: None,
        }
    }
}

/// One record produced by the read cursor.
///
/// Corrupt mid-stream records surface as `Problem`, never as an `Err` from
/// `next_batch`; only structural failures abort a read.
#[derive(Debug, Clone)]
pub enum Record {
    Message(MessageEvent),
    /// A keyed diagnostic (e.g. `decode:/imu`) attached to the stream
    Problem { key: String, problem: Problem },
}

/// A chunk of records pulled from the cursor.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Records in non-decreasing `receive_time` order
    pub records: Vec<Record>,
    /// False is the end-of-stream sentinel, distinct from an error
    pub has_more: bool,
}

/// A format-specific adapter producing time-ordered message events from a
/// recorded log.
///
/// Reading is an explicit pull protocol rather than a streaming iterator:
/// `seek_iterator` positions a single restartable cursor and `next_batch`
/// drains it chunk by chunk. Implementations may block; the player always
/// hosts them on a dedicated worker thread.
pub trait IterableSource: Send {
    /// Open the log. Fails with `SourceError::Open` on malformed input or an
    /// unsupported schema; recoverable issues are attached to the returned
    /// `Initialization` as problems instead.
    fn initialize(&mut self) -> Result<Initialization, SourceError>;

    /// Restart the cursor at `args.start` for the given topics.
    fn seek_iterator(&mut self, args: IteratorArgs) -> Result<(), SourceError>;

    /// Pull the next chunk from the cursor. `has_more == false` signals
    /// end-of-stream; later calls keep returning an empty finished batch.
    fn next_batch(&mut self, limit: BatchLimit) -> Result<Batch, SourceError>;

    /// The most recent message at-or-before `args.time`, at most one per
    /// topic. Topics with no prior message are omitted.
    fn backfill(&mut self, args: BackfillArgs) -> Result<Vec<MessageEvent>, SourceError>;
}
