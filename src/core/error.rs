use thiserror::Error;

/// Errors produced by an `IterableSource` implementation.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Malformed input or unsupported schema found while opening. Fatal.
    #[error("failed to open source: {0}")]
    Open(String),

    /// A record or range could not be decoded. Non-fatal; surfaced as a
    /// problem and playback continues past the gap.
    #[error("decode error on {topic}: {message}")]
    Decode { topic: String, message: String },

    /// Operation called before `initialize` or after the iterator ended.
    #[error("invalid source state: {0}")]
    InvalidState(String),

    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors crossing the worker boundary.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Source(SourceError),

    /// The request did not complete in time. Non-fatal for block fetches,
    /// fatal when it is `initialize` itself.
    #[error("worker request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The reply belongs to a superseded generation. Internal control flow,
    /// never surfaced to consumers.
    #[error("request cancelled")]
    Cancelled,

    /// The worker thread panicked or its channel closed unexpectedly. Fatal,
    /// no implicit respawn.
    #[error("source worker crashed: {0}")]
    Crashed(String),
}

impl WorkerError {
    /// Whether this error must terminate the player.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Source(SourceError::Open(_)) => true,
            WorkerError::Crashed(_) => true,
            WorkerError::Source(_) | WorkerError::Timeout(_) | WorkerError::Cancelled => false,
        }
    }
}
