pub mod error;
pub mod message;
pub mod problem;
pub mod state;
pub mod time;

pub use error::{SourceError, WorkerError};
pub use message::{
    Initialization, MessageEvent, PreloadType, SubscribePayload, TopicInfo, TopicStats,
};
pub use problem::{Problem, ProblemManager, Severity};
pub use state::{ActiveData, LoadedRange, PlayerPresence, PlayerState, Progress};
pub use time::Time;
