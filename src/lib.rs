//! Playback core for recorded robotics sensor logs.
//!
//! Turns an arbitrarily large, time-ordered log into a randomly-seekable,
//! topic-filtered, bounded-memory stream of decoded messages. Format
//! adapters implement [`source::IterableSource`]; the [`player::IterablePlayer`]
//! hosts one adapter on an isolated worker thread, caches read messages in a
//! bounded [`cache::BlockCache`] and emits [`core::PlayerState`] snapshots to
//! listeners.

pub mod cache;
pub mod core;
pub mod metrics;
pub mod player;
pub mod source;
pub mod worker;

pub use crate::core::{
    MessageEvent, PlayerPresence, PlayerState, PreloadType, Problem, SubscribePayload, Time,
};
pub use crate::metrics::{MetricsCollector, NoopMetricsCollector};
pub use crate::player::{IterablePlayer, PlayerOptions};
pub use crate::source::{CsvLogSource, IterableSource, MemorySource};
