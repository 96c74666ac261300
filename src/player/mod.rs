pub mod engine;
pub mod subscription;

pub use engine::IterablePlayer;
pub use subscription::{resolve_subscriptions, resolved_topics, ResolvedSubscription};

use crate::cache::BlockCacheOptions;
use crate::worker::WorkerOptions;
use std::time::Duration;

/// Player configuration.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Display name attached to emitted state
    pub name: Option<String>,
    pub cache: BlockCacheOptions,
    pub worker: WorkerOptions,
    /// Wall-clock interval between play ticks
    pub tick_interval: Duration,
    /// How far past the current tick window to keep the cache primed
    pub read_ahead: Duration,
    /// Restart from the beginning when reaching the end
    pub loop_playback: bool,
    /// Initial playback speed, 1.0 = real-time
    pub speed: f64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            name: None,
            cache: BlockCacheOptions::default(),
            worker: WorkerOptions::default(),
            tick_interval: Duration::from_millis(16),
            read_ahead: Duration::from_secs(1),
            loop_playback: false,
            speed: 1.0,
        }
    }
}
