use crate::core::{MessageEvent, Problem, Time, TopicInfo, TopicStats};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where the player is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPresence {
    Uninitialized,
    Initializing,
    Idle,
    Playing,
    Seeking,
    Closing,
    Closed,
    Error,
}

impl PlayerPresence {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlayerPresence::Closed | PlayerPresence::Error)
    }
}

/// A normalized `[0, 1]` fraction of the log that is resident in cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedRange {
    pub start: f64,
    pub end: f64,
}

/// Preload/cache progress reported alongside playback state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub fully_loaded_fraction_ranges: Vec<LoadedRange>,
    pub total_cached_bytes: usize,
}

/// Data available once the player has initialized.
#[derive(Debug, Clone)]
pub struct ActiveData {
    /// Messages emitted for this tick, in receive-time order
    pub messages: Vec<MessageEvent>,
    pub current_time: Time,
    pub start_time: Time,
    pub end_time: Time,
    pub is_playing: bool,
    pub speed: f64,
    /// Bumped on every completed seek so consumers can reset derived state
    pub last_seek_generation: u64,
    pub topics: Arc<Vec<TopicInfo>>,
    pub topic_stats: Arc<BTreeMap<String, TopicStats>>,
    pub total_bytes_received: u64,
}

/// A pure snapshot of the player, produced fresh on every emit.
///
/// Consumers must tolerate duplicate unchanged emissions.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub presence: PlayerPresence,
    pub active_data: Option<ActiveData>,
    pub progress: Progress,
    pub problems: Vec<Problem>,
    pub name: Option<String>,
}
