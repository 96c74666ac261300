use crate::core::Time;

/// Lifecycle and performance callbacks invoked by the player.
///
/// Implementations are external; the core only promises to call these at the
/// documented points. Callbacks must be cheap and non-blocking since they run
/// on the orchestrator.
pub trait MetricsCollector: Send + Sync {
    /// The player object was constructed
    fn player_constructed(&self) {}
    /// The source initialized successfully
    fn initialized(&self) {}
    /// Playback started at `speed`
    fn play(&self, _speed: f64) {}
    /// Playback paused
    fn pause(&self) {}
    /// A seek to `time` was requested
    fn seek(&self, _time: Time) {}
    /// Playback speed changed
    fn set_speed(&self, _speed: f64) {}
    /// Bytes delivered to consumers this emit
    fn record_bytes_received(&self, _bytes: u64) {}
    /// A read was not servable from cache
    fn record_uncached_range_request(&self) {}
    /// Playback stalled waiting on the source
    fn record_data_provider_stall(&self) {}
    /// The player closed
    fn close(&self) {}
}

/// Collector that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {}
