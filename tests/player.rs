//! End-to-end playback scenarios driving `IterablePlayer` over a
//! `MemorySource`.

use logplay::core::{Initialization, PlayerPresence, PlayerState, SourceError, Time};
use logplay::player::PlayerOptions;
use logplay::source::{BackfillArgs, Batch, BatchLimit, IterableSource, IteratorArgs};
use logplay::{IterablePlayer, MemorySource, MessageEvent, MetricsCollector, SubscribePayload};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const TEST_TIMEOUT: Duration = Duration::from_secs(15);

fn event(topic: &str, millis: u64, payload: u8) -> MessageEvent {
    MessageEvent::new(
        topic,
        "test/Schema",
        Time::from_nanos(millis * 1_000_000),
        vec![payload],
    )
}

/// Evenly spaced messages on one topic across [0, span_millis].
fn spread(topic: &str, count: u64, span_millis: u64) -> Vec<MessageEvent> {
    (0..count)
        .map(|i| event(topic, i * span_millis / (count - 1), i as u8))
        .collect()
}

fn fast_options() -> PlayerOptions {
    PlayerOptions {
        tick_interval: Duration::from_millis(2),
        speed: 10.0,
        ..Default::default()
    }
}

fn spawn_player(source: MemorySource, options: PlayerOptions) -> (IterablePlayer, UnboundedReceiver<PlayerState>) {
    let player = IterablePlayer::new(
        Box::new(source),
        Arc::new(logplay::NoopMetricsCollector),
        options,
    );
    let states = player.subscribe_state();
    (player, states)
}

/// Receive states until `predicate` matches, collecting every state seen.
async fn wait_for(
    states: &mut UnboundedReceiver<PlayerState>,
    collected: &mut Vec<PlayerState>,
    predicate: impl Fn(&PlayerState) -> bool,
) -> PlayerState {
    tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            let state = states.recv().await.expect("player task stopped unexpectedly");
            collected.push(state.clone());
            if predicate(&state) {
                return state;
            }
        }
    })
    .await
    .expect("timed out waiting for player state")
}

fn idle_at_end(state: &PlayerState) -> bool {
    state.presence == PlayerPresence::Idle
        && state
            .active_data
            .as_ref()
            .is_some_and(|a| a.current_time == a.end_time)
}

fn emitted_messages(states: &[PlayerState]) -> Vec<MessageEvent> {
    states
        .iter()
        .filter_map(|s| s.active_data.as_ref())
        .flat_map(|a| a.messages.iter().cloned())
        .collect()
}

#[tokio::test]
async fn test_full_pass_is_ordered_and_reaches_end() {
    let source = MemorySource::new(spread("/a", 100, 1000));
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);
    player.play();

    wait_for(&mut states, &mut collected, idle_at_end).await;

    let messages = emitted_messages(&collected);
    assert_eq!(messages.len(), 100);
    for pair in messages.windows(2) {
        assert!(pair[0].receive_time <= pair[1].receive_time, "emission out of order");
    }

    let last = collected.last().unwrap().active_data.as_ref().unwrap();
    assert_eq!(last.current_time, last.end_time);
}

#[tokio::test]
async fn test_seek_settles_exactly_and_backfills() {
    // topics A and B over t = [0, 10]s
    let mut events = Vec::new();
    for sec in 0..=10u64 {
        events.push(event("/a", sec * 1000, sec as u8));
        events.push(event("/b", sec * 1000, sec as u8));
    }
    let source = MemorySource::new(events);
    let ledger = source.ledger();
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);

    let target = Time::new(5, 300_000_000);
    player.seek_playback(target);
    let settled = wait_for(&mut states, &mut collected, |s| {
        s.presence == PlayerPresence::Idle
            && s.active_data.as_ref().is_some_and(|a| a.current_time == target)
    })
    .await;

    let active = settled.active_data.unwrap();
    assert_eq!(active.current_time, target);
    // backfill is the latest /a message at-or-before the target
    let backfill = emitted_messages(&collected);
    let latest_a = backfill.iter().rev().find(|m| m.topic == "/a").unwrap();
    assert_eq!(latest_a.receive_time, Time::from_secs(5));

    // the subscribed set never included /b, so no /b bytes were read
    assert!(!ledger.topics_read().contains("/b"));

    player.close();
}

#[tokio::test]
async fn test_seek_clamps_to_log_range() {
    let source = MemorySource::new(spread("/a", 10, 1000));
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);

    player.seek_playback(Time::from_secs(100));
    let settled = wait_for(&mut states, &mut collected, |s| {
        s.presence == PlayerPresence::Idle
            && s.active_data.as_ref().is_some_and(|a| a.current_time == a.end_time)
    })
    .await;
    let active = settled.active_data.unwrap();
    assert_eq!(active.current_time, Time::from_secs(1));
}

#[tokio::test]
async fn test_decode_error_midstream_is_nonfatal() {
    // message 50 of 100 fails to decode
    let source = MemorySource::new(spread("/a", 100, 1000)).inject_decode_error("/a", 49);
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);
    player.play();

    let final_state = wait_for(&mut states, &mut collected, idle_at_end).await;

    let messages = emitted_messages(&collected);
    assert_eq!(messages.len(), 99, "all other messages are delivered");
    assert_eq!(final_state.problems.len(), 1, "exactly one problem is recorded");
    assert_ne!(final_state.presence, PlayerPresence::Error);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let source = MemorySource::new(spread("/a", 10, 1000));
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.close();
    player.close();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Closed).await;
    // drain whatever remains; the channel must close without another Closed
    while let Some(state) = states.recv().await {
        collected.push(state);
    }
    let closed_count = collected
        .iter()
        .filter(|s| s.presence == PlayerPresence::Closed)
        .count();
    assert_eq!(closed_count, 1);
}

#[tokio::test]
async fn test_loop_restarts_from_start() {
    let mut options = fast_options();
    options.loop_playback = true;
    let source = MemorySource::new(spread("/a", 20, 200));
    let (player, mut states) = spawn_player(source, options);
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);
    player.play();

    // a completed loop shows up as a seek while still playing
    let looped = wait_for(&mut states, &mut collected, |s| {
        s.active_data
            .as_ref()
            .is_some_and(|a| a.last_seek_generation >= 1 && a.is_playing)
    })
    .await;
    assert!(looped.active_data.unwrap().current_time <= Time::from_secs(1));

    player.close();
}

#[tokio::test]
async fn test_new_subscription_backfills_immediately() {
    let mut events = spread("/a", 10, 10_000);
    events.extend(spread("/b", 10, 10_000));
    let source = MemorySource::new(events);
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);
    let target = Time::from_secs(5);
    player.seek_playback(target);
    wait_for(&mut states, &mut collected, |s| {
        s.active_data.as_ref().is_some_and(|a| a.current_time == target)
    })
    .await;

    // adding /b while paused backfills it without waiting for a tick
    collected.clear();
    player.set_subscriptions(vec![
        SubscribePayload::topic("/a"),
        SubscribePayload::topic("/b"),
    ]);
    wait_for(&mut states, &mut collected, |s| {
        s.active_data
            .as_ref()
            .is_some_and(|a| a.messages.iter().any(|m| m.topic == "/b"))
    })
    .await;

    let messages = emitted_messages(&collected);
    let b = messages.iter().find(|m| m.topic == "/b").unwrap();
    assert!(b.receive_time <= target);

    player.close();
}

#[tokio::test]
async fn test_speed_change_applies_and_state_reports_it() {
    let source = MemorySource::new(spread("/a", 50, 1000));
    let (player, mut states) = spawn_player(source, fast_options());
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_playback_speed(2.0);
    let state = wait_for(&mut states, &mut collected, |s| {
        s.active_data.as_ref().is_some_and(|a| (a.speed - 2.0).abs() < f64::EPSILON)
    })
    .await;
    assert!(!state.active_data.unwrap().is_playing);

    // out-of-range speeds are clamped, never zero or negative
    player.set_playback_speed(1000.0);
    let state = wait_for(&mut states, &mut collected, |s| {
        s.active_data.as_ref().is_some_and(|a| (a.speed - 10.0).abs() < f64::EPSILON)
    })
    .await;
    assert!(state.active_data.unwrap().speed > 0.0);

    player.close();
}

struct BrokenSource;

impl IterableSource for BrokenSource {
    fn initialize(&mut self) -> Result<Initialization, SourceError> {
        Err(SourceError::Open("structurally corrupt index".into()))
    }
    fn seek_iterator(&mut self, _: IteratorArgs) -> Result<(), SourceError> {
        unreachable!()
    }
    fn next_batch(&mut self, _: BatchLimit) -> Result<Batch, SourceError> {
        unreachable!()
    }
    fn backfill(&mut self, _: BackfillArgs) -> Result<Vec<MessageEvent>, SourceError> {
        unreachable!()
    }
}

#[tokio::test]
async fn test_open_failure_is_terminal_error() {
    let player = IterablePlayer::new(
        Box::new(BrokenSource),
        Arc::new(logplay::NoopMetricsCollector),
        fast_options(),
    );
    let mut states = player.subscribe_state();
    let mut collected = Vec::new();

    let state = wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Error).await;
    assert!(!state.problems.is_empty(), "a final problem is emitted");

    // control calls after a fatal error are ignored, not panics
    player.play();
    player.seek_playback(Time::from_secs(1));
    player.close();
}

#[derive(Default)]
struct CountingMetrics {
    plays: AtomicU64,
    pauses: AtomicU64,
    seeks: AtomicU64,
    closes: AtomicU64,
    bytes: AtomicU64,
}

impl MetricsCollector for CountingMetrics {
    fn play(&self, _speed: f64) {
        self.plays.fetch_add(1, Ordering::Relaxed);
    }
    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::Relaxed);
    }
    fn seek(&self, _time: Time) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }
    fn record_bytes_received(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn test_metrics_callbacks_fire_at_documented_points() {
    let metrics = Arc::new(CountingMetrics::default());
    let source = MemorySource::new(spread("/a", 20, 60_000));
    let player = IterablePlayer::new(Box::new(source), metrics.clone(), fast_options());
    let mut states = player.subscribe_state();
    let mut collected = Vec::new();

    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);
    player.play();
    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Playing).await;
    player.pause();
    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Idle).await;
    player.seek_playback(Time::from_nanos(250_000_000));
    player.close();
    wait_for(&mut states, &mut collected, |s| s.presence == PlayerPresence::Closed).await;

    assert_eq!(metrics.plays.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.pauses.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.seeks.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.closes.load(Ordering::Relaxed), 1);
    assert!(metrics.bytes.load(Ordering::Relaxed) > 0);
}
