use crate::cache::{BlockCache, CacheRead, FetchSpec};
use crate::core::{
    ActiveData, MessageEvent, PlayerPresence, PlayerState, Problem, ProblemManager, Progress,
    SubscribePayload, Time, TopicInfo, TopicStats, WorkerError,
};
use crate::metrics::MetricsCollector;
use crate::player::{resolve_subscriptions, resolved_topics, PlayerOptions, ResolvedSubscription};
use crate::source::{BackfillArgs, IterableSource, IteratorArgs, Record};
use crate::worker::{SourceWorker, SourceWorkerHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upper bound on the wall-clock window covered by one tick, so a stalled or
/// backgrounded process does not read a huge chunk when it resumes.
const MAX_TICK_WINDOW: Duration = Duration::from_millis(300);

const MIN_SPEED: f64 = 0.1;
const MAX_SPEED: f64 = 10.0;

enum Command {
    Play,
    Pause,
    Seek(Time),
    SetSpeed(f64),
    SetLoop(bool),
    SetSubscriptions(Vec<SubscribePayload>),
    AddListener(mpsc::UnboundedSender<PlayerState>),
    Close,
}

struct FetchOutcome {
    spec: FetchSpec,
    generation: u64,
    result: Result<Vec<Record>, WorkerError>,
}

/// Playback orchestrator for one `IterableSource`.
///
/// Owns the source exclusively through its worker and drives the state
/// machine on a spawned task. Control calls enqueue commands; state
/// snapshots reach listeners over a channel and may repeat unchanged.
pub struct IterablePlayer {
    commands: mpsc::UnboundedSender<Command>,
}

impl IterablePlayer {
    /// Create the player and start initializing `source` in the background.
    pub fn new(
        source: Box<dyn IterableSource>,
        metrics: Arc<dyn MetricsCollector>,
        options: PlayerOptions,
    ) -> Self {
        metrics.player_constructed();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (task, fetch_rx) = PlayerTask::new(source, metrics, options);
        tokio::spawn(task.run(fetch_rx, command_rx));
        Self { commands }
    }

    /// Register a listener. The current state is delivered immediately,
    /// then on every tick, seek completion, subscription change and new
    /// problem.
    pub fn subscribe_state(&self) -> mpsc::UnboundedReceiver<PlayerState> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::AddListener(tx));
        rx
    }

    pub fn play(&self) {
        let _ = self.commands.send(Command::Play);
    }

    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn seek_playback(&self, time: Time) {
        let _ = self.commands.send(Command::Seek(time));
    }

    /// Set the playback rate. Values are clamped into [0.1, 10.0] and take
    /// effect on the next tick.
    pub fn set_playback_speed(&self, speed: f64) {
        let _ = self.commands.send(Command::SetSpeed(speed));
    }

    pub fn set_loop(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetLoop(enabled));
    }

    /// Replace the full active subscription set.
    pub fn set_subscriptions(&self, payloads: Vec<SubscribePayload>) {
        let _ = self.commands.send(Command::SetSubscriptions(payloads));
    }

    /// Shut down the player and its worker. Idempotent; a second call has
    /// no observable effect.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

impl Drop for IterablePlayer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct PlayerTask {
    worker: SourceWorker,
    handle: SourceWorkerHandle,
    cache: BlockCache,
    metrics: Arc<dyn MetricsCollector>,
    options: PlayerOptions,

    presence: PlayerPresence,
    speed: f64,
    looping: bool,

    subscriptions: Vec<ResolvedSubscription>,
    topics: Vec<String>,

    initialized: bool,
    start: Time,
    end: Time,
    current: Time,
    /// Where the next tick resumes reading; one nanosecond past the last
    /// delivered point, or exactly at a stall point
    next_read_start: Time,
    topic_infos: Arc<Vec<TopicInfo>>,
    topic_stats: Arc<BTreeMap<String, TopicStats>>,

    problems: ProblemManager,
    listeners: Vec<mpsc::UnboundedSender<PlayerState>>,
    seek_generation: u64,
    bytes_received: u64,
    last_tick: Option<Instant>,

    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_in_flight: bool,
}

impl PlayerTask {
    fn new(
        source: Box<dyn IterableSource>,
        metrics: Arc<dyn MetricsCollector>,
        options: PlayerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<FetchOutcome>) {
        let worker = SourceWorker::spawn(source, options.worker);
        let handle = worker.handle();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let speed = options.speed.clamp(MIN_SPEED, MAX_SPEED);
        let looping = options.loop_playback;
        let task = Self {
            worker,
            handle,
            cache: BlockCache::new(options.cache),
            metrics,
            options,
            presence: PlayerPresence::Uninitialized,
            speed,
            looping,
            subscriptions: Vec::new(),
            topics: Vec::new(),
            initialized: false,
            start: Time::ZERO,
            end: Time::ZERO,
            current: Time::ZERO,
            next_read_start: Time::ZERO,
            topic_infos: Arc::new(Vec::new()),
            topic_stats: Arc::new(BTreeMap::new()),
            problems: ProblemManager::new(),
            listeners: Vec::new(),
            seek_generation: 0,
            bytes_received: 0,
            last_tick: None,
            fetch_tx,
            fetch_in_flight: false,
        };
        (task, fetch_rx)
    }

    async fn run(
        mut self,
        mut fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        self.initialize().await;

        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            break;
                        }
                    }
                    // every player handle dropped
                    None => {
                        self.do_close().await;
                        break;
                    }
                },
                Some(outcome) = fetch_rx.recv() => self.handle_fetch_outcome(outcome).await,
                _ = interval.tick(), if self.presence == PlayerPresence::Playing => {
                    self.tick().await;
                }
            }
        }
    }

    async fn initialize(&mut self) {
        self.set_presence(PlayerPresence::Initializing);
        self.emit(Vec::new());

        match self.handle.initialize().await {
            Ok(init) => {
                info!(
                    "source initialized: {} topics, range [{}, {}]",
                    init.topics.len(),
                    init.start,
                    init.end
                );
                self.start = init.start;
                self.end = init.end;
                self.current = init.start;
                self.next_read_start = init.start;
                self.topic_infos = Arc::new(init.topics);
                self.topic_stats = Arc::new(init.topic_stats);
                for (index, problem) in init.problems.into_iter().enumerate() {
                    self.problems.add(format!("open:{index}"), problem);
                }
                self.initialized = true;
                self.metrics.initialized();
                self.set_presence(PlayerPresence::Idle);
                self.emit(Vec::new());
            }
            Err(error) => self.fatal(error).await,
        }
    }

    /// Returns true when the task should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        if self.presence.is_terminal() {
            // terminal states accept listeners and resource cleanup only
            match command {
                Command::AddListener(listener) => self.add_listener(listener),
                Command::Close => self.worker.dispose().await,
                _ => {}
            }
            return false;
        }

        match command {
            Command::AddListener(listener) => self.add_listener(listener),
            Command::Play => self.do_play().await,
            Command::Pause => self.do_pause(),
            Command::Seek(time) => self.do_seek(time, self.presence == PlayerPresence::Playing).await,
            Command::SetSpeed(speed) => {
                self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
                self.metrics.set_speed(self.speed);
                self.emit(Vec::new());
            }
            Command::SetLoop(enabled) => self.looping = enabled,
            Command::SetSubscriptions(payloads) => self.do_set_subscriptions(payloads).await,
            Command::Close => {
                self.do_close().await;
                return true;
            }
        }
        false
    }

    fn add_listener(&mut self, listener: mpsc::UnboundedSender<PlayerState>) {
        let _ = listener.send(self.snapshot(Vec::new()));
        self.listeners.push(listener);
    }

    async fn do_play(&mut self) {
        if self.presence != PlayerPresence::Idle {
            return;
        }
        if self.current >= self.end {
            if !self.looping {
                return;
            }
            self.do_seek(self.start, false).await;
        }
        self.metrics.play(self.speed);
        self.set_presence(PlayerPresence::Playing);
        self.last_tick = None;
        self.emit(Vec::new());
    }

    fn do_pause(&mut self) {
        if self.presence != PlayerPresence::Playing {
            return;
        }
        self.metrics.pause();
        // clear tick timing so we don't read a huge window on resume
        self.last_tick = None;
        self.set_presence(PlayerPresence::Idle);
        self.emit(Vec::new());
    }

    /// One playback step: read the next wall-clock window from the cache,
    /// emit its messages in order and advance the playhead.
    async fn tick(&mut self) {
        let now = Instant::now();
        let delta = match self.last_tick {
            Some(previous) => (now - previous).min(MAX_TICK_WINDOW),
            None => self.options.tick_interval,
        };
        self.last_tick = Some(now);

        let window_nanos = (delta.as_nanos() as f64 * self.speed) as u64;
        let next = self.current.add_nanos(window_nanos).min(self.end);
        let read_end = next
            .add_nanos(self.options.read_ahead.as_nanos() as u64)
            .min(self.end);

        let mut delivered: Vec<MessageEvent> = Vec::new();
        let mut stall_point: Option<Time> = None;

        if !self.topics.is_empty() {
            let mut read_head = self.next_read_start;
            while read_head <= read_end {
                match self.cache.read(&self.topics, read_head, read_end) {
                    CacheRead::Hit { messages, covered_until } => {
                        delivered.extend(messages);
                        read_head = covered_until.add_nanos(1);
                    }
                    CacheRead::Miss(spec) => {
                        self.metrics.record_uncached_range_request();
                        if self.fetch_in_flight {
                            // one fetch at a time; retry this gap next tick
                            self.cache.cancel(&spec);
                        } else {
                            self.spawn_fetch(spec.clone());
                        }
                        if spec.start <= next {
                            stall_point = Some(spec.start);
                        }
                        break;
                    }
                    CacheRead::Pending => {
                        if read_head <= next {
                            stall_point = Some(read_head);
                        }
                        break;
                    }
                }
            }
            self.cache.release_pins();
        }

        match stall_point {
            None => {
                self.current = next;
                self.next_read_start = next.add_nanos(1);
            }
            Some(point) => {
                // playback waits at the gap; currentTime stays monotonic
                self.metrics.record_data_provider_stall();
                self.next_read_start = point;
                self.current = point.sub_nanos(1).max(self.current).min(next);
            }
        }

        // messages in the read-ahead region beyond this window stay cached
        delivered.retain(|m| m.receive_time <= next);
        let at_end = self.current == self.end && stall_point.is_none();
        self.emit(delivered);

        if at_end {
            if self.looping {
                debug!("reached end, looping to start");
                self.do_seek(self.start, true).await;
            } else {
                debug!("reached end of log");
                self.set_presence(PlayerPresence::Idle);
                self.last_tick = None;
                self.emit(Vec::new());
            }
        }
    }

    fn spawn_fetch(&mut self, spec: FetchSpec) {
        let handle = self.handle.clone();
        let results = self.fetch_tx.clone();
        let generation = handle.generation();
        self.fetch_in_flight = true;

        tokio::spawn(async move {
            let args = IteratorArgs {
                topics: spec.topics.clone(),
                start: Some(spec.start),
                end: Some(spec.end),
            };
            let result = handle.fetch_range(args, generation).await;
            let _ = results.send(FetchOutcome { spec, generation, result });
        });
    }

    async fn handle_fetch_outcome(&mut self, outcome: FetchOutcome) {
        self.fetch_in_flight = false;
        if self.presence.is_terminal() {
            return;
        }

        // responses tagged with a stale generation are dropped, never emitted
        if outcome.generation != self.handle.generation() {
            self.cache.cancel(&outcome.spec);
            return;
        }

        match outcome.result {
            Ok(records) => {
                let mut messages = Vec::with_capacity(records.len());
                let mut changed = false;
                for record in records {
                    match record {
                        Record::Message(message) => messages.push(message),
                        Record::Problem { key, problem } => {
                            changed |= self.problems.add(key, problem);
                        }
                    }
                }
                self.cache.insert(&outcome.spec, messages);
                changed |= self.problems.clear("fetch");
                if changed {
                    self.emit(Vec::new());
                }
            }
            Err(error) if error.is_fatal() => self.fatal(error).await,
            Err(WorkerError::Cancelled) => {
                self.cache.cancel(&outcome.spec);
            }
            Err(error) => {
                warn!("block fetch failed: {}", error);
                // record the gap as covered so playback continues past it
                self.cache.insert(&outcome.spec, Vec::new());
                self.problems.add(
                    "fetch",
                    Problem::warn(format!(
                        "failed to load data for [{}, {}]",
                        outcome.spec.start, outcome.spec.end
                    ))
                    .with_detail(error.to_string()),
                );
                self.emit(Vec::new());
            }
        }
    }

    async fn do_seek(&mut self, time: Time, resume_playing: bool) {
        let target = time.clamp_to(self.start, self.end);
        debug!("seek to {}", target);
        self.metrics.seek(target);
        self.set_presence(PlayerPresence::Seeking);
        self.emit(Vec::new());

        // outstanding read-ahead is abandoned; late replies carry the old
        // generation and get dropped
        self.handle.bump_generation();
        self.cache.cancel_pending();
        let generation = self.handle.generation();

        let backfill = if self.topics.is_empty() {
            Ok(Vec::new())
        } else {
            self.handle
                .backfill(
                    BackfillArgs { topics: self.topics.clone(), time: target },
                    generation,
                )
                .await
        };

        match backfill {
            Ok(mut messages) => {
                messages.sort_by_key(|m| m.receive_time);
                self.current = target;
                self.next_read_start = target.add_nanos(1);
                self.seek_generation += 1;
                self.problems.clear("backfill");
                self.restore_after_seek(resume_playing);
                self.emit(messages);
            }
            Err(error) if error.is_fatal() => self.fatal(error).await,
            Err(WorkerError::Cancelled) => {
                // a newer seek superseded this one; it will finish the job
                self.restore_after_seek(resume_playing);
            }
            Err(error) => {
                warn!("backfill failed: {}", error);
                self.problems.add(
                    "backfill",
                    Problem::warn("failed to load messages at seek time")
                        .with_detail(error.to_string()),
                );
                self.current = target;
                self.next_read_start = target.add_nanos(1);
                self.seek_generation += 1;
                self.restore_after_seek(resume_playing);
                self.emit(Vec::new());
            }
        }
    }

    fn restore_after_seek(&mut self, resume_playing: bool) {
        self.last_tick = None;
        self.set_presence(if resume_playing {
            PlayerPresence::Playing
        } else {
            PlayerPresence::Idle
        });
    }

    async fn do_set_subscriptions(&mut self, payloads: Vec<SubscribePayload>) {
        let resolved = resolve_subscriptions(&payloads);
        let topics = resolved_topics(&resolved);
        let added: Vec<String> = topics
            .iter()
            .filter(|t| !self.topics.contains(t))
            .cloned()
            .collect();
        debug!("subscriptions replaced: {} topics ({} new)", topics.len(), added.len());
        self.subscriptions = resolved;
        self.topics = topics;

        // backfill newly added topics so no stale gap shows before next tick
        if self.initialized && !added.is_empty() {
            let generation = self.handle.generation();
            match self
                .handle
                .backfill(BackfillArgs { topics: added, time: self.current }, generation)
                .await
            {
                Ok(mut messages) => {
                    messages.sort_by_key(|m| m.receive_time);
                    self.emit(messages);
                    return;
                }
                Err(error) if error.is_fatal() => {
                    self.fatal(error).await;
                    return;
                }
                Err(WorkerError::Cancelled) => {}
                Err(error) => {
                    self.problems.add(
                        "backfill",
                        Problem::warn("failed to load messages for new subscriptions")
                            .with_detail(error.to_string()),
                    );
                }
            }
        }
        self.emit(Vec::new());
    }

    async fn do_close(&mut self) {
        if !self.presence.is_terminal() {
            self.set_presence(PlayerPresence::Closing);
            self.emit(Vec::new());
        }
        self.worker.dispose().await;
        self.cache.clear();
        if self.presence != PlayerPresence::Error {
            self.set_presence(PlayerPresence::Closed);
            self.emit(Vec::new());
        }
        self.metrics.close();
        info!("player closed");
    }

    /// Transition to the terminal `Error` presence with a final problem.
    async fn fatal(&mut self, error: WorkerError) {
        warn!("fatal player error: {}", error);
        self.problems
            .add("fatal", Problem::error(format!("playback failed: {error}")));
        self.set_presence(PlayerPresence::Error);
        self.emit(Vec::new());
        // terminal: resources are released, the worker is never respawned
        self.worker.dispose().await;
    }

    fn set_presence(&mut self, presence: PlayerPresence) {
        if self.presence != presence {
            debug!("presence {:?} -> {:?}", self.presence, presence);
            self.presence = presence;
        }
    }

    fn snapshot(&self, messages: Vec<MessageEvent>) -> PlayerState {
        let active_data = self.initialized.then(|| ActiveData {
            messages,
            current_time: self.current,
            start_time: self.start,
            end_time: self.end,
            is_playing: self.presence == PlayerPresence::Playing,
            speed: self.speed,
            last_seek_generation: self.seek_generation,
            topics: self.topic_infos.clone(),
            topic_stats: self.topic_stats.clone(),
            total_bytes_received: self.bytes_received,
        });
        PlayerState {
            presence: self.presence,
            active_data,
            progress: Progress {
                fully_loaded_fraction_ranges: self.cache.loaded_ranges(self.start, self.end),
                total_cached_bytes: self.cache.total_bytes(),
            },
            problems: self.problems.problems(),
            name: self.options.name.clone(),
        }
    }

    fn emit(&mut self, messages: Vec<MessageEvent>) {
        let bytes: u64 = messages.iter().map(|m| m.size_in_bytes as u64).sum();
        if bytes > 0 {
            self.bytes_received += bytes;
            self.metrics.record_bytes_received(bytes);
        }
        let state = self.snapshot(messages);
        self.listeners.retain(|listener| listener.send(state.clone()).is_ok());
    }
}
