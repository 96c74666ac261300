use crate::core::{
    Initialization, MessageEvent, Problem, SourceError, Time, TopicInfo, TopicStats,
};
use crate::source::{BackfillArgs, Batch, BatchLimit, IterableSource, IteratorArgs, Record};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Tracks what a `MemorySource` actually decoded.
///
/// Cloneable handle that stays valid after the source moves into a worker,
/// so tests can assert that unsubscribed topics were never read.
#[derive(Debug, Clone, Default)]
pub struct ReadLedger {
    topics: Arc<Mutex<BTreeSet<String>>>,
    bytes: Arc<AtomicU64>,
    messages: Arc<AtomicU64>,
}

impl ReadLedger {
    fn record(&self, topic: &str, bytes: usize) {
        self.topics.lock().unwrap().insert(topic.to_string());
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Topics that have had at least one message decoded.
    pub fn topics_read(&self) -> BTreeSet<String> {
        self.topics.lock().unwrap().clone()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn messages_read(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

struct Cursor {
    topics: BTreeSet<String>,
    end: Time,
    pos: usize,
    done: bool,
}

/// An in-memory source preloaded with events.
///
/// Stands in for real format adapters in tests and demos. Supports injecting
/// decode failures on individual messages and accounts every decoded message
/// in a [`ReadLedger`].
pub struct MemorySource {
    events: Vec<MessageEvent>,
    declared_topics: Vec<TopicInfo>,
    /// (topic, nth message of that topic) pairs that fail to decode
    decode_failures: HashSet<(String, u64)>,
    /// Per-event failure flags, aligned with `events` after sorting
    failure_flags: Vec<bool>,
    initialized: bool,
    cursor: Option<Cursor>,
    ledger: ReadLedger,
}

impl MemorySource {
    pub fn new(events: Vec<MessageEvent>) -> Self {
        Self {
            events,
            declared_topics: Vec::new(),
            decode_failures: HashSet::new(),
            failure_flags: Vec::new(),
            initialized: false,
            cursor: None,
            ledger: ReadLedger::default(),
        }
    }

    /// Advertise a topic even if no message for it is loaded.
    pub fn declare_topic(mut self, name: &str, schema_name: &str) -> Self {
        self.declared_topics.push(TopicInfo {
            name: name.to_string(),
            schema_name: schema_name.to_string(),
        });
        self
    }

    /// Make the `nth` message (0-based) of `topic` fail decoding. The failure
    /// is reported as an attached problem, not an error.
    pub fn inject_decode_error(mut self, topic: &str, nth: u64) -> Self {
        self.decode_failures.insert((topic.to_string(), nth));
        self
    }

    /// Handle for asserting what was actually read.
    pub fn ledger(&self) -> ReadLedger {
        self.ledger.clone()
    }

    fn require_initialized(&self) -> Result<(), SourceError> {
        if !self.initialized {
            return Err(SourceError::InvalidState("source not initialized".into()));
        }
        Ok(())
    }
}

impl IterableSource for MemorySource {
    fn initialize(&mut self) -> Result<Initialization, SourceError> {
        // Stable sort keeps record order for equal timestamps
        self.events.sort_by_key(|e| e.receive_time);

        let mut per_topic_counts: BTreeMap<String, u64> = BTreeMap::new();
        self.failure_flags = self
            .events
            .iter()
            .map(|e| {
                let n = per_topic_counts.entry(e.topic.clone()).or_insert(0);
                let fails = self.decode_failures.contains(&(e.topic.clone(), *n));
                *n += 1;
                fails
            })
            .collect();

        let mut topics: Vec<TopicInfo> = self.declared_topics.clone();
        let mut topic_stats: BTreeMap<String, TopicStats> = BTreeMap::new();
        for event in &self.events {
            if !topics.iter().any(|t| t.name == event.topic) {
                topics.push(TopicInfo {
                    name: event.topic.clone(),
                    schema_name: event.schema_name.clone(),
                });
            }
            let stats = topic_stats.entry(event.topic.clone()).or_default();
            stats.num_messages += 1;
            if stats.first_message_time.is_none() {
                stats.first_message_time = Some(event.receive_time);
            }
            stats.last_message_time = Some(event.receive_time);
        }
        topics.sort_by(|a, b| a.name.cmp(&b.name));

        self.initialized = true;

        Ok(Initialization {
            start: self.events.first().map(|e| e.receive_time).unwrap_or(Time::ZERO),
            end: self.events.last().map(|e| e.receive_time).unwrap_or(Time::ZERO),
            topics,
            topic_stats,
            problems: Vec::new(),
        })
    }

    fn seek_iterator(&mut self, args: IteratorArgs) -> Result<(), SourceError> {
        self.require_initialized()?;
        let start = args.start.unwrap_or(Time::ZERO);
        let pos = self.events.partition_point(|e| e.receive_time < start);
        self.cursor = Some(Cursor {
            topics: args.topics.into_iter().collect(),
            end: args.end.unwrap_or(Time::MAX),
            pos,
            done: false,
        });
        Ok(())
    }

    fn next_batch(&mut self, limit: BatchLimit) -> Result<Batch, SourceError> {
        self.require_initialized()?;
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| SourceError::InvalidState("no iterator; call seek_iterator".into()))?;

        let mut batch = Batch::default();
        if cursor.done {
            return Ok(batch);
        }

        let mut window_start: Option<Time> = None;
        while cursor.pos < self.events.len() && batch.records.len() < limit.max_messages {
            let event = &self.events[cursor.pos];
            if event.receive_time > cursor.end {
                cursor.done = true;
                break;
            }
            if !cursor.topics.contains(&event.topic) {
                cursor.pos += 1;
                continue;
            }
            if let Some(max_nanos) = limit.max_duration_nanos {
                let window_start = *window_start.get_or_insert(event.receive_time);
                if event.receive_time - window_start > max_nanos {
                    break;
                }
            }

            self.ledger.record(&event.topic, event.size_in_bytes);
            if self.failure_flags[cursor.pos] {
                batch.records.push(Record::Problem {
                    key: format!("decode:{}", event.topic),
                    problem: Problem::warn(format!(
                        "failed to decode message on {} at {}",
                        event.topic, event.receive_time
                    )),
                });
            } else {
                batch.records.push(Record::Message(event.clone()));
            }
            cursor.pos += 1;
        }

        if cursor.pos >= self.events.len() {
            cursor.done = true;
        }
        batch.has_more = !cursor.done;
        Ok(batch)
    }

    fn backfill(&mut self, args: BackfillArgs) -> Result<Vec<MessageEvent>, SourceError> {
        self.require_initialized()?;
        let mut found: BTreeMap<String, MessageEvent> = BTreeMap::new();
        let wanted: BTreeSet<&String> = args.topics.iter().collect();

        for event in self.events.iter().rev() {
            if event.receive_time > args.time || !wanted.contains(&event.topic) {
                continue;
            }
            if !found.contains_key(&event.topic) {
                self.ledger.record(&event.topic, event.size_in_bytes);
                found.insert(event.topic.clone(), event.clone());
                if found.len() == wanted.len() {
                    break;
                }
            }
        }

        Ok(found.into_values().collect())
    }
}
