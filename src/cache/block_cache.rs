use crate::core::{LoadedRange, MessageEvent, Time};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, trace};

/// Default cache budget.
const DEFAULT_MAX_TOTAL_BYTES: usize = 1_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct BlockCacheOptions {
    /// Total bytes the cache may hold before evicting. A single oversized
    /// block is allowed to exceed this alone; messages are never split.
    pub max_total_bytes: usize,
}

impl Default for BlockCacheOptions {
    fn default() -> Self {
        Self { max_total_bytes: DEFAULT_MAX_TOTAL_BYTES }
    }
}

/// Key describing one clipped fetch against the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchSpec {
    /// Inclusive range start
    pub start: Time,
    /// Inclusive range end, clipped to the first covered time after `start`
    pub end: Time,
    /// Sorted topic set the fetch covers
    pub topics: Vec<String>,
}

/// A cached, time-bounded set of messages for a given subscription set.
#[derive(Debug)]
struct Block {
    id: u64,
    /// Inclusive request start; `start <=` first message time
    start: Time,
    /// Inclusive request end; `end >=` last message time
    end: Time,
    topics: BTreeSet<String>,
    messages: Vec<MessageEvent>,
    size_in_bytes: usize,
    last_access: u64,
}

/// Result of a non-blocking cache read.
#[derive(Debug)]
pub enum CacheRead {
    /// Cached messages covering `[start, covered_until]` of the request
    Hit { messages: Vec<MessageEvent>, covered_until: Time },
    /// Nothing cached at the request start; the caller should issue exactly
    /// this fetch and `insert` the result
    Miss(FetchSpec),
    /// The missing range is already being fetched
    Pending,
}

/// Bounded-memory, time-bucketed cache of already-read messages.
///
/// Owned exclusively by the orchestrator; all methods are synchronous and a
/// miss never blocks. Blocks never overlap: fetches are clipped to the
/// uncovered gap before they are issued, and duplicate requests for the same
/// missing range are coalesced into the one in-flight fetch.
pub struct BlockCache {
    blocks: Vec<Block>,
    in_flight: HashSet<FetchSpec>,
    /// Blocks serving the current read; never evicted
    pinned: HashSet<u64>,
    last_topics: Vec<String>,
    total_bytes: usize,
    next_block_id: u64,
    access_counter: u64,
    options: BlockCacheOptions,
}

impl BlockCache {
    pub fn new(options: BlockCacheOptions) -> Self {
        Self {
            blocks: Vec::new(),
            in_flight: HashSet::new(),
            pinned: HashSet::new(),
            last_topics: Vec::new(),
            total_bytes: 0,
            next_block_id: 0,
            access_counter: 0,
            options,
        }
    }

    /// Read `[start, end]` for `topics` without blocking.
    ///
    /// A hit covers a prefix of the request; the caller advances past
    /// `covered_until` and reads again. Blocks whose subscription set no
    /// longer covers the request are invalidated here, on access.
    pub fn read(&mut self, topics: &[String], start: Time, end: Time) -> CacheRead {
        let wanted = sorted_topics(topics);
        self.last_topics = wanted.clone();
        self.invalidate_stale(&wanted, start, end);

        self.access_counter += 1;
        let access = self.access_counter;

        if let Some(block) = self
            .blocks
            .iter_mut()
            .find(|b| b.start <= start && start <= b.end)
        {
            block.last_access = access;
            let covered_until = block.end.min(end);
            let messages = block
                .messages
                .iter()
                .filter(|m| {
                    m.receive_time >= start
                        && m.receive_time <= covered_until
                        && wanted.binary_search(&m.topic).is_ok()
                })
                .cloned()
                .collect();
            self.pinned.insert(block.id);
            return CacheRead::Hit { messages, covered_until };
        }

        // Clip the fetch to the next covered time so blocks never overlap
        let next_start = self
            .blocks
            .iter()
            .filter(|b| b.start > start)
            .map(|b| b.start)
            .min();
        let fetch_end = match next_start {
            Some(t) => t.sub_nanos(1).min(end),
            None => end,
        };

        let spec = FetchSpec { start, end: fetch_end, topics: wanted };
        if self.in_flight.contains(&spec) {
            return CacheRead::Pending;
        }
        trace!("cache miss, issuing fetch {:?}", spec);
        self.in_flight.insert(spec.clone());
        CacheRead::Miss(spec)
    }

    /// Complete an in-flight fetch and insert its result as a new block.
    ///
    /// An empty message list still inserts a (zero-size) block so the range
    /// counts as covered and is not re-fetched.
    pub fn insert(&mut self, spec: &FetchSpec, messages: Vec<MessageEvent>) {
        self.in_flight.remove(spec);

        // A seek may have invalidated this fetch after it was issued
        if self.blocks.iter().any(|b| b.start <= spec.end && spec.start <= b.end) {
            debug!("discarding fetch result overlapping an existing block");
            return;
        }

        let size_in_bytes = messages.iter().map(|m| m.size_in_bytes).sum();
        self.access_counter += 1;
        let id = self.next_block_id;
        self.next_block_id += 1;

        self.blocks.push(Block {
            id,
            start: spec.start,
            end: spec.end,
            topics: spec.topics.iter().cloned().collect(),
            messages,
            size_in_bytes,
            last_access: self.access_counter,
        });
        self.blocks.sort_by_key(|b| b.start);
        self.total_bytes += size_in_bytes;

        // the block backing the current read is never the one evicted
        self.pinned.insert(id);
        self.evict();
    }

    /// Forget one issued fetch that will not be completed.
    pub fn cancel(&mut self, spec: &FetchSpec) {
        self.in_flight.remove(spec);
    }

    /// Forget all issued fetches. Called on seek; late results for these
    /// keys are discarded by the orchestrator's generation check.
    pub fn cancel_pending(&mut self) {
        self.in_flight.clear();
    }

    /// Release read pins at the end of a tick.
    pub fn release_pins(&mut self) {
        self.pinned.clear();
    }

    /// Drop every cached block. Used when a seek jumps far outside the
    /// cached window.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.total_bytes = 0;
        self.pinned.clear();
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[cfg(test)]
    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Cached coverage for the last requested topic set, as normalized
    /// fractions of `[log_start, log_end]`.
    pub fn loaded_ranges(&self, log_start: Time, log_end: Time) -> Vec<LoadedRange> {
        let duration = (log_end - log_start).max(1) as f64;
        let mut spans: Vec<(Time, Time)> = self
            .blocks
            .iter()
            .filter(|b| covers(&b.topics, &self.last_topics))
            .map(|b| (b.start, b.end))
            .collect();
        spans.sort();

        let mut merged: Vec<(Time, Time)> = Vec::new();
        for (start, end) in spans {
            match merged.last_mut() {
                Some((_, last_end)) if start <= last_end.add_nanos(1) => {
                    *last_end = (*last_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }

        merged
            .into_iter()
            .map(|(start, end)| LoadedRange {
                start: ((start - log_start) as f64 / duration).clamp(0.0, 1.0),
                end: ((end - log_start) as f64 / duration).clamp(0.0, 1.0),
            })
            .collect()
    }

    /// Drop blocks overlapping the request whose topic set cannot serve it.
    fn invalidate_stale(&mut self, wanted: &[String], start: Time, end: Time) {
        let before = self.blocks.len();
        let total = &mut self.total_bytes;
        self.blocks.retain(|b| {
            let overlaps = b.start <= end && start <= b.end;
            if overlaps && !covers(&b.topics, wanted) {
                *total -= b.size_in_bytes;
                return false;
            }
            true
        });
        if self.blocks.len() != before {
            debug!("invalidated {} stale blocks on access", before - self.blocks.len());
        }
    }

    /// Evict least-recently-used blocks until under budget, skipping pinned
    /// blocks. One oversized block may remain over budget alone.
    fn evict(&mut self) {
        while self.total_bytes > self.options.max_total_bytes {
            let victim = self
                .blocks
                .iter()
                .filter(|b| !self.pinned.contains(&b.id))
                .min_by_key(|b| b.last_access)
                .map(|b| b.id);
            let Some(id) = victim else {
                break;
            };
            let index = self.blocks.iter().position(|b| b.id == id).unwrap();
            let block = self.blocks.remove(index);
            debug!(
                "evicting block [{}, {}] ({} bytes)",
                block.start, block.end, block.size_in_bytes
            );
            self.total_bytes -= block.size_in_bytes;
        }
    }
}

fn sorted_topics(topics: &[String]) -> Vec<String> {
    let mut sorted = topics.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

/// Whether a block's topic set is a superset of the requested topics.
fn covers(block_topics: &BTreeSet<String>, wanted: &[String]) -> bool {
    wanted.iter().all(|t| block_topics.contains(t))
}
