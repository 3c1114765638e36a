//! Copy-on-write cache snapshots
//!
//! `CacheSnapshot` is immutable once published; `Cache` swaps whole
//! snapshots atomically and `CacheBuilder` assembles the first one during
//! replay.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

use super::{FeedEntry, StreamEntry};

/// An immutable, internally consistent view of all streams and the feed
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Stream name → history; untouched histories are shared between snapshots
    streams: HashMap<Arc<str>, Arc<Vec<StreamEntry>>>,

    /// Every record in commit order
    feed: Arc<Vec<FeedEntry>>,
}

impl CacheSnapshot {
    /// History of `name`, empty if the stream was never written
    pub fn stream(&self, name: &str) -> &[StreamEntry] {
        self.streams
            .get(name)
            .map(|history| history.as_slice())
            .unwrap_or(&[])
    }

    /// Current version of `name` (the length of its history)
    pub fn stream_version(&self, name: &str) -> u32 {
        self.stream(name).len() as u32
    }

    /// Global feed in commit order
    pub fn feed(&self) -> &[FeedEntry] {
        &self.feed
    }

    /// Names of every stream, in no particular order
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(|name| name.as_ref())
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.feed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.is_empty()
    }

    /// The snapshot that results from appending `payload` to `stream`
    ///
    /// Returns the new snapshot and the version assigned to the payload.
    fn with_appended(&self, stream: &str, payload: Bytes) -> (CacheSnapshot, u32) {
        let (name, history) = match self.streams.get_key_value(stream) {
            Some((name, history)) => (Arc::clone(name), history.as_slice()),
            None => (Arc::from(stream), &[][..]),
        };
        let version = history.len() as u32 + 1;

        let mut next_history = Vec::with_capacity(history.len() + 1);
        next_history.extend_from_slice(history);
        next_history.push(StreamEntry {
            version,
            payload: payload.clone(),
        });

        let mut next_feed = Vec::with_capacity(self.feed.len() + 1);
        next_feed.extend_from_slice(&self.feed);
        next_feed.push(FeedEntry {
            stream: Arc::clone(&name),
            payload,
        });

        let mut streams = self.streams.clone();
        streams.insert(name, Arc::new(next_history));

        let next = CacheSnapshot {
            streams,
            feed: Arc::new(next_feed),
        };
        (next, version)
    }
}

/// Atomically published cache
///
/// ## Concurrency:
/// - `load`: one atomic operation, never blocks
/// - `publish`: copy-on-write; concurrent publishers retry rather than lose
///   an update, but the store serializes them under its write lock anyway
pub struct Cache {
    current: ArcSwap<CacheSnapshot>,
}

impl Cache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::from_snapshot(CacheSnapshot::default())
    }

    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// The current snapshot
    pub fn load(&self) -> Arc<CacheSnapshot> {
        self.current.load_full()
    }

    /// Append `payload` to `stream` and publish the result
    ///
    /// Returns the version assigned to the payload.
    pub fn publish(&self, stream: &str, payload: Bytes) -> u32 {
        let mut assigned = 0;
        self.current.rcu(|current| {
            let (next, version) = current.with_appended(stream, payload.clone());
            assigned = version;
            next
        });
        assigned
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable accumulator used while replaying segments
///
/// Nothing is shared until `build`, so pushes are plain vector appends.
#[derive(Debug, Default)]
pub struct CacheBuilder {
    streams: HashMap<Arc<str>, Vec<StreamEntry>>,
    feed: Vec<FeedEntry>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of `stream` in the records pushed so far
    pub fn stream_version(&self, stream: &str) -> u32 {
        self.streams
            .get(stream)
            .map(|history| history.len() as u32)
            .unwrap_or(0)
    }

    /// Record the next payload of `stream`; returns the assigned version
    ///
    /// The version is counted, not taken from the segment.
    pub fn push(&mut self, stream: &str, payload: Bytes) -> u32 {
        let name = match self.streams.get_key_value(stream) {
            Some((name, _)) => Arc::clone(name),
            None => Arc::from(stream),
        };

        let history = self.streams.entry(Arc::clone(&name)).or_default();
        let version = history.len() as u32 + 1;
        history.push(StreamEntry {
            version,
            payload: payload.clone(),
        });
        self.feed.push(FeedEntry {
            stream: name,
            payload,
        });

        version
    }

    /// Total records pushed
    pub fn len(&self) -> usize {
        self.feed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.is_empty()
    }

    /// Freeze into the first published snapshot
    pub fn build(self) -> CacheSnapshot {
        CacheSnapshot {
            streams: self
                .streams
                .into_iter()
                .map(|(name, history)| (name, Arc::new(history)))
                .collect(),
            feed: Arc::new(self.feed),
        }
    }
}
