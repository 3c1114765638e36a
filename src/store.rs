//! Store Module
//!
//! The storage facade that coordinates all components.
//!
//! ## Responsibilities
//! - Lock the directory and replay segments on open
//! - Optimistic-concurrency appends with durable writes
//! - Lock-free stream and feed reads from the cache
//! - Close itself on any unexpected append failure

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, CacheBuilder, CacheSnapshot, FeedEntry, StreamEntry};
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::lock::DirLock;
use crate::segment::{self, ReplayReport, SegmentManager};

/// Precondition on a stream's current version for `append`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    /// Append regardless of the current version
    #[default]
    Any,

    /// Append only if the stream is exactly at this version (0 = empty)
    Exact(u32),
}

impl ExpectedVersion {
    /// Map the raw convention where any negative value means "no check"
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            ExpectedVersion::Any
        } else {
            ExpectedVersion::Exact(raw.min(u32::MAX as i64) as u32)
        }
    }
}

impl From<u32> for ExpectedVersion {
    fn from(version: u32) -> Self {
        ExpectedVersion::Exact(version)
    }
}

/// Lifecycle of a store; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Open,
    Closed,
}

/// Everything the write path mutates
struct Writer {
    segments: SegmentManager,
    dir_lock: DirLock,
    state: StoreState,
}

impl Writer {
    /// Move to `Closed`, releasing the segment and the directory lock
    ///
    /// The state changes even if releasing fails; the first error is returned.
    fn shut_down(&mut self) -> Result<()> {
        if self.state == StoreState::Closed {
            return Ok(());
        }
        self.state = StoreState::Closed;

        let segments = self.segments.close();
        let lock = self.dir_lock.release();
        segments.and(lock)
    }
}

/// An open store directory
///
/// ## Concurrency Model: Single-Writer / Lock-Free Readers
///
/// - **Writes** (`append`, `close`): exclusive on `writer`
///   - Only ONE append at a time, so versions and feed order follow
///     acceptance order
///   - Order: writer lock → version check → segment write + sync → publish
///
/// - **Reads** (`read_stream`, `read_all`, `snapshot`): never take `writer`
///   - One atomic load of the current `CacheSnapshot`
///   - Observe the cache before or after an in-flight append, never between
///
/// - **Across processes**: `DirLock` on `{data_dir}/lock` for the whole
///   open lifetime
pub struct Store {
    /// Store configuration
    config: Config,

    /// Published cache (lock-free reads)
    cache: Cache,

    /// Serializes mutations
    writer: RwLock<Writer>,

    /// What replay found when the store was opened
    replay_report: ReplayReport,
}

impl Store {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Create the data directory if it doesn't exist
    /// 2. Take the directory lock (fails with `LockHeld`)
    /// 3. Delete empty segments
    /// 4. Replay every segment into the cache
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory must exist before the lock file can
        fs::create_dir_all(&config.data_dir)?;

        // Step 2: Cross-process exclusion
        let dir_lock = DirLock::acquire(&config.data_dir)?;

        // Step 3: Garbage from aborted segment creation
        let segments = SegmentManager::open(&config.data_dir)?;
        let empty_removed = segments.remove_empty_segments()?;

        // Step 4: Rebuild the cache
        let mut builder = CacheBuilder::new();
        let mut replay_report = segment::replay(&segments.list_segments()?, &mut builder)?;
        replay_report.empty_segments_removed = empty_removed;

        info!(
            data_dir = %config.data_dir.display(),
            records = builder.len(),
            "Store opened"
        );

        Ok(Self {
            cache: Cache::from_snapshot(builder.build()),
            writer: RwLock::new(Writer {
                segments,
                dir_lock,
                state: StoreState::Open,
            }),
            config,
            replay_report,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Append `payload` to `stream`
    ///
    /// Returns the version assigned to the payload. With
    /// `ExpectedVersion::Exact(v)`, fails with `ConcurrencyConflict` unless
    /// the stream is at version `v`; nothing is written in that case and the
    /// store stays open. Any other failure (encoding or I/O) closes the store.
    pub fn append(
        &self,
        stream: &str,
        payload: impl Into<Bytes>,
        expected: ExpectedVersion,
    ) -> Result<u32> {
        let payload = payload.into();

        // Acquire write lock to serialize appends
        let mut writer = self.writer.write();
        if writer.state == StoreState::Closed {
            return Err(CaskError::Closed);
        }

        let snapshot = self.cache.load();
        let current = snapshot.stream_version(stream);
        if let ExpectedVersion::Exact(expected) = expected {
            if expected != current {
                debug!(stream, expected, actual = current, "Concurrency conflict");
                return Err(CaskError::ConcurrencyConflict {
                    expected,
                    actual: current,
                });
            }
        }

        // Step 1: Encode and durable write
        let version = current + 1;
        let next_index = snapshot.len() as u64;
        if let Err(e) = Self::write_record(&mut writer, stream, version, &payload, next_index) {
            error!(stream, version, error = %e, "Append failed, closing store");
            if let Err(close_err) = writer.shut_down() {
                warn!(error = %close_err, "Error while closing failed store");
            }
            return Err(e);
        }

        // Step 2: Publish to readers
        let assigned = self.cache.publish(stream, payload);
        debug_assert_eq!(assigned, version);

        debug!(stream, version, "Appended record");
        Ok(version)
    }

    /// Full history of `name`, empty if the stream was never written
    ///
    /// Works on a closed store (served from the already loaded cache).
    pub fn read_stream(&self, name: &str) -> Vec<StreamEntry> {
        self.cache.load().stream(name).to_vec()
    }

    /// Entries of `name` with `version > after_version`, at most `max_count`
    pub fn read_stream_from(
        &self,
        name: &str,
        after_version: u32,
        max_count: usize,
    ) -> Vec<StreamEntry> {
        let snapshot = self.cache.load();
        let history = snapshot.stream(name);

        // Versions are 1-based positions, so `after_version` is a slice start
        let start = (after_version as usize).min(history.len());
        history[start..].iter().take(max_count).cloned().collect()
    }

    /// Window of the global feed
    ///
    /// Offsets are 1-based positions in the feed; the window starts just
    /// after `after_offset` and holds at most `max_count` entries.
    pub fn read_all(&self, after_offset: u64, max_count: usize) -> Vec<FeedEntry> {
        let snapshot = self.cache.load();
        let feed = snapshot.feed();

        let start = usize::try_from(after_offset)
            .unwrap_or(usize::MAX)
            .min(feed.len());
        feed[start..].iter().take(max_count).cloned().collect()
    }

    /// Current version of `name` (0 if never written)
    pub fn stream_version(&self, name: &str) -> u32 {
        self.cache.load().stream_version(name)
    }

    /// The current cache snapshot, for iteration without copying
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.cache.load()
    }

    /// Close the store
    ///
    /// Syncs and closes the active segment, then deletes the lock file.
    /// Idempotent; reads keep working afterwards, appends fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.write();
        if writer.state == StoreState::Closed {
            return Ok(());
        }

        writer.shut_down()?;
        info!(data_dir = %self.config.data_dir.display(), "Store closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> StoreState {
        self.writer.read().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == StoreState::Open
    }

    /// What replay found when this store was opened
    pub fn replay_report(&self) -> &ReplayReport {
        &self.replay_report
    }

    /// Path of the segment receiving appends, once the first append happened
    pub fn active_segment(&self) -> Option<PathBuf> {
        self.writer
            .read()
            .segments
            .active_path()
            .map(Path::to_path_buf)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn write_record(
        writer: &mut Writer,
        stream: &str,
        version: u32,
        payload: &[u8],
        next_index: u64,
    ) -> Result<()> {
        let bytes = segment::encode(stream, version, payload)?;
        writer.segments.ensure_active(next_index)?;
        writer.segments.write(&bytes)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let writer = self.writer.get_mut();
        if writer.state == StoreState::Open {
            if let Err(e) = writer.shut_down() {
                warn!(error = %e, "Failed to close store on drop");
            }
        }
    }
}
