//! Cache Module
//!
//! In-memory view of every record, rebuilt from the segments on open.
//!
//! ## Responsibilities
//! - Per-stream history of `(version, payload)`
//! - Global feed of `(stream, payload)` in commit order
//! - Lock-free reads while an append is in flight
//!
//! ## Data Structure Choice
//! One immutable `CacheSnapshot` behind an `ArcSwap`:
//! - Readers take a single atomic load and never block
//! - An append builds the next snapshot and swaps it in, so a reader sees
//!   both structures either before or after the append, never half of it
//! - Payloads are `Bytes` and names `Arc<str>`, so copying a history is a
//!   series of reference-count bumps

mod snapshot;

use std::sync::Arc;

use bytes::Bytes;

pub use snapshot::{Cache, CacheBuilder, CacheSnapshot};

/// One entry of a stream's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// 1-based version within the stream
    pub version: u32,

    pub payload: Bytes,
}

/// One entry of the global feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Stream the payload was appended to
    pub stream: Arc<str>,

    pub payload: Bytes,
}
