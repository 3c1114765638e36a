//! # caskstore
//!
//! An embedded, Bitcask-style log-structured store for versioned streams:
//! - Append-only segment files, never rewritten in place
//! - SHA-1 digest per record, truncated tails survive a crash
//! - Optimistic concurrency on per-stream versions
//! - Lock-free reads from copy-on-write cache snapshots
//! - One writer process per directory (advisory lock file)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │           (Single Writer / Lock-Free Readers)                │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │ append               │ read                 │ open/close
//!         ▼                      ▼                      ▼
//!  ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//!  │  Segments   │        │    Cache    │        │   DirLock   │
//!  │  (Append)   │        │  (ArcSwap)  │        │   (flock)   │
//!  └──────┬──────┘        └──────▲──────┘        └─────────────┘
//!         │                      │
//!         └────── Replay ────────┘
//!              (on open)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use caskstore::{ExpectedVersion, Store};
//!
//! let store = Store::open_path(std::path::Path::new("./data"))?;
//! let version = store.append("orders", &b"created"[..], ExpectedVersion::Exact(0))?;
//! assert_eq!(version, 1);
//!
//! for entry in store.read_stream("orders") {
//!     println!("{} => {:?}", entry.version, entry.payload);
//! }
//! store.close()?;
//! # Ok::<(), caskstore::CaskError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod segment;
pub mod cache;
pub mod lock;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::Config;
pub use cache::{FeedEntry, StreamEntry};
pub use store::{ExpectedVersion, Store, StoreState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of caskstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
