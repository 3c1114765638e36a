//! Segment Module
//!
//! Append-only segment files: the sole source of truth for the store.
//!
//! ## Responsibilities
//! - Encode/decode records with a SHA-1 digest for corruption detection
//! - Discover segment files in creation order
//! - Lazily create the single active segment and write to it durably
//! - Replay every segment into the cache on startup
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── lock
//!   ├── 00000000000000000000-00000001718000000000.dat
//!   └── 00000000000000000042-00000001718000360000.dat
//!        └─ global record index ─┘ └─ unix millis ─┘
//! ```
//!
//! ## Record Format
//! Records are written back to back, no file header or footer.
//! ```text
//! ┌──────────────┬──────────┬─────────────┬─────────────┬──────────┬─────────────┐
//! │ NameLen (4)  │ Name     │ Version (4) │ PayLen (4)  │ Payload  │ SHA-1 (20)  │
//! └──────────────┴──────────┴─────────────┴─────────────┴──────────┴─────────────┘
//! ```
//! All integers are big-endian. The digest covers every byte before it.

mod record;
mod manager;
mod replay;

pub use record::{encode, record_digest, Record, DIGEST_SIZE, MAX_STREAM_NAME_LEN};
pub use manager::{list_segments, SegmentInfo, SegmentManager, SEGMENT_EXTENSION};
pub use replay::{replay, verify, ReplayReport, SegmentReader};
