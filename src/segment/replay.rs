//! Segment Replay
//!
//! Rebuilds the cache by reading every segment on startup.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cache::CacheBuilder;
use crate::error::{DecodeError, Result};

use super::manager::{list_segments, SegmentInfo};
use super::Record;

/// Result of a replay or verify pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Number of segment files read
    pub segments_scanned: usize,

    /// Number of records successfully decoded
    pub records_recovered: u64,

    /// Segments whose tail was discarded as malformed
    pub malformed_segments: usize,

    /// Zero-length segments deleted before replay
    pub empty_segments_removed: usize,
}

/// Sequential record reader over one segment file
pub struct SegmentReader {
    path: PathBuf,
    reader: BufReader<File>,

    /// Byte offset of the next record
    offset: u64,
}

impl SegmentReader {
    /// Open a segment file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
        })
    }

    /// Read the next record
    ///
    /// `Ok(None)` means the segment ended cleanly on a record boundary.
    pub fn next_record(&mut self) -> std::result::Result<Option<Record>, DecodeError> {
        match Record::decode(&mut self.reader) {
            Ok(record) => {
                self.offset += record.encoded_len() as u64;
                Ok(Some(record))
            }
            Err(DecodeError::Truncated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Byte offset of the next unread record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replay `segments` in order into `builder`
///
/// A malformed record ends its segment; the rest of that file is ignored
/// and replay moves on. I/O errors abort.
pub fn replay(segments: &[SegmentInfo], builder: &mut CacheBuilder) -> Result<ReplayReport> {
    let report = scan(segments, |record| {
        let expected = builder.stream_version(&record.stream) + 1;
        if record.version != expected {
            warn!(
                stream = %record.stream,
                stored = record.version,
                assigned = expected,
                "Stored version disagrees with replay count"
            );
        }
        builder.push(&record.stream, record.payload);
    })?;

    info!(
        segments = report.segments_scanned,
        records = report.records_recovered,
        malformed = report.malformed_segments,
        "Replay complete"
    );
    Ok(report)
}

/// Scan the segments in `dir` without modifying anything
///
/// Takes no lock and does not remove empty segments, so it is safe to run
/// against a directory another process has open.
pub fn verify(dir: &Path) -> Result<ReplayReport> {
    let segments = list_segments(dir)?;
    scan(&segments, |_| {})
}

fn scan(segments: &[SegmentInfo], mut visit: impl FnMut(Record)) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();

    for segment in segments {
        let mut reader = SegmentReader::open(&segment.path)?;
        report.segments_scanned += 1;

        loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    report.records_recovered += 1;
                    visit(record);
                }
                Ok(None) => break,
                Err(DecodeError::Malformed(reason)) => {
                    warn!(
                        path = %reader.path().display(),
                        offset = reader.offset(),
                        %reason,
                        "Discarding malformed segment tail"
                    );
                    report.malformed_segments += 1;
                    break;
                }
                Err(DecodeError::Io(e)) => return Err(e.into()),
                Err(DecodeError::Truncated) => break,
            }
        }
    }

    Ok(report)
}
