//! Segment Manager
//!
//! Owns the store directory's segment files and the single active one.
//!
//! ## Responsibilities
//! - Discover existing segments on startup, oldest first
//! - Create the active segment on the first append of a session
//! - Append encoded records and flush them to stable storage
//! - Clean up zero-length segments left by an aborted creation

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::Result;

/// File extension of segment files
pub const SEGMENT_EXTENSION: &str = "dat";

/// A segment file discovered on disk
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SegmentInfo {
    /// Global record index when the segment was created
    pub sequence: u64,

    /// Creation time, unix millis
    pub created_millis: u64,

    pub path: PathBuf,
}

impl SegmentInfo {
    /// Parse "00000000000000000042-00000001718000360000.dat"
    fn from_path(path: &Path) -> Option<Self> {
        if path.extension()? != SEGMENT_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (sequence, created) = stem.split_once('-')?;
        Some(Self {
            sequence: sequence.parse().ok()?,
            created_millis: created.parse().ok()?,
            path: path.to_path_buf(),
        })
    }
}

/// All segment files in `dir`, in creation order
///
/// Files that are not named like segments are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentInfo>> {
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            if let Some(info) = SegmentInfo::from_path(&path) {
                segments.push(info);
            }
        }
    }

    // (sequence, created) order equals filename order for fixed-width names
    segments.sort();
    Ok(segments)
}

/// The segment currently open for appends
struct ActiveSegment {
    path: PathBuf,
    file: File,
}

/// Manages segment files in one directory
///
/// ## Concurrency:
/// - Not internally synchronized; the store's write lock owns it
pub struct SegmentManager {
    /// Store directory
    dir: PathBuf,

    /// Opened lazily, never rotated
    active: Option<ActiveSegment>,
}

impl SegmentManager {
    /// Open the segment directory, creating it if missing
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            active: None,
        })
    }

    /// Segment files present in the directory, oldest first
    pub fn list_segments(&self) -> Result<Vec<SegmentInfo>> {
        list_segments(&self.dir)
    }

    /// Delete zero-length segments; returns how many were removed
    pub fn remove_empty_segments(&self) -> Result<usize> {
        let mut removed = 0;

        for segment in self.list_segments()? {
            if self.is_active(&segment.path) {
                continue;
            }
            if fs::metadata(&segment.path)?.len() == 0 {
                info!(path = %segment.path.display(), "Removing empty segment");
                fs::remove_file(&segment.path)?;
                removed += 1;
            }
        }

        if removed > 0 {
            sync_dir(&self.dir)?;
        }
        Ok(removed)
    }

    /// Make sure a segment is open for appends
    ///
    /// The first call creates `{next_global_index}-{now}.dat`; later calls
    /// return the same segment.
    pub fn ensure_active(&mut self, next_global_index: u64) -> Result<&Path> {
        let active = match self.active.take() {
            Some(active) => active,
            None => self.create_segment(next_global_index, unix_millis())?,
        };
        Ok(self.active.insert(active).path.as_path())
    }

    /// Append `bytes` to the active segment and flush to stable storage
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let active = self.active.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no active segment")
        })?;

        active.file.write_all(bytes)?;
        active.file.sync_all()?;

        debug!(bytes = bytes.len(), "Segment write synced");
        Ok(())
    }

    /// Flush and close the active segment, if any
    pub fn close(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            active.file.sync_all()?;
            debug!(path = %active.path.display(), "Closed active segment");
        }
        Ok(())
    }

    /// Path of the active segment, if one has been opened
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Get the directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Never reuses an existing file, whose tail may hold a torn record
    fn create_segment(&self, next_global_index: u64, created_millis: u64) -> Result<ActiveSegment> {
        let path = self
            .dir
            .join(Self::segment_file_name(next_global_index, created_millis));

        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        sync_dir(&self.dir)?;

        info!(path = %path.display(), "Opened active segment");
        Ok(ActiveSegment { path, file })
    }

    fn is_active(&self, path: &Path) -> bool {
        self.active_path() == Some(path)
    }

    /// Fixed width so lexicographic order is creation order
    fn segment_file_name(sequence: u64, created_millis: u64) -> String {
        format!("{:020}-{:020}.{}", sequence, created_millis, SEGMENT_EXTENSION)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Persist directory entries (file creation/removal)
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
