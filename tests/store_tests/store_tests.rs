//! Tests for Store
//!
//! These tests verify:
//! - Append/read operations and version assignment
//! - Optimistic concurrency checks
//! - Feed windows
//! - Recovery across reopen, including crash-truncated segments
//! - Directory locking within a process
//! - Lifecycle (close, append-after-close, fail-fast)
//! - Concurrent access patterns

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;

use caskstore::config::Config;
use caskstore::lock::DirLock;
use caskstore::segment::{list_segments, Record};
use caskstore::{CaskError, ExpectedVersion, Store, StoreState};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open_path(temp_dir.path()).unwrap();
    (temp_dir, store)
}

fn payloads(store: &Store, stream: &str) -> Vec<Vec<u8>> {
    store
        .read_stream(stream)
        .into_iter()
        .map(|e| e.payload.to_vec())
        .collect()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_directory_and_lock() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mystore");

    let store = Store::open_path(&data_dir).unwrap();

    assert!(data_dir.is_dir());
    assert!(data_dir.join(DirLock::FILE_NAME).exists());
    assert!(store.is_open());
    assert_eq!(store.data_dir(), data_dir);
}

#[test]
fn test_open_with_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    let store = Store::open(config).unwrap();

    assert_eq!(store.config().data_dir, temp_dir.path());
    store.append("s", &b"x"[..], ExpectedVersion::Any).unwrap();
    assert_eq!(store.stream_version("s"), 1);
}

#[test]
fn test_open_rejects_empty_data_dir() {
    let config = Config::builder().data_dir("").build();
    assert!(matches!(Store::open(config), Err(CaskError::Config(_))));
}

#[test]
fn test_no_segment_until_first_append() {
    let (temp, store) = setup_temp_store();

    assert!(store.active_segment().is_none());
    assert!(list_segments(temp.path()).unwrap().is_empty());

    store.append("s", &b"x"[..], ExpectedVersion::Any).unwrap();
    assert!(store.active_segment().is_some());
    assert_eq!(list_segments(temp.path()).unwrap().len(), 1);
}

// =============================================================================
// Append / Read Tests
// =============================================================================

#[test]
fn test_append_assigns_sequential_versions() {
    let (_temp, store) = setup_temp_store();

    for expected in 1..=10u32 {
        let version = store
            .append("s", format!("p{}", expected).into_bytes(), ExpectedVersion::Any)
            .unwrap();
        assert_eq!(version, expected);
    }

    let versions: Vec<u32> = store.read_stream("s").iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=10).collect::<Vec<u32>>());
}

#[test]
fn test_read_unknown_stream_is_empty() {
    let (_temp, store) = setup_temp_store();

    assert!(store.read_stream("nothing").is_empty());
    assert_eq!(store.stream_version("nothing"), 0);
}

#[test]
fn test_streams_are_independent() {
    let (_temp, store) = setup_temp_store();

    store.append("a", &b"a1"[..], ExpectedVersion::Any).unwrap();
    store.append("b", &b"b1"[..], ExpectedVersion::Any).unwrap();
    store.append("a", &b"a2"[..], ExpectedVersion::Any).unwrap();

    assert_eq!(payloads(&store, "a"), vec![b"a1".to_vec(), b"a2".to_vec()]);
    assert_eq!(payloads(&store, "b"), vec![b"b1".to_vec()]);
}

#[test]
fn test_empty_and_binary_payloads() {
    let (_temp, store) = setup_temp_store();

    store.append("s", Vec::<u8>::new(), ExpectedVersion::Any).unwrap();
    store
        .append("s", vec![0x00u8, 0xFF, 0x00, 0xAB], ExpectedVersion::Any)
        .unwrap();

    assert_eq!(
        payloads(&store, "s"),
        vec![Vec::new(), vec![0x00u8, 0xFF, 0x00, 0xAB]]
    );
}

#[test]
fn test_large_payload() {
    let (_temp, store) = setup_temp_store();

    let large = vec![0xABu8; 100_000];
    store.append("big", large.clone(), ExpectedVersion::Any).unwrap();

    assert_eq!(payloads(&store, "big"), vec![large]);
}

#[test]
fn test_read_stream_from_window() {
    let (_temp, store) = setup_temp_store();
    for i in 1..=5 {
        store
            .append("s", format!("{}", i).into_bytes(), ExpectedVersion::Any)
            .unwrap();
    }

    let versions = |after, max| -> Vec<u32> {
        store
            .read_stream_from("s", after, max)
            .iter()
            .map(|e| e.version)
            .collect()
    };

    assert_eq!(versions(0, usize::MAX), vec![1, 2, 3, 4, 5]);
    assert_eq!(versions(2, usize::MAX), vec![3, 4, 5]);
    assert_eq!(versions(1, 2), vec![2, 3]);
    assert_eq!(versions(5, 10), Vec::<u32>::new());
    assert_eq!(versions(99, 10), Vec::<u32>::new());
    assert_eq!(versions(0, 0), Vec::<u32>::new());
}

// =============================================================================
// Optimistic Concurrency Tests
// =============================================================================

#[test]
fn test_expected_version_matches() {
    let (_temp, store) = setup_temp_store();

    assert_eq!(store.append("s", &b"1"[..], ExpectedVersion::Exact(0)).unwrap(), 1);
    assert_eq!(store.append("s", &b"2"[..], ExpectedVersion::Exact(1)).unwrap(), 2);
    assert_eq!(store.append("s", &b"3"[..], 2u32.into()).unwrap(), 3);
}

#[test]
fn test_conflict_writes_nothing_and_store_stays_open() {
    let (temp, store) = setup_temp_store();
    store.append("s", &b"1"[..], ExpectedVersion::Any).unwrap();
    let segment = store.active_segment().unwrap();
    let size_before = fs::metadata(&segment).unwrap().len();

    let err = store
        .append("s", &b"x"[..], ExpectedVersion::Exact(5))
        .unwrap_err();

    assert!(matches!(
        err,
        CaskError::ConcurrencyConflict { expected: 5, actual: 1 }
    ));
    assert!(err.is_recoverable());
    assert!(store.is_open());
    assert_eq!(fs::metadata(&segment).unwrap().len(), size_before);
    assert_eq!(store.stream_version("s"), 1);
    assert_eq!(list_segments(temp.path()).unwrap().len(), 1);

    // Retry with the refreshed version
    assert_eq!(store.append("s", &b"2"[..], ExpectedVersion::Exact(1)).unwrap(), 2);
}

#[test]
fn test_conflict_on_new_stream() {
    let (_temp, store) = setup_temp_store();

    let err = store
        .append("fresh", &b"x"[..], ExpectedVersion::Exact(3))
        .unwrap_err();

    assert!(matches!(
        err,
        CaskError::ConcurrencyConflict { expected: 3, actual: 0 }
    ));
    assert!(store.read_stream("fresh").is_empty());
}

#[test]
fn test_expected_version_from_raw() {
    assert_eq!(ExpectedVersion::from_raw(-1), ExpectedVersion::Any);
    assert_eq!(ExpectedVersion::from_raw(-42), ExpectedVersion::Any);
    assert_eq!(ExpectedVersion::from_raw(0), ExpectedVersion::Exact(0));
    assert_eq!(ExpectedVersion::from_raw(7), ExpectedVersion::Exact(7));
    assert_eq!(ExpectedVersion::default(), ExpectedVersion::Any);
}

#[test]
fn test_invalid_record_closes_store() {
    let (temp, store) = setup_temp_store();
    store.append("s", &b"kept"[..], ExpectedVersion::Any).unwrap();
    let name = "n".repeat(caskstore::segment::MAX_STREAM_NAME_LEN + 1);

    let err = store.append(&name, &b"x"[..], ExpectedVersion::Any).unwrap_err();

    assert!(matches!(err, CaskError::InvalidRecord(_)));
    assert!(!err.is_recoverable());
    assert_eq!(store.state(), StoreState::Closed);
    assert!(matches!(
        store.append("s", &b"after"[..], ExpectedVersion::Any),
        Err(CaskError::Closed)
    ));

    // Nothing of the rejected record reached disk
    drop(store);
    let store = Store::open_path(temp.path()).unwrap();
    assert_eq!(payloads(&store, "s"), vec![b"kept".to_vec()]);
    assert_eq!(store.replay_report().malformed_segments, 0);
}

// =============================================================================
// Global Feed Tests
// =============================================================================

#[test]
fn test_read_all_windows() {
    let (_temp, store) = setup_temp_store();
    for i in 0..6 {
        let stream = if i % 2 == 0 { "even" } else { "odd" };
        store
            .append(stream, format!("{}", i).into_bytes(), ExpectedVersion::Any)
            .unwrap();
    }

    let window = |after, max| -> Vec<String> {
        store
            .read_all(after, max)
            .iter()
            .map(|e| String::from_utf8(e.payload.to_vec()).unwrap())
            .collect()
    };

    assert_eq!(window(0, 10), vec!["0", "1", "2", "3", "4", "5"]);
    assert_eq!(window(2, 2), vec!["2", "3"]);
    assert_eq!(window(5, 10), vec!["5"]);
    assert!(window(6, 10).is_empty());
    assert!(window(u64::MAX, 10).is_empty());
    assert!(window(0, 0).is_empty());
}

#[test]
fn test_snapshot_is_stable_while_appending() {
    let (_temp, store) = setup_temp_store();
    store.append("s", &b"1"[..], ExpectedVersion::Any).unwrap();

    let snapshot = store.snapshot();
    store.append("s", &b"2"[..], ExpectedVersion::Any).unwrap();

    assert_eq!(snapshot.stream("s").len(), 1);
    assert_eq!(store.snapshot().stream("s").len(), 2);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_reopen_replays_history() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = Store::open_path(temp_dir.path()).unwrap();
        store.append("a", &b"a1"[..], ExpectedVersion::Any).unwrap();
        store.append("b", &b"b1"[..], ExpectedVersion::Any).unwrap();
        store.append("a", &b"a2"[..], ExpectedVersion::Any).unwrap();
        store.close().unwrap();
    }

    let store = Store::open_path(temp_dir.path()).unwrap();

    assert_eq!(store.replay_report().records_recovered, 3);
    assert_eq!(payloads(&store, "a"), vec![b"a1".to_vec(), b"a2".to_vec()]);
    assert_eq!(store.read_all(0, 10).len(), 3);

    // Numbering continues after replay
    assert_eq!(store.append("a", &b"a3"[..], ExpectedVersion::Exact(2)).unwrap(), 3);
}

#[test]
fn test_each_session_gets_new_segment() {
    let temp_dir = TempDir::new().unwrap();

    for session in 0..3u64 {
        let store = Store::open_path(temp_dir.path()).unwrap();
        store.append("s", &b"x"[..], ExpectedVersion::Any).unwrap();
        store.append("s", &b"y"[..], ExpectedVersion::Any).unwrap();

        let active = store.active_segment().unwrap();
        let sequence = list_segments(temp_dir.path())
            .unwrap()
            .into_iter()
            .find(|s| s.path == active)
            .unwrap()
            .sequence;
        assert_eq!(sequence, session * 2);
        store.close().unwrap();
    }

    let store = Store::open_path(temp_dir.path()).unwrap();
    assert_eq!(store.stream_version("s"), 6);
    assert_eq!(store.replay_report().segments_scanned, 3);
}

#[test]
fn test_recovery_from_torn_write() {
    let temp_dir = TempDir::new().unwrap();

    let segment = {
        let store = Store::open_path(temp_dir.path()).unwrap();
        store.append("orders", &b"v1"[..], ExpectedVersion::Any).unwrap();
        store.append("orders", &b"v2"[..], ExpectedVersion::Any).unwrap();
        let segment = store.active_segment().unwrap();
        store.close().unwrap();
        segment
    };

    // Simulate a crash partway through the third record's digest
    let partial = Record::new("orders", 3, b"v3".to_vec()).encode().unwrap();
    let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(&partial[..partial.len() - 7]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let store = Store::open_path(temp_dir.path()).unwrap();

    assert_eq!(payloads(&store, "orders"), vec![b"v1".to_vec(), b"v2".to_vec()]);
    assert_eq!(store.replay_report().malformed_segments, 1);
    assert_eq!(store.append("orders", &b"v3"[..], ExpectedVersion::Exact(2)).unwrap(), 3);
}

#[test]
fn test_open_removes_empty_segments() {
    let temp_dir = TempDir::new().unwrap();
    let empty = temp_dir
        .path()
        .join("00000000000000000000-00000000000000000001.dat");
    fs::write(&empty, b"").unwrap();

    let store = Store::open_path(temp_dir.path()).unwrap();

    assert!(!empty.exists());
    assert_eq!(store.replay_report().empty_segments_removed, 1);
    assert_eq!(store.replay_report().segments_scanned, 0);
}

#[test]
fn test_drop_without_close_is_recoverable() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = Store::open_path(temp_dir.path()).unwrap();
        store.append("s", &b"1"[..], ExpectedVersion::Any).unwrap();
        // Dropped without close
    }

    assert!(!temp_dir.path().join(DirLock::FILE_NAME).exists());
    let store = Store::open_path(temp_dir.path()).unwrap();
    assert_eq!(store.stream_version("s"), 1);
}

// =============================================================================
// Locking Tests
// =============================================================================

#[test]
fn test_second_open_is_lock_held() {
    let (temp, _store) = setup_temp_store();

    let second = Store::open_path(temp.path());

    assert!(matches!(second, Err(CaskError::LockHeld(_))));
}

#[test]
fn test_open_after_close_succeeds() {
    let (temp, store) = setup_temp_store();
    store.close().unwrap();

    assert!(!temp.path().join(DirLock::FILE_NAME).exists());
    let reopened = Store::open_path(temp.path()).unwrap();
    assert!(reopened.is_open());
}

#[test]
fn test_stale_lock_file_does_not_block() {
    let temp_dir = TempDir::new().unwrap();
    // Left behind by a process that died without cleanup; nobody holds it
    fs::write(temp_dir.path().join(DirLock::FILE_NAME), b"").unwrap();

    let store = Store::open_path(temp_dir.path()).unwrap();
    assert!(store.is_open());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_is_idempotent() {
    let (_temp, store) = setup_temp_store();

    store.close().unwrap();
    store.close().unwrap();

    assert_eq!(store.state(), StoreState::Closed);
}

#[test]
fn test_append_after_close_is_rejected() {
    let (_temp, store) = setup_temp_store();
    store.append("s", &b"1"[..], ExpectedVersion::Any).unwrap();
    store.close().unwrap();

    let err = store.append("s", &b"2"[..], ExpectedVersion::Any).unwrap_err();

    assert!(matches!(err, CaskError::Closed));
    assert!(!err.is_recoverable());
}

#[test]
fn test_reads_work_after_close() {
    let (_temp, store) = setup_temp_store();
    store.append("s", &b"1"[..], ExpectedVersion::Any).unwrap();
    store.close().unwrap();

    assert_eq!(payloads(&store, "s"), vec![b"1".to_vec()]);
    assert_eq!(store.read_all(0, 10).len(), 1);
}

#[cfg(unix)]
#[test]
fn test_io_failure_closes_store() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("store");
    let store = Store::open_path(&data_dir).unwrap();

    // Removing the directory makes creating the first segment fail
    fs::remove_dir_all(&data_dir).unwrap();

    let err = store.append("s", &b"1"[..], ExpectedVersion::Any).unwrap_err();

    assert!(matches!(err, CaskError::Io(_)));
    assert!(!err.is_recoverable());
    assert_eq!(store.state(), StoreState::Closed);
    assert!(store.read_stream("s").is_empty());
    assert!(matches!(
        store.append("s", &b"1"[..], ExpectedVersion::Any),
        Err(CaskError::Closed)
    ));
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_concurrent_appends_to_one_stream() {
    let (_temp, store) = setup_temp_store();
    let store = Arc::new(store);

    let mut handles = vec![];
    for t in 0..4 {
        let store_clone = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                store_clone
                    .append("shared", format!("{}-{}", t, i).into_bytes(), ExpectedVersion::Any)
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let versions: Vec<u32> = store.read_stream("shared").iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=100).collect::<Vec<u32>>());
    assert_eq!(store.read_all(0, 1000).len(), 100);
}

#[test]
fn test_optimistic_writers_exactly_one_wins_each_round() {
    let (_temp, store) = setup_temp_store();

    crossbeam::thread::scope(|scope| {
        for t in 0..4 {
            let store = &store;
            scope.spawn(move |_| {
                let mut wins = 0;
                while wins < 10 {
                    let current = store.stream_version("contended");
                    match store.append(
                        "contended",
                        format!("{}", t).into_bytes(),
                        ExpectedVersion::Exact(current),
                    ) {
                        Ok(version) => {
                            assert_eq!(version, current + 1);
                            wins += 1;
                        }
                        Err(CaskError::ConcurrencyConflict { .. }) => continue,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            });
        }
    })
    .unwrap();

    assert_eq!(store.stream_version("contended"), 40);
}

#[test]
fn test_readers_never_block_on_writers() {
    let (_temp, store) = setup_temp_store();

    crossbeam::thread::scope(|scope| {
        scope.spawn(|_| {
            for i in 0..100 {
                store
                    .append("live", format!("{}", i).into_bytes(), ExpectedVersion::Any)
                    .unwrap();
            }
        });

        for _ in 0..3 {
            scope.spawn(|_| {
                let mut last_seen = 0;
                while last_seen < 100 {
                    let history = store.read_stream("live");
                    assert!(history.len() >= last_seen);
                    for (i, entry) in history.iter().enumerate() {
                        assert_eq!(entry.version as usize, i + 1);
                    }
                    last_seen = history.len();
                }
            });
        }
    })
    .unwrap();
}
