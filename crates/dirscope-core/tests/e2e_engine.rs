/// End-to-end engine integration tests.
///
/// These tests run the real directory loader, size aggregator and task
/// registry against a temporary filesystem. Workers are plain functions, so
/// most tests call them on the test thread with an unbounded channel; the
/// cancellation tests use a capacity-1 channel to park the worker at a known
/// send and cancel it there.
use crossbeam_channel::Receiver;
use dirscope_core::config::ScanConfig;
use dirscope_core::error::RegistryError;
use dirscope_core::model::NodeIndex;
use dirscope_core::registry::{TaskId, TaskKind, TaskOutcome, TaskRegistry, TaskTarget};
use dirscope_core::scanner::{
    aggregate_sizes, load_directory, AggregateEvent, AggregateRequest, CancelToken, LoadEvent,
    LoadRequest,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn write_bytes(path: &Path, n: usize) {
    let mut f = fs::File::create(path).unwrap();
    f.write_all(&vec![0u8; n]).unwrap();
}

/// ```text
/// root/
///   f1      (2 048 bytes)
///   b/
///     f2    (1 024 bytes)
/// ```
fn build_small_tree(root: &Path) {
    write_bytes(&root.join("f1"), 2048);
    fs::create_dir(root.join("b")).unwrap();
    write_bytes(&root.join("b").join("f2"), 1024);
}

fn fill_with_files(root: &Path, count: usize) {
    for i in 0..count {
        write_bytes(&root.join(format!("file{i:04}")), 1);
    }
}

fn load_request(path: &Path) -> LoadRequest {
    LoadRequest {
        task: TaskId(1),
        node: NodeIndex::new(0),
        path: path.to_path_buf(),
    }
}

fn names(entries: &[dirscope_core::model::DirEntry]) -> Vec<String> {
    entries.iter().map(|e| e.name.to_string()).collect()
}

fn batch_sizes(events: &[LoadEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            LoadEvent::Batch { entries, .. } => Some(entries.len()),
            _ => None,
        })
        .collect()
}

fn wait_for(mut done: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn drain<T>(rx: &Receiver<T>) -> Vec<T> {
    rx.try_iter().collect()
}

// ── Directory loader ─────────────────────────────────────────────────────────

/// A small directory arrives as one batch, directories first, then Complete.
#[test]
fn loader_delivers_sorted_batch_then_complete() {
    let tmp = TempDir::new().unwrap();
    build_small_tree(tmp.path());
    let (tx, rx) = crossbeam_channel::unbounded();

    let outcome = load_directory(
        &load_request(tmp.path()),
        &ScanConfig::default(),
        &CancelToken::new(),
        &tx,
    );
    assert_eq!(outcome, TaskOutcome::Completed);

    let events = drain(&rx);
    assert_eq!(events.len(), 2);
    match &events[0] {
        LoadEvent::Batch { entries, .. } => {
            assert_eq!(names(entries), ["b", "f1"]);
            assert!(entries[0].is_dir && entries[0].has_children);
            assert_eq!(entries[1].size, 2048);
        }
        other => panic!("expected a batch, got {other:?}"),
    }
    assert!(matches!(
        events[1],
        LoadEvent::Complete {
            task: TaskId(1),
            ..
        }
    ));
}

/// Batches partition the listing: every entry exactly once, each batch
/// at most `batch_size`, exactly one terminal event at the end.
#[test]
fn loader_batches_partition_the_listing() {
    let tmp = TempDir::new().unwrap();
    fill_with_files(tmp.path(), 350);
    let (tx, rx) = crossbeam_channel::unbounded();

    load_directory(
        &load_request(tmp.path()),
        &ScanConfig::default(),
        &CancelToken::new(),
        &tx,
    );

    let events = drain(&rx);
    assert_eq!(batch_sizes(&events), [100, 100, 100, 50]);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());

    let mut seen: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            LoadEvent::Batch { entries, .. } => Some(names(entries)),
            _ => None,
        })
        .flatten()
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 350);
}

/// An empty directory produces no batch, only Complete.
#[test]
fn loader_empty_directory_completes_without_batches() {
    let tmp = TempDir::new().unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    load_directory(
        &load_request(tmp.path()),
        &ScanConfig::default(),
        &CancelToken::new(),
        &tx,
    );

    let events = drain(&rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], LoadEvent::Complete { .. }));
}

/// A missing directory yields exactly one Error and no batches.
#[test]
fn loader_reports_missing_directory() {
    let tmp = TempDir::new().unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    let outcome = load_directory(
        &load_request(&tmp.path().join("gone")),
        &ScanConfig::default(),
        &CancelToken::new(),
        &tx,
    );
    assert_eq!(outcome, TaskOutcome::Failed);

    let events = drain(&rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        LoadEvent::Error { message, .. } => assert!(message.contains("not found")),
        other => panic!("expected an error, got {other:?}"),
    }
}

/// Entries past `max_entries` are dropped, and the load still completes.
#[test]
fn loader_truncates_at_entry_cap() {
    let tmp = TempDir::new().unwrap();
    fill_with_files(tmp.path(), 200);
    let config = ScanConfig {
        max_entries: 150,
        ..ScanConfig::default()
    };
    let (tx, rx) = crossbeam_channel::unbounded();

    let outcome = load_directory(&load_request(tmp.path()), &config, &CancelToken::new(), &tx);
    assert_eq!(outcome, TaskOutcome::Completed);

    let events = drain(&rx);
    assert_eq!(batch_sizes(&events), [100, 50]);
    assert!(matches!(events.last(), Some(LoadEvent::Complete { .. })));
}

/// Cancelled before start: nothing at all is delivered.
#[test]
fn loader_cancelled_before_start_sends_nothing() {
    let tmp = TempDir::new().unwrap();
    build_small_tree(tmp.path());
    let token = CancelToken::new();
    token.cancel();
    let (tx, rx) = crossbeam_channel::unbounded();

    let outcome = load_directory(&load_request(tmp.path()), &ScanConfig::default(), &token, &tx);
    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert!(drain(&rx).is_empty());
}

/// Cancelled between batches: some batches, never a terminal event.
#[test]
fn loader_cancelled_mid_listing_sends_no_terminal_event() {
    let tmp = TempDir::new().unwrap();
    fill_with_files(tmp.path(), 350);
    let (tx, rx) = crossbeam_channel::bounded(1);
    let token = CancelToken::new();
    let worker_token = token.clone();
    let request = load_request(tmp.path());
    let worker = thread::spawn(move || {
        load_directory(&request, &ScanConfig::default(), &worker_token, &tx)
    });

    let first = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(matches!(first, LoadEvent::Batch { .. }));
    token.cancel();
    assert_eq!(worker.join().unwrap(), TaskOutcome::Cancelled);

    let rest = drain(&rx);
    assert!(rest.iter().all(|e| !e.is_terminal()));
    assert!(rest.len() <= 1);
}

/// Cancelled after the last batch is queued but before Complete is handed
/// over: the batch stands, Complete never arrives.
#[test]
fn loader_cancelled_after_last_batch_suppresses_complete() {
    let tmp = TempDir::new().unwrap();
    fill_with_files(tmp.path(), 100);
    let (tx, rx) = crossbeam_channel::bounded(1);
    let token = CancelToken::new();
    let worker_token = token.clone();
    let request = load_request(tmp.path());
    let worker = thread::spawn(move || {
        load_directory(&request, &ScanConfig::default(), &worker_token, &tx)
    });

    // The only batch fills the channel; the worker is now parked on Complete.
    wait_for(|| rx.len() == 1, "the batch");
    token.cancel();
    assert_eq!(worker.join().unwrap(), TaskOutcome::Cancelled);

    let events = drain(&rx);
    assert_eq!(batch_sizes(&events), [100]);
    assert_eq!(events.len(), 1);
}

// ── Size aggregator ──────────────────────────────────────────────────────────

fn aggregate(path: &Path, config: &ScanConfig) -> (TaskOutcome, Vec<AggregateEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let request = AggregateRequest {
        request: TaskId(7),
        path: path.to_path_buf(),
    };
    let outcome = aggregate_sizes(&request, config, &CancelToken::new(), &tx);
    (outcome, drain(&rx))
}

fn progress_of(events: &[AggregateEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            AggregateEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

/// One file and one subdirectory: progress 50 then 100, recursive sizes.
#[test]
fn aggregator_reports_progress_and_sizes() {
    let tmp = TempDir::new().unwrap();
    build_small_tree(tmp.path());

    let (outcome, events) = aggregate(tmp.path(), &ScanConfig::default());
    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(progress_of(&events), [50, 100]);

    let Some(AggregateEvent::Complete(snapshot)) = events.last() else {
        panic!("expected Complete last, got {events:?}");
    };
    assert_eq!(snapshot.request, TaskId(7));
    assert_eq!(snapshot.path, tmp.path());
    let expected: BTreeMap<String, u64> =
        [("b".to_string(), 1024), ("f1".to_string(), 2048)].into();
    assert_eq!(snapshot.sizes, expected);
    assert_eq!(snapshot.total(), 3072);
}

/// Deep subtrees are summed, serial and parallel walks agree.
#[test]
fn aggregator_sums_deep_subtrees() {
    let tmp = TempDir::new().unwrap();
    let deep = tmp.path().join("x").join("y").join("z");
    fs::create_dir_all(&deep).unwrap();
    write_bytes(&tmp.path().join("x").join("top"), 10);
    write_bytes(&deep.join("bottom"), 5);

    for walk_threads in [1, 4] {
        let config = ScanConfig {
            walk_threads,
            ..ScanConfig::default()
        };
        let (_, events) = aggregate(tmp.path(), &config);
        let Some(AggregateEvent::Complete(snapshot)) = events.last() else {
            panic!("expected Complete last");
        };
        assert_eq!(snapshot.sizes.get("x"), Some(&15));
    }
}

/// Zero-byte files and empty directories are left out of the snapshot.
#[test]
fn aggregator_excludes_zero_size_children() {
    let tmp = TempDir::new().unwrap();
    write_bytes(&tmp.path().join("empty.txt"), 0);
    fs::create_dir(tmp.path().join("hollow")).unwrap();
    write_bytes(&tmp.path().join("data"), 9);

    let (_, events) = aggregate(tmp.path(), &ScanConfig::default());
    assert_eq!(progress_of(&events).len(), 3);
    let Some(AggregateEvent::Complete(snapshot)) = events.last() else {
        panic!("expected Complete last");
    };
    assert_eq!(snapshot.sizes.keys().collect::<Vec<_>>(), ["data"]);
}

/// An empty directory completes immediately with no progress events.
#[test]
fn aggregator_empty_directory() {
    let tmp = TempDir::new().unwrap();
    let (outcome, events) = aggregate(tmp.path(), &ScanConfig::default());
    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(events.len(), 1);
    let AggregateEvent::Complete(snapshot) = &events[0] else {
        panic!("expected Complete");
    };
    assert!(snapshot.is_empty());
}

/// Progress never decreases and ends at 100.
#[test]
fn aggregator_progress_is_monotonic() {
    let tmp = TempDir::new().unwrap();
    fill_with_files(tmp.path(), 7);

    let (_, events) = aggregate(tmp.path(), &ScanConfig::default());
    let progress = progress_of(&events);
    assert_eq!(progress.len(), 7);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

/// A missing target produces one Error and nothing else.
#[test]
fn aggregator_reports_missing_directory() {
    let tmp = TempDir::new().unwrap();
    let (outcome, events) = aggregate(&tmp.path().join("gone"), &ScanConfig::default());
    assert_eq!(outcome, TaskOutcome::Failed);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        AggregateEvent::Error {
            request: TaskId(7),
            ..
        }
    ));
}

/// Cancelled mid-run: no Complete is ever delivered.
#[test]
fn aggregator_cancelled_mid_run_sends_no_terminal_event() {
    let tmp = TempDir::new().unwrap();
    fill_with_files(tmp.path(), 20);
    let (tx, rx) = crossbeam_channel::bounded(1);
    let token = CancelToken::new();
    let worker_token = token.clone();
    let request = AggregateRequest {
        request: TaskId(1),
        path: tmp.path().to_path_buf(),
    };
    let worker = thread::spawn(move || {
        aggregate_sizes(&request, &ScanConfig::default(), &worker_token, &tx)
    });

    let first = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(matches!(first, AggregateEvent::Progress { .. }));
    token.cancel();
    assert_eq!(worker.join().unwrap(), TaskOutcome::Cancelled);
    assert!(drain(&rx).iter().all(|e| !e.is_terminal()));
}

// ── Task registry ────────────────────────────────────────────────────────────

/// Work that runs until its token is cancelled.
fn until_cancelled(_: TaskId, token: CancelToken) -> TaskOutcome {
    while !token.is_cancelled() {
        thread::sleep(Duration::from_millis(2));
    }
    TaskOutcome::Cancelled
}

/// A second start for a busy target is rejected; after cancel it succeeds.
#[test]
fn registry_allows_one_task_per_target() {
    let registry = TaskRegistry::default();
    let scope = registry.new_scope();
    let target = TaskTarget::Node(scope, NodeIndex::new(3));

    let first = registry.start(target, TaskKind::Load, until_cancelled).unwrap();
    let second = registry.start(target, TaskKind::Load, until_cancelled);
    assert!(matches!(
        second,
        Err(RegistryError::AlreadyRunning { target: t }) if t == target
    ));
    assert_eq!(registry.running_task(target), Some(first));

    // Other targets are independent.
    registry
        .start(TaskTarget::Selection(scope), TaskKind::Aggregate, until_cancelled)
        .unwrap();
    assert_eq!(registry.running_count(), 2);

    assert!(registry.cancel(target));
    let third = registry.start(target, TaskKind::Load, until_cancelled).unwrap();
    assert!(third > first);
    assert_eq!(registry.cancel_all(), 2);
}

/// `cancel` returns only after the worker has acknowledged.
#[test]
fn registry_cancel_waits_for_acknowledgement() {
    let registry = TaskRegistry::default();
    let selection = TaskTarget::Selection(registry.new_scope());
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stopped);

    let id = registry
        .start(selection, TaskKind::Aggregate, move |_, token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
            // Slow cleanup after observing the flag.
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
            TaskOutcome::Cancelled
        })
        .unwrap();

    assert!(registry.cancel(selection));
    assert!(stopped.load(Ordering::SeqCst));
    assert!(!registry.is_running(selection));
    assert_eq!(
        registry.last_outcome(selection),
        Some((id, TaskOutcome::Cancelled))
    );
}

/// A worker that ignores cancellation is detached once the timeout passes,
/// freeing the target for a new task.
#[test]
fn registry_detaches_unresponsive_worker_after_timeout() {
    let registry = TaskRegistry::new(Duration::from_millis(50));
    let target = TaskTarget::Node(registry.new_scope(), NodeIndex::new(0));
    registry
        .start(target, TaskKind::Load, |_, _| {
            thread::sleep(Duration::from_millis(500));
            TaskOutcome::Completed
        })
        .unwrap();

    let start = Instant::now();
    assert!(registry.cancel(target));
    assert!(start.elapsed() < Duration::from_millis(400));
    assert!(!registry.is_running(target));

    let replacement = registry
        .start(target, TaskKind::Load, |_, _| TaskOutcome::Completed)
        .unwrap();
    wait_for(
        || registry.last_outcome(target).map(|(id, _)| id) == Some(replacement),
        "replacement task",
    );
}

/// `cancel_all` stops every task and leaves the registry empty.
#[test]
fn registry_cancel_all_stops_everything() {
    let registry = TaskRegistry::default();
    let scope = registry.new_scope();
    for i in 0..3 {
        registry
            .start(TaskTarget::Node(scope, NodeIndex::new(i)), TaskKind::Load, until_cancelled)
            .unwrap();
    }
    registry
        .start(TaskTarget::Selection(scope), TaskKind::Aggregate, until_cancelled)
        .unwrap();

    assert_eq!(registry.cancel_all(), 4);
    assert_eq!(registry.running_count(), 0);
    assert_eq!(registry.cancel_all(), 0);
}

/// Two scopes can hold the same node index; cancelling one scope leaves
/// the other's tasks running.
#[test]
fn registry_cancel_scope_spares_other_scopes() {
    let registry = TaskRegistry::default();
    let (mine, theirs) = (registry.new_scope(), registry.new_scope());
    let node = NodeIndex::new(0);
    registry
        .start(TaskTarget::Node(mine, node), TaskKind::Load, until_cancelled)
        .unwrap();
    registry
        .start(TaskTarget::Node(theirs, node), TaskKind::Load, until_cancelled)
        .unwrap();
    registry
        .start(TaskTarget::Selection(theirs), TaskKind::Aggregate, until_cancelled)
        .unwrap();

    assert_eq!(registry.cancel_scope(mine), 1);
    assert_eq!(registry.running_in_scope(mine), 0);
    assert_eq!(registry.running_in_scope(theirs), 2);
    assert!(registry.is_running(TaskTarget::Node(theirs, node)));
    assert_eq!(registry.cancel_all(), 2);
}

/// Loader driven through the registry: events arrive and the slot frees up.
#[test]
fn registry_runs_loader_to_completion() {
    let tmp = TempDir::new().unwrap();
    build_small_tree(tmp.path());
    let registry = TaskRegistry::default();
    let (tx, rx) = crossbeam_channel::unbounded();
    let node = NodeIndex::new(0);
    let target = TaskTarget::Node(registry.new_scope(), node);
    let path = tmp.path().to_path_buf();
    let config = ScanConfig::default();

    let id = registry
        .start(target, TaskKind::Load, move |task, token| {
            load_directory(&LoadRequest { task, node, path }, &config, &token, &tx)
        })
        .unwrap();

    wait_for(|| !registry.is_running(target), "loader");
    let events = drain(&rx);
    assert!(events.iter().all(|e| e.task() == id));
    assert!(matches!(events.last(), Some(LoadEvent::Complete { .. })));
    assert_eq!(
        registry.last_outcome(target),
        Some((id, TaskOutcome::Completed))
    );
}
