/// Size aggregator — per-child disk usage for one directory.
///
/// Files contribute their own length. Subdirectories are walked with
/// `jwalk` (links not followed) and contribute the sum of every
/// non-directory entry beneath them; entries whose metadata cannot be read
/// are skipped and the partial sum stands. Children that total 0 bytes are
/// left out of the snapshot.
///
/// One rayon pool is built per aggregation, on the first subdirectory, and
/// every subtree walk of that run shares it.
///
/// # Cancellation checkpoints
///
/// - before each immediate child;
/// - at every step of a subdirectory walk;
/// - atomically with each progress / terminal send.
///
/// A cancelled run returns after whatever progress it already sent, with no
/// `Complete` or `Error`.
use super::cancel::CancelToken;
use super::entries::open_dir;
use super::events::AggregateEvent;
use crate::config::ScanConfig;
use crate::model::SizeSnapshot;
use crate::registry::{TaskId, TaskOutcome};
use crossbeam_channel::Sender;
use jwalk::Parallelism;
use std::collections::btree_map::{BTreeMap, Entry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub request: TaskId,
    pub path: PathBuf,
}

/// Aggregate `request.path`, sending events to `tx`. Runs on the caller's
/// thread.
pub fn aggregate_sizes(
    request: &AggregateRequest,
    config: &ScanConfig,
    token: &CancelToken,
    tx: &Sender<AggregateEvent>,
) -> TaskOutcome {
    let start = Instant::now();
    let AggregateRequest { request, path } = request;
    let request = *request;

    if token.is_cancelled() {
        return TaskOutcome::Cancelled;
    }

    let children: Vec<fs::DirEntry> = match open_dir(path) {
        Ok(read_dir) => read_dir.filter_map(Result::ok).collect(),
        Err(err) => {
            warn!("Cannot aggregate {}: {err}", path.display());
            let event = AggregateEvent::Error {
                request,
                message: err.to_string(),
            };
            return if token.deliver(tx, event) {
                TaskOutcome::Failed
            } else {
                TaskOutcome::Cancelled
            };
        }
    };

    let total = children.len();
    let threads = config.walk_parallelism();
    let mut parallelism: Option<Parallelism> = None;
    let mut sizes: BTreeMap<String, u64> = BTreeMap::new();

    for (index, child) in children.iter().enumerate() {
        if token.is_cancelled() {
            debug!(
                "Aggregation of {} cancelled at child {index}/{total}",
                path.display()
            );
            return TaskOutcome::Cancelled;
        }

        let size = match child.file_type() {
            Ok(ft) if ft.is_dir() => {
                let parallelism = parallelism.get_or_insert_with(|| walk_parallelism(threads));
                match subtree_size(&child.path(), parallelism, token) {
                    Some(size) => size,
                    None => return TaskOutcome::Cancelled,
                }
            }
            // Unreadable children count as 0.
            Ok(_) => child.metadata().map(|m| m.len()).unwrap_or(0),
            Err(_) => 0,
        };
        if size > 0 {
            insert_unique(&mut sizes, child.file_name().to_string_lossy().into_owned(), size);
        }

        let percent = ((index + 1) * 100 / total) as u8;
        if !token.deliver(tx, AggregateEvent::Progress { request, percent }) {
            return TaskOutcome::Cancelled;
        }
    }

    let snapshot = SizeSnapshot {
        request,
        path: path.clone(),
        sizes,
    };
    debug!(
        "Aggregated {} children of {} ({} bytes) in {:?}",
        total,
        path.display(),
        snapshot.total(),
        start.elapsed()
    );

    if token.deliver(tx, AggregateEvent::Complete(snapshot)) {
        TaskOutcome::Completed
    } else {
        TaskOutcome::Cancelled
    }
}

/// Insert under `name`, appending ` (2)`, ` (3)`, ... when the key is taken.
///
/// Names are converted lossily, so distinct children can share a display
/// name; none of them may be dropped from the totals.
fn insert_unique(sizes: &mut BTreeMap<String, u64>, name: String, size: u64) {
    let mut suffix = 1u32;
    let mut key = name.clone();
    loop {
        match sizes.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(size);
                return;
            }
            Entry::Occupied(_) => {
                suffix += 1;
                key = format!("{name} ({suffix})");
            }
        }
    }
}

/// Walk parallelism for one aggregation run.
///
/// `threads <= 1` walks serially. Otherwise a dedicated rayon pool of that
/// size is built; if the OS refuses, the run falls back to serial walks.
pub fn walk_parallelism(threads: usize) -> Parallelism {
    if threads <= 1 {
        return Parallelism::Serial;
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("dirscope-walk-{i}"))
        .build();
    match pool {
        Ok(pool) => Parallelism::RayonExistingPool {
            pool: Arc::new(pool),
            // The pool is private to this run and walks run one at a time.
            busy_timeout: None,
        },
        Err(err) => {
            warn!("Cannot build walk pool ({err}); walking serially");
            Parallelism::Serial
        }
    }
}

/// Recursive sum of every non-directory entry under `dir`.
///
/// Returns `None` as soon as `token` is cancelled.
pub fn subtree_size(dir: &Path, parallelism: &Parallelism, token: &CancelToken) -> Option<u64> {
    let walker = jwalk::WalkDir::new(dir)
        .skip_hidden(false)
        .follow_links(false)
        .parallelism(parallelism.clone());

    let mut total: u64 = 0;
    for entry in walker {
        if token.is_cancelled() {
            return None;
        }
        let Ok(entry) = entry else {
            continue;
        };
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    Some(total)
}
