/// Directory loader — streams one directory level to the tree in batches.
///
/// # Cancellation checkpoints
///
/// - before each entry is read (no stat work after cancellation);
/// - at each batch boundary, atomically with the send
///   (see [`CancelToken::deliver`]);
/// - before the terminal `Complete` / `Error` event, likewise atomically.
///
/// A cancelled run returns without a terminal event.
///
/// # Batching
///
/// Entries are accumulated locally and sent as one `LoadEvent::Batch` per
/// `batch_size` entries, so the consumer applies one atomic update per batch
/// rather than one per entry. Each batch is sorted directories-first, then
/// by name, before it is sent. At most `max_entries` entries are loaded;
/// anything past the cap is dropped with a warning.
use super::cancel::CancelToken;
use super::entries::scan_entries;
use super::events::LoadEvent;
use crate::config::ScanConfig;
use crate::model::sort::loader_order;
use crate::model::{DirEntry, NodeIndex};
use crate::registry::{TaskId, TaskOutcome};
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, warn};

/// What to load and on whose behalf.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub task: TaskId,
    pub node: NodeIndex,
    pub path: PathBuf,
}

/// Load `request.path`, sending events to `tx`. Runs on the caller's thread.
pub fn load_directory(
    request: &LoadRequest,
    config: &ScanConfig,
    token: &CancelToken,
    tx: &Sender<LoadEvent>,
) -> TaskOutcome {
    let start = Instant::now();
    let LoadRequest { task, node, path } = request;
    let (task, node) = (*task, *node);

    if token.is_cancelled() {
        return TaskOutcome::Cancelled;
    }

    let mut entries = match scan_entries(path) {
        Ok(it) => it,
        Err(err) => {
            warn!("Cannot list {}: {err}", path.display());
            let event = LoadEvent::Error {
                task,
                node,
                message: err.to_string(),
            };
            return if token.deliver(tx, event) {
                TaskOutcome::Failed
            } else {
                TaskOutcome::Cancelled
            };
        }
    };

    let batch_size = config.batch_size.max(1);
    let mut batch: Vec<DirEntry> = Vec::with_capacity(batch_size);
    let mut loaded: usize = 0;
    let mut batches: usize = 0;

    loop {
        if token.is_cancelled() {
            debug!("Load of {} cancelled after {loaded} entries", path.display());
            return TaskOutcome::Cancelled;
        }
        let Some(entry) = entries.next() else {
            break;
        };
        if loaded == config.max_entries {
            warn!(
                "Entry cap ({}) reached in {}, truncating listing",
                config.max_entries,
                path.display()
            );
            break;
        }
        batch.push(entry);
        loaded += 1;

        if batch.len() >= batch_size {
            if !flush_batch(task, node, &mut batch, batch_size, token, tx) {
                return TaskOutcome::Cancelled;
            }
            batches += 1;
        }
    }

    if !batch.is_empty() {
        if !flush_batch(task, node, &mut batch, batch_size, token, tx) {
            return TaskOutcome::Cancelled;
        }
        batches += 1;
    }

    if !token.deliver(tx, LoadEvent::Complete { task, node }) {
        return TaskOutcome::Cancelled;
    }

    debug!(
        "Loaded {} entries from {} in {batches} batches ({:?})",
        loaded,
        path.display(),
        start.elapsed()
    );
    TaskOutcome::Completed
}

/// Sort and send the pending batch, leaving `batch` empty.
///
/// Returns `false` if the token was cancelled or the consumer is gone.
fn flush_batch(
    task: TaskId,
    node: NodeIndex,
    batch: &mut Vec<DirEntry>,
    batch_size: usize,
    token: &CancelToken,
    tx: &Sender<LoadEvent>,
) -> bool {
    let mut entries = std::mem::replace(batch, Vec::with_capacity(batch_size));
    entries.sort_by(loader_order);
    token.deliver(tx, LoadEvent::Batch { task, node, entries })
}
