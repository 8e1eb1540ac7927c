/// Scanner module — the background half of the engine.
///
/// - [`entries`] lists one directory level (no threads of its own).
/// - [`loader`] streams a directory's children to the tree in batches.
/// - [`aggregator`] computes per-child recursive sizes for the chart.
/// - [`cancel`] is the shared cancel flag both workers poll and send through.
///
/// Workers are plain functions run on threads owned by
/// [`crate::registry::TaskRegistry`]; results flow back over bounded
/// crossbeam channels as [`events::LoadEvent`] / [`events::AggregateEvent`].
pub mod aggregator;
pub mod cancel;
pub mod entries;
pub mod events;
pub mod loader;

pub use aggregator::{aggregate_sizes, subtree_size, walk_parallelism, AggregateRequest};
pub use cancel::CancelToken;
pub use entries::{has_children, list_entries, scan_entries, stat_one, EntryIter, FileProperties};
pub use events::{AggregateEvent, LoadEvent};
pub use loader::{load_directory, LoadRequest};
