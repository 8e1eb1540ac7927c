/// Data model for dirscope.
///
/// Scanner output records, the lazily loaded directory tree, the size chart
/// view, sort orderings and size formatting.
pub mod chart;
pub mod entry;
pub mod size;
pub mod sort;
pub mod tree;

pub use chart::{ChartModel, ChartSlice, ChartStatus, SizeSnapshot};
pub use entry::DirEntry;
pub use sort::SortMode;
pub use tree::{LoadState, NodeIndex, TreeModel, TreeNode};
