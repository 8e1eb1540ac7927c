/// Messages sent from worker threads to the consumer via crossbeam channels.
///
/// Each run of a worker ends with at most one terminal event
/// (`Complete` or `Error`). A cancelled run ends with no terminal event.
use crate::model::{DirEntry, NodeIndex, SizeSnapshot};
use crate::registry::TaskId;

/// Events from a directory loader, consumed by the tree model.
#[derive(Debug)]
pub enum LoadEvent {
    /// One batch of children, sorted directories-first then by name.
    Batch {
        task: TaskId,
        node: NodeIndex,
        entries: Vec<DirEntry>,
    },
    /// All batches for `node` have been delivered.
    Complete { task: TaskId, node: NodeIndex },
    /// The directory itself could not be listed.
    Error {
        task: TaskId,
        node: NodeIndex,
        message: String,
    },
}

impl LoadEvent {
    pub fn task(&self) -> TaskId {
        match self {
            Self::Batch { task, .. } | Self::Complete { task, .. } | Self::Error { task, .. } => {
                *task
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Batch { .. })
    }
}

/// Events from a size aggregator, consumed by the chart model.
#[derive(Debug)]
pub enum AggregateEvent {
    /// Immediate children processed so far, as a whole percentage.
    Progress { request: TaskId, percent: u8 },
    Complete(SizeSnapshot),
    Error { request: TaskId, message: String },
}

impl AggregateEvent {
    pub fn request(&self) -> TaskId {
        match self {
            Self::Progress { request, .. } | Self::Error { request, .. } => *request,
            Self::Complete(snapshot) => snapshot.request,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
