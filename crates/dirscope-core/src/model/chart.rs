/// Aggregated-size view for the currently selected directory.
///
/// Mutated only by size-aggregator events. Every event carries the request
/// id it belongs to, and only events for the most recently issued request
/// are applied; anything older is a late arrival from a superseded or
/// cancelled aggregation and is dropped.
use super::size::format_size;
use crate::registry::TaskId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Slices smaller than this share of the total get no on-chart label.
pub const LABEL_MIN_PERCENT: f64 = 2.0;

/// Slice colours, cycled in size order.
pub const PALETTE: [&str; 20] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#fffac8", "#800000", "#aaffc3",
    "#808000", "#ffd8b1", "#000075", "#808080",
];

/// Final result of one size aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeSnapshot {
    /// Request id (generation) that produced this snapshot.
    pub request: TaskId,
    /// Directory whose immediate children are described.
    pub path: PathBuf,
    /// Immediate-child name → aggregated bytes. Never contains a 0 value.
    pub sizes: BTreeMap<String, u64>,
}

impl SizeSnapshot {
    pub fn total(&self) -> u64 {
        self.sizes.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChartStatus {
    #[default]
    Idle,
    Computing {
        percent: u8,
    },
    Ready,
    /// Aggregation finished with nothing to draw.
    Empty,
    Failed {
        message: String,
    },
}

/// One pie slice, ready for a renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSlice {
    pub name: String,
    pub size: u64,
    /// Share of the snapshot total, 0.0–100.0.
    pub percent: f64,
    pub color: &'static str,
    pub label_visible: bool,
    /// `"<name> — <human size>"`.
    pub legend: String,
}

#[derive(Debug, Default)]
pub struct ChartModel {
    request: Option<TaskId>,
    path: Option<PathBuf>,
    status: ChartStatus,
    snapshot: Option<SizeSnapshot>,
}

impl ChartModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new aggregation request, superseding any previous one.
    pub fn begin(&mut self, request: TaskId, path: PathBuf) {
        self.request = Some(request);
        self.path = Some(path);
        self.status = ChartStatus::Computing { percent: 0 };
        self.snapshot = None;
    }

    /// Stop tracking any request and drop displayed data.
    pub fn clear(&mut self) {
        self.request = None;
        self.path = None;
        self.status = ChartStatus::Idle;
        self.snapshot = None;
    }

    pub fn current_request(&self) -> Option<TaskId> {
        self.request
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn status(&self) -> &ChartStatus {
        &self.status
    }

    pub fn snapshot(&self) -> Option<&SizeSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_computing(&self) -> bool {
        matches!(self.status, ChartStatus::Computing { .. })
    }

    /// Apply a progress update. Percentages never move backwards.
    pub fn apply_progress(&mut self, request: TaskId, percent: u8) -> bool {
        if self.request != Some(request) {
            return false;
        }
        match &mut self.status {
            ChartStatus::Computing { percent: current } => {
                *current = (*current).max(percent.min(100));
                true
            }
            _ => false,
        }
    }

    pub fn apply_complete(&mut self, snapshot: SizeSnapshot) -> bool {
        if self.request != Some(snapshot.request) || !self.is_computing() {
            return false;
        }
        self.status = if snapshot.is_empty() {
            ChartStatus::Empty
        } else {
            ChartStatus::Ready
        };
        self.snapshot = Some(snapshot);
        true
    }

    pub fn apply_error(&mut self, request: TaskId, message: String) -> bool {
        if self.request != Some(request) || !self.is_computing() {
            return false;
        }
        self.status = ChartStatus::Failed { message };
        true
    }

    /// Chart heading for the current status.
    pub fn title(&self) -> String {
        match &self.status {
            ChartStatus::Idle => String::new(),
            ChartStatus::Computing { percent } => format!("Computing sizes… {percent}%"),
            ChartStatus::Ready => {
                let name = self
                    .path
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("Sizes in folder: {name}")
            }
            ChartStatus::Empty => "Folder is empty or inaccessible".to_string(),
            ChartStatus::Failed { message } => format!("Failed to compute sizes: {message}"),
        }
    }

    /// Slices of the applied snapshot, largest first.
    pub fn slices(&self) -> Vec<ChartSlice> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        let total = snapshot.total();
        if total == 0 {
            return Vec::new();
        }

        let mut entries: Vec<(&String, &u64)> = snapshot.sizes.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        entries
            .into_iter()
            .enumerate()
            .map(|(i, (name, &size))| {
                let percent = size as f64 / total as f64 * 100.0;
                ChartSlice {
                    name: name.clone(),
                    size,
                    percent,
                    color: PALETTE[i % PALETTE.len()],
                    label_visible: percent > LABEL_MIN_PERCENT,
                    legend: format!("{name} — {}", format_size(size)),
                }
            })
            .collect()
    }
}
