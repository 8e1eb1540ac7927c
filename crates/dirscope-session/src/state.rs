/// Session state — the consumer side of the engine.
///
/// `Session` owns the tree and chart models and issues every background
/// request through a shared [`TaskRegistry`]. Workers never touch the models:
/// they send events over bounded channels, and the host calls
/// [`Session::process_events`] once per frame to apply them on its own
/// thread, subject to a per-frame budget.
use crossbeam_channel::{Receiver, Sender};
use dirscope_core::config::ScanConfig;
use dirscope_core::error::{ConfigError, RegistryError, ScanError};
use dirscope_core::model::{ChartModel, NodeIndex, SortMode, TreeModel};
use dirscope_core::registry::{ScopeId, TaskId, TaskKind, TaskRegistry, TaskTarget};
use dirscope_core::scanner::{
    aggregate_sizes, load_directory, stat_one, AggregateEvent, AggregateRequest, FileProperties,
    LoadEvent, LoadRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval between event drains in [`Session::wait_until_idle`].
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Session {
    config: ScanConfig,
    registry: Arc<TaskRegistry>,
    /// Owner of this session's targets in `registry`.
    scope: ScopeId,
    tree: TreeModel,
    chart: ChartModel,
    /// Path most recently passed to `request_select`.
    selection: Option<PathBuf>,
    load_tx: Sender<LoadEvent>,
    load_rx: Receiver<LoadEvent>,
    agg_tx: Sender<AggregateEvent>,
    agg_rx: Receiver<AggregateEvent>,
}

impl Session {
    /// Create a session with its own registry.
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(TaskRegistry::new(config.cancel_timeout()));
        Ok(Self::with_registry(config, registry))
    }

    /// Create a session that issues work through an existing registry.
    ///
    /// The session takes its own scope in `registry`, so its cancellations
    /// never reach tasks started by other sessions.
    pub fn with_registry(config: ScanConfig, registry: Arc<TaskRegistry>) -> Self {
        let (load_tx, load_rx) = crossbeam_channel::bounded(config.channel_capacity);
        let (agg_tx, agg_rx) = crossbeam_channel::bounded(config.channel_capacity);
        let scope = registry.new_scope();
        Self {
            config,
            registry,
            scope,
            tree: TreeModel::new(),
            chart: ChartModel::new(),
            selection: None,
            load_tx,
            load_rx,
            agg_tx,
            agg_rx,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// This session's scope in [`registry`](Self::registry).
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn tree(&self) -> &TreeModel {
        &self.tree
    }

    pub fn chart(&self) -> &ChartModel {
        &self.chart
    }

    pub fn selection(&self) -> Option<&Path> {
        self.selection.as_deref()
    }

    /// Replace the scan root: cancel everything, reset both models, then
    /// expand the new root and aggregate it.
    pub fn request_open_root(&mut self, path: PathBuf) -> Result<NodeIndex, RegistryError> {
        info!("Opening {}", path.display());
        self.cancel_all();
        let root = self.tree.reset(path.clone());
        self.request_expand(root)?;
        self.request_select(&path)?;
        Ok(root)
    }

    /// Start loading the children of `node`.
    ///
    /// A node that is not an unloaded directory, or that already has a
    /// loader running, is left alone and `Ok(None)` is returned.
    pub fn request_expand(&mut self, node: NodeIndex) -> Result<Option<TaskId>, RegistryError> {
        if !self.tree.get(node).is_some_and(|n| n.is_expandable()) {
            return Ok(None);
        }

        let path = self.tree.full_path(node);
        let config = self.config.clone();
        let tx = self.load_tx.clone();
        let started = self
            .registry
            .start(TaskTarget::Node(self.scope, node), TaskKind::Load, move |task, token| {
                let request = LoadRequest { task, node, path };
                load_directory(&request, &config, &token, &tx)
            });

        match started {
            Ok(task) => {
                self.tree.begin_load(node, task);
                Ok(Some(task))
            }
            Err(RegistryError::AlreadyRunning { .. }) => {
                debug!("Loader already running for {node:?}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Stop loading `node` and forget whatever it delivered so far.
    ///
    /// Loaders already running for the discarded children are cancelled
    /// too, since their slots go back to the tree's free list.
    pub fn request_collapse(&mut self, node: NodeIndex) {
        self.registry.cancel(TaskTarget::Node(self.scope, node));
        for orphan in self.tree.abandon_load(node) {
            self.registry.cancel(TaskTarget::Node(self.scope, orphan));
        }
    }

    /// Point the chart at `path`.
    ///
    /// Any running aggregation is cancelled and awaited first. A path that
    /// is not a directory clears the chart without starting anything.
    pub fn request_select(&mut self, path: &Path) -> Result<Option<TaskId>, RegistryError> {
        self.registry.cancel(TaskTarget::Selection(self.scope));
        self.selection = Some(path.to_path_buf());

        if !path.is_dir() {
            self.chart.clear();
            return Ok(None);
        }

        let path = path.to_path_buf();
        let worker_path = path.clone();
        let config = self.config.clone();
        let tx = self.agg_tx.clone();
        let request = self.registry.start(
            TaskTarget::Selection(self.scope),
            TaskKind::Aggregate,
            move |request, token| {
                let request = AggregateRequest {
                    request,
                    path: worker_path,
                };
                aggregate_sizes(&request, &config, &token, &tx)
            },
        )?;
        self.chart.begin(request, path);
        Ok(Some(request))
    }

    /// [`request_select`](Self::request_select) for a tree node.
    pub fn request_select_node(&mut self, node: NodeIndex) -> Result<Option<TaskId>, RegistryError> {
        let path = self.tree.full_path(node);
        self.request_select(&path)
    }

    /// Cancel every task this session started, roll loading nodes back to
    /// `NotLoaded`, clear the chart and discard queued events.
    pub fn cancel_all(&mut self) {
        self.registry.cancel_scope(self.scope);
        for node in self.tree.loading_nodes() {
            // Every loader is already stopped, so the orphans need no cancel.
            self.tree.abandon_load(node);
        }
        self.chart.clear();
        let dropped = self.load_rx.try_iter().count() + self.agg_rx.try_iter().count();
        if dropped > 0 {
            debug!("Discarded {dropped} queued event(s) from cancelled tasks");
        }
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.tree.set_sort_mode(mode);
    }

    /// Synchronous property lookup for a details view.
    pub fn stat(&self, path: &Path) -> Result<FileProperties, ScanError> {
        stat_one(path)
    }

    /// Apply pending worker events. Called once per frame.
    ///
    /// Returns `true` if either model changed.
    pub fn process_events(&mut self) -> bool {
        let budget = self.config.max_events_per_frame;
        let mut handled = 0usize;
        let mut changed = false;

        while handled < budget {
            let Ok(event) = self.load_rx.try_recv() else {
                break;
            };
            handled += 1;
            changed |= self.apply_load_event(event);
        }
        while handled < budget {
            let Ok(event) = self.agg_rx.try_recv() else {
                break;
            };
            handled += 1;
            changed |= self.apply_aggregate_event(event);
        }
        changed
    }

    fn apply_load_event(&mut self, event: LoadEvent) -> bool {
        match event {
            LoadEvent::Batch {
                task,
                node,
                entries,
            } => self.tree.apply_batch(node, task, entries) > 0,
            LoadEvent::Complete { task, node } => self.tree.complete_load(node, task),
            LoadEvent::Error {
                task,
                node,
                message,
            } => {
                let applied = self.tree.fail_load(node, task, message.clone());
                if applied {
                    warn!("Failed to load {}: {message}", self.tree.full_path(node).display());
                }
                applied
            }
        }
    }

    fn apply_aggregate_event(&mut self, event: AggregateEvent) -> bool {
        match event {
            AggregateEvent::Progress { request, percent } => {
                self.chart.apply_progress(request, percent)
            }
            AggregateEvent::Complete(snapshot) => self.chart.apply_complete(snapshot),
            AggregateEvent::Error { request, message } => {
                let applied = self.chart.apply_error(request, message.clone());
                if applied {
                    warn!("Size aggregation failed: {message}");
                }
                applied
            }
        }
    }

    /// `true` when no task is running and no event is waiting.
    pub fn is_idle(&self) -> bool {
        // Workers send before they leave the registry, so once nothing is
        // running every event is already queued.
        self.registry.running_in_scope(self.scope) == 0 && self.load_rx.is_empty() && self.agg_rx.is_empty()
    }

    /// Pump [`process_events`](Self::process_events) until idle.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.registry.cancel_scope(self.scope);
    }
}
