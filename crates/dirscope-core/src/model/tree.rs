/// Arena-backed directory tree, populated lazily one level at a time.
///
/// All nodes live in a single `Vec<TreeNode>`. A parent owns its children
/// through the `children` index list; the `parent` index on each child is a
/// plain back-reference used for path reconstruction and never keeps
/// anything alive.
///
/// The tree is mutated only through the load lifecycle:
/// [`begin_load`](TreeModel::begin_load) →
/// [`apply_batch`](TreeModel::apply_batch)* →
/// [`complete_load`](TreeModel::complete_load) or
/// [`fail_load`](TreeModel::fail_load) / [`abandon_load`](TreeModel::abandon_load).
/// Every call after `begin_load` carries the loader's [`TaskId`]; calls from
/// any task other than the one recorded on the node are ignored.
///
/// Slots of detached subtrees (abandoned or failed loads) go on a free list
/// and are reused by later batches, so repeated collapse / expand cycles do
/// not grow the arena.
use super::entry::DirEntry;
use super::size::format_kib;
use super::sort::{SortFields, SortMode};
use crate::registry::TaskId;
use compact_str::CompactString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Lightweight index into the arena `Vec<TreeNode>`.
///
/// Uses `u32` to keep nodes small; supports up to ~4 billion nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    /// Create a new `NodeIndex` from a `usize`.
    #[inline]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "NodeIndex overflow");
        Self(index as u32)
    }

    /// Return the index as a `usize` for Vec indexing.
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Whether a directory's children have been loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    /// File or directory name only, lossily converted for display.
    pub name: CompactString,
    /// Absolute path, exactly as the filesystem reported it.
    pub path: PathBuf,
    pub is_dir: bool,
    /// File size in bytes; `None` for directories.
    pub size: Option<u64>,
    pub created: Option<SystemTime>,
    /// Directories only: whether an expand affordance should be shown.
    pub has_children: bool,
    pub load_state: LoadState,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    /// Loader task currently allowed to populate `children`.
    pub loading_task: Option<TaskId>,
    /// Message of the last failed load, cleared when a new load begins.
    pub load_error: Option<String>,
}

impl TreeNode {
    fn from_entry(entry: DirEntry, parent: NodeIndex) -> Self {
        Self {
            name: entry.name,
            path: entry.path,
            is_dir: entry.is_dir,
            size: (!entry.is_dir).then_some(entry.size),
            created: entry.created,
            has_children: entry.is_dir && entry.has_children,
            load_state: LoadState::NotLoaded,
            parent: Some(parent),
            children: Vec::new(),
            loading_task: None,
            load_error: None,
        }
    }

    /// Text for the size column: KiB with two decimals, empty for directories.
    pub fn size_column(&self) -> String {
        self.size.map(format_kib).unwrap_or_default()
    }

    /// `true` if expanding this node would start a load.
    pub fn is_expandable(&self) -> bool {
        self.is_dir && self.load_state == LoadState::NotLoaded
    }
}

impl SortFields for TreeNode {
    fn sort_name(&self) -> &str {
        &self.name
    }
    fn sort_is_dir(&self) -> bool {
        self.is_dir
    }
    fn sort_size(&self) -> u64 {
        self.size.unwrap_or(0)
    }
    fn sort_created(&self) -> Option<SystemTime> {
        self.created
    }
}

#[derive(Debug, Default)]
pub struct TreeModel {
    nodes: Vec<TreeNode>,
    /// Detached slots available for reuse.
    free: Vec<NodeIndex>,
    root: Option<NodeIndex>,
    root_path: PathBuf,
    sort_mode: SortMode,
}

impl TreeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node and start a new tree rooted at `root_path`.
    ///
    /// The sort mode survives the reset.
    pub fn reset(&mut self, root_path: PathBuf) -> NodeIndex {
        self.nodes.clear();
        self.free.clear();
        let root = TreeNode {
            name: CompactString::new(root_display_name(&root_path)),
            path: root_path.clone(),
            is_dir: true,
            size: None,
            created: None,
            has_children: true,
            load_state: LoadState::NotLoaded,
            parent: None,
            children: Vec::new(),
            loading_task: None,
            load_error: None,
        };
        self.nodes.push(root);
        let idx = NodeIndex::new(0);
        self.root = Some(idx);
        self.root_path = root_path;
        idx
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Get the node at the given index.
    ///
    /// Panics on an index that did not come from this tree.
    #[inline]
    pub fn node(&self, index: NodeIndex) -> &TreeNode {
        &self.nodes[index.idx()]
    }

    #[inline]
    pub fn get(&self, index: NodeIndex) -> Option<&TreeNode> {
        self.nodes.get(index.idx())
    }

    /// Total number of slots in the arena, free ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
    }

    /// Direct children in delivery order.
    pub fn children(&self, parent: NodeIndex) -> &[NodeIndex] {
        self.get(parent)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Direct children ordered by the current sort mode.
    pub fn sorted_children(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        let mut children = self.children(parent).to_vec();
        let mode = self.sort_mode;
        children.sort_by(|a, b| mode.compare(self.node(*a), self.node(*b)));
        children
    }

    /// Mark `node` as loading on behalf of `task`.
    ///
    /// Returns `false` (and changes nothing) unless the node is a directory
    /// in the `NotLoaded` state.
    pub fn begin_load(&mut self, node: NodeIndex, task: TaskId) -> bool {
        let Some(n) = self.nodes.get_mut(node.idx()) else {
            return false;
        };
        if !n.is_expandable() {
            return false;
        }
        n.load_state = LoadState::Loading;
        n.loading_task = Some(task);
        n.load_error = None;
        true
    }

    /// Append one loader batch under `node`, in the order given.
    ///
    /// Returns the number of nodes inserted; 0 if `task` is not the node's
    /// current loader.
    pub fn apply_batch(&mut self, node: NodeIndex, task: TaskId, entries: Vec<DirEntry>) -> usize {
        if !self.is_current_load(node, task) {
            return 0;
        }
        let count = entries.len();
        for entry in entries {
            let idx = self.insert(TreeNode::from_entry(entry, node));
            self.nodes[node.idx()].children.push(idx);
        }
        let parent = &mut self.nodes[node.idx()];
        parent.has_children = parent.has_children || count > 0;
        count
    }

    pub fn complete_load(&mut self, node: NodeIndex, task: TaskId) -> bool {
        if !self.is_current_load(node, task) {
            return false;
        }
        let n = &mut self.nodes[node.idx()];
        n.load_state = LoadState::Loaded;
        n.loading_task = None;
        n.has_children = !n.children.is_empty();
        true
    }

    /// Record a target-level failure. The node returns to `NotLoaded` so a
    /// later expand can retry.
    pub fn fail_load(&mut self, node: NodeIndex, task: TaskId, message: String) -> bool {
        if !self.is_current_load(node, task) {
            return false;
        }
        let n = &mut self.nodes[node.idx()];
        n.load_state = LoadState::NotLoaded;
        n.loading_task = None;
        n.load_error = Some(message);
        self.detach_children(node);
        true
    }

    /// Forget an in-flight load after its task was cancelled.
    ///
    /// Children delivered so far, and anything loaded beneath them, are
    /// detached and their slots freed. Returns the detached nodes that were
    /// themselves still loading; their loaders must be cancelled by the
    /// caller.
    pub fn abandon_load(&mut self, node: NodeIndex) -> Vec<NodeIndex> {
        let Some(n) = self.nodes.get_mut(node.idx()) else {
            return Vec::new();
        };
        if n.load_state != LoadState::Loading {
            return Vec::new();
        }
        n.load_state = LoadState::NotLoaded;
        n.loading_task = None;
        self.detach_children(node)
    }

    /// Number of slots waiting for reuse.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    fn insert(&mut self, node: TreeNode) -> NodeIndex {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx.idx()] = node;
                idx
            }
            None => {
                let idx = NodeIndex::new(self.nodes.len());
                self.nodes.push(node);
                idx
            }
        }
    }

    /// Free every descendant of `node`. Returns the freed nodes that were
    /// in the `Loading` state.
    fn detach_children(&mut self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut pending = std::mem::take(&mut self.nodes[node.idx()].children);
        let mut orphaned = Vec::new();
        while let Some(idx) = pending.pop() {
            let child = &mut self.nodes[idx.idx()];
            if child.load_state == LoadState::Loading {
                orphaned.push(idx);
            }
            pending.append(&mut child.children);
            child.load_state = LoadState::NotLoaded;
            child.loading_task = None;
            child.parent = None;
            self.free.push(idx);
        }
        orphaned
    }

    fn is_current_load(&self, node: NodeIndex, task: TaskId) -> bool {
        self.get(node)
            .is_some_and(|n| n.load_state == LoadState::Loading && n.loading_task == Some(task))
    }

    /// Indices of every node currently in the `Loading` state.
    pub fn loading_nodes(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.load_state == LoadState::Loading)
            .map(|(i, _)| NodeIndex::new(i))
            .collect()
    }

    /// Absolute path of a node.
    pub fn full_path(&self, index: NodeIndex) -> PathBuf {
        self.node(index).path.clone()
    }

    /// Find an already-loaded node by absolute path.
    pub fn find_by_path(&self, path: &Path) -> Option<NodeIndex> {
        let mut current = self.root?;
        let relative = path.strip_prefix(&self.root_path).ok()?;
        for component in relative.components() {
            let name = component.as_os_str();
            current = *self
                .children(current)
                .iter()
                .find(|c| self.node(**c).path.file_name() == Some(name))?;
        }
        Some(current)
    }
}

/// Display name for the tree root: the final path component, or the whole
/// path for filesystem roots such as `/` or `C:\`.
fn root_display_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}
