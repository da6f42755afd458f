//! Per-prefix listing cache.
//!
//! The cache is the client's single source of truth for which keys exist.
//! Each folder path maps to its last-known one-level listing and a
//! freshness flag. Stale entries are refetched lazily on the next load.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use indexmap::IndexMap;
use prefixfs_core::path::{SEPARATOR, is_same_or_descendant};
use prefixfs_core::{ObjectStore, StorageObject, StoreResult, TreeNode, VfsPath};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::patch::{PatchId, PatchOp, PatchOutcome, PendingPatch};

/// Buffered cache events per subscriber.
pub const CACHE_EVENT_CAPACITY: usize = 256;

/// What happened to a cached path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// A fresh listing was stored.
    Loaded,
    /// The listing was marked stale.
    Invalidated,
    /// An optimistic patch touching the listing was opened or settled.
    Patched,
}

/// Notification about one folder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub path: VfsPath,
    pub kind: CacheEventKind,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    objects: Vec<StorageObject>,
    fresh: bool,
    loaded_at: DateTime<Utc>,
}

/// Receives events for a single folder path.
#[derive(Debug)]
pub struct PathSubscription {
    path: VfsPath,
    rx: broadcast::Receiver<CacheEvent>,
}

impl PathSubscription {
    /// The watched path.
    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    /// Wait for the next event on the watched path.
    ///
    /// Returns `None` once the cache is dropped.
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.path == self.path => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(target: "tree_cache", path = %self.path, skipped, "subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered event on the watched path, without waiting.
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.path == self.path => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Lazily populated tree model over a flat object store.
pub struct TreeCache {
    store: Arc<dyn ObjectStore>,
    entries: DashMap<VfsPath, CacheEntry>,
    expanded: DashSet<VfsPath>,
    patches: Mutex<Vec<PendingPatch>>,
    next_patch: AtomicU64,
    events: broadcast::Sender<CacheEvent>,
}

impl std::fmt::Debug for TreeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCache")
            .field("entries", &self.entries.len())
            .field("expanded", &self.expanded.len())
            .finish_non_exhaustive()
    }
}

impl TreeCache {
    /// Create an empty cache over a store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let (events, _) = broadcast::channel(CACHE_EVENT_CAPACITY);
        Self {
            store,
            entries: DashMap::new(),
            expanded: DashSet::new(),
            patches: Mutex::new(Vec::new()),
            next_patch: AtomicU64::new(1),
            events,
        }
    }

    /// The store this cache reads from.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn lock_patches(&self) -> MutexGuard<'_, Vec<PendingPatch>> {
        self.patches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, path: &VfsPath, kind: CacheEventKind) {
        // No receivers is fine.
        let _ = self.events.send(CacheEvent {
            path: path.clone(),
            kind,
        });
    }

    /// Children of a folder, fetching the listing if missing or stale.
    pub async fn load_children(&self, path: &VfsPath) -> StoreResult<Vec<TreeNode>> {
        if !self.is_fresh(path) {
            self.refresh(path).await?;
        }
        Ok(self.child_nodes(path))
    }

    /// Unconditionally refetch one folder listing.
    pub async fn refresh(&self, path: &VfsPath) -> StoreResult<()> {
        let prefix = path.as_prefix();
        debug!(target: "tree_cache", %path, "listing prefix");
        let objects = self.store.list_objects(&prefix).await?;
        let children = immediate_children(&prefix, &objects);
        self.entries.insert(
            path.clone(),
            CacheEntry {
                objects: children,
                fresh: true,
                loaded_at: Utc::now(),
            },
        );
        self.emit(path, CacheEventKind::Loaded);
        Ok(())
    }

    /// Whether a fresh listing is cached for `path`.
    pub fn is_fresh(&self, path: &VfsPath) -> bool {
        self.entries.get(path).is_some_and(|e| e.fresh)
    }

    /// Whether any listing (fresh or stale) is cached for `path`.
    pub fn is_loaded(&self, path: &VfsPath) -> bool {
        self.entries.contains_key(path)
    }

    /// When the cached listing for `path` was fetched.
    pub fn loaded_at(&self, path: &VfsPath) -> Option<DateTime<Utc>> {
        self.entries.get(path).map(|e| e.loaded_at)
    }

    /// Mark one listing stale. The next load refetches it.
    pub fn invalidate(&self, path: &VfsPath) {
        if let Some(mut entry) = self.entries.get_mut(path) {
            entry.fresh = false;
        }
        debug!(target: "tree_cache", %path, "invalidated");
        self.emit(path, CacheEventKind::Invalidated);
    }

    /// Mark a listing and every cached listing beneath it stale.
    pub fn invalidate_subtree(&self, root: &VfsPath) {
        let paths: Vec<VfsPath> = self
            .entries
            .iter()
            .filter(|e| e.key().is_within(root))
            .map(|e| e.key().clone())
            .collect();
        for path in &paths {
            self.invalidate(path);
        }
        if !paths.contains(root) {
            self.invalidate(root);
        }
    }

    /// Drop `root` and every cached listing beneath it.
    ///
    /// Used once a folder is known to be gone so its old listings cannot
    /// be served again. Subscribers see an `Invalidated` event per path.
    pub fn evict_subtree(&self, root: &VfsPath) {
        let mut evicted: Vec<VfsPath> = self
            .entries
            .iter()
            .filter(|e| e.key().is_within(root))
            .map(|e| e.key().clone())
            .collect();
        for path in &evicted {
            self.entries.remove(path);
        }
        self.expanded.retain(|path| !path.is_within(root));
        if !evicted.contains(root) {
            evicted.push(root.clone());
        }
        debug!(target: "tree_cache", %root, count = evicted.len(), "evicted subtree");
        for path in &evicted {
            self.emit(path, CacheEventKind::Invalidated);
        }
    }

    /// Current listing with pending patches overlaid, or `None` if never loaded.
    pub fn listing(&self, path: &VfsPath) -> Option<Vec<StorageObject>> {
        let mut objects = self.entries.get(path).map(|e| e.objects.clone());
        let patches = self.lock_patches();
        for op in patches.iter().flat_map(|p| p.ops.iter()) {
            if op.parent() == path {
                op.apply(objects.get_or_insert_with(Vec::new));
            }
        }
        objects
    }

    /// Look up a direct child by name, loading the parent listing if needed.
    ///
    /// Names are compared exactly (case-sensitive).
    pub async fn lookup(&self, parent: &VfsPath, name: &str) -> StoreResult<Option<StorageObject>> {
        if !self.is_fresh(parent) {
            self.refresh(parent).await?;
        }
        Ok(self
            .listing(parent)
            .unwrap_or_default()
            .into_iter()
            .find(|o| o.name() == name))
    }

    /// Children of a cached folder as tree nodes (empty if not loaded).
    pub fn child_nodes(&self, path: &VfsPath) -> Vec<TreeNode> {
        self.listing(path)
            .unwrap_or_default()
            .iter()
            .filter_map(|obj| self.node_for(obj))
            .collect()
    }

    /// The cached subtree rooted at `path`.
    pub fn snapshot(&self, path: &VfsPath) -> Option<TreeNode> {
        let listing = self.listing(path)?;
        let mut node = TreeNode::new(path.clone(), true, 0, Utc::now());
        node.is_expanded = path.is_root() || self.is_expanded(path);
        node.children = Some(listing.iter().filter_map(|obj| self.node_for(obj)).collect());
        Some(node)
    }

    fn node_for(&self, obj: &StorageObject) -> Option<TreeNode> {
        let path = match VfsPath::from_key(&obj.key) {
            Ok((path, _)) => path,
            Err(err) => {
                warn!(target: "tree_cache", key = %obj.key, %err, "skipping unrepresentable key");
                return None;
            }
        };
        let mut node = TreeNode::new(path, obj.is_folder, obj.size, obj.last_modified);
        if obj.is_folder {
            node.is_expanded = self.is_expanded(&node.path);
            if self.is_loaded(&node.path) {
                node.children = Some(self.child_nodes(&node.path));
            }
        }
        Some(node)
    }

    /// Mark a folder expanded, loading its children.
    pub async fn expand(&self, path: &VfsPath) -> StoreResult<Vec<TreeNode>> {
        let children = self.load_children(path).await?;
        self.expanded.insert(path.clone());
        Ok(children)
    }

    /// Collapse a folder. Its listing stays cached.
    pub fn collapse(&self, path: &VfsPath) {
        self.expanded.remove(path);
    }

    /// Whether a folder is expanded.
    pub fn is_expanded(&self, path: &VfsPath) -> bool {
        self.expanded.contains(path)
    }

    /// Every folder path known to the cache: the root, every cached
    /// listing, and every folder appearing inside one.
    pub fn loaded_folder_paths(&self) -> BTreeSet<VfsPath> {
        let mut out = BTreeSet::new();
        out.insert(VfsPath::root());
        let cached: Vec<VfsPath> = self.entries.iter().map(|e| e.key().clone()).collect();
        for path in cached {
            for obj in self.listing(&path).unwrap_or_default() {
                if obj.is_folder
                    && let Ok((folder, _)) = VfsPath::from_key(&obj.key)
                {
                    out.insert(folder);
                }
            }
            out.insert(path);
        }
        out
    }

    /// Every cached folder path.
    pub fn cached_paths(&self) -> Vec<VfsPath> {
        let mut paths: Vec<VfsPath> = self.entries.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Open an optimistic patch.
    pub fn begin_patch(&self, ops: Vec<PatchOp>) -> PatchId {
        let id = PatchId(self.next_patch.fetch_add(1, Ordering::Relaxed));
        let parents: BTreeSet<VfsPath> = ops.iter().map(|op| op.parent().clone()).collect();
        self.lock_patches().push(PendingPatch { id, ops });
        debug!(target: "tree_cache", patch = id.0, "patch opened");
        for parent in &parents {
            self.emit(parent, CacheEventKind::Patched);
        }
        id
    }

    /// Settle a patch. Confirmed edits are folded into cached listings.
    pub fn settle(&self, id: PatchId, outcome: PatchOutcome) {
        let patch = {
            let mut patches = self.lock_patches();
            match patches.iter().position(|p| p.id == id) {
                Some(idx) => patches.remove(idx),
                None => return,
            }
        };
        let mut parents = BTreeSet::new();
        for op in &patch.ops {
            if outcome == PatchOutcome::Confirmed
                && let Some(mut entry) = self.entries.get_mut(op.parent())
            {
                op.apply(&mut entry.objects);
            }
            parents.insert(op.parent().clone());
        }
        debug!(target: "tree_cache", patch = id.0, ?outcome, "patch settled");
        for parent in &parents {
            self.emit(parent, CacheEventKind::Patched);
        }
    }

    /// Number of unsettled patches.
    pub fn pending_patches(&self) -> usize {
        self.lock_patches().len()
    }

    /// Subscribe to events for one folder path.
    pub fn subscribe(&self, path: VfsPath) -> PathSubscription {
        PathSubscription {
            path,
            rx: self.events.subscribe(),
        }
    }
}

/// Reduce a recursive prefix listing to the prefix's direct children.
///
/// Folder markers and keys nested deeper than one level both yield a
/// folder entry; a folder implied only by deeper keys is synthesized as a
/// zero-byte folder object. The prefix's own marker is dropped.
pub fn immediate_children(prefix: &str, objects: &[StorageObject]) -> Vec<StorageObject> {
    let mut children: IndexMap<String, StorageObject> = IndexMap::new();
    for obj in objects {
        let Some(rest) = obj.key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.find(SEPARATOR) {
            None => {
                children.insert(obj.key.clone(), obj.clone());
            }
            Some(0) => {
                warn!(target: "tree_cache", key = %obj.key, "key has an empty segment");
            }
            Some(idx) if idx == rest.len() - 1 => {
                children.insert(obj.key.clone(), obj.clone());
            }
            Some(idx) => {
                let folder_key = format!("{prefix}{}{SEPARATOR}", &rest[..idx]);
                children
                    .entry(folder_key.clone())
                    .or_insert_with(|| StorageObject::new(folder_key, 0, obj.last_modified));
            }
        }
    }
    let mut out: Vec<StorageObject> = children.into_values().collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out
}

/// Whether `key` lies inside the folder `path` at any depth.
pub fn key_is_under(key: &str, path: &VfsPath) -> bool {
    let trimmed = key.strip_suffix(SEPARATOR).unwrap_or(key);
    is_same_or_descendant(trimmed, path.as_str()) && trimmed != path.as_str()
}
