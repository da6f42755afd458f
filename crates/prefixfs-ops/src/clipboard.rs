//! Cut, copy and paste of store objects.

use std::sync::Arc;

use compact_str::CompactString;
use prefixfs_core::VfsPath;
use prefixfs_tree::TreeCache;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::conflict::{Conflict, ConflictPolicy};
use crate::engine::{MoveEngine, is_cancelled};
use crate::error::{OpsError, OpsResult};

/// One object or folder held by the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardItem {
    /// Storage key (folders end with `/`).
    pub key: String,
    /// Display name.
    pub name: CompactString,
    /// Whether the item is a folder.
    pub is_folder: bool,
}

impl ClipboardItem {
    /// Build an item from a storage key.
    pub fn from_key(key: &str) -> OpsResult<Self> {
        let (path, is_folder) = VfsPath::from_key(key)?;
        Ok(Self {
            key: path.to_key(is_folder),
            name: CompactString::from(path.name()),
            is_folder,
        })
    }

    /// The item's path.
    pub fn path(&self) -> VfsPath {
        VfsPath::from_key(&self.key)
            .map(|(path, _)| path)
            .unwrap_or_default()
    }
}

/// Clipboard mode determines paste behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipboardMode {
    /// Clipboard is empty.
    #[default]
    Empty,
    /// Items were copied.
    Copy,
    /// Items were cut (paste moves them).
    Cut,
}

/// Contents of the clipboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardState {
    /// Items currently in the clipboard.
    pub items: Vec<ClipboardItem>,
    /// The clipboard mode.
    pub mode: ClipboardMode,
    /// The folder every item was captured from.
    pub source_path: VfsPath,
}

impl ClipboardState {
    /// Check if the clipboard is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of items in the clipboard.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether `key` is waiting to be moved by a paste.
    pub fn is_cut(&self, key: &str) -> bool {
        self.mode == ClipboardMode::Cut && self.items.iter().any(|i| i.key == key)
    }
}

/// An item that could not be pasted.
#[derive(Debug)]
pub struct PasteFailure {
    pub item: ClipboardItem,
    pub error: OpsError,
}

/// What a paste did with each item.
#[derive(Debug, Default)]
pub struct PasteReport {
    /// Items now present in the destination.
    pub pasted: Vec<ClipboardItem>,
    /// Items left alone because of a name conflict.
    pub skipped: Vec<ClipboardItem>,
    /// Items whose transfer failed.
    pub failed: Vec<PasteFailure>,
}

impl PasteReport {
    /// Whether no item failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Single-owner clipboard. Readers observe it through [`Clipboard::subscribe`].
#[derive(Debug)]
pub struct Clipboard {
    engine: MoveEngine,
    state: watch::Sender<ClipboardState>,
}

impl Clipboard {
    /// Create an empty clipboard that pastes through `engine`.
    pub fn new(engine: MoveEngine) -> Self {
        let (state, _) = watch::channel(ClipboardState::default());
        Self { engine, state }
    }

    fn cache(&self) -> &Arc<TreeCache> {
        self.engine.cache()
    }

    /// Current contents.
    pub fn state(&self) -> ClipboardState {
        self.state.borrow().clone()
    }

    /// Watch the clipboard contents.
    pub fn subscribe(&self) -> watch::Receiver<ClipboardState> {
        self.state.subscribe()
    }

    /// Whether `key` is marked as cut.
    pub fn is_cut(&self, key: &str) -> bool {
        self.state.borrow().is_cut(key)
    }

    fn stage(
        &mut self,
        items: Vec<ClipboardItem>,
        source_path: VfsPath,
        mode: ClipboardMode,
    ) -> OpsResult<()> {
        for item in &items {
            if item.path().parent().as_ref() != Some(&source_path) {
                return Err(OpsError::MixedSource {
                    key: item.key.clone(),
                    source_path: source_path.to_string(),
                });
            }
        }
        debug!(target: "clipboard", count = items.len(), ?mode, source = %source_path, "staged");
        self.state.send_replace(ClipboardState {
            items,
            mode,
            source_path,
        });
        Ok(())
    }

    /// Replace the clipboard with items to copy.
    pub fn copy(&mut self, items: Vec<ClipboardItem>, source_path: VfsPath) -> OpsResult<()> {
        self.stage(items, source_path, ClipboardMode::Copy)
    }

    /// Replace the clipboard with items to move.
    pub fn cut(&mut self, items: Vec<ClipboardItem>, source_path: VfsPath) -> OpsResult<()> {
        self.stage(items, source_path, ClipboardMode::Cut)
    }

    /// Clear the clipboard.
    pub fn clear(&mut self) {
        self.state.send_replace(ClipboardState::default());
    }

    /// Whether the clipboard can be pasted into `destination`.
    ///
    /// Cut items cannot go back into their own folder, and a folder cannot
    /// be pasted into itself or below itself.
    pub fn can_paste(&self, destination: &VfsPath) -> bool {
        let state = self.state.borrow();
        if state.is_empty() {
            return false;
        }
        if state.mode == ClipboardMode::Cut && &state.source_path == destination {
            return false;
        }
        !state
            .items
            .iter()
            .any(|item| item.is_folder && destination.is_within(&item.path()))
    }

    /// Items whose name is already taken directly inside `destination`.
    ///
    /// Names are compared exactly.
    pub async fn check_conflicts(&self, destination: &VfsPath) -> OpsResult<Vec<Conflict>> {
        let items = self.state.borrow().items.clone();
        let mut conflicts = Vec::new();
        for item in items {
            if let Some(existing) = self.cache().lookup(destination, &item.name).await? {
                conflicts.push(Conflict::new(item, existing.key));
            }
        }
        Ok(conflicts)
    }

    /// Paste into `destination`.
    ///
    /// Cut items are moved; copied items are copied. Under
    /// [`ConflictPolicy::ReplaceAll`] the colliding object is deleted before
    /// the item is transferred. An item colliding with itself, or with a
    /// folder it lives in, is always skipped so the source is never deleted.
    ///
    /// A fully successful cut paste empties the clipboard. After a partial
    /// one, only the failed items stay cut.
    pub async fn paste(&mut self, destination: &VfsPath, policy: ConflictPolicy) -> OpsResult<PasteReport> {
        let state = self.state();
        if !self.can_paste(destination) {
            return Err(OpsError::invalid_move(
                state.source_path.as_str(),
                destination.as_str(),
                "the clipboard cannot be pasted here",
            ));
        }
        let conflicts = self.check_conflicts(destination).await?;
        info!(
            target: "clipboard",
            count = state.len(),
            mode = ?state.mode,
            %destination,
            conflicts = conflicts.len(),
            %policy,
            "pasting"
        );

        let mut report = PasteReport::default();
        let mut items = state.items.iter();
        while let Some(item) = items.next() {
            if let Some(conflict) = conflicts.iter().find(|c| c.item == *item) {
                if policy == ConflictPolicy::Skip || conflict.contains_item() {
                    debug!(target: "clipboard", key = %item.key, "skipped on conflict");
                    report.skipped.push(item.clone());
                    continue;
                }
                if let Err(error) = self.engine.remove(&conflict.existing_key).await {
                    warn!(target: "clipboard", key = %conflict.existing_key, %error, "could not replace");
                    report.failed.push(PasteFailure {
                        item: item.clone(),
                        error,
                    });
                    continue;
                }
            }

            let result = match destination.join(&item.name) {
                Ok(target) => {
                    let target_key = target.to_key(item.is_folder);
                    match state.mode {
                        ClipboardMode::Cut => self.engine.move_key(&item.key, &target_key).await,
                        _ => self.engine.copy(&item.key, &target_key).await,
                    }
                }
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(_) => report.pasted.push(item.clone()),
                Err(error) => {
                    let stop = is_cancelled(&error);
                    warn!(target: "clipboard", key = %item.key, %error, "paste failed");
                    report.failed.push(PasteFailure {
                        item: item.clone(),
                        error,
                    });
                    if stop {
                        for rest in items.by_ref() {
                            report.failed.push(PasteFailure {
                                item: rest.clone(),
                                error: OpsError::Store(prefixfs_core::StoreError::Cancelled),
                            });
                        }
                    }
                }
            }
        }

        self.cache().invalidate(destination);
        if state.mode == ClipboardMode::Cut {
            if report.failed.is_empty() {
                self.clear();
            } else {
                let remaining = report.failed.iter().map(|f| f.item.clone()).collect();
                self.state.send_replace(ClipboardState {
                    items: remaining,
                    mode: ClipboardMode::Cut,
                    source_path: state.source_path.clone(),
                });
            }
        }
        Ok(report)
    }
}
