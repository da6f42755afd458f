//! Drag-and-drop session state machine.
//!
//! At most one session exists at a time. The manager owns it, so writes go
//! through `&mut self` and readers watch [`DragSnapshot`]s.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use compact_str::CompactString;
use prefixfs_core::VfsPath;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::MoveEngine;
use crate::error::OpsError;
use crate::gesture::{DropTargetRegistry, GestureEvent, Point};

/// Errors from drag state transitions.
#[derive(Debug, Error)]
pub enum DragError {
    #[error("A drag is already in progress")]
    SessionActive,

    #[error("No drag is in progress")]
    NoSession,

    #[error(transparent)]
    Ops(#[from] OpsError),
}

/// The item under the pointer when the drag started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragItem {
    /// Storage key (folders end with `/`).
    pub key: String,
    pub name: CompactString,
    pub is_folder: bool,
    /// Number of items selected, this one included.
    pub selected_count: usize,
}

impl DragItem {
    /// Build a single-item drag from a storage key.
    pub fn from_key(key: &str) -> Result<Self, OpsError> {
        let (path, is_folder) = VfsPath::from_key(key)?;
        Ok(Self {
            key: path.to_key(is_folder),
            name: CompactString::from(path.name()),
            is_folder,
            selected_count: 1,
        })
    }
}

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragPhase {
    #[default]
    Idle,
    Dragging,
}

/// Read-only view of the session published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DragSnapshot {
    pub phase: DragPhase,
    pub item: Option<DragItem>,
    pub current_drop_target: Option<VfsPath>,
    pub valid_drop_targets: BTreeSet<VfsPath>,
}

#[derive(Debug, Clone)]
struct Hover {
    path: VfsPath,
    since: Instant,
}

/// A live drag.
#[derive(Debug, Clone)]
pub struct DragSession {
    pub item: DragItem,
    /// Every dragged key.
    pub selection: Vec<String>,
    pub current_drop_target: Option<VfsPath>,
    pub valid_drop_targets: BTreeSet<VfsPath>,
    hover: Option<Hover>,
}

/// How a drag ended.
#[derive(Debug)]
pub enum DropOutcome {
    /// Released over a valid folder; the selection was moved into it.
    Dropped {
        target: VfsPath,
        moved: Vec<String>,
        failed: Vec<(String, OpsError)>,
    },
    /// Released elsewhere or aborted. Nothing changed.
    Cancelled,
}

/// Whether the entry at `key` may be dropped into `target`.
///
/// A folder cannot land in itself or below itself, and nothing can be
/// dropped back into the folder it already lives in.
pub fn is_valid_drop_target(target: &VfsPath, key: &str) -> bool {
    let Ok((path, is_folder)) = VfsPath::from_key(key) else {
        return false;
    };
    if path.parent().as_ref() == Some(target) {
        return false;
    }
    !(is_folder && target.is_within(&path))
}

/// Owns the single drag session.
#[derive(Debug)]
pub struct DragSessionManager {
    engine: MoveEngine,
    targets: DropTargetRegistry,
    session: Option<DragSession>,
    hover_delay: Duration,
    state: watch::Sender<DragSnapshot>,
}

impl DragSessionManager {
    pub fn new(engine: MoveEngine) -> Self {
        let hover_delay = engine.config().hover_expand_delay();
        let (state, _) = watch::channel(DragSnapshot::default());
        Self {
            engine,
            targets: DropTargetRegistry::new(),
            session: None,
            hover_delay,
            state,
        }
    }

    /// On-screen drop targets.
    pub fn targets(&self) -> &DropTargetRegistry {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut DropTargetRegistry {
        &mut self.targets
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> DragPhase {
        if self.session.is_some() {
            DragPhase::Dragging
        } else {
            DragPhase::Idle
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DragSnapshot> {
        self.state.subscribe()
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(s) => DragSnapshot {
                phase: DragPhase::Dragging,
                item: Some(s.item.clone()),
                current_drop_target: s.current_drop_target.clone(),
                valid_drop_targets: s.valid_drop_targets.clone(),
            },
            None => DragSnapshot::default(),
        };
        self.state.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn compute_targets(&self, selection: &[String]) -> BTreeSet<VfsPath> {
        self.engine
            .cache()
            .loaded_folder_paths()
            .into_iter()
            .filter(|target| selection.iter().all(|key| is_valid_drop_target(target, key)))
            .collect()
    }

    /// Begin a drag of `item` and `selection`.
    ///
    /// Fails while another drag is live; cancel it first.
    pub fn start_dragging(&mut self, item: DragItem, selection: Vec<String>) -> Result<(), DragError> {
        if self.session.is_some() {
            return Err(DragError::SessionActive);
        }
        let mut selection = if selection.is_empty() {
            vec![item.key.clone()]
        } else {
            selection
        };
        for key in &mut selection {
            let (path, is_folder) = VfsPath::from_key(key).map_err(OpsError::from)?;
            *key = path.to_key(is_folder);
        }

        let valid_drop_targets = self.compute_targets(&selection);
        info!(
            target: "drag",
            key = %item.key,
            count = selection.len(),
            targets = valid_drop_targets.len(),
            "drag started"
        );
        self.session = Some(DragSession {
            item,
            selection,
            current_drop_target: None,
            valid_drop_targets,
            hover: None,
        });
        self.publish();
        Ok(())
    }

    /// The pointer entered `path`'s drop area.
    ///
    /// Returns whether `path` became the current drop target.
    pub fn hover_enter(&mut self, path: &VfsPath, now: Instant) -> Result<bool, DragError> {
        let cache = Arc::clone(self.engine.cache());
        let session = self.session.as_mut().ok_or(DragError::NoSession)?;
        if !session.valid_drop_targets.contains(path) {
            session.current_drop_target = None;
            session.hover = None;
            self.publish();
            return Ok(false);
        }
        if session.current_drop_target.as_ref() != Some(path) {
            session.current_drop_target = Some(path.clone());
            session.hover = (!cache.is_expanded(path)).then(|| Hover {
                path: path.clone(),
                since: now,
            });
            debug!(target: "drag", %path, "hovering");
        }
        self.publish();
        Ok(true)
    }

    /// The pointer left `path`'s drop area.
    pub fn hover_leave(&mut self, path: &VfsPath) -> Result<(), DragError> {
        let session = self.session.as_mut().ok_or(DragError::NoSession)?;
        if session.current_drop_target.as_ref() == Some(path) {
            session.current_drop_target = None;
        }
        if session.hover.as_ref().is_some_and(|h| &h.path == path) {
            session.hover = None;
        }
        self.publish();
        Ok(())
    }

    /// The pointer moved to `position`.
    ///
    /// Returns the current drop target afterwards.
    pub fn pointer_moved(&mut self, position: Point, now: Instant) -> Result<Option<VfsPath>, DragError> {
        if self.session.is_none() {
            return Err(DragError::NoSession);
        }
        match self.targets.hit_test(position).cloned() {
            Some(path) => {
                self.hover_enter(&path, now)?;
            }
            None => {
                if let Some(current) = self.session.as_ref().and_then(|s| s.current_drop_target.clone()) {
                    self.hover_leave(&current)?;
                }
            }
        }
        Ok(self.session.as_ref().and_then(|s| s.current_drop_target.clone()))
    }

    /// Expand the hovered folder once the hover delay has passed.
    ///
    /// Returns the folder that was expanded, if any. Newly loaded folders
    /// become candidate drop targets.
    pub async fn tick(&mut self, now: Instant) -> Result<Option<VfsPath>, DragError> {
        let session = self.session.as_mut().ok_or(DragError::NoSession)?;
        let Some(hover) = session.hover.clone() else {
            return Ok(None);
        };
        if now.saturating_duration_since(hover.since) < self.hover_delay {
            return Ok(None);
        }
        session.hover = None;

        let cache = Arc::clone(self.engine.cache());
        if let Err(e) = cache.expand(&hover.path).await {
            warn!(target: "drag", path = %hover.path, error = %e, "auto-expand failed");
            return Err(OpsError::from(e).into());
        }
        debug!(target: "drag", path = %hover.path, "auto-expanded");

        let selection = match &self.session {
            Some(s) => s.selection.clone(),
            None => return Ok(Some(hover.path)),
        };
        let targets = self.compute_targets(&selection);
        if let Some(session) = self.session.as_mut() {
            session.valid_drop_targets = targets;
        }
        self.publish();
        Ok(Some(hover.path))
    }

    /// Release the pointer.
    ///
    /// Over a valid target the selection is moved into it; anywhere else the
    /// drag is cancelled. The manager is idle afterwards either way.
    pub async fn stop_dragging(&mut self) -> Result<DropOutcome, DragError> {
        let session = self.session.take().ok_or(DragError::NoSession)?;
        self.publish();

        let Some(target) = session
            .current_drop_target
            .filter(|t| session.valid_drop_targets.contains(t))
        else {
            debug!(target: "drag", key = %session.item.key, "released outside a target");
            return Ok(DropOutcome::Cancelled);
        };

        info!(target: "drag", %target, count = session.selection.len(), "dropped");
        let mut moved = Vec::new();
        let mut failed = Vec::new();
        for key in session.selection {
            match self.engine.move_into(&key, &target).await {
                Ok(_) => moved.push(key),
                Err(e) => {
                    warn!(target: "drag", %key, error = %e, "move on drop failed");
                    failed.push((key, e));
                }
            }
        }
        Ok(DropOutcome::Dropped {
            target,
            moved,
            failed,
        })
    }

    /// Abort the drag. Returns whether one was live.
    pub fn cancel(&mut self) -> bool {
        let live = self.session.take().is_some();
        if live {
            debug!(target: "drag", "cancelled");
            self.publish();
        }
        live
    }

    /// Feed one gesture event. Returns the outcome when the drag ends.
    pub async fn handle(&mut self, event: GestureEvent, now: Instant) -> Result<Option<DropOutcome>, DragError> {
        match event {
            GestureEvent::Start { item, selection } => {
                self.start_dragging(item, selection)?;
                Ok(None)
            }
            GestureEvent::Move { position } => {
                self.pointer_moved(position, now)?;
                self.tick(now).await?;
                Ok(None)
            }
            GestureEvent::End => self.stop_dragging().await.map(Some),
            GestureEvent::Cancel => {
                if self.cancel() {
                    Ok(Some(DropOutcome::Cancelled))
                } else {
                    Err(DragError::NoSession)
                }
            }
        }
    }
}
