//! Pointer gestures and drop-target geometry.
//!
//! The drag manager consumes a plain event stream, so it runs the same way
//! under a terminal, a GUI or a test.

use prefixfs_core::VfsPath;

use crate::drag::DragItem;

/// A pointer position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned area on screen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether `point` lies inside. The right and bottom edges are exclusive.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }
}

/// Folders currently drawn on screen and where.
#[derive(Debug, Clone, Default)]
pub struct DropTargetRegistry {
    targets: Vec<(VfsPath, Rect)>,
}

impl DropTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or move a target. Later registrations sit on top.
    pub fn register(&mut self, path: VfsPath, bounds: Rect) {
        self.targets.retain(|(p, _)| p != &path);
        self.targets.push((path, bounds));
    }

    /// Forget a target.
    pub fn unregister(&mut self, path: &VfsPath) {
        self.targets.retain(|(p, _)| p != path);
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The topmost target under `point`.
    pub fn hit_test(&self, point: Point) -> Option<&VfsPath> {
        self.targets
            .iter()
            .rev()
            .find(|(_, bounds)| bounds.contains(point))
            .map(|(path, _)| path)
    }
}

/// One step of a pointer drag.
#[derive(Debug, Clone)]
pub enum GestureEvent {
    /// Pointer pressed on an item and started moving.
    Start {
        item: DragItem,
        /// Every key being dragged, `item` included.
        selection: Vec<String>,
    },
    /// Pointer moved while dragging.
    Move { position: Point },
    /// Pointer released.
    End,
    /// Drag aborted (escape key, focus lost).
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_edges() {
        let rect = Rect::new(0.0, 0.0, 10.0, 5.0);
        assert!(rect.contains(Point::new(0.0, 0.0)));
        assert!(rect.contains(Point::new(9.9, 4.9)));
        assert!(!rect.contains(Point::new(10.0, 1.0)));
        assert!(!rect.contains(Point::new(1.0, -0.1)));
    }

    #[test]
    fn test_topmost_target_wins() {
        let mut registry = DropTargetRegistry::new();
        let outer = VfsPath::parse("docs").unwrap();
        let inner = VfsPath::parse("docs/drafts").unwrap();
        registry.register(outer.clone(), Rect::new(0.0, 0.0, 100.0, 100.0));
        registry.register(inner.clone(), Rect::new(10.0, 10.0, 20.0, 20.0));

        assert_eq!(registry.hit_test(Point::new(15.0, 15.0)), Some(&inner));
        assert_eq!(registry.hit_test(Point::new(50.0, 50.0)), Some(&outer));
        assert_eq!(registry.hit_test(Point::new(500.0, 5.0)), None);

        registry.register(outer.clone(), Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(registry.hit_test(Point::new(15.0, 15.0)), Some(&outer));
        assert_eq!(registry.len(), 2);
    }
}
