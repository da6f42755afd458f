use std::sync::Arc;

use prefixfs_core::{MemoryStore, StoreOp, VfsPath};
use prefixfs_tree::{CacheEventKind, PatchOp, PatchOutcome, SortDirection, SortKey, SortOrder, TreeCache, TreeView};

fn path(p: &str) -> VfsPath {
    VfsPath::parse(p).unwrap()
}

fn seeded() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_objects([
        ("docs/", vec![]),
        ("docs/report.pdf", vec![0; 300]),
        ("docs/notes.txt", vec![0; 10]),
        ("docs/drafts/", vec![]),
        ("docs/drafts/v1.txt", vec![0; 5]),
        ("archive/", vec![]),
        ("readme.md", vec![0; 2]),
    ]))
}

#[tokio::test]
async fn test_children_are_one_level_deep() {
    let store = seeded();
    let cache = TreeCache::new(store);

    let children = cache.load_children(&path("docs")).await.unwrap();
    let names: Vec<_> = children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["drafts", "notes.txt", "report.pdf"]);

    for child in &children {
        assert!(child.path.is_within(&path("docs")));
        assert_eq!(child.path.parent().unwrap(), path("docs"));
    }
    let drafts = &children[0];
    assert!(drafts.is_folder);
    assert!(!drafts.is_loaded());
}

#[tokio::test]
async fn test_snapshot_includes_loaded_descendants() {
    let store = seeded();
    let cache = TreeCache::new(store);

    cache.expand(&VfsPath::root()).await.unwrap();
    cache.expand(&path("docs")).await.unwrap();

    let root = cache.snapshot(&VfsPath::root()).unwrap();
    let docs = root.find(&path("docs")).unwrap();
    assert!(docs.is_expanded);
    assert_eq!(docs.child_count(), 3);
    assert!(root.find(&path("archive")).unwrap().children.is_none());
}

#[tokio::test]
async fn test_lookup_is_exact_name_match() {
    let store = seeded();
    let cache = TreeCache::new(store.clone());

    assert!(cache.lookup(&path("docs"), "report.pdf").await.unwrap().is_some());
    assert!(cache.lookup(&path("docs"), "Report.pdf").await.unwrap().is_none());
    assert!(cache.lookup(&path("docs"), "report").await.unwrap().is_none());
    assert!(cache.lookup(&path("docs"), "drafts").await.unwrap().unwrap().is_folder);
    assert_eq!(store.calls_of(StoreOp::List).len(), 1);
}

#[tokio::test]
async fn test_view_sorts_and_filters() {
    let store = seeded();
    let cache = TreeCache::new(store);
    cache.load_children(&path("docs")).await.unwrap();

    let view = TreeView::new(SortOrder::new(SortKey::Size, SortDirection::Descending));
    let nodes = view.children(&cache, &path("docs"), None);
    let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["drafts", "report.pdf", "notes.txt"]);

    let filtered = view.children(&cache, &path("docs"), Some("NOTES"));
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].name, "notes.txt");
}

#[tokio::test]
async fn test_search_covers_cached_listings_only() {
    let store = seeded();
    let cache = TreeCache::new(store);
    let view = TreeView::default();

    cache.load_children(&VfsPath::root()).await.unwrap();
    cache.load_children(&path("docs")).await.unwrap();
    assert!(view.search(&cache, &VfsPath::root(), "v1").is_empty());

    cache.load_children(&path("docs/drafts")).await.unwrap();
    let hits = view.search(&cache, &VfsPath::root(), "v1");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, path("docs/drafts/v1.txt"));
}

#[tokio::test]
async fn test_patch_events_reach_subscribers() {
    let store = seeded();
    let cache = TreeCache::new(store);
    cache.load_children(&path("docs")).await.unwrap();
    let mut sub = cache.subscribe(path("archive"));

    let id = cache.begin_patch(vec![
        PatchOp::remove(path("docs"), "docs/report.pdf"),
        PatchOp::insert(
            path("archive"),
            prefixfs_core::StorageObject::new("archive/report.pdf", 300, chrono::Utc::now()),
        ),
    ]);
    assert_eq!(sub.recv().await.unwrap().kind, CacheEventKind::Patched);
    assert_eq!(cache.listing(&path("archive")).unwrap().len(), 1);

    cache.settle(id, PatchOutcome::RolledBack);
    assert_eq!(sub.recv().await.unwrap().kind, CacheEventKind::Patched);
    assert!(cache.listing(&path("archive")).is_none());
}

#[tokio::test]
async fn test_store_failure_leaves_cache_untouched() {
    let store = seeded();
    let cache = TreeCache::new(store.clone());
    store.fail_times(StoreOp::List, 1);

    assert!(cache.load_children(&path("docs")).await.is_err());
    assert!(!cache.is_loaded(&path("docs")));
    assert_eq!(cache.load_children(&path("docs")).await.unwrap().len(), 3);
}
