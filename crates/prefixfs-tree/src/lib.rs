//! Tree model over prefix listings.
//!
//! [`TreeCache`] derives a navigable folder tree from a flat object store
//! and keeps it consistent as engines mutate the store:
//!
//! - **Lazy loading**: a folder's one-level listing is fetched on first
//!   expansion and served from cache afterwards.
//! - **Invalidation**: engines mark every path they touch stale before
//!   reporting success; the next read refetches.
//! - **Optimistic patches**: in-flight edits are overlaid on listings and
//!   confirmed or rolled back when the store answers.
//! - **Subscriptions**: consumers watch individual paths.
//!
//! [`TreeView`] sorts and filters cached listings.

mod cache;
mod patch;
mod view;

pub use cache::{
    CACHE_EVENT_CAPACITY, CacheEvent, CacheEventKind, PathSubscription, TreeCache,
    immediate_children, key_is_under,
};
pub use patch::{PatchId, PatchOp, PatchOutcome};
pub use view::{SortDirection, SortKey, SortOrder, TreeView, filter_nodes, matches_query};
