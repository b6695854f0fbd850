//! Page directory, render cache and invalidation.
//!
//! - **Page directory**: per-branch snapshot of every page and the URI
//!   patterns it serves, shared through the cache store and rebuilt by at
//!   most one worker at a time.
//! - **Render cache**: rendered pages stored by descriptor hash, with the
//!   dependencies each render declared. Entries expire after `page_ttl_seconds`.
//! - **Invalidation**: node and module changes are applied locally and
//!   broadcast to the other workers.
//!
//! ## Configuration
//!
//! ```toml
//! [wcm]
//! enabled = true
//! cache = true
//! mode = "production"
//! page_ttl_seconds = 86400
//! ```

mod broadcast;
mod config;
mod coordinator;
mod directory;
mod events;
mod keys;
mod lock;
mod page_cache;
mod planner;
mod registry;
mod resolver;

pub use broadcast::{Broadcast, BroadcastError, LocalBroadcast};
pub use config::WcmConfig;
pub use coordinator::{InvalidationCoordinator, InvalidationOutcome};
pub use directory::{DirectoryEntry, DirectoryError, DirectorySnapshot, PageDirectory};
pub use events::{
    InvalidationEnvelope, InvalidationMessage, MODULE_INVALIDATION_TOPIC, ModuleCommand,
    NODE_INVALIDATION_TOPIC,
};
pub use keys::{
    CachedPageRef, DependencyKey, directory_slot_key, page_cache_key, preloading_flag_key,
};
pub use page_cache::PageCache;
pub use planner::InvalidationPlan;
pub use registry::{DependencyStore, MemoryDependencyIndex, StoredDependencyIndex};
pub use resolver::{PageMatch, find_matching_page, matching_pages};
