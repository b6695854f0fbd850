//! Cache key definitions.
//!
//! Defines `DependencyKey` for data a render depended on, `CachedPageRef` for
//! render cache entries, and the builders for every shared-store key and
//! artifact path the page pipeline uses.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::descriptor::RequestDescriptor;
use crate::domain::types::BranchContext;

/// Shared-store key of the page directory snapshot.
pub const DIRECTORY_SLOT: &str = "wcmPages";
/// Shared-store key of the "rebuild in progress" flag.
pub const PRELOADING_FLAG: &str = "wcmPagesPreloadingFlag";

/// Dependency kind for content nodes.
pub const NODE_KIND: &str = "node";
/// Dependency kind for templates.
pub const TEMPLATE_KIND: &str = "template";

/// Identifies a piece of data that influenced a render.
///
/// When the data changes, every cached page that recorded the key must be
/// evicted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyKey {
    pub kind: String,
    pub value: String,
}

impl DependencyKey {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// A content node, by id.
    pub fn node(id: impl Into<String>) -> Self {
        Self::new(NODE_KIND, id)
    }

    /// A template, by path.
    pub fn template(path: impl Into<String>) -> Self {
        Self::new(TEMPLATE_KIND, path)
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Address of one render cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CachedPageRef {
    pub repository_id: String,
    pub branch_id: String,
    pub cache_key: String,
}

impl CachedPageRef {
    pub fn new(ctx: &BranchContext, cache_key: impl Into<String>) -> Self {
        Self {
            repository_id: ctx.repository_id.clone(),
            branch_id: ctx.branch_id.clone(),
            cache_key: cache_key.into(),
        }
    }

    /// Byte-store directory holding everything stored for this entry.
    pub fn entry_dir(&self) -> String {
        format!(
            "{}/{}",
            pages_dir(&self.repository_id, &self.branch_id),
            self.cache_key
        )
    }

    /// Artifact path of the rendered page in the byte store.
    pub fn artifact_path(&self) -> String {
        format!("{}/page.html", self.entry_dir())
    }

    /// Write-time record of the entry, consulted for expiry.
    pub fn meta_path(&self) -> String {
        format!("{}/meta.json", self.entry_dir())
    }

    /// Dependencies recorded for the entry.
    pub fn dependencies_path(&self) -> String {
        format!("{}/dependencies.json", self.entry_dir())
    }

    /// File name of this entry's link inside a dependency directory.
    ///
    /// The same descriptor cached on two branches gets two distinct links.
    pub fn link_name(&self) -> String {
        format!(
            "{}.{}.{}",
            encode_segment(&self.repository_id),
            encode_segment(&self.branch_id),
            self.cache_key
        )
    }

    pub fn is_branch(&self, repository_id: &str, branch_id: &str) -> bool {
        self.repository_id == repository_id && self.branch_id == branch_id
    }
}

impl fmt::Display for CachedPageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.repository_id, self.branch_id, self.cache_key
        )
    }
}

// ============================================================================
// Shared store keys
// ============================================================================

fn scoped_key(ctx: &BranchContext, name: &str) -> String {
    format!(
        "wcm/{}/{}/{}/{name}",
        ctx.host, ctx.repository_id, ctx.branch_id
    )
}

/// Key under which the directory snapshot for `ctx` lives.
pub fn directory_slot_key(ctx: &BranchContext) -> String {
    scoped_key(ctx, DIRECTORY_SLOT)
}

/// Key of the preloading flag guarding the snapshot for `ctx`.
pub fn preloading_flag_key(ctx: &BranchContext) -> String {
    scoped_key(ctx, PRELOADING_FLAG)
}

// ============================================================================
// Byte-store layout
// ============================================================================

/// Root under which every repository's cached pages live.
pub const REPOSITORIES_DIR: &str = "wcm/repositories";

/// Directory of cached page entries for a repository branch.
pub fn pages_dir(repository_id: &str, branch_id: &str) -> String {
    format!("{REPOSITORIES_DIR}/{repository_id}/branches/{branch_id}/pages")
}

/// Directory of links to every entry that declared `dependency`.
pub fn dependency_dir(dependency: &DependencyKey) -> String {
    format!(
        "wcm/dependencies/{}/{}",
        encode_segment(&dependency.kind),
        encode_segment(&dependency.value)
    )
}

/// Link from `dependency` to one cached entry.
pub fn dependency_link_path(dependency: &DependencyKey, page_ref: &CachedPageRef) -> String {
    format!("{}/{}", dependency_dir(dependency), page_ref.link_name())
}

fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

// ============================================================================
// Page cache key
// ============================================================================

/// Content address of a render, derived from its descriptor.
///
/// Covers the absolute URL, the offset path, the query parameters and the
/// allow-listed headers. Every field is length-prefixed so that no two
/// distinct descriptors share an encoding.
pub fn page_cache_key(descriptor: &RequestDescriptor) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, &descriptor.url);
    update_field(&mut hasher, &descriptor.path);
    update_map(&mut hasher, &descriptor.params);
    update_map(&mut hasher, &descriptor.headers);
    hex::encode(hasher.finalize())
}

fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn update_map(hasher: &mut Sha256, map: &BTreeMap<String, String>) {
    hasher.update((map.len() as u64).to_be_bytes());
    for (key, value) in map {
        update_field(hasher, key);
        update_field(hasher, value);
    }
}
