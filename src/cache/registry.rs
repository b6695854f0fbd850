//! Dependency index for rendered pages.
//!
//! Tracks which data keys every cached render depended on, so that a change to
//! one piece of data evicts exactly the renders it influenced. The index is
//! written on the render path and read only during invalidation.
//!
//! [`StoredDependencyIndex`] keeps the records in the shared byte store next to
//! the artifacts they describe, so any worker can evict renders another worker
//! produced. [`MemoryDependencyIndex`] is the single-process variant.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::application::repos::{ByteStore, StoreError};

use super::keys::{
    CachedPageRef, DependencyKey, REPOSITORIES_DIR, dependency_dir, dependency_link_path,
    pages_dir,
};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Bidirectional dependency ↔ cached page index.
#[async_trait]
pub trait DependencyStore: Send + Sync {
    /// Record the dependencies of a freshly cached page.
    ///
    /// Replaces whatever was recorded for the same page before.
    async fn record(
        &self,
        page_ref: &CachedPageRef,
        deps: &HashSet<DependencyKey>,
    ) -> Result<(), StoreError>;

    /// Cached pages that declared `dep`.
    async fn lookup(&self, dep: &DependencyKey) -> Result<HashSet<CachedPageRef>, StoreError>;

    /// Dependencies recorded for `page_ref`.
    async fn dependencies_of(
        &self,
        page_ref: &CachedPageRef,
    ) -> Result<HashSet<DependencyKey>, StoreError>;

    /// Forget a cached page. Returns whether it was tracked.
    async fn remove(&self, page_ref: &CachedPageRef) -> Result<bool, StoreError>;

    /// Remove every page that declared `dep` and return them for eviction.
    async fn take(&self, dep: &DependencyKey) -> Result<HashSet<CachedPageRef>, StoreError>;

    /// Remove every page cached for a repository branch.
    async fn take_branch(
        &self,
        repository_id: &str,
        branch_id: &str,
    ) -> Result<HashSet<CachedPageRef>, StoreError>;

    /// Number of tracked cached pages.
    async fn page_count(&self) -> Result<usize, StoreError>;
}

// ============================================================================
// Shared store
// ============================================================================

/// Dependency records kept in a byte store.
///
/// Each entry lists its dependencies in `dependencies.json` beside the
/// artifact, and each dependency holds one link file per entry under
/// `wcm/dependencies/{kind}/{value}/`. Link files are written and deleted
/// individually, so concurrent renders of different pages never contend.
#[derive(Clone)]
pub struct StoredDependencyIndex {
    bytes: Arc<dyn ByteStore>,
}

impl StoredDependencyIndex {
    pub fn new(bytes: Arc<dyn ByteStore>) -> Self {
        Self { bytes }
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.bytes.read_file(path).await? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|err| StoreError::decode(path, err)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(value).map_err(StoreError::from_backend)?;
        self.bytes.write_file(path, Bytes::from(raw)).await
    }

    /// Delete the manifest of `page_ref` and every link it names.
    async fn unlink(&self, page_ref: &CachedPageRef) -> Result<bool, StoreError> {
        let manifest = page_ref.dependencies_path();
        let Some(deps) = self.read_json::<Vec<DependencyKey>>(&manifest).await? else {
            return Ok(false);
        };
        for dep in &deps {
            self.bytes
                .delete_file(&dependency_link_path(dep, page_ref))
                .await?;
        }
        self.bytes.delete_file(&manifest).await?;
        Ok(true)
    }
}

#[async_trait]
impl DependencyStore for StoredDependencyIndex {
    /// The manifest goes first; a link left behind by an interrupted write is
    /// still found, and cleared, by [`take`](DependencyStore::take).
    async fn record(
        &self,
        page_ref: &CachedPageRef,
        deps: &HashSet<DependencyKey>,
    ) -> Result<(), StoreError> {
        self.unlink(page_ref).await?;

        let mut sorted: Vec<&DependencyKey> = deps.iter().collect();
        sorted.sort();
        self.write_json(&page_ref.dependencies_path(), &sorted).await?;

        let link = serde_json::to_vec(page_ref).map_err(StoreError::from_backend)?;
        let link = Bytes::from(link);
        for dep in sorted {
            self.bytes
                .write_file(&dependency_link_path(dep, page_ref), link.clone())
                .await?;
        }
        Ok(())
    }

    async fn lookup(&self, dep: &DependencyKey) -> Result<HashSet<CachedPageRef>, StoreError> {
        let dir = dependency_dir(dep);
        let mut pages = HashSet::new();
        for name in self.bytes.list_files(&dir).await? {
            let link = format!("{dir}/{name}");
            if let Some(page_ref) = self.read_json::<CachedPageRef>(&link).await? {
                pages.insert(page_ref);
            }
        }
        Ok(pages)
    }

    async fn dependencies_of(
        &self,
        page_ref: &CachedPageRef,
    ) -> Result<HashSet<DependencyKey>, StoreError> {
        let deps: Option<Vec<DependencyKey>> =
            self.read_json(&page_ref.dependencies_path()).await?;
        Ok(deps.unwrap_or_default().into_iter().collect())
    }

    async fn remove(&self, page_ref: &CachedPageRef) -> Result<bool, StoreError> {
        self.unlink(page_ref).await
    }

    async fn take(&self, dep: &DependencyKey) -> Result<HashSet<CachedPageRef>, StoreError> {
        let dir = dependency_dir(dep);
        let mut pages = HashSet::new();
        for name in self.bytes.list_files(&dir).await? {
            let link = format!("{dir}/{name}");
            if let Some(page_ref) = self.read_json::<CachedPageRef>(&link).await? {
                self.unlink(&page_ref).await?;
                pages.insert(page_ref);
            }
            self.bytes.delete_file(&link).await?;
        }
        Ok(pages)
    }

    async fn take_branch(
        &self,
        repository_id: &str,
        branch_id: &str,
    ) -> Result<HashSet<CachedPageRef>, StoreError> {
        let mut pages = HashSet::new();
        for cache_key in self
            .bytes
            .list_files(&pages_dir(repository_id, branch_id))
            .await?
        {
            let page_ref = CachedPageRef {
                repository_id: repository_id.to_string(),
                branch_id: branch_id.to_string(),
                cache_key,
            };
            if self.unlink(&page_ref).await? {
                pages.insert(page_ref);
            }
        }
        Ok(pages)
    }

    async fn page_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for repository_id in self.bytes.list_files(REPOSITORIES_DIR).await? {
            let branches = format!("{REPOSITORIES_DIR}/{repository_id}/branches");
            for branch_id in self.bytes.list_files(&branches).await? {
                for cache_key in self
                    .bytes
                    .list_files(&pages_dir(&repository_id, &branch_id))
                    .await?
                {
                    let page_ref = CachedPageRef {
                        repository_id: repository_id.clone(),
                        branch_id: branch_id.clone(),
                        cache_key,
                    };
                    if self.bytes.exists_file(&page_ref.dependencies_path()).await? {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }
}

// ============================================================================
// In-process
// ============================================================================

#[derive(Default)]
struct Maps {
    /// Maps a dependency to every cached page that declared it
    dep_to_pages: HashMap<DependencyKey, HashSet<CachedPageRef>>,
    /// Maps a cached page to every dependency it declared
    page_to_deps: HashMap<CachedPageRef, HashSet<DependencyKey>>,
}

impl Maps {
    fn unlink(&mut self, page_ref: &CachedPageRef) -> bool {
        let Some(deps) = self.page_to_deps.remove(page_ref) else {
            return false;
        };
        for dep in deps {
            if let Some(pages) = self.dep_to_pages.get_mut(&dep) {
                pages.remove(page_ref);
                if pages.is_empty() {
                    self.dep_to_pages.remove(&dep);
                }
            }
        }
        true
    }
}

/// Dependency index private to one process.
///
/// Both directions live behind one lock so they never disagree. Only suitable
/// when a single worker owns the render cache.
#[derive(Default)]
pub struct MemoryDependencyIndex {
    maps: RwLock<Maps>,
}

impl MemoryDependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked dependency keys.
    pub fn dependency_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "dependency_count")
            .dep_to_pages
            .len()
    }
}

#[async_trait]
impl DependencyStore for MemoryDependencyIndex {
    async fn record(
        &self,
        page_ref: &CachedPageRef,
        deps: &HashSet<DependencyKey>,
    ) -> Result<(), StoreError> {
        let mut maps = rw_write(&self.maps, SOURCE, "record");
        maps.unlink(page_ref);

        for dep in deps {
            maps.dep_to_pages
                .entry(dep.clone())
                .or_default()
                .insert(page_ref.clone());
        }
        maps.page_to_deps.insert(page_ref.clone(), deps.clone());
        Ok(())
    }

    async fn lookup(&self, dep: &DependencyKey) -> Result<HashSet<CachedPageRef>, StoreError> {
        Ok(rw_read(&self.maps, SOURCE, "lookup")
            .dep_to_pages
            .get(dep)
            .cloned()
            .unwrap_or_default())
    }

    async fn dependencies_of(
        &self,
        page_ref: &CachedPageRef,
    ) -> Result<HashSet<DependencyKey>, StoreError> {
        Ok(rw_read(&self.maps, SOURCE, "dependencies_of")
            .page_to_deps
            .get(page_ref)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, page_ref: &CachedPageRef) -> Result<bool, StoreError> {
        Ok(rw_write(&self.maps, SOURCE, "remove").unlink(page_ref))
    }

    async fn take(&self, dep: &DependencyKey) -> Result<HashSet<CachedPageRef>, StoreError> {
        let mut maps = rw_write(&self.maps, SOURCE, "take");
        let pages = maps.dep_to_pages.remove(dep).unwrap_or_default();
        for page_ref in &pages {
            maps.unlink(page_ref);
        }
        Ok(pages)
    }

    async fn take_branch(
        &self,
        repository_id: &str,
        branch_id: &str,
    ) -> Result<HashSet<CachedPageRef>, StoreError> {
        let mut maps = rw_write(&self.maps, SOURCE, "take_branch");
        let pages: HashSet<CachedPageRef> = maps
            .page_to_deps
            .keys()
            .filter(|page_ref| page_ref.is_branch(repository_id, branch_id))
            .cloned()
            .collect();
        for page_ref in &pages {
            maps.unlink(page_ref);
        }
        Ok(pages)
    }

    async fn page_count(&self) -> Result<usize, StoreError> {
        Ok(rw_read(&self.maps, SOURCE, "page_count").page_to_deps.len())
    }
}
