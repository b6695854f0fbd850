//! Render cache.
//!
//! Rendered pages are stored as artifacts in the byte store, addressed by the
//! hash of their request descriptor. Every write also records the render's
//! dependencies so invalidation can find the artifact again, and stamps the
//! write time so entries no invalidation reaches still expire.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::repos::{ByteStore, StoreError};
use crate::domain::descriptor::RequestDescriptor;
use crate::domain::types::BranchContext;

use super::config::WcmConfig;
use super::keys::{CachedPageRef, DependencyKey, page_cache_key};
use super::registry::DependencyStore;

const METRIC_PAGE_CACHE_HIT_TOTAL: &str = "pagina_page_cache_hit_total";
const METRIC_PAGE_CACHE_MISS_TOTAL: &str = "pagina_page_cache_miss_total";

/// Stored beside each artifact.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    #[serde(with = "time::serde::rfc3339")]
    written_at: OffsetDateTime,
}

pub struct PageCache {
    bytes: Arc<dyn ByteStore>,
    index: Arc<dyn DependencyStore>,
    enabled: bool,
    ttl: Duration,
}

impl PageCache {
    pub fn new(
        bytes: Arc<dyn ByteStore>,
        index: Arc<dyn DependencyStore>,
        config: &WcmConfig,
    ) -> Self {
        Self {
            bytes,
            index,
            enabled: config.page_cache_enabled(),
            ttl: config.page_ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn index(&self) -> &Arc<dyn DependencyStore> {
        &self.index
    }

    /// Address of the entry a descriptor maps to.
    pub fn page_ref(ctx: &BranchContext, descriptor: &RequestDescriptor) -> CachedPageRef {
        CachedPageRef::new(ctx, page_cache_key(descriptor))
    }

    /// Cached bytes for `descriptor`, if any.
    ///
    /// Storage failures read as a miss. Expired entries read as a miss and are
    /// evicted. A disabled cache never touches storage.
    pub async fn read(&self, ctx: &BranchContext, descriptor: &RequestDescriptor) -> Option<Bytes> {
        if !self.enabled {
            return None;
        }

        let page_ref = Self::page_ref(ctx, descriptor);
        match self.bytes.read_file(&page_ref.artifact_path()).await {
            Ok(Some(bytes)) => {
                if self.is_expired(&page_ref).await {
                    counter!(METRIC_PAGE_CACHE_MISS_TOTAL).increment(1);
                    debug!(page = %page_ref, path = %descriptor.path, "Cached page expired");
                    if let Err(err) = self.evict(&page_ref).await {
                        warn!(page = %page_ref, error = %err, "Failed to evict expired page");
                    }
                    return None;
                }
                counter!(METRIC_PAGE_CACHE_HIT_TOTAL).increment(1);
                debug!(page = %page_ref, path = %descriptor.path, "Page cache hit");
                Some(bytes)
            }
            Ok(None) => {
                counter!(METRIC_PAGE_CACHE_MISS_TOTAL).increment(1);
                None
            }
            Err(err) => {
                counter!(METRIC_PAGE_CACHE_MISS_TOTAL).increment(1);
                warn!(page = %page_ref, error = %err, "Page cache read failed; rendering instead");
                None
            }
        }
    }

    /// An entry without a readable write time counts as expired.
    async fn is_expired(&self, page_ref: &CachedPageRef) -> bool {
        let path = page_ref.meta_path();
        let meta = match self.bytes.read_file(&path).await {
            Ok(Some(raw)) => serde_json::from_slice::<EntryMeta>(&raw)
                .map_err(|err| StoreError::decode(&path, err)),
            Ok(None) => return true,
            Err(err) => Err(err),
        };

        match meta {
            Ok(meta) => {
                let ttl = time::Duration::try_from(self.ttl).unwrap_or(time::Duration::MAX);
                OffsetDateTime::now_utc() - meta.written_at >= ttl
            }
            Err(err) => {
                warn!(page = %page_ref, error = %err, "Unreadable page cache metadata");
                true
            }
        }
    }

    /// Store a render and record what it depended on.
    ///
    /// Returns the entry address, or `None` when caching is disabled. Failing
    /// to record dependencies is logged, not returned; the entry then lives
    /// until its TTL.
    pub async fn write<I>(
        &self,
        ctx: &BranchContext,
        descriptor: &RequestDescriptor,
        bytes: Bytes,
        dependencies: I,
    ) -> Result<Option<CachedPageRef>, StoreError>
    where
        I: IntoIterator<Item = DependencyKey>,
    {
        if !self.enabled {
            return Ok(None);
        }

        let page_ref = Self::page_ref(ctx, descriptor);
        let meta = EntryMeta {
            written_at: OffsetDateTime::now_utc(),
        };
        let meta = serde_json::to_vec(&meta).map_err(StoreError::from_backend)?;
        // metadata first: an artifact is never visible without its write time
        self.bytes
            .write_file(&page_ref.meta_path(), Bytes::from(meta))
            .await?;
        self.bytes
            .write_file(&page_ref.artifact_path(), bytes)
            .await?;

        let dependencies: HashSet<DependencyKey> = dependencies.into_iter().collect();
        if let Err(err) = self.index.record(&page_ref, &dependencies).await {
            warn!(page = %page_ref, error = %err, "Failed to record page dependencies");
        }
        Ok(Some(page_ref))
    }

    /// Delete one entry and forget its dependencies. Returns whether an
    /// artifact was removed.
    pub async fn evict(&self, page_ref: &CachedPageRef) -> Result<bool, StoreError> {
        let removed = self.bytes.delete_file(&page_ref.artifact_path()).await?;
        self.bytes.delete_file(&page_ref.meta_path()).await?;
        self.index.remove(page_ref).await?;
        Ok(removed)
    }

    /// Evict every entry that declared `dependency`. Returns how many were
    /// tracked.
    pub async fn evict_dependents(&self, dependency: &DependencyKey) -> usize {
        match self.index.take(dependency).await {
            Ok(pages) => {
                self.delete_all(pages.iter()).await;
                pages.len()
            }
            Err(err) => {
                warn!(dependency = %dependency, error = %err, "Failed to look up dependent pages");
                0
            }
        }
    }

    /// Evict every entry cached for a repository branch.
    pub async fn evict_branch(&self, repository_id: &str, branch_id: &str) -> usize {
        match self.index.take_branch(repository_id, branch_id).await {
            Ok(pages) => {
                self.delete_all(pages.iter()).await;
                pages.len()
            }
            Err(err) => {
                warn!(
                    repository = repository_id,
                    branch = branch_id,
                    error = %err,
                    "Failed to list cached pages"
                );
                0
            }
        }
    }

    async fn delete_all<'a, I>(&self, pages: I)
    where
        I: Iterator<Item = &'a CachedPageRef>,
    {
        for page_ref in pages {
            for path in [page_ref.artifact_path(), page_ref.meta_path()] {
                if let Err(err) = self.bytes.delete_file(&path).await {
                    warn!(page = %page_ref, error = %err, "Failed to delete cached page");
                }
            }
        }
    }
}
