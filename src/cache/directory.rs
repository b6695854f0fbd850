//! Page directory.
//!
//! Maps URI patterns to page definitions for one (host, repository, branch)
//! slot. The snapshot lives in the shared cache store so every worker sees the
//! same directory, and is rebuilt lazily from the content store when it
//! expires or is invalidated.
//!
//! Rebuilding is expensive, so only one worker rebuilds at a time: the
//! rebuilder is elected with an atomic set-if-absent on a short-lived
//! "preloading" flag. Everybody else sleeps and re-reads until the snapshot
//! appears or a deadline passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::application::repos::{CacheStore, ContentStore, StoreError};
use crate::domain::entities::PAGE_TYPE;
use crate::domain::pages::{Page, PageDefinition, TemplateRef};
use crate::domain::types::BranchContext;

use super::config::WcmConfig;
use super::keys::{directory_slot_key, preloading_flag_key};
use super::resolver::{PageMatch, find_matching_page};

const METRIC_DIRECTORY_REBUILD_TOTAL: &str = "pagina_directory_rebuild_total";
const METRIC_DIRECTORY_REBUILD_MS: &str = "pagina_directory_rebuild_ms";

/// One pattern and the page it routes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub pattern: String,
    pub page: Page,
}

/// Immutable, ordered pattern → page mapping.
///
/// Entry order is the order in which the content store returned the pages,
/// which is the order the resolver tries them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    entries: Vec<DirectoryEntry>,
    #[serde(with = "time::serde::rfc3339")]
    loaded_at: OffsetDateTime,
    ttl_ms: u64,
}

impl DirectorySnapshot {
    /// Register every URI of every page.
    ///
    /// A later page claiming a URI that is already registered takes over the
    /// existing entry without changing its position.
    pub fn from_pages<I>(pages: I, ttl: Duration) -> Self
    where
        I: IntoIterator<Item = Page>,
    {
        let mut entries: Vec<DirectoryEntry> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for page in pages {
            for uri in &page.uris {
                match positions.get(uri) {
                    Some(&index) => entries[index].page = page.clone(),
                    None => {
                        positions.insert(uri.clone(), entries.len());
                        entries.push(DirectoryEntry {
                            pattern: uri.clone(),
                            page: page.clone(),
                        });
                    }
                }
            }
        }

        Self {
            entries,
            loaded_at: OffsetDateTime::now_utc(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn get(&self, pattern: &str) -> Option<&Page> {
        self.entries
            .iter()
            .find(|entry| entry.pattern == pattern)
            .map(|entry| &entry.page)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn loaded_at(&self) -> OffsetDateTime {
        self.loaded_at
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.loaded_at + self.ttl()
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("page directory rebuild failed for `{slot}`")]
    Rebuild {
        slot: String,
        #[source]
        source: StoreError,
    },
    #[error("gave up after {waited:?} waiting for another worker to rebuild `{slot}`")]
    PreloadTimeout { slot: String, waited: Duration },
}

/// Lazily rebuilt, shared page directory.
pub struct PageDirectory {
    content: Arc<dyn ContentStore>,
    cache: Arc<dyn CacheStore>,
    config: WcmConfig,
    /// Slots this worker has served, so invalidation can find them by host
    /// or by branch.
    known_slots: DashMap<String, BranchContext>,
}

impl PageDirectory {
    pub fn new(
        content: Arc<dyn ContentStore>,
        cache: Arc<dyn CacheStore>,
        config: WcmConfig,
    ) -> Self {
        Self {
            content,
            cache,
            config,
            known_slots: DashMap::new(),
        }
    }

    /// Find the page serving `path`, loading the directory if needed.
    #[instrument(
        skip(self, ctx),
        fields(host = %ctx.host, repository = %ctx.repository_id, branch = %ctx.branch_id)
    )]
    pub async fn resolve(
        &self,
        ctx: &BranchContext,
        path: &str,
        invalidate: bool,
    ) -> Result<Option<PageMatch>, DirectoryError> {
        let snapshot = self.load(ctx, invalidate).await?;
        Ok(find_matching_page(&snapshot, path))
    }

    /// Current snapshot for `ctx`, rebuilding it when absent.
    ///
    /// With `invalidate` set the current snapshot is discarded first.
    pub async fn load(
        &self,
        ctx: &BranchContext,
        invalidate: bool,
    ) -> Result<DirectorySnapshot, DirectoryError> {
        let slot = directory_slot_key(ctx);
        let flag = preloading_flag_key(ctx);
        self.known_slots.insert(slot.clone(), ctx.clone());

        if invalidate {
            self.remove_slot(&slot).await;
        }

        let started = Instant::now();
        loop {
            if let Some(snapshot) = self.read_snapshot(&slot).await {
                return Ok(snapshot);
            }

            match self
                .cache
                .set_if_absent(&flag, Value::Bool(true), Some(self.config.preload_flag_ttl))
                .await
            {
                Ok(true) => {
                    let held = PreloadFlag::held(Arc::clone(&self.cache), flag.clone());
                    // another worker may have finished between the read and the flag
                    let result = match self.read_snapshot(&slot).await {
                        Some(snapshot) => Ok(snapshot),
                        None => self.rebuild(ctx, &slot).await,
                    };
                    held.release().await;
                    return result;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        slot = %slot,
                        error = %err,
                        "Preloading flag unavailable; rebuilding without it"
                    );
                    return self.rebuild(ctx, &slot).await;
                }
            }

            let waited = started.elapsed();
            if waited >= self.config.preload_deadline {
                warn!(
                    slot = %slot,
                    waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    "Timed out waiting for page directory rebuild"
                );
                return Err(DirectoryError::PreloadTimeout { slot, waited });
            }

            debug!(slot = %slot, "Page directory is being rebuilt elsewhere; waiting");
            tokio::time::sleep(self.config.preload_wait).await;
        }
    }

    /// Drop the snapshot of one slot.
    pub async fn invalidate(&self, ctx: &BranchContext) {
        let slot = directory_slot_key(ctx);
        self.known_slots.remove(&slot);
        self.remove_slot(&slot).await;
    }

    /// Drop every known snapshot served for `host`. Returns their contexts.
    pub async fn invalidate_host(&self, host: &str) -> Vec<BranchContext> {
        self.invalidate_where(|ctx| ctx.host == host).await
    }

    /// Drop every known snapshot of a repository branch. Returns their
    /// contexts.
    pub async fn invalidate_branch(
        &self,
        repository_id: &str,
        branch_id: &str,
    ) -> Vec<BranchContext> {
        self.invalidate_where(|ctx| ctx.is_branch(repository_id, branch_id))
            .await
    }

    /// Contexts this worker has loaded a directory for.
    pub fn known_slots(&self) -> Vec<BranchContext> {
        self.known_slots
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn invalidate_where<F>(&self, predicate: F) -> Vec<BranchContext>
    where
        F: Fn(&BranchContext) -> bool,
    {
        let slots: Vec<String> = self
            .known_slots
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleared = Vec::with_capacity(slots.len());
        for slot in &slots {
            if let Some((_, ctx)) = self.known_slots.remove(slot) {
                cleared.push(ctx);
            }
            self.remove_slot(slot).await;
        }
        cleared
    }

    async fn remove_slot(&self, slot: &str) {
        if let Err(err) = self.cache.remove(slot).await {
            warn!(slot = %slot, error = %err, "Failed to remove page directory snapshot");
        }
    }

    async fn read_snapshot(&self, slot: &str) -> Option<DirectorySnapshot> {
        let value = match self.cache.read(slot).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(err) => {
                warn!(slot = %slot, error = %err, "Failed to read page directory snapshot");
                return None;
            }
        };

        match serde_json::from_value::<DirectorySnapshot>(value) {
            Ok(snapshot) if snapshot.is_expired_at(OffsetDateTime::now_utc()) => None,
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(slot = %slot, error = %err, "Discarding undecodable page directory snapshot");
                None
            }
        }
    }

    async fn rebuild(
        &self,
        ctx: &BranchContext,
        slot: &str,
    ) -> Result<DirectorySnapshot, DirectoryError> {
        let started = Instant::now();
        let snapshot = match self.query_pages(ctx).await {
            Ok(snapshot) => snapshot,
            Err(source) => {
                counter!(METRIC_DIRECTORY_REBUILD_TOTAL, "result" => "error").increment(1);
                return Err(DirectoryError::Rebuild {
                    slot: slot.to_string(),
                    source,
                });
            }
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        counter!(METRIC_DIRECTORY_REBUILD_TOTAL, "result" => "ok").increment(1);
        histogram!(METRIC_DIRECTORY_REBUILD_MS).record(elapsed_ms);

        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(err) = self
                    .cache
                    .write(slot, value, Some(self.config.directory_ttl()))
                    .await
                {
                    warn!(slot = %slot, error = %err, "Failed to store page directory snapshot");
                }
            }
            Err(err) => {
                warn!(slot = %slot, error = %err, "Failed to encode page directory snapshot");
            }
        }

        info!(
            slot = %slot,
            patterns = snapshot.len(),
            elapsed_ms,
            "Page directory rebuilt"
        );
        Ok(snapshot)
    }

    async fn query_pages(&self, ctx: &BranchContext) -> Result<DirectorySnapshot, StoreError> {
        let records = self.content.query_by_type(ctx, PAGE_TYPE).await?;
        let mut pages = Vec::with_capacity(records.len());

        for record in &records {
            let definition = match PageDefinition::from_record(record) {
                Ok(Some(definition)) => definition,
                Ok(None) => continue,
                Err(err) => {
                    warn!(page_id = %record.id, error = %err, "Skipping malformed page record");
                    continue;
                }
            };

            let template_path = match &definition.template {
                TemplateRef::Path(path) => path.clone(),
                TemplateRef::Id(template_id) => {
                    let template = self.content.read_record(ctx, template_id).await?;
                    match template.as_ref().and_then(|record| record.path()) {
                        Some(path) => path.to_string(),
                        None => {
                            warn!(
                                page_id = %definition.id,
                                template_id = %template_id,
                                "Skipping page whose template could not be resolved"
                            );
                            continue;
                        }
                    }
                }
            };

            pages.push(definition.resolve(template_path));
        }

        Ok(DirectorySnapshot::from_pages(
            pages,
            self.config.directory_ttl(),
        ))
    }
}

/// Ownership of the preloading flag.
///
/// Released explicitly on every normal exit; if the holder is dropped early
/// the flag is cleared in the background instead of lingering until its TTL.
struct PreloadFlag {
    cache: Arc<dyn CacheStore>,
    key: String,
    held: bool,
}

impl PreloadFlag {
    fn held(cache: Arc<dyn CacheStore>, key: String) -> Self {
        Self {
            cache,
            key,
            held: true,
        }
    }

    async fn release(mut self) {
        self.held = false;
        if let Err(err) = self.cache.remove(&self.key).await {
            warn!(flag = %self.key, error = %err, "Failed to clear preloading flag");
        }
    }
}

impl Drop for PreloadFlag {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let cache = Arc::clone(&self.cache);
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                if let Err(err) = cache.remove(&key).await {
                    warn!(flag = %key, error = %err, "Failed to clear abandoned preloading flag");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Map, json};

    use super::*;
    use crate::domain::entities::{ContentRecord, TEMPLATE_TYPE};
    use crate::infra::store::MemoryCacheStore;

    #[derive(Default)]
    struct FakeContent {
        pages: Vec<ContentRecord>,
        templates: HashMap<String, ContentRecord>,
        queries: AtomicUsize,
        delay: Duration,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl ContentStore for FakeContent {
        async fn query_by_type(
            &self,
            _ctx: &BranchContext,
            type_qname: &str,
        ) -> Result<Vec<ContentRecord>, StoreError> {
            assert_eq!(type_qname, PAGE_TYPE);
            self.queries.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::from_backend("content store offline"));
            }
            Ok(self.pages.clone())
        }

        async fn read_record(
            &self,
            _ctx: &BranchContext,
            id: &str,
        ) -> Result<Option<ContentRecord>, StoreError> {
            Ok(self.templates.get(id).cloned())
        }
    }

    fn page_record(id: &str, uris: &[&str], template: &str) -> ContentRecord {
        ContentRecord::new(id, PAGE_TYPE)
            .with_field("uris", json!(uris))
            .with_field("template", template)
    }

    fn page(id: &str, uris: &[&str]) -> Page {
        Page {
            id: id.into(),
            title: None,
            uris: uris.iter().map(|uri| uri.to_string()).collect(),
            template_path: "t/x.html".into(),
            fields: Map::new(),
        }
    }

    fn ctx() -> BranchContext {
        BranchContext::new("example.com", "repo", "master")
    }

    fn config() -> WcmConfig {
        WcmConfig {
            preload_wait: Duration::from_millis(10),
            preload_deadline: Duration::from_millis(200),
            ..WcmConfig::default()
        }
    }

    fn directory(content: Arc<FakeContent>, cache: Arc<MemoryCacheStore>) -> PageDirectory {
        PageDirectory::new(content, cache, config())
    }

    #[test]
    fn later_page_replaces_uri_in_place() {
        let snapshot = DirectorySnapshot::from_pages(
            vec![
                page("a", &["/one", "/two"]),
                page("b", &["/three", "/one"]),
            ],
            Duration::from_secs(60),
        );

        let patterns: Vec<&str> = snapshot
            .entries()
            .iter()
            .map(|entry| entry.pattern.as_str())
            .collect();
        assert_eq!(patterns, vec!["/one", "/two", "/three"]);
        assert_eq!(snapshot.get("/one").map(|page| page.id.as_str()), Some("b"));
        assert_eq!(snapshot.get("/two").map(|page| page.id.as_str()), Some("a"));
    }

    #[test]
    fn snapshot_expires_after_ttl() {
        let snapshot = DirectorySnapshot::from_pages(vec![], Duration::from_secs(60));
        assert!(!snapshot.is_expired_at(snapshot.loaded_at()));
        assert!(snapshot.is_expired_at(snapshot.loaded_at() + Duration::from_secs(61)));
    }

    #[test]
    fn snapshot_survives_json_encoding() {
        let snapshot =
            DirectorySnapshot::from_pages(vec![page("a", &["/a"])], Duration::from_millis(1500));
        let value = serde_json::to_value(&snapshot).expect("encode");
        let decoded: DirectorySnapshot = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.ttl(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn snapshot_is_built_once_and_reused() {
        let content = Arc::new(FakeContent {
            pages: vec![page_record("blog", &["/blog/{slug}"], "t/blog.html")],
            ..FakeContent::default()
        });
        let cache = Arc::new(MemoryCacheStore::new());
        let directory = directory(Arc::clone(&content), Arc::clone(&cache));

        let first = directory
            .resolve(&ctx(), "/blog/hello", false)
            .await
            .expect("resolve")
            .expect("match");
        assert_eq!(first.page.id, "blog");
        assert_eq!(first.tokens.get("slug").map(String::as_str), Some("hello"));

        let second = directory
            .resolve(&ctx(), "/blog/other", false)
            .await
            .expect("resolve");
        assert!(second.is_some());
        assert_eq!(content.queries.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.read(&preloading_flag_key(&ctx())).await.expect("read"),
            None
        );
    }

    #[tokio::test]
    async fn same_path_resolves_identically_against_one_snapshot() {
        let content = Arc::new(FakeContent {
            pages: vec![
                page_record("post", &["/blog/{slug}"], "t/post.html"),
                page_record("blog", &["/blog/**"], "t/blog.html"),
            ],
            ..FakeContent::default()
        });
        let directory = directory(Arc::clone(&content), Arc::new(MemoryCacheStore::new()));

        let first = directory
            .resolve(&ctx(), "/blog/hello%20world", false)
            .await
            .expect("resolve")
            .expect("match");
        let second = directory
            .resolve(&ctx(), "/blog/hello%20world", false)
            .await
            .expect("resolve")
            .expect("match");

        assert_eq!(first, second);
        assert_eq!(first.pattern, "/blog/{slug}");
        assert_eq!(first.tokens.get("slug").map(String::as_str), Some("hello world"));
        assert_eq!(content.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let content = Arc::new(FakeContent {
            pages: vec![page_record("about", &["/about"], "t/about.html")],
            ..FakeContent::default()
        });
        let directory = directory(Arc::clone(&content), Arc::new(MemoryCacheStore::new()));

        directory.load(&ctx(), false).await.expect("load");
        directory.load(&ctx(), true).await.expect("load");
        assert_eq!(content.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_cold_loads_query_once() {
        let content = Arc::new(FakeContent {
            pages: vec![page_record("about", &["/about"], "t/about.html")],
            delay: Duration::from_millis(50),
            ..FakeContent::default()
        });
        let directory = Arc::new(directory(
            Arc::clone(&content),
            Arc::new(MemoryCacheStore::new()),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let directory = Arc::clone(&directory);
                tokio::spawn(async move { directory.resolve(&ctx(), "/about", false).await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            let matched = task.expect("join").expect("resolve").expect("match");
            assert_eq!(matched.page.id, "about");
        }
        assert_eq!(content.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_rebuild_clears_flag_and_next_call_retries() {
        let content = Arc::new(FakeContent {
            pages: vec![page_record("about", &["/about"], "t/about.html")],
            fail_next: AtomicBool::new(true),
            ..FakeContent::default()
        });
        let cache = Arc::new(MemoryCacheStore::new());
        let directory = directory(Arc::clone(&content), Arc::clone(&cache));

        let err = directory
            .load(&ctx(), false)
            .await
            .expect_err("first rebuild fails");
        assert!(matches!(err, DirectoryError::Rebuild { .. }));
        assert_eq!(
            cache.read(&preloading_flag_key(&ctx())).await.expect("read"),
            None
        );

        let snapshot = directory.load(&ctx(), false).await.expect("retry succeeds");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(content.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn waiter_times_out_when_flag_is_never_released() {
        let content = Arc::new(FakeContent::default());
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .write(
                &preloading_flag_key(&ctx()),
                Value::Bool(true),
                Some(Duration::from_secs(60)),
            )
            .await
            .expect("hold flag");
        let directory = directory(Arc::clone(&content), cache);

        let err = directory
            .load(&ctx(), false)
            .await
            .expect_err("should time out");
        assert!(matches!(err, DirectoryError::PreloadTimeout { .. }));
        assert_eq!(content.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_flag_holder_clears_the_flag() {
        let cache = Arc::new(MemoryCacheStore::new());
        let flag = preloading_flag_key(&ctx());
        cache
            .write(&flag, Value::Bool(true), Some(Duration::from_secs(60)))
            .await
            .expect("hold flag");

        drop(PreloadFlag::held(cache.clone(), flag.clone()));

        for _ in 0..50 {
            if cache.read(&flag).await.expect("read").is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("flag outlived its holder");
    }

    #[tokio::test]
    async fn waiter_picks_up_snapshot_written_by_flag_holder() {
        let content = Arc::new(FakeContent::default());
        let cache = Arc::new(MemoryCacheStore::new());
        let flag = preloading_flag_key(&ctx());
        cache
            .write(&flag, Value::Bool(true), Some(Duration::from_secs(60)))
            .await
            .expect("hold flag");

        let writer = Arc::clone(&cache);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let snapshot = DirectorySnapshot::from_pages(
                vec![page("remote", &["/remote"])],
                Duration::from_secs(60),
            );
            let value = serde_json::to_value(&snapshot).expect("encode");
            writer
                .write(&directory_slot_key(&ctx()), value, None)
                .await
                .expect("write");
        });

        let directory = directory(Arc::clone(&content), Arc::clone(&cache));
        let matched = directory
            .resolve(&ctx(), "/remote", false)
            .await
            .expect("resolve")
            .expect("match");
        assert_eq!(matched.page.id, "remote");
        assert_eq!(content.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn template_ids_are_resolved_and_unresolvable_pages_skipped() {
        let mut templates = HashMap::new();
        templates.insert(
            "tpl1".to_string(),
            ContentRecord::new("tpl1", TEMPLATE_TYPE).with_field("path", "templates/post.html"),
        );
        let content = Arc::new(FakeContent {
            pages: vec![
                page_record("post", &["/posts/{id}"], "tpl1"),
                page_record("orphan", &["/orphan"], "missing"),
                ContentRecord::new("no-uris", PAGE_TYPE).with_field("template", "t/x.html"),
            ],
            templates,
            ..FakeContent::default()
        });
        let directory = directory(content, Arc::new(MemoryCacheStore::new()));

        let snapshot = directory.load(&ctx(), false).await.expect("load");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get("/posts/{id}").map(|page| page.template_path.as_str()),
            Some("templates/post.html")
        );
    }

    #[tokio::test]
    async fn invalidate_host_only_clears_that_host() {
        let content = Arc::new(FakeContent {
            pages: vec![page_record("about", &["/about"], "t/about.html")],
            ..FakeContent::default()
        });
        let cache = Arc::new(MemoryCacheStore::new());
        let directory = directory(Arc::clone(&content), Arc::clone(&cache));
        let other = BranchContext::new("other.com", "repo", "master");

        directory.load(&ctx(), false).await.expect("load");
        directory.load(&other, false).await.expect("load");

        assert_eq!(directory.invalidate_host("example.com").await, vec![ctx()]);
        assert_eq!(
            cache.read(&directory_slot_key(&ctx())).await.expect("read"),
            None
        );
        assert!(
            cache
                .read(&directory_slot_key(&other))
                .await
                .expect("read")
                .is_some()
        );
        assert_eq!(directory.known_slots(), vec![other]);
    }

    #[tokio::test]
    async fn invalidate_branch_clears_every_host_on_it() {
        let content = Arc::new(FakeContent::default());
        let directory = directory(content, Arc::new(MemoryCacheStore::new()));
        directory.load(&ctx(), false).await.expect("load");
        directory
            .load(&BranchContext::new("b.com", "repo", "master"), false)
            .await
            .expect("load");
        directory
            .load(&BranchContext::new("b.com", "repo", "dev"), false)
            .await
            .expect("load");

        assert_eq!(directory.invalidate_branch("repo", "master").await.len(), 2);
        assert_eq!(directory.known_slots().len(), 1);
    }
}
