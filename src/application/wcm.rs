//! Page pipeline: resolve, look up the render cache, render, store.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::histogram;
use tracing::{debug, instrument, warn};

use crate::application::render::{RenderError, RenderModel, Renderer};
use crate::cache::{DependencyKey, PageCache, PageDirectory, PageMatch};
use crate::domain::descriptor::{IncomingRequest, RequestDescriptor};
use crate::domain::types::BranchContext;

const METRIC_RENDER_MS: &str = "pagina_render_ms";

/// What the pipeline did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WcmOutcome {
    /// No page serves the path, or the directory could not be loaded.
    NotHandled,
    /// Served from the render cache.
    Cached(Bytes),
    /// Rendered for this request.
    Rendered(Bytes),
}

impl WcmOutcome {
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            WcmOutcome::NotHandled => None,
            WcmOutcome::Cached(body) | WcmOutcome::Rendered(body) => Some(body),
        }
    }
}

#[derive(Clone)]
pub struct WcmService {
    directory: Arc<PageDirectory>,
    page_cache: Arc<PageCache>,
    renderer: Arc<dyn Renderer>,
    enabled: bool,
}

impl WcmService {
    pub fn new(
        directory: Arc<PageDirectory>,
        page_cache: Arc<PageCache>,
        renderer: Arc<dyn Renderer>,
        enabled: bool,
    ) -> Self {
        Self {
            directory,
            page_cache,
            renderer,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Serve `request` from the page directory.
    ///
    /// Only render failures are errors; everything else that prevents serving
    /// hands the request back as [`WcmOutcome::NotHandled`].
    #[instrument(skip(self, ctx, request), fields(host = %ctx.host, path = %request.path))]
    pub async fn handle(
        &self,
        ctx: &BranchContext,
        request: &IncomingRequest,
    ) -> Result<WcmOutcome, RenderError> {
        if !self.enabled {
            return Ok(WcmOutcome::NotHandled);
        }

        let found = match self
            .directory
            .resolve(ctx, &request.path, request.invalidate)
            .await
        {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "Page directory unavailable; passing request on");
                return Ok(WcmOutcome::NotHandled);
            }
        };

        let Some(PageMatch {
            pattern,
            tokens,
            page,
        }) = found
        else {
            debug!("No page matches path");
            return Ok(WcmOutcome::NotHandled);
        };

        let descriptor = RequestDescriptor::new(request, &pattern, &tokens, &page);
        if let Some(bytes) = self.page_cache.read(ctx, &descriptor).await {
            return Ok(WcmOutcome::Cached(bytes));
        }

        let model = RenderModel::for_page(&page, &tokens, &pattern);
        let started = Instant::now();
        let output = self.renderer.render(&page.template_path, &model).await?;
        histogram!(METRIC_RENDER_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(page = %page.id, pattern = %pattern, "Rendered page");

        let body = Bytes::from(output.text);
        let dependencies = output.dependencies.into_iter().chain([
            DependencyKey::node(&page.id),
            DependencyKey::template(&page.template_path),
        ]);
        if let Err(err) = self
            .page_cache
            .write(ctx, &descriptor, body.clone(), dependencies)
            .await
        {
            warn!(page = %page.id, error = %err, "Failed to cache rendered page");
        }

        Ok(WcmOutcome::Rendered(body))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::application::render::RenderOutput;
    use crate::application::repos::{ContentStore, StoreError};
    use crate::cache::{StoredDependencyIndex, WcmConfig};
    use crate::domain::entities::{ContentRecord, PAGE_TYPE};
    use crate::domain::types::AppMode;
    use crate::infra::files::FileByteStore;
    use crate::infra::store::MemoryCacheStore;

    struct BlogContent {
        offline: bool,
    }

    #[async_trait]
    impl ContentStore for BlogContent {
        async fn query_by_type(
            &self,
            _ctx: &BranchContext,
            _type_qname: &str,
        ) -> Result<Vec<ContentRecord>, StoreError> {
            if self.offline {
                return Err(StoreError::from_backend("offline"));
            }
            Ok(vec![
                ContentRecord::new("blog", PAGE_TYPE)
                    .with_field("uris", json!(["/blog/{slug}"]))
                    .with_field("template", "t/blog.html")
                    .with_field("title", "Blog"),
            ])
        }

        async fn read_record(
            &self,
            _ctx: &BranchContext,
            _id: &str,
        ) -> Result<Option<ContentRecord>, StoreError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render(
            &self,
            template_path: &str,
            model: &RenderModel,
        ) -> Result<RenderOutput, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(RenderError::template(template_path, "unexpected token"));
            }
            let slug = model.request.tokens.get("slug").cloned().unwrap_or_default();
            Ok(RenderOutput::new(format!("<h1>{slug}</h1>"))
                .with_dependency(DependencyKey::node("author-1")))
        }
    }

    struct Fixture {
        service: WcmService,
        renderer: Arc<CountingRenderer>,
        page_cache: Arc<PageCache>,
        _dir: TempDir,
    }

    fn fixture(mode: AppMode, offline: bool) -> Fixture {
        let config = WcmConfig {
            cache: true,
            mode,
            ..WcmConfig::default()
        };
        let dir = TempDir::new().expect("tempdir");
        let directory = Arc::new(PageDirectory::new(
            Arc::new(BlogContent { offline }),
            Arc::new(MemoryCacheStore::new()),
            config.clone(),
        ));
        let bytes = Arc::new(FileByteStore::new(dir.path()));
        let page_cache = Arc::new(PageCache::new(
            bytes.clone(),
            Arc::new(StoredDependencyIndex::new(bytes)),
            &config,
        ));
        let renderer = Arc::new(CountingRenderer::default());
        let service = WcmService::new(directory, page_cache.clone(), renderer.clone(), true);
        Fixture {
            service,
            renderer,
            page_cache,
            _dir: dir,
        }
    }

    fn ctx() -> BranchContext {
        BranchContext::new("example.com", "repo", "master")
    }

    fn request(path: &str) -> IncomingRequest {
        IncomingRequest::new("http", "example.com", path)
    }

    #[tokio::test]
    async fn production_renders_once_then_serves_cache() {
        let fx = fixture(AppMode::Production, false);

        let first = fx.service.handle(&ctx(), &request("/blog/first")).await.expect("first");
        assert_eq!(first, WcmOutcome::Rendered(Bytes::from_static(b"<h1>first</h1>")));

        let second = fx.service.handle(&ctx(), &request("/blog/first")).await.expect("second");
        assert_eq!(second, WcmOutcome::Cached(Bytes::from_static(b"<h1>first</h1>")));
        assert_eq!(fx.renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn render_records_page_template_and_reported_dependencies() {
        let fx = fixture(AppMode::Production, false);
        fx.service.handle(&ctx(), &request("/blog/first")).await.expect("render");

        let index = fx.page_cache.index();
        for dep in [
            DependencyKey::node("blog"),
            DependencyKey::template("t/blog.html"),
            DependencyKey::node("author-1"),
        ] {
            let dependents = index.lookup(&dep).await.expect("lookup");
            assert_eq!(dependents.len(), 1, "missing {dep}");
        }
    }

    #[tokio::test]
    async fn development_always_renders() {
        let fx = fixture(AppMode::Development, false);
        for _ in 0..2 {
            let outcome = fx.service.handle(&ctx(), &request("/blog/a")).await.expect("render");
            assert!(matches!(outcome, WcmOutcome::Rendered(_)));
        }
        assert_eq!(fx.renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unmatched_path_is_not_handled() {
        let fx = fixture(AppMode::Production, false);
        let outcome = fx.service.handle(&ctx(), &request("/about")).await.expect("outcome");
        assert_eq!(outcome, WcmOutcome::NotHandled);
        assert_eq!(fx.renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn directory_failure_is_not_handled() {
        let fx = fixture(AppMode::Production, true);
        let outcome = fx.service.handle(&ctx(), &request("/blog/a")).await.expect("outcome");
        assert_eq!(outcome, WcmOutcome::NotHandled);
    }

    #[tokio::test]
    async fn render_failure_propagates_and_caches_nothing() {
        let fx = fixture(AppMode::Production, false);
        fx.renderer.fail.store(true, Ordering::SeqCst);

        let err = fx
            .service
            .handle(&ctx(), &request("/blog/a"))
            .await
            .expect_err("render fails");
        assert!(matches!(err, RenderError::Template { .. }));
        assert_eq!(fx.page_cache.index().page_count().await.expect("count"), 0);
    }
}
