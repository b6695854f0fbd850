#![allow(dead_code)]

use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode},
};
use pagina::application::render::{RenderError, RenderModel, RenderOutput, Renderer};
use pagina::cache::{Broadcast, DependencyKey};
use pagina::config::{
    LogFormat, LoggingSettings, ServerSettings, Settings, StorageSettings, WcmSettings,
};
use pagina::domain::types::AppMode;
use pagina::infra::app::{self, Adapters, AppContext};
use pagina::infra::render::PlaceholderRenderer;
use tempfile::TempDir;
use tower::ServiceExt;
use tracing::level_filters::LevelFilter;

pub const HOST: &str = "example.com";

pub const BRANCH: &str = r#"
[[records]]
id = "blog"
_type = "wcm:page"
title = "Blog"
uris = ["/blog/{slug}"]
template = "tpl-blog"

[[records]]
id = "tpl-blog"
_type = "wcm:template"
path = "templates/blog.html"

[[records]]
id = "home"
_type = "wcm:page"
title = "Home"
uris = ["/"]
template = "templates/home.html"
"#;

/// Content, templates and artifacts for one worker, on disk.
pub struct Site {
    pub dir: TempDir,
}

impl Site {
    pub fn new() -> Self {
        let site = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        site.write_content(BRANCH);
        site.write_file(
            "web/templates/blog.html",
            "{{> partials/header.html }}<article>{{ page.title }}: {{ request.tokens.slug }}</article>",
        );
        site.write_file("web/templates/home.html", "<main>{{ page.title }}</main>");
        site.write_file("web/partials/header.html", "<header>{{ page.id }}</header>");
        site
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write_file(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, contents).expect("write");
    }

    pub fn write_content(&self, contents: &str) {
        self.write_file("content/site/master.toml", contents);
    }

    pub fn settings(&self, mode: AppMode) -> Settings {
        Settings {
            server: ServerSettings {
                addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                graceful_shutdown: Duration::from_secs(1),
            },
            logging: LoggingSettings {
                level: LevelFilter::WARN,
                format: LogFormat::Compact,
            },
            wcm: WcmSettings {
                enabled: true,
                cache: true,
                force_page_cache: false,
                mode,
                repository_id: "site".to_string(),
                branch_id: "master".to_string(),
                directory_ttl_seconds: None,
                page_ttl_seconds: NonZeroU64::new(3_600).expect("non-zero"),
                preload_flag_ttl_seconds: NonZeroU64::new(30).expect("non-zero"),
                preload_wait_ms: NonZeroU64::new(20).expect("non-zero"),
                preload_deadline_ms: NonZeroU64::new(2_000).expect("non-zero"),
            },
            storage: StorageSettings {
                content_dir: self.path("content"),
                artifact_dir: self.path("artifacts"),
                web_dir: self.path("web"),
            },
        }
    }
}

/// Placeholder renderer that counts how often it runs.
pub struct CountingRenderer {
    inner: PlaceholderRenderer,
    calls: AtomicUsize,
}

impl CountingRenderer {
    pub fn new(web_root: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: PlaceholderRenderer::new(web_root),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    async fn render(
        &self,
        template_path: &str,
        model: &RenderModel,
    ) -> Result<RenderOutput, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(template_path, model).await
    }
}

pub struct Worker {
    pub app: AppContext,
    pub renderer: Arc<CountingRenderer>,
    pub router: Router,
}

pub fn worker(site: &Site, mode: AppMode, broadcast: Arc<dyn Broadcast>) -> Worker {
    let settings = site.settings(mode);
    let renderer = CountingRenderer::new(&settings.storage.web_dir);
    let mut adapters = Adapters::from_settings(&settings, broadcast);
    adapters.renderer = renderer.clone();
    let app = app::build_with(&settings, adapters).expect("app context");
    let router = pagina::infra::http::build_router(app.http.clone());
    Worker {
        app,
        renderer,
        router,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("json body")
    }
}

pub async fn send(router: &Router, method: Method, uri: &str, body: &str) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", HOST)
        .body(Body::from(body.to_string()))
        .expect("request");

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");

    TestResponse {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).expect("utf-8 body"),
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    send(router, Method::GET, uri, "").await
}

pub async fn post(router: &Router, uri: &str, body: &str) -> TestResponse {
    send(router, Method::POST, uri, body).await
}

impl Worker {
    /// Number of renders tracked in this worker's dependency index.
    pub async fn cached_pages(&self) -> usize {
        self.app
            .page_cache
            .index()
            .page_count()
            .await
            .expect("page count")
    }

    /// Number of renders that declared `dependency`.
    pub async fn dependents(&self, dependency: &DependencyKey) -> usize {
        self.app
            .page_cache
            .index()
            .lookup(dependency)
            .await
            .expect("lookup")
            .len()
    }

    /// Poll until `expected` renders are tracked, or a second passes.
    pub async fn settles_at(&self, expected: usize) -> bool {
        for _ in 0..100 {
            if self.cached_pages().await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.cached_pages().await == expected
    }
}
