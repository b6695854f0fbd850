//! Wiring of stores, caches and services into a runnable application.

use std::sync::Arc;

use crate::application::error::AppError;
use crate::application::modules::{ModuleDeployer, ModuleService};
use crate::application::render::Renderer;
use crate::application::repos::{ByteStore, CacheStore, ContentStore};
use crate::application::wcm::WcmService;
use crate::cache::{
    Broadcast, DependencyStore, InvalidationCoordinator, PageCache, PageDirectory,
    StoredDependencyIndex, WcmConfig,
};
use crate::config::Settings;
use crate::domain::types::BranchContext;
use crate::infra::content::FileContentStore;
use crate::infra::files::FileByteStore;
use crate::infra::http::HttpState;
use crate::infra::modules::StoredModuleDeployer;
use crate::infra::render::PlaceholderRenderer;
use crate::infra::store::MemoryCacheStore;

/// Everything one worker process serves with.
#[derive(Clone)]
pub struct AppContext {
    pub http: HttpState,
    pub coordinator: Arc<InvalidationCoordinator>,
    pub directory: Arc<PageDirectory>,
    pub page_cache: Arc<PageCache>,
}

impl AppContext {
    /// Branch served for `host` under the configured repository.
    pub fn context_for(&self, host: &str) -> BranchContext {
        self.http.context_for(host)
    }
}

/// Adapters the application is assembled from.
pub struct Adapters {
    pub content: Arc<dyn ContentStore>,
    pub cache: Arc<dyn CacheStore>,
    pub bytes: Arc<dyn ByteStore>,
    pub dependencies: Arc<dyn DependencyStore>,
    pub renderer: Arc<dyn Renderer>,
    pub deployer: Arc<dyn ModuleDeployer>,
    pub broadcast: Arc<dyn Broadcast>,
}

impl Adapters {
    /// File-backed adapters rooted at the configured storage directories.
    ///
    /// Dependency records share the artifact store, so every worker pointed
    /// at the same directory can evict every other worker's renders.
    pub fn from_settings(settings: &Settings, broadcast: Arc<dyn Broadcast>) -> Self {
        let bytes: Arc<dyn ByteStore> =
            Arc::new(FileByteStore::new(settings.storage.artifact_dir.clone()));
        Self {
            content: Arc::new(FileContentStore::new(settings.storage.content_dir.clone())),
            cache: Arc::new(MemoryCacheStore::new()),
            deployer: Arc::new(StoredModuleDeployer::new(bytes.clone())),
            dependencies: Arc::new(StoredDependencyIndex::new(bytes.clone())),
            bytes,
            renderer: Arc::new(PlaceholderRenderer::new(settings.storage.web_dir.clone())),
            broadcast,
        }
    }
}

pub fn build(settings: &Settings, broadcast: Arc<dyn Broadcast>) -> Result<AppContext, AppError> {
    build_with(settings, Adapters::from_settings(settings, broadcast))
}

pub fn build_with(settings: &Settings, adapters: Adapters) -> Result<AppContext, AppError> {
    if settings.wcm.repository_id.is_empty() || settings.wcm.branch_id.is_empty() {
        return Err(AppError::validation(
            "wcm.repository_id and wcm.branch_id must be set",
        ));
    }

    let config = WcmConfig::from(&settings.wcm);
    let directory = Arc::new(PageDirectory::new(
        adapters.content,
        adapters.cache,
        config.clone(),
    ));
    let page_cache = Arc::new(PageCache::new(
        adapters.bytes.clone(),
        adapters.dependencies,
        &config,
    ));
    let coordinator = Arc::new(InvalidationCoordinator::new(
        directory.clone(),
        page_cache.clone(),
        adapters.broadcast,
    ));

    let wcm = Arc::new(WcmService::new(
        directory.clone(),
        page_cache.clone(),
        adapters.renderer,
        config.enabled,
    ));
    let modules = Arc::new(ModuleService::new(
        adapters.deployer,
        coordinator.clone(),
        adapters.bytes,
        config.mode.is_production(),
    ));

    let http = HttpState {
        wcm,
        modules,
        repository_id: Arc::from(settings.wcm.repository_id.as_str()),
        branch_id: Arc::from(settings.wcm.branch_id.as_str()),
    };

    Ok(AppContext {
        http,
        coordinator,
        directory,
        page_cache,
    })
}
