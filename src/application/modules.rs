//! Module lifecycle commands.
//!
//! Deploying, undeploying, redeploying or refreshing a module changes what a
//! host serves, so every command finishes by invalidating the host's page
//! directories locally and on every peer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::application::repos::{ByteStore, StoreError};
use crate::cache::{InvalidationCoordinator, ModuleCommand};

const PRODUCTION_ENTRY_POINT: &str = "index-prod.js";
const ENTRY_POINT: &str = "index.js";

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("{0}")]
    Invalid(String),
    #[error("module deployment failed: {0}")]
    Deploy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModuleError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ModuleError::Invalid(_) | ModuleError::Store(StoreError::InvalidPath { .. })
        )
    }
}

/// Where a module's code lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub uri: String,
    pub path: String,
}

impl ModuleSource {
    /// Validate a deploy payload of the form `{"source": {"type", "uri", "path"}}`.
    ///
    /// `path` defaults to `/`.
    pub fn from_config(config: Option<&Value>) -> Result<Self, ModuleError> {
        let config = config
            .filter(|value| !value.is_null())
            .ok_or_else(|| ModuleError::invalid("Missing module config argument"))?;
        let source = config
            .get("source")
            .filter(|value| value.is_object())
            .ok_or_else(|| ModuleError::invalid("Missing module config source settings"))?;

        let source_type = non_empty(source, "type").ok_or_else(|| {
            ModuleError::invalid("The source descriptor is missing the module 'type' field")
        })?;
        let uri = non_empty(source, "uri").ok_or_else(|| {
            ModuleError::invalid("The source descriptor is missing the module 'uri' field")
        })?;
        let path = non_empty(source, "path").unwrap_or("/");

        Ok(Self {
            source_type: source_type.to_string(),
            uri: uri.to_string(),
            path: path.to_string(),
        })
    }
}

fn non_empty<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Module ids become path segments, so only a conservative alphabet is
/// accepted.
pub fn validate_module_id(module_id: Option<&str>) -> Result<&str, ModuleError> {
    let module_id = module_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ModuleError::invalid("Missing module `id` argument"))?;

    let valid = module_id != "."
        && module_id != ".."
        && module_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(ModuleError::invalid(format!(
            "Module id `{module_id}` contains unsupported characters"
        )));
    }
    Ok(module_id)
}

/// Installs and removes module code for a host.
#[async_trait]
pub trait ModuleDeployer: Send + Sync {
    async fn deploy(
        &self,
        host: &str,
        module_id: &str,
        source: &ModuleSource,
    ) -> Result<(), ModuleError>;

    async fn undeploy(&self, host: &str, module_id: &str) -> Result<(), ModuleError>;
}

/// Byte store prefix holding everything deployed for one module.
pub fn module_root(host: &str, module_id: &str) -> String {
    format!("modules/{host}/{module_id}")
}

#[derive(Clone)]
pub struct ModuleService {
    deployer: Arc<dyn ModuleDeployer>,
    coordinator: Arc<InvalidationCoordinator>,
    assets: Arc<dyn ByteStore>,
    production: bool,
}

impl ModuleService {
    pub fn new(
        deployer: Arc<dyn ModuleDeployer>,
        coordinator: Arc<InvalidationCoordinator>,
        assets: Arc<dyn ByteStore>,
        production: bool,
    ) -> Self {
        Self {
            deployer,
            coordinator,
            assets,
            production,
        }
    }

    #[instrument(skip(self, config))]
    pub async fn deploy(
        &self,
        host: &str,
        module_id: Option<&str>,
        config: Option<&Value>,
    ) -> Result<(), ModuleError> {
        let module_id = validate_module_id(module_id)?;
        let source = ModuleSource::from_config(config)?;

        let result = self.deployer.deploy(host, module_id, &source).await;
        self.finish(ModuleCommand::Deploy, host, module_id, result).await
    }

    #[instrument(skip(self))]
    pub async fn undeploy(&self, host: &str, module_id: Option<&str>) -> Result<(), ModuleError> {
        let module_id = validate_module_id(module_id)?;

        let result = self.deployer.undeploy(host, module_id).await;
        self.finish(ModuleCommand::Undeploy, host, module_id, result).await
    }

    /// Undeploy and deploy again. The payload is validated before anything is
    /// removed.
    #[instrument(skip(self, config))]
    pub async fn redeploy(
        &self,
        host: &str,
        module_id: Option<&str>,
        config: Option<&Value>,
    ) -> Result<(), ModuleError> {
        let module_id = validate_module_id(module_id)?;
        let source = ModuleSource::from_config(config)?;

        let result = match self.deployer.undeploy(host, module_id).await {
            Ok(()) => self.deployer.deploy(host, module_id, &source).await,
            Err(err) => Err(err),
        };
        self.finish(ModuleCommand::Redeploy, host, module_id, result).await
    }

    #[instrument(skip(self))]
    pub async fn refresh(&self, host: &str) -> Result<(), ModuleError> {
        self.coordinator
            .module_changed(ModuleCommand::Refresh, host)
            .await;
        info!(host, command = %ModuleCommand::Refresh, "Module command applied");
        Ok(())
    }

    /// A deployed module file. In production `index.js` is served from
    /// `index-prod.js` when the module ships one.
    pub async fn asset(
        &self,
        host: &str,
        module_id: &str,
        path: &str,
    ) -> Result<Option<Bytes>, ModuleError> {
        let module_id = validate_module_id(Some(module_id))?;
        let root = module_root(host, module_id);

        if self.production && path == ENTRY_POINT {
            let production_path = format!("{root}/{PRODUCTION_ENTRY_POINT}");
            if self.assets.exists_file(&production_path).await? {
                return Ok(self.assets.read_file(&production_path).await?);
            }
        }

        let path = path.trim_start_matches('/');
        Ok(self.assets.read_file(&format!("{root}/{path}")).await?)
    }

    /// Invalidate the host whatever the deployer reported.
    async fn finish(
        &self,
        command: ModuleCommand,
        host: &str,
        module_id: &str,
        result: Result<(), ModuleError>,
    ) -> Result<(), ModuleError> {
        self.coordinator.module_changed(command, host).await;
        match &result {
            Ok(()) => info!(host, module_id, command = %command, "Module command applied"),
            Err(err) => warn!(host, module_id, command = %command, error = %err, "Module command failed"),
        }
        result
    }
}
