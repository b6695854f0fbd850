//! Byte-store module deployer.
//!
//! Records the module source descriptor under the module's root instead of
//! checking code out of source control.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::application::modules::{ModuleDeployer, ModuleError, ModuleSource, module_root};
use crate::application::repos::{ByteStore, StoreError};

const DESCRIPTOR_FILE: &str = "module.json";

pub struct StoredModuleDeployer {
    bytes: Arc<dyn ByteStore>,
}

impl StoredModuleDeployer {
    pub fn new(bytes: Arc<dyn ByteStore>) -> Self {
        Self { bytes }
    }

    pub fn descriptor_path(host: &str, module_id: &str) -> String {
        format!("{}/{DESCRIPTOR_FILE}", module_root(host, module_id))
    }

    /// Source recorded for a deployed module.
    pub async fn deployed_source(
        &self,
        host: &str,
        module_id: &str,
    ) -> Result<Option<ModuleSource>, ModuleError> {
        let path = Self::descriptor_path(host, module_id);
        let Some(bytes) = self.bytes.read_file(&path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::decode(path, err).into())
    }
}

#[async_trait]
impl ModuleDeployer for StoredModuleDeployer {
    async fn deploy(
        &self,
        host: &str,
        module_id: &str,
        source: &ModuleSource,
    ) -> Result<(), ModuleError> {
        let payload = serde_json::to_vec_pretty(source)
            .map_err(|err| ModuleError::Deploy(err.to_string()))?;
        let path = Self::descriptor_path(host, module_id);
        self.bytes.write_file(&path, Bytes::from(payload)).await?;
        debug!(host, module_id, path = %path, "Recorded module source");
        Ok(())
    }

    async fn undeploy(&self, host: &str, module_id: &str) -> Result<(), ModuleError> {
        let path = Self::descriptor_path(host, module_id);
        let removed = self.bytes.delete_file(&path).await?;
        debug!(host, module_id, removed, "Removed module source");
        Ok(())
    }
}
