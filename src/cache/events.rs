//! Invalidation messages exchanged between worker processes.
//!
//! Every message travels inside an [`InvalidationEnvelope`] that carries a
//! unique id for idempotency and the id of the originating worker so a
//! worker can skip its own broadcasts.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Topic carrying content node changes.
pub const NODE_INVALIDATION_TOPIC: &str = "node_invalidation";
/// Topic carrying module lifecycle changes.
pub const MODULE_INVALIDATION_TOPIC: &str = "module-invalidation-topic";

/// Module lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCommand {
    Deploy,
    Undeploy,
    Redeploy,
    Refresh,
}

impl ModuleCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleCommand::Deploy => "deploy",
            ModuleCommand::Undeploy => "undeploy",
            ModuleCommand::Redeploy => "redeploy",
            ModuleCommand::Refresh => "refresh",
        }
    }
}

impl fmt::Display for ModuleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvalidationMessage {
    /// A content node was written or deleted on a branch.
    #[serde(rename_all = "camelCase")]
    Node {
        node_id: String,
        branch_id: String,
        repository_id: String,
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// A module was deployed, undeployed or refreshed for a host.
    Module { command: ModuleCommand, host: String },
}

impl InvalidationMessage {
    pub fn node(
        node_id: impl Into<String>,
        repository_id: impl Into<String>,
        branch_id: impl Into<String>,
    ) -> Self {
        InvalidationMessage::Node {
            node_id: node_id.into(),
            branch_id: branch_id.into(),
            repository_id: repository_id.into(),
            reference: None,
        }
    }

    pub fn module(command: ModuleCommand, host: impl Into<String>) -> Self {
        InvalidationMessage::Module {
            command,
            host: host.into(),
        }
    }

    /// Broadcast topic the message belongs on.
    pub fn topic(&self) -> &'static str {
        match self {
            InvalidationMessage::Node { .. } => NODE_INVALIDATION_TOPIC,
            InvalidationMessage::Module { .. } => MODULE_INVALIDATION_TOPIC,
        }
    }
}

/// A message plus the metadata needed to deliver it exactly once per worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEnvelope {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Worker that published the message.
    pub origin: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: InvalidationMessage,
}

impl InvalidationEnvelope {
    pub fn new(origin: Uuid, message: InvalidationMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            timestamp: OffsetDateTime::now_utc(),
            message,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.message.topic()
    }
}
