//! Shared domain enumerations and scoping identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment mode of the process.
///
/// Development mode is the authoring environment: page definitions change
/// often, so the directory refreshes quickly and the render cache stays off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    #[default]
    Development,
    Production,
}

impl AppMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AppMode::Development => "development",
            AppMode::Production => "production",
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, AppMode::Production)
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode `{}`", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for AppMode {
    type Err = UnknownMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(AppMode::Development),
            "production" | "prod" => Ok(AppMode::Production),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Tenant and version scope a request is served under.
///
/// Page directories and cached renders are partitioned by this context so
/// that content from different hosts, repositories or branches never mixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchContext {
    pub host: String,
    pub repository_id: String,
    pub branch_id: String,
}

impl BranchContext {
    pub fn new(
        host: impl Into<String>,
        repository_id: impl Into<String>,
        branch_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            repository_id: repository_id.into(),
            branch_id: branch_id.into(),
        }
    }

    pub fn is_branch(&self, repository_id: &str, branch_id: &str) -> bool {
        self.repository_id == repository_id && self.branch_id == branch_id
    }
}
