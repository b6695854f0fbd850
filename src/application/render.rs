//! Rendering interface used by the page pipeline.
//!
//! The template language itself lives behind [`Renderer`]; the pipeline only
//! builds the model, hands it over, and keeps the output together with the
//! dependency keys the renderer reports.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::cache::DependencyKey;
use crate::domain::pages::{Page, PageView};
use crate::domain::pattern::Tokens;

/// Template location as seen by templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateInfo {
    pub path: String,
}

/// Request data as seen by templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub tokens: Tokens,
    pub matching_path: String,
}

/// Model handed to the renderer for a matched page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderModel {
    pub page: PageView,
    pub template: TemplateInfo,
    pub request: RequestInfo,
}

impl RenderModel {
    pub fn for_page(page: &Page, tokens: &Tokens, matching_path: &str) -> Self {
        Self {
            page: page.view(),
            template: TemplateInfo {
                path: page.template_path.clone(),
            },
            request: RequestInfo {
                tokens: tokens.clone(),
                matching_path: matching_path.to_string(),
            },
        }
    }
}

/// Rendered text plus the data keys that influenced it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderOutput {
    pub text: String,
    pub dependencies: Vec<DependencyKey>,
}

impl RenderOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: DependencyKey) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("template `{path}` not found")]
    TemplateNotFound { path: String },
    #[error("template `{path}` failed to render: {message}")]
    Template { path: String, message: String },
    #[error("template store error: {0}")]
    Store(String),
}

impl RenderError {
    pub fn template(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        template_path: &str,
        model: &RenderModel,
    ) -> Result<RenderOutput, RenderError>;
}
