//! Placeholder template renderer.
//!
//! Templates are plain text files under the web root. `{{ a.b.c }}` is
//! replaced with the HTML-escaped value at that path of the render model and
//! `{{> path/to/partial.html }}` inlines another template. Every partial is
//! reported as a dependency of the render.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::fs;

use crate::application::render::{RenderError, RenderModel, RenderOutput, Renderer};
use crate::cache::DependencyKey;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const MAX_PARTIAL_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct PlaceholderRenderer {
    web_root: PathBuf,
}

impl PlaceholderRenderer {
    pub fn new(web_root: impl Into<PathBuf>) -> Self {
        Self {
            web_root: web_root.into(),
        }
    }

    async fn read_template(&self, template_path: &str) -> Result<String, RenderError> {
        let relative = Path::new(template_path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(RenderError::TemplateNotFound {
                path: template_path.to_string(),
            });
        }

        match fs::read_to_string(self.web_root.join(relative)).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(RenderError::TemplateNotFound {
                    path: template_path.to_string(),
                })
            }
            Err(err) => Err(RenderError::Store(err.to_string())),
        }
    }

    fn expand<'a>(
        &'a self,
        template_path: &'a str,
        model: &'a Value,
        depth: usize,
        output: &'a mut RenderOutput,
    ) -> BoxFuture<'a, Result<(), RenderError>> {
        Box::pin(async move {
            if depth > MAX_PARTIAL_DEPTH {
                return Err(RenderError::template(
                    template_path,
                    format!("partials nested deeper than {MAX_PARTIAL_DEPTH}"),
                ));
            }

            let source = self.read_template(template_path).await?;
            let mut rest = source.as_str();
            while let Some(start) = rest.find(OPEN) {
                output.text.push_str(&rest[..start]);
                let after_open = &rest[start + OPEN.len()..];
                let end = after_open.find(CLOSE).ok_or_else(|| {
                    RenderError::template(template_path, "unclosed `{{` placeholder")
                })?;
                let tag = after_open[..end].trim();
                rest = &after_open[end + CLOSE.len()..];

                if let Some(partial) = tag.strip_prefix('>') {
                    let partial = partial.trim();
                    output.dependencies.push(DependencyKey::template(partial));
                    self.expand(partial, model, depth + 1, output).await?;
                } else {
                    push_escaped(&mut output.text, &display(lookup(model, tag)));
                }
            }
            output.text.push_str(rest);
            Ok(())
        })
    }
}

#[async_trait]
impl Renderer for PlaceholderRenderer {
    async fn render(
        &self,
        template_path: &str,
        model: &RenderModel,
    ) -> Result<RenderOutput, RenderError> {
        let model = serde_json::to_value(model)
            .map_err(|err| RenderError::template(template_path, err.to_string()))?;
        let mut output = RenderOutput::default();
        self.expand(template_path, &model, 0, &mut output).await?;
        Ok(output)
    }
}

fn lookup<'a>(model: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(model, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
