//! Page definitions and the view handed to the renderer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::entities::ContentRecord;
use crate::domain::error::DomainError;

const ENTITY: &str = "page";

/// How a page refers to its template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    /// A literal template path inside the web store.
    Path(String),
    /// The id of a template record whose `path` must be looked up.
    Id(String),
}

impl TemplateRef {
    pub fn parse(value: &str) -> Self {
        if value.contains('/') {
            TemplateRef::Path(value.to_string())
        } else {
            TemplateRef::Id(value.to_string())
        }
    }
}

/// A page record that routes somewhere but whose template may still need
/// resolving.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDefinition {
    pub id: String,
    pub title: Option<String>,
    pub uris: Vec<String>,
    pub template: TemplateRef,
    pub fields: Map<String, Value>,
}

impl PageDefinition {
    /// Interpret a `wcm:page` record.
    ///
    /// Records without a template or without URIs are not routable and yield
    /// `Ok(None)`. Records whose fields have the wrong shape are rejected.
    pub fn from_record(record: &ContentRecord) -> Result<Option<Self>, DomainError> {
        let template = match record.field("template") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(template)) if template.is_empty() => return Ok(None),
            Some(Value::String(template)) => TemplateRef::parse(template),
            Some(_) => {
                return Err(DomainError::invalid_record(
                    ENTITY,
                    &record.id,
                    "`template` must be a string",
                ));
            }
        };

        let uris = match record.field("uris") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| {
                    value.as_str().map(str::to_string).ok_or_else(|| {
                        DomainError::invalid_record(ENTITY, &record.id, "`uris` must hold strings")
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(DomainError::invalid_record(
                    ENTITY,
                    &record.id,
                    "`uris` must be an array",
                ));
            }
        };
        if uris.is_empty() {
            return Ok(None);
        }

        let title = record
            .str_field("title")
            .filter(|title| !title.is_empty())
            .map(str::to_string);

        Ok(Some(Self {
            id: record.id.clone(),
            title,
            uris,
            template,
            fields: record.fields.clone(),
        }))
    }

    pub fn resolve(self, template_path: impl Into<String>) -> Page {
        Page {
            id: self.id,
            title: self.title,
            uris: self.uris,
            template_path: template_path.into(),
            fields: self.fields,
        }
    }
}

/// A routable page whose template path is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub title: Option<String>,
    pub uris: Vec<String>,
    pub template_path: String,
    pub fields: Map<String, Value>,
}

impl Page {
    /// Title used in descriptors; falls back to the id.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    pub fn view(&self) -> PageView {
        PageView::from_page(self)
    }
}

/// Page data exposed to templates.
///
/// Underscore-prefixed fields and the resolved template path stay internal;
/// `id` and `_doc` both carry the page id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PageView(Map<String, Value>);

impl PageView {
    pub fn from_page(page: &Page) -> Self {
        let mut fields: Map<String, Value> = page
            .fields
            .iter()
            .filter(|(key, _)| !key.starts_with('_') && key.as_str() != "templatePath")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        fields.insert("id".to_string(), Value::String(page.id.clone()));
        fields.insert("_doc".to_string(), Value::String(page.id.clone()));
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}
