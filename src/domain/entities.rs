//! Domain entities mirrored from the content store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content type of page definitions.
pub const PAGE_TYPE: &str = "wcm:page";
/// Content type of templates referenced by id.
pub const TEMPLATE_TYPE: &str = "wcm:template";

/// A schemaless record as returned by the content store.
///
/// Every record carries an id and a type; everything else is kept verbatim in
/// `fields` so page definitions can expose arbitrary data to templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    #[serde(rename = "_type")]
    pub type_qname: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ContentRecord {
    pub fn new(id: impl Into<String>, type_qname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_qname: type_qname.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Repository path of the record, when it has one.
    pub fn path(&self) -> Option<&str> {
        self.str_field("path").filter(|path| !path.is_empty())
    }
}
