use std::path::Path;

use serde::Deserialize;

use crate::error::{OcfError, Result};
use crate::format::DEFAULT_BUFFER_SIZE;
use crate::schema::Schema;

/// Runtime configuration handed to a record reader at `initialize`.
///
/// Loadable from JSON, with schemas embedded as schema JSON:
///
/// ```json
/// { "key_schema": "string", "value_schema": {"type": "int"}, "buffer_size": 8192 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Schema of the key field, or of the whole record for key-only readers.
    pub key_schema: Schema,
    /// Schema of the value field; required by key/value readers.
    #[serde(default)]
    pub value_schema: Option<Schema>,
    /// Bytes of read buffer in front of the byte source.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl ReaderConfig {
    pub fn key_value(key_schema: Schema, value_schema: Schema) -> Self {
        Self {
            key_schema,
            value_schema: Some(value_schema),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn key_only(key_schema: Schema) -> Self {
        Self {
            key_schema,
            value_schema: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| OcfError::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub(crate) fn require_value_schema(&self) -> Result<&Schema> {
        self.value_schema
            .as_ref()
            .ok_or_else(|| OcfError::Config("key/value reader needs a value_schema".into()))
    }
}
