//! Field mapping between typed entities and stored documents

use serde_json::Value;

use crate::engine::Document;
use crate::entity::Entity;
use crate::{Error, Result};

/// Per-store mapping strategy, applied to document bodies on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapper {
    /// Keep `null` members in stored bodies
    pub serialize_nulls: bool,
    /// Trim leading/trailing whitespace of string members
    pub trim_whitespace: bool,
    /// Store empty strings as `null` (after trimming)
    pub empty_string_to_null: bool,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self {
            serialize_nulls: true,
            trim_whitespace: false,
            empty_string_to_null: false,
        }
    }
}

impl FieldMapper {
    pub fn is_identity(&self) -> bool {
        self.serialize_nulls && !self.trim_whitespace && !self.empty_string_to_null
    }

    /// The document key is the id of the entity as it will read back, so a
    /// trimmed id and its row key never disagree.
    pub fn encode<T: Entity>(&self, item: &T) -> Result<Document> {
        if item.id().is_empty() {
            return Err(Error::MissingId);
        }

        let mut body = serde_json::to_value(item)?;
        if self.is_identity() {
            return Ok(Document::new(item.id(), body));
        }

        self.normalize(&mut body);
        let stored = T::deserialize(&body)?;
        if stored.id().is_empty() {
            return Err(Error::MissingId);
        }
        Ok(Document::new(stored.id(), body))
    }

    pub fn decode<T: Entity>(&self, doc: &Document) -> Result<T> {
        Ok(T::deserialize(&doc.body)?)
    }

    fn normalize(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for member in map.values_mut() {
                    self.normalize(member);
                }
                if !self.serialize_nulls {
                    map.retain(|_, v| !v.is_null());
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.normalize(item);
                }
            }
            Value::String(s) => {
                if self.trim_whitespace {
                    let trimmed = s.trim();
                    if trimmed.len() != s.len() {
                        *s = trimmed.to_string();
                    }
                }
                if self.empty_string_to_null && s.is_empty() {
                    *value = Value::Null;
                }
            }
            _ => {}
        }
    }
}
