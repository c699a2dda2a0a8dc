use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use surrealdb::sql::Thing;
use uuid::Uuid;

use super::upload::RawUpload;
use super::StoredObject;

/// One unit of knowledge-base content: source-file metadata plus the result
/// of the most recent extraction attempt.
///
/// Invariants: `id` is unique across the item set; when `text` is absent,
/// `note` explains why; `text` always reflects the latest successful
/// extraction (overwritten, never appended).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KBItem {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub last_modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Base64-encoded source bytes for preview-capable formats under the
    /// configured size ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_payload: Option<String>,
    #[serde(default = "default_include")]
    pub include: bool,
}

fn default_include() -> bool {
    true
}

/// Partial update accepted by the repository; `None` fields are left as-is.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateKBItem {
    pub include: Option<bool>,
    pub text: Option<String>,
    pub note: Option<String>,
}

impl StoredObject for KBItem {
    fn table_name() -> &'static str {
        "kb_item"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

impl KBItem {
    pub fn from_upload(upload: &RawUpload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: upload.name.clone(),
            mime_type: upload.mime_type.clone(),
            size_bytes: upload.size_bytes,
            last_modified_at: upload.last_modified_at,
            created_at: Utc::now(),
            text: None,
            note: None,
            preview_payload: None,
            include: true,
        }
    }

    pub fn apply_update(&self, update: &UpdateKBItem) -> Self {
        let mut next = self.clone();
        if let Some(include) = update.include {
            next.include = include;
        }
        if let Some(text) = &update.text {
            next.text = Some(text.clone());
        }
        if let Some(note) = &update.note {
            next.note = Some(note.clone());
        }
        next
    }

    /// Validates a raw tier payload as a well-formed item collection.
    ///
    /// Returns `None` for anything that is not an array of KBItem-shaped
    /// objects with non-empty, unique ids; callers discard such payloads
    /// instead of surfacing them as data.
    pub fn validate_collection(payload: &serde_json::Value) -> Option<Vec<KBItem>> {
        if !payload.is_array() {
            return None;
        }

        let items: Vec<KBItem> = serde_json::from_value(payload.clone()).ok()?;

        let mut seen = std::collections::HashSet::with_capacity(items.len());
        for item in &items {
            if item.id.is_empty() || !seen.insert(item.id.as_str()) {
                return None;
            }
        }

        Some(items)
    }
}

struct FlexibleIdVisitor;

impl<'de> Visitor<'de> for FlexibleIdVisitor {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or a Thing")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value.to_string())
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        // SurrealDB hands record ids back as a Thing
        let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(thing.id.to_raw())
    }
}

fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(FlexibleIdVisitor)
}
