use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore, PutPayload};
use tracing::debug;

use crate::error::AppError;
use crate::storage::types::kb_item::KBItem;

/// Namespaced key under which the item collection is stored as one
/// JSON-encoded array.
const ITEMS_KEY: &str = "pensum/kb_items.json";

/// A key-value storage tier holding the whole item collection under a single
/// namespaced key. Backed by the local filesystem for the durable tier and by
/// process memory for the session-scoped backup of the same payload.
#[derive(Clone)]
pub struct KvTier {
    store: Arc<dyn ObjectStore>,
    key: ObjPath,
    label: &'static str,
}

impl KvTier {
    /// Durable local tier rooted in the configured data directory.
    pub fn durable(data_dir: &str) -> Result<Self, AppError> {
        std::fs::create_dir_all(data_dir)?;
        let store = LocalFileSystem::new_with_prefix(data_dir)?;
        Ok(Self {
            store: Arc::new(store),
            key: ObjPath::from(ITEMS_KEY),
            label: "kv",
        })
    }

    /// Session-scoped in-memory backup carrying the same payload as the
    /// durable tier, so a copy survives a failed primary write.
    pub fn session() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            key: ObjPath::from(ITEMS_KEY),
            label: "session",
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Reads the raw payload; `None` when the key has never been written.
    pub async fn read(&self) -> Result<Option<serde_json::Value>, AppError> {
        let result = match self.store.get(&self.key).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let raw = result.bytes().await?;
        let value = serde_json::from_slice(&raw)?;
        Ok(Some(value))
    }

    pub async fn write(&self, items: &[KBItem]) -> Result<(), AppError> {
        let encoded = serde_json::to_vec(items)?;
        let payload = PutPayload::from_bytes(Bytes::from(encoded));
        self.store.put(&self.key, payload).await?;
        debug!(tier = self.label, items = items.len(), "wrote item payload");
        Ok(())
    }

    /// Writes an arbitrary payload under the items key, bypassing the codec.
    /// Only used to simulate corrupted legacy data.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn write_raw(&self, raw: Vec<u8>) -> Result<(), AppError> {
        let payload = PutPayload::from_bytes(Bytes::from(raw));
        self.store.put(&self.key, payload).await?;
        Ok(())
    }
}
