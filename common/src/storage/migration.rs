use tracing::warn;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::tiers::kv::KvTier;
use crate::storage::types::kb_item::KBItem;

/// Legacy tier a one-time migration sourced its data from, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacySource {
    KeyValue,
    SessionBackup,
    Database,
}

impl LegacySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacySource::KeyValue => "kv",
            LegacySource::SessionBackup => "session",
            LegacySource::Database => "database",
        }
    }
}

/// Result of the startup load; `Skipped` is a logged outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The remote tier already held data; no legacy data was copied.
    Skipped { count: usize },
    /// Legacy data was copied into the remote tier and adopted.
    Migrated { source: LegacySource, count: usize },
    /// The legacy set is being served but the copy into the remote tier
    /// failed and was rolled back; the copy is retried on next startup.
    Deferred { source: LegacySource, count: usize },
    /// No tier held any data.
    Fresh,
}

/// Probes the legacy tiers in preference order and returns the first
/// non-empty, schema-valid item collection. Malformed payloads and
/// unreachable tiers are skipped, never surfaced as data.
pub async fn probe_legacy_tiers(
    kv: &KvTier,
    session: &KvTier,
    db: &SurrealDbClient,
) -> Option<(LegacySource, Vec<KBItem>)> {
    for (source, tier) in [
        (LegacySource::KeyValue, kv),
        (LegacySource::SessionBackup, session),
    ] {
        match tier.read().await {
            Ok(Some(payload)) => match KBItem::validate_collection(&payload) {
                Some(items) if !items.is_empty() => return Some((source, items)),
                Some(_) => {}
                None => {
                    warn!(tier = source.as_str(), "discarding malformed legacy payload");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(tier = source.as_str(), error = %err, "legacy tier probe failed");
            }
        }
    }

    match db.get_all_stored_items::<KBItem>().await {
        Ok(items) if !items.is_empty() => Some((LegacySource::Database, items)),
        Ok(_) => None,
        Err(err) => {
            warn!(tier = "database", error = %err, "legacy tier probe failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(id: &str) -> KBItem {
        KBItem {
            id: id.to_string(),
            name: format!("{id}.txt"),
            mime_type: "text/plain".to_string(),
            size_bytes: 1,
            last_modified_at: Utc::now(),
            created_at: Utc::now(),
            text: Some("x".to_string()),
            note: None,
            preview_payload: None,
            include: true,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_probe_prefers_kv_over_session() {
        let kv = KvTier::session();
        let session = KvTier::session();
        let db = memory_db().await;

        kv.write(&[item("from-kv")]).await.expect("write kv");
        session
            .write(&[item("from-session")])
            .await
            .expect("write session");

        let (source, items) = probe_legacy_tiers(&kv, &session, &db)
            .await
            .expect("legacy data found");
        assert_eq!(source, LegacySource::KeyValue);
        assert_eq!(items[0].id, "from-kv");
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_database() {
        let kv = KvTier::session();
        let session = KvTier::session();
        let db = memory_db().await;

        db.store_item(item("from-db")).await.expect("store");

        let (source, items) = probe_legacy_tiers(&kv, &session, &db)
            .await
            .expect("legacy data found");
        assert_eq!(source, LegacySource::Database);
        assert_eq!(items[0].id, "from-db");
    }

    #[tokio::test]
    async fn test_probe_skips_empty_payload_and_continues() {
        let kv = KvTier::session();
        let session = KvTier::session();
        let db = memory_db().await;

        // An empty array is schema-valid but holds no data, so probing moves on
        kv.write(&[]).await.expect("seed empty");
        session
            .write(&[item("from-session")])
            .await
            .expect("write session");

        let (source, items) = probe_legacy_tiers(&kv, &session, &db)
            .await
            .expect("legacy data found");
        assert_eq!(source, LegacySource::SessionBackup);
        assert_eq!(items[0].id, "from-session");
    }

    #[tokio::test]
    async fn test_probe_discards_malformed_payload() {
        let kv = KvTier::session();
        let session = KvTier::session();
        let db = memory_db().await;

        kv.write_raw(b"{\"version\": 2, \"items\": \"nope\"}".to_vec())
            .await
            .expect("write raw");
        session
            .write(&[item("from-session")])
            .await
            .expect("write session");

        let (source, items) = probe_legacy_tiers(&kv, &session, &db)
            .await
            .expect("legacy data found");
        assert_eq!(source, LegacySource::SessionBackup);
        assert_eq!(items[0].id, "from-session");
    }

    #[tokio::test]
    async fn test_probe_returns_none_when_all_tiers_empty() {
        let kv = KvTier::session();
        let session = KvTier::session();
        let db = memory_db().await;

        assert!(probe_legacy_tiers(&kv, &session, &db).await.is_none());
    }
}
