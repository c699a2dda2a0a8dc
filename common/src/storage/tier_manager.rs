use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::migration::{probe_legacy_tiers, MigrationOutcome};
use crate::storage::tiers::kv::KvTier;
use crate::storage::tiers::remote::RemoteItems;
use crate::storage::types::kb_item::{KBItem, UpdateKBItem};

/// Arbitrates reads and writes across the storage hierarchy.
///
/// Tier R (remote service) is authoritative when reachable; Tier K (durable
/// key-value) and its Tier S session backup carry the same payload so data is
/// never solely dependent on network availability; Tier D (on-device
/// database) is a legacy migration source; Tier M (in-memory) holds the live
/// item set and always reflects the last successful durable write.
pub struct StorageTierManager {
    remote: Arc<dyn RemoteItems>,
    db: Arc<SurrealDbClient>,
    kv: KvTier,
    session: KvTier,
    memory: RwLock<Arc<Vec<KBItem>>>,
}

impl StorageTierManager {
    pub fn new(
        remote: Arc<dyn RemoteItems>,
        db: Arc<SurrealDbClient>,
        kv: KvTier,
        session: KvTier,
    ) -> Self {
        Self {
            remote,
            db,
            kv,
            session,
            memory: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// The live item set. Mutations replace the whole collection, so a held
    /// snapshot can never observe partial in-place edits.
    pub async fn snapshot(&self) -> Arc<Vec<KBItem>> {
        Arc::clone(&*self.memory.read().await)
    }

    pub async fn get_item(&self, id: &str) -> Option<KBItem> {
        self.snapshot()
            .await
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Startup load: adopt the remote tier when it holds data, otherwise run
    /// the one-time legacy migration. Idempotent: once Tier R is non-empty
    /// the migration never runs again.
    pub async fn load_or_migrate(&self) -> Result<MigrationOutcome, AppError> {
        match self.remote.list().await {
            Ok(items) if !items.is_empty() => {
                let count = items.len();
                self.set_memory(items).await;
                info!(count, "remote tier populated; migration skipped");
                return Ok(MigrationOutcome::Skipped { count });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "remote tier unreachable at startup");
            }
        }

        let Some((source, items)) = probe_legacy_tiers(&self.kv, &self.session, &self.db).await
        else {
            info!("no tier holds data; starting fresh");
            return Ok(MigrationOutcome::Fresh);
        };

        let count = items.len();
        let mut copied: Vec<&str> = Vec::with_capacity(count);
        let mut copy_failed = false;
        for item in &items {
            match self.remote.create(item).await {
                Ok(()) => copied.push(item.id.as_str()),
                Err(err) => {
                    warn!(item_id = %item.id, error = %err, "legacy copy to remote tier failed");
                    copy_failed = true;
                    break;
                }
            }
        }

        if copy_failed {
            // Tier R must end up empty, or the next startup would adopt a
            // partial set as authoritative and orphan the rest of the
            // legacy data. Roll the copies back and retry on next startup.
            for id in copied {
                if let Err(err) = self.remote.delete(id).await {
                    warn!(item_id = %id, error = %err, "rollback of partial legacy copy failed");
                }
            }
            info!(source = source.as_str(), count, "legacy copy deferred; serving legacy set");
            self.set_memory(items).await;
            return Ok(MigrationOutcome::Deferred { source, count });
        }

        info!(source = source.as_str(), count, "migrated legacy items");
        self.set_memory(items).await;
        Ok(MigrationOutcome::Migrated { source, count })
    }

    /// Write-through insert/replace of the given items into the live set.
    ///
    /// Tier R is attempted first; Tier K and its Tier S backup are written
    /// regardless of the remote outcome. Fails only when every durable tier
    /// rejected the write.
    pub async fn upsert_items(&self, incoming: Vec<KBItem>) -> Result<(), AppError> {
        if incoming.is_empty() {
            return Ok(());
        }

        let current = self.snapshot().await;
        let mut remote_ok = true;
        for item in &incoming {
            let existed = current.iter().any(|existing| existing.id == item.id);
            let result = if existed {
                self.remote.update(item).await
            } else {
                self.remote.create(item).await
            };
            if let Err(err) = result {
                warn!(item_id = %item.id, error = %err, "remote tier write failed");
                remote_ok = false;
            }
        }

        // The merge must run against the collection as it stands now, under
        // the write lock, not against the pre-write snapshot: a delete that
        // settled while the remote writes were in flight would otherwise be
        // resurrected here. The lock is held through the local tier writes
        // so the installed set and the KV payload cannot diverge.
        let mut guard = self.memory.write().await;
        let next = merge_by_id(&guard, incoming);

        let kv_result = self.kv.write(&next).await;
        if let Err(err) = &kv_result {
            warn!(error = %err, "kv tier write failed");
        }
        let session_result = self.session.write(&next).await;
        if let Err(err) = &session_result {
            warn!(error = %err, "session backup write failed");
        }

        durable_outcome(
            remote_ok,
            kv_result.is_ok(),
            session_result.is_ok(),
            "save",
        )?;

        *guard = Arc::new(next);
        Ok(())
    }

    pub async fn update_item(
        &self,
        id: &str,
        update: &UpdateKBItem,
    ) -> Result<KBItem, AppError> {
        let Some(existing) = self.get_item(id).await else {
            return Err(AppError::NotFound(id.to_string()));
        };

        let updated = existing.apply_update(update);
        self.upsert_items(vec![updated.clone()]).await?;
        Ok(updated)
    }

    /// Deletes an item from every tier. Tier M is updated before any tier
    /// deletion is awaited, so a concurrent render never shows the deleted
    /// item while the slower tiers settle.
    pub async fn delete_item(&self, id: &str) -> Result<(), AppError> {
        let next: Vec<KBItem> = {
            let mut guard = self.memory.write().await;
            if !guard.iter().any(|item| item.id == id) {
                return Err(AppError::NotFound(id.to_string()));
            }
            let next: Vec<KBItem> = guard
                .iter()
                .filter(|item| item.id != id)
                .cloned()
                .collect();
            *guard = Arc::new(next.clone());
            next
        };

        let remote_result = self.remote.delete(id).await;
        if let Err(err) = &remote_result {
            warn!(item_id = %id, error = %err, "remote tier delete failed");
        }
        let kv_result = self.kv.write(&next).await;
        if let Err(err) = &kv_result {
            warn!(item_id = %id, error = %err, "kv tier delete failed");
        }
        let session_result = self.session.write(&next).await;
        if let Err(err) = &session_result {
            warn!(item_id = %id, error = %err, "session backup delete failed");
        }
        if let Err(err) = self.db.delete_item::<KBItem>(id).await {
            warn!(item_id = %id, error = %err, "database tier delete failed");
        }

        durable_outcome(
            remote_result.is_ok(),
            kv_result.is_ok(),
            session_result.is_ok(),
            "delete",
        )
    }

    async fn set_memory(&self, items: Vec<KBItem>) {
        let mut guard = self.memory.write().await;
        *guard = Arc::new(items);
    }
}

/// Replacement merge: existing items keep their position (replaced when an
/// incoming item shares the id), new items append in incoming order.
fn merge_by_id(current: &[KBItem], incoming: Vec<KBItem>) -> Vec<KBItem> {
    let mut next: Vec<KBItem> = current
        .iter()
        .map(|existing| {
            incoming
                .iter()
                .find(|item| item.id == existing.id)
                .unwrap_or(existing)
                .clone()
        })
        .collect();

    for item in incoming {
        if !current.iter().any(|existing| existing.id == item.id) {
            next.push(item);
        }
    }

    next
}

fn durable_outcome(
    remote_ok: bool,
    kv_ok: bool,
    session_ok: bool,
    operation: &str,
) -> Result<(), AppError> {
    if remote_ok || kv_ok || session_ok {
        Ok(())
    } else {
        Err(AppError::AllTiersFailed {
            operation: operation.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migration::LegacySource;
    use crate::storage::tiers::remote::InMemoryRemote;
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
            text: Some("body".to_string()),
            note: None,
            preview_payload: None,
            include: true,
        }
    }

    async fn manager_with(remote: Arc<InMemoryRemote>) -> StorageTierManager {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        StorageTierManager::new(remote, db, KvTier::session(), KvTier::session())
    }

    #[tokio::test]
    async fn test_migration_skipped_when_remote_holds_data() {
        let remote = Arc::new(InMemoryRemote::seeded(vec![item("remote-a")]));
        let manager = manager_with(Arc::clone(&remote)).await;

        // A differing legacy payload must not be copied in
        manager.kv.write(&[item("legacy-b")]).await.expect("seed kv");

        let outcome = manager.load_or_migrate().await.expect("load");
        assert_eq!(outcome, MigrationOutcome::Skipped { count: 1 });

        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "remote-a");

        let remote_items = remote.stored();
        assert_eq!(remote_items.len(), 1);
        assert_eq!(remote_items[0].id, "remote-a");
    }

    #[tokio::test]
    async fn test_migration_copies_legacy_kv_into_remote() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = manager_with(Arc::clone(&remote)).await;

        manager
            .kv
            .write(&[item("legacy-a"), item("legacy-b")])
            .await
            .expect("seed kv");

        let outcome = manager.load_or_migrate().await.expect("load");
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                source: LegacySource::KeyValue,
                count: 2
            }
        );
        assert_eq!(remote.stored().len(), 2);
        assert_eq!(manager.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_start_when_everything_is_empty() {
        let manager = manager_with(Arc::new(InMemoryRemote::new())).await;
        let outcome = manager.load_or_migrate().await.expect("load");
        assert_eq!(outcome, MigrationOutcome::Fresh);
        assert!(manager.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_survives_unreachable_remote() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = manager_with(Arc::clone(&remote)).await;

        remote.set_unavailable(true);
        manager
            .upsert_items(vec![item("a")])
            .await
            .expect("local tiers accept the write");

        assert_eq!(manager.snapshot().await.len(), 1);
        let kv_payload = manager.kv.read().await.expect("read").expect("payload");
        let kv_items = KBItem::validate_collection(&kv_payload).expect("valid");
        assert_eq!(kv_items.len(), 1);
        let session_payload = manager
            .session
            .read()
            .await
            .expect("read")
            .expect("payload");
        assert!(KBItem::validate_collection(&session_payload).is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_item_from_every_tier() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = manager_with(Arc::clone(&remote)).await;

        manager
            .upsert_items(vec![item("a"), item("b")])
            .await
            .expect("save");
        // Seed the legacy database tier as well
        manager.db.store_item(item("a")).await.expect("seed db");

        manager.delete_item("a").await.expect("delete");

        assert!(manager.get_item("a").await.is_none());
        assert!(remote.stored().iter().all(|i| i.id != "a"));

        let kv_payload = manager.kv.read().await.expect("read").expect("payload");
        let kv_items = KBItem::validate_collection(&kv_payload).expect("valid");
        assert!(kv_items.iter().all(|i| i.id != "a"));

        let db_items = manager
            .db
            .get_all_stored_items::<KBItem>()
            .await
            .expect("db read");
        assert!(db_items.iter().all(|i| i.id != "a"));
    }

    #[tokio::test]
    async fn test_concurrent_delete_survives_in_flight_upsert() {
        let remote = Arc::new(
            InMemoryRemote::seeded(vec![item("a")])
                .with_delay(std::time::Duration::from_millis(50)),
        );
        let manager = Arc::new(manager_with(Arc::clone(&remote)).await);
        manager.load_or_migrate().await.expect("load");

        let upserting = Arc::clone(&manager);
        let upsert = tokio::spawn(async move { upserting.upsert_items(vec![item("b")]).await });

        // Let the upsert reach its slow remote write, then delete "a" while
        // that write is still in flight. The delete must not be undone when
        // the upsert lands.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        manager.delete_item("a").await.expect("delete");

        upsert.await.expect("join").expect("upsert");

        assert!(manager.get_item("a").await.is_none());
        assert!(manager.get_item("b").await.is_some());

        let kv_payload = manager.kv.read().await.expect("read").expect("payload");
        let kv_items = KBItem::validate_collection(&kv_payload).expect("valid");
        assert!(kv_items.iter().all(|i| i.id != "a"));
    }

    #[tokio::test]
    async fn test_partial_legacy_copy_is_rolled_back_and_deferred() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_creates_after(1);
        let manager = manager_with(Arc::clone(&remote)).await;

        manager
            .kv
            .write(&[item("legacy-a"), item("legacy-b")])
            .await
            .expect("seed kv");

        let outcome = manager.load_or_migrate().await.expect("load");
        assert_eq!(
            outcome,
            MigrationOutcome::Deferred {
                source: LegacySource::KeyValue,
                count: 2
            }
        );
        // The partial copy was rolled back, so the next startup retries from
        // an empty remote tier instead of adopting half the legacy set
        assert!(remote.stored().is_empty());
        assert_eq!(manager.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_item_is_not_found() {
        let manager = manager_with(Arc::new(InMemoryRemote::new())).await;
        let err = manager.delete_item("ghost").await.expect_err("missing");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_toggling_include_keeps_text_in_storage() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = manager_with(Arc::clone(&remote)).await;

        manager.upsert_items(vec![item("a")]).await.expect("save");
        let updated = manager
            .update_item(
                "a",
                &UpdateKBItem {
                    include: Some(false),
                    ..UpdateKBItem::default()
                },
            )
            .await
            .expect("update");

        assert!(!updated.include);
        assert_eq!(updated.text.as_deref(), Some("body"));

        let kv_payload = manager.kv.read().await.expect("read").expect("payload");
        let kv_items = KBItem::validate_collection(&kv_payload).expect("valid");
        assert_eq!(kv_items[0].text.as_deref(), Some("body"));
        assert!(!kv_items[0].include);
    }

    #[tokio::test]
    async fn test_upsert_preserves_positions_and_appends_in_order() {
        let manager = manager_with(Arc::new(InMemoryRemote::new())).await;

        manager
            .upsert_items(vec![item("a"), item("b")])
            .await
            .expect("save");
        let mut replacement = item("a");
        replacement.text = Some("updated".to_string());
        manager
            .upsert_items(vec![replacement, item("c")])
            .await
            .expect("save");

        let snapshot = manager.snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(snapshot[0].text.as_deref(), Some("updated"));
    }

    #[test]
    fn test_durable_outcome_requires_one_successful_tier() {
        assert!(durable_outcome(true, false, false, "save").is_ok());
        assert!(durable_outcome(false, true, false, "save").is_ok());
        assert!(durable_outcome(false, false, true, "save").is_ok());
        let err = durable_outcome(false, false, false, "save").expect_err("all failed");
        assert!(matches!(err, AppError::AllTiersFailed { .. }));
    }
}
