use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use tracing::info;

use common::{
    error::AppError,
    storage::tier_manager::StorageTierManager,
    storage::types::{
        kb_item::{KBItem, UpdateKBItem},
        upload::RawUpload,
    },
    utils::{config::AppConfig, context_assembly},
};

use crate::detector::{self, Route};
use crate::extraction;
use crate::ocr::OcrAdapter;

/// CRUD facade over the storage tiers; the only surface the rest of the
/// application consumes. Plain service object, safe to construct more than
/// once.
pub struct ItemRepository {
    tiers: Arc<StorageTierManager>,
    ocr: Arc<OcrAdapter>,
    config: Arc<AppConfig>,
}

impl ItemRepository {
    pub fn new(tiers: Arc<StorageTierManager>, ocr: Arc<OcrAdapter>, config: Arc<AppConfig>) -> Self {
        Self { tiers, ocr, config }
    }

    pub async fn get_items(&self) -> Vec<KBItem> {
        self.tiers.snapshot().await.as_ref().clone()
    }

    pub async fn get_item(&self, id: &str) -> Option<KBItem> {
        self.tiers.get_item(id).await
    }

    /// Ingests a batch sequentially, one item per upload in upload order.
    /// Extraction failures degrade to a `note` on the affected item; a batch
    /// of N uploads always yields N items.
    #[tracing::instrument(skip_all, fields(count = uploads.len()))]
    pub async fn save_items(&self, uploads: Vec<RawUpload>) -> Result<Vec<KBItem>, AppError> {
        let mut items = Vec::with_capacity(uploads.len());
        for upload in &uploads {
            let route = detector::detect(&upload.name, &upload.mime_type);
            let extraction = extraction::extract(upload, route, &self.ocr, &self.config).await;

            let mut item = KBItem::from_upload(upload);
            item.text = extraction.text;
            item.note = extraction.note;
            item.preview_payload = self.preview_payload(upload, route);

            info!(
                item_id = %item.id,
                name = %item.name,
                extracted = item.text.is_some(),
                "ingested upload"
            );
            items.push(item);
        }

        self.tiers.upsert_items(items.clone()).await?;
        Ok(items)
    }

    pub async fn update_item(&self, id: &str, update: &UpdateKBItem) -> Result<KBItem, AppError> {
        self.tiers.update_item(id, update).await
    }

    pub async fn delete_item(&self, id: &str) -> Result<(), AppError> {
        self.tiers.delete_item(id).await
    }

    /// Re-runs extraction against fresh bytes, overwriting `text` and `note`
    /// with the latest attempt's outcome. Same failure-to-note contract as
    /// initial ingestion.
    pub async fn reextract(&self, id: &str, bytes: Bytes) -> Result<KBItem, AppError> {
        let Some(existing) = self.tiers.get_item(id).await else {
            return Err(AppError::NotFound(id.to_string()));
        };

        let upload = RawUpload {
            name: existing.name.clone(),
            mime_type: existing.mime_type.clone(),
            size_bytes: bytes.len() as u64,
            last_modified_at: existing.last_modified_at,
            bytes,
        };
        let route = detector::detect(&upload.name, &upload.mime_type);
        let extraction = extraction::extract(&upload, route, &self.ocr, &self.config).await;

        let mut item = existing;
        item.size_bytes = upload.size_bytes;
        item.text = extraction.text;
        item.note = extraction.note;
        item.preview_payload = self.preview_payload(&upload, route);

        self.tiers.upsert_items(vec![item.clone()]).await?;
        Ok(item)
    }

    /// Assembled downstream context over the live item set.
    pub async fn assemble_context(&self) -> String {
        let snapshot = self.tiers.snapshot().await;
        context_assembly::assemble_context(&snapshot, self.config.context_max_chars)
    }

    /// Preview data is embedded only for preview-capable formats under the
    /// configured size ceiling.
    fn preview_payload(&self, upload: &RawUpload, route: Route) -> Option<String> {
        let preview_capable = matches!(route, Route::Pdf | Route::Image);
        if preview_capable && upload.size_bytes <= self.config.preview_payload_max_bytes {
            Some(STANDARD.encode(&upload.bytes))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{blank_pdf, ScriptedRecognition, StubRasterizer};
    use crate::test_support::test_config;
    use common::storage::db::SurrealDbClient;
    use common::storage::tiers::kv::KvTier;
    use common::storage::tiers::remote::InMemoryRemote;

    async fn repository_with(engine: ScriptedRecognition) -> (ItemRepository, Arc<InMemoryRemote>) {
        let remote = Arc::new(InMemoryRemote::new());
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", "repository")
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let tiers = Arc::new(StorageTierManager::new(
            Arc::clone(&remote) as Arc<dyn common::storage::tiers::remote::RemoteItems>,
            db,
            KvTier::session(),
            KvTier::session(),
        ));
        let config = test_config();
        let ocr = Arc::new(OcrAdapter::with_parts(
            Arc::clone(&config),
            Arc::new(engine),
            Arc::new(StubRasterizer::new()),
        ));
        (ItemRepository::new(tiers, ocr, config), remote)
    }

    #[tokio::test]
    async fn test_plain_text_upload_round_trips() {
        let (repo, _) = repository_with(ScriptedRecognition::always("")).await;
        let uploads = vec![RawUpload::new(
            "notes.txt",
            "text/plain",
            Bytes::from_static(b"hello"),
        )];

        let items = repo.save_items(uploads).await.expect("save");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text.as_deref(), Some("hello"));
        assert!(items[0].note.is_none());
    }

    #[tokio::test]
    async fn test_batch_with_failures_still_yields_one_item_per_upload() {
        let (repo, _) = repository_with(ScriptedRecognition::always("")).await;
        let uploads = vec![
            RawUpload::new(
                "corrupt.txt",
                "text/plain",
                Bytes::from_static(&[0xff, 0xfe, 0x80]),
            ),
            RawUpload::new(
                "table.csv",
                "text/csv",
                Bytes::from_static(b"a,b\n1,2\n"),
            ),
        ];

        let items = repo.save_items(uploads).await.expect("save");
        assert_eq!(items.len(), 2);

        // Upload order is preserved
        assert_eq!(items[0].name, "corrupt.txt");
        assert!(items[0].text.is_none());
        assert!(!items[0].note.as_deref().unwrap_or("").is_empty());

        assert_eq!(items[1].text.as_deref(), Some("a,b\n1,2\n"));
        assert!(items[1].note.is_none());
    }

    #[tokio::test]
    async fn test_scanned_pdf_gets_recognition_note_and_preview_payload() {
        let (repo, _) = repository_with(ScriptedRecognition::always("scanned body")).await;
        let uploads = vec![RawUpload::new(
            "scan.pdf",
            "application/pdf",
            Bytes::from(blank_pdf(3)),
        )];

        let items = repo.save_items(uploads).await.expect("save");
        assert!(items[0].text.as_deref().expect("text").contains("scanned body"));
        assert!(items[0].note.as_deref().expect("note").contains("recognition"));
        assert!(items[0].preview_payload.is_some());
    }

    #[tokio::test]
    async fn test_preview_payload_respects_size_ceiling() {
        let (repo, _) = repository_with(ScriptedRecognition::always("")).await;
        let config = test_config();
        let oversized = vec![0u8; config.preview_payload_max_bytes as usize + 1];

        let items = repo
            .save_items(vec![
                RawUpload::new("big.png", "image/png", Bytes::from(oversized)),
                RawUpload::new("notes.txt", "text/plain", Bytes::from_static(b"text")),
            ])
            .await
            .expect("save");

        // Over the ceiling, and not a preview-capable route
        assert!(items[0].preview_payload.is_none());
        assert!(items[1].preview_payload.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_reflected_in_get_items() {
        let (repo, remote) = repository_with(ScriptedRecognition::always("")).await;
        let items = repo
            .save_items(vec![RawUpload::new(
                "notes.txt",
                "text/plain",
                Bytes::from_static(b"hello"),
            )])
            .await
            .expect("save");

        repo.delete_item(&items[0].id).await.expect("delete");
        assert!(repo.get_items().await.is_empty());
        assert!(remote.stored().is_empty());
    }

    #[tokio::test]
    async fn test_reextract_overwrites_previous_outcome() {
        let (repo, _) = repository_with(ScriptedRecognition::always("")).await;
        let items = repo
            .save_items(vec![RawUpload::new(
                "notes.txt",
                "text/plain",
                Bytes::from_static(&[0xff, 0xfe]),
            )])
            .await
            .expect("save");
        assert!(items[0].text.is_none());
        assert!(items[0].note.is_some());

        let updated = repo
            .reextract(&items[0].id, Bytes::from_static(b"now readable"))
            .await
            .expect("reextract");
        assert_eq!(updated.text.as_deref(), Some("now readable"));
        assert!(updated.note.is_none());

        let stored = repo.get_item(&updated.id).await.expect("item present");
        assert_eq!(stored.text.as_deref(), Some("now readable"));
    }

    #[tokio::test]
    async fn test_reextract_unknown_item_is_not_found() {
        let (repo, _) = repository_with(ScriptedRecognition::always("")).await;
        let err = repo
            .reextract("ghost", Bytes::from_static(b"x"))
            .await
            .expect_err("missing item");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_include_toggle_excludes_item_from_context() {
        let (repo, _) = repository_with(ScriptedRecognition::always("")).await;
        let items = repo
            .save_items(vec![RawUpload::new(
                "notes.txt",
                "text/plain",
                Bytes::from_static(b"hello"),
            )])
            .await
            .expect("save");

        assert!(repo.assemble_context().await.contains("hello"));

        repo.update_item(
            &items[0].id,
            &UpdateKBItem {
                include: Some(false),
                ..UpdateKBItem::default()
            },
        )
        .await
        .expect("update");

        assert_eq!(repo.assemble_context().await, "");
        let stored = repo.get_item(&items[0].id).await.expect("item present");
        assert_eq!(stored.text.as_deref(), Some("hello"));
    }
}
