use std::sync::{Arc, Mutex};

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use ingestion_pipeline::repository::ItemRepository;
use preview_renderer::renderer::PdfPreviewRenderer;

/// The single preview slot and the item it is bound to. Opening a preview
/// for another item replaces the current one.
pub struct PreviewSession {
    pub renderer: PdfPreviewRenderer,
    item_id: Mutex<Option<String>>,
}

impl PreviewSession {
    pub fn new(renderer: PdfPreviewRenderer) -> Self {
        Self {
            renderer,
            item_id: Mutex::new(None),
        }
    }

    pub fn bind(&self, id: &str) {
        *self.item_id.lock().expect("preview session poisoned") = Some(id.to_string());
    }

    pub fn unbind(&self) {
        *self.item_id.lock().expect("preview session poisoned") = None;
    }

    pub fn current_item(&self) -> Option<String> {
        self.item_id.lock().expect("preview session poisoned").clone()
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub repository: Arc<ItemRepository>,
    pub db: Arc<SurrealDbClient>,
    pub preview: Arc<PreviewSession>,
    pub config: Arc<AppConfig>,
}

impl ApiState {
    pub fn new(
        repository: Arc<ItemRepository>,
        db: Arc<SurrealDbClient>,
        preview: Arc<PreviewSession>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            repository,
            db,
            preview,
            config,
        }
    }
}
