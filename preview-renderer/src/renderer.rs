use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use common::{error::AppError, utils::config::AppConfig};
use ingestion_pipeline::extraction::pdf::embedded_text;
use ingestion_pipeline::ocr::{load_page_numbers, OcrAdapter, OcrOutcome, OcrProgress};

use crate::state::{compute_next_state, PreviewState, PreviewTransition};

/// Long-running manual operation layered on the `Ready` state. Only one may
/// run at a time per open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubProcess {
    ExtractAll,
    OcrAll,
}

struct LoadedDocument {
    bytes: Bytes,
    pages: Vec<u32>,
    current_page: u32,
    zoom: f32,
}

struct Inner {
    state: PreviewState,
    document: Option<LoadedDocument>,
    /// Bytes handed to the last `open`, kept so `retry` can reload after a
    /// failure that never produced a document.
    last_pdf: Option<Bytes>,
    sub_process: Option<SubProcess>,
}

/// Page-level PDF preview over the shared rasterizer handle.
///
/// The rendering engine is loaded once per process and shared; per-document
/// state lives here. All mutations go through the validated lifecycle
/// transitions in [`crate::state`].
pub struct PdfPreviewRenderer {
    ocr: Arc<OcrAdapter>,
    config: Arc<AppConfig>,
    inner: Mutex<Inner>,
}

impl PdfPreviewRenderer {
    pub fn new(ocr: Arc<OcrAdapter>, config: Arc<AppConfig>) -> Self {
        Self {
            ocr,
            config,
            inner: Mutex::new(Inner {
                state: PreviewState::Idle,
                document: None,
                last_pdf: None,
                sub_process: None,
            }),
        }
    }

    pub fn state(&self) -> PreviewState {
        self.lock().state.clone()
    }

    pub fn current_page(&self) -> Option<u32> {
        self.lock().document.as_ref().map(|doc| doc.current_page)
    }

    pub fn page_count(&self) -> Option<usize> {
        self.lock().document.as_ref().map(|doc| doc.pages.len())
    }

    pub fn active_sub_process(&self) -> Option<SubProcess> {
        self.lock().sub_process
    }

    /// Loads the rendering engine (shared, at most once per process) and the
    /// document's page structure.
    pub async fn open(&self, pdf: Bytes) -> Result<(), AppError> {
        self.apply(PreviewTransition::LoadEngine)?;
        self.lock().last_pdf = Some(pdf.clone());

        if let Err(err) = self.ocr.warm_rasterizer().await {
            warn!(error = %err, "rendering engine failed to load");
            self.fail();
            return Err(err);
        }

        self.apply(PreviewTransition::OpenDocument)?;
        self.load_document(pdf).await
    }

    /// Re-enters document loading after a fatal failure, reusing the bytes
    /// from the last `open`.
    pub async fn retry(&self) -> Result<(), AppError> {
        self.apply(PreviewTransition::Retry)?;
        let Some(pdf) = self.lock().last_pdf.clone() else {
            self.fail();
            return Err(AppError::Validation(
                "No document to retry; open one first".to_string(),
            ));
        };
        self.load_document(pdf).await
    }

    async fn load_document(&self, pdf: Bytes) -> Result<(), AppError> {
        match load_page_numbers(pdf.to_vec()).await {
            Ok(pages) if !pages.is_empty() => {
                let first = pages[0];
                {
                    let mut inner = self.lock();
                    inner.document = Some(LoadedDocument {
                        bytes: pdf,
                        pages,
                        current_page: first,
                        zoom: 1.0,
                    });
                }
                self.apply(PreviewTransition::DocumentLoaded)?;
                info!(
                    pages = self.page_count().unwrap_or(0),
                    "preview document loaded"
                );
                Ok(())
            }
            Ok(_) => {
                self.fail();
                Err(AppError::Processing("PDF appears to have no pages".into()))
            }
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }

    /// Renders one page at the current zoom. Navigation and zoom changes
    /// re-enter `RenderingPage` without re-running document loading.
    pub async fn render_page(&self, page: u32) -> Result<Vec<u8>, AppError> {
        let (bytes, zoom) = {
            let inner = self.lock();
            let Some(doc) = inner.document.as_ref() else {
                return Err(AppError::Validation("No document open".to_string()));
            };
            if !doc.pages.contains(&page) {
                return Err(AppError::Validation(format!(
                    "Page {page} is out of range"
                )));
            }
            (doc.bytes.clone(), doc.zoom)
        };

        self.apply(PreviewTransition::RenderPage)?;
        match self.ocr.rasterize_pages(&bytes, &[page], zoom).await {
            Ok(mut images) if !images.is_empty() => {
                self.apply(PreviewTransition::PageRendered)?;
                if let Some(doc) = self.lock().document.as_mut() {
                    doc.current_page = page;
                }
                debug!(page, "rendered preview page");
                Ok(images.remove(0))
            }
            Ok(_) => {
                self.fail();
                Err(AppError::Processing("Rasterizer returned no image".into()))
            }
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }

    pub async fn next_page(&self) -> Result<Vec<u8>, AppError> {
        self.render_page(self.neighbor_page(1)?).await
    }

    pub async fn previous_page(&self) -> Result<Vec<u8>, AppError> {
        self.render_page(self.neighbor_page(-1)?).await
    }

    /// Changes the zoom factor and re-renders the current page.
    pub async fn set_zoom(&self, zoom: f32) -> Result<Vec<u8>, AppError> {
        let current = self.update_zoom(zoom)?;
        self.render_page(current).await
    }

    /// Stores a new zoom factor without rendering; returns the current page
    /// so the caller can decide which page to render at the new zoom.
    pub fn update_zoom(&self, zoom: f32) -> Result<u32, AppError> {
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(AppError::Validation(format!("Invalid zoom factor {zoom}")));
        }
        let mut inner = self.lock();
        let Some(doc) = inner.document.as_mut() else {
            return Err(AppError::Validation("No document open".to_string()));
        };
        doc.zoom = zoom;
        Ok(doc.current_page)
    }

    /// Discards the open document and returns to `Idle`, so a different
    /// document can be opened. Rejected while a manual operation runs.
    pub fn close(&self) -> Result<(), AppError> {
        let mut inner = self.lock();
        if let Some(active) = inner.sub_process {
            return Err(AppError::Validation(format!(
                "Cannot close while {active:?} is running"
            )));
        }
        if inner.state != PreviewState::Idle {
            inner.state = compute_next_state(&inner.state, PreviewTransition::Close)?;
        }
        inner.document = None;
        inner.last_pdf = None;
        Ok(())
    }

    /// Sequential per-page embedded text over the whole document; pages
    /// without a text layer are skipped.
    pub async fn extract_all_pages(&self) -> Result<String, AppError> {
        let bytes = self.begin_sub_process(SubProcess::ExtractAll)?;
        let result = embedded_text(bytes.to_vec()).await;
        self.end_sub_process();
        result
    }

    /// Bounded rasterize-then-recognize sweep with per-page progress. Runs
    /// to completion once started; dropping the receiver only silences the
    /// notifications.
    pub async fn ocr_all_pages(
        &self,
        progress: Option<UnboundedSender<OcrProgress>>,
    ) -> Result<OcrOutcome, AppError> {
        let bytes = self.begin_sub_process(SubProcess::OcrAll)?;
        let result = self
            .ocr
            .ocr_all_pages(&bytes, self.config.manual_ocr_page_cap, progress)
            .await;
        self.end_sub_process();
        result
    }

    fn neighbor_page(&self, offset: i64) -> Result<u32, AppError> {
        let inner = self.lock();
        let Some(doc) = inner.document.as_ref() else {
            return Err(AppError::Validation("No document open".to_string()));
        };
        let position = doc
            .pages
            .iter()
            .position(|page| *page == doc.current_page)
            .unwrap_or(0) as i64;
        let target = position + offset;
        if target < 0 || target as usize >= doc.pages.len() {
            return Err(AppError::Validation("No page in that direction".to_string()));
        }
        Ok(doc.pages[target as usize])
    }

    fn begin_sub_process(&self, kind: SubProcess) -> Result<Bytes, AppError> {
        let mut inner = self.lock();
        if inner.state != PreviewState::Ready {
            return Err(AppError::Validation(format!(
                "Cannot start {kind:?} while {}",
                inner.state.as_str()
            )));
        }
        if let Some(active) = inner.sub_process {
            return Err(AppError::Validation(format!(
                "Cannot start {kind:?} while {active:?} is running"
            )));
        }
        let Some(doc) = inner.document.as_ref() else {
            return Err(AppError::Validation("No document open".to_string()));
        };
        let bytes = doc.bytes.clone();
        inner.sub_process = Some(kind);
        Ok(bytes)
    }

    fn end_sub_process(&self) {
        self.lock().sub_process = None;
    }

    fn apply(&self, transition: PreviewTransition) -> Result<(), AppError> {
        let mut inner = self.lock();
        let next = compute_next_state(&inner.state, transition)?;
        debug!(
            from = inner.state.as_str(),
            to = next.as_str(),
            "preview transition"
        );
        inner.state = next;
        Ok(())
    }

    /// Fatal-failure path; valid from every non-error state.
    fn fail(&self) {
        let mut inner = self.lock();
        if let Ok(next) = compute_next_state(&inner.state, PreviewTransition::Fail) {
            inner.state = next;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("preview state poisoned")
    }
}
