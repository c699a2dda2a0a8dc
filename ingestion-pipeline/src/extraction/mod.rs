pub mod office;
pub mod pdf;
pub mod spreadsheet;

use tracing::warn;

use common::{storage::types::upload::RawUpload, utils::config::AppConfig};

use crate::detector::Route;
use crate::ocr::{OcrAdapter, OcrOutcome};

/// Outcome of one file's extraction. When `text` is absent, `note` explains
/// why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: Option<String>,
    pub note: Option<String>,
}

impl Extraction {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            note: None,
        }
    }

    pub fn note(note: impl Into<String>) -> Self {
        Self {
            text: None,
            note: Some(note.into()),
        }
    }

    pub fn text_with_note(text: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            note: Some(note.into()),
        }
    }
}

/// Runs the per-route extraction strategy. Never fails: internal errors
/// degrade to a `note` so one bad file can not abort its batch siblings.
#[tracing::instrument(skip_all, fields(name = %upload.name, route = ?route))]
pub async fn extract(
    upload: &RawUpload,
    route: Route,
    ocr: &OcrAdapter,
    config: &AppConfig,
) -> Extraction {
    match route {
        Route::PlainText => plain_text(upload),
        Route::Pdf => pdf::extract(upload, ocr, config).await,
        Route::OfficeDoc => office::extract(upload).await,
        Route::Spreadsheet => spreadsheet::extract(upload).await,
        Route::Image => image(upload, ocr).await,
        Route::Media => {
            Extraction::note("only file metadata was stored; audio and video content is not extracted")
        }
        Route::Unsupported => Extraction::note("format unsupported; only file metadata was stored"),
    }
}

/// The saved text must equal the file's raw content exactly.
fn plain_text(upload: &RawUpload) -> Extraction {
    match std::str::from_utf8(&upload.bytes) {
        Ok(text) => Extraction::text(text),
        Err(err) => {
            warn!(error = %err, "plain-text file is not valid UTF-8");
            Extraction::note("read failed")
        }
    }
}

async fn image(upload: &RawUpload, ocr: &OcrAdapter) -> Extraction {
    match ocr.recognize_image(&upload.bytes).await {
        Ok(OcrOutcome::Recognized(text)) => Extraction::text(text),
        Ok(OcrOutcome::NothingRecognized) => Extraction::note("no text recognized in image"),
        Err(err) => {
            warn!(error = %err, "image recognition failed");
            Extraction::note(format!("extraction failed: {err}"))
        }
    }
}
