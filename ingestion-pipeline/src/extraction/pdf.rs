use lopdf::Document;
use tracing::{debug, warn};

use common::{error::AppError, storage::types::upload::RawUpload, utils::config::AppConfig};

use super::Extraction;
use crate::ocr::{OcrAdapter, OcrOutcome};

/// Embedded text first, recognition fallback when the yield is below the
/// configured threshold.
pub async fn extract(upload: &RawUpload, ocr: &OcrAdapter, config: &AppConfig) -> Extraction {
    let embedded = match embedded_text(upload.bytes.to_vec()).await {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "PDF text extraction failed");
            return Extraction::note(format!("extraction failed: {err}"));
        }
    };

    if normalized_len(&embedded) >= config.low_yield_threshold {
        return Extraction::text(embedded);
    }

    debug!(
        chars = normalized_len(&embedded),
        threshold = config.low_yield_threshold,
        "embedded text below yield threshold; invoking recognition fallback"
    );

    match ocr
        .ocr_pdf_prefix(&upload.bytes, config.inline_ocr_page_cap)
        .await
    {
        Ok(OcrOutcome::Recognized(text)) => {
            Extraction::text_with_note(text, "parsed via recognition fallback")
        }
        Ok(OcrOutcome::NothingRecognized) => keep_embedded(
            embedded,
            "embedded text below yield threshold; recognition produced nothing".to_string(),
        ),
        Err(err) => {
            warn!(error = %err, "recognition fallback failed");
            keep_embedded(embedded, format!("recognition fallback failed: {err}"))
        }
    }
}

/// Per-page embedded text concatenated with blank-line separators. Pages
/// without a text layer are skipped, not errors. Also used by the preview
/// renderer's manual extract-all sweep.
pub async fn embedded_text(pdf: Vec<u8>) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
        let document = Document::load_mem(&pdf)
            .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;
        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();

        let mut pages = Vec::new();
        for page in page_numbers {
            match document.extract_text(&[page]) {
                Ok(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        pages.push(trimmed.to_string());
                    }
                }
                Err(err) => debug!(page, error = %err, "no embedded text on page"),
            }
        }
        Ok(pages.join("\n\n"))
    })
    .await??;

    Ok(text)
}

fn normalized_len(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| word.chars().count())
        .sum()
}

fn keep_embedded(embedded: String, note: String) -> Extraction {
    if embedded.trim().is_empty() {
        Extraction::note(note)
    } else {
        Extraction::text_with_note(embedded, note)
    }
}
