use docx_rs::{DocumentChild, ParagraphChild, RunChild};
use tracing::warn;

use common::{error::AppError, storage::types::upload::RawUpload};

use super::Extraction;

/// Flattens the document tree to plain text, one line per paragraph.
pub async fn extract(upload: &RawUpload) -> Extraction {
    match document_text(upload.bytes.to_vec()).await {
        Ok(text) if !text.trim().is_empty() => Extraction::text(text),
        Ok(_) => Extraction::note("document contained no extractable text"),
        Err(err) => {
            warn!(error = %err, "document parsing failed");
            Extraction::note(format!("extraction failed: {err}"))
        }
    }
}

async fn document_text(bytes: Vec<u8>) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
        let docx = docx_rs::read_docx(&bytes)
            .map_err(|err| AppError::Processing(format!("Failed to parse document: {err}")))?;

        let mut lines = Vec::new();
        for child in docx.document.children {
            if let DocumentChild::Paragraph(paragraph) = child {
                let mut line = String::new();
                for child in paragraph.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                line.push_str(&text.text);
                            }
                        }
                    }
                }
                lines.push(line);
            }
        }
        Ok(lines.join("\n"))
    })
    .await??;

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut docx = docx_rs::Docx::new();
        for paragraph in paragraphs {
            docx = docx.add_paragraph(
                docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(*paragraph)),
            );
        }

        let mut buf = std::io::Cursor::new(Vec::new());
        docx.build().pack(&mut buf).expect("pack docx");
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_paragraph_runs_flatten_to_lines() {
        let bytes = sample_docx(&["First paragraph", "Second paragraph"]);
        let upload = RawUpload::new("thesis.docx", "application/octet-stream", Bytes::from(bytes));

        let result = extract(&upload).await;
        let text = result.text.expect("text");
        assert!(text.contains("First paragraph"));
        assert!(text.contains("Second paragraph"));
        assert!(result.note.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_degrades_to_note() {
        let upload = RawUpload::new(
            "thesis.docx",
            "application/octet-stream",
            Bytes::from_static(b"definitely not a zip archive"),
        );

        let result = extract(&upload).await;
        assert!(result.text.is_none());
        assert!(result.note.expect("note").contains("extraction failed"));
    }
}
