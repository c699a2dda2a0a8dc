use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::warn;

use common::{error::AppError, storage::types::upload::RawUpload};

use super::Extraction;

/// One delimited block per sheet, labeled with the sheet name.
pub async fn extract(upload: &RawUpload) -> Extraction {
    match workbook_text(upload.bytes.to_vec()).await {
        Ok(text) if !text.trim().is_empty() => Extraction::text(text),
        Ok(_) => Extraction::note("workbook contained no extractable text"),
        Err(err) => {
            warn!(error = %err, "workbook parsing failed");
            Extraction::note(format!("extraction failed: {err}"))
        }
    }
}

async fn workbook_text(bytes: Vec<u8>) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|err| AppError::Processing(format!("Failed to open workbook: {err}")))?;

        let mut blocks = Vec::new();
        for sheet_name in workbook.sheet_names().to_vec() {
            let range = match workbook.worksheet_range(&sheet_name) {
                Ok(range) => range,
                Err(err) => {
                    warn!(sheet = %sheet_name, error = %err, "skipping unreadable sheet");
                    continue;
                }
            };

            let mut block = format!("Sheet: {sheet_name}");
            for row in range.rows() {
                let cells: Vec<String> = row.iter().map(cell_text).collect();
                if cells.iter().all(String::is_empty) {
                    continue;
                }
                block.push('\n');
                block.push_str(&cells.join(" | "));
            }
            blocks.push(block);
        }
        Ok(blocks.join("\n\n"))
    })
    .await??;

    Ok(text)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_corrupt_workbook_degrades_to_note() {
        let upload = RawUpload::new(
            "budget.xlsx",
            "application/octet-stream",
            Bytes::from_static(b"not a workbook"),
        );

        let result = extract(&upload).await;
        assert!(result.text.is_none());
        assert!(result.note.expect("note").contains("extraction failed"));
    }

    #[test]
    fn test_cell_text_covers_scalar_variants() {
        assert_eq!(cell_text(&Data::String("label".to_string())), "label");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Bool(true)), "true");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
