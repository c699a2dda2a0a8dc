/// Extraction route a file is classified into. Every file maps to exactly
/// one route; `Unsupported` is the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PlainText,
    Pdf,
    OfficeDoc,
    Spreadsheet,
    Image,
    /// Audio and video; only metadata is stored.
    Media,
    Unsupported,
}

type Predicate = fn(&str, &str) -> bool;

/// Ordered classification table, evaluated top to bottom. The first matching
/// predicate wins, so the plain-text family shadows more specific suffixes.
const ROUTE_TABLE: &[(Predicate, Route)] = &[
    (is_plain_text, Route::PlainText),
    (is_pdf, Route::Pdf),
    (is_office_doc, Route::OfficeDoc),
    (is_spreadsheet, Route::Spreadsheet),
    (is_image, Route::Image),
    (is_media, Route::Media),
];

/// Classifies a file from its name and declared media type. Pure and total.
pub fn detect(name: &str, mime_type: &str) -> Route {
    let name = name.to_ascii_lowercase();
    let mime_type = mime_type.to_ascii_lowercase();

    ROUTE_TABLE
        .iter()
        .find(|(predicate, _)| predicate(&name, &mime_type))
        .map_or(Route::Unsupported, |(_, route)| *route)
}

fn has_suffix(name: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

fn is_plain_text(name: &str, mime_type: &str) -> bool {
    mime_type.starts_with("text/") || has_suffix(name, &[".txt", ".md", ".csv", ".json"])
}

fn is_pdf(name: &str, mime_type: &str) -> bool {
    mime_type == "application/pdf" || has_suffix(name, &[".pdf"])
}

fn is_office_doc(name: &str, _mime_type: &str) -> bool {
    has_suffix(name, &[".docx"])
}

fn is_spreadsheet(name: &str, _mime_type: &str) -> bool {
    has_suffix(name, &[".xlsx", ".xls"])
}

fn is_image(name: &str, mime_type: &str) -> bool {
    mime_type.starts_with("image/") || has_suffix(name, &[".png", ".jpg", ".jpeg"])
}

fn is_media(_name: &str, mime_type: &str) -> bool {
    mime_type.starts_with("audio/") || mime_type.starts_with("video/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_family() {
        assert_eq!(detect("notes.txt", "text/plain"), Route::PlainText);
        assert_eq!(detect("readme.md", "application/octet-stream"), Route::PlainText);
        assert_eq!(detect("data.csv", "application/octet-stream"), Route::PlainText);
        assert_eq!(detect("payload.json", ""), Route::PlainText);
        assert_eq!(detect("page.html", "text/html"), Route::PlainText);
    }

    #[test]
    fn test_pdf_by_mime_or_suffix() {
        assert_eq!(detect("scan", "application/pdf"), Route::Pdf);
        assert_eq!(detect("Report.PDF", "application/octet-stream"), Route::Pdf);
    }

    #[test]
    fn test_office_and_spreadsheet_suffixes() {
        assert_eq!(detect("thesis.docx", "application/octet-stream"), Route::OfficeDoc);
        assert_eq!(detect("budget.xlsx", ""), Route::Spreadsheet);
        assert_eq!(detect("legacy.xls", ""), Route::Spreadsheet);
    }

    #[test]
    fn test_image_and_media() {
        assert_eq!(detect("photo", "image/jpeg"), Route::Image);
        assert_eq!(detect("photo.png", ""), Route::Image);
        assert_eq!(detect("lecture.mp3", "audio/mpeg"), Route::Media);
        assert_eq!(detect("clip.mp4", "video/mp4"), Route::Media);
    }

    #[test]
    fn test_unknown_defaults_to_unsupported() {
        assert_eq!(detect("archive.zip", "application/zip"), Route::Unsupported);
        assert_eq!(detect("noext", ""), Route::Unsupported);
    }

    #[test]
    fn test_table_order_prefers_plain_text() {
        // A text/* media type wins even with a pdf suffix
        assert_eq!(detect("notes.pdf", "text/plain"), Route::PlainText);
    }
}
