use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A raw uploaded file as handed to the ingestion pipeline: declared
/// metadata plus the full byte content.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub last_modified_at: DateTime<Utc>,
    pub bytes: Bytes,
}

impl RawUpload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            last_modified_at: Utc::now(),
            bytes,
        }
    }
}
