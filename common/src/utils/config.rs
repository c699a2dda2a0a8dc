use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    /// Base URL of the authoritative remote item collection (Tier R).
    pub remote_items_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    /// Embedded-text yield (in whitespace-normalized chars) below which a PDF
    /// is treated as scanned and handed to the recognition fallback.
    #[serde(default = "default_low_yield_threshold")]
    pub low_yield_threshold: usize,
    /// Page prefix the inline recognition fallback is allowed to rasterize.
    #[serde(default = "default_inline_ocr_page_cap")]
    pub inline_ocr_page_cap: usize,
    /// Page cap for the user-triggered full-document recognition sweep.
    #[serde(default = "default_manual_ocr_page_cap")]
    pub manual_ocr_page_cap: usize,
    #[serde(default = "default_preview_payload_max_bytes")]
    pub preview_payload_max_bytes: u64,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,
    #[serde(default)]
    pub ocr_language_hints: Vec<String>,
    /// Vision-capable chat model used by the recognition engine.
    #[serde(default = "default_ocr_model")]
    pub ocr_model: String,
}

fn default_ocr_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_low_yield_threshold() -> usize {
    50
}

fn default_inline_ocr_page_cap() -> usize {
    8
}

fn default_manual_ocr_page_cap() -> usize {
    10
}

fn default_preview_payload_max_bytes() -> u64 {
    1_048_576
}

fn default_context_max_chars() -> usize {
    24_000
}

fn default_ingest_max_body_bytes() -> usize {
    50_000_000
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_to_canonical_constants() {
        assert_eq!(default_low_yield_threshold(), 50);
        assert_eq!(default_inline_ocr_page_cap(), 8);
        assert_eq!(default_manual_ocr_page_cap(), 10);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "openai_api_key": "key",
            "surrealdb_address": "mem://",
            "surrealdb_username": "root",
            "surrealdb_password": "root",
            "surrealdb_namespace": "ns",
            "surrealdb_database": "db",
            "remote_items_url": "http://localhost:9000/items",
            "http_port": 3000
        }))
        .expect("config should deserialize");

        assert_eq!(config.low_yield_threshold, 50);
        assert_eq!(config.inline_ocr_page_cap, 8);
        assert_eq!(config.manual_ocr_page_cap, 10);
        assert_eq!(config.data_dir, "./data");
        assert!(config.ocr_language_hints.is_empty());
    }
}
