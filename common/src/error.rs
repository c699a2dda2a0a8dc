use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Remote tier error: {0}")]
    Remote(#[from] reqwest::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Recognition engine error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Tier write failed: {0}")]
    TierWrite(String),
    #[error("All storage tiers failed during {operation}")]
    AllTiersFailed { operation: String },
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
