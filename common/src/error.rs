use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Remote store error: {0}")]
    Store(#[from] object_store::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Index persistence failed: {0}")]
    Persistence(#[source] Box<AppError>),
    #[error("Query failed: {0}")]
    Query(#[source] Box<AppError>),
}

impl AppError {
    /// Wraps a failure encountered while updating or loading the persisted index.
    pub fn persistence(cause: impl Into<AppError>) -> Self {
        match cause.into() {
            already @ AppError::Persistence(_) => already,
            other => AppError::Persistence(Box::new(other)),
        }
    }

    /// Wraps a failure encountered while answering a question.
    pub fn query(cause: impl Into<AppError>) -> Self {
        match cause.into() {
            already @ AppError::Query(_) => already,
            other => AppError::Query(Box::new(other)),
        }
    }
}
