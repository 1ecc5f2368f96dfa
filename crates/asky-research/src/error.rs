use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Summarization error: {0}")]
    Summarization(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool unavailable: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, ResearchError>;
