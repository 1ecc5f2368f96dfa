use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Session not found: {term}")]
    SessionNotFound { term: String },

    #[error("Interaction not found: {id}")]
    InteractionNotFound { id: i64 },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
