use thiserror::Error;

#[derive(Debug, Error)]
pub enum AskyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown model alias: {alias}")]
    UnknownModel { alias: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AskyError>;
