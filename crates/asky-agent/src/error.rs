use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] asky_llm::LlmError),

    #[error("Storage error: {0}")]
    Store(#[from] asky_store::StoreError),

    #[error("Research error: {0}")]
    Research(#[from] asky_research::ResearchError),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Turn cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
