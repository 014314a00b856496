//! Error types for the buddy orchestration core.

/// Top-level error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum BuddyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("adapter construction error: {0}")]
    Construction(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("router error: {0}")]
    Router(String),

    #[error("brain error: {0}")]
    Brain(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BuddyError>;
