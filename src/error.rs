use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Duplicate id: {0}")]
    DuplicateId(String),
    #[error("Order {0} is no longer pending")]
    AlreadyTerminal(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
