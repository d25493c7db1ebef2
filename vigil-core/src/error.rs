use thiserror::Error;

pub type VigilResult<T> = Result<T, VigilError>;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown alert id {0}")]
    UnknownAlert(u64),

    #[error("Dispatch queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("Unauthorized realtime connection")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
