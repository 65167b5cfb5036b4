use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The chunk list and embedding matrix disagree, or one of them is
    /// malformed. The index has to be rebuilt before it can be queried.
    #[error("index integrity error: {0}")]
    Integrity(String),

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("summarization error: {0}")]
    Summary(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
