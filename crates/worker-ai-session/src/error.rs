use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id: {0}")]
    InvalidId(String),
    #[error("io error writing session data: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize session record: {0}")]
    Serialize(#[from] serde_json::Error),
}
