use thiserror::Error;

use crate::envelope::ErrorCode;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unsupported protocol version {0}")]
    VersionUnsupported(u32),
    #[error("msg_type does not match payload variant")]
    BadMessage,
    #[error("unexpected message in current state: {0}")]
    BadSequence(&'static str),
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] bincode::Error),
    #[error(transparent)]
    Framing(#[from] crate::framing::FramingError),
}

impl ProtoError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProtoError::VersionUnsupported(_) => ErrorCode::VersionUnsupported,
            ProtoError::BadMessage | ProtoError::Decode(_) => ErrorCode::BadMessage,
            ProtoError::BadSequence(_) => ErrorCode::BadSequence,
            ProtoError::Framing(_) => ErrorCode::Internal,
        }
    }
}
