//! Maps subsystem `thiserror` types to the wire `error_code` enumeration.

use worker_ai_decode::DecodeError;
use worker_ai_infer::InferenceError;
use worker_ai_proto::ErrorCode;
use worker_ai_session::SessionError;

pub fn decode_error_code(err: &DecodeError) -> ErrorCode {
    match err {
        DecodeError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
        DecodeError::SizeMismatch { .. }
        | DecodeError::Jpeg(_)
        | DecodeError::DimensionMismatch { .. } => ErrorCode::InvalidFrame,
    }
}

pub fn inference_error_code(_err: &InferenceError) -> ErrorCode {
    ErrorCode::Internal
}

pub fn session_error_code(err: &SessionError) -> ErrorCode {
    match err {
        SessionError::InvalidId(_) => ErrorCode::BadMessage,
        SessionError::Io(_) | SessionError::Serialize(_) => ErrorCode::Internal,
    }
}
