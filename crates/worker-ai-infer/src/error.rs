use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model not loaded: {0}")]
    NotLoaded(String),
    #[error("failed to load model from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: ort::Error,
    },
    #[error("onnxruntime session failed: {0}")]
    Session(#[from] ort::Error),
    #[error("unexpected model output shape: {0}")]
    BadOutputShape(String),
    #[error("class catalog error: {0}")]
    Catalog(String),
}
