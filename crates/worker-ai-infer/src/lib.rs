//! ONNX Runtime-backed detection models: letterbox preprocessing,
//! postprocessing, NMS, a class catalog, and a shared async model pool.

pub mod catalog;
pub mod error;
pub mod model;
pub mod pool;

pub use catalog::ClassCatalog;
pub use error::InferenceError;
pub use model::{Model, RawDetection};
pub use pool::ModelPool;
