//! Spawns a model-pool load as its own task so the connection handler
//! can race it against the client closing the socket mid-load and abort
//! cleanly via `JoinHandle::abort`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use worker_ai_infer::{InferenceError, Model, ModelPool};

pub fn spawn_load(
    pool: Arc<ModelPool>,
    path: PathBuf,
) -> JoinHandle<Result<Arc<Model>, InferenceError>> {
    tokio::spawn(async move { pool.load(&path).await })
}
