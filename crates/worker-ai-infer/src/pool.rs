//! Shared, canonical-path-keyed model cache with async load, in-flight
//! load sharing, and idle eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use worker_ai_decode::RgbImage;

use crate::catalog::ClassCatalog;
use crate::error::InferenceError;
use crate::model::{Model, RawDetection};

enum Slot {
    Loading(Vec<oneshot::Sender<Result<Arc<Model>, String>>>),
    Loaded(Arc<Model>),
}

/// Keyed by canonical model path; serializes load/evict per key while
/// allowing inference on distinct models to proceed independently.
pub struct ModelPool {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    idle_timeout: Duration,
    idle_task: Mutex<Option<JoinHandle<()>>>,
}

impl ModelPool {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            idle_timeout,
            idle_task: Mutex::new(None),
        })
    }

    fn canonicalize(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Loads the model at `path`, reusing a cached handle or an
    /// in-flight load for the same canonical path.
    pub async fn load(self: &Arc<Self>, path: &Path) -> Result<Arc<Model>, InferenceError> {
        let key = Self::canonicalize(path);

        let rx = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(&key) {
                Some(Slot::Loaded(model)) => return Ok(model.clone()),
                Some(Slot::Loading(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    slots.insert(key.clone(), Slot::Loading(Vec::new()));
                    None
                }
            }
        };

        if let Some(rx) = rx {
            let result = rx
                .await
                .map_err(|_| InferenceError::NotLoaded(key.display().to_string()))?;
            return result.map_err(InferenceError::Catalog);
        }

        let load_path = key.clone();
        let result = tokio::task::spawn_blocking(move || Model::load(&load_path))
            .await
            .map_err(|e| InferenceError::Catalog(e.to_string()))?;

        let mut slots = self.slots.lock().await;
        let waiters = match slots.remove(&key) {
            Some(Slot::Loading(waiters)) => waiters,
            _ => Vec::new(),
        };

        match result {
            Ok(model) => {
                let model = Arc::new(model);
                slots.insert(key.clone(), Slot::Loaded(model.clone()));
                info!(path = %key.display(), "model loaded");
                for tx in waiters {
                    let _ = tx.send(Ok(model.clone()));
                }
                Ok(model)
            }
            Err(e) => {
                let message = e.to_string();
                for tx in waiters {
                    let _ = tx.send(Err(message.clone()));
                }
                Err(e)
            }
        }
    }

    pub async fn get(&self, path: &Path) -> Option<Arc<Model>> {
        let key = Self::canonicalize(path);
        match self.slots.lock().await.get(&key) {
            Some(Slot::Loaded(model)) => Some(model.clone()),
            _ => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn infer(
        &self,
        path: &Path,
        image: &RgbImage,
        conf_threshold: f32,
        nms_iou: f32,
        classes_filter: Option<&[usize]>,
        catalog: &ClassCatalog,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        let model = self
            .get(path)
            .await
            .ok_or_else(|| InferenceError::NotLoaded(path.display().to_string()))?;
        model.infer(image, conf_threshold, nms_iou, classes_filter, catalog)
    }

    pub async fn unload(&self, path: &Path) {
        let key = Self::canonicalize(path);
        self.slots.lock().await.remove(&key);
    }

    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }

    /// Starts (or restarts) an idle-eviction countdown. Call when the
    /// last active connection ends; cancel by starting a new connection
    /// and calling [`Self::cancel_idle_timer`].
    pub async fn start_idle_timer(self: &Arc<Self>) {
        let pool = self.clone();
        let timeout = self.idle_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("idle timeout reached, evicting all cached models");
            pool.clear().await;
        });
        let mut guard = self.idle_task.lock().await;
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }

    pub async fn cancel_idle_timer(&self) {
        if let Some(handle) = self.idle_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Seeds the cache with an already-built model under `path`'s
    /// canonical key, bypassing the on-disk load. For end-to-end tests
    /// that need a connection to reach `Ready` without a real model file.
    #[cfg(feature = "test-util")]
    pub async fn insert_for_test(&self, path: &Path, model: Model) {
        let key = Self::canonicalize(path);
        self.slots.lock().await.insert(key, Slot::Loaded(Arc::new(model)));
    }
}
