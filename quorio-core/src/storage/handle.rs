use super::ObjectLayer;
use crate::{QuorioError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The node's current storage engine.
///
/// Readers clone the `Arc` out under a shared lock. Replacing the engine takes
/// the exclusive lock only for the pointer update; the retired instance is
/// shut down after the lock is released, so nothing read from the handle is
/// ever an instance that has been shut down without being replaced.
pub struct EngineHandle {
    current: RwLock<Option<Arc<dyn ObjectLayer>>>,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn ObjectLayer>) -> Self {
        Self {
            current: RwLock::new(Some(engine)),
        }
    }

    /// A handle with no engine yet; reads fail with `ServerNotInitialized`.
    pub fn uninitialized() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Result<Arc<dyn ObjectLayer>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(QuorioError::ServerNotInitialized)
    }

    pub async fn is_initialized(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Installs `engine` and returns the previous instance, if any.
    pub async fn swap(&self, engine: Arc<dyn ObjectLayer>) -> Option<Arc<dyn ObjectLayer>> {
        let mut slot = self.current.write().await;
        slot.replace(engine)
    }

    /// Installs `engine`, then shuts the previous instance down.
    ///
    /// A shutdown failure is logged: the new engine is already authoritative.
    pub async fn replace_and_retire(&self, engine: Arc<dyn ObjectLayer>) {
        let Some(previous) = self.swap(engine).await else {
            return;
        };

        if let Err(error) = previous.shutdown().await {
            tracing::warn!("Failed to shut down retired storage engine: {}", error);
        }
    }
}
