use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use contracts::{NamespaceId, SimError, WorldConfig};
use tokio::sync::Mutex;

use crate::SimEngine;

/// Process-wide map of `namespace -> engine handle`, lazily opened. The map
/// lock is held only to look up or insert a handle; each engine serializes
/// its own mutating paths behind its own mutex.
#[derive(Debug)]
pub struct Registry {
    data_dir: PathBuf,
    engines: Mutex<HashMap<String, Arc<Mutex<SimEngine>>>>,
}

impl Registry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Open (or return the cached handle for) one namespace.
    pub async fn engine(
        &self,
        namespace: &NamespaceId,
    ) -> Result<Arc<Mutex<SimEngine>>, SimError> {
        let mut engines = self.engines.lock().await;
        if let Some(handle) = engines.get(namespace.as_str()) {
            return Ok(Arc::clone(handle));
        }
        let engine = SimEngine::open(&self.data_dir, namespace)?;
        let handle = Arc::new(Mutex::new(engine));
        engines.insert(namespace.as_str().to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Initialize a fresh namespace and cache its handle.
    pub async fn create(
        &self,
        namespace: &NamespaceId,
        config: WorldConfig,
    ) -> Result<Arc<Mutex<SimEngine>>, SimError> {
        let mut engines = self.engines.lock().await;
        if engines.contains_key(namespace.as_str()) {
            return Err(SimError::NamespaceExists(namespace.to_string()));
        }
        let engine = SimEngine::create(&self.data_dir, namespace, config)?;
        let handle = Arc::new(Mutex::new(engine));
        engines.insert(namespace.as_str().to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Snapshot of the open handles, for the collect-deadline sweeper.
    pub async fn open_engines(&self) -> Vec<(String, Arc<Mutex<SimEngine>>)> {
        self.engines
            .lock()
            .await
            .iter()
            .map(|(namespace, handle)| (namespace.clone(), Arc::clone(handle)))
            .collect()
    }
}
