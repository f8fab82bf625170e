//! Model cache service
//!
//! Maps model names to model bytes. Owned by the host and injected into the
//! pipeline at construction, so several pipelines can share one cache.
//!
//! Concurrent requests for the same name share a single in-flight fetch. A
//! failed fetch leaves nothing behind, so the next `Init` retries it.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Future returned by `ModelFetcher::fetch`
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Source of model bytes
pub trait ModelFetcher: Send + Sync {
    fn fetch<'a>(&'a self, name: &'a str) -> FetchFuture<'a>;
}

type Slot = Arc<OnceCell<Arc<[u8]>>>;

/// Name-keyed model cache with in-flight deduplication
pub struct ModelCache {
    fetcher: Arc<dyn ModelFetcher>,
    entries: Mutex<HashMap<String, Slot>>,
}

impl ModelCache {
    pub fn new(fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self {
            fetcher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by a directory of model files
    pub fn from_directory(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectoryFetcher::new(dir)))
    }

    /// Model bytes for `name`, fetching them on first use
    pub async fn get(&self, name: &str) -> Result<Arc<[u8]>> {
        let slot = self.slot(name);

        let result = slot
            .get_or_try_init(|| async {
                debug!("Fetching model '{}'", name);
                let bytes = self.fetcher.fetch(name).await?;
                info!("Model '{}' cached ({} bytes)", name, bytes.len());
                Ok::<_, Error>(Arc::<[u8]>::from(bytes))
            })
            .await;

        match result {
            Ok(bytes) => Ok(Arc::clone(bytes)),
            Err(e) => {
                warn!("Model '{}' fetch failed: {}", name, e);
                self.forget_if_empty(name, &slot);
                Err(e)
            }
        }
    }

    /// Whether `name` has been fetched successfully
    pub fn contains(&self, name: &str) -> bool {
        self.lock()
            .get(name)
            .map_or(false, |slot| slot.initialized())
    }

    /// Drop a cached model; the next `get` fetches it again
    pub fn evict(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, name: &str) -> Slot {
        let mut entries = self.lock();
        Arc::clone(
            entries
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    fn forget_if_empty(&self, name: &str, slot: &Slot) {
        let mut entries = self.lock();
        let stale = entries
            .get(name)
            .map_or(false, |current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            entries.remove(name);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads `<dir>/<name>`
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let plain = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if name.is_empty() || !plain {
            return Err(Error::Cache(format!("invalid model name '{}'", name)));
        }
        Ok(self.dir.join(relative))
    }
}

impl ModelFetcher for DirectoryFetcher {
    fn fetch<'a>(&'a self, name: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let path = self.path_for(name)?;
            tokio::fs::read(&path)
                .await
                .map_err(|e| Error::Cache(format!("{}: {}", path.display(), e)))
        })
    }
}
