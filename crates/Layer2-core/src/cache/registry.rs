//! Store registry - one open DiskStore per cache directory per process

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use toolgate_foundation::{DiskStore, Error, GateConfig, Result};

static GLOBAL_REGISTRY: OnceLock<Arc<StoreRegistry>> = OnceLock::new();

/// Point-in-time statistics for one logical cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub directory: PathBuf,
    pub size_limit_bytes: u64,
    pub bytes: u64,
    pub count: usize,
    pub version: String,
    pub tag: Option<String>,
}

/// Maps canonical directories to open stores.
///
/// The first open of a directory fixes its size limit; later requests for
/// the same directory get the existing handle whatever limit they pass.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<PathBuf, Arc<DiskStore>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<StoreRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(StoreRegistry::new()))
            .clone()
    }

    /// The store for `directory`, opened on first use
    pub fn get_store(
        &self,
        directory: &Path,
        size_limit: Option<u64>,
        config: &GateConfig,
    ) -> Result<Arc<DiskStore>> {
        if size_limit == Some(0) {
            return Err(Error::InvalidConfig(
                "size_limit_bytes must be a positive integer".into(),
            ));
        }
        std::fs::create_dir_all(directory)?;
        let resolved = directory.canonicalize()?;

        // Held across the open so one directory is never initialized twice
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(&resolved) {
            return Ok(store.clone());
        }

        let limit = config.size_limit(size_limit);
        let store = Arc::new(DiskStore::open(&resolved, limit)?);
        debug!("Registered cache store {}", resolved.display());
        stores.insert(resolved, store.clone());
        Ok(store)
    }

    /// Whether a store is open for `directory`
    pub fn contains(&self, directory: &Path) -> bool {
        match directory.canonicalize() {
            Ok(resolved) => self.stores.lock().contains_key(&resolved),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statistics for the cache in `directory`
    pub fn cache_stats(
        &self,
        directory: &Path,
        size_limit: Option<u64>,
        config: &GateConfig,
        name: &str,
        version: &str,
        tag: Option<&str>,
    ) -> Result<CacheStats> {
        let store = self.get_store(directory, size_limit, config)?;
        Ok(CacheStats {
            name: name.to_string(),
            directory: directory.to_path_buf(),
            size_limit_bytes: store.size_limit(),
            bytes: store.volume()?,
            count: store.len()?,
            version: version.to_string(),
            tag: tag.map(str::to_string),
        })
    }
}
