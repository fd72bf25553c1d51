//! Memoizing decorator
//!
//! [`ToolCache`] describes one logical cache; [`ToolCache::wrap`] turns a
//! [`ToolCall`] into a [`Memoized`] call that looks results up on disk
//! before computing them.
//!
//! # Directory resolution (per call)
//!
//! 1. `_cache_dir` / [`CallOptions::cache_dir`]
//! 2. the decorator's `base_dir`
//! 3. `{resolved cache root}/{name}`
//!
//! # Reserved keyword arguments
//!
//! | Keyword | Type | Effect |
//! |---------|------|--------|
//! | `_cache_dir` | string | directory for this call |
//! | `_offline_only` | bool / null | forbid computing on a miss |
//! | `_cache_expire_override` | seconds / null | expiry of this write |
//! | `_force_refresh` | bool | skip the lookup and overwrite |
//!
//! They are removed before the key is computed and before the wrapped
//! function sees the arguments.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use toolgate_foundation::{DiskStore, Error, GateConfig, Result};

use super::key::{default_key, version_string, ArgValue, CallArgs, FunctionId, KeyFn};
use super::registry::{CacheStats, StoreRegistry};
use super::value::{decode_entry, EncodedValue};
use crate::middleware::ToolCall;

pub const RESERVED_CACHE_DIR: &str = "_cache_dir";
pub const RESERVED_OFFLINE_ONLY: &str = "_offline_only";
pub const RESERVED_EXPIRE_OVERRIDE: &str = "_cache_expire_override";
pub const RESERVED_FORCE_REFRESH: &str = "_force_refresh";

/// Default `cache_version`
pub const DEFAULT_CACHE_VERSION: &str = "1";

// ============================================================================
// CallOptions
// ============================================================================

/// Per-call overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub cache_dir: Option<PathBuf>,
    pub offline_only: Option<bool>,
    pub expire: Option<Duration>,
    pub force_refresh: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn offline_only(mut self, offline: bool) -> Self {
        self.offline_only = Some(offline);
        self
    }

    pub fn expire(mut self, ttl: Duration) -> Self {
        self.expire = Some(ttl);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Remove the reserved keywords from `args` and read them
    pub fn extract(args: &mut CallArgs) -> Result<Self> {
        let mut options = Self::default();

        if let Some(v) = reserved(args, RESERVED_CACHE_DIR)? {
            match v {
                Value::Null => {}
                Value::String(s) if !s.is_empty() => options.cache_dir = Some(PathBuf::from(s)),
                other => return Err(wrong_type(RESERVED_CACHE_DIR, "a non-empty path", &other)),
            }
        }

        if let Some(v) = reserved(args, RESERVED_OFFLINE_ONLY)? {
            match v {
                Value::Null => {}
                Value::Bool(b) => options.offline_only = Some(b),
                other => return Err(wrong_type(RESERVED_OFFLINE_ONLY, "a bool", &other)),
            }
        }

        if let Some(v) = reserved(args, RESERVED_EXPIRE_OVERRIDE)? {
            match v {
                Value::Null => {}
                Value::Number(n) => match n.as_f64().map(Duration::try_from_secs_f64) {
                    Some(Ok(ttl)) => options.expire = Some(ttl),
                    _ => {
                        return Err(wrong_type(
                            RESERVED_EXPIRE_OVERRIDE,
                            "a non-negative number of seconds",
                            &Value::Number(n),
                        ))
                    }
                },
                other => {
                    return Err(wrong_type(
                        RESERVED_EXPIRE_OVERRIDE,
                        "a number of seconds",
                        &other,
                    ))
                }
            }
        }

        if let Some(v) = reserved(args, RESERVED_FORCE_REFRESH)? {
            match v {
                Value::Null => {}
                Value::Bool(b) => options.force_refresh = b,
                other => return Err(wrong_type(RESERVED_FORCE_REFRESH, "a bool", &other)),
            }
        }

        Ok(options)
    }

    /// Fields set in `explicit` win; force refresh if either asks for it
    pub fn overridden_by(self, explicit: CallOptions) -> Self {
        Self {
            cache_dir: explicit.cache_dir.or(self.cache_dir),
            offline_only: explicit.offline_only.or(self.offline_only),
            expire: explicit.expire.or(self.expire),
            force_refresh: explicit.force_refresh || self.force_refresh,
        }
    }
}

fn reserved(args: &mut CallArgs, name: &str) -> Result<Option<Value>> {
    match args.take(name) {
        None => Ok(None),
        Some(ArgValue::Json(v)) => Ok(Some(v)),
        Some(ArgValue::Repr(text)) => Err(Error::InvalidInput(format!(
            "{} must be a plain value, got {}",
            name, text
        ))),
    }
}

fn wrong_type(name: &str, expected: &str, got: &Value) -> Error {
    Error::InvalidInput(format!("{} must be {}, got {}", name, expected, got))
}

// ============================================================================
// ToolCache
// ============================================================================

/// Settings of one logical disk cache
#[derive(Clone)]
pub struct ToolCache {
    name: String,
    base_dir: Option<PathBuf>,
    size_limit_bytes: Option<u64>,
    expire: Option<Duration>,
    offline_only: bool,
    cache_version: String,
    include_fingerprint: bool,
    tag: Option<String>,
    key_fn: Option<KeyFn>,
    config: Arc<GateConfig>,
    registry: Arc<StoreRegistry>,
}

impl Debug for ToolCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCache")
            .field("name", &self.name)
            .field("base_dir", &self.base_dir)
            .field("size_limit_bytes", &self.size_limit_bytes)
            .field("expire", &self.expire)
            .field("offline_only", &self.offline_only)
            .field("cache_version", &self.cache_version)
            .field("include_fingerprint", &self.include_fingerprint)
            .field("tag", &self.tag)
            .field("key_fn", &self.key_fn.is_some())
            .finish()
    }
}

impl ToolCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_dir: None,
            size_limit_bytes: None,
            expire: None,
            offline_only: false,
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            include_fingerprint: true,
            tag: None,
            key_fn: None,
            config: GateConfig::global(),
            registry: StoreRegistry::global(),
        }
    }

    /// Fixed directory, used instead of `{cache root}/{name}`
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Size bound of a store this cache opens first. Must be positive;
    /// `0` makes every call fail with [`Error::InvalidConfig`].
    pub fn size_limit_bytes(mut self, bytes: u64) -> Self {
        self.size_limit_bytes = Some(bytes);
        self
    }

    pub fn expire(mut self, ttl: Duration) -> Self {
        self.expire = Some(ttl);
        self
    }

    pub fn offline_only(mut self, offline: bool) -> Self {
        self.offline_only = offline;
        self
    }

    pub fn cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    /// Mix a hash of the function source into the version (default: on)
    pub fn include_fingerprint(mut self, include: bool) -> Self {
        self.include_fingerprint = include;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&FunctionId, &CallArgs) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    pub fn config(mut self, config: Arc<GateConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: Arc<StoreRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn wrap<C>(self, inner: C) -> Memoized<C>
    where
        C: ToolCall,
        C::Output: Serialize + DeserializeOwned + Debug,
    {
        Memoized::new(inner, self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Store access
    // ========================================================================

    /// Directory for a call, resolved now
    pub fn resolve_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            return dir.to_path_buf();
        }
        if let Some(dir) = &self.base_dir {
            return dir.clone();
        }
        self.config.cache_root(None).join(&self.name)
    }

    pub fn store(&self, override_dir: Option<&Path>) -> Result<Arc<DiskStore>> {
        let dir = self.resolve_dir(override_dir);
        self.registry
            .get_store(&dir, self.size_limit_bytes, &self.config)
    }

    /// Statistics reported under `version`
    fn stats_as(&self, override_dir: Option<&Path>, version: &str) -> Result<CacheStats> {
        let dir = self.resolve_dir(override_dir);
        self.registry.cache_stats(
            &dir,
            self.size_limit_bytes,
            &self.config,
            &self.name,
            version,
            self.tag.as_deref(),
        )
    }

    /// Statistics, reporting the configured cache version
    pub fn stats(&self, override_dir: Option<&Path>) -> Result<CacheStats> {
        self.stats_as(override_dir, &self.cache_version)
    }

    /// Remove every entry
    pub fn clear(&self, override_dir: Option<&Path>) -> Result<usize> {
        self.store(override_dir)?.clear()
    }

    /// Remove expired entries
    pub fn purge_expired(&self, override_dir: Option<&Path>) -> Result<usize> {
        self.store(override_dir)?.purge_expired()
    }
}

// ============================================================================
// Memoized
// ============================================================================

/// A [`ToolCall`] whose results are cached on disk
pub struct Memoized<C> {
    inner: C,
    cache: ToolCache,
    version: String,
}

impl<C: Debug> Debug for Memoized<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("inner", &self.inner)
            .field("cache", &self.cache)
            .field("version", &self.version)
            .finish()
    }
}

impl<C> Memoized<C>
where
    C: ToolCall,
    C::Output: Serialize + DeserializeOwned + Debug,
{
    fn new(inner: C, cache: ToolCache) -> Self {
        let version = version_string(
            &cache.cache_version,
            cache.include_fingerprint,
            inner.identity(),
        );
        Self {
            inner,
            cache,
            version,
        }
    }

    /// Version string mixed into every key
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn cache_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        self.cache.resolve_dir(override_dir)
    }

    /// Key for `args` (reserved keywords already removed)
    pub fn key_for(&self, args: &CallArgs) -> String {
        match &self.cache.key_fn {
            Some(key_fn) => key_fn(self.inner.identity(), args),
            None => default_key(
                self.inner.identity(),
                args,
                &self.version,
                self.cache.tag.as_deref(),
            ),
        }
    }

    pub fn stats(&self, override_dir: Option<&Path>) -> Result<CacheStats> {
        self.cache.stats_as(override_dir, &self.version)
    }

    /// Call with explicit options. Reserved keywords in `args` are honored
    /// too, but a field set in `options` wins.
    pub fn call_with(&self, args: &CallArgs, options: CallOptions) -> Result<C::Output> {
        let mut args = args.clone();
        let options = CallOptions::extract(&mut args)?.overridden_by(options);

        let dir = self.cache_dir(options.cache_dir.as_deref());
        let key = self.key_for(&args);
        let offline_only = options.offline_only.unwrap_or(self.cache.offline_only);

        let store = match self
            .cache
            .registry
            .get_store(&dir, self.cache.size_limit_bytes, &self.cache.config)
        {
            Ok(store) => Some(store),
            Err(e @ Error::InvalidConfig(_)) => return Err(e),
            Err(e) => {
                warn!(
                    "Cache '{}' unavailable at {}: {}. Calling uncached.",
                    self.cache.name,
                    dir.display(),
                    e
                );
                None
            }
        };

        if !options.force_refresh {
            if let Some(hit) = store.as_deref().and_then(|s| self.lookup(s, &key)) {
                return Ok(hit);
            }
        }

        if offline_only {
            return Err(Error::offline_miss(&key, dir));
        }

        let result = self.inner.call(&args)?;

        if let Some(store) = store.as_deref() {
            let expire = self
                .cache
                .config
                .expire(options.expire.or(self.cache.expire));
            self.persist(store, &key, &result, expire);
        }

        Ok(result)
    }

    fn lookup(&self, store: &DiskStore, key: &str) -> Option<C::Output> {
        let entry = match store.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("Cache miss in '{}' for {}", self.cache.name, short(key));
                return None;
            }
            Err(e) => {
                warn!("Cache lookup failed in '{}': {}", self.cache.name, e);
                return None;
            }
        };

        match decode_entry(&entry) {
            Some(value) => {
                debug!("Cache hit in '{}' for {}", self.cache.name, short(key));
                Some(value)
            }
            None => {
                debug!(
                    "Cached {} entry in '{}' does not decode, recomputing",
                    entry.encoding, self.cache.name
                );
                None
            }
        }
    }

    fn persist(&self, store: &DiskStore, key: &str, result: &C::Output, expire: Option<Duration>) {
        let encoded = EncodedValue::encode(result);
        let tier = encoded.tier();
        if let EncodedValue::Failed(reason) = &encoded {
            warn!("Result not cached in '{}': {}", self.cache.name, reason);
            return;
        }

        let Some(entry) = encoded.into_entry() else {
            warn!("Result not cached in '{}': could not encode", self.cache.name);
            return;
        };

        match store.set(key, &entry, expire) {
            Ok(()) => debug!(
                "Cached {} ({}, {} bytes) in '{}'",
                short(key),
                tier,
                entry.size(),
                self.cache.name
            ),
            Err(e) => warn!("Cache write failed in '{}': {}", self.cache.name, e),
        }
    }
}

fn short(key: &str) -> &str {
    key.get(..10).unwrap_or(key)
}

impl<C> ToolCall for Memoized<C>
where
    C: ToolCall,
    C::Output: Serialize + DeserializeOwned + Debug,
{
    type Output = C::Output;

    fn identity(&self) -> &FunctionId {
        self.inner.identity()
    }

    fn call(&self, args: &CallArgs) -> Result<Self::Output> {
        self.call_with(args, CallOptions::default())
    }
}
