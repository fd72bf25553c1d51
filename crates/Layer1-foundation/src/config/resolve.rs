//! Layered value resolution
//!
//! Every effective setting is picked from four tiers, first hit wins:
//! explicit override, programmatic default, environment, built-in fallback.
//! Functions here are pure over an [`EnvSnapshot`] so tests never have to
//! touch the real process environment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Environment variable names
// ============================================================================

pub const ENV_CACHE_DIR: &str = "TOOLGATE_CACHE_DIR";
pub const ENV_CACHE_SIZE_LIMIT_BYTES: &str = "TOOLGATE_CACHE_SIZE_LIMIT_BYTES";
pub const ENV_CACHE_EXPIRE_SECS: &str = "TOOLGATE_CACHE_EXPIRE_SECS";
pub const ENV_FETCH_LIMIT: &str = "TOOLGATE_FETCH_LIMIT";
pub const ENV_STATE_DIR: &str = "TOOLGATE_STATE_DIR";

// ============================================================================
// Fallbacks
// ============================================================================

/// Largest size limit SQLite can store as an integer
pub const FALLBACK_SIZE_LIMIT_BYTES: u64 = i64::MAX as u64;
pub const FALLBACK_FETCH_LIMIT: usize = 50;
const CACHE_ROOT_DIR_NAME: &str = "toolgate";

/// Which tier produced a resolved value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Programmatic,
    Environment,
    Fallback,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Programmatic => "programmatic",
            ConfigSource::Environment => "environment",
            ConfigSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved value together with the tier it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> Resolved<T> {
    fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

// ============================================================================
// EnvSnapshot
// ============================================================================

/// Point-in-time copy of the environment variables Toolgate reads
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment
    pub fn capture() -> Self {
        let vars = [
            ENV_CACHE_DIR,
            ENV_CACHE_SIZE_LIMIT_BYTES,
            ENV_CACHE_EXPIRE_SECS,
            ENV_FETCH_LIMIT,
            ENV_STATE_DIR,
        ]
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
        .collect();
        Self { vars }
    }

    /// An empty snapshot (environment tier never hits)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value of a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        let raw = self.get(name)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                debug!("Ignoring unparseable {}={:?}", name, raw);
                None
            }
        }
    }
}

// ============================================================================
// Resolution functions
// ============================================================================

/// Default cache root when nothing else is configured
pub fn fallback_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_ROOT_DIR_NAME)
}

pub fn resolve_cache_root(
    override_dir: Option<&Path>,
    programmatic: Option<&Path>,
    env: &EnvSnapshot,
) -> Resolved<PathBuf> {
    if let Some(dir) = override_dir {
        return Resolved::new(dir.to_path_buf(), ConfigSource::Override);
    }
    if let Some(dir) = programmatic {
        return Resolved::new(dir.to_path_buf(), ConfigSource::Programmatic);
    }
    if let Some(dir) = env.get(ENV_CACHE_DIR) {
        return Resolved::new(PathBuf::from(dir), ConfigSource::Environment);
    }
    Resolved::new(fallback_cache_root(), ConfigSource::Fallback)
}

pub fn resolve_size_limit(
    override_limit: Option<u64>,
    programmatic: Option<u64>,
    env: &EnvSnapshot,
) -> Resolved<u64> {
    if let Some(limit) = override_limit {
        return Resolved::new(limit, ConfigSource::Override);
    }
    if let Some(limit) = programmatic {
        return Resolved::new(limit, ConfigSource::Programmatic);
    }
    if let Some(limit) = env
        .parse::<u64>(ENV_CACHE_SIZE_LIMIT_BYTES)
        .filter(|l| *l > 0)
    {
        return Resolved::new(limit.min(FALLBACK_SIZE_LIMIT_BYTES), ConfigSource::Environment);
    }
    Resolved::new(FALLBACK_SIZE_LIMIT_BYTES, ConfigSource::Fallback)
}

/// Resolve the cache TTL. `None` means entries never expire.
pub fn resolve_expire(
    override_expire: Option<Duration>,
    programmatic: Option<Duration>,
    env: &EnvSnapshot,
) -> Resolved<Option<Duration>> {
    if let Some(ttl) = override_expire {
        return Resolved::new(Some(ttl), ConfigSource::Override);
    }
    if let Some(ttl) = programmatic {
        return Resolved::new(Some(ttl), ConfigSource::Programmatic);
    }
    if let Some(secs) = env
        .parse::<f64>(ENV_CACHE_EXPIRE_SECS)
        .filter(|s| *s > 0.0)
    {
        match Duration::try_from_secs_f64(secs) {
            Ok(ttl) => return Resolved::new(Some(ttl), ConfigSource::Environment),
            Err(e) => debug!("Ignoring {}={}: {}", ENV_CACHE_EXPIRE_SECS, secs, e),
        }
    }
    Resolved::new(None, ConfigSource::Fallback)
}

pub fn resolve_fetch_limit(
    override_limit: Option<usize>,
    programmatic: Option<usize>,
    env: &EnvSnapshot,
) -> Resolved<usize> {
    if let Some(n) = override_limit {
        return Resolved::new(n, ConfigSource::Override);
    }
    if let Some(n) = programmatic {
        return Resolved::new(n, ConfigSource::Programmatic);
    }
    if let Some(n) = env.parse::<usize>(ENV_FETCH_LIMIT).filter(|n| *n > 0) {
        return Resolved::new(n, ConfigSource::Environment);
    }
    Resolved::new(FALLBACK_FETCH_LIMIT, ConfigSource::Fallback)
}

pub fn resolve_state_dir(
    override_dir: Option<&Path>,
    programmatic: Option<&Path>,
    env: &EnvSnapshot,
) -> Resolved<PathBuf> {
    if let Some(dir) = override_dir {
        return Resolved::new(dir.to_path_buf(), ConfigSource::Override);
    }
    if let Some(dir) = programmatic {
        return Resolved::new(dir.to_path_buf(), ConfigSource::Programmatic);
    }
    if let Some(dir) = env.get(ENV_STATE_DIR) {
        return Resolved::new(PathBuf::from(dir), ConfigSource::Environment);
    }
    Resolved::new(std::env::temp_dir(), ConfigSource::Fallback)
}
