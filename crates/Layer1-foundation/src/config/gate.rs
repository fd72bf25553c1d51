//! GateConfig - process configuration for caches and rate limiters

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::resolve::{
    resolve_cache_root, resolve_expire, resolve_fetch_limit, resolve_size_limit,
    resolve_state_dir, EnvSnapshot, Resolved,
};
use crate::{Error, Result};

static GLOBAL_CONFIG: OnceLock<Arc<GateConfig>> = OnceLock::new();

/// Values set programmatically for the process (the second tier)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDefaults {
    pub cache_root: Option<PathBuf>,
    pub size_limit_bytes: Option<u64>,
    pub expire: Option<Duration>,
    pub fetch_limit: Option<usize>,
    pub state_dir: Option<PathBuf>,
}

/// Configuration object shared by caches and rate limiters.
///
/// Setters validate their input immediately and take `&self`, so one
/// `Arc<GateConfig>` can be handed to every decorator and limiter.
/// Resolution happens at call time, which means a setter takes effect for
/// the next call that reads the value, not for stores already opened.
///
/// [`GateConfig::global`] lives for the whole process; construct a fresh
/// one with [`GateConfig::new`] to isolate tests or embedders.
#[derive(Debug, Default)]
pub struct GateConfig {
    defaults: RwLock<ConfigDefaults>,
}

impl GateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide configuration
    pub fn global() -> Arc<GateConfig> {
        GLOBAL_CONFIG
            .get_or_init(|| Arc::new(GateConfig::new()))
            .clone()
    }

    /// Copy of the programmatic tier
    pub fn defaults(&self) -> ConfigDefaults {
        self.defaults.read().clone()
    }

    // ========================================================================
    // Setters
    // ========================================================================

    /// Set the default cache root (overrides the environment)
    pub fn set_cache_root(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("cache root must not be empty".into()));
        }
        self.defaults.write().cache_root = Some(path);
        Ok(())
    }

    /// Set default cache size limit and expiry. `None` leaves a field unset.
    pub fn set_cache_defaults(
        &self,
        size_limit_bytes: Option<u64>,
        expire: Option<Duration>,
    ) -> Result<()> {
        if size_limit_bytes == Some(0) {
            return Err(Error::InvalidConfig(
                "size_limit_bytes must be a positive integer".into(),
            ));
        }
        if let Some(ttl) = expire {
            validate_expire(ttl)?;
        }

        let mut defaults = self.defaults.write();
        defaults.size_limit_bytes = size_limit_bytes;
        defaults.expire = expire;
        Ok(())
    }

    /// Set the default expiry from seconds
    pub fn set_expire_secs(&self, secs: f64) -> Result<()> {
        let ttl = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "expire must be a positive number of seconds, got {}",
                    secs
                ))
            })?;
        self.defaults.write().expire = Some(ttl);
        Ok(())
    }

    /// Set the fixed fetch limit used by upstream API callers
    pub fn set_fetch_limit(&self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidConfig(
                "fetch limit must be a positive integer".into(),
            ));
        }
        self.defaults.write().fetch_limit = Some(n);
        Ok(())
    }

    /// Set the directory holding rate limiter state files
    pub fn set_state_dir(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("state dir must not be empty".into()));
        }
        self.defaults.write().state_dir = Some(path);
        Ok(())
    }

    pub fn clear_cache_root(&self) {
        self.defaults.write().cache_root = None;
    }

    pub fn clear_fetch_limit(&self) {
        self.defaults.write().fetch_limit = None;
    }

    pub fn clear_state_dir(&self) {
        self.defaults.write().state_dir = None;
    }

    /// Reset the whole programmatic tier
    pub fn reset(&self) {
        *self.defaults.write() = ConfigDefaults::default();
    }

    // ========================================================================
    // Resolution (environment captured at call time)
    // ========================================================================

    pub fn cache_root(&self, override_dir: Option<&Path>) -> PathBuf {
        self.cache_root_with(override_dir, &EnvSnapshot::capture())
            .into_value()
    }

    pub fn size_limit(&self, override_limit: Option<u64>) -> u64 {
        self.size_limit_with(override_limit, &EnvSnapshot::capture())
            .into_value()
    }

    pub fn expire(&self, override_expire: Option<Duration>) -> Option<Duration> {
        self.expire_with(override_expire, &EnvSnapshot::capture())
            .into_value()
    }

    pub fn fetch_limit(&self, override_limit: Option<usize>) -> usize {
        self.fetch_limit_with(override_limit, &EnvSnapshot::capture())
            .into_value()
    }

    pub fn state_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        self.state_dir_with(override_dir, &EnvSnapshot::capture())
            .into_value()
    }

    // ========================================================================
    // Resolution against an explicit snapshot
    // ========================================================================

    pub fn cache_root_with(&self, override_dir: Option<&Path>, env: &EnvSnapshot) -> Resolved<PathBuf> {
        let defaults = self.defaults.read();
        resolve_cache_root(override_dir, defaults.cache_root.as_deref(), env)
    }

    pub fn size_limit_with(&self, override_limit: Option<u64>, env: &EnvSnapshot) -> Resolved<u64> {
        resolve_size_limit(override_limit, self.defaults.read().size_limit_bytes, env)
    }

    pub fn expire_with(
        &self,
        override_expire: Option<Duration>,
        env: &EnvSnapshot,
    ) -> Resolved<Option<Duration>> {
        resolve_expire(override_expire, self.defaults.read().expire, env)
    }

    pub fn fetch_limit_with(&self, override_limit: Option<usize>, env: &EnvSnapshot) -> Resolved<usize> {
        resolve_fetch_limit(override_limit, self.defaults.read().fetch_limit, env)
    }

    pub fn state_dir_with(&self, override_dir: Option<&Path>, env: &EnvSnapshot) -> Resolved<PathBuf> {
        let defaults = self.defaults.read();
        resolve_state_dir(override_dir, defaults.state_dir.as_deref(), env)
    }
}

/// Expiry must be a positive span
pub fn validate_expire(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(Error::InvalidConfig(
            "expire must be a positive duration".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve::{ConfigSource, ENV_CACHE_SIZE_LIMIT_BYTES, ENV_FETCH_LIMIT};

    #[test]
    fn test_set_and_resolve_cache_root() {
        let config = GateConfig::new();
        config.set_cache_root("/data/cache").unwrap();

        let r = config.cache_root_with(None, &EnvSnapshot::empty());
        assert_eq!(r.value, PathBuf::from("/data/cache"));
        assert_eq!(r.source, ConfigSource::Programmatic);

        config.clear_cache_root();
        let r = config.cache_root_with(None, &EnvSnapshot::empty());
        assert_eq!(r.source, ConfigSource::Fallback);
    }

    #[test]
    fn test_set_cache_defaults() {
        let config = GateConfig::new();
        config
            .set_cache_defaults(Some(1000), Some(Duration::from_secs(60)))
            .unwrap();

        let defaults = config.defaults();
        assert_eq!(defaults.size_limit_bytes, Some(1000));
        assert_eq!(defaults.expire, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_size_limit_programmatic_then_env() {
        let config = GateConfig::new();
        let env = EnvSnapshot::from_pairs([(ENV_CACHE_SIZE_LIMIT_BYTES, "2000")]);

        assert_eq!(config.size_limit_with(Some(500), &env).value, 500);

        config.set_cache_defaults(Some(1000), None).unwrap();
        assert_eq!(config.size_limit_with(None, &env).value, 1000);

        config.set_cache_defaults(None, None).unwrap();
        assert_eq!(config.size_limit_with(None, &env).value, 2000);
    }

    #[test]
    fn test_invalid_setters_fail_immediately() {
        let config = GateConfig::new();

        assert!(matches!(
            config.set_cache_defaults(Some(0), None),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            config.set_cache_defaults(None, Some(Duration::ZERO)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(config.set_expire_secs(f64::NAN).is_err());
        assert!(config.set_expire_secs(-1.0).is_err());
        assert!(matches!(
            config.set_expire_secs(1e20),
            Err(Error::InvalidConfig(_))
        ));
        assert!(config.set_fetch_limit(0).is_err());
        assert!(config.set_cache_root("").is_err());
        assert!(config.set_state_dir("").is_err());

        // Nothing was stored by the failed calls
        assert_eq!(config.defaults(), ConfigDefaults::default());
    }

    #[test]
    fn test_fetch_limit() {
        let config = GateConfig::new();
        config.set_fetch_limit(100).unwrap();
        assert_eq!(config.fetch_limit_with(None, &EnvSnapshot::empty()).value, 100);

        config.clear_fetch_limit();
        let env = EnvSnapshot::from_pairs([(ENV_FETCH_LIMIT, "200")]);
        assert_eq!(config.fetch_limit_with(None, &env).value, 200);
        assert_eq!(config.fetch_limit_with(Some(7), &env).value, 7);
    }

    #[test]
    fn test_global_is_shared() {
        let a = GateConfig::global();
        let b = GateConfig::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
