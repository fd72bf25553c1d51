//! Command handlers. Each returns the text to print.

use anyhow::Context;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use toolgate_core::{RateLimiter, RateLimiterBuilder, ToolCache};
use toolgate_foundation::{EnvSnapshot, GateConfig, RateLimiterLedger};

// ============================================================================
// Cache
// ============================================================================

fn tool_cache(config: &Arc<GateConfig>, name: &str, dir: Option<&Path>) -> ToolCache {
    let cache = ToolCache::new(name).config(config.clone());
    match dir {
        Some(dir) => cache.base_dir(dir),
        None => cache,
    }
}

pub fn cache_stats(config: &Arc<GateConfig>, name: &str, dir: Option<&Path>) -> anyhow::Result<String> {
    let stats = tool_cache(config, name, dir)
        .stats(None)
        .with_context(|| format!("Failed to read stats for cache '{}'", name))?;
    Ok(serde_json::to_string_pretty(&stats)?)
}

pub fn cache_clear(config: &Arc<GateConfig>, name: &str, dir: Option<&Path>) -> anyhow::Result<String> {
    let cache = tool_cache(config, name, dir);
    let removed = cache
        .clear(None)
        .with_context(|| format!("Failed to clear cache '{}'", name))?;
    Ok(format!(
        "Removed {} entries from {}",
        removed,
        cache.resolve_dir(None).display()
    ))
}

pub fn cache_purge(config: &Arc<GateConfig>, name: &str, dir: Option<&Path>) -> anyhow::Result<String> {
    let cache = tool_cache(config, name, dir);
    let removed = cache
        .purge_expired(None)
        .with_context(|| format!("Failed to purge cache '{}'", name))?;
    Ok(format!(
        "Purged {} expired entries from {}",
        removed,
        cache.resolve_dir(None).display()
    ))
}

// ============================================================================
// Limiter
// ============================================================================

fn limiter_builder(
    config: &Arc<GateConfig>,
    name: &str,
    state_dir: Option<&Path>,
) -> RateLimiterBuilder {
    let builder = RateLimiter::builder(name).config(config.clone());
    match state_dir {
        Some(dir) => builder.state_dir(dir),
        None => builder,
    }
}

pub fn limiter_show(
    config: &Arc<GateConfig>,
    name: &str,
    state_dir: Option<&Path>,
) -> anyhow::Result<String> {
    let limiter = limiter_builder(config, name, state_dir).build()?;
    let mut out = String::new();
    writeln!(out, "Limiter:     {}", name)?;
    writeln!(out, "State file:  {}", limiter.state_file().display())?;

    match limiter.snapshot()? {
        None => writeln!(out, "No state recorded yet")?,
        Some(ledger) => write_ledger(&mut out, &ledger)?,
    }
    Ok(out)
}

fn write_ledger(out: &mut String, ledger: &RateLimiterLedger) -> std::fmt::Result {
    writeln!(out, "Requests:    {}", ledger.len())?;
    if let Some(oldest) = ledger.oldest() {
        writeln!(out, "Oldest:      {:.6}", oldest)?;
    }
    if let Some(newest) = ledger.requests.iter().copied().reduce(f64::max) {
        writeln!(out, "Newest:      {:.6}", newest)?;
    }
    match ledger.boot_wall_time {
        Some(boot) => writeln!(out, "Boot time:   {} ({:.3})", format_wall_time(boot), boot),
        None => writeln!(out, "Boot time:   unknown"),
    }
}

fn format_wall_time(secs: f64) -> String {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S%.3f %Z")
                .to_string()
        })
        .unwrap_or_else(|| "out of range".to_string())
}

pub fn limiter_reset(
    config: &Arc<GateConfig>,
    name: &str,
    state_dir: Option<&Path>,
) -> anyhow::Result<String> {
    let limiter = limiter_builder(config, name, state_dir).build()?;
    limiter
        .reset()
        .with_context(|| format!("Failed to reset limiter '{}'", name))?;
    Ok(format!("Reset {}", limiter.state_file().display()))
}

pub async fn limiter_acquire(
    config: &Arc<GateConfig>,
    name: &str,
    state_dir: Option<&Path>,
    max_requests: usize,
    window_secs: f64,
) -> anyhow::Result<String> {
    let window = Duration::try_from_secs_f64(window_secs)
        .ok()
        .filter(|w| !w.is_zero())
        .ok_or_else(|| anyhow::anyhow!("--window must be a positive number of seconds, got {}", window_secs))?;

    let limiter = limiter_builder(config, name, state_dir)
        .max_requests(max_requests)
        .time_window(window)
        .build()?;

    match limiter.acquire_stamped_async().await? {
        Some(stamp) => Ok(format!("Acquired '{}' at {:.6}", name, stamp)),
        None => Ok(format!(
            "Proceeded without limiting: {} is unusable",
            limiter.state_file().display()
        )),
    }
}

// ============================================================================
// Config
// ============================================================================

/// Effective settings and the tier each came from
pub fn show_config(config: &GateConfig, env: &EnvSnapshot) -> anyhow::Result<String> {
    let mut out = String::new();

    let root = config.cache_root_with(None, env);
    writeln!(out, "cache_root        {} [{}]", root.value.display(), root.source)?;

    let limit = config.size_limit_with(None, env);
    writeln!(out, "size_limit_bytes  {} [{}]", limit.value, limit.source)?;

    let expire = config.expire_with(None, env);
    match expire.value {
        Some(ttl) => writeln!(out, "expire_secs       {} [{}]", ttl.as_secs_f64(), expire.source)?,
        None => writeln!(out, "expire_secs       never [{}]", expire.source)?,
    }

    let fetch = config.fetch_limit_with(None, env);
    writeln!(out, "fetch_limit       {} [{}]", fetch.value, fetch.source)?;

    let state = config.state_dir_with(None, env);
    writeln!(out, "state_dir         {} [{}]", state.value.display(), state.source)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_foundation::ENV_FETCH_LIMIT;

    #[test]
    fn test_cache_stats_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(GateConfig::new());

        let out = cache_stats(&config, "chembl", Some(dir.path())).unwrap();
        let stats: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(stats["name"], "chembl");
        assert_eq!(stats["count"], 0);
        assert_eq!(stats["version"], "1");

        assert!(cache_clear(&config, "chembl", Some(dir.path()))
            .unwrap()
            .starts_with("Removed 0 entries"));
        assert!(cache_purge(&config, "chembl", Some(dir.path()))
            .unwrap()
            .starts_with("Purged 0 expired"));
    }

    #[tokio::test]
    async fn test_limiter_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(GateConfig::new());

        let out = limiter_show(&config, "pubchem", Some(dir.path())).unwrap();
        assert!(out.contains("No state recorded yet"));

        let out = limiter_acquire(&config, "pubchem", Some(dir.path()), 2, 1.0)
            .await
            .unwrap();
        assert!(out.starts_with("Acquired 'pubchem'"));

        let out = limiter_show(&config, "pubchem", Some(dir.path())).unwrap();
        assert!(out.contains("Requests:    1"));
        assert!(out.contains("Boot time:"));

        limiter_reset(&config, "pubchem", Some(dir.path())).unwrap();
        let out = limiter_show(&config, "pubchem", Some(dir.path())).unwrap();
        assert!(out.contains("Requests:    0"));
    }

    #[tokio::test]
    async fn test_acquire_rejects_bad_window() {
        let config = Arc::new(GateConfig::new());
        assert!(limiter_acquire(&config, "x", None, 1, 0.0).await.is_err());
        assert!(limiter_acquire(&config, "x", None, 1, f64::NAN).await.is_err());
        assert!(limiter_acquire(&config, "x", None, 1, 1e30).await.is_err());
    }

    #[test]
    fn test_show_config_reports_sources() {
        let config = GateConfig::new();
        config.set_cache_root("/srv/cache").unwrap();
        let env = EnvSnapshot::from_pairs([(ENV_FETCH_LIMIT, "20")]);

        let out = show_config(&config, &env).unwrap();
        assert!(out.contains("/srv/cache [programmatic]"));
        assert!(out.contains("fetch_limit       20 [environment]"));
        assert!(out.contains("expire_secs       never [fallback]"));
    }

    #[test]
    fn test_format_wall_time() {
        assert!(format_wall_time(0.0).starts_with("19"));
        assert_eq!(format_wall_time(f64::MAX), "out of range");
    }
}
