//! Config - layered configuration
//!
//! - `resolve.rs` - pure precedence rules (override → programmatic → env → fallback)
//! - `gate.rs` - GateConfig, the programmatic tier shared by caches and limiters

mod gate;
mod resolve;

pub use gate::{validate_expire, ConfigDefaults, GateConfig};
pub use resolve::{
    fallback_cache_root, resolve_cache_root, resolve_expire, resolve_fetch_limit,
    resolve_size_limit, resolve_state_dir, ConfigSource, EnvSnapshot, Resolved, ENV_CACHE_DIR,
    ENV_CACHE_EXPIRE_SECS, ENV_CACHE_SIZE_LIMIT_BYTES, ENV_FETCH_LIMIT, ENV_STATE_DIR,
    FALLBACK_FETCH_LIMIT, FALLBACK_SIZE_LIMIT_BYTES,
};
