//! Persistent tool-call cache
//!
//! - `key.rs` - function identity, call arguments, cache keys
//! - `value.rs` - tagged encoding of results
//! - `registry.rs` - one open store per directory
//! - `memoize.rs` - ToolCache / Memoized decorator

mod key;
mod memoize;
mod registry;
mod value;

pub use key::{
    canonical_json, default_key, fingerprint, version_string, ArgValue, CallArgs, FunctionId, KeyFn,
};
pub use memoize::{
    CallOptions, Memoized, ToolCache, DEFAULT_CACHE_VERSION, RESERVED_CACHE_DIR,
    RESERVED_EXPIRE_OVERRIDE, RESERVED_FORCE_REFRESH, RESERVED_OFFLINE_ONLY,
};
pub use registry::{CacheStats, StoreRegistry};
pub use value::{decode_entry, EncodedValue};
