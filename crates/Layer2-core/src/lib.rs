//! toolgate-core: gating for outbound tool calls
//!
//! Layer2 - rate limiting and caching built on `toolgate-foundation`
//!
//! # Modules
//!
//! - `ratelimit`: file-backed rate limiter shared across processes
//! - `cache`: cache keys, store registry and the memoizing decorator
//! - `middleware`: ToolCall trait and composable layers (retry, rate limit)
//!
//! # Example
//!
//! ```ignore
//! use toolgate_core::{tool_fn, CallArgs, RateLimiter, RetryConfig, ToolCache, ToolCall, ToolCallExt};
//!
//! let limiter = RateLimiter::new("chembl", 4, Duration::from_secs(1))?;
//!
//! let search = tool_fn!("search", |args: &CallArgs| {
//!     let query: String = args.get(0)?;
//!     Ok(fetch_molecules(&query)?)
//! })
//! .with_retry(RetryConfig::default())
//! .rate_limited(limiter)
//! .cached(ToolCache::new("chembl"));
//!
//! let hits = search.call(&CallArgs::new().arg("aspirin"))?;
//! ```

pub mod cache;
pub mod middleware;
pub mod ratelimit;

// Re-exports: Foundation
pub use toolgate_foundation::{Error, GateConfig, Result};

// Re-exports: Rate limiting
pub use ratelimit::{RateLimiter, RateLimiterBuilder};

// Re-exports: Cache
pub use cache::{
    CacheStats, CallArgs, CallOptions, EncodedValue, FunctionId, Memoized, StoreRegistry,
    ToolCache,
};

// Re-exports: Middleware
pub use middleware::{FnCall, RateLimited, RetryConfig, Retrying, ToolCall, ToolCallExt};
