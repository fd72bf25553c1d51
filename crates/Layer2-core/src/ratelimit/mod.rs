//! Cross-process rate limiting
//!
//! - `limiter.rs` - RateLimiter and its builder

mod limiter;

pub use limiter::{
    RateLimiter, RateLimiterBuilder, DEFAULT_LIMITER_NAME, DEFAULT_MAX_REQUESTS,
    DEFAULT_TIME_WINDOW,
};
