//! Call middleware
//!
//! Layers compose explicitly, outermost first:
//!
//! ```text
//! Memoized ─► RateLimited ─► Retrying ─► FnCall
//! ```
//!
//! - `call.rs` - ToolCall trait, FnCall, `tool_fn!`, ToolCallExt
//! - `retry.rs` - exponential backoff for failed calls
//! - `rate_limit.rs` - limiter gate

mod call;
mod rate_limit;
mod retry;

pub use call::{FnCall, ToolCall, ToolCallExt};
pub use rate_limit::RateLimited;
pub use retry::{RetryConfig, RetryPredicate, Retrying};
