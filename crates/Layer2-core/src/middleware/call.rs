//! ToolCall - the interface every middleware layer implements

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

use toolgate_foundation::{Error, Result};

use super::rate_limit::RateLimited;
use super::retry::{RetryConfig, Retrying};
use crate::cache::{CallArgs, FunctionId, Memoized, ToolCache};
use crate::ratelimit::RateLimiter;

/// A callable tool function, possibly wrapped in middleware
pub trait ToolCall: Send + Sync {
    type Output;

    /// Identity of the innermost function
    fn identity(&self) -> &FunctionId;

    fn call(&self, args: &CallArgs) -> Result<Self::Output>;
}

impl<C: ToolCall + ?Sized> ToolCall for Arc<C> {
    type Output = C::Output;

    fn identity(&self) -> &FunctionId {
        (**self).identity()
    }

    fn call(&self, args: &CallArgs) -> Result<Self::Output> {
        (**self).call(args)
    }
}

impl<C: ToolCall + ?Sized> ToolCall for Box<C> {
    type Output = C::Output;

    fn identity(&self) -> &FunctionId {
        (**self).identity()
    }

    fn call(&self, args: &CallArgs) -> Result<Self::Output> {
        (**self).call(args)
    }
}

// ============================================================================
// FnCall
// ============================================================================

/// A plain function as the innermost layer.
///
/// Errors the function returns become [`Error::Call`], except toolgate
/// errors passed through with `?` (bad arguments, for instance), which
/// keep their own kind.
pub struct FnCall<F, T> {
    id: FunctionId,
    func: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> FnCall<F, T> {
    pub fn new(qualified_name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallArgs) -> anyhow::Result<T> + Send + Sync,
    {
        Self::with_identity(FunctionId::new(qualified_name), func)
    }

    pub fn with_identity(id: FunctionId, func: F) -> Self
    where
        F: Fn(&CallArgs) -> anyhow::Result<T> + Send + Sync,
    {
        Self {
            id,
            func,
            _output: PhantomData,
        }
    }
}

impl<F, T> Debug for FnCall<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCall").field("id", &self.id).finish()
    }
}

impl<F, T> ToolCall for FnCall<F, T>
where
    F: Fn(&CallArgs) -> anyhow::Result<T> + Send + Sync,
{
    type Output = T;

    fn identity(&self) -> &FunctionId {
        &self.id
    }

    fn call(&self, args: &CallArgs) -> Result<T> {
        (self.func)(args).map_err(|e| match e.downcast::<Error>() {
            Ok(err) => err,
            Err(e) => Error::call(self.id.qualified_name(), e),
        })
    }
}

/// Build a [`FnCall`] named after the calling module, keeping the closure's
/// source text so cache fingerprints change when the body does.
///
/// ```ignore
/// let search = tool_fn!("search", |args: &CallArgs| {
///     let query: String = args.get(0)?;
///     Ok(query.len())
/// });
/// ```
#[macro_export]
macro_rules! tool_fn {
    ($name:literal, $func:expr) => {
        $crate::middleware::FnCall::with_identity(
            $crate::cache::FunctionId::with_source(
                concat!(module_path!(), "::", $name),
                stringify!($func),
            ),
            $func,
        )
    };
}

// ============================================================================
// Composition
// ============================================================================

/// Explicit layering: `f.with_retry(cfg).rate_limited(l).cached(c)`
pub trait ToolCallExt: ToolCall + Sized {
    fn with_retry(self, config: RetryConfig) -> Retrying<Self> {
        Retrying::new(self, config)
    }

    fn rate_limited(self, limiter: RateLimiter) -> RateLimited<Self> {
        RateLimited::new(self, limiter)
    }

    fn cached(self, cache: ToolCache) -> Memoized<Self>
    where
        Self::Output: Serialize + DeserializeOwned + Debug,
    {
        cache.wrap(self)
    }
}

impl<C: ToolCall> ToolCallExt for C {}
