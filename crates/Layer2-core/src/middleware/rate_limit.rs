//! Rate-limit gate in front of a call

use toolgate_foundation::Result;

use super::call::ToolCall;
use crate::cache::{CallArgs, FunctionId};
use crate::ratelimit::RateLimiter;

/// Waits for a limiter slot, then runs the inner call once
#[derive(Debug)]
pub struct RateLimited<C> {
    inner: C,
    limiter: RateLimiter,
}

impl<C> RateLimited<C> {
    pub fn new(inner: C, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: ToolCall> ToolCall for RateLimited<C> {
    type Output = C::Output;

    fn identity(&self) -> &FunctionId {
        self.inner.identity()
    }

    fn call(&self, args: &CallArgs) -> Result<Self::Output> {
        self.limiter.acquire()?;
        self.inner.call(args)
    }
}
