//! Retry layer with exponential backoff

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use toolgate_foundation::{Error, Result, SharedClock, SystemClock};

use super::call::ToolCall;
use crate::cache::{CallArgs, FunctionId};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Initial delay between retries (milliseconds)
    pub initial_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,

    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            // 0.8 to 1.2
            let jitter_factor = rand::thread_rng().gen_range(0.8..=1.2);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Decides whether a failed call's source error is worth retrying
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Retries failures of the wrapped function ([`Error::Call`]).
///
/// Cache, limiter and argument errors pass straight through.
pub struct Retrying<C> {
    inner: C,
    config: RetryConfig,
    retry_if: Option<RetryPredicate>,
    clock: SharedClock,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            retry_if: None,
            clock: SystemClock::shared(),
        }
    }

    /// Only retry errors matching `predicate`
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Clock used to wait between attempts
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn should_retry(&self, e: &Error) -> bool {
        if !e.is_retryable() {
            return false;
        }
        match (&self.retry_if, e.call_source()) {
            (Some(predicate), Some(source)) => predicate(source),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Retrying<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("inner", &self.inner)
            .field("config", &self.config)
            .field("retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl<C: ToolCall> ToolCall for Retrying<C> {
    type Output = C::Output;

    fn identity(&self) -> &FunctionId {
        self.inner.identity()
    }

    fn call(&self, args: &CallArgs) -> Result<Self::Output> {
        let name = self.identity().qualified_name();
        let mut attempt = 0;

        loop {
            match self.inner.call(args) {
                Ok(result) => return Ok(result),
                Err(e) if !self.should_retry(&e) => {
                    debug!(
                        "{}: non-retryable error on attempt {}: {}",
                        name,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        warn!(
                            "{}: max retries ({}) exceeded: {}",
                            name, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        "{}: attempt {} failed, retrying in {:?}: {}",
                        name,
                        attempt + 1,
                        delay,
                        e
                    );

                    self.clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
