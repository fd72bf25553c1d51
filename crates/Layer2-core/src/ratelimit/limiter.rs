//! File-backed rate limiter shared across processes
//!
//! Every acquire runs under an exclusive lock on the limiter's state file:
//! read the ledger, detect reboots, prune, wait for a free slot, record,
//! rewrite. Filesystem trouble fails open; only a failed rewrite is an error.

use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use toolgate_foundation::storage::json::{
    read_ledger, write_ledger, LedgerRead, RateLimiterLedger, StateFile, WallObservation,
};
use toolgate_foundation::{Error, FileLock, GateConfig, Result, SharedClock, SystemClock};

/// Default limiter name
pub const DEFAULT_LIMITER_NAME: &str = "default";

/// Default number of requests per window
pub const DEFAULT_MAX_REQUESTS: usize = 3;

/// Default rolling window
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(1);

// ============================================================================
// RateLimiter
// ============================================================================

struct LimiterInner {
    name: String,
    max_requests: usize,
    time_window: Duration,
    state_file: StateFile,
    /// Window accounting
    time_source: RwLock<SharedClock>,
    /// Reboot detection only
    wall_clock: SharedClock,
}

/// At most `max_requests` acquisitions per rolling `time_window`, enforced
/// across every thread and process that points at the same state file.
///
/// Cloning is cheap; clones share the same limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.name)
            .field("max_requests", &self.inner.max_requests)
            .field("time_window", &self.inner.time_window)
            .field("state_file", &self.inner.state_file.path())
            .finish()
    }
}

impl RateLimiter {
    /// Limiter with its state file in the resolved state directory
    pub fn new(name: impl Into<String>, max_requests: usize, time_window: Duration) -> Result<Self> {
        Self::builder(name)
            .max_requests(max_requests)
            .time_window(time_window)
            .build()
    }

    pub fn builder(name: impl Into<String>) -> RateLimiterBuilder {
        RateLimiterBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_requests(&self) -> usize {
        self.inner.max_requests
    }

    pub fn time_window(&self) -> Duration {
        self.inner.time_window
    }

    pub fn state_file(&self) -> &Path {
        self.inner.state_file.path()
    }

    /// Swap the clock used for window accounting. Affects every clone.
    pub fn set_time_source(&self, clock: SharedClock) {
        *self.inner.time_source.write() = clock;
    }

    fn time_source(&self) -> SharedClock {
        self.inner.time_source.read().clone()
    }

    // ========================================================================
    // Acquire
    // ========================================================================

    /// Block until a request may proceed.
    ///
    /// Never fails because the state file is unreachable; the request just
    /// goes through unlimited. Returns an error only when the updated ledger
    /// could not be written back.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_stamped().map(|_| ())
    }

    /// Like [`acquire`](Self::acquire), returning the recorded timestamp.
    /// `None` means the limiter failed open.
    pub fn acquire_stamped(&self) -> Result<Option<f64>> {
        let state_file = &self.inner.state_file;

        if let Err(e) = state_file.ensure_exists(self.inner.wall_clock.now()) {
            self.fail_open("create", &e);
            return Ok(None);
        }

        let file = match state_file.open() {
            Ok(file) => file,
            Err(e) => {
                self.fail_open("open", &e);
                return Ok(None);
            }
        };

        let _lock = match FileLock::exclusive(&file) {
            Ok(lock) => lock,
            Err(e) => {
                self.fail_open("lock", &e);
                return Ok(None);
            }
        };

        let mut ledger = match read_ledger(&file) {
            Ok(read) => self.recover(read),
            Err(e) => {
                self.fail_open("read", &e);
                return Ok(None);
            }
        };

        self.check_wall_clock(&mut ledger);

        let clock = self.time_source();
        let window = self.inner.time_window.as_secs_f64();
        let mut now = clock.now();
        ledger.prune(now, window);

        while let Some(wait) = ledger.wait_for_slot(now, window, self.inner.max_requests) {
            debug!(
                "Rate limiter '{}' at capacity ({} in window), waiting {:?}",
                self.inner.name,
                ledger.len(),
                wait
            );
            clock.sleep(wait);
            now = clock.now();
            ledger.prune(now, window);
        }

        ledger.record(now);
        if let Err(e) = write_ledger(&file, &ledger) {
            error!(
                "Failed to write rate limiter state {}: {}",
                state_file.path().display(),
                e
            );
            return Err(e);
        }

        Ok(Some(now))
    }

    /// Acquire from async code without stalling the runtime.
    ///
    /// The wait happens on a blocking worker thread; once started it runs to
    /// completion even if the returned future is dropped.
    pub async fn acquire_async(&self) -> Result<()> {
        self.acquire_stamped_async().await.map(|_| ())
    }

    pub async fn acquire_stamped_async(&self) -> Result<Option<f64>> {
        let limiter = self.clone();
        tokio::task::spawn_blocking(move || limiter.acquire_stamped())
            .await
            .map_err(|e| Error::Internal(format!("Rate limiter worker failed: {}", e)))?
    }

    fn fail_open(&self, action: &str, e: &Error) {
        warn!(
            "Failed to {} state file {}: {}. Proceeding without rate limiting for this request.",
            action,
            self.inner.state_file.path().display(),
            e
        );
    }

    fn recover(&self, read: LedgerRead) -> RateLimiterLedger {
        match read {
            LedgerRead::Valid(ledger) => ledger,
            LedgerRead::Empty => {
                debug!("Empty state file for '{}', starting fresh", self.inner.name);
                RateLimiterLedger::default()
            }
            LedgerRead::Corrupted(reason) => {
                warn!(
                    "Corrupted state file {} ({}). Resetting to full capacity.",
                    self.inner.state_file.path().display(),
                    reason
                );
                RateLimiterLedger::default()
            }
        }
    }

    fn check_wall_clock(&self, ledger: &mut RateLimiterLedger) {
        let wall_now = self.inner.wall_clock.now();
        match ledger.observe_wall_time(wall_now) {
            WallObservation::RebootReset { previous } => info!(
                "Reboot detected for '{}' (wall time went back from {} to {}). Clearing request queue.",
                self.inner.name, previous, wall_now
            ),
            WallObservation::Refreshed => {
                debug!("Refreshed boot wall time for '{}'", self.inner.name)
            }
            WallObservation::Initialized | WallObservation::Unchanged => {}
        }
    }

    // ========================================================================
    // Operator helpers
    // ========================================================================

    /// Current ledger read under the lock, `None` if no state file exists yet.
    /// Corrupted content reads as an empty ledger.
    pub fn snapshot(&self) -> Result<Option<RateLimiterLedger>> {
        let state_file = &self.inner.state_file;
        if !state_file.exists() {
            return Ok(None);
        }

        let file = state_file.open()?;
        let _lock = FileLock::exclusive(&file)?;
        let read = read_ledger(&file)?;
        Ok(Some(self.recover(read)))
    }

    /// Forget every recorded request
    pub fn reset(&self) -> Result<()> {
        let state_file = &self.inner.state_file;
        let wall_now = self.inner.wall_clock.now();
        if state_file.ensure_exists(wall_now)? {
            return Ok(());
        }

        let file = state_file.open()?;
        let _lock = FileLock::exclusive(&file)?;
        write_ledger(&file, &RateLimiterLedger::fresh(wall_now))?;
        info!("Reset rate limiter '{}'", self.inner.name);
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`RateLimiter`]
pub struct RateLimiterBuilder {
    name: String,
    max_requests: usize,
    time_window: Duration,
    state_dir: Option<PathBuf>,
    config: Option<Arc<GateConfig>>,
    time_source: Option<SharedClock>,
    wall_clock: Option<SharedClock>,
}

impl RateLimiterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests: DEFAULT_MAX_REQUESTS,
            time_window: DEFAULT_TIME_WINDOW,
            state_dir: None,
            config: None,
            time_source: None,
            wall_clock: None,
        }
    }

    pub fn max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    pub fn time_window(mut self, window: Duration) -> Self {
        self.time_window = window;
        self
    }

    /// Directory for the state file, taking precedence over configuration
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Configuration used to resolve the state directory (default: global)
    pub fn config(mut self, config: Arc<GateConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn time_source(mut self, clock: SharedClock) -> Self {
        self.time_source = Some(clock);
        self
    }

    pub fn wall_clock(mut self, clock: SharedClock) -> Self {
        self.wall_clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<RateLimiter> {
        validate_name(&self.name)?;
        if self.max_requests == 0 {
            return Err(Error::InvalidConfig(format!(
                "max_requests must be a positive integer, got {}",
                self.max_requests
            )));
        }
        if self.time_window.is_zero() {
            return Err(Error::InvalidConfig(
                "time_window must be a positive duration".into(),
            ));
        }

        let config = self.config.unwrap_or_else(GateConfig::global);
        let dir = config.state_dir(self.state_dir.as_deref());
        let state_file = StateFile::for_limiter(&dir, &self.name);

        debug!(
            "Rate limiter '{}': {} per {:?}, state {}",
            self.name,
            self.max_requests,
            self.time_window,
            state_file.path().display()
        );

        Ok(RateLimiter {
            inner: Arc::new(LimiterInner {
                name: self.name,
                max_requests: self.max_requests,
                time_window: self.time_window,
                state_file,
                time_source: RwLock::new(self.time_source.unwrap_or_else(SystemClock::shared)),
                wall_clock: self.wall_clock.unwrap_or_else(SystemClock::shared),
            }),
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidConfig("limiter name must not be empty".into()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::InvalidConfig(format!(
            "limiter name must not contain path separators: {:?}",
            name
        )));
    }
    Ok(())
}
