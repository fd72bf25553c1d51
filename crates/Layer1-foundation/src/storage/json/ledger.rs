//! Rate limiter ledger and its JSON state file
//!
//! File format: `{"requests": [<number>, ...], "boot_wall_time": <number>}`.
//! Every read and write here assumes the caller holds the file lock.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// Wall time moving back further than this means the host rebooted or the
/// clock was reset.
pub const REBOOT_THRESHOLD_SECS: f64 = 60.0;

/// Age after which `boot_wall_time` is refreshed for long-lived ledgers
pub const BOOT_REFRESH_SECS: f64 = 3600.0;

/// Shortest wait handed to a clock, so float rounding cannot stall a loop
const MIN_WAIT_SECS: f64 = 1e-6;

/// Suffix of every limiter state file
pub const STATE_FILE_SUFFIX: &str = "_rate_limiter.json";

// ============================================================================
// RateLimiterLedger
// ============================================================================

/// Persisted record of recent requests for one named limiter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterLedger {
    /// Request timestamps in the limiter's time domain, oldest first
    #[serde(default)]
    pub requests: Vec<f64>,
    /// Last observed wall-clock time, only used for reboot detection
    #[serde(default)]
    pub boot_wall_time: Option<f64>,
}

/// What [`RateLimiterLedger::observe_wall_time`] did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WallObservation {
    /// No boot time was recorded yet
    Initialized,
    /// Wall time went backward past the threshold; requests were cleared
    RebootReset { previous: f64 },
    /// Boot time was older than the refresh interval and got bumped
    Refreshed,
    Unchanged,
}

impl RateLimiterLedger {
    pub fn fresh(wall_now: f64) -> Self {
        Self {
            requests: Vec::new(),
            boot_wall_time: Some(wall_now),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Reboot detection against the recorded wall time
    pub fn observe_wall_time(&mut self, wall_now: f64) -> WallObservation {
        let Some(boot) = self.boot_wall_time else {
            self.boot_wall_time = Some(wall_now);
            return WallObservation::Initialized;
        };

        if wall_now < boot - REBOOT_THRESHOLD_SECS {
            self.requests.clear();
            self.boot_wall_time = Some(wall_now);
            WallObservation::RebootReset { previous: boot }
        } else if wall_now - boot > BOOT_REFRESH_SECS && !self.requests.is_empty() {
            self.boot_wall_time = Some(wall_now);
            WallObservation::Refreshed
        } else {
            WallObservation::Unchanged
        }
    }

    /// Drop every request at least `window` old.
    ///
    /// Timestamps ahead of `now` are clamped to `now` first, so a wait
    /// computed from this ledger never exceeds one window.
    pub fn prune(&mut self, now: f64, window: f64) {
        for t in self.requests.iter_mut() {
            if *t > now {
                *t = now;
            }
        }
        self.requests.retain(|t| now - t < window);
    }

    pub fn oldest(&self) -> Option<f64> {
        self.requests.iter().copied().reduce(f64::min)
    }

    /// How long to wait before a slot frees up, or `None` if one is free now.
    /// Call after [`prune`](Self::prune).
    pub fn wait_for_slot(&self, now: f64, window: f64, max_requests: usize) -> Option<Duration> {
        if self.requests.len() < max_requests {
            return None;
        }
        let oldest = self.oldest()?;
        let wait = (window - (now - oldest)).clamp(MIN_WAIT_SECS, window);
        Some(Duration::from_secs_f64(wait))
    }

    pub fn record(&mut self, now: f64) {
        self.requests.push(now);
    }
}

// ============================================================================
// StateFile
// ============================================================================

/// Outcome of reading a state file
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRead {
    Valid(RateLimiterLedger),
    /// Zero-length or whitespace-only content
    Empty,
    /// Content that is not a valid ledger, with the reason
    Corrupted(String),
}

impl LedgerRead {
    /// The ledger to continue with; empty and corrupted content start fresh
    pub fn into_ledger(self) -> RateLimiterLedger {
        match self {
            LedgerRead::Valid(ledger) => ledger,
            LedgerRead::Empty | LedgerRead::Corrupted(_) => RateLimiterLedger::default(),
        }
    }
}

/// Location of one named limiter's ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{dir}/{name}_rate_limiter.json`
    pub fn for_limiter(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(format!("{}{}", name, STATE_FILE_SUFFIX)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the file with an empty ledger if it does not exist.
    ///
    /// Uses create-new semantics so two racing creators never overwrite a
    /// ledger another process already wrote. Returns whether it was created.
    pub fn ensure_exists(&self, wall_now: f64) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                write_ledger(&file, &RateLimiterLedger::fresh(wall_now))?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open for reading and rewriting
    pub fn open(&self) -> Result<File> {
        Ok(OpenOptions::new().read(true).write(true).open(&self.path)?)
    }
}

/// Read and validate the ledger from an open (and locked) file
pub fn read_ledger(file: &File) -> Result<LedgerRead> {
    let mut reader = file;
    reader.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    // Anything after a NUL byte is debris from an interrupted write
    if let Some(pos) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(pos);
    }

    let Ok(content) = String::from_utf8(bytes) else {
        return Ok(LedgerRead::Corrupted("state is not valid UTF-8".into()));
    };
    let content = content.trim();
    if content.is_empty() {
        return Ok(LedgerRead::Empty);
    }

    Ok(parse_ledger(content))
}

fn parse_ledger(content: &str) -> LedgerRead {
    let value: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => return LedgerRead::Corrupted(format!("invalid JSON: {}", e)),
    };
    let Some(obj) = value.as_object() else {
        return LedgerRead::Corrupted("state is not an object".into());
    };
    let Some(requests) = obj.get("requests") else {
        return LedgerRead::Corrupted("state missing 'requests' key".into());
    };
    let Some(requests) = requests.as_array() else {
        return LedgerRead::Corrupted("'requests' is not a list".into());
    };

    let mut stamps = Vec::with_capacity(requests.len());
    for ts in requests {
        match ts.as_f64() {
            Some(t) => stamps.push(t),
            None => return LedgerRead::Corrupted(format!("invalid timestamp: {}", ts)),
        }
    }

    LedgerRead::Valid(RateLimiterLedger {
        requests: stamps,
        boot_wall_time: obj.get("boot_wall_time").and_then(Value::as_f64),
    })
}

/// Replace the whole file content with `ledger` (truncate + write)
pub fn write_ledger(file: &File, ledger: &RateLimiterLedger) -> Result<()> {
    let mut writer = file;
    writer.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    serde_json::to_writer(&mut writer, ledger)?;
    writer.flush()?;
    Ok(())
}
