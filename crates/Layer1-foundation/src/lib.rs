//! # toolgate-foundation
//!
//! Foundation layer for Toolgate:
//! - Clock: time sources (system, manual)
//! - Config: layered settings (override → programmatic → env → fallback)
//! - Storage: SQLite disk store, JSON ledger files, advisory file locks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  toolgate-core                                           │
//! │  ├── RateLimiter ──────► JSON ledger + FileLock          │
//! │  └── ToolCache ────────► DiskStore (SQLite)              │
//! │                     │                                   │
//! │                     ▼                                   │
//! │          GateConfig / EnvSnapshot / Clock               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Clock
// ============================================================================
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    // Programmatic tier
    validate_expire,
    ConfigDefaults,
    GateConfig,
    // Resolution
    ConfigSource,
    EnvSnapshot,
    Resolved,
    ENV_CACHE_DIR,
    ENV_CACHE_EXPIRE_SECS,
    ENV_CACHE_SIZE_LIMIT_BYTES,
    ENV_FETCH_LIMIT,
    ENV_STATE_DIR,
    FALLBACK_FETCH_LIMIT,
    FALLBACK_SIZE_LIMIT_BYTES,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{
    // SQLite
    DiskStore,
    Encoding,
    StoredEntry,
    STORE_FILE_NAME,
    // Locks
    FileLock,
};
pub use storage::json::{
    read_ledger, write_ledger, LedgerRead, RateLimiterLedger, StateFile, WallObservation,
};
