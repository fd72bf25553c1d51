//! Storage module for Toolgate
//!
//! - `db`: SQLite disk store for cached call results
//! - `json`: JSON ledger files shared between processes
//! - `lock`: advisory exclusive file lock guarding those files

mod db;
pub mod json;
mod lock;

// SQLite disk store
pub use db::{DiskStore, Encoding, StoredEntry, STORE_FILE_NAME};

// File locking
pub use lock::FileLock;
