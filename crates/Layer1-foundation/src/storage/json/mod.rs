//! JSON state files

mod ledger;

pub use ledger::{
    read_ledger, write_ledger, LedgerRead, RateLimiterLedger, StateFile, WallObservation,
    BOOT_REFRESH_SECS, REBOOT_THRESHOLD_SECS, STATE_FILE_SUFFIX,
};
