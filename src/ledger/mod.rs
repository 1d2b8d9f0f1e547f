//! Persistent ledger of verification results
//!
//! Records are keyed by short fingerprint and found by file name as a
//! fallback when the fingerprint scheme changes. Every write commits on its
//! own, so replaying a file after a crash is idempotent.

pub mod database;
pub mod record;
pub mod session;

use std::time::Duration;

use crate::error::LedgerError;

pub use database::{SqliteConnector, SqliteLedger};
pub use record::{CheckRecord, CheckResult, LedgerSummary, LegacyMatch};
pub use session::{Connector, LedgerSession, RetryPolicy};

/// Storage operations the reconciliation policy depends on
pub trait Ledger {
    /// Number of OK rows for this fingerprint (0 or 1)
    fn count_ok(&self, short_fingerprint: &str) -> Result<u64, LedgerError>;

    /// Number of OK rows carrying this base name
    fn count_ok_by_name(&self, file_name: &str) -> Result<u64, LedgerError>;

    /// OK rows with this base name but a different short fingerprint
    fn ok_by_name(
        &self,
        file_name: &str,
        excluding_short: &str,
    ) -> Result<Vec<LegacyMatch>, LedgerError>;

    fn count_error(&self, short_fingerprint: &str) -> Result<u64, LedgerError>;

    fn insert(&self, record: &CheckRecord) -> Result<(), LedgerError>;

    /// Rewrite the ERROR row for this fingerprint with a new outcome, seen at `path`
    fn update_result(
        &self,
        short_fingerprint: &str,
        result: CheckResult,
        duration: Duration,
        diagnostic: Option<&str>,
        path: &str,
    ) -> Result<(), LedgerError>;

    /// Re-key the OK row `old` to `new` under the current scheme
    fn update_fingerprint(&self, old: &str, new: &str) -> Result<(), LedgerError>;
}
