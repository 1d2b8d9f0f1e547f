//! SQLite ledger of check results

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

use super::record::{CheckRecord, CheckResult, LedgerSummary, LegacyMatch};
use super::session::Connector;
use super::Ledger;
use crate::error::LedgerError;
use crate::fingerprint::FINGERPRINT_SCHEME;

const SCHEMA_VERSION: i32 = 2;

const RECORD_COLUMNS: &str = "short_fingerprint, full_fingerprint, file_name, result, \
     duration_seconds, last_checked_at, scheme, path, diagnostic";

/// Check ledger backed by a single SQLite connection
pub struct SqliteLedger {
    db: Connection,
}

impl SqliteLedger {
    /// Open or create the ledger database at `db_path`
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Connectivity(format!(
                        "failed to create ledger directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Connection::open(db_path)?;

        // WAL keeps the status command readable while a scan is writing
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.busy_timeout(busy_timeout)?;

        let mut ledger = Self { db };
        ledger.init_schema()?;
        Ok(ledger)
    }

    /// In-memory ledger, used by tests
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let mut ledger = Self {
            db: Connection::open_in_memory()?,
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&mut self) -> Result<(), LedgerError> {
        let version: i32 = self
            .db
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .or_else(|_| {
                self.db.execute(
                    "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                    [],
                )?;
                self.db
                    .execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
                Ok::<i32, rusqlite::Error>(0)
            })?;

        if version < SCHEMA_VERSION {
            self.migrate_schema(version)?;
        }

        Ok(())
    }

    fn migrate_schema(&mut self, from_version: i32) -> Result<(), LedgerError> {
        let tx = self.db.transaction()?;

        if from_version < 1 {
            tx.execute(
                "CREATE TABLE IF NOT EXISTS checked_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    short_fingerprint TEXT NOT NULL,
                    full_fingerprint TEXT,
                    file_name TEXT NOT NULL,
                    result TEXT NOT NULL CHECK (result IN ('OK', 'ERROR')),
                    duration_seconds REAL NOT NULL DEFAULT 0,
                    last_checked_at INTEGER NOT NULL
                )",
                [],
            )?;
            tx.execute(
                "CREATE INDEX IF NOT EXISTS idx_short_fingerprint
                 ON checked_files(short_fingerprint)",
                [],
            )?;
            tx.execute(
                "CREATE INDEX IF NOT EXISTS idx_file_name ON checked_files(file_name)",
                [],
            )?;
        }

        if from_version < 2 {
            tx.execute(
                "ALTER TABLE checked_files ADD COLUMN scheme INTEGER NOT NULL DEFAULT 1",
                [],
            )?;
            tx.execute("ALTER TABLE checked_files ADD COLUMN path TEXT", [])?;
            tx.execute("ALTER TABLE checked_files ADD COLUMN diagnostic TEXT", [])?;

            // Version 1 did not enforce one OK row per fingerprint. The extra
            // rows repeat the verdict of the newest one, so they are dropped.
            let removed = tx.execute(
                "DELETE FROM checked_files
                 WHERE result = 'OK' AND id NOT IN (
                    SELECT MAX(id) FROM checked_files WHERE result = 'OK'
                    GROUP BY short_fingerprint
                 )",
                [],
            )?;
            if removed > 0 {
                warn!(removed, "Removed duplicate OK rows while upgrading ledger");
            }

            tx.execute(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_one_ok_per_fingerprint
                 ON checked_files(short_fingerprint) WHERE result = 'OK'",
                [],
            )?;
        }

        tx.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
        tx.commit()?;

        debug!(from_version, to_version = SCHEMA_VERSION, "Ledger schema migrated");
        Ok(())
    }

    /// Counts over the whole ledger
    pub fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let summary = self.db.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(result = 'OK'), 0),
                    COALESCE(SUM(result = 'ERROR'), 0),
                    COALESCE(SUM(scheme < ?1), 0),
                    MAX(last_checked_at)
             FROM checked_files",
            [FINGERPRINT_SCHEME],
            |row| {
                let last: Option<i64> = row.get(4)?;
                Ok(LedgerSummary {
                    total: row.get(0)?,
                    ok: row.get(1)?,
                    error: row.get(2)?,
                    legacy_scheme: row.get(3)?,
                    last_checked_at: last.and_then(|ts| DateTime::from_timestamp(ts, 0)),
                })
            },
        )?;
        Ok(summary)
    }

    /// Records whose last check failed, most recent first
    pub fn failing_records(&self, limit: usize) -> Result<Vec<CheckRecord>, LedgerError> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM checked_files WHERE result = 'ERROR'
             ORDER BY last_checked_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], record_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every record carrying this base name
    pub fn records_by_name(&self, file_name: &str) -> Result<Vec<CheckRecord>, LedgerError> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM checked_files WHERE file_name = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([file_name], record_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl Ledger for SqliteLedger {
    fn count_ok(&self, short_fingerprint: &str) -> Result<u64, LedgerError> {
        let count = self.db.query_row(
            "SELECT COUNT(*) FROM checked_files WHERE short_fingerprint = ?1 AND result = 'OK'",
            [short_fingerprint],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_ok_by_name(&self, file_name: &str) -> Result<u64, LedgerError> {
        let count = self.db.query_row(
            "SELECT COUNT(*) FROM checked_files WHERE file_name = ?1 AND result = 'OK'",
            [file_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn ok_by_name(
        &self,
        file_name: &str,
        excluding_short: &str,
    ) -> Result<Vec<LegacyMatch>, LedgerError> {
        let mut stmt = self.db.prepare(
            "SELECT short_fingerprint, full_fingerprint, scheme FROM checked_files
             WHERE file_name = ?1 AND result = 'OK' AND short_fingerprint != ?2
             ORDER BY last_checked_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![file_name, excluding_short], |row| {
            Ok(LegacyMatch {
                short_fingerprint: row.get(0)?,
                full_fingerprint: row.get(1)?,
                scheme: row.get(2)?,
            })
        })?;
        let matches = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    fn count_error(&self, short_fingerprint: &str) -> Result<u64, LedgerError> {
        let count = self.db.query_row(
            "SELECT COUNT(*) FROM checked_files WHERE short_fingerprint = ?1 AND result = 'ERROR'",
            [short_fingerprint],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn insert(&self, record: &CheckRecord) -> Result<(), LedgerError> {
        self.db.execute(
            &format!(
                "INSERT INTO checked_files ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                record.short_fingerprint,
                record.full_fingerprint,
                record.file_name,
                record.result,
                record.duration_seconds,
                record.last_checked_at.timestamp(),
                record.scheme,
                record.path,
                record.diagnostic,
            ],
        )?;
        Ok(())
    }

    fn update_result(
        &self,
        short_fingerprint: &str,
        result: CheckResult,
        duration: Duration,
        diagnostic: Option<&str>,
        path: &str,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().timestamp();

        // Only the ERROR row is rewritten; an OK row for the same fingerprint
        // would have short-circuited reconciliation.
        let updated = self.db.execute(
            "UPDATE checked_files SET
                result = ?2,
                duration_seconds = ?3,
                last_checked_at = ?4,
                diagnostic = ?5,
                path = ?6
             WHERE id = (
                SELECT id FROM checked_files
                WHERE short_fingerprint = ?1 AND result = 'ERROR'
                ORDER BY id DESC LIMIT 1
             )",
            params![
                short_fingerprint,
                result,
                duration.as_secs_f64(),
                now,
                diagnostic,
                path
            ],
        )?;

        if updated == 0 {
            return Err(LedgerError::Backend(format!(
                "no ERROR record to update for fingerprint {short_fingerprint}"
            )));
        }
        Ok(())
    }

    fn update_fingerprint(&self, old: &str, new: &str) -> Result<(), LedgerError> {
        let now = Utc::now().timestamp();
        let updated = self.db.execute(
            "UPDATE checked_files SET short_fingerprint = ?2, scheme = ?3, last_checked_at = ?4
             WHERE short_fingerprint = ?1 AND result = 'OK'",
            params![old, new, FINGERPRINT_SCHEME, now],
        )?;

        if updated == 0 {
            return Err(LedgerError::Backend(format!(
                "no OK record to migrate for fingerprint {old}"
            )));
        }
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CheckRecord> {
    let last_checked_at: i64 = row.get(5)?;
    Ok(CheckRecord {
        short_fingerprint: row.get(0)?,
        full_fingerprint: row.get(1)?,
        file_name: row.get(2)?,
        result: row.get(3)?,
        duration_seconds: row.get(4)?,
        last_checked_at: DateTime::from_timestamp(last_checked_at, 0).unwrap_or_else(Utc::now),
        scheme: row.get(6)?,
        path: row.get(7)?,
        diagnostic: row.get(8)?,
    })
}

/// Opens [`SqliteLedger`] handles for the configured database file
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }
}

impl Connector for SqliteConnector {
    type Ledger = SqliteLedger;

    fn connect(&self) -> Result<SqliteLedger, LedgerError> {
        SqliteLedger::open(&self.path, self.busy_timeout)
    }
}
