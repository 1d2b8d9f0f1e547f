//! Persisted check records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Outcome of the last verification of a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckResult {
    Ok,
    Error,
}

impl CheckResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown check result: {other}")),
        }
    }
}

impl ToSql for CheckResult {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CheckResult {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// One row of the `checked_files` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub short_fingerprint: String,
    pub full_fingerprint: Option<String>,
    /// Base name only, shared across moves and scheme changes
    pub file_name: String,
    pub result: CheckResult,
    pub duration_seconds: f64,
    pub last_checked_at: DateTime<Utc>,
    /// Fingerprint scheme that produced `short_fingerprint`
    pub scheme: i64,
    /// Last full path this record was written from
    pub path: Option<String>,
    /// Verifier output of the last failing check
    pub diagnostic: Option<String>,
}

/// An OK record found through the file-name bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMatch {
    pub short_fingerprint: String,
    pub full_fingerprint: Option<String>,
    pub scheme: i64,
}

/// Aggregate counts over the whole ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: u64,
    pub ok: u64,
    pub error: u64,
    pub legacy_scheme: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
}
