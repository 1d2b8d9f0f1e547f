//! Per-file reconciliation: skip, migrate, or verify
//!
//! Order of checks for one file:
//! 1. an OK record with the same short fingerprint means the file is known good
//! 2. an OK record found through the [`MigrationBridge`] whose stored full
//!    fingerprint equals this file's full fingerprint is re-keyed in place
//! 3. otherwise the file is verified and the result written, updating an
//!    existing ERROR row for the fingerprint instead of adding a second one

use std::path::Path;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{FileError, LedgerError};
use crate::fingerprint::{self, ShortFingerprint, FINGERPRINT_SCHEME};
use crate::ledger::{CheckRecord, CheckResult, Ledger, LegacyMatch};
use crate::verify::Verifier;

/// What happened to a file in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already recorded OK under the current fingerprint
    Skipped,
    /// An older OK record was re-keyed to the current fingerprint
    Migrated { from: String },
    /// The verifier ran and its result was recorded
    Verified(CheckResult),
}

/// Finds OK records that may describe the same file under an older
/// fingerprint scheme
pub trait MigrationBridge {
    fn candidates(
        &self,
        ledger: &dyn Ledger,
        file_name: &str,
        short: &ShortFingerprint,
    ) -> Result<Vec<LegacyMatch>, LedgerError>;
}

/// Matches on base name. Every stored short fingerprint goes stale at once
/// after a scheme change, so the name is the only key left to bridge on.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameBridge;

impl MigrationBridge for FileNameBridge {
    fn candidates(
        &self,
        ledger: &dyn Ledger,
        file_name: &str,
        short: &ShortFingerprint,
    ) -> Result<Vec<LegacyMatch>, LedgerError> {
        if ledger.count_ok_by_name(file_name)? == 0 {
            return Ok(Vec::new());
        }
        ledger.ok_by_name(file_name, &short.digest)
    }
}

pub struct Reconciler<V, B = FileNameBridge> {
    verifier: V,
    bridge: B,
    /// Hash whole files larger than the short cap so they can migrate later
    record_full: bool,
}

impl<V: Verifier> Reconciler<V> {
    pub fn new(verifier: V) -> Self {
        Self::with_bridge(verifier, FileNameBridge)
    }
}

impl<V: Verifier, B: MigrationBridge> Reconciler<V, B> {
    pub fn with_bridge(verifier: V, bridge: B) -> Self {
        Self {
            verifier,
            bridge,
            record_full: true,
        }
    }

    pub fn record_full_fingerprints(mut self, enabled: bool) -> Self {
        self.record_full = enabled;
        self
    }

    /// Run every step for `path` against `ledger`.
    ///
    /// Safe to call again from the top after a failure: fingerprinting only
    /// reads, and each ledger write commits on its own.
    pub fn reconcile<L: Ledger>(&self, ledger: &L, path: &Path) -> Result<Outcome, FileError> {
        let file_name = base_name(path);
        let short = fingerprint::short_fingerprint(path)?;
        debug!(
            path = %path.display(),
            fingerprint = %short.digest,
            bytes = short.bytes_hashed,
            "Fingerprinted"
        );

        if ledger.count_ok(&short.digest)? > 0 {
            info!(path = %path.display(), "OK (unchanged, skipped)");
            return Ok(Outcome::Skipped);
        }

        let legacy = self.bridge.candidates(ledger, &file_name, &short)?;
        let mut known_full = None;
        if !legacy.is_empty() {
            let full = full_of(path, &short)?;
            if let Some(found) = legacy
                .iter()
                .find(|m| m.full_fingerprint.as_deref() == Some(full.as_str()))
            {
                ledger.update_fingerprint(&found.short_fingerprint, &short.digest)?;
                info!(
                    path = %path.display(),
                    from = %found.short_fingerprint,
                    to = %short.digest,
                    from_scheme = found.scheme,
                    "Migrated record to current fingerprint"
                );
                return Ok(Outcome::Migrated {
                    from: found.short_fingerprint.clone(),
                });
            }

            warn!(
                path = %path.display(),
                candidates = legacy.len(),
                "Fingerprint mismatch for a known name, re-verifying"
            );
            known_full = Some(full);
        }

        let verification = self
            .verifier
            .verify(path)
            .map_err(|source| FileError::Verifier {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(
            path = %path.display(),
            seconds = verification.duration.as_secs_f64(),
            "Verification timing"
        );

        let result = if verification.passed() {
            info!(path = %path.display(), "OK");
            CheckResult::Ok
        } else {
            error!(path = %path.display(), diagnostic = %verification.diagnostic, "Error");
            CheckResult::Error
        };

        let diagnostic = match result {
            CheckResult::Error if !verification.diagnostic.is_empty() => {
                Some(verification.diagnostic.as_str())
            }
            _ => None,
        };

        let location = path.display().to_string();
        if ledger.count_error(&short.digest)? > 0 {
            ledger.update_result(
                &short.digest,
                result,
                verification.duration,
                diagnostic,
                &location,
            )?;
        } else {
            let full_fingerprint = match known_full {
                Some(full) => Some(full),
                None => self.full_for_record(path, &short)?,
            };
            ledger.insert(&CheckRecord {
                short_fingerprint: short.digest.clone(),
                full_fingerprint,
                file_name,
                result,
                duration_seconds: verification.duration.as_secs_f64(),
                last_checked_at: Utc::now(),
                scheme: FINGERPRINT_SCHEME,
                path: Some(location),
                diagnostic: diagnostic.map(str::to_string),
            })?;
        }

        Ok(Outcome::Verified(result))
    }

    fn full_for_record(
        &self,
        path: &Path,
        short: &ShortFingerprint,
    ) -> Result<Option<String>, FileError> {
        if let Some(full) = short.as_full() {
            return Ok(Some(full.to_string()));
        }
        if self.record_full {
            return fingerprint::full_fingerprint(path).map(Some);
        }
        Ok(None)
    }
}

fn full_of(path: &Path, short: &ShortFingerprint) -> Result<String, FileError> {
    match short.as_full() {
        Some(full) => Ok(full.to_string()),
        None => fingerprint::full_fingerprint(path),
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
