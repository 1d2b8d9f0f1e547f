//! Test doubles for the ledger and the verifier

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::error::{LedgerError, VerifyError};
use crate::fingerprint::FINGERPRINT_SCHEME;
use crate::ledger::{
    CheckRecord, CheckResult, Connector, Ledger, LegacyMatch, SqliteConnector, SqliteLedger,
};
use crate::verify::{Verdict, Verification, Verifier};

pub(crate) fn sample_record(short: &str) -> CheckRecord {
    CheckRecord {
        short_fingerprint: short.to_string(),
        full_fingerprint: Some(short.to_string()),
        file_name: format!("{short}.mp4"),
        result: CheckResult::Ok,
        duration_seconds: 0.5,
        last_checked_at: Utc::now(),
        scheme: FINGERPRINT_SCHEME,
        path: None,
        diagnostic: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Connection drops before the write reaches the database
    DisconnectBeforeWrite,
    /// The write commits, then the connection drops before it is acknowledged
    DisconnectAfterWrite,
    /// A write fails with a non-connectivity error
    BackendError,
}

#[derive(Default)]
struct FaultState {
    pending: Mutex<VecDeque<Fault>>,
    connects: AtomicUsize,
    writes: AtomicUsize,
}

/// Connector over a real SQLite file that can inject storage faults
#[derive(Clone)]
pub(crate) struct FlakyConnector {
    inner: SqliteConnector,
    state: Arc<FaultState>,
}

impl FlakyConnector {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            inner: SqliteConnector::new(path, Duration::from_secs(1)),
            state: Arc::default(),
        }
    }

    /// Queue `fault` for the next `times` writes
    pub(crate) fn inject(&self, fault: Fault, times: usize) {
        let mut pending = self.state.pending.lock().unwrap();
        pending.extend(std::iter::repeat(fault).take(times));
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Writes that reached the database
    pub(crate) fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Fresh handle for inspecting what was persisted
    pub(crate) fn inspect(&self) -> SqliteLedger {
        self.inner.connect().unwrap()
    }
}

impl Connector for FlakyConnector {
    type Ledger = FlakyLedger;

    fn connect(&self) -> Result<FlakyLedger, LedgerError> {
        let inner = self.inner.connect()?;
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FlakyLedger {
            inner,
            state: Arc::clone(&self.state),
            dropped: Cell::new(false),
        })
    }
}

/// Ledger handle that stays unusable once its connection has "dropped"
pub(crate) struct FlakyLedger {
    inner: SqliteLedger,
    state: Arc<FaultState>,
    dropped: Cell<bool>,
}

impl FlakyLedger {
    fn check_alive(&self) -> Result<(), LedgerError> {
        if self.dropped.get() {
            return Err(LedgerError::Connectivity("connection reset".into()));
        }
        Ok(())
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&SqliteLedger) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.check_alive()?;
        f(&self.inner)
    }

    fn write(
        &self,
        f: impl FnOnce(&SqliteLedger) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        self.check_alive()?;
        let fault = self.state.pending.lock().unwrap().pop_front();
        match fault {
            Some(Fault::DisconnectBeforeWrite) => {
                self.dropped.set(true);
                Err(LedgerError::Connectivity("connection reset before write".into()))
            }
            Some(Fault::DisconnectAfterWrite) => {
                f(&self.inner)?;
                self.state.writes.fetch_add(1, Ordering::SeqCst);
                self.dropped.set(true);
                Err(LedgerError::Connectivity("connection reset after write".into()))
            }
            Some(Fault::BackendError) => Err(LedgerError::Backend("disk I/O busy".into())),
            None => {
                f(&self.inner)?;
                self.state.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

impl Ledger for FlakyLedger {
    fn count_ok(&self, short_fingerprint: &str) -> Result<u64, LedgerError> {
        self.read(|l| l.count_ok(short_fingerprint))
    }

    fn count_ok_by_name(&self, file_name: &str) -> Result<u64, LedgerError> {
        self.read(|l| l.count_ok_by_name(file_name))
    }

    fn ok_by_name(
        &self,
        file_name: &str,
        excluding_short: &str,
    ) -> Result<Vec<LegacyMatch>, LedgerError> {
        self.read(|l| l.ok_by_name(file_name, excluding_short))
    }

    fn count_error(&self, short_fingerprint: &str) -> Result<u64, LedgerError> {
        self.read(|l| l.count_error(short_fingerprint))
    }

    fn insert(&self, record: &CheckRecord) -> Result<(), LedgerError> {
        self.write(|l| l.insert(record))
    }

    fn update_result(
        &self,
        short_fingerprint: &str,
        result: CheckResult,
        duration: Duration,
        diagnostic: Option<&str>,
        path: &str,
    ) -> Result<(), LedgerError> {
        self.write(|l| l.update_result(short_fingerprint, result, duration, diagnostic, path))
    }

    fn update_fingerprint(&self, old: &str, new: &str) -> Result<(), LedgerError> {
        self.write(|l| l.update_fingerprint(old, new))
    }
}

#[derive(Default)]
struct ScriptState {
    verdict: Cell<Option<Verdict>>,
    diagnostic: RefCell<String>,
    calls: RefCell<Vec<PathBuf>>,
}

/// Verifier returning a preset verdict and recording every call
#[derive(Clone, Default)]
pub(crate) struct ScriptedVerifier {
    state: Rc<ScriptState>,
}

impl ScriptedVerifier {
    pub(crate) fn passing() -> Self {
        let verifier = Self::default();
        verifier.set(Verdict::Pass, "");
        verifier
    }

    pub(crate) fn failing(diagnostic: &str) -> Self {
        let verifier = Self::default();
        verifier.set(Verdict::Fail, diagnostic);
        verifier
    }

    pub(crate) fn set(&self, verdict: Verdict, diagnostic: &str) {
        self.state.verdict.set(Some(verdict));
        *self.state.diagnostic.borrow_mut() = diagnostic.to_string();
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.borrow().len()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, path: &Path) -> Result<Verification, VerifyError> {
        self.state.calls.borrow_mut().push(path.to_path_buf());
        let verdict = self.state.verdict.get().unwrap_or(Verdict::Pass);
        Ok(Verification {
            verdict,
            diagnostic: self.state.diagnostic.borrow().clone(),
            duration: Duration::from_millis(40),
        })
    }
}
