//! Ledger session and whole-file retry loop

use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use super::Ledger;
use crate::error::{FileError, LedgerError};

/// Produces fresh ledger handles
pub trait Connector {
    type Ledger: Ledger;

    fn connect(&self) -> Result<Self::Ledger, LedgerError>;
}

/// How often a file is retried after storage failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per file; `None` retries until the process is killed
    pub max_attempts: Option<u32>,
    /// Delay after the first failure, grows linearly per attempt
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::default()
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration, max_backoff: Duration) -> Self {
        self.backoff = backoff;
        self.max_backoff = max_backoff.max(backoff);
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    pub fn allows_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(attempt.max(1))
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Value produced by [`LedgerSession::run`] and the attempts it took
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The scan's single ledger handle, replaced in place on reconnect
pub struct LedgerSession<C: Connector> {
    connector: C,
    ledger: C::Ledger,
    reconnects: u64,
}

impl<C: Connector> LedgerSession<C> {
    /// Establish the initial connection. Failure here is fatal for the scan.
    pub fn connect(connector: C) -> Result<Self, LedgerError> {
        let ledger = connector.connect()?;
        Ok(Self {
            connector,
            ledger,
            reconnects: 0,
        })
    }

    pub fn ledger(&self) -> &C::Ledger {
        &self.ledger
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Drop the current handle and open a new one
    pub fn reconnect(&mut self) -> Result<(), LedgerError> {
        self.ledger = self.connector.connect()?;
        self.reconnects += 1;
        info!(reconnects = self.reconnects, "Reconnected to ledger");
        Ok(())
    }

    /// Run `op` against the ledger, restarting it from scratch after every
    /// storage failure until it succeeds or `policy` gives up.
    ///
    /// Non-storage errors (unreadable file, verifier not runnable) are
    /// returned immediately without retrying.
    pub fn run<T, F>(&mut self, policy: &RetryPolicy, mut op: F) -> Result<Retried<T>, FileError>
    where
        F: FnMut(&C::Ledger) -> Result<T, FileError>,
    {
        let mut attempt = 1u32;
        loop {
            let err = match op(&self.ledger) {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    })
                }
                Err(FileError::Ledger(err)) => err,
                Err(other) => return Err(other),
            };

            if !policy.allows_retry(attempt) {
                error!(
                    attempts = attempt,
                    error = %err,
                    "Giving up after repeated ledger failures"
                );
                return Err(FileError::Ledger(err));
            }

            if err.is_connectivity() {
                warn!(attempt, error = %err, "Ledger connection lost, reconnecting");
                if let Err(reconnect_err) = self.reconnect() {
                    warn!(attempt, error = %reconnect_err, "Reconnect failed");
                }
            } else {
                warn!(attempt, error = %err, "Ledger operation failed, retrying");
            }

            let delay = policy.delay(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}
