//! mediacheck library crate
//!
//! Incremental integrity checking for video libraries. Each file is
//! fingerprinted, decoded by an external verifier when its fingerprint is
//! unknown, and the verdict is kept in a SQLite ledger.

pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod logging;
pub mod reconcile;
pub mod scanner;
pub mod verify;

#[cfg(test)]
mod testing;
