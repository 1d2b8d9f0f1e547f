//! Configuration file support
//!
//! Location: `<config dir>/mediacheck/config.toml` unless `--config` is given.
//! A missing default file means built-in defaults; a missing explicit file is
//! an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::ledger::RetryPolicy;
use crate::scanner::DEFAULT_EXTENSIONS;
use crate::verify::default_ffmpeg_args;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory tree to check
    pub root: Option<PathBuf>,
    pub ledger: LedgerConfig,
    pub scan: ScanConfig,
    pub verifier: VerifierConfig,
    pub retry: RetryConfig,
    pub fingerprint: FingerprintConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite file; defaults to `<data dir>/ledger.db`
    pub path: Option<PathBuf>,
    pub busy_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub extensions: Vec<String>,
    /// Glob patterns for paths never checked
    pub exclude: Vec<String>,
    /// Pause between passes in continuous mode
    pub rescan_interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude: Vec::new(),
            rescan_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub program: String,
    /// Arguments; `{path}` is replaced with the file being checked
    pub args: Vec<String>,
    /// Arguments for the startup reachability check
    pub probe_args: Vec<String>,
    /// Treat any stderr output as a failure, even on a clean exit
    pub strict: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: default_ffmpeg_args(),
            probe_args: vec!["-version".to_string()],
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Retry a file until the ledger comes back, ignoring `max_attempts`
    pub unbounded: bool,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts.unwrap_or(10),
            unbounded: false,
            backoff_ms: policy.backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Store whole-file hashes for files above the short fingerprint cap
    pub record_full: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self { record_full: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Defaults to `<data dir>/logs`
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load from `explicit`, or from the default location if it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn ledger_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.ledger.path {
            return Ok(path.clone());
        }
        Ok(data_dir()?.join("ledger.db"))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.log.dir {
            return Ok(dir.clone());
        }
        Ok(data_dir()?.join("logs"))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.busy_timeout_secs)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.scan.rescan_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = if self.retry.unbounded {
            RetryPolicy::unbounded()
        } else {
            RetryPolicy::bounded(self.retry.max_attempts)
        };
        policy.with_backoff(
            Duration::from_millis(self.retry.backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "mediacheck")
}

fn data_dir() -> Result<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("Could not determine a data directory; set ledger.path and log.dir in the config")
}
