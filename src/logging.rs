//! Tracing setup: stderr plus a size-rotated log file

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "mediacheck.log";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Console verbosity picked on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Debug,
            (false, _) => Self::Trace,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet | Self::Normal => "mediacheck=info",
            Self::Debug => "mediacheck=debug",
            Self::Trace => "mediacheck=trace",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the file filter.
pub fn init_logging(log_dir: &Path, verbosity: Verbosity) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let log_path = log_dir.join(LOG_FILE_NAME);
    let log_file = LogFile::open(log_path.clone(), MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
    let console_filter = match verbosity {
        Verbosity::Quiet => EnvFilter::new("error"),
        _ => EnvFilter::new(verbosity.default_filter()),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}

/// Append-only log file that keeps `keep - 1` archives (`<name>.1` newest)
/// once it grows past `limit` bytes
struct LogFile {
    path: PathBuf,
    keep: usize,
    limit: u64,
    file: Option<File>,
    len: u64,
}

impl LogFile {
    fn open(path: PathBuf, keep: usize, limit: u64) -> io::Result<Self> {
        let mut log = Self {
            path,
            keep: keep.max(1),
            limit,
            file: None,
            len: 0,
        };
        log.reopen()?;
        if log.len > log.limit {
            log.roll()?;
        }
        Ok(log)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.len = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn archive(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    /// Shift every archive up by one; the oldest is overwritten
    fn roll(&mut self) -> io::Result<()> {
        // Windows refuses to rename an open file
        drop(self.file.take());

        if self.keep == 1 {
            match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        for index in (1..self.keep).rev() {
            let from = match index {
                1 => self.path.clone(),
                _ => self.archive(index - 1),
            };
            if from.exists() {
                fs::rename(&from, self.archive(index))?;
            }
        }

        self.reopen()
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.len > 0 && self.len + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let written = file.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
