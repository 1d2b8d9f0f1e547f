use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

use crate::error::FileError;
use crate::ledger::{CheckResult, Connector, LedgerSession, RetryPolicy};
use crate::reconcile::{FileNameBridge, MigrationBridge, Outcome, Reconciler};
use crate::verify::Verifier;

/// Extensions checked when the config does not list any
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov"];

/// Decides which walked files are candidates
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: HashSet<String>,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(extensions: &[String], exclude: &[String]) -> Result<Self, globset::Error> {
        let extensions = extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            extensions,
            exclude: builder.build()?,
        })
    }

    /// Extension match is case-insensitive
    pub fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        if !self
            .extensions
            .contains(&ext.to_string_lossy().to_ascii_lowercase())
        {
            return false;
        }
        !self.exclude.is_match(path)
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude: GlobSet::empty(),
        }
    }
}

/// Counters for one pass over the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub discovered: usize,
    pub skipped: usize,
    pub migrated: usize,
    pub verified_ok: usize,
    pub verified_error: usize,
    /// Files that could not be read
    pub io_failures: usize,
    /// Files the verifier could not be launched for
    pub verifier_failures: usize,
    /// Files given up on after the retry policy ran out
    pub storage_failures: usize,
    /// Extra attempts spent on storage failures
    pub retries: usize,
    pub walk_errors: usize,
}

impl PassStats {
    /// Files that reached the ledger this pass
    pub fn recorded(&self) -> usize {
        self.skipped + self.migrated + self.verified_ok + self.verified_error
    }

    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::Migrated { .. } => self.migrated += 1,
            Outcome::Verified(CheckResult::Ok) => self.verified_ok += 1,
            Outcome::Verified(CheckResult::Error) => self.verified_error += 1,
        }
    }
}

/// Drives the pipeline over a directory tree, one file at a time
pub struct Scanner<C: Connector, V, B = FileNameBridge> {
    session: LedgerSession<C>,
    reconciler: Reconciler<V, B>,
    filter: FileFilter,
    retry: RetryPolicy,
}

impl<C, V, B> Scanner<C, V, B>
where
    C: Connector,
    V: Verifier,
    B: MigrationBridge,
{
    pub fn new(
        session: LedgerSession<C>,
        reconciler: Reconciler<V, B>,
        filter: FileFilter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            session,
            reconciler,
            filter,
            retry,
        }
    }

    pub fn session(&self) -> &LedgerSession<C> {
        &self.session
    }

    /// Candidate files under `root`, in walk order
    pub fn discover(&self, root: &Path, stats: &mut PassStats) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    stats.walk_errors += 1;
                    continue;
                }
            };
            if entry.file_type().is_file() && self.filter.matches(entry.path()) {
                trace!(path = %entry.path().display(), "Discovered");
                files.push(entry.into_path());
            }
        }
        files
    }

    /// Reconcile a single file, retrying it from the top on storage failures
    pub fn process_file(&mut self, path: &Path) -> Result<(Outcome, u32), FileError> {
        let reconciler = &self.reconciler;
        let retried = self
            .session
            .run(&self.retry, |ledger| reconciler.reconcile(ledger, path))?;
        Ok((retried.value, retried.attempts))
    }

    /// One full pass. Per-file failures are logged and counted, never fatal.
    pub fn scan_pass(&mut self, root: &Path) -> PassStats {
        let started = Instant::now();
        let mut stats = PassStats::default();
        let files = self.discover(root, &mut stats);
        stats.discovered = files.len();
        info!(root = %root.display(), files = files.len(), "Starting pass");

        for path in &files {
            match self.process_file(path) {
                Ok((outcome, attempts)) => {
                    stats.retries += attempts.saturating_sub(1) as usize;
                    stats.count(&outcome);
                    trace!(path = %path.display(), ?outcome, "Recorded");
                }
                Err(FileError::Io { path, source }) => {
                    error!(
                        path = %path.display(),
                        error = %source,
                        "Could not read file, skipping this pass"
                    );
                    stats.io_failures += 1;
                }
                Err(err @ FileError::Verifier { .. }) => {
                    error!(error = %err, "Skipping file this pass");
                    stats.verifier_failures += 1;
                }
                Err(FileError::Ledger(err)) => {
                    error!(
                        path = %path.display(),
                        error = %err,
                        "Ledger unavailable, file will be retried next pass"
                    );
                    stats.storage_failures += 1;
                }
            }
        }

        info!(
            discovered = stats.discovered,
            skipped = stats.skipped,
            migrated = stats.migrated,
            ok = stats.verified_ok,
            errors = stats.verified_error,
            failures = stats.io_failures + stats.verifier_failures + stats.storage_failures,
            "Pass finished"
        );
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Pass timing");
        stats
    }

    /// Re-scan `root` until `max_passes` is reached, or forever when `None`
    pub fn run(
        &mut self,
        root: &Path,
        interval: Duration,
        max_passes: Option<u64>,
    ) -> PassStats {
        let mut pass = 0u64;
        loop {
            pass += 1;
            debug!(pass, "Pass starting");
            let stats = self.scan_pass(root);

            if max_passes.is_some_and(|max| pass >= max) {
                return stats;
            }
            if !interval.is_zero() {
                debug!(seconds = interval.as_secs(), "Sleeping before next pass");
                thread::sleep(interval);
            }
        }
    }
}
