//! Scan command feature.
//!
//! Builds the pipeline from config plus flags and hands it to the scanner.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use colored::*;
use tracing::info;

use crate::cli::ScanArgs;
use crate::config::Config;
use crate::fingerprint::SHORT_FINGERPRINT_CAP;
use crate::ledger::{LedgerSession, SqliteConnector};
use crate::logging::Verbosity;
use crate::reconcile::Reconciler;
use crate::scanner::{FileFilter, PassStats, Scanner};
use crate::verify::CommandVerifier;

pub(crate) fn handle_scan(mut config: Config, args: ScanArgs, verbosity: Verbosity) -> Result<()> {
    let root = args
        .path
        .or_else(|| config.root.clone())
        .context("No scan root given; pass --path or set `root` in the config")?;
    if !root.is_dir() {
        bail!("Scan root is not a directory: {}", root.display());
    }

    if args.strict {
        config.verifier.strict = true;
    }
    if args.retry_forever {
        config.retry.unbounded = true;
    }
    if let Some(max) = args.max_attempts {
        config.retry.max_attempts = max;
        config.retry.unbounded = false;
    }
    let retry = config.retry_policy();

    let verifier = CommandVerifier::new(
        config.verifier.program.clone(),
        config.verifier.args.clone(),
        config.verifier.probe_args.clone(),
        config.verifier.strict,
    )
    .context("Invalid verifier configuration")?;
    verifier
        .probe()
        .with_context(|| format!("Verifier `{}` is not runnable", verifier.program()))?;

    let filter = FileFilter::new(&config.scan.extensions, &config.scan.exclude)
        .context("Invalid exclude pattern")?;

    let ledger_path = config.ledger_path()?;
    let session = LedgerSession::connect(SqliteConnector::new(&ledger_path, config.busy_timeout()))
        .with_context(|| format!("Failed to open ledger: {}", ledger_path.display()))?;

    info!(
        root = %root.display(),
        ledger = %ledger_path.display(),
        verifier = verifier.program(),
        short_cap = %ByteSize(SHORT_FINGERPRINT_CAP),
        max_attempts = ?retry.max_attempts,
        "Starting mediacheck"
    );

    let reconciler =
        Reconciler::new(verifier).record_full_fingerprints(config.fingerprint.record_full);
    let mut scanner = Scanner::new(session, reconciler, filter, retry);

    let interval = args
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.rescan_interval());
    let max_passes = args.once.then_some(1);

    let stats = scanner.run(&root, interval, max_passes);
    if verbosity != Verbosity::Quiet {
        print_summary(&stats);
    }
    Ok(())
}

fn print_summary(stats: &PassStats) {
    println!();
    println!("{}", "Scan summary".bold());
    println!("  Files found:      {}", stats.discovered);
    println!("  Unchanged:        {}", stats.skipped);
    println!("  Migrated:         {}", stats.migrated);
    println!("  Verified OK:      {}", stats.verified_ok.to_string().green());
    if stats.verified_error > 0 {
        println!("  Verified ERROR:   {}", stats.verified_error.to_string().red());
    } else {
        println!("  Verified ERROR:   0");
    }

    let failures = stats.io_failures + stats.verifier_failures + stats.storage_failures;
    if failures > 0 {
        println!(
            "  {} {} file(s) not recorded this pass (unreadable: {}, verifier: {}, ledger: {})",
            "Warning:".yellow(),
            failures,
            stats.io_failures,
            stats.verifier_failures,
            stats.storage_failures
        );
    }
    if stats.retries > 0 {
        println!("  Ledger retries:   {}", stats.retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    use crate::ledger::SqliteLedger;

    fn single_pass(path: Option<PathBuf>) -> ScanArgs {
        ScanArgs {
            path,
            once: true,
            interval: None,
            max_attempts: Some(2),
            retry_forever: false,
            strict: false,
        }
    }

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.ledger.path = Some(dir.join("state").join("ledger.db"));
        config.log.dir = Some(dir.join("logs"));
        config
    }

    /// Verifier that appends each checked path to `marker`
    #[cfg(unix)]
    fn recording_verifier(config: &mut Config, marker: &Path) {
        config.verifier.program = "sh".to_string();
        config.verifier.args = vec![
            "-c".to_string(),
            format!("echo \"$1\" >> '{}'", marker.display()),
            "sh".to_string(),
            "{path}".to_string(),
        ];
        config.verifier.probe_args = vec!["-c".to_string(), "true".to_string()];
    }

    #[test]
    fn test_missing_root_aborts_before_opening_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path());
        let ledger_path = config.ledger_path().unwrap();

        let err = handle_scan(
            config,
            single_pass(Some(temp_dir.path().join("not-mounted"))),
            Verbosity::Quiet,
        )
        .unwrap_err();

        assert!(err.to_string().contains("not a directory"));
        assert!(!ledger_path.exists());
    }

    #[test]
    fn test_unconfigured_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = handle_scan(config_in(temp_dir.path()), single_pass(None), Verbosity::Quiet)
            .unwrap_err();
        assert!(err.to_string().contains("No scan root given"));
    }

    #[test]
    fn test_unrunnable_verifier_aborts_before_any_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("library");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("movie.mp4"), b"movie").unwrap();
        let mut config = config_in(temp_dir.path());
        config.verifier.program = "definitely-not-a-real-decoder".to_string();
        let ledger_path = config.ledger_path().unwrap();

        let err = handle_scan(config, single_pass(Some(root)), Verbosity::Quiet).unwrap_err();

        assert!(format!("{err:#}").contains("is not runnable"));
        assert!(!ledger_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_ledger_aborts_before_any_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("library");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("movie.mp4"), b"movie").unwrap();
        let marker = temp_dir.path().join("checked.txt");
        let mut config = config_in(temp_dir.path());
        recording_verifier(&mut config, &marker);
        let ledger_path = config.ledger_path().unwrap();
        fs::create_dir_all(ledger_path.parent().unwrap()).unwrap();
        fs::write(&ledger_path, b"this is not a sqlite database, just some bytes").unwrap();

        let err = handle_scan(config, single_pass(Some(root)), Verbosity::Quiet).unwrap_err();

        assert!(err.to_string().contains("Failed to open ledger"));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_single_pass_records_every_video() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("library");
        fs::create_dir_all(root.join("shows")).unwrap();
        fs::write(root.join("movie.mp4"), b"movie").unwrap();
        fs::write(root.join("shows").join("episode.MKV"), b"episode").unwrap();
        fs::write(root.join("notes.txt"), b"notes").unwrap();
        let marker = temp_dir.path().join("checked.txt");
        let mut config = config_in(temp_dir.path());
        recording_verifier(&mut config, &marker);
        let ledger_path = config.ledger_path().unwrap();

        handle_scan(config.clone(), single_pass(Some(root.clone())), Verbosity::Quiet).unwrap();
        handle_scan(config, single_pass(Some(root)), Verbosity::Quiet).unwrap();

        // Second run skips both files
        assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 2);
        let ledger = SqliteLedger::open(&ledger_path, Duration::from_secs(1)).unwrap();
        let summary = ledger.summary().unwrap();
        assert_eq!((summary.total, summary.ok), (2, 2));
    }
}
