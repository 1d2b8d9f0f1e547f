//! Status command feature.
//!
//! Reads the ledger and reports counts and failing files.

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;

use crate::config::Config;
use crate::ledger::{CheckRecord, CheckResult, LedgerSummary, SqliteLedger};

#[derive(Debug, Serialize)]
struct StatusReport {
    summary: LedgerSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    failing: Option<Vec<CheckRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<Vec<CheckRecord>>,
}

pub(crate) fn handle_status(
    config: &Config,
    json: bool,
    failing: bool,
    name: Option<String>,
    limit: usize,
) -> Result<()> {
    let ledger_path = config.ledger_path()?;
    let ledger = SqliteLedger::open(&ledger_path, config.busy_timeout())
        .with_context(|| format!("Failed to open ledger: {}", ledger_path.display()))?;

    let report = build_report(&ledger, failing, name.as_deref(), limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn build_report(
    ledger: &SqliteLedger,
    failing: bool,
    name: Option<&str>,
    limit: usize,
) -> Result<StatusReport> {
    Ok(StatusReport {
        summary: ledger.summary()?,
        failing: if failing {
            Some(ledger.failing_records(limit)?)
        } else {
            None
        },
        records: match name {
            Some(name) => Some(ledger.records_by_name(name)?),
            None => None,
        },
    })
}

fn print_report(report: &StatusReport) {
    let summary = &report.summary;
    println!("{}", "Ledger".bold());
    println!("  Records:   {}", summary.total);
    println!("  OK:        {}", summary.ok.to_string().green());
    println!("  ERROR:     {}", summary.error.to_string().red());
    if summary.legacy_scheme > 0 {
        println!("  Awaiting fingerprint migration: {}", summary.legacy_scheme);
    }
    match summary.last_checked_at {
        Some(at) => println!("  Last check: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last check: never"),
    }

    if let Some(failing) = &report.failing {
        println!();
        println!("{}", "Failing files".bold());
        if failing.is_empty() {
            println!("  (none)");
        }
        for record in failing {
            print_record(record);
        }
    }

    if let Some(records) = &report.records {
        println!();
        println!("{}", "Records".bold());
        if records.is_empty() {
            println!("  (none)");
        }
        for record in records {
            print_record(record);
        }
    }
}

fn print_record(record: &CheckRecord) {
    let result = match record.result {
        CheckResult::Ok => record.result.as_str().green(),
        CheckResult::Error => record.result.as_str().red(),
    };
    let location = record.path.as_deref().unwrap_or(&record.file_name);
    println!(
        "  [{}] {}  ({:.1}s, {})",
        result,
        location,
        record.duration_seconds,
        record.last_checked_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(diagnostic) = &record.diagnostic {
        for line in diagnostic.lines().take(3) {
            println!("        {}", line.dimmed());
        }
    }
}
