use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};

use crate::config::Config;
use crate::logging::{self, Verbosity};

mod commands;

#[derive(Parser)]
#[command(name = "mediacheck")]
#[command(version)]
#[command(about = "Incrementally verify the integrity of a video library")]
#[command(long_about = "mediacheck decodes every video under a directory with an external \
    checker (ffmpeg by default) and remembers the verdicts in a ledger, so unchanged files \
    are never decoded twice.\n\n\
    Examples:\n  \
    mediacheck scan --path /srv/media --once   # Single pass\n  \
    mediacheck scan                            # Re-scan the configured root forever\n  \
    mediacheck status --failing                # List files whose last check failed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file [default: platform config dir]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check every video under the root, skipping files already known good
    #[command(visible_alias = "s")]
    Scan {
        /// Root directory to scan (overrides `root` in the config)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,

        /// Seconds to wait between passes (overrides the config)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        /// Attempts per file when the ledger keeps failing
        #[arg(long, value_name = "N", conflicts_with = "retry_forever")]
        max_attempts: Option<u32>,

        /// Never give up on a file while the ledger is down
        #[arg(long)]
        retry_forever: bool,

        /// Count verifier stderr output as a failure even on a clean exit
        #[arg(long)]
        strict: bool,
    },

    /// Summarise the ledger
    Status {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,

        /// List files whose last check failed
        #[arg(long)]
        failing: bool,

        /// Show every record for this file name
        #[arg(long, value_name = "FILE_NAME")]
        name: Option<String>,

        /// Maximum failing files to list [default: 20]
        #[arg(long, default_value = "20", value_name = "N")]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

/// Per-invocation overrides for a scan
pub(crate) struct ScanArgs {
    pub path: Option<PathBuf>,
    pub once: bool,
    pub interval: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_forever: bool,
    pub strict: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(self) -> anyhow::Result<()> {
        let config = Config::load(self.config.as_deref())?;

        if let Commands::Config = self.command {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            return Ok(());
        }

        let verbosity = Verbosity::from_flags(self.verbose, self.quiet);
        logging::init_logging(&config.log_dir()?, verbosity)?;

        match self.command {
            Commands::Scan {
                path,
                once,
                interval,
                max_attempts,
                retry_forever,
                strict,
            } => commands::scan_command::handle_scan(
                config,
                ScanArgs {
                    path,
                    once,
                    interval,
                    max_attempts,
                    retry_forever,
                    strict,
                },
                verbosity,
            ),
            Commands::Status {
                json,
                failing,
                name,
                limit,
            } => commands::status_command::handle_status(&config, json, failing, name, limit),
            Commands::Config => Ok(()),
        }
    }
}
