//! Subcommand handlers

pub(crate) mod scan_command;
pub(crate) mod status_command;
