//! Command-line interface for laptimer.
//!
//! This module provides the CLI structure for the `laptimer` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{
    AssignArgs, ConfigCommand, ListenCommand, ResetCommand, RosterCommand, SourceArg,
    StandingsCommand,
};

/// laptimer - Serial lap-trigger listener and lap timer
///
/// Listens for RFID tag reads or TTL pulses on a serial line and keeps the
/// last and best lap of every tag.
#[derive(Debug, Parser)]
#[command(name = "laptimer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Listen for detections and record laps until interrupted
    Listen(ListenCommand),

    /// Show lap records ordered by best lap
    Standings(StandingsCommand),

    /// Remove lap records
    Reset(ResetCommand),

    /// Manage the driver roster
    #[command(subcommand)]
    Roster(RosterCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
