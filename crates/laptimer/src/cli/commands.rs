//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::config::{ListenerConfig, SourceKind};
use crate::roster::{DriverInfo, NOT_ASSIGNED};
use crate::source::TokenMode;

/// Listen command arguments.
#[derive(Debug, Default, Args)]
pub struct ListenCommand {
    /// Signal source to open
    #[arg(short, long, value_enum)]
    pub source: Option<SourceArg>,

    /// Serial device address (e.g. /dev/ttyUSB0 or COM3)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// File to replay (implies --source replay)
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Treat every line as a pulse on one channel (TTL input)
    #[arg(long)]
    pub channel: bool,

    /// Connect but keep the race stopped
    #[arg(long)]
    pub paused: bool,

    /// Exit instead of reopening the source when it disconnects
    #[arg(long)]
    pub no_reconnect: bool,

    /// Print laps as JSON lines
    #[arg(short, long)]
    pub json: bool,
}

impl ListenCommand {
    /// Apply command-line overrides to the listener configuration.
    pub fn apply(&self, listener: &mut ListenerConfig) {
        if let Some(source) = self.source {
            listener.source = source.into();
        }
        if let Some(device) = &self.device {
            listener.device.clone_from(device);
        }
        if let Some(baud) = self.baud {
            listener.baud_rate = baud;
        }
        if let Some(path) = &self.replay {
            listener.source = SourceKind::Replay;
            listener.replay_path = Some(path.clone());
        }
        if self.channel {
            listener.token_mode = TokenMode::Channel;
        }
    }
}

/// Standings command arguments.
#[derive(Debug, Args)]
pub struct StandingsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Reset command arguments.
#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Only remove this token's record
    pub token: Option<String>,

    /// Skip confirmation when removing every record
    #[arg(short, long)]
    pub yes: bool,
}

/// Driver roster commands.
#[derive(Debug, Subcommand)]
pub enum RosterCommand {
    /// List assigned tags
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Assign a driver to a tag
    Assign(AssignArgs),

    /// Remove a tag from the roster
    Remove {
        /// The tag to remove
        tag: String,
    },
}

/// Arguments for `roster assign`.
#[derive(Debug, Args)]
pub struct AssignArgs {
    /// The tag code
    pub tag: String,

    /// Driver name
    #[arg(short, long)]
    pub name: String,

    /// Race number
    #[arg(long)]
    pub number: Option<String>,

    /// Kart identifier
    #[arg(short, long)]
    pub kart: Option<String>,

    /// Kart class (e.g. 125cc)
    #[arg(long = "class")]
    pub kart_class: Option<String>,
}

impl AssignArgs {
    /// The driver described by these arguments.
    #[must_use]
    pub fn driver(&self) -> DriverInfo {
        let or_unassigned =
            |value: &Option<String>| value.clone().unwrap_or_else(|| NOT_ASSIGNED.to_string());
        DriverInfo {
            name: self.name.clone(),
            number: or_unassigned(&self.number),
            kart: or_unassigned(&self.kart),
            kart_class: or_unassigned(&self.kart_class),
        }
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Signal source argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Serial device
    Serial,
    /// Simulated RFID reader
    Simulated,
    /// Replay a capture file
    Replay,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Serial => Self::Serial,
            SourceArg::Simulated => Self::Simulated,
            SourceArg::Replay => Self::Replay,
        }
    }
}
