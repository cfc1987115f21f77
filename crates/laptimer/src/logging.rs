//! Logging setup.
//!
//! Everything logs through `tracing`. The listener worker runs on a thread
//! named `laptimer-listener`, so thread names are part of every line; that is
//! the easiest way to tell a device problem from a consumer problem.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Connection changes, laps and warnings.
    #[default]
    Normal,
    /// Adds listener lifecycle, skipped lines and store writes.
    Verbose,
    /// Adds every raw line read from the source.
    Trace,
}

impl Verbosity {
    /// Map `-q` and repeated `-v` flags to a verbosity. `quiet` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The most detailed level logged for laptimer itself.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    ///
    /// Dependencies stay at `warn` so `-vv` shows raw serial lines without
    /// drowning them in runtime noise.
    #[must_use]
    pub fn directive(self) -> String {
        match self {
            Self::Quiet => "error".to_string(),
            _ => format!("warn,laptimer={}", self.level()),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the filter derived from `verbosity`. Calling this more
/// than once is harmless; only the first call installs anything.
///
/// ```no_run
/// use laptimer::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let layer = fmt::layer()
        .with_thread_names(true)
        .with_target(verbosity >= Verbosity::Verbose)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}

/// Route logs to the test harness. Warnings and above unless `RUST_LOG` is set.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}
