//! `laptimer` - Serial lap-trigger listener and lap timer
//!
//! This library turns a stream of trigger signals (RFID tag reads or TTL
//! pulses arriving on a serial line) into per-token lap records: last lap,
//! best lap and last-seen time, kept in a durable table.
//!
//! The pieces, in pipeline order:
//! - [`source`]: signal sources and line decoding
//! - [`listener`]: background polling and the detection buffer
//! - [`lap_clock`]: pure lap arithmetic
//! - [`store`]: the lap record table and its backends
//! - [`timekeeper`]: race session, listener and store wired together

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod lap_clock;
pub mod listener;
pub mod logging;
pub mod roster;
pub mod session;
pub mod source;
pub mod store;
pub mod timekeeper;

pub use config::Config;
pub use detection::{Detection, DetectionToken};
pub use error::{Error, Result};
pub use lap_clock::{compute_lap, format_lap, LapOutcome, LapPolicy, LapRecord};
pub use listener::{ListenerOptions, ListenerStatus, SignalListener};
pub use logging::init_logging;
pub use roster::{DriverInfo, DriverRoster};
pub use session::{RaceSession, RaceState};
pub use source::{OpenSource, SignalSource};
pub use store::{LapStore, RecordBackend};
pub use timekeeper::{DedupPolicy, PumpReport, RecordedLap, Timekeeper};
