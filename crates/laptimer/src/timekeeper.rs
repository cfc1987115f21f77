//! The timing pipeline.
//!
//! A [`Timekeeper`] owns the race session, the signal listener and the lap
//! store. Each [`pump`](Timekeeper::pump) drains the listener, turns the
//! detections into laps while the race is running, and writes the table once
//! per batch.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detection::Detection;
use crate::error::Result;
use crate::lap_clock::{record_detection, LapOutcome, LapPolicy, LapRecord};
use crate::listener::{ListenerOptions, ListenerStatus, SignalListener};
use crate::session::{RaceSession, RaceState};
use crate::source::OpenSource;
use crate::store::LapStore;

/// Drops repeated reads of a token that arrive too soon after the last one.
///
/// RFID readers report a tag several times while it passes the antenna. With a
/// window set, a detection less than `window` after the token's last accepted
/// detection is ignored. Detections stamped earlier than the last one are
/// left to the [`LapPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupPolicy {
    window: Option<TimeDelta>,
}

impl DedupPolicy {
    /// Keep every detection.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Drop detections within `window` of the previous one.
    #[must_use]
    pub fn within(window: Duration) -> Self {
        if window.is_zero() {
            return Self::disabled();
        }
        Self {
            window: TimeDelta::from_std(window).ok(),
        }
    }

    /// Build from session configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        config.dedup_window().map_or_else(Self::disabled, Self::within)
    }

    /// The window, if enabled.
    #[must_use]
    pub fn window(&self) -> Option<TimeDelta> {
        self.window
    }

    /// Whether a detection at `at` repeats `previous` too closely.
    #[must_use]
    pub fn suppresses(&self, previous: Option<&LapRecord>, at: DateTime<Utc>) -> bool {
        let (Some(window), Some(previous)) = (self.window, previous) else {
            return false;
        };
        let since = at - previous.last_seen_at;
        since >= TimeDelta::zero() && since < window
    }
}

/// A detection that updated the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLap {
    /// The record after the update.
    pub record: LapRecord,
    /// The lap this detection closed.
    pub outcome: LapOutcome,
}

impl RecordedLap {
    /// True for a token's first detection, which only sets the baseline.
    #[must_use]
    pub fn is_first_pass(&self) -> bool {
        !self.outcome.is_lap() && self.record.last_lap.is_none()
    }
}

/// What one pump did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Detections drained from the listener.
    pub observed: usize,
    /// Updates written to the table, in arrival order.
    pub recorded: Vec<RecordedLap>,
    /// Detections discarded because the race was stopped.
    pub ignored_stopped: usize,
    /// Detections dropped by the dedup window.
    pub deduplicated: usize,
}

impl PumpReport {
    /// Completed laps in this batch.
    pub fn laps(&self) -> impl Iterator<Item = &RecordedLap> {
        self.recorded.iter().filter(|lap| lap.outcome.is_lap())
    }

    /// Whether nothing was drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observed == 0
    }
}

/// Session, listener and store in one place.
#[derive(Debug)]
pub struct Timekeeper {
    session: RaceSession,
    listener: SignalListener,
    store: LapStore,
    policy: LapPolicy,
    dedup: DedupPolicy,
}

impl Timekeeper {
    /// Assemble a timekeeper with a stopped race, default lap policy and no dedup.
    #[must_use]
    pub fn new(listener: SignalListener, store: LapStore) -> Self {
        Self {
            session: RaceSession::new(),
            listener,
            store,
            policy: LapPolicy::default(),
            dedup: DedupPolicy::disabled(),
        }
    }

    /// Build everything from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener settings are invalid or the store
    /// cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        let listener = SignalListener::new(ListenerOptions::from_config(&config.listener)?);
        let store = LapStore::open_from_config(config)?;
        Ok(Self::new(listener, store)
            .with_lap_policy(config.session.lap_policy)
            .with_dedup(DedupPolicy::from_config(config)))
    }

    /// Set the treatment of zero and negative laps.
    #[must_use]
    pub fn with_lap_policy(mut self, policy: LapPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the dedup policy.
    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    /// Start the race. Returns `true` if it was stopped.
    pub fn start_race(&mut self) -> bool {
        self.session.start()
    }

    /// Stop the race. Returns `true` if it was running.
    pub fn stop_race(&mut self) -> bool {
        self.session.stop()
    }

    /// Current race state.
    #[must_use]
    pub fn race_state(&self) -> RaceState {
        self.session.state()
    }

    /// The race session.
    #[must_use]
    pub fn session(&self) -> &RaceSession {
        &self.session
    }

    /// Open `source` and start listening.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the source cannot be opened.
    pub fn listen(&mut self, source: &dyn OpenSource) -> Result<ListenerStatus> {
        self.listener.start(source)
    }

    /// Stop listening.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] if the worker does not stop in time.
    pub fn unlisten(&mut self) -> Result<()> {
        self.listener.stop()
    }

    /// The signal listener.
    #[must_use]
    pub fn listener(&self) -> &SignalListener {
        &self.listener
    }

    /// The lap store.
    #[must_use]
    pub fn store(&self) -> &LapStore {
        &self.store
    }

    /// Mutable access to the lap store, for administrative changes.
    pub fn store_mut(&mut self) -> &mut LapStore {
        &mut self.store
    }

    /// Apply a batch of detections to the table in memory.
    ///
    /// Nothing is written; [`pump`](Self::pump) flushes after each batch.
    pub fn process(&mut self, detections: Vec<Detection>) -> PumpReport {
        let mut report = PumpReport {
            observed: detections.len(),
            ..PumpReport::default()
        };

        for detection in detections {
            if !self.session.is_running() {
                report.ignored_stopped += 1;
                continue;
            }

            let previous = self.store.get(&detection.token);
            if self.dedup.suppresses(previous, detection.detected_at) {
                debug!(token = %detection.token, "Dropping repeated read");
                report.deduplicated += 1;
                continue;
            }

            let (record, outcome) =
                record_detection(previous, &detection.token, detection.detected_at, self.policy);
            if previous == Some(&record) {
                continue;
            }
            self.store.apply(record.clone());
            report.recorded.push(RecordedLap { record, outcome });
        }

        if report.ignored_stopped > 0 {
            debug!(count = report.ignored_stopped, "Ignored detections while stopped");
        }
        report
    }

    /// Drain the listener, record laps and save.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the table cannot be written; the
    /// updates stay in memory and are written by the next pump. Returns
    /// [`crate::Error::ConnectionLost`] once after the device goes away,
    /// after everything read before the disconnect has been recorded. A lost
    /// connection takes precedence over a failed save, which is then only
    /// logged and retried by the next pump.
    pub fn pump(&mut self) -> Result<PumpReport> {
        let disconnect = self.listener.take_disconnect();
        let detections = self.listener.drain();
        let report = self.process(detections);

        let flushed = self.store.flush();

        if let Some(err) = disconnect {
            if let Err(save_err) = flushed {
                warn!(error = %save_err, "Lap records not saved after disconnect; will retry");
            }
            warn!(error = %err, "Listener lost its source");
            return Err(err);
        }
        flushed?;
        Ok(report)
    }

    /// Records ordered by best lap, fastest first. Tokens without a lap come last.
    #[must_use]
    pub fn standings(&self) -> Vec<LapRecord> {
        standings(self.store.records().cloned())
    }

    /// Stop listening and write pending changes.
    ///
    /// # Errors
    ///
    /// Returns the first failure. The store is flushed even if stopping the
    /// listener timed out.
    pub fn shutdown(&mut self) -> Result<()> {
        let stopped = self.listener.stop();
        let flushed = self.store.flush();
        info!(records = self.store.len(), "Timekeeper shut down");
        stopped.and(flushed)
    }
}

/// Sort records by best lap, fastest first, with unset bests last.
#[must_use]
pub fn standings(records: impl IntoIterator<Item = LapRecord>) -> Vec<LapRecord> {
    let mut records: Vec<_> = records.into_iter().collect();
    records.sort_by(|a, b| match (a.best_lap, b.best_lap) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.token.cmp(&b.token)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.token.cmp(&b.token),
    });
    records
}
