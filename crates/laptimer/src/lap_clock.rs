//! Lap computation.
//!
//! Everything here is pure: given the previous record for a token and the
//! time of a new detection, compute the lap that detection closes and the
//! updated running best. No I/O, no clocks.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionToken;

/// How to treat a lap whose duration is zero or negative.
///
/// Such laps come from clock skew or from duplicate reads that carry the same
/// timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LapPolicy {
    /// Accept the duration as computed.
    #[default]
    PassThrough,
    /// Record the lap with a duration of zero.
    Clamp,
    /// Do not record a lap; last and best stay as they were.
    Reject,
}

/// The stored state of one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapRecord {
    /// The token this record belongs to.
    pub token: DetectionToken,
    /// Duration of the most recent lap, if one has been completed.
    pub last_lap: Option<TimeDelta>,
    /// Shortest lap seen so far.
    pub best_lap: Option<TimeDelta>,
    /// When the token was last detected; the baseline for the next lap.
    pub last_seen_at: DateTime<Utc>,
}

/// Result of closing a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapOutcome {
    /// Duration of the lap just completed, or `None` if there is nothing to report.
    pub duration: Option<TimeDelta>,
    /// Best lap after this detection.
    pub best: Option<TimeDelta>,
}

impl LapOutcome {
    /// True if this detection completed a reportable lap.
    #[must_use]
    pub fn is_lap(&self) -> bool {
        self.duration.is_some()
    }
}

/// Compute the lap closed by a detection at `now`.
///
/// The first detection of a token has no previous record and yields no
/// duration and no best. Otherwise the duration is the time since
/// `previous.last_seen_at`, truncated to whole milliseconds, and the best is
/// the smaller of that duration and the previous best.
#[must_use]
pub fn compute_lap(
    previous: Option<&LapRecord>,
    now: DateTime<Utc>,
    policy: LapPolicy,
) -> LapOutcome {
    let Some(previous) = previous else {
        return LapOutcome {
            duration: None,
            best: None,
        };
    };

    let raw = truncate_to_millis(now - previous.last_seen_at);
    let duration = if raw > TimeDelta::zero() {
        raw
    } else {
        match policy {
            LapPolicy::PassThrough => raw,
            LapPolicy::Clamp => TimeDelta::zero(),
            LapPolicy::Reject => {
                return LapOutcome {
                    duration: None,
                    best: previous.best_lap,
                };
            }
        }
    };

    let best = match previous.best_lap {
        Some(best) => best.min(duration),
        None => duration,
    };

    LapOutcome {
        duration: Some(duration),
        best: Some(best),
    }
}

impl LapRecord {
    /// A freshly seen token: baseline only, no laps.
    #[must_use]
    pub fn first_seen(token: DetectionToken, at: DateTime<Utc>) -> Self {
        Self {
            token,
            last_lap: None,
            best_lap: None,
            last_seen_at: at,
        }
    }

    /// Apply a detection at `now` and return the updated record.
    ///
    /// `last_seen_at` never moves backwards, even when the policy lets a
    /// negative lap through.
    #[must_use]
    pub fn advance(&self, now: DateTime<Utc>, policy: LapPolicy) -> (Self, LapOutcome) {
        let outcome = compute_lap(Some(self), now, policy);
        let record = Self {
            token: self.token.clone(),
            last_lap: outcome.duration.or(self.last_lap),
            best_lap: outcome.best,
            last_seen_at: self.last_seen_at.max(now),
        };
        (record, outcome)
    }
}

/// Record a detection against an optional previous record.
#[must_use]
pub fn record_detection(
    previous: Option<&LapRecord>,
    token: &DetectionToken,
    now: DateTime<Utc>,
    policy: LapPolicy,
) -> (LapRecord, LapOutcome) {
    match previous {
        Some(record) => record.advance(now, policy),
        None => (
            LapRecord::first_seen(token.clone(), now),
            compute_lap(None, now, policy),
        ),
    }
}

fn truncate_to_millis(delta: TimeDelta) -> TimeDelta {
    TimeDelta::milliseconds(delta.num_milliseconds())
}

/// Render a lap as `MM:SS:mmm`.
#[must_use]
pub fn format_lap(duration: TimeDelta) -> String {
    let millis = duration.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    let millis = millis.unsigned_abs();
    let minutes = millis / 60_000;
    let seconds = (millis % 60_000) / 1_000;
    let rest = millis % 1_000;
    format!("{sign}{minutes:02}:{seconds:02}:{rest:03}")
}

/// Render an optional lap, using `--:--:---` for laps not yet set.
#[must_use]
pub fn format_optional_lap(duration: Option<TimeDelta>) -> String {
    duration.map_or_else(|| "--:--:---".to_string(), format_lap)
}
