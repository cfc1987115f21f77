//! Detection tokens and timestamped detections.
//!
//! A token identifies what triggered a lap: an RFID tag code, or the fixed
//! channel name of an anonymous TTL input.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Token used for the single anonymous TTL channel.
pub const DEFAULT_CHANNEL_TOKEN: &str = "TTL";

/// Opaque, non-empty identifier of a lap-trigger source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DetectionToken(String);

impl DetectionToken {
    /// Create a token, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if the value is empty after trimming.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidToken(value.as_ref().to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The token of the anonymous TTL channel.
    #[must_use]
    pub fn default_channel() -> Self {
        Self(DEFAULT_CHANNEL_TOKEN.to_string())
    }

    /// The token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DetectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl TryFrom<String> for DetectionToken {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DetectionToken> for String {
    fn from(token: DetectionToken) -> Self {
        token.0
    }
}

impl AsRef<str> for DetectionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A token observed by the listener, stamped on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// What was detected.
    pub token: DetectionToken,
    /// When the listener decoded it.
    pub detected_at: DateTime<Utc>,
}

impl Detection {
    /// Create a detection stamped with the current time.
    #[must_use]
    pub fn now(token: DetectionToken) -> Self {
        Self::at(token, Utc::now())
    }

    /// Create a detection with an explicit timestamp.
    #[must_use]
    pub fn at(token: DetectionToken, detected_at: DateTime<Utc>) -> Self {
        Self { token, detected_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_trims_whitespace() {
        let token = DetectionToken::new("  A1\r").unwrap();
        assert_eq!(token.as_str(), "A1");
        assert_eq!(token.to_string(), "A1");
    }

    #[test]
    fn test_token_rejects_empty() {
        assert!(matches!(
            DetectionToken::new(""),
            Err(Error::InvalidToken(_))
        ));
        assert!(DetectionToken::new(" \t ").is_err());
    }

    #[test]
    fn test_token_ordering_is_lexical() {
        let a = DetectionToken::new("A1").unwrap();
        let b = DetectionToken::new("B2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_token_serde_rejects_empty() {
        let ok: DetectionToken = serde_json::from_str("\"1234567890\"").unwrap();
        assert_eq!(ok.as_str(), "1234567890");
        assert!(serde_json::from_str::<DetectionToken>("\"\"").is_err());
    }

    #[test]
    fn test_detection_at() {
        let token = DetectionToken::new(DEFAULT_CHANNEL_TOKEN).unwrap();
        let at = DateTime::from_timestamp_millis(1_500).unwrap();
        let detection = Detection::at(token.clone(), at);
        assert_eq!(detection.token, token);
        assert_eq!(detection.detected_at.timestamp_millis(), 1_500);
    }
}
