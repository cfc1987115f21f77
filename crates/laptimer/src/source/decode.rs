//! Turning raw lines into detection tokens.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::config::ListenerConfig;
use crate::detection::DetectionToken;
use crate::error::{Error, Result};

/// Why a raw line produced no token. Never surfaced past the listener.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The line was not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// The line was empty after trimming.
    #[error("line is empty")]
    Empty,

    /// The tag did not match the configured pattern.
    #[error("tag {0:?} does not match the token pattern")]
    PatternMismatch(String),
}

/// How a decoded line maps to a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    /// Each line is a tag code (RFID readers).
    #[default]
    Tag,
    /// Each line is a pulse on a single anonymous channel (TTL inputs).
    Channel,
}

/// Decodes newline-delimited UTF-8 lines into tokens.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    mode: TokenMode,
    channel_token: DetectionToken,
    pattern: Option<Regex>,
}

impl LineDecoder {
    /// Decoder that treats every line as a tag.
    #[must_use]
    pub fn tags() -> Self {
        Self {
            mode: TokenMode::Tag,
            channel_token: DetectionToken::default_channel(),
            pattern: None,
        }
    }

    /// Decoder that maps every line to one channel token.
    #[must_use]
    pub fn channel(token: DetectionToken) -> Self {
        Self {
            mode: TokenMode::Channel,
            channel_token: token,
            pattern: None,
        }
    }

    /// Only accept tags matching `pattern`.
    #[must_use]
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Build a decoder from listener configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel token is empty or the pattern is not a
    /// valid regex.
    pub fn from_config(config: &ListenerConfig) -> Result<Self> {
        let channel_token = DetectionToken::new(&config.channel_token)?;
        let pattern = config
            .token_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::ConfigValidation {
                message: format!("invalid token_pattern: {e}"),
            })?;
        Ok(Self {
            mode: config.token_mode,
            channel_token,
            pattern,
        })
    }

    /// The decoding mode.
    #[must_use]
    pub fn mode(&self) -> TokenMode {
        self.mode
    }

    /// Decode one raw line.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for lines that carry no detection.
    pub fn decode(&self, raw: &[u8]) -> std::result::Result<DetectionToken, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        match self.mode {
            TokenMode::Channel => {
                trace!(line = text, "pulse on channel {}", self.channel_token);
                Ok(self.channel_token.clone())
            }
            TokenMode::Tag => {
                if let Some(pattern) = &self.pattern {
                    if !pattern.is_match(text) {
                        return Err(DecodeError::PatternMismatch(text.to_string()));
                    }
                }
                DetectionToken::new(text).map_err(|_| DecodeError::Empty)
            }
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::tags()
    }
}
