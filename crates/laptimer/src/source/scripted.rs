//! Scripted source for tests and dry runs.
//!
//! A [`ScriptedFeed`] is a shared queue of events. Opening it hands out a
//! [`ScriptedSource`] that pops one event per poll; the test keeps the feed
//! and can push more lines, read errors, disconnects or panics while the
//! listener is running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{OpenSource, SignalSource, SourceError};
use crate::error::{Error, Result};

/// One scripted poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedEvent {
    /// A raw line.
    Line(Vec<u8>),
    /// A transient read failure.
    ReadError(String),
    /// The device goes away.
    Disconnect(String),
    /// The source panics mid-read.
    Panic(String),
}

#[derive(Debug, Default)]
struct FeedState {
    events: VecDeque<ScriptedEvent>,
    fail_open: Option<String>,
    open: bool,
    reads: u64,
    opens: u64,
}

/// Handle used to script a [`ScriptedSource`].
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    address: String,
    state: Arc<Mutex<FeedState>>,
}

impl ScriptedFeed {
    /// Create an empty feed at `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Arc::new(Mutex::new(FeedState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a text line.
    pub fn push_line(&self, line: &str) {
        self.push_bytes(line.as_bytes());
    }

    /// Queue raw bytes as one line.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state()
            .events
            .push_back(ScriptedEvent::Line(bytes.to_vec()));
    }

    /// Queue an arbitrary event.
    pub fn push(&self, event: ScriptedEvent) {
        self.state().events.push_back(event);
    }

    /// Make the next `open` fail with `message`.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.state().fail_open = Some(message.into());
    }

    /// Number of polls made against this feed.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.state().reads
    }

    /// Number of successful opens.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.state().opens
    }

    /// Whether a source opened from this feed is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Events not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().events.len()
    }
}

impl OpenSource for ScriptedFeed {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn open(&self) -> Result<Box<dyn SignalSource>> {
        let mut state = self.state();
        if let Some(message) = state.fail_open.take() {
            return Err(Error::connection(&self.address, message));
        }
        state.open = true;
        state.opens += 1;
        drop(state);

        Ok(Box::new(ScriptedSource { feed: self.clone() }))
    }
}

/// The source side of a [`ScriptedFeed`].
#[derive(Debug)]
pub struct ScriptedSource {
    feed: ScriptedFeed,
}

impl SignalSource for ScriptedSource {
    fn address(&self) -> &str {
        &self.feed.address
    }

    fn poll_event(&mut self) -> std::result::Result<Option<Vec<u8>>, SourceError> {
        let event = {
            let mut state = self.feed.state();
            if !state.open {
                return Err(SourceError::Disconnected("closed".to_string()));
            }
            state.reads += 1;
            state.events.pop_front()
        };

        match event {
            None => Ok(None),
            Some(ScriptedEvent::Line(bytes)) => Ok(Some(bytes)),
            Some(ScriptedEvent::ReadError(message)) => Err(SourceError::Read(message)),
            Some(ScriptedEvent::Disconnect(message)) => Err(SourceError::Disconnected(message)),
            Some(ScriptedEvent::Panic(message)) => panic!("{message}"),
        }
    }

    fn close(&mut self) {
        self.feed.state().open = false;
    }
}
