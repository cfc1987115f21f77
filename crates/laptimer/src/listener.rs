//! Background signal listener.
//!
//! A [`SignalListener`] owns one worker thread per active source. The worker
//! polls the source until it runs dry, decodes each line into a
//! [`Detection`], appends it to a FIFO buffer, then sleeps for one poll
//! interval. The consumer takes everything buffered with [`SignalListener::drain`].
//!
//! The worker survives bad lines, transient read failures and panics inside a
//! single poll. It exits when told to stop or when the source reports that the
//! device is gone; the latter is surfaced once through
//! [`SignalListener::take_disconnect`].

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::ListenerConfig;
use crate::detection::Detection;
use crate::error::{Error, Result};
use crate::source::{LineDecoder, OpenSource, SignalSource, SourceError};

/// Name given to the worker thread.
const WORKER_THREAD_NAME: &str = "laptimer-listener";

/// Tuning for a [`SignalListener`].
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Sleep between polling rounds.
    pub poll_interval: Duration,
    /// Longest `stop` waits for the worker to exit.
    pub stop_timeout: Duration,
    /// Turns raw lines into tokens.
    pub decoder: LineDecoder,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            decoder: LineDecoder::default(),
        }
    }
}

impl ListenerOptions {
    /// Build options from listener configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoder settings are invalid.
    pub fn from_config(config: &ListenerConfig) -> Result<Self> {
        Ok(Self {
            poll_interval: config.poll_interval(),
            stop_timeout: config.stop_timeout(),
            decoder: LineDecoder::from_config(config)?,
        })
    }
}

/// Snapshot of a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    /// Whether the worker is polling.
    pub is_running: bool,
    /// Address of the most recently started source.
    pub address: Option<String>,
    /// Detections waiting to be drained.
    pub buffered: usize,
    /// Detections decoded since the listener was created.
    pub detection_count: u64,
    /// Why the last run ended, if the device went away.
    pub disconnect: Option<String>,
}

#[derive(Debug, Default)]
struct Disconnect {
    reason: Option<String>,
    reported: bool,
}

#[derive(Debug, Default)]
struct Shared {
    buffer: Mutex<VecDeque<Detection>>,
    running: AtomicBool,
    stop: AtomicBool,
    detection_count: AtomicU64,
    address: Mutex<Option<String>>,
    disconnect: Mutex<Disconnect>,
}

/// Shared state replaced when a run is prepared.
#[derive(Debug)]
struct PriorRun {
    address: Option<String>,
    disconnect: Disconnect,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Worker {
    handle: JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

/// Polls a signal source on a background thread and buffers detections.
#[derive(Debug)]
pub struct SignalListener {
    options: ListenerOptions,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl Default for SignalListener {
    fn default() -> Self {
        Self::new(ListenerOptions::default())
    }
}

impl SignalListener {
    /// Create a stopped listener.
    #[must_use]
    pub fn new(options: ListenerOptions) -> Self {
        Self {
            options,
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    /// The options this listener was created with.
    #[must_use]
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Open `source` and start polling it.
    ///
    /// Starting a listener that is already running does nothing and returns
    /// the current status. A worker left over from a lost connection is
    /// reaped first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the source cannot be opened; the
    /// listener is left stopped. Returns [`Error::Timeout`] if a previous
    /// worker is still winding down.
    pub fn start(&mut self, source: &dyn OpenSource) -> Result<ListenerStatus> {
        if self.is_running() {
            debug!("Listener already running");
            return Ok(self.status());
        }
        self.stop()?;

        let address = source.address();
        let opened = source.open().map_err(|e| {
            warn!(address = %address, error = %e, "Failed to open signal source");
            e
        })?;

        let prior = self.prepare_run(&address);

        let shared = Arc::clone(&self.shared);
        let decoder = self.options.decoder.clone();
        let poll_interval = self.options.poll_interval;
        let (done_tx, done_rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut source = opened;
                run_worker(&shared, source.as_mut(), &decoder, poll_interval);
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { handle, done_rx });
                info!(address = %address, poll_ms = poll_interval.as_millis(), "Listener started");
                Ok(self.status())
            }
            Err(e) => {
                self.rollback_run(prior);
                Err(Error::internal(format!("failed to spawn listener thread: {e}")))
            }
        }
    }

    /// Reset shared state for a new run, returning what it replaced.
    fn prepare_run(&self, address: &str) -> PriorRun {
        self.shared.stop.store(false, Ordering::SeqCst);
        let prior = PriorRun {
            address: lock(&self.shared.address).replace(address.to_string()),
            disconnect: std::mem::take(&mut *lock(&self.shared.disconnect)),
        };
        self.shared.running.store(true, Ordering::SeqCst);
        prior
    }

    /// Undo [`prepare_run`](Self::prepare_run) for a run that never started.
    fn rollback_run(&self, prior: PriorRun) {
        self.shared.running.store(false, Ordering::SeqCst);
        *lock(&self.shared.address) = prior.address;
        *lock(&self.shared.disconnect) = prior.disconnect;
    }

    /// Stop the worker and wait for it to release the source.
    ///
    /// Safe to call when the listener is not running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the worker does not exit within the stop
    /// timeout. The stop request stays in effect and a later `stop` can
    /// collect the worker.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.shared.stop.store(true, Ordering::SeqCst);
        worker.handle.thread().unpark();

        match worker.done_rx.recv_timeout(self.options.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Listener worker panicked while shutting down");
                }
                self.shared.running.store(false, Ordering::SeqCst);
                info!("Listener stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.options.stop_timeout.as_millis(),
                    "Listener worker did not stop in time"
                );
                self.worker = Some(worker);
                Err(Error::timeout("stopping listener"))
            }
        }
    }

    /// Remove and return every buffered detection, oldest first.
    pub fn drain(&self) -> Vec<Detection> {
        lock(&self.shared.buffer).drain(..).collect()
    }

    /// Whether the worker is polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether a worker thread exists and has not finished.
    #[must_use]
    pub fn worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        ListenerStatus {
            is_running: self.is_running(),
            address: lock(&self.shared.address).clone(),
            buffered: lock(&self.shared.buffer).len(),
            detection_count: self.shared.detection_count.load(Ordering::SeqCst),
            disconnect: lock(&self.shared.disconnect).reason.clone(),
        }
    }

    /// Report a mid-session disconnect, once.
    ///
    /// Returns [`Error::ConnectionLost`] the first time it is called after the
    /// worker lost its device, and `None` otherwise.
    pub fn take_disconnect(&self) -> Option<Error> {
        let mut disconnect = lock(&self.shared.disconnect);
        if disconnect.reported {
            return None;
        }
        let reason = disconnect.reason.clone()?;
        disconnect.reported = true;
        drop(disconnect);

        let address = lock(&self.shared.address)
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        Some(Error::connection_lost(address, reason))
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Listener dropped while still running");
        }
    }
}

fn run_worker(
    shared: &Shared,
    source: &mut dyn SignalSource,
    decoder: &LineDecoder,
    poll_interval: Duration,
) {
    debug!(address = source.address(), "Listener worker running");

    while !shared.stop.load(Ordering::SeqCst) {
        let round = panic::catch_unwind(AssertUnwindSafe(|| poll_round(shared, source, decoder)));
        match round {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                warn!(address = source.address(), reason = %reason, "Signal source disconnected");
                lock(&shared.disconnect).reason = Some(reason);
                break;
            }
            Err(payload) => {
                error!(
                    address = source.address(),
                    panic = %panic_message(payload.as_ref()),
                    "Listener poll panicked; continuing"
                );
            }
        }

        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        thread::park_timeout(poll_interval);
    }

    source.close();
    shared.running.store(false, Ordering::SeqCst);
    debug!("Listener worker exited");
}

/// Poll until the source has nothing more to give.
///
/// Returns the disconnect reason if the device went away.
fn poll_round(
    shared: &Shared,
    source: &mut dyn SignalSource,
    decoder: &LineDecoder,
) -> std::result::Result<(), String> {
    while !shared.stop.load(Ordering::SeqCst) {
        match source.poll_event() {
            Ok(Some(raw)) => match decoder.decode(&raw) {
                Ok(token) => {
                    trace!(token = %token, "Detection");
                    lock(&shared.buffer).push_back(Detection::now(token));
                    shared.detection_count.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => debug!(error = %e, "Skipping undecodable line"),
            },
            Ok(None) => return Ok(()),
            Err(SourceError::Read(message)) => {
                warn!(address = source.address(), error = %message, "Read failed");
                return Ok(());
            }
            Err(SourceError::Disconnected(reason)) => return Err(reason),
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
