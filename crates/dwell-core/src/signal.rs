//! Activity signals and the sources that produce them.
//!
//! A [`SignalSource`] owns all platform-specific detection. It is handed a
//! [`SignalSink`] when the tracker starts and posts [`Signal`]s into it from
//! whatever execution context it likes; the sink feeds the tracker's single
//! consumer loop, so delivery order is the order in which sends complete.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::tracker::Command;
use crate::types::WindowInfo;

/// A raw observation from the platform, stamped when it was observed.
///
/// `at` is expected to be live. Entries take their boundaries from signal
/// times, but the idle timeout check and `stop` close the open entry at the
/// tracker's clock, so a replayed signal from the past leaves its entry open
/// until that clock's present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SignalKind,
}

/// The kind of observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    /// The foreground window changed. Repeats of the same window are allowed.
    WindowChanged {
        #[serde(default)]
        window_title: String,
        #[serde(default)]
        application_name: String,
    },
    /// The user became idle or returned from idle.
    IdleStateChanged { is_idle: bool },
}

impl Signal {
    pub fn window_changed(
        window_title: impl Into<String>,
        application_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            at,
            kind: SignalKind::WindowChanged {
                window_title: window_title.into(),
                application_name: application_name.into(),
            },
        }
    }

    pub const fn idle_state_changed(is_idle: bool, at: DateTime<Utc>) -> Self {
        Self {
            at,
            kind: SignalKind::IdleStateChanged { is_idle },
        }
    }

    /// Returns the window carried by a `WindowChanged` signal.
    pub fn window(&self) -> Option<WindowInfo> {
        match &self.kind {
            SignalKind::WindowChanged {
                window_title,
                application_name,
            } => Some(WindowInfo::new(window_title.clone(), application_name.clone())),
            SignalKind::IdleStateChanged { .. } => None,
        }
    }
}

/// Errors raised when a signal source cannot begin emitting.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The platform hook could not be installed.
    #[error("signal source unavailable: {reason}")]
    Unavailable { reason: String },
    /// The source is already bound to a running tracker.
    #[error("signal source already started")]
    AlreadyStarted,
    #[error("signal source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write half of the tracker's signal queue.
///
/// Cheap to clone. All sends fail once the tracker has stopped.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tx: mpsc::Sender<Command>,
}

impl SignalSink {
    pub(crate) const fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Queues a signal, waiting for capacity. Returns false if the tracker
    /// is gone.
    pub async fn send(&self, signal: Signal) -> bool {
        self.tx.send(Command::Signal(signal)).await.is_ok()
    }

    /// Queues a signal from a plain OS thread, blocking for capacity.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_send(&self, signal: Signal) -> bool {
        self.tx.blocking_send(Command::Signal(signal)).is_ok()
    }

    /// Queues a signal without waiting. A full queue drops the signal.
    pub fn try_send(&self, signal: Signal) -> bool {
        match self.tx.try_send(Command::Signal(signal)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("signal queue full; dropping signal");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Producer of window and idle signals.
///
/// `start` must either begin delivering into the sink or fail; a tracker never
/// runs without its source. `stop` must be safe to call repeatedly.
pub trait SignalSource: Send {
    fn start(&mut self, sink: SignalSink) -> Result<(), SourceError>;

    fn stop(&mut self);
}

/// A source driven by hand, for embedding hosts that already receive
/// platform callbacks and for tests.
///
/// Clones share the same binding, so one clone can be given to the tracker
/// while another is used to emit.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    sink: Option<SignalSink>,
    fail_with: Option<String>,
    starts: usize,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `start` always fails with the given reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        let source = Self::default();
        source.lock().fail_with = Some(reason.into());
        source
    }

    /// Emits a signal. Returns false when no tracker is listening.
    pub async fn emit(&self, signal: Signal) -> bool {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => sink.send(signal).await,
            None => false,
        }
    }

    pub async fn window_changed(
        &self,
        window_title: &str,
        application_name: &str,
        at: DateTime<Utc>,
    ) -> bool {
        self.emit(Signal::window_changed(window_title, application_name, at))
            .await
    }

    pub async fn idle_state_changed(&self, is_idle: bool, at: DateTime<Utc>) -> bool {
        self.emit(Signal::idle_state_changed(is_idle, at)).await
    }

    pub fn is_started(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// The sink of the current binding, for producers on plain OS threads
    /// that need [`SignalSink::blocking_send`].
    pub fn sink(&self) -> Option<SignalSink> {
        self.lock().sink.clone()
    }

    /// Number of successful `start` calls so far.
    pub fn start_count(&self) -> usize {
        self.lock().starts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignalSource for ManualSource {
    fn start(&mut self, sink: SignalSink) -> Result<(), SourceError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_with {
            return Err(SourceError::Unavailable {
                reason: reason.clone(),
            });
        }
        if state.sink.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        state.sink = Some(sink);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.lock().sink = None;
    }
}
