//! The tracking service: a single task that owns the state machine.
//!
//! Every input (source signals, guard ticks, stop requests, inspections)
//! arrives as a [`Command`] on one bounded queue. The loop handles one command
//! to completion, including the persistence of any entry it closed, before
//! taking the next. That ordering is the serialization guarantee: no two
//! handlers ever observe the open entry at the same time.
//!
//! Categorization is the one step that leaves the loop. Entries without a
//! project are persisted and announced first; advisor calls run on their own
//! tasks and report back through [`TrackerEvent::EntryUpdated`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dwell_core::{Catalog, EntryStore, ManualSource, Tracker, TrackerConfig, TrackerDeps};
//!
//! # async fn example(store: Arc<dyn EntryStore>, catalog: Arc<dyn Catalog>) -> Result<(), dwell_core::TrackerError> {
//! let source = ManualSource::new();
//! let deps = TrackerDeps::new(Box::new(source.clone()), store, catalog);
//! let mut tracker = Tracker::new(deps, TrackerConfig::default());
//! let mut events = tracker.subscribe();
//!
//! tracker.start()?;
//! source.window_changed("main.rs", "code", chrono::Utc::now()).await;
//! tracker.stop().await?;
//! # let _ = events.try_recv();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::advisor::{AdvisorError, CategorizationAdvisor, resolve_suggestion};
use crate::clock::{Clock, NoProbe, SystemClock, WindowProbe};
use crate::config::{ResumePolicy, TrackerConfig};
use crate::emitter::{EntryEmitter, TrackerEvent};
use crate::guard::IdleTimeoutGuard;
use crate::machine::{ClosedEntry, IdleOutcome, TrackingMachine, TrackingState, WindowOutcome};
use crate::signal::{Signal, SignalKind, SignalSink, SignalSource, SourceError};
use crate::store::{Catalog, EntryStore, StoreError};
use crate::types::{EntryId, Rule, TimeEntry, WindowInfo};

/// Errors surfaced by [`Tracker::start`] and [`Tracker::stop`].
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The signal source could not start; the tracker is still stopped.
    #[error("failed to start signal source: {0}")]
    Source(#[from] SourceError),
    /// The entry open at stop time was not persisted.
    #[error("failed to persist final entry: {0}")]
    FinalWrite(#[source] StoreError),
    /// The tracking loop panicked. Its open entry, if any, is lost.
    #[error("tracking loop terminated abnormally: {0}")]
    Loop(String),
}

/// Messages consumed by the tracking loop.
#[derive(Debug)]
pub(crate) enum Command {
    Signal(Signal),
    GuardTick,
    Inspect {
        reply: oneshot::Sender<TrackerSnapshot>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Point-in-time view of a running tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub state: TrackingState,
    pub open_entry: Option<TimeEntry>,
}

/// Collaborators handed to a tracker at construction.
pub struct TrackerDeps {
    pub source: Box<dyn SignalSource>,
    pub store: Arc<dyn EntryStore>,
    pub catalog: Arc<dyn Catalog>,
    pub advisor: Option<Arc<dyn CategorizationAdvisor>>,
    pub probe: Arc<dyn WindowProbe>,
    pub clock: Arc<dyn Clock>,
}

impl TrackerDeps {
    /// Dependencies with no advisor, no window probe and the system clock.
    pub fn new(
        source: Box<dyn SignalSource>,
        store: Arc<dyn EntryStore>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            source,
            store,
            catalog,
            advisor: None,
            probe: Arc::new(NoProbe),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn CategorizationAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn WindowProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Shared, immutable context of the tracking loop.
#[derive(Clone)]
struct Context {
    store: Arc<dyn EntryStore>,
    catalog: Arc<dyn Catalog>,
    advisor: Option<Arc<dyn CategorizationAdvisor>>,
    probe: Arc<dyn WindowProbe>,
    clock: Arc<dyn Clock>,
    emitter: EntryEmitter,
    config: Arc<TrackerConfig>,
}

struct Running {
    tx: mpsc::Sender<Command>,
    guard: IdleTimeoutGuard,
    task: JoinHandle<TrackingMachine>,
}

/// Activity tracker service.
///
/// Owns the signal source and, between runs, the state machine.
pub struct Tracker {
    source: Box<dyn SignalSource>,
    context: Context,
    machine: Option<TrackingMachine>,
    running: Option<Running>,
}

impl Tracker {
    pub fn new(deps: TrackerDeps, config: TrackerConfig) -> Self {
        let emitter = EntryEmitter::new(config.event_capacity);
        Self {
            source: deps.source,
            context: Context {
                store: deps.store,
                catalog: deps.catalog,
                advisor: deps.advisor,
                probe: deps.probe,
                clock: deps.clock,
                emitter,
                config: Arc::new(config),
            },
            machine: Some(TrackingMachine::new()),
            running: None,
        }
    }

    /// Subscribes to entry and state notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TrackerEvent> {
        self.context.emitter.subscribe()
    }

    /// Returns a handle that can publish into this tracker's subscribers.
    pub fn emitter(&self) -> EntryEmitter {
        self.context.emitter.clone()
    }

    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts consuming signals. Calling it while running is a no-op.
    ///
    /// Must be called from within a Tokio runtime. If the source fails to
    /// start, nothing is spawned and the tracker remains stopped.
    pub fn start(&mut self) -> Result<(), TrackerError> {
        if self.running.is_some() {
            debug!("tracker already running");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(self.context.config.signal_capacity.max(1));
        self.source.start(SignalSink::new(tx.clone()))?;

        let mut machine = self.machine.take().unwrap_or_default();
        machine.start();
        let guard = IdleTimeoutGuard::spawn(self.context.config.guard_interval, tx.clone());
        let task = tokio::spawn(
            Loop {
                machine,
                rx,
                context: self.context.clone(),
            }
            .run(),
        );

        self.running = Some(Running { tx, guard, task });
        self.context.emitter.emit(TrackerEvent::StateChanged {
            state: TrackingState::Active,
        });
        info!("tracking started");
        Ok(())
    }

    /// Stops tracking.
    ///
    /// Any open entry is closed now and persisted before this returns. Safe to
    /// call when nothing is open and when already stopped.
    pub async fn stop(&mut self) -> Result<(), TrackerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        self.source.stop();
        running.guard.shutdown().await;

        let (reply, done) = oneshot::channel();
        let flushed = if running.tx.send(Command::Stop { reply }).await.is_ok() {
            done.await.ok()
        } else {
            None
        };
        drop(running.tx);

        match running.task.await {
            Ok(machine) => self.machine = Some(machine),
            Err(err) => {
                error!(error = %err, "tracking loop failed");
                return Err(TrackerError::Loop(err.to_string()));
            }
        }
        info!("tracking stopped");

        match flushed {
            Some(Err(err)) => Err(TrackerError::FinalWrite(err)),
            _ => Ok(()),
        }
    }

    /// Returns the current state and open entry, or `None` when stopped.
    pub async fn snapshot(&self) -> Option<TrackerSnapshot> {
        let tx = self.running.as_ref()?.tx.clone();
        let (reply, rx) = oneshot::channel();
        tx.send(Command::Inspect { reply }).await.ok()?;
        rx.await.ok()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            // The loop flushes its open entry once every sender is gone.
            warn!("tracker dropped while running");
            self.source.stop();
            running.guard.cancel();
        }
    }
}

struct Loop {
    machine: TrackingMachine,
    rx: mpsc::Receiver<Command>,
    context: Context,
}

impl Loop {
    async fn run(mut self) -> TrackingMachine {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Signal(signal) => self.on_signal(signal).await,
                Command::GuardTick => self.on_guard_tick().await,
                Command::Inspect { reply } => {
                    let _ = reply.send(TrackerSnapshot {
                        state: self.machine.state(),
                        open_entry: self.machine.open_entry().cloned(),
                    });
                }
                Command::Stop { reply } => {
                    let result = self.on_stop().await;
                    let _ = reply.send(result);
                    return self.machine;
                }
            }
        }

        // Every sender is gone without an explicit stop.
        if let Err(err) = self.on_stop().await {
            error!(error = %err, "failed to persist final entry");
        }
        self.machine
    }

    async fn on_signal(&mut self, signal: Signal) {
        let at = signal.at;
        match signal.kind {
            SignalKind::WindowChanged {
                window_title,
                application_name,
            } => {
                let window = WindowInfo::new(window_title, application_name);
                self.on_window_changed(window, at).await;
            }
            SignalKind::IdleStateChanged { is_idle } => self.on_idle_changed(is_idle, at).await,
        }
    }

    async fn on_window_changed(&mut self, window: WindowInfo, at: DateTime<Utc>) {
        let rules = if self.machine.accepts_window(&window) {
            self.load_rules().await
        } else {
            Vec::new()
        };

        match self.machine.window_changed(window, at, &rules) {
            WindowOutcome::Opened { closed } => {
                if let Some(closed) = closed {
                    let _ = self.record(closed).await;
                }
                if let Some(open) = self.machine.open_entry() {
                    debug!(
                        window_title = %open.window_title,
                        application = %open.application_name,
                        project_id = ?open.project_id,
                        "entry opened"
                    );
                }
            }
            WindowOutcome::Suppressed => debug!("window change while idle suppressed"),
            WindowOutcome::Extended => debug!("repeated window change merged"),
            WindowOutcome::Ignored => {}
        }
    }

    async fn on_idle_changed(&mut self, is_idle: bool, at: DateTime<Utc>) {
        match self.machine.idle_changed(is_idle, at) {
            IdleOutcome::WentIdle { closed } => {
                if let Some(closed) = closed {
                    let _ = self.record(closed).await;
                }
                info!("user idle");
                self.context.emitter.emit(TrackerEvent::StateChanged {
                    state: TrackingState::Idle,
                });
            }
            IdleOutcome::Resumed => {
                info!("user active");
                self.context.emitter.emit(TrackerEvent::StateChanged {
                    state: TrackingState::Active,
                });
                self.resume_after_idle(at).await;
            }
            IdleOutcome::Unchanged => debug!(is_idle, "redundant idle signal"),
        }
    }

    async fn resume_after_idle(&mut self, at: DateTime<Utc>) {
        let window = match self.context.config.resume_policy {
            ResumePolicy::AwaitWindow => None,
            ResumePolicy::Probe => self.probe_window().await,
            ResumePolicy::LastKnown => self.machine.last_window().cloned(),
        };
        if let Some(window) = window {
            let rules = self.load_rules().await;
            if self.machine.resume(window, at, &rules) {
                debug!("entry reopened after idle");
            }
        }
    }

    async fn on_guard_tick(&mut self) {
        let now = self.context.clock.now();
        self.machine.tick(now);

        let Some(closed) = self.machine.force_timeout(now, self.context.config.threshold()) else {
            return;
        };
        warn!(
            window_title = %closed.entry.window_title,
            open_minutes = closed.entry.duration().num_minutes(),
            "entry exceeded timeout without an idle signal; closing"
        );
        let fallback = closed.entry.window();
        let _ = self.record(closed).await;

        let window = self.probe_window().await.unwrap_or(fallback);
        let rules = self.load_rules().await;
        self.machine.resume(window, now, &rules);
    }

    async fn on_stop(&mut self) -> Result<(), StoreError> {
        let now = self.context.clock.now();
        let result = match self.machine.stop(now) {
            Some(closed) => self.record(closed).await,
            None => Ok(()),
        };
        self.context.emitter.emit(TrackerEvent::StateChanged {
            state: TrackingState::Stopped,
        });
        result
    }

    /// Persists a closed entry and announces it.
    async fn record(&self, closed: ClosedEntry) -> Result<(), StoreError> {
        let ClosedEntry { mut entry, reason } = closed;
        match self.persist(&entry).await {
            Ok(id) => {
                entry.id = Some(id);
                info!(
                    entry_id = %id,
                    window_title = %entry.window_title,
                    application = %entry.application_name,
                    seconds = entry.duration().num_seconds(),
                    ?reason,
                    "entry recorded"
                );
                self.context.emitter.emit(TrackerEvent::EntryRecorded {
                    entry: entry.clone(),
                });
                if entry.project_id.is_none() {
                    self.request_categorization(id, entry);
                }
                Ok(())
            }
            Err(err) => {
                error!(
                    window_title = %entry.window_title,
                    error = %err,
                    "giving up on entry after retries"
                );
                self.context.emitter.emit(TrackerEvent::PersistFailed {
                    entry,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn persist(&self, entry: &TimeEntry) -> Result<EntryId, StoreError> {
        let config = &self.context.config;
        let attempts = config.persist_attempts.max(1);
        let mut attempt = 1;
        loop {
            let store = Arc::clone(&self.context.store);
            let pending = entry.clone();
            let result = tokio::task::spawn_blocking(move || store.add(&pending))
                .await
                .unwrap_or_else(|err| Err(StoreError::new(err)));
            match result {
                Ok(id) => return Ok(id),
                Err(err) if attempt < attempts => {
                    warn!(attempt, error = %err, "failed to persist entry; retrying");
                    tokio::time::sleep(config.persist_backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn load_rules(&self) -> Vec<Rule> {
        let catalog = Arc::clone(&self.context.catalog);
        let result = tokio::task::spawn_blocking(move || catalog.rules())
            .await
            .unwrap_or_else(|err| Err(StoreError::new(err)));
        result.unwrap_or_else(|err| {
            warn!(error = %err, "failed to load rules; entry left uncategorized");
            Vec::new()
        })
    }

    async fn probe_window(&self) -> Option<WindowInfo> {
        let probe = Arc::clone(&self.context.probe);
        tokio::task::spawn_blocking(move || probe.current_window())
            .await
            .ok()
            .flatten()
    }

    fn request_categorization(&self, entry_id: EntryId, entry: TimeEntry) {
        if !self.context.config.ai_categorization {
            return;
        }
        let Some(advisor) = self.context.advisor.clone() else {
            return;
        };
        let job = Categorize {
            advisor,
            context: self.context.clone(),
        };
        tokio::spawn(job.run(entry_id, entry));
    }
}

/// One off-loop advisor round trip.
struct Categorize {
    advisor: Arc<dyn CategorizationAdvisor>,
    context: Context,
}

impl Categorize {
    async fn run(self, entry_id: EntryId, entry: TimeEntry) {
        let catalog = Arc::clone(&self.context.catalog);
        let projects = match tokio::task::spawn_blocking(move || catalog.projects()).await {
            Ok(Ok(projects)) => projects,
            Ok(Err(err)) => {
                warn!(%entry_id, error = %err, "failed to load projects for categorization");
                return;
            }
            Err(err) => {
                warn!(%entry_id, error = %err, "project lookup task failed");
                return;
            }
        };
        if projects.is_empty() {
            return;
        }

        let names: Vec<String> = projects.iter().map(|project| project.name.clone()).collect();
        let timeout = self.context.config.advisor_timeout;
        let suggestion = match tokio::time::timeout(
            timeout,
            self.advisor
                .suggest_project(&entry.window_title, &entry.application_name, &names),
        )
        .await
        .unwrap_or(Err(AdvisorError::Timeout(timeout)))
        {
            Ok(Some(suggestion)) => suggestion,
            Ok(None) => {
                debug!(%entry_id, "advisor had no suggestion");
                return;
            }
            Err(err) => {
                warn!(%entry_id, error = %err, "categorization failed");
                return;
            }
        };

        let Some(project) = resolve_suggestion(&suggestion, &projects) else {
            debug!(%entry_id, %suggestion, "suggestion does not name a known project");
            return;
        };
        let project_id = project.id;

        let store = Arc::clone(&self.context.store);
        let updated = tokio::task::spawn_blocking(move || {
            store.update_project_of_entry(entry_id, Some(project_id))
        })
        .await
        .unwrap_or_else(|err| Err(StoreError::new(err)));
        if let Err(err) = updated {
            warn!(%entry_id, error = %err, "failed to store suggested project");
            return;
        }

        info!(%entry_id, project = %project.name, "entry categorized by advisor");
        self.context.emitter.emit(TrackerEvent::EntryUpdated {
            entry_id,
            project_id: Some(project_id),
        });
    }
}
