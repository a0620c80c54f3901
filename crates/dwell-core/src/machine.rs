//! The activity-tracking state machine.
//!
//! [`TrackingMachine`] is plain data plus transitions: it owns the single
//! open-entry slot and decides, for each signal, which entry closes and which
//! opens. It performs no I/O. The [`crate::Tracker`] service feeds it one
//! signal at a time and carries out the persistence and notifications for
//! whatever it closes.
//!
//! # Invariants
//!
//! - At most one entry is open. Every path that opens an entry goes through
//!   [`TrackingMachine::begin`], which closes the current one first.
//! - Closed entries never overlap: a new entry never starts before the end of
//!   the last closed one, and an entry never closes before its provisional
//!   end. Late or skewed signal timestamps are clamped rather than trusted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::match_project;
use crate::types::{Rule, TimeEntry, WindowInfo};

/// Coarse tracker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Not consuming signals.
    #[default]
    Stopped,
    /// Running, user known to be idle; no entry is open.
    Idle,
    /// Running, user known to be active; an entry may be open.
    Active,
}

/// Why an entry was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    WindowChanged,
    IdleStarted,
    TimedOut,
    Stopped,
}

/// An entry that has left the open slot and must be persisted exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedEntry {
    pub entry: TimeEntry,
    pub reason: CloseReason,
}

/// Result of a window change.
#[derive(Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The machine is stopped.
    Ignored,
    /// The user is idle; the window was only remembered.
    Suppressed,
    /// Same window as the open entry; only its end time moved.
    Extended,
    /// A new entry is open. The previous one, if any, is returned.
    Opened { closed: Option<ClosedEntry> },
}

/// Result of an idle state change.
#[derive(Debug, PartialEq, Eq)]
pub enum IdleOutcome {
    /// Redundant signal or stopped machine.
    Unchanged,
    WentIdle { closed: Option<ClosedEntry> },
    /// Back to active. No entry has been opened.
    Resumed,
}

#[derive(Debug, Default)]
pub struct TrackingMachine {
    state: TrackingState,
    open: Option<TimeEntry>,
    last_window: Option<WindowInfo>,
    boundary: Option<DateTime<Utc>>,
}

impl TrackingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> TrackingState {
        self.state
    }

    pub const fn open_entry(&self) -> Option<&TimeEntry> {
        self.open.as_ref()
    }

    /// The most recent window seen, including ones suppressed while idle.
    pub const fn last_window(&self) -> Option<&WindowInfo> {
        self.last_window.as_ref()
    }

    /// Enters the running state. Returns false if already running.
    pub fn start(&mut self) -> bool {
        if self.state != TrackingState::Stopped {
            return false;
        }
        self.state = TrackingState::Active;
        true
    }

    /// Closes any open entry at `now` and stops.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<ClosedEntry> {
        if self.state == TrackingState::Stopped {
            return None;
        }
        let closed = self.close(now, CloseReason::Stopped);
        self.state = TrackingState::Stopped;
        closed
    }

    /// Returns true if a window change would open a new entry.
    ///
    /// Callers use this to avoid loading rules for signals that will be
    /// suppressed or merged.
    pub fn accepts_window(&self, window: &WindowInfo) -> bool {
        self.state == TrackingState::Active
            && !self.open.as_ref().is_some_and(|entry| entry.is_window(window))
    }

    pub fn window_changed(
        &mut self,
        window: WindowInfo,
        now: DateTime<Utc>,
        rules: &[Rule],
    ) -> WindowOutcome {
        match self.state {
            TrackingState::Stopped => WindowOutcome::Ignored,
            TrackingState::Idle => {
                self.last_window = Some(window);
                WindowOutcome::Suppressed
            }
            TrackingState::Active => {
                if let Some(open) = self.open.as_mut() {
                    if open.is_window(&window) {
                        extend(open, now);
                        return WindowOutcome::Extended;
                    }
                }
                let closed = self.begin(window, now, rules, CloseReason::WindowChanged);
                WindowOutcome::Opened { closed }
            }
        }
    }

    pub fn idle_changed(&mut self, is_idle: bool, now: DateTime<Utc>) -> IdleOutcome {
        match (self.state, is_idle) {
            (TrackingState::Active, true) => {
                let closed = self.close(now, CloseReason::IdleStarted);
                self.state = TrackingState::Idle;
                IdleOutcome::WentIdle { closed }
            }
            (TrackingState::Idle, false) => {
                self.state = TrackingState::Active;
                IdleOutcome::Resumed
            }
            _ => IdleOutcome::Unchanged,
        }
    }

    /// Opens an entry for `window` if the machine is active with nothing open.
    ///
    /// Used for probe-driven re-entry after idle or a forced timeout. Returns
    /// whether an entry was opened.
    pub fn resume(&mut self, window: WindowInfo, now: DateTime<Utc>, rules: &[Rule]) -> bool {
        if self.state != TrackingState::Active || self.open.is_some() {
            return false;
        }
        let replaced = self.begin(window, now, rules, CloseReason::WindowChanged);
        debug_assert!(replaced.is_none());
        true
    }

    /// Returns true if the open entry has outlived `threshold`.
    ///
    /// Always false unless active with an open entry.
    pub fn is_overdue(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.state == TrackingState::Active
            && self
                .open
                .as_ref()
                .is_some_and(|entry| now - entry.start_time > threshold)
    }

    /// Force-closes an overdue entry. The machine stays active with nothing
    /// open; the caller decides what replaces it.
    pub fn force_timeout(&mut self, now: DateTime<Utc>, threshold: Duration) -> Option<ClosedEntry> {
        if !self.is_overdue(now, threshold) {
            return None;
        }
        self.close(now, CloseReason::TimedOut)
    }

    /// Moves the provisional end of the open entry forward.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if let Some(open) = self.open.as_mut() {
            extend(open, now);
        }
    }

    fn begin(
        &mut self,
        window: WindowInfo,
        now: DateTime<Utc>,
        rules: &[Rule],
        reason: CloseReason,
    ) -> Option<ClosedEntry> {
        let closed = self.close(now, reason);
        let start = self.boundary.map_or(now, |boundary| boundary.max(now));
        let mut entry = TimeEntry::open(window.clone(), start);
        entry.project_id = match_project(&entry.window_title, &entry.application_name, rules);
        self.last_window = Some(window);
        self.open = Some(entry);
        closed
    }

    fn close(&mut self, now: DateTime<Utc>, reason: CloseReason) -> Option<ClosedEntry> {
        let mut entry = self.open.take()?;
        extend(&mut entry, now);
        self.boundary = Some(entry.end_time);
        Some(ClosedEntry { entry, reason })
    }
}

fn extend(entry: &mut TimeEntry, now: DateTime<Utc>) {
    if now > entry.end_time {
        entry.end_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use crate::types::ProjectId;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, minute, 0).unwrap()
    }

    fn window(title: &str, app: &str) -> WindowInfo {
        WindowInfo::new(title, app)
    }

    fn running() -> TrackingMachine {
        let mut machine = TrackingMachine::new();
        assert!(machine.start());
        machine
    }

    fn closed_entry(outcome: WindowOutcome) -> TimeEntry {
        match outcome {
            WindowOutcome::Opened {
                closed: Some(closed),
            } => closed.entry,
            other => panic!("expected a closed entry, got {other:?}"),
        }
    }

    #[test]
    fn starts_stopped_and_start_is_idempotent() {
        let mut machine = TrackingMachine::new();
        assert_eq!(machine.state(), TrackingState::Stopped);
        assert!(machine.start());
        assert!(!machine.start());
        assert_eq!(machine.state(), TrackingState::Active);
        assert!(machine.open_entry().is_none());
    }

    #[test]
    fn first_window_opens_lazily_without_closing() {
        let mut machine = running();
        let outcome = machine.window_changed(window("A", "a"), at(0), &[]);
        assert_eq!(outcome, WindowOutcome::Opened { closed: None });
        let open = machine.open_entry().unwrap();
        assert_eq!(open.start_time, at(0));
        assert_eq!(open.end_time, at(0));
    }

    #[test]
    fn window_switch_closes_then_opens_at_same_instant() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        let closed = closed_entry(machine.window_changed(window("B", "b"), at(5), &[]));
        assert_eq!(closed.window_title, "A");
        assert_eq!(closed.end_time, at(5));
        assert_eq!(machine.open_entry().unwrap().start_time, at(5));
    }

    #[test]
    fn repeated_window_is_merged() {
        let mut machine = running();
        machine.window_changed(window("X", "x"), at(0), &[]);
        assert_eq!(
            machine.window_changed(window("X", "x"), at(0), &[]),
            WindowOutcome::Extended
        );
        assert_eq!(
            machine.window_changed(window("X", "x"), at(2), &[]),
            WindowOutcome::Extended
        );
        let open = machine.open_entry().unwrap();
        assert_eq!(open.start_time, at(0));
        assert_eq!(open.end_time, at(2));
    }

    #[test]
    fn same_title_different_app_is_a_new_entry() {
        let mut machine = running();
        machine.window_changed(window("README.md", "code"), at(0), &[]);
        let closed = closed_entry(machine.window_changed(window("README.md", "vim"), at(1), &[]));
        assert_eq!(closed.application_name, "code");
    }

    #[test]
    fn rules_assign_project_on_open() {
        let project = ProjectId::new(9).unwrap();
        let rules = vec![Rule::new("vscode", project).unwrap()];
        let mut machine = running();
        machine.window_changed(window("main.rs", "vscode.exe"), at(0), &rules);
        assert_eq!(machine.open_entry().unwrap().project_id, Some(project));
    }

    #[test]
    fn idle_closes_and_suppresses_windows() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        let outcome = machine.idle_changed(true, at(10));
        let IdleOutcome::WentIdle {
            closed: Some(closed),
        } = outcome
        else {
            panic!("expected idle to close the entry");
        };
        assert_eq!(closed.entry.end_time, at(10));
        assert_eq!(closed.reason, CloseReason::IdleStarted);
        assert_eq!(machine.state(), TrackingState::Idle);

        assert_eq!(
            machine.window_changed(window("B", "b"), at(11), &[]),
            WindowOutcome::Suppressed
        );
        assert!(machine.open_entry().is_none());
        assert_eq!(machine.last_window(), Some(&window("B", "b")));
    }

    #[test]
    fn idle_end_does_not_open_an_entry() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        machine.idle_changed(true, at(1));
        assert_eq!(machine.idle_changed(false, at(20)), IdleOutcome::Resumed);
        assert_eq!(machine.state(), TrackingState::Active);
        assert!(machine.open_entry().is_none());

        let outcome = machine.window_changed(window("A", "a"), at(21), &[]);
        assert_eq!(outcome, WindowOutcome::Opened { closed: None });
        assert_eq!(machine.open_entry().unwrap().start_time, at(21));
    }

    #[test]
    fn redundant_idle_signals_are_unchanged() {
        let mut machine = running();
        assert_eq!(machine.idle_changed(false, at(0)), IdleOutcome::Unchanged);
        machine.idle_changed(true, at(1));
        assert_eq!(machine.idle_changed(true, at(2)), IdleOutcome::Unchanged);

        let mut stopped = TrackingMachine::new();
        assert_eq!(stopped.idle_changed(true, at(0)), IdleOutcome::Unchanged);
    }

    #[test]
    fn stopped_machine_ignores_windows() {
        let mut machine = TrackingMachine::new();
        assert_eq!(
            machine.window_changed(window("A", "a"), at(0), &[]),
            WindowOutcome::Ignored
        );
        assert!(machine.open_entry().is_none());
    }

    #[test]
    fn stop_flushes_open_entry_and_is_safe_twice() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        let closed = machine.stop(at(3)).unwrap();
        assert_eq!(closed.reason, CloseReason::Stopped);
        assert_eq!(closed.entry.end_time, at(3));
        assert_eq!(machine.state(), TrackingState::Stopped);
        assert!(machine.stop(at(4)).is_none());
    }

    #[test]
    fn restart_begins_disjoint_entry() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        let first = machine.stop(at(5)).unwrap().entry;
        machine.start();
        // A skewed timestamp from before the stop must not overlap.
        machine.window_changed(window("A", "a"), at(4), &[]);
        let second = machine.open_entry().unwrap();
        assert!(second.start_time >= first.end_time);
    }

    #[test]
    fn out_of_order_timestamps_never_invert_or_overlap() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(10), &[]);
        let closed = closed_entry(machine.window_changed(window("B", "b"), at(8), &[]));
        assert_eq!(closed.start_time, at(10));
        assert_eq!(closed.end_time, at(10));
        let open = machine.open_entry().unwrap();
        assert_eq!(open.start_time, at(10));
    }

    #[test]
    fn overdue_only_while_active_with_entry() {
        let threshold = Duration::minutes(30);
        let mut machine = running();
        assert!(!machine.is_overdue(at(59), threshold));
        machine.window_changed(window("A", "a"), at(0), &[]);
        assert!(!machine.is_overdue(at(30), threshold));
        assert!(machine.is_overdue(at(31), threshold));
        machine.idle_changed(true, at(31));
        assert!(!machine.is_overdue(at(59), threshold));
    }

    #[test]
    fn force_timeout_closes_and_resume_reopens() {
        let threshold = Duration::minutes(30);
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        assert!(machine.force_timeout(at(20), threshold).is_none());

        let closed = machine.force_timeout(at(31), threshold).unwrap();
        assert_eq!(closed.reason, CloseReason::TimedOut);
        assert_eq!(closed.entry.end_time, at(31));
        assert_eq!(machine.state(), TrackingState::Active);
        assert!(machine.open_entry().is_none());

        assert!(machine.resume(closed.entry.window(), at(31), &[]));
        assert_eq!(machine.open_entry().unwrap().start_time, at(31));
        assert!(!machine.resume(window("B", "b"), at(32), &[]));
    }

    #[test]
    fn resume_is_refused_while_idle() {
        let mut machine = running();
        machine.idle_changed(true, at(0));
        assert!(!machine.resume(window("A", "a"), at(1), &[]));
        assert!(machine.open_entry().is_none());
    }

    #[test]
    fn tick_extends_provisional_end() {
        let mut machine = running();
        machine.window_changed(window("A", "a"), at(0), &[]);
        machine.tick(at(7));
        assert_eq!(machine.open_entry().unwrap().end_time, at(7));
        machine.tick(at(6));
        assert_eq!(machine.open_entry().unwrap().end_time, at(7));
    }
}
