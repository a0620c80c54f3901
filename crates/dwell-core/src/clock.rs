//! Time and foreground-window queries the tracker makes on its own.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::types::WindowInfo;

/// Source of "now" for stops and guard ticks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// On-demand query of the current foreground window.
///
/// Used after a forced timeout and, depending on policy, at idle end.
pub trait WindowProbe: Send + Sync {
    fn current_window(&self) -> Option<WindowInfo>;
}

/// A probe for platforms that cannot query the foreground window.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl WindowProbe for NoProbe {
    fn current_window(&self) -> Option<WindowInfo> {
        None
    }
}
