//! Tracker tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when the user returns from idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Wait for the next window change before opening an entry.
    #[default]
    AwaitWindow,
    /// Ask the window probe; wait if it has no answer.
    Probe,
    /// Reuse the last window seen, even one observed while idle.
    LastKnown,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Period of the safety-net check.
    pub guard_interval: Duration,
    /// An entry open longer than this is force-closed.
    pub timeout_threshold: Duration,
    pub resume_policy: ResumePolicy,
    /// Ask the advisor about entries no rule matched.
    pub ai_categorization: bool,
    /// Upper bound on a single advisor call.
    pub advisor_timeout: Duration,
    /// Attempts per entry write, including the first.
    pub persist_attempts: u32,
    /// Delay before retry `n` is `n * persist_backoff`.
    pub persist_backoff: Duration,
    /// Queued signals before producers wait (or `try_send` drops).
    pub signal_capacity: usize,
    /// Events buffered per subscriber. A subscriber that falls further
    /// behind misses the oldest events and sees `RecvError::Lagged`; storage
    /// is unaffected because entries are written before they are broadcast.
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            guard_interval: Duration::from_secs(60),
            timeout_threshold: Duration::from_secs(30 * 60),
            resume_policy: ResumePolicy::default(),
            ai_categorization: false,
            advisor_timeout: Duration::from_secs(30),
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(200),
            signal_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl TrackerConfig {
    /// The timeout threshold as a signed duration for timestamp math.
    pub(crate) fn threshold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.timeout_threshold).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.guard_interval, Duration::from_secs(60));
        assert_eq!(config.threshold(), chrono::Duration::minutes(30));
        assert_eq!(config.resume_policy, ResumePolicy::AwaitWindow);
        assert!(!config.ai_categorization);
    }

    #[test]
    fn resume_policy_uses_snake_case() {
        let policy: ResumePolicy = serde_json::from_str("\"last_known\"").unwrap();
        assert_eq!(policy, ResumePolicy::LastKnown);
        assert_eq!(
            serde_json::to_string(&ResumePolicy::AwaitWindow).unwrap(),
            "\"await_window\""
        );
    }
}
