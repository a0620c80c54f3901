//! Periodic safety net against missed idle signals.
//!
//! The guard itself only ticks: each tick posts a check request into the
//! tracker's queue, and the tracker decides there, serialized with every other
//! signal, whether the open entry is overdue. A guard therefore can never act
//! while the machine is idle or stopped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::tracker::Command;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running guard task.
#[derive(Debug)]
pub(crate) struct IdleTimeoutGuard {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl IdleTimeoutGuard {
    /// Spawns the ticking task. The first check happens one interval from now.
    pub(crate) fn spawn(interval: Duration, tx: mpsc::Sender<Command>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(interval.max(MIN_INTERVAL), tx, cancel.clone()));
        Self { cancel, task }
    }

    /// Stops ticking and waits for the task to finish.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "idle timeout guard ended abnormally");
        }
    }

    /// Stops ticking without waiting.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

async fn run(interval: Duration, tx: mpsc::Sender<Command>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    tracing::debug!(?interval, "idle timeout guard started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if tx.send(Command::GuardTick).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("idle timeout guard stopped");
}
