//! Delayed task delivery.

use monopoly_core::{Resolution, ResumeToken, StepToken};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Work for the engine. Delivery is at-least-once, so handlers re-check
/// every token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Run the next phase of a game
    Step(StepToken),
    /// Apply an answered decision
    Resume {
        token: ResumeToken,
        resolution: Resolution,
    },
    /// Periodic housekeeping: watchdog, then start a game if none is running
    Tick,
}

#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Task>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver `task` now
    pub fn send(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("Task dropped, engine has shut down");
        }
    }

    /// Deliver `task` after `delay`
    pub fn schedule(&self, delay: Duration, task: Task) {
        if delay.is_zero() {
            self.send(task);
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.send(task);
        });
    }

    /// Fire `Task::Tick` every `every`, starting immediately
    pub async fn recurring(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if self.tx.is_closed() {
                break;
            }
            self.send(Task::Tick);
        }
    }
}
