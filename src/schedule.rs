use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::trace;

/// Rearmable one-shot deadline for use inside `select!` loops.
///
/// Arming replaces any pending deadline. `fired` resolves once at the deadline and
/// disarms the task; while disarmed it never resolves. Dropping the `fired` future (as
/// `select!` does when another branch wins) leaves the deadline in place.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    deadline: Option<Instant>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            deadline: None,
        }
    }

    pub fn arm(&mut self, after: Duration) {
        trace!(task = self.name, ?after, "armed");
        self.deadline = Some(Instant::now() + after);
    }

    pub fn disarm(&mut self) {
        if self.deadline.take().is_some() {
            trace!(task = self.name, "disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
                trace!(task = self.name, "fired");
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_then_stays_quiet() {
        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_secs(5));
        let start = Instant::now();
        task.fired().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!task.is_armed());

        let quiet = tokio::time::timeout(Duration::from_secs(60), task.fired()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_deadline() {
        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_secs(5));
        task.arm(Duration::from_secs(20));
        let start = Instant::now();
        task.fired().await;
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels() {
        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_secs(1));
        task.disarm();
        assert!(task.deadline().is_none());
        let quiet = tokio::time::timeout(Duration::from_secs(10), task.fired()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_keeps_deadline() {
        let mut task = ScheduledTask::new("test");
        task.arm(Duration::from_secs(10));
        let early = tokio::time::timeout(Duration::from_secs(1), task.fired()).await;
        assert!(early.is_err());
        assert!(task.is_armed());
        task.fired().await;
        assert!(!task.is_armed());
    }
}
