//! Explicit handle around the recurring poll task.
//!
//! The task ticks every `period` with skip-on-miss semantics and awaits each
//! cycle before waiting for the next tick. Stopping cancels the task's token;
//! a cycle already in flight sees the cancellation and must not commit.

use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    period: Duration,
    running: Option<Running>,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Scheduler {
            period,
            running: None,
        }
    }

    /// Spawn the poll task. `cycle` is called once per tick with the task's
    /// cancellation token. Returns false if the task was already running.
    pub fn start<F, Fut>(&mut self, cycle: F) -> bool
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run(self.period, token.clone(), cycle));
        self.running = Some(Running { token, handle });
        info!("Poll scheduler started, period {:?}", self.period);
        true
    }

    /// Cancel the poll task without waiting for it.
    ///
    /// The join handle is returned so a caller that does not hold any lock
    /// the cycle needs can wait for the task to finish.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        let running = self.running.take()?;
        running.token.cancel();
        info!("Poll scheduler stopped");
        Some(running.handle)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled() && !r.handle.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
    }
}

async fn run<F, Fut>(period: Duration, token: CancellationToken, mut cycle: F)
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = ()>,
{
    // First cycle one period after start; the baseline was just captured
    let mut poll_timer = interval_at(Instant::now() + period, period);
    poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! { biased;
            _ = token.cancelled() => {
                debug!("Poll task cancelled");
                break;
            }
            _ = poll_timer.tick() => {
                cycle(token.clone()).await;
            }
        }
    }
}
