// Background scheduler — periodic tokio task driving a background job

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::runner::{BackgroundJob, BackgroundRunOutcome};

/// Runs a job every `interval`, first run one interval after scheduling.
///
/// Must be driven from inside a tokio runtime. Dropping the scheduler
/// cancels the task.
pub struct BackgroundScheduler {
    job: Arc<dyn BackgroundJob>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundScheduler {
    pub fn new(job: Arc<dyn BackgroundJob>, interval: Duration) -> Self {
        Self {
            job,
            interval: interval.max(Duration::from_millis(1)),
            handle: Mutex::new(None),
        }
    }

    /// Start the periodic task unless one is already running.
    /// Returns true when a new task was started.
    pub fn schedule(&self) -> bool {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        *handle = Some(self.spawn());
        true
    }

    /// Replace any running task with a fresh one; the interval restarts now.
    pub fn force_reschedule(&self) {
        let mut handle = self.handle.lock();
        if let Some(old) = handle.take() {
            old.abort();
        }
        *handle = Some(self.spawn());
    }

    /// Returns true when a running task was stopped.
    pub fn cancel(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn spawn(&self) -> JoinHandle<()> {
        let job = self.job.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match job.run_once().await {
                    Ok(BackgroundRunOutcome::Disabled) => debug!("Background run skipped"),
                    Ok(outcome) => debug!("Background run finished: {:?}", outcome),
                    Err(e) => warn!("Background run failed: {}", e),
                }
            }
        })
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
