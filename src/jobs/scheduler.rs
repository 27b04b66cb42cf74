use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Runs registered jobs on their own timers. The first tick fires
/// immediately; a run that overruns its interval skips the missed ticks
/// instead of bursting to catch up.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    jobs: Vec<Job>,
}

struct Job {
    name: String,
    // Keeps the cancel channel open after the caller drops its handle.
    _cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

/// Cancels one job. The run in progress, if any, is allowed to finish.
#[derive(Clone)]
pub struct JobHandle {
    name: String,
    cancel: Arc<watch::Sender<bool>>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { shutdown, jobs: Vec::new() }
    }

    pub fn register<F>(&mut self, name: &str, every: Duration, task: F) -> JobHandle
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);
        let shutdown_rx = self.shutdown.subscribe();

        let job_name = name.to_string();
        let handle = tokio::spawn(run_job(job_name.clone(), every, task, cancel_rx, shutdown_rx));
        info!(job = name, every_secs = every.as_secs_f64(), "job registered");

        self.jobs.push(Job {
            name: job_name.clone(),
            _cancel: Arc::clone(&cancel),
            task: handle,
        });
        JobHandle { name: job_name, cancel }
    }

    /// Cancel every job and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for job in self.jobs {
            if let Err(e) = job.task.await {
                tracing::error!(job = %job.name, "job task panicked: {e}");
            }
        }
        info!("scheduler stopped");
    }
}

async fn run_job<F>(
    name: String,
    every: Duration,
    task: F,
    mut cancel: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // A dropped sender also ends the job.
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        task().await;
        if *cancel.borrow() || *shutdown.borrow() {
            break;
        }
    }
    debug!(job = %name, "job stopped");
}
