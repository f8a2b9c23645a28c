//! Periodic sweep scheduling.
//!
//! # Responsibility
//! - Run the notification and cleanup sweeps on independent cadences.
//! - Keep each job's thresholds with the job, not in the engine.
//!
//! # Invariants
//! - Each job owns one worker thread and a shared reference to the engine.
//! - A failing tick is logged and never stops its worker.
//! - The first tick fires one full interval after start.

use crate::notify::Notifier;
use crate::repo::lead_repo::LeadStore;
use crate::service::lifecycle::{LifecycleEngine, LifecycleResult};
use log::{error, info, warn};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One periodic sweep and the thresholds it evaluates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepJob {
    Notify {
        every: Duration,
        retention_threshold: Duration,
    },
    Cleanup {
        every: Duration,
        notified_retention: Duration,
        moved_retention: Duration,
    },
}

impl SweepJob {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "sweep_notify",
            Self::Cleanup { .. } => "sweep_cleanup",
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Notify { every, .. } | Self::Cleanup { every, .. } => *every,
        }
    }

    /// Runs the sweep once against `engine`.
    pub fn run<S: LeadStore, N: Notifier>(
        &self,
        engine: &LifecycleEngine<S, N>,
    ) -> LifecycleResult<usize> {
        match *self {
            Self::Notify {
                retention_threshold,
                ..
            } => engine.sweep_notify(retention_threshold),
            Self::Cleanup {
                notified_retention,
                moved_retention,
                ..
            } => engine.sweep_cleanup(notified_retention, moved_retention),
        }
    }
}

/// Starts periodic workers for sweep jobs.
pub struct Scheduler;

impl Scheduler {
    /// Spawns one worker thread per job.
    ///
    /// # Errors
    /// Returns the spawn error if a worker thread cannot be created; workers
    /// started before the failure are stopped.
    pub fn start<S, N>(
        engine: Arc<LifecycleEngine<S, N>>,
        jobs: impl IntoIterator<Item = SweepJob>,
    ) -> std::io::Result<SchedulerHandle>
    where
        S: LeadStore + 'static,
        N: Notifier + 'static,
    {
        let mut handle = SchedulerHandle {
            workers: Vec::new(),
        };

        for job in jobs {
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let engine = Arc::clone(&engine);
            let spawned = std::thread::Builder::new()
                .name(format!("leadwatch-{}", job.name()))
                .spawn(move || loop {
                    match stop_rx.recv_timeout(job.interval()) {
                        Err(RecvTimeoutError::Timeout) => run_tick(&job, &engine),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                });

            match spawned {
                Ok(thread) => {
                    info!(
                        "event=scheduler_job_start module=scheduler status=ok job={} interval_secs={}",
                        job.name(),
                        job.interval().as_secs()
                    );
                    handle.workers.push(Worker {
                        name: job.name(),
                        stop: stop_tx,
                        thread,
                    });
                }
                Err(err) => {
                    error!(
                        "event=scheduler_job_start module=scheduler status=error job={} error={}",
                        job.name(),
                        err
                    );
                    handle.shutdown();
                    return Err(err);
                }
            }
        }

        Ok(handle)
    }
}

fn run_tick<S: LeadStore, N: Notifier>(job: &SweepJob, engine: &LifecycleEngine<S, N>) {
    match job.run(engine) {
        Ok(count) => info!(
            "event=scheduler_tick module=scheduler status=ok job={} count={}",
            job.name(),
            count
        ),
        Err(err) => error!(
            "event=scheduler_tick module=scheduler status=error job={} error_code={} error={}",
            job.name(),
            err.code(),
            err
        ),
    }
}

struct Worker {
    name: &'static str,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Running scheduler. Dropping the handle stops the workers after any
/// in-flight tick but does not join them.
pub struct SchedulerHandle {
    workers: Vec<Worker>,
}

impl SchedulerHandle {
    pub fn job_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker to stop and waits for in-flight ticks to finish.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            // A send error means the worker already exited.
            let _ = worker.stop.send(());
        }
        self.join();
    }

    /// Blocks until every worker exits.
    pub fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                warn!(
                    "event=scheduler_job_stop module=scheduler status=panicked job={}",
                    worker.name
                );
            } else {
                info!(
                    "event=scheduler_job_stop module=scheduler status=ok job={}",
                    worker.name
                );
            }
        }
    }
}
