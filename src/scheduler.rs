//! Independently clocked periodic tasks.
//!
//! Each task owns one timer. On every tick the job is dispatched as its own
//! tokio task and tracked until it finishes, so the timer keeps its cadence
//! however long a single firing takes. Firings of the same task may overlap.
//!
//! Shutdown is cooperative: once the [`ShutdownSignal`] is triggered no new
//! tick is dispatched, and [`Scheduler::join`] waits for in-flight firings.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Process-wide stop flag shared by every loop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            info!("shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener { rx: self.tx.subscribe() }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown is triggered. Cancel-safe.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Every signal handle is gone; nobody is left to keep us running.
                return;
            }
        }
    }
}

/// Live counters for one periodic task.
#[derive(Debug, Default)]
pub struct TaskStats {
    fired: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskStatsSnapshot {
    pub fired: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
}

impl TaskStats {
    pub fn snapshot(&self) -> TaskStatsSnapshot {
        TaskStatsSnapshot {
            fired: self.fired.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    fn record_fire(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn record_done(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct PeriodicTask {
    name: &'static str,
    cadence: Duration,
    stats: Arc<TaskStats>,
    handle: JoinHandle<()>,
}

/// Owner of all periodic tasks of the process.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: ShutdownSignal,
    tasks: Vec<PeriodicTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_shutdown(ShutdownSignal::new())
    }

    pub fn with_shutdown(shutdown: ShutdownSignal) -> Self {
        Self { shutdown, tasks: Vec::new() }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Start a loop that runs `job` every `cadence`, first tick immediately.
    ///
    /// Must be called from within a tokio runtime. A job error is logged and
    /// counted; it never stops the loop.
    pub fn every<F, Fut, E>(
        &mut self,
        name: &'static str,
        cadence: Duration,
        job: F,
    ) -> Result<Arc<TaskStats>, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if cadence.is_zero() {
            return Err(ConfigError::ZeroInterval { name });
        }

        let stats = Arc::new(TaskStats::default());
        let handle = tokio::spawn(run_periodic(
            name,
            cadence,
            Arc::new(job),
            Arc::clone(&stats),
            self.shutdown.subscribe(),
        ));

        debug!(task = name, "scheduled every {:?}", cadence);
        self.tasks.push(PeriodicTask {
            name,
            cadence,
            stats: Arc::clone(&stats),
            handle,
        });

        Ok(stats)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.iter().map(|t| t.name)
    }

    pub fn cadence(&self, name: &str) -> Option<Duration> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.cadence)
    }

    pub fn stats(&self, name: &str) -> Option<TaskStatsSnapshot> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.stats.snapshot())
    }

    /// Stop scheduling new ticks on every loop.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for every loop to stop and drain its in-flight firings.
    ///
    /// Returns the final counters per task. Only returns after shutdown has
    /// been triggered (or every signal handle dropped).
    pub async fn join(self) -> Vec<(&'static str, TaskStatsSnapshot)> {
        let mut finished = Vec::with_capacity(self.tasks.len());

        for task in self.tasks {
            if let Err(e) = task.handle.await {
                error!(task = task.name, "periodic task ended abnormally: {}", e);
            }
            let stats = task.stats.snapshot();
            debug!(
                task = task.name,
                fired = stats.fired,
                completed = stats.completed,
                failed = stats.failed,
                "periodic task stopped"
            );
            finished.push((task.name, stats));
        }

        finished
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_periodic<F, Fut, E>(
    name: &'static str,
    cadence: Duration,
    job: Arc<F>,
    stats: Arc<TaskStats>,
    mut shutdown: ShutdownListener,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut ticker = time::interval(cadence);
    // After a stall fire once, not a burst of catch-up ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            () = shutdown.wait() => break,

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                reap(name, &stats, joined);
            }

            _ = ticker.tick() => {
                stats.record_fire();
                let job = Arc::clone(&job);
                let stats = Arc::clone(&stats);
                in_flight.spawn(async move {
                    match job().await {
                        Ok(()) => stats.record_done(true),
                        Err(e) => {
                            warn!(task = name, "{}", e);
                            stats.record_done(false);
                        }
                    }
                });
            }
        }
    }

    if !in_flight.is_empty() {
        debug!(task = name, pending = in_flight.len(), "waiting for in-flight firings");
    }
    while let Some(joined) = in_flight.join_next().await {
        reap(name, &stats, joined);
    }
}

fn reap(name: &'static str, stats: &TaskStats, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        // The firing never reached record_done
        error!(task = name, "firing aborted: {}", e);
        stats.record_done(false);
    }
}
