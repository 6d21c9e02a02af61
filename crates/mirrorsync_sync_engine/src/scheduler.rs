//! Scheduling of sync passes.

use crate::config::RetryConfig;
use crate::connectivity::RecoveryTarget;
use crate::engine::{PassOutcome, SyncEngine, SyncPassResult};
use crate::error::{SyncError, SyncResult};
use mirrorsync_protocol::RemoteApi;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Something that can run one sync pass.
pub trait PassRunner: Send + Sync + 'static {
    /// Runs one pass.
    fn run_pass(&self) -> SyncPassResult;

    /// Asks a running pass to stop.
    fn cancel(&self);

    /// Withdraws a stop request before a new pass is dispatched.
    fn clear_cancel(&self);
}

impl<R: RemoteApi + 'static> PassRunner for SyncEngine<R> {
    fn run_pass(&self) -> SyncPassResult {
        SyncEngine::run_pass(self)
    }

    fn cancel(&self) {
        SyncEngine::cancel(self);
    }

    fn clear_cancel(&self) {
        SyncEngine::clear_cancel(self);
    }
}

/// Decides when sync passes run.
pub trait Scheduler: Send + Sync {
    /// Runs a pass every `interval`, replacing any previous interval.
    fn schedule_periodic(&self, interval: Duration);

    /// Requests a pass as soon as possible.
    ///
    /// Requests arriving while a pass runs collapse into one follow-up.
    fn trigger_now(&self);

    /// Stops scheduling and asks a running pass to stop.
    fn cancel(&self);
}

struct Shared {
    runner: Arc<dyn PassRunner>,
    retry: RetryConfig,
    wake: Notify,
    periodic: watch::Sender<Option<Duration>>,
    shutdown: watch::Sender<bool>,
    passes: AtomicU64,
}

/// A [`Scheduler`] driving passes from a tokio task.
///
/// Passes run on the blocking pool. A failed pass schedules a retry with
/// the configured backoff; a successful one clears it. One pass is
/// requested at start.
pub struct TokioScheduler {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Starts a scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn start(runner: Arc<dyn PassRunner>, retry: RetryConfig) -> SyncResult<Self> {
        let handle = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (periodic, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            runner,
            retry,
            wake: Notify::new(),
            periodic,
            shutdown,
            passes: AtomicU64::new(0),
        });

        shared.wake.notify_one();
        let task = handle.spawn(run_loop(Arc::clone(&shared)));
        debug!("sync scheduler started");
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the number of passes run so far.
    pub fn passes_run(&self) -> u64 {
        self.shared.passes.load(Ordering::Acquire)
    }

    /// Returns true once the scheduler was cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    /// Cancels and waits for the scheduler task to exit.
    pub async fn shutdown(&self) {
        self.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "scheduler task ended abnormally");
            }
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_periodic(&self, interval: Duration) {
        self.shared.periodic.send_replace(Some(interval));
    }

    fn trigger_now(&self) {
        self.shared.wake.notify_one();
    }

    fn cancel(&self) {
        self.shared.shutdown.send_replace(true);
        self.shared.runner.cancel();
    }
}

impl RecoveryTarget for TokioScheduler {
    fn on_recovered(&self) {
        debug!("connectivity restored, requesting sync pass");
        self.trigger_now();
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut periodic_rx = shared.periodic.subscribe();
    let mut shutdown_rx = shared.shutdown.subscribe();
    let mut next_periodic: Option<Instant> = None;
    let mut retry_at: Option<Instant> = None;
    let mut failures: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let interval = *periodic_rx.borrow_and_update();
        if interval.is_none() {
            next_periodic = None;
        } else if next_periodic.is_none() {
            next_periodic = interval.map(|every| Instant::now() + every);
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            changed = periodic_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Re-arm with the new interval.
                next_periodic = None;
                continue;
            }
            () = shared.wake.notified() => {
                debug!("sync pass requested");
            }
            () = sleep_or_forever(next_periodic) => {
                debug!("periodic sync pass due");
                next_periodic = interval.map(|every| Instant::now() + every);
            }
            () = sleep_or_forever(retry_at) => {
                debug!(attempt = failures, "retrying failed sync pass");
            }
        }

        // Cleared before the shutdown check: `cancel` flags shutdown first,
        // so a cancel racing this dispatch is either seen here or reaches
        // the pass.
        shared.runner.clear_cancel();
        if *shutdown_rx.borrow() {
            break;
        }

        let runner = Arc::clone(&shared.runner);
        let result = match tokio::task::spawn_blocking(move || runner.run_pass()).await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "sync pass panicked");
                failures = failures.saturating_add(1);
                retry_at = Some(Instant::now() + shared.retry.delay_for_attempt(failures));
                continue;
            }
        };
        shared.passes.fetch_add(1, Ordering::AcqRel);

        match result.outcome {
            PassOutcome::Succeeded | PassOutcome::Skipped => {
                failures = 0;
                retry_at = None;
            }
            PassOutcome::Failed => {
                failures = failures.saturating_add(1);
                let delay = shared.retry.delay_for_attempt(failures);
                info!(attempt = failures, delay_ms = delay.as_millis() as u64, "sync pass failed, backing off");
                retry_at = Some(Instant::now() + delay);
            }
            PassOutcome::Coalesced | PassOutcome::Cancelled => {
                // A pending retry is already due; push it back or it fires again at once.
                if retry_at.is_some() {
                    retry_at = Some(Instant::now() + shared.retry.delay_for_attempt(failures));
                }
            }
        }
    }
    debug!("sync scheduler stopped");
}

async fn sleep_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
