//! Restart-on-failure supervision for background tasks.
//!
//! Each background loop (abuse decay, audit flushing, the two fan-out
//! pipelines, snapshots, optional sweeps) runs under a [`Supervisor`]. The task
//! body is spawned on its own tokio task so a panic is caught at the join
//! boundary instead of unwinding through the process; failed bodies are
//! restarted after a short backoff.
//!
//! # Tiger Style
//!
//! - Fixed backoff table, indexed by restarts inside a bounded window
//! - Supervision never gives up while the process runs
//! - Shutdown through a [`CancellationToken`]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Time window for counting restarts (10 minutes).
const RESTART_WINDOW: Duration = Duration::from_secs(600);

/// Backoff durations, indexed by restarts inside the window.
const BACKOFF_DURATIONS: [Duration; 3] = [Duration::from_millis(100), Duration::from_secs(1), Duration::from_secs(5)];

/// Supervisor for one named background task.
pub struct Supervisor {
    /// Name of the supervised task (for logging).
    name: String,

    /// Total restarts since creation.
    restart_count: AtomicU32,

    /// Timestamps of recent restarts.
    restart_times: Mutex<Vec<Instant>>,

    /// Cancellation token for graceful shutdown.
    cancel: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor that stops when `cancel` fires.
    pub fn new(name: impl Into<String>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            restart_count: AtomicU32::new(0),
            restart_times: Mutex::new(Vec::new()),
            cancel,
        })
    }

    /// Run a task with supervision.
    ///
    /// The factory is called for every (re)start. A body that returns `Ok(())`
    /// ends supervision; an `Err` or a panic is logged and the body restarted
    /// after a backoff.
    pub async fn supervise<F, Fut>(self: Arc<Self>, mut task_factory: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        while !self.cancel.is_cancelled() {
            info!(name = %self.name, "starting supervised task");

            let mut handle = tokio::spawn(task_factory());
            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = self.cancel.cancelled() => {
                    // Bodies observe the same token; give them a chance to flush.
                    match tokio::time::timeout(Duration::from_secs(5), &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(name = %self.name, "task did not stop in time, aborting");
                            handle.abort();
                            break;
                        }
                    }
                }
            };

            let failure = match joined {
                Ok(Ok(())) => {
                    info!(name = %self.name, "task completed");
                    break;
                }
                Ok(Err(err)) => err,
                Err(join_err) if join_err.is_panic() => {
                    let message = panic_message(join_err.into_panic());
                    error!(name = %self.name, panic = %message, "task panicked");
                    message
                }
                Err(join_err) => join_err.to_string(),
            };

            if self.cancel.is_cancelled() {
                break;
            }
            warn!(name = %self.name, error = %failure, "task failed");

            let backoff = self.record_restart().await;
            warn!(name = %self.name, backoff_ms = backoff.as_millis() as u64, "waiting before restart");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        info!(name = %self.name, "supervision ended");
    }

    /// Record a restart and return the backoff to apply.
    async fn record_restart(&self) -> Duration {
        let mut times = self.restart_times.lock().await;
        let now = Instant::now();
        times.retain(|&t| now.duration_since(t) < RESTART_WINDOW);
        let backoff = backoff_for(times.len());
        times.push(now);

        let count = self.restart_count.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(name = %self.name, restart_count = count, recent = times.len(), "recording restart attempt");
        backoff
    }

    /// Get the number of restarts.
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Acquire)
    }

    /// Stop the supervised task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Spawn `task_factory` under a new supervisor.
pub fn spawn_supervised<F, Fut>(
    name: impl Into<String>,
    cancel: CancellationToken,
    task_factory: F,
) -> (Arc<Supervisor>, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    let supervisor = Supervisor::new(name, cancel);
    let handle = tokio::spawn(Arc::clone(&supervisor).supervise(task_factory));
    (supervisor, handle)
}

/// Backoff for the `recent`-th restart inside the window.
fn backoff_for(recent: usize) -> Duration {
    BACKOFF_DURATIONS[recent.min(BACKOFF_DURATIONS.len() - 1)]
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
