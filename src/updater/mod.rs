// src/updater/mod.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The action a [`PollingServerListUpdater`] executes on every cycle;
/// in practice this is the balancer's fetch → filter → swap pipeline.
#[async_trait]
pub trait UpdateAction: Send + Sync {
    async fn do_update(&self) -> Result<(), crate::error::UpdateError>;
}

#[async_trait]
impl<F, Fut> UpdateAction for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), crate::error::UpdateError>> + Send,
{
    async fn do_update(&self) -> Result<(), crate::error::UpdateError> {
        (self)().await
    }
}

/// Periodic trigger for server list refreshes.
///
/// `start` and `stop` are idempotent; a failed cycle is logged and
/// counted, and the balancer keeps serving from the previous list.
pub struct PollingServerListUpdater {
    interval: Duration,
    shared: Arc<Shared>,
    task: Mutex<Option<Task>>,
}

#[derive(Debug)]
struct Shared {
    last_update: RwLock<Option<DateTime<Utc>>>,
    missed_cycles: AtomicU32,
}

struct Task {
    shutdown: tokio::sync::watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollingServerListUpdater {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            shared: Arc::new(Shared {
                last_update: RwLock::new(None),
                missed_cycles: AtomicU32::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the refresh loop. The first cycle runs immediately. Calling
    /// `start` while running is a no-op.
    pub fn start(&self, action: Arc<dyn UpdateAction>) {
        let mut slot = self.task.lock();
        if slot.is_some() {
            debug!("server list updater already started");
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(?interval, "server list updater started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match action.do_update().await {
                            Ok(()) => {
                                *shared.last_update.write() = Some(Utc::now());
                            }
                            Err(err) => {
                                shared.missed_cycles.fetch_add(1, Ordering::Relaxed);
                                warn!(%err, "server list update failed, keeping previous list");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("server list updater shutting down");
                            break;
                        }
                    }
                }
            }
        });
        *slot = Some(Task {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the refresh loop. Calling `stop` when not running is a no-op.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Wall-clock time of the last successful cycle.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_update.read()
    }

    pub fn duration_since_last_update(&self) -> Option<chrono::Duration> {
        self.last_update().map(|at| Utc::now() - at)
    }

    /// Cycles whose update action failed since start.
    pub fn missed_cycles(&self) -> u32 {
        self.shared.missed_cycles.load(Ordering::Relaxed)
    }
}

impl Drop for PollingServerListUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}
