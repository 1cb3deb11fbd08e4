//! Background sweep task.
//!
//! One tokio task per cache, ticking at a fixed interval. The task is
//! owned by a [`CacheSweeper`] handle: `stop()` (or dropping the handle)
//! signals shutdown over a watch channel and aborts the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::ExpiringCache;

/// Handle to a running sweep task.
#[derive(Debug)]
pub struct CacheSweeper {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    interval: Duration,
}

impl CacheSweeper {
    /// Spawn the sweep loop onto the current tokio runtime. The first
    /// sweep happens one full `interval` after start.
    ///
    /// `interval` must be non-zero; the task panics on a zero period.
    pub fn start<V>(cache: Arc<ExpiringCache<V>>, interval: Duration) -> Self
    where
        V: Clone + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweep_loop(cache, interval, shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "cache sweeper started");
        Self {
            handle: Some(handle),
            shutdown_tx,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the sweep loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            handle.abort();
            info!("cache sweeper stopped");
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sweep_loop<V: Clone>(
    cache: Arc<ExpiringCache<V>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cache.sweep();
            }
            _ = shutdown.changed() => {
                debug!("cache sweep loop shutting down");
                break;
            }
        }
    }
}
