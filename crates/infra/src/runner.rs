use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::driver::Driver;

/// Config for the cadence runner.
#[derive(Debug, Clone)]
pub struct CycleRunner {
    pub cadence: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for CycleRunner {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(10 * 60),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

/// Handle for the running cycle loop (shutdown + trigger hook).
#[derive(Debug)]
pub struct CycleRunnerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<()>,
    completed: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl CycleRunnerHandle {
    /// Request a cycle now.
    ///
    /// Triggers are coalesced (capacity 1): while one is pending, further
    /// calls are no-ops.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Cycles finished so far (successful or not).
    pub fn cycles_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Stop after the current cycle and wait for the task.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl CycleRunner {
    pub fn from_cadence(cadence: Duration) -> Self {
        Self {
            cadence,
            ..Self::default()
        }
    }

    /// Spawn the loop on the current tokio runtime.
    ///
    /// - Schedule: runs once on startup, then every `cadence`
    /// - Trigger: `handle.trigger()` runs a cycle as soon as the current one ends
    /// - Failures: logged + retried with bounded exponential backoff; never propagate
    pub fn spawn(&self, driver: Arc<Driver>) -> CycleRunnerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        let completed = Arc::new(AtomicU64::new(0));

        let join = tokio::spawn(runner_loop(
            self.clone(),
            driver,
            shutdown_rx,
            trigger_rx,
            completed.clone(),
        ));

        CycleRunnerHandle {
            shutdown: Some(shutdown_tx),
            trigger: trigger_tx,
            completed,
            join: Some(join),
        }
    }
}

async fn runner_loop(
    cfg: CycleRunner,
    driver: Arc<Driver>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut trigger_rx: mpsc::Receiver<()>,
    completed: Arc<AtomicU64>,
) {
    info!(cadence_secs = cfg.cadence.as_secs(), "cycle runner started");

    let mut ticker = time::interval(cfg.cadence.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        // Shutdown has priority.
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {}
            Some(()) = trigger_rx.recv() => {}
        }

        loop {
            let result = driver.run_cycle(Utc::now()).await;
            completed.fetch_add(1, Ordering::Relaxed);
            match result {
                Ok(_) => {
                    failures = 0;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind().as_str(), attempt = failures + 1, "reconciliation cycle failed");
                    failures += 1;
                    if failures > cfg.max_retries {
                        failures = 0;
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => {
                            info!("cycle runner stopped");
                            return;
                        }
                        _ = time::sleep(backoff(cfg.base_backoff, failures)) => {}
                    }
                }
            }
        }
    }

    info!("cycle runner stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
