//! Refresh orchestration: scheduled and manual re-discovery
//!
//! One background task drives the scheduled cadence. Manual triggers go
//! through the same single-flight gate, so at most one discovery attempt is
//! ever in flight. Backoff happens inside an attempt; the schedule itself
//! never backs off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use alertroute_common::{
    classify, redact, Error, RefreshConfig, RefreshState, RefreshStatus, Result,
};

use crate::engine::{DiscoveryEngine, DiscoveryOutcome};

const COMPONENT: &str = "refresh orchestrator";

/// Drives periodic and on-demand discovery with retry and rate limiting.
pub struct RefreshOrchestrator {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

struct Shared {
    config: RefreshConfig,
    engine: Arc<DiscoveryEngine>,
    status: Mutex<StatusInner>,
    running: AtomicBool,
    // receiver prototype cloned into manual attempts while running
    shutdown_rx: Mutex<Option<watch::Receiver<bool>>>,
}

struct StatusInner {
    status: RefreshStatus,
    in_progress: bool,
    last_manual_trigger: Option<Instant>,
}

impl RefreshOrchestrator {
    pub fn new(engine: Arc<DiscoveryEngine>, config: RefreshConfig) -> Result<RefreshOrchestrator> {
        config.validate()?;
        Ok(RefreshOrchestrator {
            shared: Arc::new(Shared {
                config,
                engine,
                status: Mutex::new(StatusInner {
                    status: RefreshStatus::default(),
                    in_progress: false,
                    last_manual_trigger: None,
                }),
                running: AtomicBool::new(false),
                shutdown_rx: Mutex::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Spawn the background refresh loop. Fails if already started.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.started {
            return Err(Error::AlreadyStarted(COMPONENT));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shared.shutdown_rx.lock() = Some(shutdown_rx.clone());
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_loop(shared, shutdown_rx));

        lifecycle.started = true;
        lifecycle.handle = Some(handle);
        lifecycle.shutdown_tx = Some(shutdown_tx);
        info!(
            interval_ms = self.shared.config.interval_ms,
            warmup_ms = self.shared.config.warmup_period_ms,
            "refresh orchestrator started"
        );
        Ok(())
    }

    /// Signal shutdown and wait up to `timeout` for the loop to exit.
    ///
    /// The orchestrator is marked stopped even when the grace period
    /// elapses; in that case the task is aborted and `ShutdownTimeout`
    /// returned.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let (handle, shutdown_tx) = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.started {
                return Err(Error::NotStarted(COMPONENT));
            }
            lifecycle.started = false;
            (lifecycle.handle.take(), lifecycle.shutdown_tx.take())
        };

        self.shared.running.store(false, Ordering::SeqCst);
        *self.shared.shutdown_rx.lock() = None;
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }

        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => {
                    info!("refresh orchestrator stopped");
                    Ok(())
                }
                Err(_) => {
                    warn!(?timeout, "refresh loop did not exit in time, aborting");
                    abort.abort();
                    Err(Error::ShutdownTimeout {
                        component: COMPONENT,
                        timeout,
                    })
                }
            }
        } else {
            Ok(())
        }
    }

    /// Trigger an asynchronous refresh attempt right now.
    ///
    /// Guarded in order by running state, the manual rate limit, and the
    /// single-flight gate; rejections are instantaneous.
    pub fn refresh_now(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(Error::NotStarted(COMPONENT));
        }

        let guard = {
            let mut inner = self.shared.status.lock();
            if let Some(last) = inner.last_manual_trigger {
                let window = self.shared.config.rate_limit_window();
                let elapsed = last.elapsed();
                if elapsed < window {
                    return Err(Error::RateLimited {
                        retry_after: window - elapsed,
                    });
                }
            }
            if inner.in_progress {
                return Err(Error::RefreshInProgress);
            }
            inner.in_progress = true;
            inner.status.state = RefreshState::InProgress;
            inner.last_manual_trigger = Some(Instant::now());
            InFlightGuard::claimed(Arc::clone(&self.shared))
        };

        let shutdown_rx = self.shared.shutdown_rx.lock().clone();
        let shared = Arc::clone(&self.shared);
        info!("manual refresh accepted");
        tokio::spawn(async move {
            run_attempt(shared, guard, shutdown_rx).await;
        });
        Ok(())
    }

    /// Snapshot of the current refresh status.
    pub fn status(&self) -> RefreshStatus {
        self.shared.status.lock().status.clone()
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.shared.engine
    }
}

/// Clears the single-flight bit on every exit path, including panics.
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl InFlightGuard {
    fn claimed(shared: Arc<Shared>) -> InFlightGuard {
        gauge!("refresh_in_progress").set(1.0);
        InFlightGuard { shared }
    }

    /// Claim the single-flight gate, or observe that an attempt is running.
    fn try_claim(shared: &Arc<Shared>) -> Option<InFlightGuard> {
        let mut inner = shared.status.lock();
        if inner.in_progress {
            return None;
        }
        inner.in_progress = true;
        inner.status.state = RefreshState::InProgress;
        drop(inner);
        Some(InFlightGuard::claimed(Arc::clone(shared)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.status.lock().in_progress = false;
        gauge!("refresh_in_progress").set(0.0);
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    if !sleep_cancellable(shared.config.warmup_period(), &mut shutdown_rx).await {
        debug!("refresh loop cancelled during warmup");
        return;
    }

    scheduled_attempt(&shared, &shutdown_rx).await;

    let mut ticker = tokio::time::interval(shared.config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.reset();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scheduled_attempt(&shared, &shutdown_rx).await;
            }
            _ = shutdown_rx.changed() => {
                debug!("refresh loop shutting down");
                return;
            }
        }
    }
}

async fn scheduled_attempt(shared: &Arc<Shared>, shutdown_rx: &watch::Receiver<bool>) {
    match InFlightGuard::try_claim(shared) {
        Some(guard) => {
            run_attempt(Arc::clone(shared), guard, Some(shutdown_rx.clone())).await;
        }
        None => {
            debug!("refresh already in progress, skipping scheduled tick");
        }
    }
}

async fn run_attempt(
    shared: Arc<Shared>,
    guard: InFlightGuard,
    shutdown_rx: Option<watch::Receiver<bool>>,
) {
    let started = Instant::now();
    let result = refresh_with_retry(&shared, shutdown_rx).await;
    let duration = started.elapsed();

    let outcome_label = if result.is_ok() { "success" } else { "failed" };
    counter!("refresh_total", "status" => outcome_label).increment(1);
    histogram!("refresh_duration_seconds", "status" => outcome_label).record(duration.as_secs_f64());

    let now = Utc::now();
    let next = now
        + chrono::Duration::from_std(shared.config.interval())
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

    let mut inner = shared.status.lock();
    inner.status.last_duration_ms = Some(duration.as_millis() as u64);
    inner.status.next_scheduled_at = Some(next);
    match result {
        Ok(outcome) => {
            inner.status.state = RefreshState::Success;
            inner.status.last_success_at = Some(now);
            inner.status.targets_total = outcome.total;
            inner.status.targets_valid = outcome.valid;
            inner.status.targets_invalid = outcome.invalid;
            inner.status.last_error_message = None;
            inner.status.consecutive_failures = 0;
            gauge!("refresh_last_success_timestamp").set(now.timestamp() as f64);
            info!(
                total = outcome.total,
                valid = outcome.valid,
                invalid = outcome.invalid,
                ?duration,
                "refresh succeeded"
            );
        }
        Err(err) => {
            inner.status.state = RefreshState::Failed;
            inner.status.consecutive_failures += 1;
            inner.status.last_error_message = Some(redact::sanitize(&err.to_string()));
            warn!(
                error = %err,
                consecutive_failures = inner.status.consecutive_failures,
                ?duration,
                "refresh failed"
            );
        }
    }
    drop(inner);
    drop(guard);
}

/// The per-refresh attempt loop of bounded retries with exponential backoff.
async fn refresh_with_retry(
    shared: &Arc<Shared>,
    mut shutdown_rx: Option<watch::Receiver<bool>>,
) -> Result<DiscoveryOutcome> {
    let op_started = Instant::now();
    let config = &shared.config;
    let mut backoff = config.base_backoff();

    for attempt in 1..=config.max_attempts {
        let err = match tokio::time::timeout(config.attempt_timeout(), shared.engine.discover())
            .await
        {
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(err)) => err,
            Err(_) => Error::Timeout(format!(
                "discovery attempt {attempt} exceeded {:?}",
                config.attempt_timeout()
            )),
        };

        let classification = classify(&err);
        counter!("refresh_errors_total", "error_type" => classification.kind.as_str()).increment(1);

        if !classification.transient {
            warn!(
                attempt,
                kind = classification.kind.as_str(),
                error = %err,
                "permanent discovery failure, not retrying"
            );
            return Err(Error::RetryExhausted {
                op: "refresh",
                attempts: attempt,
                elapsed: op_started.elapsed(),
                kind: classification.kind,
                message: err.to_string(),
            });
        }

        if attempt == config.max_attempts {
            return Err(Error::RetryExhausted {
                op: "refresh",
                attempts: attempt,
                elapsed: op_started.elapsed(),
                kind: classification.kind,
                message: err.to_string(),
            });
        }

        debug!(
            attempt,
            ?backoff,
            kind = classification.kind.as_str(),
            "transient discovery failure, backing off"
        );

        let slept = match shutdown_rx.as_mut() {
            Some(rx) => sleep_cancellable(backoff, rx).await,
            None => {
                tokio::time::sleep(backoff).await;
                true
            }
        };
        if !slept {
            return Err(Error::Cancelled(format!(
                "refresh cancelled during backoff after attempt {attempt}: {err}"
            )));
        }

        backoff = (backoff * 2).min(config.max_backoff());
    }

    unreachable!("attempt loop returns before exhausting the range")
}

/// Sleep that loses a race against the shutdown signal.
///
/// Returns `false` when cancelled before the full duration elapsed. A bare
/// sleep on any warmup or backoff path would stall shutdown.
async fn sleep_cancellable(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown_rx.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TargetRegistry;
    use crate::store::MemoryStore;
    use alertroute_common::DiscoveryConfig;

    fn test_config() -> RefreshConfig {
        RefreshConfig {
            interval_ms: 60_000,
            max_attempts: 3,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
            rate_limit_window_ms: 60_000,
            attempt_timeout_ms: 1_000,
            warmup_period_ms: 1,
        }
    }

    fn orchestrator() -> RefreshOrchestrator {
        let engine = DiscoveryEngine::new(
            MemoryStore::new(),
            TargetRegistry::new(),
            DiscoveryConfig {
                namespace: "monitoring".to_string(),
                label_query: String::new(),
            },
        );
        RefreshOrchestrator::new(engine, test_config()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let engine = DiscoveryEngine::new(
            MemoryStore::new(),
            TargetRegistry::new(),
            DiscoveryConfig::default(),
        );
        let mut config = test_config();
        config.max_backoff_ms = 1;
        assert!(matches!(
            RefreshOrchestrator::new(engine, config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let orchestrator = orchestrator();
        orchestrator.start().unwrap();
        assert!(matches!(
            orchestrator.start(),
            Err(Error::AlreadyStarted(_))
        ));
        orchestrator.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.stop(Duration::from_secs(1)).await,
            Err(Error::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn refresh_now_requires_running() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.refresh_now(),
            Err(Error::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let orchestrator = orchestrator();
        let status = orchestrator.status();
        assert_eq!(status.state, RefreshState::Idle);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_success_at.is_none());
    }

    #[tokio::test]
    async fn restart_after_stop_is_allowed() {
        let orchestrator = orchestrator();
        orchestrator.start().unwrap();
        orchestrator.stop(Duration::from_secs(1)).await.unwrap();
        orchestrator.start().unwrap();
        orchestrator.stop(Duration::from_secs(1)).await.unwrap();
    }
}
