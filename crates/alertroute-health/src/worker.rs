//! Health worker: periodic and on-demand probing of every active target

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use alertroute_common::{
    CheckResult, CheckTrigger, Error, HealthConfig, HealthState, Result, TargetDescriptor,
    TargetHealthStatus,
};
use alertroute_discovery::TargetRegistry;

use crate::cache::HealthStatusCache;
use crate::prober::Probe;

const COMPONENT: &str = "health worker";

/// Drives probe sweeps over the registry and maintains the status cache.
pub struct HealthWorker {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

struct Shared {
    config: HealthConfig,
    registry: Arc<TargetRegistry>,
    cache: Arc<HealthStatusCache>,
    prober: Arc<dyn Probe>,
    running: AtomicBool,
}

impl HealthWorker {
    pub fn new(
        registry: Arc<TargetRegistry>,
        cache: Arc<HealthStatusCache>,
        prober: Arc<dyn Probe>,
        config: HealthConfig,
    ) -> Result<HealthWorker> {
        config.validate()?;
        Ok(HealthWorker {
            shared: Arc::new(Shared {
                config,
                registry,
                cache,
                prober,
                running: AtomicBool::new(false),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Spawn the periodic sweep loop. Fails if already started.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.started {
            return Err(Error::AlreadyStarted(COMPONENT));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_loop(shared, shutdown_rx));

        lifecycle.started = true;
        lifecycle.handle = Some(handle);
        lifecycle.shutdown_tx = Some(shutdown_tx);
        info!(
            interval_ms = self.shared.config.check_interval_ms,
            max_concurrent = self.shared.config.max_concurrent_checks,
            "health worker started"
        );
        Ok(())
    }

    /// Signal shutdown and wait up to `timeout` for the loop to exit.
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
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }

        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => {
                    info!("health worker stopped");
                    Ok(())
                }
                Err(_) => {
                    warn!(?timeout, "health loop did not exit in time, aborting");
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

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Probe one target immediately and return its updated status.
    pub async fn check_now(&self, name: &str) -> Result<TargetHealthStatus> {
        let target = self
            .shared
            .registry
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("target {name}")))?;

        let result = self
            .shared
            .prober
            .probe_with_retry(&target, CheckTrigger::Manual)
            .await;
        Ok(apply_result(&self.shared, &target, result))
    }

    /// One bounded-parallelism sweep over every enabled target.
    pub async fn check_all(&self, trigger: CheckTrigger) -> usize {
        sweep(&self.shared, trigger).await
    }

    /// Accelerated recovery: serially re-probe only unhealthy targets.
    ///
    /// Operates on the unhealthy set alone, so it can never downgrade a
    /// healthy target between periodic sweeps.
    pub async fn recheck_unhealthy(&self) -> usize {
        let unhealthy: Vec<String> = self
            .shared
            .cache
            .get_all()
            .into_iter()
            .filter(|status| status.status == HealthState::Unhealthy)
            .map(|status| status.name)
            .collect();

        let mut rechecked = 0;
        for name in unhealthy {
            let Some(target) = self.shared.registry.get(&name) else {
                continue;
            };
            if !target.enabled {
                continue;
            }
            let result = self
                .shared
                .prober
                .probe_with_retry(&target, CheckTrigger::Periodic)
                .await;
            apply_result(&self.shared, &target, result);
            rechecked += 1;
        }
        if rechecked > 0 {
            debug!(rechecked, "accelerated recovery pass complete");
        }
        rechecked
    }

    pub fn cache(&self) -> &Arc<HealthStatusCache> {
        &self.shared.cache
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(shared.config.warmup_delay()) => {}
        _ = shutdown_rx.changed() => {
            debug!("health loop cancelled during warmup");
            return;
        }
    }

    sweep(&shared, CheckTrigger::Periodic).await;

    let mut ticker = tokio::time::interval(shared.config.check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.reset();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&shared, CheckTrigger::Periodic).await;
            }
            _ = shutdown_rx.changed() => {
                debug!("health loop shutting down");
                return;
            }
        }
    }
}

/// Fan probes out over the enabled targets, at most `max_concurrent_checks`
/// in flight, applying each result as it lands.
async fn sweep(shared: &Arc<Shared>, trigger: CheckTrigger) -> usize {
    let targets: Vec<Arc<TargetDescriptor>> = shared
        .registry
        .list()
        .into_iter()
        .filter(|target| target.enabled && !target.url.is_empty() && !target.name.is_empty())
        .collect();

    if targets.is_empty() {
        debug!("no enabled targets to check");
        return 0;
    }

    let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrent_checks));
    let mut tasks: JoinSet<(Arc<TargetDescriptor>, CheckResult)> = JoinSet::new();

    for target in targets {
        let semaphore = Arc::clone(&semaphore);
        let prober = Arc::clone(&shared.prober);
        tasks.spawn(async move {
            // closed only if the set is aborted mid-sweep
            let _permit = semaphore.acquire_owned().await;
            let result = prober.probe_with_retry(&target, trigger).await;
            (target, result)
        });
    }

    let mut checked = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((target, result)) => {
                apply_result(shared, &target, result);
                checked += 1;
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(error = %err, "probe task failed"),
        }
    }

    debug!(checked, trigger = trigger.as_str(), "health sweep complete");
    checked
}

/// Apply one probe result to the cache through the atomic read-modify-write
/// and emit the per-target metric series.
fn apply_result(
    shared: &Arc<Shared>,
    target: &TargetDescriptor,
    result: CheckResult,
) -> TargetHealthStatus {
    let threshold = shared.config.failure_threshold;
    let degraded_latency_ms = shared.config.degraded_latency_threshold_ms;

    let updated = shared.cache.upsert(
        &target.name,
        || TargetHealthStatus::unknown(&target.name, target.target_type, target.enabled),
        |status| {
            status.enabled = target.enabled;
            let transition = evaluate(status, &result, threshold, degraded_latency_ms);
            log_transition(&target.name, &transition, status);
        },
    );

    let outcome = if result.success { "success" } else { "failure" };
    counter!(
        "health_checks_total",
        "target" => target.name.clone(),
        "status" => outcome
    )
    .increment(1);
    if let Some(latency_ms) = result.latency_ms {
        histogram!("health_check_duration_seconds", "target" => target.name.clone())
            .record(latency_ms as f64 / 1000.0);
    }
    if let Some(kind) = result.error_kind {
        counter!(
            "health_check_errors_total",
            "target" => target.name.clone(),
            "error_type" => kind.as_str()
        )
        .increment(1);
    }
    gauge!(
        "target_health_status",
        "target" => target.name.clone(),
        "type" => target.target_type.as_str()
    )
    .set(updated.status.as_gauge());
    gauge!("target_consecutive_failures", "target" => target.name.clone())
        .set(updated.consecutive_failures as f64);
    gauge!("target_success_rate", "target" => target.name.clone()).set(updated.success_rate);

    updated
}

/// Outcome of one state-machine evaluation, for logging.
struct Transition {
    from: HealthState,
    to: HealthState,
    reason: String,
}

/// The status state machine of one probe result.
///
/// Counters always advance, even for a replayed result; deduplication is
/// deliberately not attempted here.
fn evaluate(
    status: &mut TargetHealthStatus,
    result: &CheckResult,
    failure_threshold: u32,
    degraded_latency_ms: u64,
) -> Transition {
    let from = status.status;
    status.total_checks += 1;
    status.last_check_at = result.checked_at;

    let (to, reason) = if result.success {
        status.total_successes += 1;
        status.latency_ms = result.latency_ms;
        status.error_message = None;
        status.consecutive_failures = 0;
        status.last_success_at = Some(result.checked_at);

        match result.latency_ms {
            Some(latency) if latency >= degraded_latency_ms => {
                (HealthState::Degraded, "slow response".to_string())
            }
            _ => (HealthState::Healthy, "check succeeded".to_string()),
        }
    } else {
        status.total_failures += 1;
        status.latency_ms = None;
        status.error_message = result.error_message.clone();
        status.consecutive_failures += 1;
        status.last_failure_at = Some(result.checked_at);

        if status.consecutive_failures >= failure_threshold {
            (
                HealthState::Unhealthy,
                format!("{} consecutive failures", status.consecutive_failures),
            )
        } else if from == HealthState::Unknown {
            (
                HealthState::Degraded,
                format!(
                    "failure {}/{failure_threshold}",
                    status.consecutive_failures
                ),
            )
        } else {
            (from, "failure below threshold".to_string())
        }
    };

    status.status = to;
    status.recompute_success_rate();
    Transition { from, to, reason }
}

fn log_transition(name: &str, transition: &Transition, status: &TargetHealthStatus) {
    let Transition { from, to, reason } = transition;
    match (from, to) {
        (_, HealthState::Unhealthy) if from != to => {
            warn!(target = name, %from, %to, %reason, error = ?status.error_message, "target became unhealthy");
        }
        (_, HealthState::Degraded) if from != to => {
            warn!(target = name, %from, %to, %reason, "target degraded");
        }
        (HealthState::Unhealthy, HealthState::Healthy) => {
            info!(target = name, %reason, "target recovered");
        }
        _ => {
            debug!(target = name, %from, %to, %reason, "health check applied");
        }
    }
}
