//! Health worker scenarios against a scripted probe

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use alertroute_common::{
    CheckResult, CheckTrigger, Error, ErrorKind, HealthConfig, HealthState, TargetDescriptor,
    TargetType,
};
use alertroute_discovery::TargetRegistry;
use alertroute_health::{HealthStatusCache, HealthSummary, HealthWorker, Probe};

fn descriptor(name: &str, enabled: bool) -> TargetDescriptor {
    TargetDescriptor {
        name: name.to_string(),
        target_type: TargetType::Webhook,
        url: format!("https://example.com/{name}"),
        format: alertroute_common::PayloadFormat::Webhook,
        enabled,
        headers: HashMap::new(),
        filter_config: HashMap::new(),
    }
}

fn fast_config(failure_threshold: u32) -> HealthConfig {
    HealthConfig {
        check_interval_ms: 3_600_000,
        http_timeout_ms: 1_000,
        warmup_delay_ms: 1,
        failure_threshold,
        degraded_latency_threshold_ms: 5_000,
        max_concurrent_checks: 10,
        ..HealthConfig::default()
    }
}

/// Probe whose outcomes are scripted per target; repeats the last outcome
/// when the script runs dry.
#[derive(Default)]
struct ScriptedProbe {
    outcomes: Mutex<HashMap<String, Vec<(bool, Option<u64>)>>>,
    cursor: Mutex<HashMap<String, usize>>,
    calls: AtomicU64,
    in_flight: AtomicI64,
    max_in_flight: AtomicI64,
}

impl ScriptedProbe {
    fn script(&self, name: &str, outcomes: Vec<(bool, Option<u64>)>) {
        self.outcomes.lock().insert(name.to_string(), outcomes);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, target: &TargetDescriptor, trigger: CheckTrigger) -> CheckResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (success, latency) = {
            let outcomes = self.outcomes.lock();
            let script = outcomes.get(&target.name).cloned().unwrap_or_default();
            let mut cursor = self.cursor.lock();
            let index = cursor.entry(target.name.clone()).or_insert(0);
            let outcome = script
                .get(*index)
                .or_else(|| script.last())
                .copied()
                .unwrap_or((true, Some(10)));
            *index += 1;
            outcome
        };

        CheckResult {
            name: target.name.clone(),
            url: target.url.clone(),
            success,
            latency_ms: if success { latency } else { None },
            status_code: Some(if success { 200 } else { 503 }),
            error_message: (!success).then(|| "http status 503".to_string()),
            // http is not retry-eligible, keeping call counts deterministic
            error_kind: (!success).then_some(ErrorKind::Http),
            checked_at: Utc::now(),
            trigger,
        }
    }
}

fn build(
    probe: Arc<ScriptedProbe>,
    config: HealthConfig,
) -> (Arc<TargetRegistry>, Arc<HealthStatusCache>, HealthWorker) {
    let registry = TargetRegistry::new();
    let cache = HealthStatusCache::new();
    let worker = HealthWorker::new(
        Arc::clone(&registry),
        Arc::clone(&cache),
        probe,
        config,
    )
    .unwrap();
    (registry, cache, worker)
}

#[tokio::test]
async fn failing_target_becomes_unhealthy_then_recovers() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.script(
        "flaky",
        vec![
            (false, None),
            (false, None),
            (false, None),
            (true, Some(25)),
        ],
    );
    let (registry, cache, worker) = build(Arc::clone(&probe), fast_config(3));
    registry.set(vec![descriptor("flaky", true)]);

    for _ in 0..3 {
        worker.check_all(CheckTrigger::Periodic).await;
    }
    let status = cache.get("flaky").unwrap();
    assert_eq!(status.status, HealthState::Unhealthy);
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.total_failures, 3);

    worker.check_all(CheckTrigger::Periodic).await;
    let status = cache.get("flaky").unwrap();
    assert_eq!(status.status, HealthState::Healthy);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.total_checks, 4);
    assert_eq!(status.latency_ms, Some(25));
}

#[tokio::test]
async fn sweep_skips_disabled_and_nameless_targets() {
    let probe = Arc::new(ScriptedProbe::default());
    let (registry, cache, worker) = build(Arc::clone(&probe), fast_config(3));
    let mut no_url = descriptor("no-url", true);
    no_url.url = String::new();
    registry.set(vec![
        descriptor("active", true),
        descriptor("disabled", false),
        no_url,
    ]);

    let checked = worker.check_all(CheckTrigger::Periodic).await;
    assert_eq!(checked, 1);
    assert!(cache.get("active").is_some());
    assert!(cache.get("disabled").is_none());
    assert!(cache.get("no-url").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_respects_concurrency_bound() {
    let probe = Arc::new(ScriptedProbe::default());
    let config = HealthConfig {
        max_concurrent_checks: 3,
        ..fast_config(3)
    };
    let (registry, _cache, worker) = build(Arc::clone(&probe), config);
    registry.set(
        (0..20)
            .map(|i| descriptor(&format!("target-{i}"), true))
            .collect(),
    );

    let checked = worker.check_all(CheckTrigger::Periodic).await;
    assert_eq!(checked, 20);
    assert_eq!(probe.calls(), 20);
    let max = probe.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "observed {max} concurrent probes");
}

#[tokio::test]
async fn check_now_unknown_target() {
    let probe = Arc::new(ScriptedProbe::default());
    let (_registry, _cache, worker) = build(probe, fast_config(3));
    let err = worker.check_now("ghost").await;
    assert!(matches!(err, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn check_now_returns_updated_status() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.script("solo", vec![(true, Some(40))]);
    let (registry, cache, worker) = build(Arc::clone(&probe), fast_config(3));
    registry.set(vec![descriptor("solo", true)]);

    let status = worker.check_now("solo").await.unwrap();
    assert_eq!(status.status, HealthState::Healthy);
    assert_eq!(status.total_checks, 1);
    assert_eq!(cache.get("solo").unwrap().total_checks, 1);
}

#[tokio::test]
async fn recheck_unhealthy_only_touches_unhealthy_targets() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.script("sick", vec![(false, None), (true, Some(15))]);
    probe.script("fine", vec![(true, Some(5))]);
    let config = fast_config(1);
    let (registry, cache, worker) = build(Arc::clone(&probe), config);
    registry.set(vec![descriptor("sick", true), descriptor("fine", true)]);

    worker.check_all(CheckTrigger::Periodic).await;
    assert_eq!(cache.get("sick").unwrap().status, HealthState::Unhealthy);
    assert_eq!(cache.get("fine").unwrap().status, HealthState::Healthy);
    let calls_after_sweep = probe.calls();

    let rechecked = worker.recheck_unhealthy().await;
    assert_eq!(rechecked, 1, "only the unhealthy target is re-probed");
    assert_eq!(probe.calls(), calls_after_sweep + 1);
    assert_eq!(cache.get("sick").unwrap().status, HealthState::Healthy);
    // the healthy target's counters are untouched
    assert_eq!(cache.get("fine").unwrap().total_checks, 1);
}

#[tokio::test]
async fn periodic_loop_runs_initial_sweep() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.script("auto", vec![(true, Some(10))]);
    let (registry, cache, worker) = build(Arc::clone(&probe), fast_config(3));
    registry.set(vec![descriptor("auto", true)]);

    worker.start().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while cache.get("auto").is_none() {
        assert!(std::time::Instant::now() < deadline, "initial sweep never ran");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        worker.start(),
        Err(Error::AlreadyStarted(_))
    ));
    worker.stop(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        worker.stop(Duration::from_secs(1)).await,
        Err(Error::NotStarted(_))
    ));
}

/// Probe that blocks until released, for exercising shutdown teardown.
#[derive(Default)]
struct BlockingProbe {
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
    /// Set when an in-flight probe future is dropped mid-call, i.e. the
    /// sweep's fan-out tasks were actually torn down.
    dropped_mid_probe: AtomicBool,
}

struct SetOnDrop<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl Drop for SetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Probe for BlockingProbe {
    async fn probe(&self, target: &TargetDescriptor, trigger: CheckTrigger) -> CheckResult {
        let mut guard = SetOnDrop {
            flag: &self.dropped_mid_probe,
            armed: true,
        };
        self.entered.notify_one();
        self.release.notified().await;
        guard.armed = false;
        CheckResult {
            name: target.name.clone(),
            url: target.url.clone(),
            success: true,
            latency_ms: Some(1),
            status_code: Some(200),
            error_message: None,
            error_kind: None,
            checked_at: Utc::now(),
            trigger,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_times_out_on_wedged_sweep() {
    let probe = Arc::new(BlockingProbe::default());
    let registry = TargetRegistry::new();
    let cache = HealthStatusCache::new();
    registry.set(vec![descriptor("wedged", true)]);
    let worker = HealthWorker::new(
        Arc::clone(&registry),
        Arc::clone(&cache),
        Arc::clone(&probe) as Arc<dyn Probe>,
        fast_config(3),
    )
    .unwrap();

    worker.start().unwrap();
    // the initial sweep wedges inside the probe
    probe.entered.notified().await;

    let err = worker.stop(Duration::from_millis(50)).await;
    assert!(matches!(err, Err(Error::ShutdownTimeout { .. })));
    assert!(!worker.is_running(), "marked stopped regardless");

    // the timed-out stop aborts the loop task, which tears down the
    // sweep's fan-out tasks and the wedged probe with them
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !probe.dropped_mid_probe.load(Ordering::SeqCst) {
        assert!(
            std::time::Instant::now() < deadline,
            "wedged probe future was never dropped"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn summary_reflects_cache_contents() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.script("good", vec![(true, Some(10))]);
    probe.script("bad", vec![(false, None)]);
    let (registry, cache, worker) = build(Arc::clone(&probe), fast_config(1));
    registry.set(vec![descriptor("good", true), descriptor("bad", true)]);

    worker.check_all(CheckTrigger::Periodic).await;
    let summary = HealthSummary::from_cache(&cache);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.unhealthy, 1);
    assert_eq!(summary.overall_success_rate, 50.0);
}
