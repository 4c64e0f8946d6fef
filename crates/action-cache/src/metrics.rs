use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, Registry};
use tracing::error;

use crate::model::CacheStatus;

lazy_static! {
    static ref ACT_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("pagewright_action_cache_act_total", "act calls grouped by cache status"),
        &["status"]
    )
    .expect("valid metric definition");
    static ref SCHEMA_MISSES: IntCounter = IntCounter::new(
        "pagewright_action_cache_schema_misses_total",
        "Stored entries ignored because of a schema mismatch"
    )
    .expect("valid metric definition");
    static ref REPLAY_FAILURES: IntCounter = IntCounter::new(
        "pagewright_action_cache_replay_failures_total",
        "Cached replays that stopped on a failing step"
    )
    .expect("valid metric definition");
    static ref HEALED_STEPS: IntCounter = IntCounter::new(
        "pagewright_action_cache_healed_steps_total",
        "Replay steps re-resolved through the planner"
    )
    .expect("valid metric definition");
    static ref TIMEOUTS: IntCounter = IntCounter::new(
        "pagewright_action_cache_timeouts_total",
        "act calls abandoned at their deadline"
    )
    .expect("valid metric definition");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register action cache metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, ACT_TOTAL.clone());
    register(registry, SCHEMA_MISSES.clone());
    register(registry, REPLAY_FAILURES.clone());
    register(registry, HEALED_STEPS.clone());
    register(registry, TIMEOUTS.clone());
}

pub fn record_act(status: CacheStatus) {
    ACT_TOTAL.with_label_values(&[status.as_str()]).inc();
}

pub fn record_schema_miss() {
    SCHEMA_MISSES.inc();
}

pub fn record_replay_failure() {
    REPLAY_FAILURES.inc();
}

pub fn record_healed_step() {
    HEALED_STEPS.inc();
}

pub fn record_timeout() {
    TIMEOUTS.inc();
}
