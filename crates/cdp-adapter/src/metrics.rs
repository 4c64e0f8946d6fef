use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
};
use serde::Serialize;
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub events: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
    pub sessions_attached: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static COMMAND_SUCCESS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);
static SESSIONS_ATTACHED: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("pagewright_cdp_commands_total", "Protocol commands sent"),
        &["method"]
    )
    .expect("valid metric definition");
    static ref CDP_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "pagewright_cdp_command_failures_total",
            "Protocol commands that failed or timed out"
        ),
        &["method"]
    )
    .expect("valid metric definition");
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "pagewright_cdp_command_duration_seconds",
            "Protocol command round-trip latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
        ),
        &["method"]
    )
    .expect("valid metric definition");
    static ref CDP_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("pagewright_cdp_events_total", "Protocol events received"),
        &["domain"]
    )
    .expect("valid metric definition");
    static ref CDP_SESSIONS_TOTAL: IntCounter = IntCounter::new(
        "pagewright_cdp_sessions_attached_total",
        "Target sessions attached",
    )
    .expect("valid metric definition");
    static ref CDP_PAGES_OPEN: IntGauge =
        IntGauge::new("pagewright_cdp_pages_open", "Top-level pages currently open")
            .expect("valid metric definition");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(target: "cdp-adapter", ?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_FAILURES_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_EVENTS_TOTAL.clone());
    register(registry, CDP_SESSIONS_TOTAL.clone());
    register(registry, CDP_PAGES_OPEN.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    CDP_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_event(method: &str) {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    let domain = method.split('.').next().unwrap_or(method);
    CDP_EVENTS_TOTAL.with_label_values(&[domain]).inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMAND_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    CDP_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    CDP_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

pub fn record_session_attached() {
    SESSIONS_ATTACHED.fetch_add(1, Ordering::Relaxed);
    CDP_SESSIONS_TOTAL.inc();
}

pub fn set_open_pages(count: usize) {
    CDP_PAGES_OPEN.set(count as i64);
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        command_success: COMMAND_SUCCESS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
        sessions_attached: SESSIONS_ATTACHED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure_metrics() {
        let before = snapshot();
        record_command("Page.navigate");
        record_command_success("Page.navigate", Duration::from_micros(150));
        record_command_failure("Page.navigate");
        record_event("Page.frameNavigated");
        let after = snapshot();
        assert!(after.commands > before.commands);
        assert!(after.command_success > before.command_success);
        assert!(after.command_failures > before.command_failures);
        assert!(after.command_latency_total_us >= before.command_latency_total_us + 150);
        assert!(after.events > before.events);
    }

    #[test]
    fn metrics_register_once() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_command("Runtime.evaluate");
        assert!(registry
            .gather()
            .iter()
            .any(|family| family.get_name() == "pagewright_cdp_commands_total"));
    }
}
