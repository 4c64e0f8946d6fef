//! Process-wide Prometheus registry holding the protocol and action cache collectors.

use action_cache::metrics as cache_metrics;
use cdp_adapter::metrics as cdp_metrics;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::errors::EngineError;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        cdp_metrics::register_metrics(registry);
        cache_metrics::register_metrics(registry);
    });
}

/// Prometheus text exposition of everything registered so far.
pub fn render() -> Result<String, EngineError> {
    register_metrics();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&global_registry().gather(), &mut buffer)
        .map_err(|err| EngineError::Metrics(err.to_string()))?;
    String::from_utf8(buffer).map_err(|err| EngineError::Metrics(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectors_register_once() {
        register_metrics();
        register_metrics();
        cdp_metrics::set_open_pages(2);
        let text = render().unwrap();
        assert!(text.contains("pagewright_cdp_pages_open"));
    }
}
