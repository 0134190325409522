use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use crate::Result;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref ACTIVE_REGISTRATIONS_METRIC: IntGauge = IntGauge::new(
        "active_registrations",
        "Number of bind targets with at least one attached worker"
    )
    .expect("metric can not be created");

    pub static ref ATTACHED_WORKERS_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("attached_workers", "Workers currently attached per bind target"),
        &["bind_target"]
    )
    .expect("metric can not be created");

    pub static ref RESOURCE_LIFECYCLE_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("listening_resources", "Listening resources created and closed"),
        &["event"]
    )
    .expect("metric can not be created");

    pub static ref ATTACH_FAILURES_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("attach_failures", "Attach requests that did not yield a handle"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("portshare".to_string()), None).expect("registry can be created");
}

static REGISTER_DEFAULT: Once = Once::new();

pub fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(ACTIVE_REGISTRATIONS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ATTACHED_WORKERS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RESOURCE_LIFECYCLE_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ATTACH_FAILURES_METRIC.clone()))
        .expect("collector can be registered");
}

/// Renders every registry metric in the Prometheus text exposition format.
pub fn gather_metrics() -> Result<String> {
    REGISTER_DEFAULT.call_once(|| register_custom_metrics(&REGISTRY));

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::SystemError::Metrics(e.to_string()).into())
}
