use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("shared".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    RESOURCE_LIFECYCLE_METRIC.with_label_values(&["created"]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"shared_listening_resources"),
        "Missing shared_listening_resources"
    );
    assert!(metric_names.contains(&"shared_active_registrations"));
}

#[test]
fn test_counter_increment() {
    ATTACH_FAILURES_METRIC.with_label_values(&["metrics_test"]).reset();

    ATTACH_FAILURES_METRIC.with_label_values(&["metrics_test"]).inc();
    ATTACH_FAILURES_METRIC.with_label_values(&["metrics_test"]).inc();

    let value = ATTACH_FAILURES_METRIC.with_label_values(&["metrics_test"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}

#[test]
fn test_gather_metrics_renders_text_format() {
    ACTIVE_REGISTRATIONS_METRIC.get();
    RESOURCE_LIFECYCLE_METRIC.with_label_values(&["closed"]).inc();

    let body = gather_metrics().unwrap();

    assert!(body.contains("portshare_listening_resources"));
    assert!(body.contains("# TYPE portshare_active_registrations gauge"));
}
