//! Prometheus metrics, exposed at `GET /metrics`.

use std::sync::LazyLock;

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Items that reached the end of their active phase, skipped or not.
pub static ITEMS_PLAYED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "jukebox_items_played_total",
        "Queue items moved from active to history",
        &["outcome"],
        REGISTRY.clone()
    )
    .expect("Failed to register ITEMS_PLAYED")
});

pub static ACQUISITION_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "jukebox_acquisition_failures_total",
        "Acquisition attempts that failed, by kind",
        &["operation", "kind"],
        REGISTRY.clone()
    )
    .expect("Failed to register ACQUISITION_FAILURES")
});

pub static EGRESS_ROTATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        "jukebox_egress_rotations_total",
        "Switches to the next egress path after a block signal",
        REGISTRY.clone()
    )
    .expect("Failed to register EGRESS_ROTATIONS")
});

pub static SEGMENTATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram_with_registry!(
        "jukebox_segmentation_duration_seconds",
        "Wall time of one fetch, merge and segment pipeline run",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
        REGISTRY.clone()
    )
    .expect("Failed to register SEGMENTATION_DURATION")
});

pub static PARTICIPANTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "jukebox_participants",
        "Distinct participants currently connected",
        REGISTRY.clone()
    )
    .expect("Failed to register PARTICIPANTS")
});

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    // touch lazies so an idle process still exports zeroed series
    LazyLock::force(&EGRESS_ROTATIONS);
    LazyLock::force(&PARTICIPANTS);
    LazyLock::force(&SEGMENTATION_DURATION);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_registered_series() {
        ITEMS_PLAYED.with_label_values(&["completed"]).inc();
        ACQUISITION_FAILURES
            .with_label_values(&["resolve", "blocked"])
            .inc();

        let output = gather_metrics().unwrap();
        assert!(output.contains("jukebox_items_played_total"));
        assert!(output.contains("jukebox_acquisition_failures_total"));
        assert!(output.contains("jukebox_egress_rotations_total"));
        assert!(output.contains("jukebox_participants"));
    }
}
