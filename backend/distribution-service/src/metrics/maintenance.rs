//! Prometheus metrics for maintenance runs
//!
//! Tracks step outcomes, durations and rows touched per step

use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use std::time::Duration;

/// Step executions by outcome (ok/error/skipped)
static STEP_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_maintenance_step_runs_total",
        "Maintenance step executions by outcome",
        &["step", "status"]
    )
    .expect("failed to register distribution_maintenance_step_runs_total")
});

static STEP_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "distribution_maintenance_step_duration_seconds",
        "Duration of maintenance steps",
        &["step"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("failed to register distribution_maintenance_step_duration_seconds")
});

/// Rows deleted by the purge steps
static ROWS_PURGED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_rows_purged_total",
        "Rows deleted by retention purges",
        &["table"]
    )
    .expect("failed to register distribution_rows_purged_total")
});

pub fn record_step_run(step: &str, status: &str) {
    STEP_RUNS_TOTAL.with_label_values(&[step, status]).inc();
}

pub fn record_step_duration(step: &str, duration: Duration) {
    STEP_DURATION_SECONDS
        .with_label_values(&[step])
        .observe(duration.as_secs_f64());
}

pub fn record_rows_purged(table: &str, count: u64) {
    ROWS_PURGED_TOTAL.with_label_values(&[table]).inc_by(count);
}
