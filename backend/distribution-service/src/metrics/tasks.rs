//! Background task pool collectors

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};

static TASKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_background_tasks_total",
        "Background tasks by name and outcome (submitted/succeeded/failed/retried/rejected)",
        &["task", "outcome"]
    )
    .expect("failed to register distribution_background_tasks_total")
});

static TASKS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "distribution_background_tasks_in_flight",
        "Background tasks queued or running"
    )
    .expect("failed to register distribution_background_tasks_in_flight")
});

pub fn record_task(task: &str, outcome: &str) {
    TASKS_TOTAL.with_label_values(&[task, outcome]).inc();
}

pub fn set_in_flight(count: usize) {
    TASKS_IN_FLIGHT.set(count as i64);
}
