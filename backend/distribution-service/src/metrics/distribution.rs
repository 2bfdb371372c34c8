//! Ingestion, aggregation, phase and trust collectors

use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter_vec, Histogram, IntCounterVec};
use std::time::Duration;

static WATCH_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_watch_events_total",
        "Watch events by ingestion outcome (accepted/rejected/failed)",
        &["outcome"]
    )
    .expect("failed to register distribution_watch_events_total")
});

static AGGREGATION_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "distribution_aggregation_duration_seconds",
        "Time to fold one watch event into post metrics and rescore",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("failed to register distribution_aggregation_duration_seconds")
});

static SCORE_WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_score_writes_total",
        "Viral score writes (written/stale/error)",
        &["result"]
    )
    .expect("failed to register distribution_score_writes_total")
});

static PHASE_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_phase_transitions_total",
        "Distribution phase changes",
        &["from", "to"]
    )
    .expect("failed to register distribution_phase_transitions_total")
});

static TRUST_SIGNALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_trust_signals_total",
        "Negative trust signals applied, by kind",
        &["kind"]
    )
    .expect("failed to register distribution_trust_signals_total")
});

static SHADOW_BANS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "distribution_shadow_bans_total",
        "Shadow ban state changes (banned/lifted)",
        &["action"]
    )
    .expect("failed to register distribution_shadow_bans_total")
});

pub fn record_watch_event(outcome: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_aggregation_duration(duration: Duration) {
    AGGREGATION_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_score_write(result: &str) {
    SCORE_WRITES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_phase_transition(from: &str, to: &str) {
    PHASE_TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
}

pub fn record_trust_signal(kind: &str) {
    TRUST_SIGNALS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_shadow_ban(action: &str, count: u64) {
    SHADOW_BANS_TOTAL.with_label_values(&[action]).inc_by(count);
}
