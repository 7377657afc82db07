//! Dispatch metrics
//!
//! Tracks the outbound side of the engine:
//! - Identity selections by strategy and outcome
//! - Sends recorded by result
//! - Store failures that were logged and swallowed
//! - Retry decisions and the delays they schedule

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Dispatch metrics collector
#[derive(Debug)]
pub struct DispatchMetrics {
    selections_total: Counter<u64>,
    sends_recorded_total: Counter<u64>,
    store_failures_total: Counter<u64>,
    retry_decisions_total: Counter<u64>,
    retry_delay_seconds: Histogram<f64>,
}

impl DispatchMetrics {
    /// Create the dispatch instruments on the global meter provider
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let selections_total = meter
            .u64_counter("sendgate.dispatch.selections.total")
            .with_description("Identity selections by strategy and outcome")
            .build();

        let sends_recorded_total = meter
            .u64_counter("sendgate.dispatch.sends.recorded.total")
            .with_description("Send attempts recorded, by result")
            .build();

        let store_failures_total = meter
            .u64_counter("sendgate.dispatch.store.failures.total")
            .with_description("Store writes that failed and were swallowed, by operation")
            .build();

        let retry_decisions_total = meter
            .u64_counter("sendgate.dispatch.retry.decisions.total")
            .with_description("Retry decisions by outcome")
            .build();

        let retry_delay_seconds = meter
            .f64_histogram("sendgate.dispatch.retry.delay.seconds")
            .with_description("Distribution of scheduled retry delays")
            .build();

        Self {
            selections_total,
            sends_recorded_total,
            store_failures_total,
            retry_decisions_total,
            retry_delay_seconds,
        }
    }

    /// Record an identity selection (`selected`, `deferred`, `no_candidates`)
    pub fn record_selection(&self, strategy: &'static str, outcome: &'static str) {
        self.selections_total.add(
            1,
            &[
                KeyValue::new("strategy", strategy),
                KeyValue::new("outcome", outcome),
            ],
        );
    }

    pub fn record_send(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.sends_recorded_total
            .add(1, &[KeyValue::new("result", result)]);
    }

    pub fn record_store_failure(&self, operation: &'static str) {
        self.store_failures_total
            .add(1, &[KeyValue::new("operation", operation)]);
    }

    /// Record a scheduled retry and its delay
    pub fn record_retry(&self, delay_secs: f64) {
        self.retry_decisions_total
            .add(1, &[KeyValue::new("outcome", "retry")]);
        self.retry_delay_seconds.record(delay_secs, &[]);
    }

    /// Record a terminal decision (`non_retryable`, `exhausted`)
    pub fn record_final_failure(&self, reason: &'static str) {
        self.retry_decisions_total
            .add(1, &[KeyValue::new("outcome", reason)]);
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the OpenTelemetry meter for dispatch metrics
fn meter() -> Meter {
    opentelemetry::global::meter("sendgate.dispatch")
}
