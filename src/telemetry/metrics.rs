//! Metric instrument factories for crewsheet.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"crewsheet"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for crewsheet instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("crewsheet")
}

/// Counter: work items processed by the runner.
/// Labels: `callback`.
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("crewsheet.job.items_processed")
        .with_description("Number of work items processed")
        .build()
}

/// Counter: job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("crewsheet.job.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: continuations armed after a budget overrun.
/// Labels: `callback`.
pub fn continuations_armed() -> Counter<u64> {
    meter()
        .u64_counter("crewsheet.job.continuations_armed")
        .with_description("Number of continuations armed")
        .build()
}

/// Counter: failed invocations reaching the entry wrapper.
/// Labels: `callback`, `kind`.
pub fn job_failures() -> Counter<u64> {
    meter()
        .u64_counter("crewsheet.job.failures")
        .with_description("Number of failed job invocations")
        .build()
}

/// Histogram: invocation duration in milliseconds.
/// Labels: `callback`, `outcome` ("completed" | "suspended" | "failed").
pub fn invocation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("crewsheet.job.duration_ms")
        .with_description("Job invocation duration in milliseconds")
        .with_unit("ms")
        .build()
}
