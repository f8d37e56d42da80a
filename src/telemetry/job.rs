//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for resumable jobs
//! flowing through the runner.

use tracing::Span;

use crate::model::{JobKey, JobState};

/// Start a span for one invocation of a job.
///
/// The `job.state` field is declared empty and is updated by
/// [`record_state_transition`].
pub fn start_job_span(callback: &str, key: &JobKey, resumed: bool) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.callback" = callback,
        "job.key" = %key,
        "job.resumed" = resumed,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
///
/// Transitions the state machine does not allow are still recorded, at
/// `warn` level.
pub fn record_state_transition(span: &Span, from: JobState, to: JobState) {
    span.record("job.state", tracing::field::display(to));
    span.in_scope(|| {
        if from.can_transition_to(to) {
            tracing::info!(%from, %to, "state_transition");
        } else {
            tracing::warn!(%from, %to, "unexpected state_transition");
        }
    });
}
