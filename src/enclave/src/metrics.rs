//! Process-wide execution metrics, recorded through whatever `metrics`
//! exporter the embedding binary installs: an active-executions gauge, a
//! lifetime counter, and a duration histogram tagged by outcome.

use std::time::Instant;

use tracing::{Level, instrument};

static METRIC_ACTIVE_EXECUTIONS: &str = "active_enclave_executions";
static METRIC_EXECUTIONS_TOTAL: &str = "enclave_executions_total";
static METRIC_EXECUTION_DURATION: &str = "enclave_execution_duration_ms";
static METRIC_EXECUTION_OUTCOME: &str = "outcome";

/// Held for the lifetime of one `Enclave::run` call. Increments the active
/// gauge and lifetime counter on construction, decrements the gauge and
/// records the duration histogram on drop, tagged with the final outcome.
pub(crate) struct ExecutionMetricsGuard {
    start: Instant,
    outcome: &'static str,
}

impl ExecutionMetricsGuard {
    #[instrument(skip_all, level = Level::DEBUG)]
    pub(crate) fn new() -> Self {
        metrics::gauge!(METRIC_ACTIVE_EXECUTIONS).increment(1);
        metrics::counter!(METRIC_EXECUTIONS_TOTAL).increment(1);
        Self {
            start: Instant::now(),
            outcome: "success",
        }
    }

    pub(crate) fn mark_outcome(&mut self, success: bool) {
        self.outcome = if success { "success" } else { "failure" };
    }
}

impl Drop for ExecutionMetricsGuard {
    #[instrument(skip_all, level = Level::DEBUG)]
    fn drop(&mut self) {
        metrics::gauge!(METRIC_ACTIVE_EXECUTIONS).decrement(1);
        metrics::histogram!(METRIC_EXECUTION_DURATION, METRIC_EXECUTION_OUTCOME => self.outcome)
            .record(self.start.elapsed().as_millis() as f64);
    }
}
