use serde::{Deserialize, Serialize};

/// Counters and timings mutated over the lifetime of one execution.
///
/// Every field here is owned by exactly one writer: the facade owns
/// `start_time`/`end_time`/`duration_ms`, the safe runtime owns the rest.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub duration_ms: u64,
    pub tool_call_count: u32,
    pub iteration_count: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub console_call_count: u32,
    pub console_byte_count: u64,
}

impl ExecutionStats {
    pub fn started_at(start_time: u64) -> Self {
        Self {
            start_time,
            ..Default::default()
        }
    }

    pub fn finish(&mut self, end_time: u64) {
        self.end_time = end_time;
        self.duration_ms = end_time.saturating_sub(self.start_time);
    }
}
