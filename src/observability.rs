use crate::workflow::types::ErrorKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Failure counts per `ErrorKind`, reported in the run summary
#[derive(Debug, Default)]
pub struct FailureTally {
    counts: Mutex<HashMap<ErrorKind, u64>>,
}

impl FailureTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ErrorKind) {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: ErrorKind) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.get(&kind).copied().unwrap_or(0)
    }

    /// Buckets sorted by count, largest first (ties by kind name)
    pub fn sorted(&self) -> Vec<(ErrorKind, u64)> {
        let counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut buckets: Vec<(ErrorKind, u64)> = counts.iter().map(|(k, v)| (*k, *v)).collect();
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        buckets
    }
}

/// Time an operation; `elapsed_ms` feeds `StageResult::latency_ms`
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish(self) -> u64 {
        let duration_ms = self.elapsed_ms();
        debug!(operation = %self.operation, duration_ms, "Operation completed");
        duration_ms
    }
}
