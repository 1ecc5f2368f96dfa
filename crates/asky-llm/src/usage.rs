use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic token/time accumulators for one model scope.
///
/// One tracker is created per turn for the main model and one for the
/// summarization model; they are never shared across turns except as
/// explicit inputs.
#[derive(Debug, Default)]
pub struct UsageTracker {
    calls: AtomicU64,
    tokens_in: AtomicU64,
    tokens_out: AtomicU64,
    elapsed_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub elapsed_ms: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed LLM call.
    pub fn record(&self, tokens_in: u32, tokens_out: u32, elapsed_ms: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.tokens_in.fetch_add(tokens_in as u64, Ordering::Relaxed);
        self.tokens_out
            .fetch_add(tokens_out as u64, Ordering::Relaxed);
        self.elapsed_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            tokens_in: self.tokens_in.load(Ordering::Relaxed),
            tokens_out: self.tokens_out.load(Ordering::Relaxed),
            elapsed_ms: self.elapsed_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_monotonically() {
        let tracker = UsageTracker::new();
        tracker.record(100, 20, 500);
        tracker.record(50, 10, 250);
        let snap = tracker.snapshot();
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.tokens_in, 150);
        assert_eq!(snap.tokens_out, 30);
        assert_eq!(snap.elapsed_ms, 750);
    }
}
