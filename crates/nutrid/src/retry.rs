//! Per-source retry counters

use std::collections::BTreeMap;

/// What happens after a failed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retried on the shortened retry interval; `attempt` failures so far
    WillRetry { attempt: u32 },
    /// Limit reached; the counter was reset and the next normal cycle tries again
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryTracker {
    max_retries: u32,
    counts: BTreeMap<String, u32>,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            counts: BTreeMap::new(),
        }
    }

    pub fn record_failure(&mut self, source: &str) -> RetryDecision {
        let count = self.counts.entry(source.to_string()).or_insert(0);
        *count += 1;

        if *count >= self.max_retries {
            let attempts = *count;
            *count = 0;
            RetryDecision::Exhausted { attempts }
        } else {
            RetryDecision::WillRetry { attempt: *count }
        }
    }

    pub fn record_success(&mut self, source: &str) {
        self.counts.insert(source.to_string(), 0);
    }

    pub fn count(&self, source: &str) -> u32 {
        self.counts.get(source).copied().unwrap_or(0)
    }

    /// True while any source is waiting for a retry
    pub fn any_pending(&self) -> bool {
        self.counts.values().any(|c| *c > 0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.counts.clone()
    }
}
