use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RetryBudget {
    attempts: u32,
    not_before: Option<Instant>,
}

impl RetryBudget {
    fn ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeued { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Session-scoped failure bookkeeping. Nothing here is persisted: a restart
/// gives every article a fresh budget.
#[derive(Debug)]
pub struct RetryLedger {
    max_attempts: u32,
    max_retry_after: Duration,
    entries: HashMap<i64, RetryBudget>,
    queue: VecDeque<i64>,
}

impl RetryLedger {
    pub fn new(max_attempts: u32, max_retry_after: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_retry_after,
            entries: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn record_failure(&mut self, article_id: i64, retry_after: Option<Duration>) -> RetryDecision {
        let entry = self.entries.entry(article_id).or_default();
        entry.attempts += 1;
        let attempts = entry.attempts;

        if attempts >= self.max_attempts {
            entry.not_before = None;
            self.queue.retain(|id| *id != article_id);
            return RetryDecision::Exhausted { attempts };
        }

        let now = Instant::now();
        entry.not_before = retry_after.map(|delay| {
            let delay = delay.min(self.max_retry_after);
            now.checked_add(delay).unwrap_or(now)
        });
        if !self.queue.contains(&article_id) {
            self.queue.push_back(article_id);
        }
        RetryDecision::Requeued { attempts }
    }

    pub fn record_success(&mut self, article_id: i64) {
        self.forget(article_id);
    }

    pub fn forget(&mut self, article_id: i64) {
        self.entries.remove(&article_id);
        self.queue.retain(|id| *id != article_id);
    }

    pub fn attempts(&self, article_id: i64) -> u32 {
        self.entries.get(&article_id).map_or(0, |e| e.attempts)
    }

    pub fn is_exhausted(&self, article_id: i64) -> bool {
        self.attempts(article_id) >= self.max_attempts
    }

    /// Articles with any failure this session; they only come back through the
    /// retry queue.
    pub fn failed_ids(&self) -> Vec<i64> {
        self.entries.keys().copied().collect()
    }

    /// Pops the oldest queued retry whose rate-limit hint has passed.
    pub fn next_ready(&mut self, now: Instant) -> Option<i64> {
        let position = self.queue.iter().position(|id| {
            self.entries
                .get(id)
                .is_some_and(|entry| entry.ready(now))
        })?;
        self.queue.remove(position)
    }

    /// Earliest moment a queued retry becomes eligible.
    pub fn next_wake(&self) -> Option<Instant> {
        self.queue
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.not_before.unwrap_or_else(Instant::now))
            .min()
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }
}
