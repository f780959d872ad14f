//! Invocation deadline bookkeeping.
//!
//! Every store and queue call gets `min(store_call_timeout, remaining -
//! safety_margin)`, so no call can outlive the invocation.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Timing knobs shared by every deadline a worker creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    pub safety_margin: Duration,
    pub store_call_timeout: Duration,
}

impl DeadlinePolicy {
    pub fn deadline_after(&self, budget: Duration) -> Deadline {
        Deadline::after(budget, self.safety_margin, self.store_call_timeout)
    }

    pub fn deadline_at_epoch_millis(&self, deadline_ms: u64) -> Deadline {
        Deadline::from_epoch_millis(
            deadline_ms,
            SystemTime::now(),
            self.safety_margin,
            self.store_call_timeout,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
    safety_margin: Duration,
    store_call_timeout: Duration,
}

impl Deadline {
    pub fn after(budget: Duration, safety_margin: Duration, store_call_timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            safety_margin,
            store_call_timeout,
        }
    }

    /// Builds a deadline from the runtime's wall-clock deadline in epoch
    /// milliseconds. A deadline already in the past leaves no budget.
    pub fn from_epoch_millis(
        deadline_ms: u64,
        now: SystemTime,
        safety_margin: Duration,
        store_call_timeout: Duration,
    ) -> Self {
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let budget = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
        Self::after(budget, safety_margin, store_call_timeout)
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_imminent(&self) -> bool {
        self.remaining() <= self.safety_margin
    }

    /// Timeout for the next external call, or `None` once the deadline is
    /// imminent.
    pub fn call_timeout(&self) -> Option<Duration> {
        let usable = self.remaining().checked_sub(self.safety_margin)?;
        if usable.is_zero() {
            return None;
        }
        Some(usable.min(self.store_call_timeout))
    }
}
