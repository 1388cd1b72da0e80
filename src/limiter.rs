//! Fixed-window request budgeting.
//!
//! Every outbound request (search, metadata, download) takes one slot
//! from a budget before being sent. Budgets are fixed windows: a counter
//! resets at each window boundary rather than refilling continuously.
//! Waiters queue FCFS on the budget's mutex, so sustained overload
//! serializes requests instead of dropping them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::record::SourceId;

/// Length of one budget window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-provider (or pooled) request budgeting.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    /// One shared budget when the account tier pools providers, otherwise
    /// lazily-created independent budgets per provider.
    pooled: Option<Arc<Budget>>,
    budgets: DashMap<SourceId, Arc<Budget>>,
}

impl RateLimiter {
    /// Creates a limiter with an independent budget per provider.
    #[must_use]
    pub fn per_provider(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            pooled: None,
            budgets: DashMap::new(),
        }
    }

    /// Creates a limiter where all providers draw from one shared budget.
    #[must_use]
    pub fn pooled(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            pooled: Some(Arc::new(Budget::new(limit, window))),
            budgets: DashMap::new(),
        }
    }

    /// Blocks until a slot is available for `source`, then consumes it.
    ///
    /// Waiters are served in arrival order. Returns the time spent
    /// waiting, which is zero when the window had room.
    pub async fn acquire(&self, source: SourceId) -> Duration {
        let waited = self.budget_for(source).acquire().await;
        if !waited.is_zero() {
            debug!(provider = %source, waited_ms = waited.as_millis(), "budget exhausted, waited for window rollover");
        }
        waited
    }

    /// Consumes a slot if one is free right now; never waits, not even
    /// for the state lock.
    #[must_use]
    pub fn try_acquire(&self, source: SourceId) -> bool {
        self.budget_for(source).try_acquire()
    }

    fn budget_for(&self, source: SourceId) -> Arc<Budget> {
        if let Some(pooled) = &self.pooled {
            return Arc::clone(pooled);
        }
        // Clone the Arc so the shard lock is released before any await.
        self.budgets
            .entry(source)
            .or_insert_with(|| Arc::new(Budget::new(self.limit, self.window)))
            .clone()
    }
}

/// A single fixed-window counter.
#[derive(Debug)]
struct Budget {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    used: u32,
}

impl Budget {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Consumes a slot, sleeping across window rollovers while holding the
    /// state lock. Holding the lock through the sleep is what makes the
    /// queue FCFS: tokio's mutex wakes waiters in arrival order.
    ///
    /// Returns the total time slept; exactly zero when no rollover sleep
    /// was needed.
    async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            state.roll_over(now, self.window);
            if state.used < self.limit {
                state.used += 1;
                trace!(used = state.used, limit = self.limit, "slot consumed");
                return waited;
            }
            let next_window = state.window_start + self.window;
            tokio::time::sleep_until(next_window).await;
            waited += next_window.saturating_duration_since(now);
        }
    }

    /// Non-blocking sibling of `acquire`. A held state lock means some
    /// waiter is sleeping out the window, which counts as no free slot.
    fn try_acquire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        state.roll_over(Instant::now(), self.window);
        if state.used < self.limit {
            state.used += 1;
            true
        } else {
            false
        }
    }
}

impl WindowState {
    /// Advances the window boundary and resets the counter exactly once
    /// per rollover, regardless of how many tasks observe it.
    fn roll_over(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            let elapsed = now.duration_since(self.window_start);
            let windows_passed = elapsed.as_nanos() / window.as_nanos().max(1);
            let advance = window * u32::try_from(windows_passed).unwrap_or(u32::MAX);
            self.window_start += advance;
            self.used = 0;
        }
    }
}
