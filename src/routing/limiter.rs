//! Admission control for the Cloud tier
//!
//! Three windows guard cloud spend: a sliding 60 s request window, a rolling
//! 24 h request window, and an accumulating USD budget for the current day.
//! Rejection is a normal outcome signalled to callers; this module never
//! returns an error.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum cloud requests in any sliding 60 s window
    pub max_per_minute: usize,
    /// Maximum cloud requests per 24 h window
    pub max_per_day: usize,
    /// Maximum cloud spend per 24 h window
    pub daily_budget_usd: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 60,
            max_per_day: 10_000,
            daily_budget_usd: 10.0,
        }
    }
}

/// Why admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    BudgetExceeded,
    PerMinuteExceeded,
    PerDayExceeded,
}

impl BlockReason {
    /// Stable label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::BudgetExceeded => "budget_exceeded",
            BlockReason::PerMinuteExceeded => "per_minute_exceeded",
            BlockReason::PerDayExceeded => "per_day_exceeded",
        }
    }
}

/// Snapshot of the limiter windows
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub requests_last_minute: usize,
    pub requests_today: usize,
    pub cost_today_usd: f64,
    pub max_per_minute: usize,
    pub max_per_day: usize,
    pub daily_budget_usd: f64,
    pub budget_remaining_usd: f64,
    pub requests_remaining_today: usize,
}

struct LimiterWindows {
    /// Timestamps of requests in the last minute; pruned on every read
    minute: VecDeque<Instant>,
    /// Count of requests in the current 24 h window
    today: usize,
    /// Accumulated spend in the current 24 h window
    daily_cost_usd: f64,
    /// Start of the current 24 h window
    last_reset: Instant,
}

impl LimiterWindows {
    fn new() -> Self {
        Self {
            minute: VecDeque::new(),
            today: 0,
            daily_cost_usd: 0.0,
            last_reset: Instant::now(),
        }
    }

    /// Daily counters and cost reset atomically once the window has rolled.
    fn reset_daily_if_needed(&mut self, now: Instant) {
        if now.duration_since(self.last_reset) > Duration::from_secs(86_400) {
            self.today = 0;
            self.daily_cost_usd = 0.0;
            self.last_reset = now;
        }
    }

    fn prune_minute(&mut self, now: Instant) {
        while let Some(front) = self.minute.front() {
            if now.duration_since(*front) >= Duration::from_secs(60) {
                self.minute.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-process admission control for cloud caption calls.
///
/// State mutates under a mutex; critical sections are bounded by the size of
/// the sliding minute window.
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<LimiterWindows>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(LimiterWindows::new()),
        }
    }

    /// Check whether a request with the given estimated cost may proceed.
    ///
    /// Inspection only: the window maintenance (daily reset, minute pruning)
    /// runs, but no request is counted until [`RateLimiter::record`].
    /// Checks run cheapest-to-block first: budget, then per-minute, then
    /// per-day.
    pub fn admit(&self, estimated_cost_usd: f64) -> Result<(), BlockReason> {
        let now = Instant::now();
        let mut w = self.windows.lock();
        w.reset_daily_if_needed(now);

        if w.daily_cost_usd + estimated_cost_usd > self.config.daily_budget_usd {
            return Err(BlockReason::BudgetExceeded);
        }

        w.prune_minute(now);
        if w.minute.len() >= self.config.max_per_minute {
            return Err(BlockReason::PerMinuteExceeded);
        }

        if w.today >= self.config.max_per_day {
            return Err(BlockReason::PerDayExceeded);
        }

        Ok(())
    }

    /// Record a request that actually executed. Must be called exactly once
    /// per admitted request.
    pub fn record(&self, actual_cost_usd: f64) {
        let now = Instant::now();
        let mut w = self.windows.lock();
        w.reset_daily_if_needed(now);
        w.minute.push_back(now);
        w.today += 1;
        w.daily_cost_usd += actual_cost_usd;
    }

    /// Snapshot of the current windows
    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut w = self.windows.lock();
        w.reset_daily_if_needed(now);
        w.prune_minute(now);

        RateLimiterStats {
            requests_last_minute: w.minute.len(),
            requests_today: w.today,
            cost_today_usd: w.daily_cost_usd,
            max_per_minute: self.config.max_per_minute,
            max_per_day: self.config.max_per_day,
            daily_budget_usd: self.config.daily_budget_usd,
            budget_remaining_usd: (self.config.daily_budget_usd - w.daily_cost_usd).max(0.0),
            requests_remaining_today: self.config.max_per_day.saturating_sub(w.today),
        }
    }
}
