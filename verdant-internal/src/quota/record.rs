use serde::{Deserialize, Serialize};

use crate::quota::Action;

pub const DAY_MS: u64 = 24 * 60 * 60 * 1_000;
pub const MONTH_MS: u64 = 30 * DAY_MS;
pub const RATE_WINDOW_MS: u64 = 60 * 1_000;

/// Per-fingerprint usage state. Created lazily on first request and rolled
/// over in place when a window expires; eviction is the store's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub count: u32,
    pub identify_count: u32,
    pub diagnose_count: u32,
    pub chat_count: u32,
    pub daily_spend: f64,
    pub monthly_spend: f64,
    /// Epoch millis when the daily window rolls over.
    pub reset_at: u64,
    /// Independent anchor for the monthly spend window. Deliberately not
    /// derived from `reset_at`: a daily timestamp used as a monthly proxy
    /// drifts by up to a day per cycle.
    pub monthly_reset_at: u64,
    pub last_action_at: u64,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

impl UsageRecord {
    pub fn new(now: u64) -> Self {
        Self {
            count: 0,
            identify_count: 0,
            diagnose_count: 0,
            chat_count: 0,
            daily_spend: 0.0,
            monthly_spend: 0.0,
            reset_at: now + DAY_MS,
            monthly_reset_at: now + MONTH_MS,
            last_action_at: 0,
            blocked: false,
            block_reason: None,
        }
    }

    /// Roll expired windows forward. Called exactly once per evaluation,
    /// before any check reads the record. Windows never roll backward.
    pub fn roll(&mut self, now: u64) {
        if now > self.reset_at {
            self.count = 0;
            self.identify_count = 0;
            self.diagnose_count = 0;
            self.chat_count = 0;
            self.daily_spend = 0.0;
            self.reset_at = now + DAY_MS;
        }
        if now > self.monthly_reset_at {
            self.monthly_spend = 0.0;
            self.monthly_reset_at = now + MONTH_MS;
        }
    }

    /// Apply an admitted commit. Bumps the aggregate count, the per-feature
    /// count, and both spend accruals together so a partial increment can
    /// never be observed, and clears any prior block marker.
    pub fn apply(&mut self, action: Action, cost: f64, now: u64) {
        self.count += 1;
        match action {
            Action::Identify => self.identify_count += 1,
            Action::Diagnose => self.diagnose_count += 1,
            Action::Chat => self.chat_count += 1,
            Action::Unknown => {}
        }
        self.daily_spend += cost;
        self.monthly_spend += cost;
        self.last_action_at = now;
        self.blocked = false;
        self.block_reason = None;
    }

    pub fn feature_count(&self, action: Action) -> u32 {
        match action {
            Action::Identify => self.identify_count,
            Action::Diagnose => self.diagnose_count,
            Action::Chat => self.chat_count,
            Action::Unknown => 0,
        }
    }
}

/// Requests-per-minute window, independent of the usage record. Bumped on
/// every evaluation, including check-only calls, since it protects against
/// abuse rather than metering quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: u64,
}

impl RateWindow {
    pub fn new(now: u64) -> Self {
        Self {
            count: 0,
            reset_at: now + RATE_WINDOW_MS,
        }
    }

    pub fn roll(&mut self, now: u64) {
        if now > self.reset_at {
            self.count = 0;
            self.reset_at = now + RATE_WINDOW_MS;
        }
    }
}
