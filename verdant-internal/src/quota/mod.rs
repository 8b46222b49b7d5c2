pub mod engine;
pub mod record;
pub mod redis_store;
pub mod store;

pub use engine::QuotaEngine;
pub use store::{InMemoryQuotaStore, QuotaStore, Versioned};

use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Limits, Tier};
use crate::quota::record::UsageRecord;

/// A metered feature action, or `Unknown` for pure status polling.
///
/// Malformed action strings are treated as `Unknown` rather than rejected so
/// clients can poll their usage without tripping quota checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    Identify,
    Diagnose,
    Chat,
    #[default]
    Unknown,
}

impl Action {
    pub fn parse(value: Option<&str>) -> Action {
        match value {
            Some("identify") => Action::Identify,
            Some("diagnose") => Action::Diagnose,
            Some("chat") => Action::Chat,
            _ => Action::Unknown,
        }
    }

    pub fn is_metered(&self) -> bool {
        !matches!(self, Action::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Identify => "identify",
            Action::Diagnose => "diagnose",
            Action::Chat => "chat",
            Action::Unknown => "unknown",
        }
    }
}

/// Why an evaluation was denied. Every variant is an expected, user-facing
/// outcome surfaced with an upgrade call-to-action, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RateLimitExceeded,
    IdentifyLimitExceeded,
    DiagnoseLimitExceeded,
    ChatLimitExceeded,
    DailyLimitExceeded,
    DailyCostLimitExceeded,
    MonthlyCostLimitExceeded,
    RateLimitCooldown,
}

impl DenyReason {
    pub fn feature_limit(action: Action) -> DenyReason {
        match action {
            Action::Identify => DenyReason::IdentifyLimitExceeded,
            Action::Diagnose => DenyReason::DiagnoseLimitExceeded,
            // `Unknown` never reaches the feature-cap check
            Action::Chat | Action::Unknown => DenyReason::ChatLimitExceeded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimitExceeded => "rate_limit_exceeded",
            DenyReason::IdentifyLimitExceeded => "identify_limit_exceeded",
            DenyReason::DiagnoseLimitExceeded => "diagnose_limit_exceeded",
            DenyReason::ChatLimitExceeded => "chat_limit_exceeded",
            DenyReason::DailyLimitExceeded => "daily_limit_exceeded",
            DenyReason::DailyCostLimitExceeded => "daily_cost_limit_exceeded",
            DenyReason::MonthlyCostLimitExceeded => "monthly_cost_limit_exceeded",
            DenyReason::RateLimitCooldown => "rate_limit_cooldown",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::RateLimitExceeded => {
                "You're sending requests too quickly. Please wait a minute and try again."
            }
            DenyReason::IdentifyLimitExceeded => {
                "You've used all of today's plant identifications. Upgrade for more."
            }
            DenyReason::DiagnoseLimitExceeded => {
                "You've used all of today's plant diagnoses. Upgrade for more."
            }
            DenyReason::ChatLimitExceeded => {
                "You've used all of today's plant care chats. Upgrade for more."
            }
            DenyReason::DailyLimitExceeded => {
                "You've reached today's usage limit. Upgrade for a higher daily quota."
            }
            DenyReason::DailyCostLimitExceeded => {
                "You've reached today's usage budget. Upgrade for a higher daily budget."
            }
            DenyReason::MonthlyCostLimitExceeded => {
                "You've reached this month's usage budget. Upgrade for a higher monthly budget."
            }
            DenyReason::RateLimitCooldown => {
                "Please wait a moment between requests. Upgrade for shorter cooldowns."
            }
        }
    }
}

/// Rate-window state echoed on every response as `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,               // Unix timestamp (seconds)
    pub retry_after: Option<u64>, // Seconds
}

impl RateInfo {
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        // Numeric-to-string conversions always produce valid header values.
        if let Ok(value) = HeaderValue::from_str(&self.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.reset.to_string()) {
            headers.insert("X-RateLimit-Reset", value);
        }

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert("Retry-After", value);
            }
        }

        headers
    }
}

/// The client-facing view of a usage record, shaped for the wire.
///
/// Always reflects state *after* any window rollover, and after the increment
/// when a committing evaluation was admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub count: u32,
    pub limit: u32,
    pub reset_at: u64,
    pub tier: Tier,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub remaining: u32,
    pub identify_count: u32,
    pub diagnose_count: u32,
    pub chat_count: u32,
    pub identify_limit: u32,
    pub diagnose_limit: u32,
    pub chat_limit: u32,
    pub upgrade_available: bool,
}

impl UsageSnapshot {
    pub fn project(
        record: &UsageRecord,
        tier: Tier,
        limits: &Limits,
        reason: Option<DenyReason>,
    ) -> Self {
        Self {
            count: record.count,
            limit: limits.daily_count,
            reset_at: record.reset_at,
            tier,
            blocked: reason.is_some() || record.blocked,
            block_reason: reason
                .map(|r| r.as_str().to_string())
                .or_else(|| record.block_reason.clone()),
            daily_spend: record.daily_spend,
            monthly_spend: record.monthly_spend,
            remaining: limits.daily_count.saturating_sub(record.count),
            identify_count: record.identify_count,
            diagnose_count: record.diagnose_count,
            chat_count: record.chat_count,
            identify_limit: limits.features.identify,
            diagnose_limit: limits.features.diagnose,
            chat_limit: limits.features.chat,
            upgrade_available: tier.upgrade_available(),
        }
    }
}

/// Result of a quota evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub admitted: bool,
    pub reason: Option<DenyReason>,
    pub usage: UsageSnapshot,
    pub rate: RateInfo,
}

impl Decision {
    pub fn admit(usage: UsageSnapshot, rate: RateInfo) -> Self {
        Self {
            admitted: true,
            reason: None,
            usage,
            rate,
        }
    }

    pub fn deny(reason: DenyReason, usage: UsageSnapshot, rate: RateInfo) -> Self {
        Self {
            admitted: false,
            reason: Some(reason),
            usage,
            rate,
        }
    }
}

/// Metrics for quota engine performance monitoring
#[derive(Debug, Default)]
pub struct QuotaMetrics {
    pub admitted: AtomicU64,
    pub denied: AtomicU64,
    pub rate_limited: AtomicU64,
    pub cas_retries: AtomicU64,
}

impl QuotaMetrics {
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Time source for the engine. Evaluations take "now" from here so tests can
/// drive window rollover and cooldowns without sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    /// Returns 0 if system time is before UNIX_EPOCH (extremely rare).
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock(AtomicU64);

#[cfg(test)]
impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(AtomicU64::new(start_ms))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
