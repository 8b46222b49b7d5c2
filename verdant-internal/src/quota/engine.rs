use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{CostTable, Limits, QuotaConfig, Tier};
use crate::error::{Error, ErrorDetails};
use crate::quota::record::{RateWindow, UsageRecord};
use crate::quota::store::QuotaStore;
use crate::quota::{Action, Clock, Decision, DenyReason, QuotaMetrics, RateInfo, UsageSnapshot};

/// Usage records must outlive the monthly spend window.
const USAGE_TTL: Duration = Duration::from_secs(35 * 24 * 60 * 60);
const RATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Bounded optimistic-retry budget per evaluation. Contention on a single
/// fingerprint resolves in one or two rounds; hitting the bound means the
/// store is misbehaving.
const MAX_CAS_ATTEMPTS: u32 = 16;

fn usage_key(fingerprint: &str) -> String {
    format!("usage:{fingerprint}")
}

fn rate_key(fingerprint: &str) -> String {
    format!("rate:{fingerprint}")
}

fn encode<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|e| {
        Error::new(ErrorDetails::Serialization {
            message: format!("Failed to encode quota record: {e}"),
        })
    })
}

fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, Error> {
    serde_json::from_str(payload).map_err(|e| {
        Error::new(ErrorDetails::Serialization {
            message: format!("Failed to decode quota record: {e}"),
        })
    })
}

/// Tiered quota engine.
///
/// Stateless per invocation: all shared state lives behind the store port,
/// and every read-check-increment runs as an optimistic compare-and-swap
/// loop, so concurrent evaluations for one fingerprint can never both pass
/// an admission check with only one increment of quota remaining.
pub struct QuotaEngine {
    store: Arc<dyn QuotaStore>,
    quotas: ArcSwap<QuotaConfig>,
    clock: Arc<dyn Clock>,
    metrics: QuotaMetrics,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn QuotaStore>, quotas: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            quotas: ArcSwap::from_pointee(quotas),
            clock,
            metrics: QuotaMetrics::default(),
        }
    }

    /// Hot-swap the tier limits and cost table.
    pub fn update_quotas(&self, quotas: QuotaConfig) {
        self.quotas.store(Arc::new(quotas));
    }

    pub fn metrics(&self) -> &QuotaMetrics {
        &self.metrics
    }

    /// Decide admission for one request and, if `commit` and admitted,
    /// atomically apply the usage increment.
    ///
    /// The returned snapshot always reflects state after any window rollover,
    /// and after the increment on a committed admit.
    pub async fn evaluate(
        &self,
        fingerprint: &str,
        tier: Tier,
        action: Action,
        commit: bool,
    ) -> Result<Decision, Error> {
        let now = self.clock.now_ms();
        let quotas = self.quotas.load_full();
        let limits = quotas.limits.for_tier(tier);

        // The rate window counts every evaluation, check-only included: it is
        // abuse protection, not quota, and it short-circuits all other checks.
        let window = self.bump_rate_window(fingerprint, now).await?;
        let rpm = limits.requests_per_minute;
        if window.count > rpm {
            self.metrics.record_rate_limited();
            let record = self.peek_record(fingerprint, now).await?;
            let retry_after = (window.reset_at.saturating_sub(now)).div_ceil(1_000);
            let rate = RateInfo {
                limit: rpm,
                remaining: 0,
                reset: window.reset_at / 1_000,
                retry_after: Some(retry_after),
            };
            let usage =
                UsageSnapshot::project(&record, tier, &limits, Some(DenyReason::RateLimitExceeded));
            return Ok(Decision::deny(DenyReason::RateLimitExceeded, usage, rate));
        }

        let rate = RateInfo {
            limit: rpm,
            remaining: rpm.saturating_sub(window.count),
            reset: window.reset_at / 1_000,
            retry_after: None,
        };

        let key = usage_key(fingerprint);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let stored = self.store.get(&key).await?;
            let (expected, mut record) = match &stored {
                Some(versioned) => (Some(versioned.version), decode(&versioned.payload)?),
                None => (None, UsageRecord::new(now)),
            };
            record.roll(now);

            match check_admission(&record, &limits, &quotas.costs, action, now) {
                Ok(()) => {
                    if commit && action.is_metered() {
                        record.apply(action, quotas.costs.for_action(action), now);
                        if !self
                            .store
                            .compare_and_swap(&key, expected, encode(&record)?, USAGE_TTL)
                            .await?
                        {
                            // Lost the race: someone else committed first.
                            // Reload and re-run the admission checks.
                            self.metrics.record_cas_retry();
                            continue;
                        }
                    }
                    self.metrics.record_admitted();
                    let usage = UsageSnapshot::project(&record, tier, &limits, None);
                    return Ok(Decision::admit(usage, rate));
                }
                Err(reason) => {
                    if commit {
                        // Informational marker only; losing this write to a
                        // concurrent commit is harmless.
                        record.blocked = true;
                        record.block_reason = Some(reason.as_str().to_string());
                        let marked = self
                            .store
                            .compare_and_swap(&key, expected, encode(&record)?, USAGE_TTL)
                            .await?;
                        if !marked {
                            debug!(fingerprint, "Lost block-marker write to a concurrent commit");
                        }
                    }
                    self.metrics.record_denied();
                    let usage = UsageSnapshot::project(&record, tier, &limits, Some(reason));
                    return Ok(Decision::deny(reason, usage, rate));
                }
            }
        }

        Err(Error::new(ErrorDetails::StoreContention { key }))
    }

    /// Increment the 1-minute window for this fingerprint and return it.
    async fn bump_rate_window(&self, fingerprint: &str, now: u64) -> Result<RateWindow, Error> {
        let key = rate_key(fingerprint);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let stored = self.store.get(&key).await?;
            let (expected, mut window) = match &stored {
                Some(versioned) => (Some(versioned.version), decode(&versioned.payload)?),
                None => (None, RateWindow::new(now)),
            };
            window.roll(now);
            window.count += 1;

            if self
                .store
                .compare_and_swap(&key, expected, encode(&window)?, RATE_TTL)
                .await?
            {
                return Ok(window);
            }
            self.metrics.record_cas_retry();
        }

        Err(Error::new(ErrorDetails::StoreContention { key }))
    }

    /// Read the usage record rolled to the current windows, without writing.
    async fn peek_record(&self, fingerprint: &str, now: u64) -> Result<UsageRecord, Error> {
        let mut record = match self.store.get(&usage_key(fingerprint)).await? {
            Some(versioned) => decode(&versioned.payload)?,
            None => UsageRecord::new(now),
        };
        record.roll(now);
        Ok(record)
    }
}

/// The fixed admission order. The first failing check wins; the rate window
/// has already been checked (and short-circuits) before this runs.
fn check_admission(
    record: &UsageRecord,
    limits: &Limits,
    costs: &CostTable,
    action: Action,
    now: u64,
) -> Result<(), DenyReason> {
    if action.is_metered() {
        if record.feature_count(action) >= limits.features.cap(action) {
            return Err(DenyReason::feature_limit(action));
        }
        if record.count >= limits.daily_count {
            return Err(DenyReason::DailyLimitExceeded);
        }
        let cost = costs.for_action(action);
        if record.daily_spend + cost > limits.daily_cost_ceiling {
            return Err(DenyReason::DailyCostLimitExceeded);
        }
        if record.monthly_spend + cost > limits.monthly_cost_ceiling {
            return Err(DenyReason::MonthlyCostLimitExceeded);
        }
    }

    // `last_action_at == 0` means no committed action yet; manual test clocks
    // can sit close to the epoch, so don't treat 0 as a real timestamp.
    if record.last_action_at > 0 && now.saturating_sub(record.last_action_at) < limits.cooldown_ms {
        return Err(DenyReason::RateLimitCooldown);
    }

    Ok(())
}
