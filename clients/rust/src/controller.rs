use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::Error;

/// A metered feature the app can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Identify,
    Diagnose,
    Chat,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Identify => "identify",
            Feature::Diagnose => "diagnose",
            Feature::Chat => "chat",
        }
    }
}

/// The gateway's usage snapshot, as returned in every `/usage` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub count: u32,
    pub limit: u32,
    pub reset_at: u64,
    pub tier: String,
    pub blocked: bool,
    #[serde(default)]
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

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub base_url: String,
    /// Calls to the gateway are never allowed to stall a UI action; anything
    /// slower than this is treated as "cannot verify".
    pub request_timeout: Duration,
    /// How many consecutive unverified calls a paid tier may make while the
    /// gateway is unreachable.
    pub paid_failure_allowance: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(3),
            paid_failure_allowance: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Identity {
    user_id: Option<String>,
    token: Option<String>,
}

struct EvaluateOutcome {
    admitted: bool,
    usage: UsageSnapshot,
}

/// Client-side usage orchestration.
///
/// A metered action must never execute without a prior successful admission
/// check, and every completed action is reported back as a commit. The last
/// usage snapshot the gateway returned is cached for presentation
/// (`upgrade_message`, `remaining_time`) with no further network calls.
pub struct UsageController {
    http: reqwest::Client,
    config: ControllerConfig,
    identity: RwLock<Identity>,
    cached: RwLock<Option<UsageSnapshot>>,
    benefit_used: AtomicBool,
    unverified_calls: AtomicU32,
}

impl UsageController {
    pub fn new(config: ControllerConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            identity: RwLock::new(Identity::default()),
            cached: RwLock::new(None),
            benefit_used: AtomicBool::new(false),
            unverified_calls: AtomicU32::new(0),
        })
    }

    /// Swap credentials (login/logout) and refresh the cached snapshot for
    /// the new identity. A failed refresh leaves the cache empty rather than
    /// showing the previous user's usage.
    pub async fn set_identity(&self, user_id: Option<String>, token: Option<String>) {
        {
            // A poisoned RwLock means another thread panicked while holding it;
            // not recoverable.
            #[expect(clippy::expect_used)]
            let mut identity = self.identity.write().expect("RwLock poisoned");
            *identity = Identity { user_id, token };
        }
        self.store_snapshot(None);
        self.benefit_used.store(false, Ordering::Relaxed);
        self.unverified_calls.store(0, Ordering::Relaxed);

        if let Err(e) = self.refresh().await {
            debug!("Snapshot refresh after identity change failed: {e}");
        }
    }

    pub async fn clear_identity(&self) {
        self.set_identity(None, None).await;
    }

    /// Status poll (no action, check-only). Call on mount so presentation
    /// helpers have a snapshot to work from.
    pub async fn refresh(&self) -> Result<UsageSnapshot, Error> {
        let outcome = self.evaluate(None, true).await?;
        Ok(outcome.usage)
    }

    /// Check-only admission query for a feature. Returns whether the metered
    /// action may proceed.
    ///
    /// Degraded mode, when the gateway cannot be reached (timeout, network,
    /// or parse failure): the free tier fails *closed* once any prior usage
    /// is on record, with exactly one benefit-of-the-doubt allowance while no
    /// usage is known at all; paid tiers get a bounded allowance of
    /// `paid_failure_allowance` consecutive unverified calls.
    pub async fn can_use_feature(&self, feature: Feature) -> bool {
        match self.evaluate(Some(feature), true).await {
            Ok(outcome) => {
                self.unverified_calls.store(0, Ordering::Relaxed);
                outcome.admitted
            }
            Err(e) => {
                warn!(
                    feature = feature.as_str(),
                    "Usage check failed, applying degraded-mode policy: {e}"
                );
                self.degraded_allow()
            }
        }
    }

    /// Report a completed action as a committing evaluation. Returns whether
    /// the commit was accepted. A failure here never retroactively blocks
    /// the user from the result they already received, but it is logged.
    pub async fn track_usage(&self, feature: Feature) -> bool {
        match self.evaluate(Some(feature), false).await {
            Ok(outcome) => {
                if !outcome.admitted {
                    warn!(
                        feature = feature.as_str(),
                        reason = outcome.usage.block_reason.as_deref().unwrap_or("unknown"),
                        "Usage commit was denied after the action already completed"
                    );
                }
                outcome.admitted
            }
            Err(e) => {
                warn!(
                    feature = feature.as_str(),
                    "Failed to report completed usage: {e}"
                );
                false
            }
        }
    }

    /// The last snapshot the gateway returned, if any.
    pub fn last_snapshot(&self) -> Option<UsageSnapshot> {
        #[expect(clippy::expect_used)]
        let cached = self.cached.read().expect("RwLock poisoned");
        cached.clone()
    }

    /// Upgrade prompt copy derived from the cached snapshot. No network.
    pub fn upgrade_message(&self) -> Option<String> {
        let snapshot = self.last_snapshot()?;
        if !snapshot.blocked {
            return None;
        }

        let base = match snapshot.block_reason.as_deref() {
            Some("rate_limit_exceeded") => "You're going too fast. Give it a minute.",
            Some("identify_limit_exceeded") => "You're out of plant identifications for today.",
            Some("diagnose_limit_exceeded") => "You're out of plant diagnoses for today.",
            Some("chat_limit_exceeded") => "You're out of plant care chats for today.",
            Some("daily_limit_exceeded") => "You've reached today's usage limit.",
            Some("daily_cost_limit_exceeded") => "You've reached today's usage budget.",
            Some("monthly_cost_limit_exceeded") => "You've reached this month's usage budget.",
            Some("rate_limit_cooldown") => "Give your plants a moment to breathe.",
            _ => "You've reached your current plan's limit.",
        };

        if snapshot.upgrade_available {
            Some(format!("{base} Upgrade for more."))
        } else {
            Some(base.to_string())
        }
    }

    /// Time until the daily window rolls over, derived from the cached
    /// snapshot. No network.
    pub fn remaining_time(&self) -> Option<Duration> {
        let snapshot = self.last_snapshot()?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_millis() as u64;
        Some(Duration::from_millis(
            snapshot.reset_at.saturating_sub(now_ms),
        ))
    }

    async fn evaluate(
        &self,
        feature: Option<Feature>,
        check_only: bool,
    ) -> Result<EvaluateOutcome, Error> {
        #[expect(clippy::expect_used)]
        let identity = self.identity.read().expect("RwLock poisoned").clone();

        let url = format!("{}/usage", self.config.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({ "checkOnly": check_only });
        if let Some(feature) = feature {
            body["action"] = feature.as_str().into();
        }

        let mut request = self.http.post(url).json(&body);
        if let Some(user_id) = &identity.user_id {
            request = request.header("x-user-id", user_id.as_str());
        }
        if let Some(token) = &identity.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let payload: serde_json::Value = response.json().await?;

        let admitted = match status {
            200 => true,
            403 | 429 => false,
            code => return Err(Error::UnexpectedStatus(code)),
        };

        let usage_value = payload
            .get("usage")
            .cloned()
            .ok_or_else(|| Error::Parse("response is missing the usage object".to_string()))?;
        let usage: UsageSnapshot =
            serde_json::from_value(usage_value).map_err(|e| Error::Parse(e.to_string()))?;

        self.store_snapshot(Some(usage.clone()));
        Ok(EvaluateOutcome { admitted, usage })
    }

    fn store_snapshot(&self, snapshot: Option<UsageSnapshot>) {
        #[expect(clippy::expect_used)]
        let mut cached = self.cached.write().expect("RwLock poisoned");
        *cached = snapshot;
    }

    fn degraded_allow(&self) -> bool {
        let snapshot = self.last_snapshot();
        let paid = snapshot.as_ref().is_some_and(|s| s.tier != "free");

        if paid {
            self.unverified_calls.fetch_add(1, Ordering::Relaxed)
                < self.config.paid_failure_allowance
        } else if snapshot.is_some_and(|s| s.count > 0) {
            // Prior usage is on record: fail closed.
            false
        } else {
            // No usage known yet: exactly one benefit-of-the-doubt call.
            !self.benefit_used.swap(true, Ordering::Relaxed)
        }
    }
}
