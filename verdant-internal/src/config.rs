use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{Error, ErrorDetails};
use crate::quota::Action;

/// Service level governing quota generosity.
///
/// The effective tier is resolved server-side from the authenticated session's
/// subscription state (see `endpoints::usage::resolve_tier`). The `x-tier`
/// header is only honored when `gateway.trust_client_tier` is set, which is a
/// non-production escape hatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Enterprise,
}

impl Tier {
    /// Unrecognized values map to `Free`, never to a more permissive tier.
    pub fn parse(value: &str) -> Tier {
        match value.to_ascii_lowercase().as_str() {
            "premium" => Tier::Premium,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn upgrade_available(&self) -> bool {
        *self != Tier::Enterprise
    }
}

/// Daily cap per metered feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureLimits {
    pub identify: u32,
    pub diagnose: u32,
    pub chat: u32,
}

impl FeatureLimits {
    pub fn cap(&self, action: Action) -> u32 {
        match action {
            Action::Identify => self.identify,
            Action::Diagnose => self.diagnose,
            Action::Chat => self.chat,
            Action::Unknown => u32::MAX,
        }
    }
}

/// Static per-tier quota configuration, loaded at startup.
///
/// `monthly_count` is carried in configuration but the admission algorithm
/// enforces monthly *cost* only; the field exists so operators can see the
/// full tier sheet in one place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub daily_count: u32,
    pub monthly_count: u32,
    pub daily_cost_ceiling: f64,
    pub monthly_cost_ceiling: f64,
    pub requests_per_minute: u32,
    pub cooldown_ms: u64,
    pub features: FeatureLimits,
}

fn default_free_limits() -> Limits {
    Limits {
        daily_count: 10,
        monthly_count: 150,
        daily_cost_ceiling: 0.50,
        monthly_cost_ceiling: 5.00,
        requests_per_minute: 3,
        cooldown_ms: 10_000,
        features: FeatureLimits {
            identify: 5,
            diagnose: 3,
            chat: 5,
        },
    }
}

fn default_premium_limits() -> Limits {
    Limits {
        daily_count: 50,
        monthly_count: 1_000,
        daily_cost_ceiling: 5.00,
        monthly_cost_ceiling: 50.00,
        requests_per_minute: 20,
        cooldown_ms: 3_000,
        features: FeatureLimits {
            identify: 30,
            diagnose: 20,
            chat: 50,
        },
    }
}

fn default_enterprise_limits() -> Limits {
    Limits {
        daily_count: 100,
        monthly_count: 3_000,
        daily_cost_ceiling: 20.00,
        monthly_cost_ceiling: 200.00,
        requests_per_minute: 60,
        cooldown_ms: 1_000,
        features: FeatureLimits {
            identify: 100,
            diagnose: 100,
            chat: 100,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsTable {
    pub free: Limits,
    pub premium: Limits,
    pub enterprise: Limits,
}

impl Default for LimitsTable {
    fn default() -> Self {
        Self {
            free: default_free_limits(),
            premium: default_premium_limits(),
            enterprise: default_enterprise_limits(),
        }
    }
}

impl LimitsTable {
    pub fn for_tier(&self, tier: Tier) -> Limits {
        match tier {
            Tier::Free => self.free,
            Tier::Premium => self.premium,
            Tier::Enterprise => self.enterprise,
        }
    }
}

/// Simulated marginal cost of each metered action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTable {
    pub identify: f64,
    pub diagnose: f64,
    pub chat: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            identify: 0.02,
            diagnose: 0.03,
            chat: 0.01,
        }
    }
}

impl CostTable {
    pub fn for_action(&self, action: Action) -> f64 {
        match action {
            Action::Identify => self.identify,
            Action::Diagnose => self.diagnose,
            Action::Chat => self.chat,
            Action::Unknown => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub limits: LimitsTable,
    pub costs: CostTable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,

    /// Honor the client-supplied `x-tier` header when no authenticated session
    /// resolves a tier. The header is unauthenticated, so any caller could
    /// claim `enterprise`; production deployments must leave this off.
    pub trust_client_tier: bool,

    pub debug: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    /// How often the in-memory store sweeps out expired entries.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Price identifier -> checkout redirect URL.
    pub prices: HashMap<String, String>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        let mut prices = HashMap::new();
        prices.insert(
            "price_premium_monthly".to_string(),
            "https://checkout.example.com/session/premium-monthly".to_string(),
        );
        prices.insert(
            "price_premium_yearly".to_string(),
            "https://checkout.example.com/session/premium-yearly".to_string(),
        );
        prices.insert(
            "price_enterprise_monthly".to_string(),
            "https://checkout.example.com/session/enterprise-monthly".to_string(),
        );
        Self { prices }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub quota: QuotaConfig,
    pub store: StoreConfig,
    pub payments: PaymentsConfig,
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Config, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file {}: {e}", path.display()),
            })
        })?;
        toml::from_str(&contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config file {}: {e}", path.display()),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_defaults_to_free() {
        assert_eq!(Tier::parse("premium"), Tier::Premium);
        assert_eq!(Tier::parse("ENTERPRISE"), Tier::Enterprise);
        assert_eq!(Tier::parse("platinum"), Tier::Free);
        assert_eq!(Tier::parse(""), Tier::Free);
    }

    #[test]
    fn test_default_limits_table() {
        let table = LimitsTable::default();
        assert_eq!(table.free.features.identify, 5);
        assert_eq!(table.free.requests_per_minute, 3);
        assert_eq!(table.free.cooldown_ms, 10_000);
        assert_eq!(table.premium.cooldown_ms, 3_000);
        assert_eq!(table.enterprise.daily_count, 100);
        assert_eq!(table.enterprise.cooldown_ms, 1_000);
    }

    #[test]
    fn test_cost_table_for_action() {
        let costs = CostTable::default();
        assert_eq!(costs.for_action(Action::Identify), 0.02);
        assert_eq!(costs.for_action(Action::Unknown), 0.0);
    }

    #[test]
    fn test_partial_config_parse() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            trust_client_tier = true

            [quota.limits.free]
            daily_count = 3
            monthly_count = 30
            daily_cost_ceiling = 0.10
            monthly_cost_ceiling = 1.0
            requests_per_minute = 2
            cooldown_ms = 500
            features = { identify = 2, diagnose = 1, chat = 1 }
            "#,
        )
        .unwrap();

        assert!(config.gateway.trust_client_tier);
        assert_eq!(config.quota.limits.free.daily_count, 3);
        // Unspecified tiers keep their defaults
        assert_eq!(config.quota.limits.premium.daily_count, 50);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_empty_config_is_complete() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!config.gateway.trust_client_tier);
        assert_eq!(config.quota.limits.free.daily_count, 10);
        assert!(config.payments.prices.contains_key("price_premium_monthly"));
    }
}
