use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::PaymentsConfig;
use crate::error::{Error, ErrorDetails};

/// Opaque checkout-session-creation collaborator. The gateway only needs a
/// redirect URL back; everything else about the payment processor is outside
/// this service.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(&self, price_id: &str) -> Result<String, Error>;
}

/// Provider backed by the configured price table. Stands in for a hosted
/// checkout API while keeping the handler contract identical.
pub struct StaticCheckoutProvider {
    prices: HashMap<String, String>,
}

impl StaticCheckoutProvider {
    pub fn new(config: &PaymentsConfig) -> Self {
        Self {
            prices: config.prices.clone(),
        }
    }
}

#[async_trait]
impl CheckoutProvider for StaticCheckoutProvider {
    async fn create_session(&self, price_id: &str) -> Result<String, Error> {
        self.prices.get(price_id).cloned().ok_or_else(|| {
            Error::new(ErrorDetails::UnknownPrice {
                price_id: price_id.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_price_returns_redirect_url() {
        let provider = StaticCheckoutProvider::new(&PaymentsConfig::default());
        let url = provider.create_session("price_premium_monthly").await.unwrap();
        assert!(url.starts_with("https://"));
    }

    #[tokio::test]
    async fn test_unknown_price_is_rejected() {
        let provider = StaticCheckoutProvider::new(&PaymentsConfig::default());
        let err = provider.create_session("price_gold").await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
