use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Error;
use crate::gateway_util::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: String,
}

/// Create a checkout session for a price and hand back the provider's
/// redirect URL. The payment processor itself is an opaque collaborator.
pub async fn checkout_handler(
    State(state): AppState,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<Value>, Error> {
    let url = state.checkout.create_session(&request.price_id).await?;
    Ok(Json(json!({ "ok": true, "url": url })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway_util::{make_router, AppStateData};
    use crate::quota::{InMemoryQuotaStore, ManualClock};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> axum::Router {
        let state = AppStateData::new_with_parts(
            Arc::new(Config::default()),
            Arc::new(InMemoryQuotaStore::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        );
        make_router(state)
    }

    async fn checkout(price_id: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/payments/checkout")
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"priceId": "{price_id}"}}"#)))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_known_price_returns_redirect() {
        let (status, body) = checkout("price_premium_monthly").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(body["url"].as_str().unwrap().starts_with("https://"));
    }

    #[tokio::test]
    async fn test_unknown_price_is_400() {
        let (status, body) = checkout("price_gold").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("price_gold"));
    }
}
