use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::auth::bearer_token;
use crate::config::Tier;
use crate::fingerprint::Fingerprint;
use crate::gateway_util::{AppState, AppStateData};
use crate::quota::{Action, Decision, DenyReason};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageRequest {
    pub action: Option<String>,
    pub check_only: bool,
}

/// `POST /usage` — the single quota evaluation endpoint.
///
/// Check-only requests (`checkOnly: true`) are dry runs; everything else
/// commits. An absent or unparseable body degrades to a pure status check so
/// clients can poll their usage without a well-formed payload.
pub async fn usage_handler(
    State(state): AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = parse_request(&body);
    let fingerprint = Fingerprint::from_headers(&headers);
    let tier = resolve_tier(&state, &headers);
    let action = Action::parse(request.action.as_deref());

    match state
        .engine
        .evaluate(fingerprint.as_key(), tier, action, !request.check_only)
        .await
    {
        Ok(decision) => usage_response(decision),
        Err(e) => with_no_store(e.into_response()),
    }
}

fn parse_request(body: &[u8]) -> UsageRequest {
    if body.is_empty() {
        return UsageRequest::default();
    }
    match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable usage request body, treating as status check: {e}");
            UsageRequest::default()
        }
    }
}

/// Resolve the effective tier for a request.
///
/// The authenticated session's subscription state is authoritative. The
/// client-supplied `x-tier` header is consulted only when
/// `gateway.trust_client_tier` is enabled (test/dev mode); anonymous callers
/// are `free`.
fn resolve_tier(state: &AppStateData, headers: &HeaderMap) -> Tier {
    if let Some(token) = bearer_token(headers) {
        if let Some(session) = state.auth.session_for_token(token) {
            return session.tier;
        }
    }

    if state.config.gateway.trust_client_tier {
        if let Some(claimed) = headers.get("x-tier").and_then(|v| v.to_str().ok()) {
            return Tier::parse(claimed);
        }
    }

    Tier::Free
}

fn usage_response(decision: Decision) -> Response {
    let rate_headers = decision.rate.to_header_map();

    let mut response = match decision.reason {
        None => (
            StatusCode::OK,
            Json(json!({ "ok": true, "usage": decision.usage })),
        )
            .into_response(),
        Some(DenyReason::RateLimitExceeded) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "ok": false,
                "error": DenyReason::RateLimitExceeded.as_str(),
                "message": DenyReason::RateLimitExceeded.message(),
                "usage": decision.usage,
            })),
        )
            .into_response(),
        Some(reason) => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "ok": false,
                "message": reason.message(),
                "usage": decision.usage,
            })),
        )
            .into_response(),
    };

    response.headers_mut().extend(rate_headers);
    with_no_store(response)
}

/// Usage state must never be cached by intermediaries.
fn with_no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway_util::make_router;
    use crate::quota::{Clock, InMemoryQuotaStore, ManualClock};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    const T0: u64 = 1_700_000_000_000;

    struct TestGateway {
        router: Router,
        state: AppStateData,
        clock: Arc<ManualClock>,
    }

    fn gateway_with_config(config: Config) -> TestGateway {
        let clock = Arc::new(ManualClock::new(T0));
        let state = AppStateData::new_with_parts(
            Arc::new(config),
            Arc::new(InMemoryQuotaStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        TestGateway {
            router: make_router(state.clone()),
            state,
            clock,
        }
    }

    fn gateway() -> TestGateway {
        gateway_with_config(Config::default())
    }

    fn usage_request(body: &str, extra_headers: &[(&'static str, &str)]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/usage")
            .header("content-type", "application/json")
            .header("x-user-id", "user-1")
            .header("x-forwarded-for", "203.0.113.9")
            .header("user-agent", "Verdant/3.2 (iOS 17)");
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(gateway: &TestGateway, request: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = gateway.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_fresh_commit_admits_with_usage_snapshot() {
        let gateway = gateway();
        let (status, headers, body) = send(
            &gateway,
            usage_request(r#"{"action": "identify"}"#, &[]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["usage"]["count"], 1);
        assert_eq!(body["usage"]["identifyCount"], 1);
        assert_eq!(body["usage"]["tier"], "free");
        assert_eq!(body["usage"]["limit"], 10);
        assert_eq!(body["usage"]["remaining"], 9);
        assert_eq!(body["usage"]["upgradeAvailable"], true);
        assert_eq!(headers["cache-control"], "no-store");
        assert_eq!(headers["x-ratelimit-limit"], "3");
    }

    #[tokio::test]
    async fn test_check_only_does_not_increment() {
        let gateway = gateway();

        for _ in 0..2 {
            let (status, _, body) = send(
                &gateway,
                usage_request(r#"{"action": "identify", "checkOnly": true}"#, &[]),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["usage"]["count"], 0);
            assert_eq!(body["usage"]["identifyCount"], 0);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_with_retry_after() {
        // Free tier allows 3 requests per minute; the 4th within the same
        // second is rejected with 429 regardless of checkOnly.
        let gateway = gateway();

        for _ in 0..3 {
            let (status, _, _) = send(
                &gateway,
                usage_request(r#"{"checkOnly": true}"#, &[]),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, headers, body) = send(
            &gateway,
            usage_request(r#"{"checkOnly": true}"#, &[]),
        )
        .await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert!(body["message"].as_str().unwrap().contains("wait"));
        assert!(headers.contains_key("retry-after"));
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["cache-control"], "no-store");
    }

    #[tokio::test]
    async fn test_feature_exhaustion_returns_403_with_upgrade_message() {
        let gateway = gateway();

        for i in 0..5 {
            let (status, _, _) = send(
                &gateway,
                usage_request(r#"{"action": "identify"}"#, &[]),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "identify commit {i} should admit");
            gateway.clock.advance(25_000);
        }

        let (status, headers, body) = send(
            &gateway,
            usage_request(r#"{"action": "identify"}"#, &[]),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["ok"], false);
        assert!(body["message"].as_str().unwrap().contains("Upgrade"));
        assert_eq!(body["usage"]["blocked"], true);
        assert_eq!(body["usage"]["blockReason"], "identify_limit_exceeded");
        assert_eq!(headers["cache-control"], "no-store");
    }

    #[tokio::test]
    async fn test_client_tier_header_is_ignored_by_default() {
        let gateway = gateway();
        let (_, _, body) = send(
            &gateway,
            usage_request(
                r#"{"checkOnly": true}"#,
                &[("x-tier", "enterprise")],
            ),
        )
        .await;

        // Free limits apply despite the claimed tier
        assert_eq!(body["usage"]["tier"], "free");
        assert_eq!(body["usage"]["limit"], 10);
    }

    #[tokio::test]
    async fn test_client_tier_header_honored_in_trust_mode() {
        let mut config = Config::default();
        config.gateway.trust_client_tier = true;
        let gateway = gateway_with_config(config);

        let (_, _, body) = send(
            &gateway,
            usage_request(
                r#"{"checkOnly": true}"#,
                &[("x-tier", "enterprise")],
            ),
        )
        .await;
        assert_eq!(body["usage"]["tier"], "enterprise");
        assert_eq!(body["usage"]["limit"], 100);

        // Unrecognized tiers never escalate
        let (_, _, body) = send(
            &gateway,
            usage_request(r#"{"checkOnly": true}"#, &[("x-tier", "platinum")]),
        )
        .await;
        assert_eq!(body["usage"]["tier"], "free");
    }

    #[tokio::test]
    async fn test_session_tier_overrides_client_header() {
        let gateway = gateway();
        let issued = gateway
            .state
            .auth
            .signup("grower@example.com", &secrecy::SecretString::from("longenough".to_string()))
            .unwrap();
        gateway
            .state
            .auth
            .set_tier("grower@example.com", Tier::Premium);

        let bearer = format!("Bearer {}", issued.token);
        let (_, _, body) = send(
            &gateway,
            usage_request(
                r#"{"checkOnly": true}"#,
                &[("authorization", bearer.as_str()), ("x-tier", "enterprise")],
            ),
        )
        .await;

        // The authenticated subscription wins over the header claim
        assert_eq!(body["usage"]["tier"], "premium");
        assert_eq!(body["usage"]["limit"], 50);
    }

    #[tokio::test]
    async fn test_stale_daily_window_resets_in_snapshot() {
        let gateway = gateway();
        send(&gateway, usage_request(r#"{"action": "chat"}"#, &[])).await;

        gateway.clock.advance(25 * 60 * 60 * 1_000);

        let (_, _, body) = send(
            &gateway,
            usage_request(r#"{"checkOnly": true}"#, &[]),
        )
        .await;
        assert_eq!(body["usage"]["count"], 0);
        assert_eq!(body["usage"]["chatCount"], 0);
        assert_eq!(body["usage"]["dailySpend"], 0.0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_status_check() {
        let gateway = gateway();
        let (status, _, body) = send(&gateway, usage_request("{not json", &[])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["usage"]["count"], 0);
    }

    #[tokio::test]
    async fn test_unrecognized_action_is_a_status_check() {
        let gateway = gateway();
        let (status, _, body) = send(
            &gateway,
            usage_request(r#"{"action": "water_plants"}"#, &[]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["usage"]["count"], 0);
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let gateway = gateway();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/usage")
            .header("origin", "https://app.verdant.example")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type,x-user-id")
            .body(Body::empty())
            .unwrap();

        let response = gateway.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert!(headers.contains_key("access-control-allow-methods"));
        assert!(headers.contains_key("access-control-allow-headers"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let gateway = gateway();
        let request = Request::builder()
            .method("POST")
            .uri("/identify-plant")
            .body(Body::empty())
            .unwrap();

        let response = gateway.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
