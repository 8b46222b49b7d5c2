use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::bearer_token;
use crate::config::Tier;
use crate::error::Error;
use crate::gateway_util::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub ok: bool,
    pub token: String,
    pub user_id: String,
    pub tier: Tier,
}

pub async fn signup_handler(
    State(state): AppState,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, Error> {
    let issued = state.auth.signup(&request.email, &request.password)?;
    Ok(Json(TokenResponse {
        ok: true,
        token: issued.token,
        user_id: issued.user_id,
        tier: issued.tier,
    }))
}

pub async fn login_handler(
    State(state): AppState,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, Error> {
    let issued = state.auth.login(&request.email, &request.password)?;
    Ok(Json(TokenResponse {
        ok: true,
        token: issued.token,
        user_id: issued.user_id,
        tier: issued.tier,
    }))
}

/// Revoking an unknown or absent token is a no-op; logout always succeeds.
pub async fn logout_handler(State(state): AppState, headers: HeaderMap) -> Json<Value> {
    if let Some(token) = bearer_token(&headers) {
        state.auth.revoke(token);
    }
    Json(json!({ "ok": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway_util::{make_router, AppStateData};
    use crate::quota::{InMemoryQuotaStore, ManualClock};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> Router {
        let state = AppStateData::new_with_parts(
            Arc::new(Config::default()),
            Arc::new(InMemoryQuotaStore::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        );
        make_router(state)
    }

    fn json_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_signup_issues_bearer_token() {
        let router = router();
        let (status, body) = send(
            &router,
            json_request(
                "/auth/signup",
                r#"{"email": "grower@example.com", "password": "longenough"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(body["token"].as_str().unwrap().starts_with("vd_"));
        assert_eq!(body["tier"], "free");
        assert!(body["userId"].as_str().unwrap().starts_with("user_"));
    }

    #[tokio::test]
    async fn test_signup_rejects_invalid_email() {
        let router = router();
        let (status, body) = send(
            &router,
            json_request(
                "/auth/signup",
                r#"{"email": "not-an-email", "password": "longenough"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("email"));
    }

    #[tokio::test]
    async fn test_signup_rejects_short_password() {
        let router = router();
        let (status, _) = send(
            &router,
            json_request(
                "/auth/signup",
                r#"{"email": "grower@example.com", "password": "tiny"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_after_signup() {
        let router = router();
        send(
            &router,
            json_request(
                "/auth/signup",
                r#"{"email": "grower@example.com", "password": "longenough"}"#,
            ),
        )
        .await;

        let (status, body) = send(
            &router,
            json_request(
                "/auth/login",
                r#"{"email": "grower@example.com", "password": "longenough"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().unwrap().starts_with("vd_"));

        let (status, _) = send(
            &router,
            json_request(
                "/auth/login",
                r#"{"email": "grower@example.com", "password": "wrongpassword"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let router = router();
        let (_, body) = send(
            &router,
            json_request(
                "/auth/signup",
                r#"{"email": "grower@example.com", "password": "longenough"}"#,
            ),
        )
        .await;
        let token = body["token"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("POST")
            .uri("/auth/logout")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }
}
