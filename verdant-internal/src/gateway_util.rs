use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Auth;
use crate::config::{Config, StoreBackend};
use crate::endpoints;
use crate::error::{Error, ErrorDetails};
use crate::payments::{CheckoutProvider, StaticCheckoutProvider};
use crate::quota::redis_store::RedisQuotaStore;
use crate::quota::{Clock, InMemoryQuotaStore, QuotaEngine, QuotaStore, SystemClock};

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub engine: Arc<QuotaEngine>,
    pub auth: Auth,
    pub checkout: Arc<dyn CheckoutProvider>,
}

pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let store = setup_store(&config).await?;
        Ok(Self::new_with_parts(config, store, Arc::new(SystemClock)))
    }

    /// Assemble state from explicit parts. Tests inject a fresh in-memory
    /// store and a manual clock here.
    pub fn new_with_parts(
        config: Arc<Config>,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(QuotaEngine::new(store, config.quota, clock));
        let checkout: Arc<dyn CheckoutProvider> =
            Arc::new(StaticCheckoutProvider::new(&config.payments));
        Self {
            config,
            engine,
            auth: Auth::new(),
            checkout,
        }
    }
}

async fn setup_store(config: &Config) -> Result<Arc<dyn QuotaStore>, Error> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryQuotaStore::new());
            // Detached; the sweep task runs for the life of the process.
            let _ = store.start_sweeper(Duration::from_secs(config.store.sweep_interval_secs));
            tracing::info!("Using in-memory quota store (state does not survive restarts)");
            Ok(store)
        }
        StoreBackend::Redis => {
            let url = config.store.redis_url.as_deref().ok_or_else(|| {
                Error::new(ErrorDetails::Config {
                    message: "store.backend = \"redis\" requires store.redis_url".to_string(),
                })
            })?;
            let store = Arc::new(RedisQuotaStore::new(url).await?);
            tracing::info!("Using Redis quota store");
            Ok(store)
        }
    }
}

pub fn make_router(state: AppStateData) -> Router {
    // The mobile app and web client call this from other origins; preflight
    // OPTIONS requests are answered by the CORS layer with the allow-lists
    // below and no body.
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-tier"),
        ]);

    Router::new()
        .route("/usage", post(endpoints::usage::usage_handler))
        .route("/auth/signup", post(endpoints::auth::signup_handler))
        .route("/auth/login", post(endpoints::auth::login_handler))
        .route("/auth/logout", post(endpoints::auth::logout_handler))
        .route(
            "/payments/checkout",
            post(endpoints::payments::checkout_handler),
        )
        .route("/status", get(endpoints::status::status_handler))
        .fallback(handle_404)
        .layer(cors)
        .with_state(state)
}

async fn handle_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "error": {
                "message": "Route not found",
                "code": 404,
            }
        })),
    )
}
