use axum::response::Json;
use serde_json::{json, Value};

pub const VERDANT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Liveness probe.
pub async fn status_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERDANT_VERSION,
    }))
}
