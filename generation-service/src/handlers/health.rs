use axum::Json;
use serde_json::{json, Value};

/// Liveness probe.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Alias for a commonly mistyped probe path.
pub async fn heathz() -> Json<Value> {
    Json(json!({ "status": "ok", "hint": "use /healthz" }))
}
