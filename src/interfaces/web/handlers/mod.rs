pub mod subscriptions;

use axum::{Json, extract::State};

use super::AppState;

pub async fn health_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "runtime": state.manager.runtime_kind(),
    }))
}
