use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::{error, info};

use super::super::AppState;
use crate::core::lifecycle::LifecycleError;
use crate::core::subscription::{Subscription, SubscriptionRequest};

type ApiResponse = (StatusCode, Json<Value>);

fn bad_request(message: String) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
}

fn runtime_failure(action: &str, e: LifecycleError) -> ApiResponse {
    error!("Failed to {} subscription: {}", action, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
}

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

/// Validates the body once, before any lifecycle action.
fn validated(
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> Result<Subscription, ApiResponse> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    Subscription::try_from(request).map_err(|e| bad_request(e.to_string()))
}

pub async fn add_subscription_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> ApiResponse {
    let subscription = match validated(payload) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.manager.start(&subscription).await {
        Ok(started) => {
            info!("add {} -> started={}", subscription, started);
            ok(json!({ "success": true, "started": started }))
        }
        Err(e) => runtime_failure("start", e),
    }
}

pub async fn remove_subscription_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> ApiResponse {
    let subscription = match validated(payload) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.manager.stop(&subscription).await {
        Ok(stopped) => {
            info!("remove {} -> stopped={}", subscription, stopped);
            ok(json!({ "success": true, "stopped": stopped }))
        }
        Err(e) => runtime_failure("stop", e),
    }
}

pub async fn subscription_status_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> ApiResponse {
    let subscription = match validated(payload) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.manager.is_running(&subscription).await {
        Ok(running) => ok(json!({ "success": true, "running": running })),
        Err(e) => runtime_failure("check", e),
    }
}

pub async fn subscription_logs_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> ApiResponse {
    let subscription = match validated(payload) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match state.manager.recent_logs(&subscription).await {
        Ok(logs) => ok(json!({ "success": true, "logs": logs })),
        Err(e) => runtime_failure("read logs of", e),
    }
}

pub async fn list_subscriptions_endpoint(State(state): State<AppState>) -> ApiResponse {
    match state.manager.list().await {
        Ok(subs) => {
            let masked: Vec<Value> = subs.iter().map(Subscription::to_masked_json).collect();
            ok(json!({ "success": true, "subscriptions": masked }))
        }
        Err(e) => runtime_failure("list", e),
    }
}
