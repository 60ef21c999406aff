//! Route definitions

pub mod admin;
pub mod payments;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/payments/offline-verify", post(payments::offline_verify))
        .route("/admin/reminders/deposit-sweep", post(admin::run_deposit_sweep))
        .route("/admin/reminders/event-sweep", post(admin::run_event_sweep))
        .route("/admin/reminders/{client_id}", delete(admin::reset_reminders))
        .route("/admin/invariants", get(admin::run_invariants))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/payments/webhook", post(payments::payment_webhook))
        .route("/payments/offline-claimed", post(payments::offline_claimed))
        .merge(admin_routes)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Admin-key gate for verification and trigger endpoints.
///
/// Constant-time comparison so the key cannot be probed byte by byte.
async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    let provided = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-Admin-Key header".to_string()))?;

    let matches: bool = provided
        .as_bytes()
        .ct_eq(state.config.admin_api_key.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized("invalid admin key".to_string()));
    }

    Ok(next.run(req).await)
}
