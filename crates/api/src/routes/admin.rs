//! Admin trigger endpoints
//!
//! Non-production tooling: replay the scheduler's candidate-finding and
//! send logic on demand, reset a client's reminder ledger for re-testing,
//! and run the consistency checks. All routes sit behind the admin-key
//! middleware.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use ganache_payments::{InvariantCheckSummary, SweepSummary};

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /admin/reminders/deposit-sweep` — run the deposit sweep now.
pub async fn run_deposit_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepSummary>> {
    let summary = state.payments.reminders.run_deposit_sweep().await?;
    Ok(Json(summary))
}

/// `POST /admin/reminders/event-sweep` — run the event-approach sweep now.
pub async fn run_event_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepSummary>> {
    let summary = state.payments.reminders.run_event_sweep().await?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub client_id: Uuid,
    pub deleted: u64,
}

/// `DELETE /admin/reminders/{client_id}` — delete a client's reminder
/// records so reminders can fire again in testing.
pub async fn reset_reminders(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<ResetResponse>> {
    let deleted = state.payments.reminders.reset_client(client_id).await?;
    Ok(Json(ResetResponse { client_id, deleted }))
}

/// `GET /admin/invariants` — run the payment consistency checks.
pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.payments.invariants.run_all_checks().await?;
    Ok(Json(summary))
}
