//! Payment endpoints
//!
//! The processor webhook and the two offline-payment endpoints. Signature
//! and validation failures are rejected before any side effect; a
//! duplicate delivery is acknowledged with 200 so the processor stops
//! retrying.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ganache_payments::{CompletionOutcome, InvoiceType};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub duplicate: bool,
}

/// `POST /payments/webhook` — processor-signed completion event.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-Webhook-Signature header".to_string()))?;

    let event = state.payments.webhooks.verify_and_parse(&body, signature)?;
    let outcome = state.payments.completion.handle(event).await?;

    Ok(Json(WebhookAck {
        received: true,
        duplicate: outcome == CompletionOutcome::Duplicate,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OfflineClaimRequest {
    pub invoice_number: Option<String>,
    pub client_id: Option<Uuid>,
    pub invoice_type: Option<String>,
    pub amount_cents: i64,
    pub method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OfflineClaimResponse {
    pub invoice_number: String,
    pub status: String,
    pub amount_cents: i64,
}

/// `POST /payments/offline-claimed` — a client asserts an out-of-band
/// payment. The invoice becomes `pending_verification`; nothing financial
/// happens until an administrator verifies.
pub async fn offline_claimed(
    State(state): State<AppState>,
    Json(request): Json<OfflineClaimRequest>,
) -> ApiResult<Json<OfflineClaimResponse>> {
    let invoice_type = InvoiceType::parse(request.invoice_type.as_deref().unwrap_or("other"));

    let invoice = state
        .payments
        .completion
        .record_offline_claim(
            request.invoice_number.as_deref(),
            request.client_id,
            invoice_type,
            request.amount_cents,
            request.method.as_deref(),
        )
        .await?;

    Ok(Json(OfflineClaimResponse {
        status: invoice.status.clone(),
        amount_cents: invoice.amount_cents,
        invoice_number: invoice.invoice_number,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OfflineVerifyRequest {
    pub invoice_number: String,
}

#[derive(Debug, Serialize)]
pub struct OfflineVerifyResponse {
    pub invoice_number: String,
    pub result: &'static str,
}

/// `POST /payments/offline-verify` — administrator confirms an out-of-band
/// claim, triggering the full completion effect set. Verifying the same
/// claim twice is idempotent.
pub async fn offline_verify(
    State(state): State<AppState>,
    Json(request): Json<OfflineVerifyRequest>,
) -> ApiResult<Json<OfflineVerifyResponse>> {
    let outcome = state
        .payments
        .completion
        .verify_offline_payment(&request.invoice_number)
        .await?;

    Ok(Json(OfflineVerifyResponse {
        invoice_number: request.invoice_number,
        result: match outcome {
            CompletionOutcome::Processed => "processed",
            CompletionOutcome::Duplicate => "duplicate",
        },
    }))
}
