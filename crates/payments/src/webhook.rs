//! Processor webhook verification
//!
//! The payment processor signs each delivery with a shared secret:
//! `X-Webhook-Signature: t=<unix>,v1=<hex hmac-sha256 of "<unix>.<payload>">`.
//! Verification happens before any parsing or side effect; a stale
//! timestamp (over five minutes) is rejected to limit replay.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::completion::CompletionEvent;
use crate::error::{PaymentsError, PaymentsResult};
use crate::invoice::InvoiceType;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signed delivery, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verifies processor deliveries against the shared webhook secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn from_env() -> PaymentsResult<Self> {
        let secret = std::env::var("WEBHOOK_SECRET")
            .map_err(|_| PaymentsError::Config("WEBHOOK_SECRET must be set".to_string()))?;
        if secret.is_empty() {
            return Err(PaymentsError::Config("WEBHOOK_SECRET is empty".to_string()));
        }
        Ok(Self { secret })
    }

    /// Verify a delivery's signature header against the payload.
    ///
    /// `now_unix` is injected so the tolerance window is testable.
    pub fn verify(&self, payload: &str, signature: &str, now_unix: i64) -> PaymentsResult<()> {
        // Parse the signature header: t=timestamp,v1=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in signature header");
            PaymentsError::WebhookSignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in signature header");
            PaymentsError::WebhookSignatureInvalid
        })?;

        if (now_unix - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now_unix,
                diff = (now_unix - timestamp).abs(),
                "Webhook timestamp too old"
            );
            return Err(PaymentsError::WebhookSignatureInvalid);
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            PaymentsError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(PaymentsError::WebhookSignatureInvalid);
        }

        Ok(())
    }

    /// Verify and parse a delivery into a completion event. 4xx-mapped
    /// errors happen here, before any side effect.
    pub fn verify_and_parse(&self, payload: &str, signature: &str) -> PaymentsResult<CompletionEvent> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!("System time error: {}", e);
                PaymentsError::WebhookSignatureInvalid
            })?
            .as_secs() as i64;

        self.verify(payload, signature, now)?;

        let parsed: WebhookPayload = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook payload");
            PaymentsError::Validation(format!("malformed payload: {e}"))
        })?;

        parsed.into_event()
    }
}

/// Compute a signature header for a payload. Used by tests and the local
/// replay tooling to produce deliveries the verifier accepts.
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> String {
    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={timestamp},v1="),
    };
    mac.update(signed_payload.as_bytes());
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// The processor's completion payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub invoice_id: String,
    #[serde(default)]
    pub invoice_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    pub amount_minor_units: i64,
    pub external_transaction_id: String,
    #[serde(default)]
    pub method: Option<String>,
}

impl WebhookPayload {
    /// Validate and convert into the handler's input. Rejected payloads
    /// cause no side effects.
    pub fn into_event(self) -> PaymentsResult<CompletionEvent> {
        if self.invoice_id.trim().is_empty() {
            return Err(PaymentsError::Validation(
                "missing invoice identifier".to_string(),
            ));
        }
        if self.external_transaction_id.trim().is_empty() {
            return Err(PaymentsError::Validation(
                "missing external transaction id".to_string(),
            ));
        }
        if self.amount_minor_units <= 0 {
            return Err(PaymentsError::Validation(format!(
                "amount must be positive, got {}",
                self.amount_minor_units
            )));
        }

        Ok(CompletionEvent {
            invoice_number: self.invoice_id,
            invoice_type: InvoiceType::parse(self.invoice_type.as_deref().unwrap_or("other")),
            client_id: self.client_id,
            client_name: self.client_name,
            client_email: self.client_email,
            amount_cents: self.amount_minor_units,
            external_transaction_id: self.external_transaction_id,
            method: self.method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sample_payload() -> String {
        serde_json::json!({
            "invoiceId": "INV-202608-AB12CD",
            "invoiceType": "deposit",
            "clientName": "Ada Lovelace",
            "clientEmail": "ada@example.com",
            "amountMinorUnits": 150000,
            "externalTransactionId": "txn_0001",
        })
        .to_string()
    }

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let payload = sample_payload();
        let header = signature_header(SECRET, 1_700_000_000, &payload);
        assert!(verifier.verify(&payload, &header, 1_700_000_000).is_ok());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let payload = sample_payload();
        let header = signature_header(SECRET, 1_700_000_000, &payload);
        let tampered = payload.replace("150000", "1");
        assert!(matches!(
            verifier.verify(&tampered, &header, 1_700_000_000),
            Err(PaymentsError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let verifier = WebhookVerifier::new("other_secret".to_string());
        let payload = sample_payload();
        let header = signature_header(SECRET, 1_700_000_000, &payload);
        assert!(verifier.verify(&payload, &header, 1_700_000_000).is_err());
    }

    #[test]
    fn rejects_stale_timestamps() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let payload = sample_payload();
        let header = signature_header(SECRET, 1_700_000_000, &payload);
        assert!(verifier
            .verify(&payload, &header, 1_700_000_000 + 301)
            .is_err());
        assert!(verifier
            .verify(&payload, &header, 1_700_000_000 + 299)
            .is_ok());
    }

    #[test]
    fn rejects_malformed_signature_headers() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let payload = sample_payload();
        for header in ["", "t=abc,v1=", "v1=deadbeef", "t=1700000000"] {
            assert!(
                verifier.verify(&payload, header, 1_700_000_000).is_err(),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn payload_validation_rejects_bad_amounts() {
        let parsed: WebhookPayload = serde_json::from_str(
            &serde_json::json!({
                "invoiceId": "INV-1",
                "amountMinorUnits": 0,
                "externalTransactionId": "txn_1",
            })
            .to_string(),
        )
        .unwrap();
        assert!(matches!(
            parsed.into_event(),
            Err(PaymentsError::Validation(_))
        ));
    }

    #[test]
    fn payload_without_client_still_converts() {
        let parsed: WebhookPayload = serde_json::from_str(
            &serde_json::json!({
                "invoiceId": "INV-1",
                "amountMinorUnits": 5000,
                "externalTransactionId": "txn_2",
            })
            .to_string(),
        )
        .unwrap();
        let event = parsed.into_event().unwrap();
        assert!(event.client_id.is_none());
        assert_eq!(event.invoice_type, InvoiceType::Other);
        assert_eq!(event.amount_cents, 5000);
    }
}
