//! Document generation collaborators
//!
//! Receipts and proposal documents are produced by an external rendering
//! service; this module owns the payload types and the HTTP client. The
//! [`DocumentGenerator`] trait keeps the wire swappable for tests. Calls
//! have bounded timeouts and are never made while holding a database
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{PaymentsError, PaymentsResult};

/// Bound on a single document-generation call.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Structured pricing data for a receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptData {
    pub invoice_number: String,
    pub client_name: String,
    pub invoice_type: String,
    pub amount_cents: i64,
    pub paid_at: OffsetDateTime,
    /// Pricing breakdown snapshot from the invoice.
    pub breakdown: serde_json::Value,
}

/// The signed proposal content sent to the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalSnapshot {
    pub client_name: String,
    /// Selected design, line items, totals.
    pub data: serde_json::Value,
    pub total_cents: i64,
    pub signature: Option<String>,
    pub signed_at: Option<OffsetDateTime>,
}

/// Produces PDF bytes for receipts and proposal documents.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate_receipt(&self, receipt: &ReceiptData) -> PaymentsResult<Vec<u8>>;

    async fn generate_proposal_document(
        &self,
        proposal: &ProposalSnapshot,
    ) -> PaymentsResult<Vec<u8>>;
}

/// HTTP client for the document rendering service.
pub struct HttpDocumentGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentGenerator {
    pub fn new(base_url: String) -> PaymentsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()
            .map_err(|e| PaymentsError::Config(format!("documents http client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn from_env() -> PaymentsResult<Self> {
        let base_url = std::env::var("DOCUMENTS_API_URL")
            .unwrap_or_else(|_| "http://localhost:8400".to_string());
        Self::new(base_url)
    }

    async fn post_for_bytes<T: Serialize + Sync>(
        &self,
        path: &str,
        payload: &T,
    ) -> PaymentsResult<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(payload)
            .send()
            .await
            .map_err(|e| PaymentsError::Documents(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(PaymentsError::Documents(format!(
                "renderer returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PaymentsError::Documents(format!("body read failed: {e}")))?;

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl DocumentGenerator for HttpDocumentGenerator {
    async fn generate_receipt(&self, receipt: &ReceiptData) -> PaymentsResult<Vec<u8>> {
        self.post_for_bytes("/receipts", receipt).await
    }

    async fn generate_proposal_document(
        &self,
        proposal: &ProposalSnapshot,
    ) -> PaymentsResult<Vec<u8>> {
        self.post_for_bytes("/proposals", proposal).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn receipt_request_posts_pricing_and_returns_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/receipts")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "invoice_number": "INV-202608-AB12CD",
                "amount_cents": 25000,
            })))
            .with_status(200)
            .with_body(b"%PDF-1.7 receipt".to_vec())
            .create_async()
            .await;

        let generator = HttpDocumentGenerator::new(server.url()).unwrap();
        let bytes = generator
            .generate_receipt(&ReceiptData {
                invoice_number: "INV-202608-AB12CD".to_string(),
                client_name: "Ada Lovelace".to_string(),
                invoice_type: "deposit".to_string(),
                amount_cents: 25000,
                paid_at: datetime!(2026-08-07 12:00 UTC),
                breakdown: serde_json::json!({"tiers": 3}),
            })
            .await
            .unwrap();

        assert!(bytes.starts_with(b"%PDF"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn renderer_failure_maps_to_documents_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/proposals")
            .with_status(500)
            .create_async()
            .await;

        let generator = HttpDocumentGenerator::new(server.url()).unwrap();
        let err = generator
            .generate_proposal_document(&ProposalSnapshot {
                client_name: "Ada".to_string(),
                data: serde_json::json!({}),
                total_cents: 0,
                signature: None,
                signed_at: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentsError::Documents(_)));
    }
}
