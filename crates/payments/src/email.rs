//! Outbound email
//!
//! Sends transactional email through the mail provider's JSON API. The
//! credential is fetched per call from an [`AccessTokenProvider`] rather
//! than held in a shared mutable object, and the HTTP wire is behind the
//! [`MailTransport`] trait so tests can inject a mock.
//!
//! Send failures are surfaced as errors to the caller; callers decide
//! whether a failure is fatal (reminder sweeps skip the ledger write,
//! completion effects log and continue).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

use crate::error::{PaymentsError, PaymentsResult};
use crate::templates::RenderedMessage;
use ganache_shared::format_usd;

/// Bound on a single mail API call. Sends must never hold a database
/// connection open while waiting, and must not hang a sweep.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Mail API endpoint
    pub mail_api_url: String,
    /// Mail API key (empty disables sending)
    pub mail_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// Business owner address for operational notifications
    pub owner_email: String,
    /// Dashboard URL linked from operational emails
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            mail_api_url: std::env::var("MAIL_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            mail_api_key: std::env::var("MAIL_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Ganache <hello@ganache.studio>".to_string()),
            owner_email: std::env::var("OWNER_EMAIL")
                .unwrap_or_else(|_| "owner@ganache.studio".to_string()),
            dashboard_url: std::env::var("DASHBOARD_URL")
                .unwrap_or_else(|_| "https://ganache.studio/admin".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.mail_api_key.is_empty()
    }
}

/// Supplies the mail credential for one call.
///
/// Obtained per send so concurrent requests never share a mutable
/// credential object; an implementation may refresh tokens underneath.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> PaymentsResult<String>;
}

/// Token provider backed by a fixed API key from configuration.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> PaymentsResult<String> {
        if self.token.is_empty() {
            return Err(PaymentsError::Config("mail API key not set".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// A file attached to an outbound email.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// One outbound message, fully assembled.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<EmailAttachment>,
}

/// The mail wire. Production posts to the mail API; tests inject a mock.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send a message, returning the provider's message id.
    async fn send(
        &self,
        access_token: &str,
        from: &str,
        message: &OutboundEmail,
    ) -> PaymentsResult<String>;
}

/// JSON-API mail transport with a bounded request timeout.
pub struct HttpMailTransport {
    client: reqwest::Client,
    api_url: String,
}

impl HttpMailTransport {
    pub fn new(api_url: String) -> PaymentsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| PaymentsError::Config(format!("mail http client: {e}")))?;

        Ok(Self { client, api_url })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(
        &self,
        access_token: &str,
        from: &str,
        message: &OutboundEmail,
    ) -> PaymentsResult<String> {
        let mut body = serde_json::json!({
            "from": from,
            "to": [message.to],
            "subject": message.subject,
            "text": message.text,
            "html": message.html,
        });

        if !message.attachments.is_empty() {
            let attachments: Vec<serde_json::Value> = message
                .attachments
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "filename": a.filename,
                        "content": base64::engine::general_purpose::STANDARD.encode(&a.content),
                    })
                })
                .collect();
            body["attachments"] = serde_json::Value::Array(attachments);
        }

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentsError::Mail(format!("send failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentsError::Mail(format!(
                "mail API returned {status}: {body}"
            )));
        }

        #[derive(serde::Deserialize)]
        struct SendResponse {
            id: Option<String>,
        }

        let parsed: SendResponse = response
            .json()
            .await
            .unwrap_or(SendResponse { id: None });

        Ok(parsed.id.unwrap_or_default())
    }
}

/// Email notification service used by the completion handler and the
/// reminder sweeps.
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
    tokens: Arc<dyn AccessTokenProvider>,
    transport: Arc<dyn MailTransport>,
}

impl EmailService {
    pub fn new(
        config: EmailConfig,
        tokens: Arc<dyn AccessTokenProvider>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            tokens,
            transport,
        }
    }

    /// Create from environment variables with the HTTP transport.
    pub fn from_env() -> PaymentsResult<Self> {
        let config = EmailConfig::from_env();
        let tokens = Arc::new(StaticTokenProvider::new(config.mail_api_key.clone()));
        let transport = Arc::new(HttpMailTransport::new(config.mail_api_url.clone())?);
        Ok(Self::new(config, tokens, transport))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn dashboard_url(&self) -> &str {
        &self.config.dashboard_url
    }

    /// Send an assembled message. Returns the message id, or `None` when
    /// sending is not configured (logged and skipped, not an error).
    pub async fn send(&self, message: OutboundEmail) -> PaymentsResult<Option<String>> {
        if !self.is_enabled() {
            tracing::warn!(
                to = %message.to,
                subject = %message.subject,
                "Email not configured, skipping"
            );
            return Ok(None);
        }

        let token = self.tokens.access_token().await?;
        let message_id = self
            .transport
            .send(&token, &self.config.email_from, &message)
            .await?;

        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            message_id = %message_id,
            "Email sent"
        );

        Ok(Some(message_id))
    }

    /// Send a rendered template with optional attachments.
    pub async fn send_rendered(
        &self,
        to: &str,
        rendered: &RenderedMessage,
        attachments: Vec<EmailAttachment>,
    ) -> PaymentsResult<Option<String>> {
        self.send(OutboundEmail {
            to: to.to_string(),
            subject: rendered.subject.clone(),
            text: rendered.text.clone(),
            html: rendered.html.clone(),
            attachments,
        })
        .await
    }

    /// Plain operational notification to the business owner: amount,
    /// client, type, and a dashboard link.
    pub async fn notify_owner_payment(
        &self,
        client_name: &str,
        invoice_number: &str,
        invoice_type: &str,
        amount_cents: i64,
    ) -> PaymentsResult<Option<String>> {
        let amount = format_usd(amount_cents);
        let subject = format!("Payment received: {amount} from {client_name}");
        let text = format!(
            "{client_name} paid {amount} ({invoice_type}, invoice {invoice_number}).\n\n\
             Details: {}/invoices",
            self.config.dashboard_url
        );
        let html = format!(
            "<p>{client_name} paid <strong>{amount}</strong> ({invoice_type}, invoice {invoice_number}).</p>\
             <p><a href=\"{}/invoices\">Open the dashboard</a></p>",
            self.config.dashboard_url
        );

        self.send(OutboundEmail {
            to: self.config.owner_email.clone(),
            subject,
            text,
            html,
            attachments: Vec::new(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(api_key: &str, api_url: &str) -> EmailConfig {
        EmailConfig {
            mail_api_url: api_url.to_string(),
            mail_api_key: api_key.to_string(),
            email_from: "Studio <hello@example.com>".to_string(),
            owner_email: "owner@example.com".to_string(),
            dashboard_url: "https://example.com/admin".to_string(),
        }
    }

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MailTransport for CountingTransport {
        async fn send(
            &self,
            _access_token: &str,
            _from: &str,
            _message: &OutboundEmail,
        ) -> PaymentsResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("msg_1".to_string())
        }
    }

    #[tokio::test]
    async fn disabled_service_skips_transport_entirely() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let service = EmailService::new(
            config("", "https://unused.invalid"),
            Arc::new(StaticTokenProvider::new(String::new())),
            transport.clone(),
        );

        let result = service
            .send(OutboundEmail {
                to: "ada@example.com".to_string(),
                subject: "s".to_string(),
                text: "t".to_string(),
                html: "<p>t</p>".to_string(),
                attachments: Vec::new(),
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn http_transport_posts_json_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer secret-token")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "to": ["ada@example.com"],
                "subject": "Hello",
            })))
            .with_status(200)
            .with_body(r#"{"id":"msg_42"}"#)
            .create_async()
            .await;

        let transport = HttpMailTransport::new(format!("{}/emails", server.url())).unwrap();
        let id = transport
            .send(
                "secret-token",
                "Studio <hello@example.com>",
                &OutboundEmail {
                    to: "ada@example.com".to_string(),
                    subject: "Hello".to_string(),
                    text: "body".to_string(),
                    html: "<p>body</p>".to_string(),
                    attachments: Vec::new(),
                },
            )
            .await
            .unwrap();

        assert_eq!(id, "msg_42");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_transport_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/emails")
            .with_status(422)
            .with_body("bad payload")
            .create_async()
            .await;

        let transport = HttpMailTransport::new(format!("{}/emails", server.url())).unwrap();
        let err = transport
            .send(
                "token",
                "from@example.com",
                &OutboundEmail {
                    to: "ada@example.com".to_string(),
                    subject: "s".to_string(),
                    text: "t".to_string(),
                    html: "h".to_string(),
                    attachments: Vec::new(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentsError::Mail(_)));
    }

    #[tokio::test]
    async fn attachments_are_base64_encoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "attachments": [{"filename": "receipt.pdf", "content": "JVBERg=="}],
            })))
            .with_status(200)
            .with_body(r#"{"id":"msg_7"}"#)
            .create_async()
            .await;

        let transport = HttpMailTransport::new(format!("{}/emails", server.url())).unwrap();
        transport
            .send(
                "token",
                "from@example.com",
                &OutboundEmail {
                    to: "ada@example.com".to_string(),
                    subject: "s".to_string(),
                    text: "t".to_string(),
                    html: "h".to_string(),
                    attachments: vec![EmailAttachment {
                        filename: "receipt.pdf".to_string(),
                        content: b"%PDF".to_vec(),
                    }],
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }
}
