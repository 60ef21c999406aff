// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Ganache Payments Module
//!
//! The payment completion and reminder notification engine.
//!
//! ## Features
//!
//! - **Invoice State Machine**: draft/sent/pending_verification/paid/
//!   cancelled, with the upsert-transition used when the processor reports
//!   a payment for an invoice that was never persisted locally
//! - **Payment Completion Handler**: idempotent effect set for processor
//!   webhooks and administrator-verified offline payments
//! - **Reminder Sweeps**: deposit follow-ups and event-approach reminders,
//!   deduplicated through an insert-guarded ledger
//! - **Template Renderer**: administrator overrides merged over built-in
//!   defaults, `{placeholder}` substitution
//! - **Email Notifications**: per-call credentials, mockable transport
//! - **Invariants**: runnable consistency checks

pub mod calendar;
pub mod completion;
pub mod documents;
pub mod email;
pub mod error;
pub mod invariants;
pub mod invoice;
pub mod reminders;
pub mod revenue;
pub mod templates;
pub mod webhook;

#[cfg(test)]
mod edge_case_tests;

// Calendar
pub use calendar::{prep_block, CalendarEntryKind, NewCalendarEntry, PREP_DAYS};

// Completion
pub use completion::{CompletionEvent, CompletionHandler, CompletionOutcome};

// Documents
pub use documents::{DocumentGenerator, HttpDocumentGenerator, ProposalSnapshot, ReceiptData};

// Email
pub use email::{
    AccessTokenProvider, EmailAttachment, EmailConfig, EmailService, HttpMailTransport,
    MailTransport, OutboundEmail, StaticTokenProvider,
};

// Error
pub use error::{PaymentsError, PaymentsResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Invoice
pub use invoice::{
    generate_invoice_number, Invoice, InvoiceStatus, InvoiceStore, InvoiceType, PaidOutcome,
};

// Reminders
pub use reminders::{
    business_timezone_from_env, window_for_days_until, ReminderKind, ReminderService,
    SweepSummary, DEPOSIT_GRACE_HOURS,
};

// Revenue
pub use revenue::{outstanding_balance, RevenueLedger};

// Templates
pub use templates::{
    default_template, render, substitute, MessageTemplate, NotificationKind, Placeholders,
    RenderedMessage, TemplateStore,
};

// Webhook
pub use webhook::{signature_header, WebhookPayload, WebhookVerifier};

use std::sync::Arc;

use sqlx::PgPool;

/// Main payments service that combines the subsystem's components
pub struct PaymentsService {
    pub completion: CompletionHandler,
    pub reminders: ReminderService,
    pub templates: TemplateStore,
    pub invariants: InvariantChecker,
    pub webhooks: WebhookVerifier,
}

impl PaymentsService {
    /// Create a new payments service from environment variables
    pub fn from_env(pool: PgPool) -> PaymentsResult<Self> {
        let email = EmailService::from_env()?;
        let documents: Arc<dyn DocumentGenerator> = Arc::new(HttpDocumentGenerator::from_env()?);
        let webhooks = WebhookVerifier::from_env()?;

        let business_tz = reminders::business_timezone_from_env()?;

        Ok(Self {
            completion: CompletionHandler::new(pool.clone(), email.clone(), documents),
            reminders: ReminderService::new(pool.clone(), email, business_tz),
            templates: TemplateStore::new(pool.clone()),
            invariants: InvariantChecker::new(pool),
            webhooks,
        })
    }
}
