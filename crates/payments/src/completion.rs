//! Payment completion handler
//!
//! Consumes completion events from the processor webhook and from the
//! administrator offline-verification path, and applies the full effect
//! set: invoice upsert-transition, client/portal/calendar updates, revenue
//! append, owner notification, client notification.
//!
//! The processor delivers at least once, so the handler is idempotent at
//! two layers: an atomic claim of the external transaction id in
//! `payment_events` (INSERT ... ON CONFLICT claims exclusive processing
//! rights; a stuck `processing` row can be reclaimed after a timeout), and
//! a paid invoice short-circuiting all further mutation.
//!
//! The five effects are intentionally independent: each failure is caught
//! and logged with enough context for manual reconciliation, and never
//! prevents the sibling effects from running. There is no rollback.

use std::sync::Arc;

use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::calendar::prep_block;
use crate::documents::{DocumentGenerator, ProposalSnapshot, ReceiptData};
use crate::email::{EmailAttachment, EmailService};
use crate::error::{PaymentsError, PaymentsResult};
use crate::invoice::{Invoice, InvoiceStatus, InvoiceStore, InvoiceType, PaidOutcome};
use crate::revenue::RevenueLedger;
use crate::templates::{long_date, NotificationKind, Placeholders, TemplateStore};
use ganache_shared::format_usd;

/// How long a claim may sit in `processing` before another delivery may
/// reclaim it (crashed handler recovery).
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// A payment that has succeeded, from either entry point.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub client_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub amount_cents: i64,
    pub external_transaction_id: String,
    pub method: Option<String>,
}

impl CompletionEvent {
    /// Reject invalid events before any side effect.
    pub fn validate(&self) -> PaymentsResult<()> {
        if self.invoice_number.trim().is_empty() {
            return Err(PaymentsError::Validation(
                "missing invoice identifier".to_string(),
            ));
        }
        if self.external_transaction_id.trim().is_empty() {
            return Err(PaymentsError::Validation(
                "missing external transaction id".to_string(),
            ));
        }
        if self.amount_cents <= 0 {
            return Err(PaymentsError::Validation(format!(
                "amount must be positive, got {}",
                self.amount_cents
            )));
        }
        Ok(())
    }
}

/// What the handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Effects were applied (possibly partially; partial failures are
    /// logged, not returned).
    Processed,
    /// The transaction id was already claimed; nothing ran.
    Duplicate,
}

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: Uuid,
    name: String,
    email: String,
    event_date: Option<Date>,
    tasting_date: Option<Date>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProposalRow {
    data: serde_json::Value,
    total_cents: i64,
    signature: Option<String>,
    signed_at: Option<OffsetDateTime>,
}

/// Drives the effect set for completed payments.
#[derive(Clone)]
pub struct CompletionHandler {
    pool: PgPool,
    invoices: InvoiceStore,
    revenue: RevenueLedger,
    templates: TemplateStore,
    email: EmailService,
    documents: Arc<dyn DocumentGenerator>,
}

impl CompletionHandler {
    pub fn new(pool: PgPool, email: EmailService, documents: Arc<dyn DocumentGenerator>) -> Self {
        Self {
            invoices: InvoiceStore::new(pool.clone()),
            revenue: RevenueLedger::new(pool.clone()),
            templates: TemplateStore::new(pool.clone()),
            pool,
            email,
            documents,
        }
    }

    /// Handle a completion event.
    ///
    /// Safe to invoke twice for the same `external_transaction_id`: the
    /// atomic claim makes the second delivery a no-op.
    pub async fn handle(&self, event: CompletionEvent) -> PaymentsResult<CompletionOutcome> {
        event.validate()?;

        if !self.claim_event(&event).await? {
            tracing::info!(
                external_transaction_id = %event.external_transaction_id,
                invoice = %event.invoice_number,
                "Duplicate completion event - atomic idempotency check"
            );
            return Ok(CompletionOutcome::Duplicate);
        }

        tracing::info!(
            external_transaction_id = %event.external_transaction_id,
            invoice = %event.invoice_number,
            invoice_type = event.invoice_type.as_str(),
            amount_cents = event.amount_cents,
            "Processing completion event (claimed exclusive processing rights)"
        );

        let result = self.apply_effects(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        self.record_event_result(&event, processing_result, error_message.as_deref())
            .await;

        result.map(|()| CompletionOutcome::Processed)
    }

    /// Record a client-asserted out-of-band payment: the invoice moves to
    /// `pending_verification` (created if missing) and nothing financial
    /// happens until an administrator verifies it.
    pub async fn record_offline_claim(
        &self,
        invoice_number: Option<&str>,
        client_id: Option<Uuid>,
        invoice_type: InvoiceType,
        amount_cents: i64,
        method: Option<&str>,
    ) -> PaymentsResult<Invoice> {
        if amount_cents <= 0 {
            return Err(PaymentsError::Validation(format!(
                "amount must be positive, got {amount_cents}"
            )));
        }

        let invoice = self
            .invoices
            .claim_pending_verification(invoice_number, client_id, invoice_type, amount_cents, method)
            .await?;

        tracing::info!(
            invoice = %invoice.invoice_number,
            client_id = ?client_id,
            amount_cents = amount_cents,
            "Offline payment claimed, awaiting verification"
        );

        Ok(invoice)
    }

    /// Administrator confirms an out-of-band claim: runs the full effect
    /// set. The transaction id is derived from the invoice number, so
    /// verifying the same claim twice is absorbed by the claim table.
    pub async fn verify_offline_payment(
        &self,
        invoice_number: &str,
    ) -> PaymentsResult<CompletionOutcome> {
        let invoice = self
            .invoices
            .find_by_number(invoice_number)
            .await?
            .ok_or_else(|| PaymentsError::InvoiceNotFound(invoice_number.to_string()))?;

        match invoice.status() {
            Some(InvoiceStatus::PendingVerification) => {}
            Some(InvoiceStatus::Paid) => return Ok(CompletionOutcome::Duplicate),
            other => {
                return Err(PaymentsError::Validation(format!(
                    "invoice {invoice_number} is not pending verification (status: {})",
                    other.map(|s| s.as_str()).unwrap_or("unknown")
                )))
            }
        }

        let client = match invoice.client_id {
            Some(id) => self.load_client(id).await?,
            None => None,
        };

        let event = CompletionEvent {
            invoice_number: invoice.invoice_number.clone(),
            invoice_type: invoice.invoice_type(),
            client_id: invoice.client_id,
            client_name: client.as_ref().map(|c| c.name.clone()),
            client_email: client.as_ref().map(|c| c.email.clone()),
            amount_cents: invoice.amount_cents,
            external_transaction_id: format!("offline:{}", invoice.invoice_number),
            method: invoice
                .payment_method
                .clone()
                .or_else(|| Some("offline".to_string())),
        };

        self.handle(event).await
    }

    /// Atomically claim the transaction id. Returns false when another
    /// delivery already holds or finished the claim; a claim stuck in
    /// `processing` past the timeout is recovered.
    async fn claim_event(&self, event: &CompletionEvent) -> PaymentsResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO payment_events
                (external_transaction_id, invoice_number, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (external_transaction_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
            WHERE payment_events.processing_result = 'processing'
              AND payment_events.processing_started_at < NOW() - ($3 || ' minutes')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(&event.external_transaction_id)
        .bind(&event.invoice_number)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    /// Write the processing result back to the claim row. Best-effort with
    /// one retry: the audit record matters for idempotency and
    /// reconciliation.
    async fn record_event_result(
        &self,
        event: &CompletionEvent,
        processing_result: &str,
        error_message: Option<&str>,
    ) {
        for attempt in 0..2 {
            let result = sqlx::query(
                r#"
                UPDATE payment_events
                SET processing_result = $1, error_message = $2
                WHERE external_transaction_id = $3
                "#,
            )
            .bind(processing_result)
            .bind(error_message)
            .bind(&event.external_transaction_id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => return,
                Err(e) if attempt == 0 => {
                    tracing::warn!(
                        external_transaction_id = %event.external_transaction_id,
                        error = %e,
                        "First attempt to update payment event record failed, retrying..."
                    );
                }
                Err(e) => {
                    tracing::error!(
                        external_transaction_id = %event.external_transaction_id,
                        processing_result = %processing_result,
                        error = %e,
                        "Failed to update payment event audit record after retry. \
                         Event may appear stuck in 'processing' state."
                    );
                }
            }
        }
    }

    /// Apply the five effects. Each is caught independently; an error
    /// return here means the invoice transition itself failed (the event
    /// record shows `error` for follow-up), not that some sibling did.
    async fn apply_effects(&self, event: &CompletionEvent) -> PaymentsResult<()> {
        // Effect 1: resolve/transition the invoice.
        let outcome = match self
            .invoices
            .mark_paid_or_create(
                &event.invoice_number,
                event.invoice_type,
                event.client_id,
                event.amount_cents,
                event.method.as_deref(),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    invoice = %event.invoice_number,
                    client_id = ?event.client_id,
                    effect = "invoice",
                    error = %e,
                    "RECONCILIATION NEEDED: invoice transition failed; remaining effects skipped"
                );
                return Err(e);
            }
        };

        let invoice = match outcome {
            PaidOutcome::AlreadyPaid(invoice) => {
                // Idempotence: a paid invoice short-circuits all further
                // mutation, including revenue and client email.
                tracing::info!(
                    invoice = %invoice.invoice_number,
                    external_transaction_id = %event.external_transaction_id,
                    "Invoice already paid; skipping completion effects"
                );
                return Ok(());
            }
            PaidOutcome::Transitioned(invoice) => {
                tracing::info!(invoice = %invoice.invoice_number, "Invoice marked paid");
                invoice
            }
            PaidOutcome::Created(invoice) => {
                tracing::info!(
                    invoice = %invoice.invoice_number,
                    "No local invoice for completion event; created directly in paid"
                );
                invoice
            }
        };

        // A client may come from the event or from the invoice row (an
        // unmatched payment against an invoice that knows its client).
        let effective_client_id = event.client_id.or(invoice.client_id);
        let client = match effective_client_id {
            Some(id) => match self.load_client(id).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(client_id = %id, error = %e, "Failed to load client row");
                    None
                }
            },
            None => None,
        };

        // Effect 2: dependent client/portal/calendar updates.
        match effective_client_id {
            Some(client_id) => {
                if let Err(e) = self
                    .apply_client_effects(client_id, event.invoice_type, client.as_ref())
                    .await
                {
                    tracing::error!(
                        client_id = %client_id,
                        invoice = %event.invoice_number,
                        effect = "client-records",
                        error = %e,
                        "Failed to update client records for completed payment"
                    );
                }
            }
            None => {
                tracing::info!(
                    invoice = %event.invoice_number,
                    "Completion event has no client; skipping client-scoped effects"
                );
            }
        }

        // Effect 3: append the revenue entry.
        if let Err(e) = self
            .revenue
            .append(
                effective_client_id,
                Some(invoice.id),
                event.amount_cents,
                event.invoice_type.as_str(),
                event.method.as_deref(),
            )
            .await
        {
            tracing::error!(
                invoice = %event.invoice_number,
                client_id = ?event.client_id,
                effect = "revenue",
                error = %e,
                "RECONCILIATION NEEDED: revenue entry not recorded for completed payment"
            );
        }

        // Effect 4: notify the business owner.
        let owner_name = event
            .client_name
            .clone()
            .or_else(|| client.as_ref().map(|c| c.name.clone()))
            .unwrap_or_else(|| "Unmatched client".to_string());
        if let Err(e) = self
            .email
            .notify_owner_payment(
                &owner_name,
                &event.invoice_number,
                event.invoice_type.as_str(),
                event.amount_cents,
            )
            .await
        {
            tracing::error!(
                invoice = %event.invoice_number,
                effect = "owner-email",
                error = %e,
                "Failed to send owner payment notification"
            );
        }

        // Effect 5: notify the client.
        if let Err(e) = self.notify_client(event, &invoice, client.as_ref()).await {
            tracing::error!(
                invoice = %event.invoice_number,
                client_id = ?event.client_id,
                effect = "client-email",
                error = %e,
                "Failed to send client payment confirmation"
            );
        }

        Ok(())
    }

    async fn load_client(&self, client_id: Uuid) -> PaymentsResult<Option<ClientRow>> {
        let client = sqlx::query_as::<_, ClientRow>(
            "SELECT id, name, email, event_date, tasting_date FROM clients WHERE id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    async fn apply_client_effects(
        &self,
        client_id: Uuid,
        invoice_type: InvoiceType,
        client: Option<&ClientRow>,
    ) -> PaymentsResult<()> {
        match invoice_type {
            InvoiceType::Tasting => {
                self.mark_portal_milestone(client_id, "tasting").await?;
            }
            InvoiceType::Deposit => {
                // Forward-only status advance: a delivered or archived
                // client never moves back to booked.
                sqlx::query(
                    r#"
                    UPDATE clients
                    SET status = 'booked', updated_at = NOW()
                    WHERE id = $1 AND status IN ('inquiry', 'tasting')
                    "#,
                )
                .bind(client_id)
                .execute(&self.pool)
                .await?;

                self.mark_portal_milestone(client_id, "deposit").await?;
                self.create_prep_block(client_id, client).await?;
            }
            InvoiceType::Final => {
                self.mark_portal_milestone(client_id, "final").await?;
            }
            InvoiceType::Other => {}
        }

        Ok(())
    }

    async fn mark_portal_milestone(&self, client_id: Uuid, milestone: &str) -> PaymentsResult<()> {
        let sql = match milestone {
            "tasting" => {
                r#"
                INSERT INTO portal_data (client_id, tasting_paid, tasting_paid_at)
                VALUES ($1, TRUE, NOW())
                ON CONFLICT (client_id) DO UPDATE SET
                    tasting_paid = TRUE, tasting_paid_at = NOW(), updated_at = NOW()
                "#
            }
            "deposit" => {
                r#"
                INSERT INTO portal_data (client_id, deposit_paid, deposit_paid_at)
                VALUES ($1, TRUE, NOW())
                ON CONFLICT (client_id) DO UPDATE SET
                    deposit_paid = TRUE, deposit_paid_at = NOW(), updated_at = NOW()
                "#
            }
            "final" => {
                r#"
                INSERT INTO portal_data (client_id, final_paid, final_paid_at)
                VALUES ($1, TRUE, NOW())
                ON CONFLICT (client_id) DO UPDATE SET
                    final_paid = TRUE, final_paid_at = NOW(), updated_at = NOW()
                "#
            }
            other => {
                return Err(PaymentsError::Validation(format!(
                    "unknown portal milestone: {other}"
                )))
            }
        };

        sqlx::query(sql).bind(client_id).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert the fixed calendar block for a booked event: 7 prep days
    /// ending the day before the event plus the event day.
    async fn create_prep_block(
        &self,
        client_id: Uuid,
        client: Option<&ClientRow>,
    ) -> PaymentsResult<()> {
        let Some(client) = client else {
            tracing::warn!(client_id = %client_id, "Client row missing; prep block not created");
            return Ok(());
        };
        let Some(event_date) = client.event_date else {
            tracing::warn!(
                client_id = %client_id,
                "Client has no event date; prep block not created"
            );
            return Ok(());
        };

        let entries = prep_block(&client.name, event_date);
        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO calendar_entries (client_id, entry_date, kind, title)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(client_id)
            .bind(entry.entry_date)
            .bind(entry.kind.as_str())
            .bind(&entry.title)
            .execute(&self.pool)
            .await?;
        }

        tracing::info!(
            client_id = %client_id,
            event_date = %event_date,
            entries = entries.len(),
            "Prep block created for booked event"
        );
        Ok(())
    }

    async fn notify_client(
        &self,
        event: &CompletionEvent,
        invoice: &Invoice,
        client: Option<&ClientRow>,
    ) -> PaymentsResult<()> {
        let Some(to) = event
            .client_email
            .clone()
            .or_else(|| client.map(|c| c.email.clone()))
        else {
            tracing::info!(
                invoice = %event.invoice_number,
                "No client email on completion event; skipping client notification"
            );
            return Ok(());
        };

        let kind = NotificationKind::for_invoice_type(event.invoice_type);

        let full_name = event
            .client_name
            .clone()
            .or_else(|| client.map(|c| c.name.clone()))
            .unwrap_or_default();
        let first_name = full_name
            .split_whitespace()
            .next()
            .unwrap_or("there")
            .to_string();

        let mut values = Placeholders::new();
        values.insert("firstName", first_name);
        values.insert("amount", format_usd(event.amount_cents));
        values.insert("invoiceNumber", event.invoice_number.clone());
        if let Some(date) = client.and_then(|c| c.event_date) {
            values.insert("eventDate", long_date(date));
        }
        if let Some(date) = client.and_then(|c| c.tasting_date) {
            values.insert("tastingDate", long_date(date));
        }

        let rendered = self.templates.render(kind, &values).await?;
        let attachments = self.build_attachments(event, invoice, client).await;

        self.email.send_rendered(&to, &rendered, attachments).await?;
        Ok(())
    }

    /// Generate the receipt, and for deposits the signed proposal document.
    /// Document failures downgrade to an unattached email rather than
    /// blocking the notification.
    async fn build_attachments(
        &self,
        event: &CompletionEvent,
        invoice: &Invoice,
        client: Option<&ClientRow>,
    ) -> Vec<EmailAttachment> {
        let mut attachments = Vec::new();

        let receipt = ReceiptData {
            invoice_number: invoice.invoice_number.clone(),
            client_name: event
                .client_name
                .clone()
                .or_else(|| client.map(|c| c.name.clone()))
                .unwrap_or_default(),
            invoice_type: event.invoice_type.as_str().to_string(),
            amount_cents: event.amount_cents,
            paid_at: invoice.paid_at.unwrap_or_else(OffsetDateTime::now_utc),
            breakdown: invoice.data.clone(),
        };
        match self.documents.generate_receipt(&receipt).await {
            Ok(bytes) => attachments.push(EmailAttachment {
                filename: format!("receipt-{}.pdf", invoice.invoice_number),
                content: bytes,
            }),
            Err(e) => {
                tracing::error!(
                    invoice = %invoice.invoice_number,
                    effect = "receipt-document",
                    error = %e,
                    "Receipt generation failed; sending confirmation without it"
                );
            }
        }

        if event.invoice_type == InvoiceType::Deposit {
            if let Some(client) = client {
                match self.load_signed_proposal(client.id).await {
                    Ok(Some(proposal)) => {
                        let snapshot = ProposalSnapshot {
                            client_name: client.name.clone(),
                            data: proposal.data,
                            total_cents: proposal.total_cents,
                            signature: proposal.signature,
                            signed_at: proposal.signed_at,
                        };
                        match self.documents.generate_proposal_document(&snapshot).await {
                            Ok(bytes) => attachments.push(EmailAttachment {
                                filename: "proposal.pdf".to_string(),
                                content: bytes,
                            }),
                            Err(e) => {
                                tracing::error!(
                                    client_id = %client.id,
                                    effect = "proposal-document",
                                    error = %e,
                                    "Proposal document generation failed; omitting attachment"
                                );
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(client_id = %client.id, error = %e, "Proposal lookup failed");
                    }
                }
            }
        }

        attachments
    }

    async fn load_signed_proposal(&self, client_id: Uuid) -> PaymentsResult<Option<ProposalRow>> {
        let proposal = sqlx::query_as::<_, ProposalRow>(
            r#"
            SELECT data, total_cents, signature, signed_at
            FROM proposals
            WHERE client_id = $1 AND signed_at IS NOT NULL
            ORDER BY signed_at DESC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> CompletionEvent {
        CompletionEvent {
            invoice_number: "INV-202608-AB12CD".to_string(),
            invoice_type: InvoiceType::Deposit,
            client_id: Some(Uuid::new_v4()),
            client_name: Some("Ada Lovelace".to_string()),
            client_email: Some("ada@example.com".to_string()),
            amount_cents: 150000,
            external_transaction_id: "txn_0001".to_string(),
            method: Some("card".to_string()),
        }
    }

    #[test]
    fn validation_rejects_non_positive_amounts() {
        let mut e = event();
        e.amount_cents = 0;
        assert!(matches!(e.validate(), Err(PaymentsError::Validation(_))));
        e.amount_cents = -500;
        assert!(matches!(e.validate(), Err(PaymentsError::Validation(_))));
    }

    #[test]
    fn validation_rejects_blank_identifiers() {
        let mut e = event();
        e.invoice_number = "  ".to_string();
        assert!(e.validate().is_err());

        let mut e = event();
        e.external_transaction_id = String::new();
        assert!(e.validate().is_err());
    }

    #[test]
    fn validation_accepts_events_without_a_client() {
        let mut e = event();
        e.client_id = None;
        e.client_name = None;
        e.client_email = None;
        assert!(e.validate().is_ok());
    }
}
