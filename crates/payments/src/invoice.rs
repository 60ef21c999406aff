//! Invoice state machine
//!
//! States and transitions for billable documents, including the
//! upsert-transition used by the completion handler: the processor is the
//! source of truth, so a completion event for an unknown invoice number
//! creates the invoice directly in `paid` rather than erroring.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PaymentsError, PaymentsResult};

/// Invoice lifecycle states.
///
/// `draft -> sent -> {pending_verification, paid} -> paid`, with `cancelled`
/// reachable from any non-terminal state. `paid` and `cancelled` are
/// terminal; no operation moves a paid invoice anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PendingVerification,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PendingVerification => "pending_verification",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" => Some(InvoiceStatus::Sent),
            "pending_verification" => Some(InvoiceStatus::PendingVerification),
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        match (self, next) {
            // Terminal states never move.
            (Paid, _) | (Cancelled, _) => false,
            (Draft, Sent) => true,
            (Draft, PendingVerification) | (Sent, PendingVerification) => true,
            // Paid reachable from every non-terminal state: a completion
            // event may arrive for an invoice that was never marked sent.
            (Draft, Paid) | (Sent, Paid) | (PendingVerification, Paid) => true,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

/// What a completed payment is for. Drives the dependent-record updates in
/// the completion handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Tasting,
    Deposit,
    Final,
    Other,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Tasting => "tasting",
            InvoiceType::Deposit => "deposit",
            InvoiceType::Final => "final",
            InvoiceType::Other => "other",
        }
    }

    /// Unrecognized types fall back to `Other`; the financial effects still
    /// apply, only the type-specific ones are skipped.
    pub fn parse(s: &str) -> Self {
        match s {
            "tasting" => InvoiceType::Tasting,
            "deposit" => InvoiceType::Deposit,
            "final" => InvoiceType::Final,
            _ => InvoiceType::Other,
        }
    }
}

/// A billable document, owned by at most one client.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Option<Uuid>,
    pub invoice_type: String,
    pub amount_cents: i64,
    pub status: String,
    pub payment_method: Option<String>,
    pub data: serde_json::Value,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Invoice {
    pub fn status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::parse(&self.status)
    }

    pub fn invoice_type(&self) -> InvoiceType {
        InvoiceType::parse(&self.invoice_type)
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid.as_str()
    }
}

/// Generate a new invoice number: `INV-<YYYYMM>-<6 hex>`.
pub fn generate_invoice_number(now: OffsetDateTime) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "INV-{}{:02}-{}",
        now.year(),
        u8::from(now.month()),
        suffix[..6].to_uppercase()
    )
}

/// Outcome of resolving a completion event against the invoice table.
#[derive(Debug)]
pub enum PaidOutcome {
    /// The invoice was already paid; callers must not re-apply financial
    /// effects.
    AlreadyPaid(Invoice),
    /// An existing invoice transitioned to paid.
    Transitioned(Invoice),
    /// No row existed for the reported number; one was created directly in
    /// paid with the event's amount.
    Created(Invoice),
}

impl PaidOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            PaidOutcome::AlreadyPaid(inv)
            | PaidOutcome::Transitioned(inv)
            | PaidOutcome::Created(inv) => inv,
        }
    }
}

const INVOICE_COLUMNS: &str = "id, invoice_number, client_id, invoice_type, amount_cents, status, \
     payment_method, data, paid_at, created_at, updated_at";

/// Persistence for invoices.
#[derive(Clone)]
pub struct InvoiceStore {
    pool: PgPool,
}

impl InvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_number(&self, invoice_number: &str) -> PaymentsResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = $1"
        ))
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Upsert-transition to `paid`.
    ///
    /// Transitions the existing invoice if one exists for the number, or
    /// creates one directly in `paid` with the event's amount. Already-paid
    /// invoices short-circuit; the conditional UPDATE guards the race where
    /// two deliveries of the same event pass the initial read together.
    pub async fn mark_paid_or_create(
        &self,
        invoice_number: &str,
        invoice_type: InvoiceType,
        client_id: Option<Uuid>,
        amount_cents: i64,
        method: Option<&str>,
    ) -> PaymentsResult<PaidOutcome> {
        if let Some(existing) = self.find_by_number(invoice_number).await? {
            if existing.is_paid() {
                return Ok(PaidOutcome::AlreadyPaid(existing));
            }
            if existing.status() == Some(InvoiceStatus::Cancelled) {
                return Err(PaymentsError::InvalidTransition {
                    from: InvoiceStatus::Cancelled.as_str(),
                    to: InvoiceStatus::Paid.as_str(),
                });
            }

            let updated = sqlx::query_as::<_, Invoice>(&format!(
                r#"
                UPDATE invoices
                SET status = 'paid',
                    paid_at = NOW(),
                    payment_method = COALESCE($2, payment_method),
                    client_id = COALESCE(client_id, $3),
                    updated_at = NOW()
                WHERE invoice_number = $1
                  AND status NOT IN ('paid', 'cancelled')
                RETURNING {INVOICE_COLUMNS}
                "#
            ))
            .bind(invoice_number)
            .bind(method)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

            return match updated {
                Some(invoice) => Ok(PaidOutcome::Transitioned(invoice)),
                // Lost the race: someone else paid it between read and write.
                None => {
                    let invoice = self
                        .find_by_number(invoice_number)
                        .await?
                        .ok_or_else(|| PaymentsError::InvoiceNotFound(invoice_number.to_string()))?;
                    Ok(PaidOutcome::AlreadyPaid(invoice))
                }
            };
        }

        // No local row: the processor is the source of truth. Converge by
        // creating the invoice in paid. ON CONFLICT absorbs the concurrent
        // redelivery that inserted first.
        let created = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices
                (invoice_number, client_id, invoice_type, amount_cents, status, payment_method, paid_at)
            VALUES ($1, $2, $3, $4, 'paid', $5, NOW())
            ON CONFLICT (invoice_number) DO NOTHING
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_number)
        .bind(client_id)
        .bind(invoice_type.as_str())
        .bind(amount_cents)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;

        match created {
            Some(invoice) => Ok(PaidOutcome::Created(invoice)),
            None => {
                let invoice = self
                    .find_by_number(invoice_number)
                    .await?
                    .ok_or_else(|| PaymentsError::InvoiceNotFound(invoice_number.to_string()))?;
                Ok(PaidOutcome::AlreadyPaid(invoice))
            }
        }
    }

    /// Record a client-asserted out-of-band payment.
    ///
    /// Moves the invoice to `pending_verification` so the claim is visible
    /// for review, creating the row if it does not exist. No financial
    /// effect. Paid and cancelled invoices are left untouched.
    pub async fn claim_pending_verification(
        &self,
        invoice_number: Option<&str>,
        client_id: Option<Uuid>,
        invoice_type: InvoiceType,
        amount_cents: i64,
        method: Option<&str>,
    ) -> PaymentsResult<Invoice> {
        if let Some(number) = invoice_number {
            if let Some(existing) = self.find_by_number(number).await? {
                let current = existing.status().unwrap_or(InvoiceStatus::Draft);
                if !current.can_transition_to(InvoiceStatus::PendingVerification) {
                    return Err(PaymentsError::InvalidTransition {
                        from: current.as_str(),
                        to: InvoiceStatus::PendingVerification.as_str(),
                    });
                }

                let updated = sqlx::query_as::<_, Invoice>(&format!(
                    r#"
                    UPDATE invoices
                    SET status = 'pending_verification',
                        payment_method = COALESCE($2, payment_method),
                        updated_at = NOW()
                    WHERE invoice_number = $1
                      AND status NOT IN ('paid', 'cancelled')
                    RETURNING {INVOICE_COLUMNS}
                    "#
                ))
                .bind(number)
                .bind(method)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| PaymentsError::InvoiceNotFound(number.to_string()))?;

                return Ok(updated);
            }
        }

        let number = match invoice_number {
            Some(n) => n.to_string(),
            None => generate_invoice_number(OffsetDateTime::now_utc()),
        };

        // The conflict guard keeps a concurrently-paid (or cancelled)
        // invoice in its terminal state; the claim is then rejected.
        let created = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices
                (invoice_number, client_id, invoice_type, amount_cents, status, payment_method)
            VALUES ($1, $2, $3, $4, 'pending_verification', $5)
            ON CONFLICT (invoice_number) DO UPDATE SET
                status = 'pending_verification',
                payment_method = COALESCE(EXCLUDED.payment_method, invoices.payment_method),
                updated_at = NOW()
            WHERE invoices.status NOT IN ('paid', 'cancelled')
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(&number)
        .bind(client_id)
        .bind(invoice_type.as_str())
        .bind(amount_cents)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;

        created.ok_or(PaymentsError::InvalidTransition {
            from: InvoiceStatus::Paid.as_str(),
            to: InvoiceStatus::PendingVerification.as_str(),
        })
    }

    /// Create a `final`-type invoice for the outstanding balance if the
    /// client has no live one. Returns the created invoice, or None if one
    /// already existed.
    pub async fn ensure_final_invoice(
        &self,
        client_id: Uuid,
        amount_cents: i64,
    ) -> PaymentsResult<Option<Invoice>> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM invoices
            WHERE client_id = $1 AND invoice_type = 'final' AND status <> 'cancelled'
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        if existing.is_some() {
            return Ok(None);
        }

        let number = generate_invoice_number(OffsetDateTime::now_utc());
        let created = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_number, client_id, invoice_type, amount_cents, status)
            VALUES ($1, $2, 'final', $3, 'sent')
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(&number)
        .bind(client_id)
        .bind(amount_cents)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn paid_is_terminal() {
        use InvoiceStatus::*;
        for next in [Draft, Sent, PendingVerification, Paid, Cancelled] {
            assert!(
                !Paid.can_transition_to(next),
                "paid must not transition to {}",
                next.as_str()
            );
        }
    }

    #[test]
    fn cancelled_reachable_from_non_terminal_only() {
        use InvoiceStatus::*;
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Sent.can_transition_to(Cancelled));
        assert!(PendingVerification.can_transition_to(Cancelled));
        assert!(!Paid.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn paid_reachable_from_every_non_terminal_state() {
        use InvoiceStatus::*;
        assert!(Draft.can_transition_to(Paid));
        assert!(Sent.can_transition_to(Paid));
        assert!(PendingVerification.can_transition_to(Paid));
    }

    #[test]
    fn pending_verification_never_skips_to_itself_from_paid() {
        assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::PendingVerification));
    }

    #[test]
    fn status_round_trips_through_strings() {
        use InvoiceStatus::*;
        for status in [Draft, Sent, PendingVerification, Paid, Cancelled] {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::parse("unknown"), None);
    }

    #[test]
    fn unknown_invoice_type_falls_back_to_other() {
        assert_eq!(InvoiceType::parse("deposit"), InvoiceType::Deposit);
        assert_eq!(InvoiceType::parse("gift-card"), InvoiceType::Other);
    }

    #[test]
    fn invoice_numbers_carry_year_and_month() {
        let number = generate_invoice_number(datetime!(2026-03-15 12:00 UTC));
        assert!(number.starts_with("INV-202603-"), "got {number}");
        assert_eq!(number.len(), "INV-202603-".len() + 6);
    }
}
