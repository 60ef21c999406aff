//! Payments Invariants Module
//!
//! Provides runnable consistency checks for the payment subsystem. These
//! invariants can be run after a webhook replay, a manual sweep trigger, or
//! a reminder reset to ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentsResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Client(s) affected, when the violation is client-scoped
    pub client_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - money may be counted incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateReminderRow {
    client_id: Uuid,
    kind: String,
    row_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidWithoutTimestampRow {
    invoice_number: String,
    client_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct NonPositiveRevenueRow {
    id: Uuid,
    client_id: Option<Uuid>,
    amount_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DepositFlagMismatchRow {
    client_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct StuckEventRow {
    external_transaction_id: String,
    processing_started_at: OffsetDateTime,
}

/// Service for running payment invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> PaymentsResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_reminder_uniqueness().await?);
        violations.extend(self.check_paid_invoices_have_timestamp().await?);
        violations.extend(self.check_revenue_amounts_positive().await?);
        violations.extend(self.check_deposit_revenue_has_portal_flag().await?);
        violations.extend(self.check_no_stuck_payment_events().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most one reminder record per (client, kind)
    ///
    /// The unique index makes duplicates impossible through the normal
    /// path; a violation means the index was dropped or bypassed, and
    /// duplicate reminder emails may have been sent.
    async fn check_reminder_uniqueness(&self) -> PaymentsResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateReminderRow> = sqlx::query_as(
            r#"
            SELECT client_id, kind, COUNT(*) as row_count
            FROM reminder_records
            GROUP BY client_id, kind
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "reminder_uniqueness".to_string(),
                client_ids: vec![row.client_id],
                description: format!(
                    "Client has {} '{}' reminder records (expected at most 1)",
                    row.row_count, row.kind
                ),
                context: serde_json::json!({
                    "kind": row.kind,
                    "row_count": row.row_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Every paid invoice has paid_at set
    async fn check_paid_invoices_have_timestamp(&self) -> PaymentsResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidWithoutTimestampRow> = sqlx::query_as(
            "SELECT invoice_number, client_id FROM invoices WHERE status = 'paid' AND paid_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_invoices_have_timestamp".to_string(),
                client_ids: row.client_id.into_iter().collect(),
                description: format!("Invoice {} is paid but has no paid_at", row.invoice_number),
                context: serde_json::json!({
                    "invoice_number": row.invoice_number,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Revenue entries carry positive amounts
    ///
    /// The completion handler validates amounts before any effect; a
    /// non-positive row means something wrote to the ledger directly.
    async fn check_revenue_amounts_positive(&self) -> PaymentsResult<Vec<InvariantViolation>> {
        let rows: Vec<NonPositiveRevenueRow> = sqlx::query_as(
            "SELECT id, client_id, amount_cents FROM revenue_entries WHERE amount_cents <= 0",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "revenue_amounts_positive".to_string(),
                client_ids: row.client_id.into_iter().collect(),
                description: format!(
                    "Revenue entry {} has non-positive amount {}",
                    row.id, row.amount_cents
                ),
                context: serde_json::json!({
                    "entry_id": row.id,
                    "amount_cents": row.amount_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: A deposit revenue entry implies the portal flag
    ///
    /// The two are written by independent best-effort effects, so drift is
    /// possible; it means the client portal under-reports a payment.
    async fn check_deposit_revenue_has_portal_flag(
        &self,
    ) -> PaymentsResult<Vec<InvariantViolation>> {
        let rows: Vec<DepositFlagMismatchRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT r.client_id
            FROM revenue_entries r
            LEFT JOIN portal_data pd ON pd.client_id = r.client_id
            WHERE r.entry_type = 'deposit'
              AND r.client_id IS NOT NULL
              AND COALESCE(pd.deposit_paid, FALSE) = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "deposit_revenue_has_portal_flag".to_string(),
                client_ids: vec![row.client_id],
                description: "Client has deposit revenue but portal deposit_paid is false"
                    .to_string(),
                context: serde_json::json!({}),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: No payment event stuck in processing
    ///
    /// Stuck claims block redeliveries until the recovery timeout; more
    /// than an hour usually means a crashed handler worth investigating.
    async fn check_no_stuck_payment_events(&self) -> PaymentsResult<Vec<InvariantViolation>> {
        let rows: Vec<StuckEventRow> = sqlx::query_as(
            r#"
            SELECT external_transaction_id, processing_started_at
            FROM payment_events
            WHERE processing_result = 'processing'
              AND processing_started_at < NOW() - INTERVAL '1 hour'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stuck_payment_events".to_string(),
                client_ids: Vec::new(),
                description: format!(
                    "Payment event {} stuck in processing since {}",
                    row.external_transaction_id, row.processing_started_at
                ),
                context: serde_json::json!({
                    "external_transaction_id": row.external_transaction_id,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_display_matches_reporting_format() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }
}
