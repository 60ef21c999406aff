//! Revenue ledger
//!
//! Append-only: one row per completed payment event, never updated or
//! deleted. The aggregate reads here feed the reminder sweeps (deposit
//! detection, outstanding balance).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::PaymentsResult;

/// Outstanding balance given a proposal total and the amount already paid,
/// clamped at zero.
pub fn outstanding_balance(proposal_total_cents: i64, paid_total_cents: i64) -> i64 {
    (proposal_total_cents - paid_total_cents).max(0)
}

#[derive(Clone)]
pub struct RevenueLedger {
    pool: PgPool,
}

impl RevenueLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one entry. Rows are immutable once written.
    pub async fn append(
        &self,
        client_id: Option<Uuid>,
        invoice_id: Option<Uuid>,
        amount_cents: i64,
        entry_type: &str,
        note: Option<&str>,
    ) -> PaymentsResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO revenue_entries (client_id, invoice_id, amount_cents, entry_type, note)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(client_id)
        .bind(invoice_id)
        .bind(amount_cents)
        .bind(entry_type)
        .bind(note)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Whether the client already has an entry of the given type.
    pub async fn has_entry_of_type(
        &self,
        client_id: Uuid,
        entry_type: &str,
    ) -> PaymentsResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM revenue_entries WHERE client_id = $1 AND entry_type = $2)",
        )
        .bind(client_id)
        .bind(entry_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Total recorded revenue for a client, in cents.
    pub async fn paid_total(&self, client_id: Uuid) -> PaymentsResult<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM revenue_entries WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_subtracts_paid_amounts() {
        assert_eq!(outstanding_balance(450000, 150000), 300000);
    }

    #[test]
    fn balance_never_goes_negative() {
        assert_eq!(outstanding_balance(100000, 125000), 0);
        assert_eq!(outstanding_balance(0, 0), 0);
    }
}
