//! Reminder sweeps and the dedup ledger
//!
//! Two scheduled sweeps find clients needing a reminder, render the
//! message, send it, and record the send in `reminder_records`. The unique
//! index on `(client_id, kind)` is the authoritative guard: the ledger
//! write is an `INSERT ... ON CONFLICT DO NOTHING`, and a conflict means
//! "already sent" rather than an error, so overlapping sweeps cannot
//! double-record. The ledger row is written only after a confirmed send; a
//! send failure leaves the candidate eligible on the next tick.

use chrono::Datelike;
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::PgPool;
use time::{Date, Duration};
use uuid::Uuid;

use crate::email::EmailService;
use crate::error::{PaymentsError, PaymentsResult};
use crate::invoice::InvoiceStore;
use crate::revenue::{outstanding_balance, RevenueLedger};
use crate::templates::{long_date, NotificationKind, Placeholders, TemplateStore};
use ganache_shared::format_usd;

/// How long a signed proposal may sit before the deposit reminder fires.
pub const DEPOSIT_GRACE_HOURS: i64 = 24;

/// Final balance is due this many days before the event.
pub const BALANCE_DUE_DAYS_BEFORE_EVENT: i64 = 14;

/// IANA timezone the business operates in, from `BUSINESS_TIMEZONE`.
/// The daily event-approach sweep and its date arithmetic run in this zone.
pub fn business_timezone_from_env() -> PaymentsResult<Tz> {
    std::env::var("BUSINESS_TIMEZONE")
        .unwrap_or_else(|_| "America/Chicago".to_string())
        .parse()
        .map_err(|e| PaymentsError::Config(format!("invalid BUSINESS_TIMEZONE: {e}")))
}

/// The fixed set of scheduled reminder kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    Deposit,
    OneMonth,
    TwoWeek,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::Deposit => "deposit-reminder",
            ReminderKind::OneMonth => "one-month",
            ReminderKind::TwoWeek => "two-week",
        }
    }

    fn notification_kind(&self) -> NotificationKind {
        match self {
            ReminderKind::Deposit => NotificationKind::DepositReminder,
            ReminderKind::OneMonth => NotificationKind::OneMonth,
            ReminderKind::TwoWeek => NotificationKind::TwoWeek,
        }
    }
}

/// Partition days-until-event into the two reminder windows: `(14, 30]` is
/// one-month, `(0, 14]` is two-week. The windows are non-overlapping by
/// construction, so a single sweep can never select both kinds for one
/// client.
pub fn window_for_days_until(days: i64) -> Option<ReminderKind> {
    match days {
        1..=14 => Some(ReminderKind::TwoWeek),
        15..=30 => Some(ReminderKind::OneMonth),
        _ => None,
    }
}

/// Counters for one sweep run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepSummary {
    pub candidates: usize,
    pub sent: usize,
    pub already_recorded: usize,
    pub out_of_window: usize,
    pub failed: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct DepositCandidate {
    client_id: Uuid,
    name: String,
    email: String,
    event_date: Option<Date>,
    total_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct EventCandidate {
    client_id: Uuid,
    name: String,
    email: String,
    event_date: Date,
}

/// Runs the scheduled sweeps.
#[derive(Clone)]
pub struct ReminderService {
    pool: PgPool,
    invoices: InvoiceStore,
    revenue: RevenueLedger,
    templates: TemplateStore,
    email: EmailService,
    business_tz: Tz,
}

impl ReminderService {
    pub fn new(pool: PgPool, email: EmailService, business_tz: Tz) -> Self {
        Self {
            invoices: InvoiceStore::new(pool.clone()),
            revenue: RevenueLedger::new(pool.clone()),
            templates: TemplateStore::new(pool.clone()),
            pool,
            email,
            business_tz,
        }
    }

    /// Today's date in the business timezone. All window arithmetic is
    /// date-only to avoid timezone drift.
    fn business_today(&self) -> PaymentsResult<Date> {
        let now = chrono::Utc::now().with_timezone(&self.business_tz).date_naive();
        let month = time::Month::try_from(now.month() as u8)
            .map_err(|e| PaymentsError::Config(format!("invalid month from clock: {e}")))?;
        Date::from_calendar_date(now.year(), month, now.day() as u8)
            .map_err(|e| PaymentsError::Config(format!("invalid date from clock: {e}")))
    }

    /// Hourly sweep: clients whose signed proposal has been waiting on a
    /// deposit past the grace period and who have not been reminded.
    pub async fn run_deposit_sweep(&self) -> PaymentsResult<SweepSummary> {
        // DISTINCT ON: one row per client even if several proposals are
        // signed; the newest one supplies the total.
        let candidates = sqlx::query_as::<_, DepositCandidate>(
            r#"
            SELECT DISTINCT ON (c.id)
                c.id AS client_id, c.name, c.email, c.event_date, p.total_cents
            FROM clients c
            JOIN proposals p ON p.client_id = c.id
            WHERE p.signed_at IS NOT NULL
              AND p.signed_at < NOW() - ($1 || ' hours')::INTERVAL
              AND NOT EXISTS (
                  SELECT 1 FROM revenue_entries r
                  WHERE r.client_id = c.id AND r.entry_type = 'deposit'
              )
              AND NOT EXISTS (
                  SELECT 1 FROM reminder_records rr
                  WHERE rr.client_id = c.id AND rr.kind = 'deposit-reminder'
              )
            ORDER BY c.id, p.signed_at DESC
            "#,
        )
        .bind(DEPOSIT_GRACE_HOURS)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = SweepSummary {
            candidates: candidates.len(),
            ..SweepSummary::default()
        };

        for candidate in candidates {
            let paid = self.revenue.paid_total(candidate.client_id).await.unwrap_or(0);
            let balance = outstanding_balance(candidate.total_cents, paid);

            let mut values = Placeholders::new();
            values.insert("firstName", first_name(&candidate.name).to_string());
            values.insert("balance", format_usd(balance));
            if let Some(date) = candidate.event_date {
                values.insert("eventDate", long_date(date));
                values.insert(
                    "dueDate",
                    long_date(date - Duration::days(BALANCE_DUE_DAYS_BEFORE_EVENT)),
                );
            }

            self.send_and_record(
                candidate.client_id,
                &candidate.email,
                ReminderKind::Deposit,
                &values,
                &mut summary,
            )
            .await;
        }

        tracing::info!(
            candidates = summary.candidates,
            sent = summary.sent,
            already_recorded = summary.already_recorded,
            failed = summary.failed,
            "Deposit reminder sweep complete"
        );

        Ok(summary)
    }

    /// Daily sweep in the business timezone: booked clients approaching
    /// their event with the final balance unpaid. Inside the two-week
    /// window a `final` invoice for the outstanding balance is created if
    /// none exists.
    pub async fn run_event_sweep(&self) -> PaymentsResult<SweepSummary> {
        let today = self.business_today()?;

        let candidates = sqlx::query_as::<_, EventCandidate>(
            r#"
            SELECT c.id AS client_id, c.name, c.email, c.event_date
            FROM clients c
            LEFT JOIN portal_data pd ON pd.client_id = c.id
            WHERE c.status = 'booked'
              AND c.event_date IS NOT NULL
              AND c.event_date > $1
              AND COALESCE(pd.final_paid, FALSE) = FALSE
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = SweepSummary {
            candidates: candidates.len(),
            ..SweepSummary::default()
        };

        for candidate in candidates {
            let days_until = (candidate.event_date - today).whole_days();
            let Some(kind) = window_for_days_until(days_until) else {
                summary.out_of_window += 1;
                continue;
            };

            // Cheap pre-check; the insert below remains the real guard.
            match self.already_recorded(candidate.client_id, kind).await {
                Ok(true) => {
                    summary.already_recorded += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        client_id = %candidate.client_id,
                        kind = kind.as_str(),
                        error = %e,
                        "Ledger lookup failed; skipping candidate this tick"
                    );
                    summary.failed += 1;
                    continue;
                }
            }

            let paid = self.revenue.paid_total(candidate.client_id).await.unwrap_or(0);
            let proposal_total = self.proposal_total(candidate.client_id).await.unwrap_or(0);
            let balance = outstanding_balance(proposal_total, paid);

            if kind == ReminderKind::TwoWeek && balance > 0 {
                match self
                    .invoices
                    .ensure_final_invoice(candidate.client_id, balance)
                    .await
                {
                    Ok(Some(invoice)) => {
                        tracing::info!(
                            client_id = %candidate.client_id,
                            invoice = %invoice.invoice_number,
                            amount_cents = balance,
                            "Created final invoice for outstanding balance"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            client_id = %candidate.client_id,
                            effect = "final-invoice",
                            error = %e,
                            "Failed to create final invoice; reminder still sent"
                        );
                    }
                }
            }

            let mut values = Placeholders::new();
            values.insert("firstName", first_name(&candidate.name).to_string());
            values.insert("eventDate", long_date(candidate.event_date));
            values.insert("balance", format_usd(balance));
            values.insert(
                "dueDate",
                long_date(candidate.event_date - Duration::days(BALANCE_DUE_DAYS_BEFORE_EVENT)),
            );

            self.send_and_record(
                candidate.client_id,
                &candidate.email,
                kind,
                &values,
                &mut summary,
            )
            .await;
        }

        tracing::info!(
            candidates = summary.candidates,
            sent = summary.sent,
            already_recorded = summary.already_recorded,
            out_of_window = summary.out_of_window,
            failed = summary.failed,
            "Event approach sweep complete"
        );

        Ok(summary)
    }

    /// Delete a client's ledger rows so reminders can be re-tested.
    pub async fn reset_client(&self, client_id: Uuid) -> PaymentsResult<u64> {
        let result = sqlx::query("DELETE FROM reminder_records WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            client_id = %client_id,
            deleted = result.rows_affected(),
            "Reminder records reset"
        );
        Ok(result.rows_affected())
    }

    async fn already_recorded(&self, client_id: Uuid, kind: ReminderKind) -> PaymentsResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM reminder_records WHERE client_id = $1 AND kind = $2)",
        )
        .bind(client_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Insert the ledger row. Returns false on conflict, which callers
    /// treat as "already sent", not an error.
    async fn record_sent(&self, client_id: Uuid, kind: ReminderKind) -> PaymentsResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reminder_records (client_id, kind)
            VALUES ($1, $2)
            ON CONFLICT (client_id, kind) DO NOTHING
            "#,
        )
        .bind(client_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Render, send, and record one reminder. Failures are logged per
    /// candidate and never abort the sweep; the ledger row is written only
    /// after the transport confirms the send.
    async fn send_and_record(
        &self,
        client_id: Uuid,
        to: &str,
        kind: ReminderKind,
        values: &Placeholders,
        summary: &mut SweepSummary,
    ) {
        let rendered = match self.templates.render(kind.notification_kind(), values).await {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!(
                    client_id = %client_id,
                    kind = kind.as_str(),
                    error = %e,
                    "Template rendering failed; candidate stays eligible"
                );
                summary.failed += 1;
                return;
            }
        };

        match self.email.send_rendered(to, &rendered, Vec::new()).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Mail not configured: no confirmed send, no ledger row.
                summary.failed += 1;
                return;
            }
            Err(e) => {
                tracing::error!(
                    client_id = %client_id,
                    kind = kind.as_str(),
                    error = %e,
                    "Reminder send failed; candidate stays eligible"
                );
                summary.failed += 1;
                return;
            }
        }

        match self.record_sent(client_id, kind).await {
            Ok(true) => {
                summary.sent += 1;
            }
            Ok(false) => {
                // A concurrent sweep recorded it between our check and
                // send. The send was duplicated; the ledger was not.
                tracing::warn!(
                    client_id = %client_id,
                    kind = kind.as_str(),
                    "Ledger row already present after send (concurrent sweep)"
                );
                summary.sent += 1;
                summary.already_recorded += 1;
            }
            Err(e) => {
                tracing::error!(
                    client_id = %client_id,
                    kind = kind.as_str(),
                    error = %e,
                    "RECONCILIATION NEEDED: reminder sent but ledger write failed"
                );
                summary.failed += 1;
            }
        }
    }

    async fn proposal_total(&self, client_id: Uuid) -> PaymentsResult<i64> {
        let total: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT total_cents FROM proposals
            WHERE client_id = $1 AND signed_at IS NOT NULL
            ORDER BY signed_at DESC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(total.map(|(t,)| t).unwrap_or(0))
    }
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_partition_cleanly() {
        assert_eq!(window_for_days_until(0), None);
        assert_eq!(window_for_days_until(1), Some(ReminderKind::TwoWeek));
        assert_eq!(window_for_days_until(14), Some(ReminderKind::TwoWeek));
        assert_eq!(window_for_days_until(15), Some(ReminderKind::OneMonth));
        assert_eq!(window_for_days_until(30), Some(ReminderKind::OneMonth));
        assert_eq!(window_for_days_until(31), None);
        assert_eq!(window_for_days_until(-3), None);
    }

    #[test]
    fn windows_never_overlap() {
        for days in -10..=60 {
            let kind = window_for_days_until(days);
            match days {
                1..=14 => assert_eq!(kind, Some(ReminderKind::TwoWeek), "day {days}"),
                15..=30 => assert_eq!(kind, Some(ReminderKind::OneMonth), "day {days}"),
                _ => assert_eq!(kind, None, "day {days}"),
            }
        }
    }

    #[test]
    fn twenty_days_out_is_one_month_territory() {
        // 20 > 14: two-week is not yet eligible; one-month applies.
        assert_eq!(window_for_days_until(20), Some(ReminderKind::OneMonth));
    }

    #[test]
    fn kind_strings_match_the_ledger() {
        assert_eq!(ReminderKind::Deposit.as_str(), "deposit-reminder");
        assert_eq!(ReminderKind::OneMonth.as_str(), "one-month");
        assert_eq!(ReminderKind::TwoWeek.as_str(), "two-week");
    }

    #[test]
    fn first_name_takes_the_leading_token() {
        assert_eq!(first_name("Ada Lovelace"), "Ada");
        assert_eq!(first_name("Cher"), "Cher");
        assert_eq!(first_name(""), "");
    }
}
