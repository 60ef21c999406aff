// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Payments Engine
//!
//! Tests critical boundary conditions in:
//! - Invoice state machine (PAY-S01 to PAY-S04)
//! - Reminder windows (PAY-R01 to PAY-R05)
//! - Template rendering (PAY-T01 to PAY-T04)
//! - Calendar prep blocks (PAY-C01 to PAY-C02)
//! - Webhook verification (PAY-W01 to PAY-W03)

#[cfg(test)]
mod state_machine_tests {
    use crate::invoice::InvoiceStatus;

    // =========================================================================
    // PAY-S01: No sequence of single transitions leaves `paid`
    // =========================================================================
    #[test]
    fn test_no_path_out_of_paid() {
        use InvoiceStatus::*;
        let all = [Draft, Sent, PendingVerification, Paid, Cancelled];
        for target in all {
            assert!(!Paid.can_transition_to(target));
        }
    }

    // =========================================================================
    // PAY-S02: The pending-verification path still reaches paid
    // =========================================================================
    #[test]
    fn test_offline_claim_path_reaches_paid() {
        use InvoiceStatus::*;
        // sent -> pending_verification -> paid
        assert!(Sent.can_transition_to(PendingVerification));
        assert!(PendingVerification.can_transition_to(Paid));
    }

    // =========================================================================
    // PAY-S03: Cancellation is not an escape hatch from paid
    // =========================================================================
    #[test]
    fn test_paid_cannot_be_cancelled() {
        assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Cancelled));
    }

    // =========================================================================
    // PAY-S04: Every state string stored in the database round-trips
    // =========================================================================
    #[test]
    fn test_status_strings_round_trip() {
        for s in ["draft", "sent", "pending_verification", "paid", "cancelled"] {
            let parsed = InvoiceStatus::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }
}

#[cfg(test)]
mod reminder_window_tests {
    use crate::reminders::{window_for_days_until, ReminderKind};

    // =========================================================================
    // PAY-R01: 20 days out - one-month window, two-week not yet eligible
    // =========================================================================
    #[test]
    fn test_twenty_days_is_one_month_only() {
        assert_eq!(window_for_days_until(20), Some(ReminderKind::OneMonth));
        assert_ne!(window_for_days_until(20), Some(ReminderKind::TwoWeek));
    }

    // =========================================================================
    // PAY-R02: Window boundaries - 14 is two-week, 15 is one-month
    // =========================================================================
    #[test]
    fn test_window_boundary_at_fourteen_days() {
        assert_eq!(window_for_days_until(14), Some(ReminderKind::TwoWeek));
        assert_eq!(window_for_days_until(15), Some(ReminderKind::OneMonth));
    }

    // =========================================================================
    // PAY-R03: Day-of-event and past events select nothing
    // =========================================================================
    #[test]
    fn test_event_day_and_past_are_out_of_window() {
        assert_eq!(window_for_days_until(0), None);
        assert_eq!(window_for_days_until(-1), None);
    }

    // =========================================================================
    // PAY-R04: Beyond thirty days nothing fires
    // =========================================================================
    #[test]
    fn test_far_future_is_out_of_window() {
        assert_eq!(window_for_days_until(31), None);
        assert_eq!(window_for_days_until(365), None);
    }

    // =========================================================================
    // PAY-R05: A single day count never maps to two kinds
    // =========================================================================
    #[test]
    fn test_windows_are_mutually_exclusive() {
        for days in 1..=30 {
            let kind = window_for_days_until(days).unwrap();
            let in_two_week = (1..=14).contains(&days);
            assert_eq!(kind == ReminderKind::TwoWeek, in_two_week, "day {days}");
            assert_eq!(kind == ReminderKind::OneMonth, !in_two_week, "day {days}");
        }
    }
}

#[cfg(test)]
mod template_tests {
    use crate::templates::{render, substitute, MessageTemplate, Placeholders};

    fn values(pairs: &[(&'static str, &str)]) -> Placeholders {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    // =========================================================================
    // PAY-T01: Three occurrences all substitute, none survive literally
    // =========================================================================
    #[test]
    fn test_triple_occurrence_substitution() {
        let body = "{firstName} - {firstName} - {firstName}";
        let out = substitute(body, &values(&[("firstName", "Ada")]));
        assert_eq!(out.matches("Ada").count(), 3);
        assert_eq!(out.matches("{firstName}").count(), 0);
    }

    // =========================================================================
    // PAY-T02: Unknown token becomes empty, not literal
    // =========================================================================
    #[test]
    fn test_unknown_token_swallowed() {
        let out = substitute("Due {dueDat}", &values(&[("dueDate", "May 1")]));
        assert_eq!(out, "Due ");
    }

    // =========================================================================
    // PAY-T03: Subject and body substitute independently but from one map
    // =========================================================================
    #[test]
    fn test_subject_and_body_share_values() {
        let rendered = render(
            &MessageTemplate {
                subject: "For {firstName}".to_string(),
                body: "Hi {firstName}".to_string(),
            },
            &values(&[("firstName", "Ada")]),
        );
        assert_eq!(rendered.subject, "For Ada");
        assert_eq!(rendered.text, "Hi Ada");
    }

    // =========================================================================
    // PAY-T04: Adjacent tokens and empty-value tokens compose
    // =========================================================================
    #[test]
    fn test_adjacent_tokens() {
        let out = substitute(
            "{a}{b}{a}",
            &values(&[("a", "x"), ("b", "")]),
        );
        assert_eq!(out, "xx");
    }
}

#[cfg(test)]
mod calendar_tests {
    use crate::calendar::{prep_block, CalendarEntryKind};
    use time::macros::date;

    // =========================================================================
    // PAY-C01: Deposit completion yields exactly 8 entries around date D
    // =========================================================================
    #[test]
    fn test_deposit_block_shape() {
        let d = date!(2026 - 10 - 10);
        let entries = prep_block("Ada Lovelace", d);

        assert_eq!(entries.len(), 8);
        let prep_count = entries
            .iter()
            .filter(|e| e.kind == CalendarEntryKind::Prep)
            .count();
        assert_eq!(prep_count, 7);
        assert!(entries.iter().all(|e| e.entry_date <= d));
        assert_eq!(entries.last().unwrap().entry_date, d);
        assert_eq!(entries[6].entry_date, date!(2026 - 10 - 09));
    }

    // =========================================================================
    // PAY-C02: Block generation crosses a year boundary
    // =========================================================================
    #[test]
    fn test_block_across_year_boundary() {
        let entries = prep_block("Ada", date!(2027 - 01 - 03));
        assert_eq!(entries[0].entry_date, date!(2026 - 12 - 27));
        assert_eq!(entries.len(), 8);
    }
}

#[cfg(test)]
mod webhook_tests {
    use crate::error::PaymentsError;
    use crate::webhook::{signature_header, WebhookVerifier};

    const SECRET: &str = "whsec_edge";

    // =========================================================================
    // PAY-W01: Extra signature-header fields are tolerated
    // =========================================================================
    #[test]
    fn test_extra_header_fields_ignored() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let payload = r#"{"ok":true}"#;
        let header = signature_header(SECRET, 1_700_000_000, payload);
        let with_v0 = format!("{header},v0=deadbeef");
        assert!(verifier.verify(payload, &with_v0, 1_700_000_000).is_ok());
    }

    // =========================================================================
    // PAY-W02: A future-dated delivery inside tolerance is accepted
    // =========================================================================
    #[test]
    fn test_clock_skew_within_tolerance() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let payload = r#"{"ok":true}"#;
        let header = signature_header(SECRET, 1_700_000_200, payload);
        // Receiver clock 200s behind the sender.
        assert!(verifier.verify(payload, &header, 1_700_000_000).is_ok());
        // But not beyond the window.
        let far = signature_header(SECRET, 1_700_000_500, payload);
        assert!(verifier.verify(payload, &far, 1_700_000_000).is_err());
    }

    // =========================================================================
    // PAY-W03: Signature failure maps to the 4xx-class error
    // =========================================================================
    #[test]
    fn test_signature_failure_error_type() {
        let verifier = WebhookVerifier::new(SECRET.to_string());
        let err = verifier
            .verify(r#"{"ok":true}"#, "t=1700000000,v1=0000", 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, PaymentsError::WebhookSignatureInvalid));
    }
}
