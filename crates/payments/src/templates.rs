//! Notification template resolution and rendering
//!
//! Every client-facing message starts from a built-in default `{subject,
//! body}` pair keyed by notification kind. Administrators may override
//! either field independently; overrides are merged field-by-field at load
//! time, so an override supplying only a subject still uses the default
//! body. Placeholders use `{name}` syntax. Unknown placeholders are replaced
//! with the empty string rather than left literal: a typo in a custom
//! template silently drops the token instead of leaking it to a client.
//!
//! The plain-text and styled HTML forms are both derived from the one
//! substituted body, never rendered from separately-substituted inputs, so
//! the two can never diverge.

use std::collections::HashMap;

use sqlx::PgPool;

use crate::error::PaymentsResult;
use crate::invoice::InvoiceType;

/// Placeholder values for one rendering pass.
pub type Placeholders = HashMap<&'static str, String>;

/// The fixed set of notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    TastingConfirmed,
    BookingConfirmed,
    PaidInFull,
    PaymentReceived,
    DepositReminder,
    OneMonth,
    TwoWeek,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TastingConfirmed => "tasting-confirmed",
            NotificationKind::BookingConfirmed => "booking-confirmed",
            NotificationKind::PaidInFull => "paid-in-full",
            NotificationKind::PaymentReceived => "payment-received",
            NotificationKind::DepositReminder => "deposit-reminder",
            NotificationKind::OneMonth => "one-month",
            NotificationKind::TwoWeek => "two-week",
        }
    }

    /// Which confirmation a completed payment triggers.
    pub fn for_invoice_type(invoice_type: InvoiceType) -> Self {
        match invoice_type {
            InvoiceType::Tasting => NotificationKind::TastingConfirmed,
            InvoiceType::Deposit => NotificationKind::BookingConfirmed,
            InvoiceType::Final => NotificationKind::PaidInFull,
            InvoiceType::Other => NotificationKind::PaymentReceived,
        }
    }
}

/// A resolved subject/body pair, ready for substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

/// A fully rendered message: substituted subject, plain text, and the
/// styled HTML derived from that same text.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Built-in default for a notification kind.
pub fn default_template(kind: NotificationKind) -> MessageTemplate {
    let (subject, body) = match kind {
        NotificationKind::TastingConfirmed => (
            "Your tasting is confirmed",
            "Hi {firstName},\n\nThank you! We've received your tasting payment of {amount}.\n\
             Your tasting is scheduled for {tastingDate} and we can't wait to see you.\n\n\
             Warmly,\nThe studio",
        ),
        NotificationKind::BookingConfirmed => (
            "You're officially booked!",
            "Hi {firstName},\n\nYour deposit of {amount} is in and your date is locked: {eventDate}.\n\
             Your receipt and signed proposal are attached for your records.\n\n\
             We'll be in touch as the day gets closer.\n\nWarmly,\nThe studio",
        ),
        NotificationKind::PaidInFull => (
            "Paid in full — thank you!",
            "Hi {firstName},\n\nWe've received your final payment of {amount}. You're all set\n\
             for {eventDate}; nothing further is due.\n\nSee you soon,\nThe studio",
        ),
        NotificationKind::PaymentReceived => (
            "Payment received",
            "Hi {firstName},\n\nThis confirms we've received your payment of {amount}\n\
             (invoice {invoiceNumber}). A receipt is attached.\n\nWarmly,\nThe studio",
        ),
        NotificationKind::DepositReminder => (
            "A note about your proposal",
            "Hi {firstName},\n\nJust a gentle reminder that your signed proposal is waiting on a\n\
             deposit to lock in {eventDate}. Dates are first come, first served, so we\n\
             recommend completing it soon.\n\nQuestions? Just reply to this email.\n\n\
             Warmly,\nThe studio",
        ),
        NotificationKind::OneMonth => (
            "One month to go!",
            "Hi {firstName},\n\n{eventDate} is only a month away! A quick heads up that your\n\
             remaining balance of {balance} will be due on {dueDate}.\n\nWarmly,\nThe studio",
        ),
        NotificationKind::TwoWeek => (
            "Two weeks away — final balance due",
            "Hi {firstName},\n\nWe're two weeks out from {eventDate}! Your remaining balance of\n\
             {balance} is due on {dueDate}. An invoice is in your portal.\n\nWarmly,\nThe studio",
        ),
    };

    MessageTemplate {
        subject: subject.to_string(),
        body: body.to_string(),
    }
}

/// Merge an administrator override over the default, field by field.
/// Empty or whitespace-only fields count as absent.
fn merge_override(
    default: MessageTemplate,
    subject: Option<String>,
    body: Option<String>,
) -> MessageTemplate {
    let pick = |field: Option<String>, fallback: String| match field {
        Some(v) if !v.trim().is_empty() => v,
        _ => fallback,
    };

    MessageTemplate {
        subject: pick(subject, default.subject),
        body: pick(body, default.body),
    }
}

/// Replace every `{name}` token with its placeholder value.
///
/// Tokens are ASCII alphanumerics/underscores between braces. Recognized
/// tokens substitute their value; unrecognized tokens substitute the empty
/// string. Braces that do not form a token pass through literally.
pub fn substitute(input: &str, values: &Placeholders) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end)
                if end > 0
                    && after[..end]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                if let Some(value) = values.get(&after[..end]) {
                    out.push_str(value);
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Format a date the way it appears in client-facing messages,
/// e.g. `September 19, 2026`.
pub fn long_date(date: time::Date) -> String {
    let format = time::macros::format_description!("[month repr:long] [day padding:none], [year]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap already-substituted text in the standard email shell.
fn styled_html(text: &str) -> String {
    let body = html_escape(text).replace('\n', "<br>\n");
    format!(
        r#"<div style="font-family: Georgia, 'Times New Roman', serif; max-width: 560px; margin: 0 auto; color: #3d3d3d;">
  <div style="padding: 24px 0; border-bottom: 1px solid #e8e0d8;">
    <span style="font-size: 20px; letter-spacing: 2px;">GANACHE</span>
  </div>
  <div style="padding: 24px 0; font-size: 15px; line-height: 1.6;">
    {body}
  </div>
  <div style="padding: 16px 0; border-top: 1px solid #e8e0d8; font-size: 12px; color: #9a9a9a;">
    Sent by the studio. Reply to this email to reach us directly.
  </div>
</div>"#
    )
}

/// Render a resolved template: substitute once, then derive both forms from
/// the single substituted body.
pub fn render(template: &MessageTemplate, values: &Placeholders) -> RenderedMessage {
    let subject = substitute(&template.subject, values);
    let text = substitute(&template.body, values);
    let html = styled_html(&text);

    RenderedMessage {
        subject,
        text,
        html,
    }
}

/// Loads administrator overrides and resolves templates against defaults.
#[derive(Clone)]
pub struct TemplateStore {
    pool: PgPool,
}

impl TemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the effective template for a kind: administrator override
    /// merged field-by-field over the built-in default. A missing or
    /// unreadable override falls back entirely to the default.
    pub async fn resolve(&self, kind: NotificationKind) -> PaymentsResult<MessageTemplate> {
        let default = default_template(kind);

        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT subject, body FROM notification_templates WHERE kind = $1")
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(match row {
            Some((subject, body)) => merge_override(default, subject, body),
            None => default,
        })
    }

    /// Resolve and render in one step.
    pub async fn render(
        &self,
        kind: NotificationKind,
        values: &Placeholders,
    ) -> PaymentsResult<RenderedMessage> {
        let template = self.resolve(kind).await?;
        Ok(render(&template, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&'static str, &str)]) -> Placeholders {
        pairs
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_every_occurrence() {
        let out = substitute(
            "{firstName}, {firstName}, and {firstName} again",
            &values(&[("firstName", "Ada")]),
        );
        assert_eq!(out, "Ada, Ada, and Ada again");
        assert!(!out.contains("{firstName}"));
    }

    #[test]
    fn unknown_placeholders_become_empty() {
        let out = substitute("Hello {frstName}!", &values(&[("firstName", "Ada")]));
        assert_eq!(out, "Hello !");
    }

    #[test]
    fn non_token_braces_pass_through() {
        let out = substitute("set {a b} and {} and {open", &values(&[]));
        assert_eq!(out, "set {a b} and {} and {open");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        // A value containing brace syntax lands literally in both forms.
        let rendered = render(
            &MessageTemplate {
                subject: "Hi {firstName}".to_string(),
                body: "Note: {firstName}".to_string(),
            },
            &values(&[("firstName", "{eventDate}")]),
        );
        assert_eq!(rendered.text, "Note: {eventDate}");
        assert!(rendered.html.contains("{eventDate}"));
    }

    #[test]
    fn override_subject_keeps_default_body() {
        let default = default_template(NotificationKind::DepositReminder);
        let merged = merge_override(
            default.clone(),
            Some("Custom subject".to_string()),
            None,
        );
        assert_eq!(merged.subject, "Custom subject");
        assert_eq!(merged.body, default.body);
    }

    #[test]
    fn blank_override_fields_fall_back() {
        let default = default_template(NotificationKind::OneMonth);
        let merged = merge_override(default.clone(), Some("   ".to_string()), Some(String::new()));
        assert_eq!(merged, default);
    }

    #[test]
    fn html_and_text_come_from_the_same_substituted_body() {
        let rendered = render(
            &default_template(NotificationKind::TwoWeek),
            &values(&[
                ("firstName", "Ada"),
                ("eventDate", "September 19, 2026"),
                ("balance", "$1200.00"),
                ("dueDate", "September 5, 2026"),
            ]),
        );
        assert!(rendered.text.contains("$1200.00"));
        assert!(rendered.html.contains("$1200.00"));
        assert!(!rendered.text.contains("{balance}"));
        assert!(!rendered.html.contains("{balance}"));
    }

    #[test]
    fn html_escapes_markup_in_substituted_values() {
        let rendered = render(
            &MessageTemplate {
                subject: "s".to_string(),
                body: "{firstName}".to_string(),
            },
            &values(&[("firstName", "<Ada & Co>")]),
        );
        assert_eq!(rendered.text, "<Ada & Co>");
        assert!(rendered.html.contains("&lt;Ada &amp; Co&gt;"));
    }

    #[test]
    fn confirmation_kind_follows_invoice_type() {
        use crate::invoice::InvoiceType;
        assert_eq!(
            NotificationKind::for_invoice_type(InvoiceType::Tasting),
            NotificationKind::TastingConfirmed
        );
        assert_eq!(
            NotificationKind::for_invoice_type(InvoiceType::Deposit),
            NotificationKind::BookingConfirmed
        );
        assert_eq!(
            NotificationKind::for_invoice_type(InvoiceType::Final),
            NotificationKind::PaidInFull
        );
        assert_eq!(
            NotificationKind::for_invoice_type(InvoiceType::Other),
            NotificationKind::PaymentReceived
        );
    }
}
