//! CSV rendering for the dashboard export.
//!
//! One file holds a section per entity: a `# name` line, a header row, then
//! the records. Fields are quoted per RFC 4180 and lines end with CRLF.

use coachhub_shared::models::goal::Goal;
use coachhub_shared::models::payment::Payment;
use coachhub_shared::models::session::Session;
use coachhub_shared::models::user::User;
use std::borrow::Cow;

const CRLF: &str = "\r\n";

/// Quotes `field` when it contains a comma, quote or line break.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn write_row<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    let line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push_str(CRLF);
}

/// Multi-section CSV document
#[derive(Debug, Default)]
pub struct CsvDocument {
    out: String,
}

impl CsvDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section<I>(&mut self, name: &str, headers: &[&str], rows: I) -> &mut Self
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        if !self.out.is_empty() {
            self.out.push_str(CRLF);
        }
        self.out.push_str("# ");
        self.out.push_str(name);
        self.out.push_str(CRLF);

        write_row(&mut self.out, headers);
        for row in rows {
            write_row(&mut self.out, &row);
        }
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub const USER_HEADERS: &[&str] = &[
    "id", "email", "role", "firstName", "lastName", "hourlyRate", "startupName", "isActive", "createdAt",
];

pub fn user_row(user: &User) -> Vec<String> {
    vec![
        user.id.to_string(),
        user.email.clone(),
        user.role.to_string(),
        user.first_name.clone(),
        user.last_name.clone(),
        opt(user.hourly_rate),
        opt(user.startup_name.as_deref()),
        user.is_active.to_string(),
        user.created_at.to_rfc3339(),
    ]
}

pub const SESSION_HEADERS: &[&str] = &[
    "id", "coachId", "entrepreneurId", "scheduledAt", "duration", "status", "rating", "paymentId",
];

pub fn session_row(session: &Session) -> Vec<String> {
    vec![
        session.id.to_string(),
        session.coach_id.to_string(),
        session.entrepreneur_id.to_string(),
        session.scheduled_at.to_rfc3339(),
        session.duration.to_string(),
        session.status.as_str().to_string(),
        opt(session.rating),
        opt(session.payment_id),
    ]
}

pub const GOAL_HEADERS: &[&str] = &[
    "id", "title", "entrepreneurId", "coachId", "status", "priority", "progress", "targetDate",
];

pub fn goal_row(goal: &Goal) -> Vec<String> {
    vec![
        goal.id.to_string(),
        goal.title.clone(),
        goal.entrepreneur_id.to_string(),
        goal.coach_id.to_string(),
        goal.status.as_str().to_string(),
        goal.priority.as_str().to_string(),
        goal.progress.to_string(),
        opt(goal.target_date.map(|d| d.to_rfc3339())),
    ]
}

pub const PAYMENT_HEADERS: &[&str] = &[
    "id", "invoiceNumber", "coachId", "amount", "taxAmount", "totalAmount", "currency", "status", "dueDate", "paidAt",
];

pub fn payment_row(payment: &Payment) -> Vec<String> {
    vec![
        payment.id.to_string(),
        payment.invoice_number.clone(),
        payment.coach_id.to_string(),
        payment.amount.to_string(),
        payment.tax_amount.to_string(),
        payment.total_amount.to_string(),
        payment.currency.clone(),
        payment.status.as_str().to_string(),
        payment.due_date.to_rfc3339(),
        opt(payment.paid_at.map(|d| d.to_rfc3339())),
    ]
}
