/// Payment (invoice) model
///
/// Payments are created by [`crate::billing`], which prices completed
/// sessions and marks them billed inside the same transaction. This module
/// only owns the row: insert, lookups, status changes and statistics.
///
/// Invoice numbers come from the `invoice_number_seq` sequence and are
/// formatted as `INV-000042`; the column carries a unique constraint.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::SortOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Void,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Void => "void",
        }
    }
}

/// Invoice line derived from one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub session_id: Uuid,
    pub description: String,
    /// Minutes
    pub duration: i32,
    /// Hourly rate
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    Email,
    Sms,
    InApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ReminderType,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub coach_id: Uuid,
    pub session_ids: Vec<Uuid>,
    pub line_items: Json<Vec<LineItem>>,
    /// Subtotal before tax
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub invoice_number: String,
    pub status: PaymentStatus,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub invoice_url: Option<String>,
    pub notes: Option<String>,
    pub reminders_sent: Json<Vec<Reminder>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fully priced invoice ready for insert
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub organization_id: Uuid,
    pub coach_id: Uuid,
    pub session_ids: Vec<Uuid>,
    pub line_items: Vec<LineItem>,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub invoice_number: String,
    pub due_date: DateTime<Utc>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Staff-side edits
#[derive(Debug, Clone, Default)]
pub struct PaymentChanges {
    pub status: Option<PaymentStatus>,
    pub invoice_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub organization_id: Option<Uuid>,
    pub coach_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Sort keys accepted by [`Payment::list`]
pub const PAYMENT_SORT_KEYS: &[(&str, &str)] = &[
    ("createdAt", "created_at"),
    ("dueDate", "due_date"),
    ("paidAt", "paid_at"),
    ("totalAmount", "total_amount"),
    ("invoiceNumber", "invoice_number"),
    ("status", "status"),
];

pub const PAYMENT_DEFAULT_SORT: SortOrder = SortOrder {
    column: "created_at",
    descending: true,
};

/// Count and sum of one status bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusBucket {
    pub count: i64,
    pub total: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    /// Sum of totals of paid invoices
    pub total_revenue: Decimal,
    pub total_amount: Decimal,
    pub total_tax: Decimal,
    pub average_payment: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub total: i64,
    pub by_status: BTreeMap<PaymentStatus, StatusBucket>,
    pub revenue: RevenueSummary,
}

/// `INV-` followed by the sequence value padded to six digits.
pub fn format_invoice_number(sequence: i64) -> String {
    format!("INV-{:06}", sequence)
}

const FILTER_CLAUSE: &str = r#"
    WHERE ($1::uuid IS NULL OR organization_id = $1)
      AND ($2::uuid IS NULL OR coach_id = $2)
      AND ($3::payment_status IS NULL OR status = $3)
      AND ($4::timestamptz IS NULL OR created_at >= $4)
      AND ($5::timestamptz IS NULL OR created_at <= $5)
"#;

impl Payment {
    /// Draws the next invoice number from the sequence.
    pub async fn next_invoice_number(conn: &mut PgConnection) -> Result<String, sqlx::Error> {
        let value: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(conn)
            .await?;

        Ok(format_invoice_number(value))
    }

    /// Inserts on an open connection so the caller can bundle it with the
    /// session updates.
    pub async fn insert(conn: &mut PgConnection, data: NewPayment) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                organization_id, coach_id, session_ids, line_items,
                amount, tax_amount, total_amount, currency, invoice_number,
                due_date, period_start, period_end, notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(data.organization_id)
        .bind(data.coach_id)
        .bind(data.session_ids)
        .bind(Json(data.line_items))
        .bind(data.amount)
        .bind(data.tax_amount)
        .bind(data.total_amount)
        .bind(data.currency)
        .bind(data.invoice_number)
        .bind(data.due_date)
        .bind(data.period_start)
        .bind(data.period_end)
        .bind(data.notes)
        .bind(data.created_by)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// `organization_id: None` searches every tenant
    pub async fn find_in_organization(
        pool: &PgPool,
        id: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE id = $1 AND ($2::uuid IS NULL OR organization_id = $2)",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await
    }

    /// Applies staff edits. Moving to `paid` stamps `paid_at` with now unless
    /// one is given.
    pub async fn update(
        conn: &mut PgConnection,
        id: Uuid,
        changes: PaymentChanges,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET
                status = COALESCE($2, status),
                invoice_url = COALESCE($3, invoice_url),
                paid_at = CASE
                    WHEN $4::timestamptz IS NOT NULL THEN $4
                    WHEN $2 = 'paid'::payment_status AND paid_at IS NULL THEN NOW()
                    ELSE paid_at
                END,
                notes = COALESCE($5, notes)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(changes.status)
        .bind(changes.invoice_url)
        .bind(changes.paid_at)
        .bind(changes.notes)
        .fetch_optional(conn)
        .await
    }

    /// Appends to `reminders_sent`.
    pub async fn add_reminder(
        pool: &PgPool,
        id: Uuid,
        reminder: &Reminder,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET reminders_sent = reminders_sent || jsonb_build_array($2::jsonb)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Json(reminder))
        .fetch_optional(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &PaymentFilter,
        sort: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT * FROM payments {} ORDER BY {} LIMIT $6 OFFSET $7",
            FILTER_CLAUSE,
            sort.to_sql()
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.status)
            .bind(filter.from)
            .bind(filter.to)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn count(pool: &PgPool, filter: &PaymentFilter) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM payments {}", FILTER_CLAUSE);

        sqlx::query_scalar(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.status)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(pool)
            .await
    }

    /// Every matching payment, newest first, for exports.
    pub async fn list_all(pool: &PgPool, filter: &PaymentFilter) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT * FROM payments {} ORDER BY created_at DESC, id DESC",
            FILTER_CLAUSE
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.status)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(pool)
            .await
    }

    /// Per-status buckets plus revenue totals.
    pub async fn stats(pool: &PgPool, filter: &PaymentFilter) -> Result<PaymentStats, sqlx::Error> {
        let query = format!(
            r#"
            SELECT status, COUNT(*), COALESCE(SUM(total_amount), 0),
                   COALESCE(SUM(amount), 0), COALESCE(SUM(tax_amount), 0)
            FROM payments {}
            GROUP BY status
            "#,
            FILTER_CLAUSE
        );

        let rows: Vec<(PaymentStatus, i64, Decimal, Decimal, Decimal)> = sqlx::query_as(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.status)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(pool)
            .await?;

        Ok(summarize(rows))
    }
}

/// Folds `(status, count, total, amount, tax)` rows into [`PaymentStats`].
pub fn summarize(rows: Vec<(PaymentStatus, i64, Decimal, Decimal, Decimal)>) -> PaymentStats {
    let mut stats = PaymentStats::default();

    for (status, count, total, amount, tax) in rows {
        stats.total += count;
        stats.revenue.total_amount += amount;
        stats.revenue.total_tax += tax;
        if status == PaymentStatus::Paid {
            stats.revenue.total_revenue += total;
        }
        stats.by_status.insert(status, StatusBucket { count, total });
    }

    if stats.total > 0 {
        let grand_total: Decimal = stats.by_status.values().map(|b| b.total).sum();
        stats.revenue.average_payment = (grand_total / Decimal::from(stats.total)).round_dp(2);
    }

    stats
}
