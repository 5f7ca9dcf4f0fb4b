/// Invoice generation
///
/// Turns completed sessions into a [`Payment`]. Each session becomes a line
/// item priced at `duration / 60 * hourly_rate`, a flat 8% tax is added, the
/// next invoice number is drawn and the sessions are marked billed.
///
/// Everything happens in one transaction. The sessions are locked with
/// `FOR UPDATE` before validation and the billed marker is only set on rows
/// that are still unbilled, so a session can never end up on two invoices.
///
/// # Example
///
/// ```no_run
/// use coachhub_shared::billing::{create_invoice, InvoiceRequest};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, org: Uuid, coach: Uuid, sessions: Vec<Uuid>) -> Result<(), Box<dyn std::error::Error>> {
/// let payment = create_invoice(&pool, InvoiceRequest::generate(org, coach, sessions)).await?;
/// println!("{} for {}", payment.invoice_number, payment.total_amount);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::payment::{LineItem, NewPayment, Payment, PaymentChanges, PaymentStatus};
use crate::models::session::{Session, SessionStatus};
use crate::models::user::User;

/// 8%
pub const TAX_RATE: Decimal = Decimal::from_parts(8, 0, 0, false, 2);

pub const DEFAULT_CURRENCY: &str = "USD";

/// Days between issue and due date
pub const DEFAULT_DUE_DAYS: i64 = 30;

/// 9 999 999 999.99, the largest value of a `NUMERIC(12, 2)` column
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("At least one session is required")]
    NoSessions,

    #[error("Coach not found in this organization")]
    CoachNotFound,

    #[error("Coach has no hourly rate")]
    MissingHourlyRate,

    #[error("Sessions not found: {}", join_ids(.0))]
    SessionsNotFound(Vec<Uuid>),

    #[error("Session {0} is not completed")]
    NotCompleted(Uuid),

    #[error("Session {0} does not belong to this coach")]
    WrongCoach(Uuid),

    #[error("Sessions already billed: {}", join_ids(.0))]
    AlreadyBilled(Vec<Uuid>),

    #[error("Amounts must not be negative")]
    NegativeAmount,

    #[error("Payment {0} is void and cannot change status")]
    PaymentVoided(Uuid),

    #[error("Amount exceeds the maximum of {}", MAX_AMOUNT)]
    AmountTooLarge,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rounds half away from zero to cents.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices one session at `rate` per hour.
pub fn line_item(session: &Session, rate: Decimal) -> LineItem {
    let hours = Decimal::from(session.duration) / Decimal::from(60);

    LineItem {
        session_id: session.id,
        description: format!(
            "Coaching session on {} ({} min)",
            session.scheduled_at.format("%Y-%m-%d"),
            session.duration
        ),
        duration: session.duration,
        rate,
        amount: round2(hours * rate),
    }
}

/// Invoice amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl Totals {
    /// Every amount must fit [`MAX_AMOUNT`].
    fn new(subtotal: Decimal, tax: Decimal) -> Result<Self, BillingError> {
        let total = subtotal
            .checked_add(tax)
            .ok_or(BillingError::AmountTooLarge)?;

        if [subtotal, tax, total].iter().any(|v| *v > MAX_AMOUNT) {
            return Err(BillingError::AmountTooLarge);
        }

        Ok(Totals {
            subtotal,
            tax,
            total,
        })
    }
}

/// Sums line items and applies [`TAX_RATE`].
pub fn compute_totals(items: &[LineItem]) -> Result<Totals, BillingError> {
    let subtotal = items
        .iter()
        .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.amount))
        .ok_or(BillingError::AmountTooLarge)?;
    let tax = subtotal
        .checked_mul(TAX_RATE)
        .ok_or(BillingError::AmountTooLarge)?;

    Totals::new(subtotal, round2(tax))
}

/// Totals with optional manual overrides.
///
/// An explicit `amount` replaces the computed subtotal and its tax defaults
/// to zero; an explicit `tax` always wins.
pub fn resolve_totals(
    items: &[LineItem],
    amount: Option<Decimal>,
    tax: Option<Decimal>,
) -> Result<Totals, BillingError> {
    let totals = match amount {
        Some(amount) => Totals::new(round2(amount), round2(tax.unwrap_or(Decimal::ZERO)))?,
        None => {
            let computed = compute_totals(items)?;
            match tax {
                Some(tax) => Totals::new(computed.subtotal, round2(tax))?,
                None => computed,
            }
        }
    };

    if totals.subtotal.is_sign_negative() || totals.tax.is_sign_negative() {
        return Err(BillingError::NegativeAmount);
    }

    Ok(totals)
}

/// Every session must be completed, belong to `coach_id` and be unbilled.
pub fn validate_billable(sessions: &[Session], coach_id: Uuid) -> Result<(), BillingError> {
    if sessions.is_empty() {
        return Err(BillingError::NoSessions);
    }

    for session in sessions {
        if session.coach_id != coach_id {
            return Err(BillingError::WrongCoach(session.id));
        }
        if session.status != SessionStatus::Completed {
            return Err(BillingError::NotCompleted(session.id));
        }
    }

    let billed: Vec<Uuid> = sessions
        .iter()
        .filter(|s| s.is_billed())
        .map(|s| s.id)
        .collect();
    if !billed.is_empty() {
        return Err(BillingError::AlreadyBilled(billed));
    }

    Ok(())
}

/// `[earliest start, latest end]` of the billed sessions
pub fn billing_period(sessions: &[Session]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = sessions.iter().map(|s| s.scheduled_at).min()?;
    let end = sessions.iter().map(|s| s.end_time).max()?;
    Some((start, end))
}

/// What to invoice and any manual overrides
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    pub organization_id: Uuid,
    pub coach_id: Uuid,
    pub session_ids: Vec<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub period: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl InvoiceRequest {
    /// Fully computed invoice, no overrides
    pub fn generate(organization_id: Uuid, coach_id: Uuid, session_ids: Vec<Uuid>) -> Self {
        InvoiceRequest {
            organization_id,
            coach_id,
            session_ids,
            notes: None,
            created_by: None,
            amount: None,
            tax_amount: None,
            currency: None,
            due_date: None,
            period: None,
        }
    }
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Prices the sessions, inserts the payment and marks the sessions billed.
///
/// # Errors
///
/// Validation failures roll the transaction back and are reported as the
/// matching [`BillingError`]; a session billed concurrently yields
/// [`BillingError::AlreadyBilled`].
pub async fn create_invoice(pool: &PgPool, request: InvoiceRequest) -> Result<Payment, BillingError> {
    let session_ids = dedup(request.session_ids);
    if session_ids.is_empty() {
        return Err(BillingError::NoSessions);
    }

    let mut tx = pool.begin().await?;

    let coach = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND organization_id = $2 AND role = 'coach'",
    )
    .bind(request.coach_id)
    .bind(request.organization_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BillingError::CoachNotFound)?;

    let rate = coach.hourly_rate.ok_or(BillingError::MissingHourlyRate)?;

    let sessions = sqlx::query_as::<_, Session>(
        r#"
        SELECT * FROM sessions
        WHERE id = ANY($1) AND organization_id = $2
        ORDER BY scheduled_at, id
        FOR UPDATE
        "#,
    )
    .bind(&session_ids)
    .bind(request.organization_id)
    .fetch_all(&mut *tx)
    .await?;

    if sessions.len() != session_ids.len() {
        let found: HashSet<Uuid> = sessions.iter().map(|s| s.id).collect();
        let missing = session_ids
            .iter()
            .filter(|id| !found.contains(id))
            .copied()
            .collect();
        return Err(BillingError::SessionsNotFound(missing));
    }

    validate_billable(&sessions, coach.id)?;

    let line_items: Vec<LineItem> = sessions.iter().map(|s| line_item(s, rate)).collect();
    let totals = resolve_totals(&line_items, request.amount, request.tax_amount)?;
    let period = request.period.or_else(|| billing_period(&sessions));
    let invoice_number = Payment::next_invoice_number(&mut tx).await?;

    let payment = Payment::insert(
        &mut tx,
        NewPayment {
            organization_id: request.organization_id,
            coach_id: coach.id,
            session_ids: session_ids.clone(),
            line_items,
            amount: totals.subtotal,
            tax_amount: totals.tax,
            total_amount: totals.total,
            currency: request
                .currency
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            invoice_number,
            due_date: request
                .due_date
                .unwrap_or_else(|| Utc::now() + Duration::days(DEFAULT_DUE_DAYS)),
            period_start: period.map(|(start, _)| start),
            period_end: period.map(|(_, end)| end),
            notes: request.notes,
            created_by: request.created_by,
        },
    )
    .await?;

    let marked = sqlx::query(
        "UPDATE sessions SET payment_id = $1 WHERE id = ANY($2) AND payment_id IS NULL",
    )
    .bind(payment.id)
    .bind(&session_ids)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if marked != session_ids.len() as u64 {
        tx.rollback().await?;
        return Err(BillingError::AlreadyBilled(session_ids));
    }

    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        invoice_number = %payment.invoice_number,
        sessions = session_ids.len(),
        "Invoice generated"
    );

    Ok(payment)
}

/// Clears the billed marker of every session on `payment_id`.
pub async fn release_sessions(conn: &mut PgConnection, payment_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE sessions SET payment_id = NULL WHERE payment_id = $1")
        .bind(payment_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// A void payment has released its sessions, so it may never come back to
/// life.
pub fn check_status_change(
    id: Uuid,
    current: PaymentStatus,
    requested: Option<PaymentStatus>,
) -> Result<(), BillingError> {
    match (current, requested) {
        (PaymentStatus::Void, Some(next)) if next != PaymentStatus::Void => {
            Err(BillingError::PaymentVoided(id))
        }
        _ => Ok(()),
    }
}

/// Applies staff edits to a payment; voiding it frees its sessions for a new
/// invoice in the same transaction.
///
/// The payment row is locked first so the status check and the write see the
/// same state.
pub async fn update_payment(
    pool: &PgPool,
    id: Uuid,
    changes: PaymentChanges,
) -> Result<Option<Payment>, BillingError> {
    let mut tx = pool.begin().await?;

    let current: Option<PaymentStatus> =
        sqlx::query_scalar("SELECT status FROM payments WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(current) = current else {
        tx.rollback().await?;
        return Ok(None);
    };

    check_status_change(id, current, changes.status)?;
    let voiding = current != PaymentStatus::Void && changes.status == Some(PaymentStatus::Void);

    let Some(payment) = Payment::update(&mut tx, id, changes).await? else {
        tx.rollback().await?;
        return Ok(None);
    };

    if voiding {
        let released = release_sessions(&mut tx, payment.id).await?;
        tracing::info!(payment_id = %payment.id, released, "Payment voided");
    }

    tx.commit().await?;
    Ok(Some(payment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::tests::sample_session;
    use chrono::TimeZone;

    fn completed(coach_id: Uuid, minutes: i32) -> Session {
        let mut session = sample_session(
            SessionStatus::Completed,
            Utc.with_ymd_and_hms(2025, 2, 3, 14, 0, 0).unwrap(),
            minutes,
        );
        session.coach_id = coach_id;
        session
    }

    #[test]
    fn test_tax_rate_is_eight_percent() {
        assert_eq!(TAX_RATE, Decimal::new(8, 2));
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(Decimal::new(12345, 3)), Decimal::new(1235, 2));
        assert_eq!(round2(Decimal::new(12344, 3)), Decimal::new(1234, 2));
    }

    #[test]
    fn test_line_item_pricing() {
        let session = completed(Uuid::new_v4(), 90);
        let item = line_item(&session, Decimal::new(10000, 2));

        assert_eq!(item.amount, Decimal::new(15000, 2));
        assert_eq!(item.duration, 90);
        assert_eq!(item.session_id, session.id);
        assert_eq!(item.description, "Coaching session on 2025-02-03 (90 min)");
    }

    #[test]
    fn test_line_item_rounds_fractional_hours() {
        // 50 minutes at 75.00/h = 62.5
        let item = line_item(&completed(Uuid::new_v4(), 50), Decimal::new(7500, 2));
        assert_eq!(item.amount, Decimal::new(6250, 2));

        // 20 minutes at 100.00/h = 33.333..
        let item = line_item(&completed(Uuid::new_v4(), 20), Decimal::new(10000, 2));
        assert_eq!(item.amount, Decimal::new(3333, 2));
    }

    #[test]
    fn test_compute_totals() {
        let coach = Uuid::new_v4();
        let rate = Decimal::new(12000, 2);
        let items = vec![
            line_item(&completed(coach, 60), rate),
            line_item(&completed(coach, 30), rate),
        ];

        let totals = compute_totals(&items).unwrap();
        assert_eq!(totals.subtotal, Decimal::new(18000, 2));
        assert_eq!(totals.tax, Decimal::new(1440, 2));
        assert_eq!(totals.total, Decimal::new(19440, 2));
    }

    #[test]
    fn test_resolve_totals_overrides() {
        let coach = Uuid::new_v4();
        let items = vec![line_item(&completed(coach, 60), Decimal::new(10000, 2))];

        let explicit = resolve_totals(&items, Some(Decimal::new(5000, 2)), None).unwrap();
        assert_eq!(explicit.subtotal, Decimal::new(5000, 2));
        assert_eq!(explicit.tax, Decimal::ZERO);
        assert_eq!(explicit.total, Decimal::new(5000, 2));

        let taxed = resolve_totals(&items, None, Some(Decimal::new(1000, 2))).unwrap();
        assert_eq!(taxed.subtotal, Decimal::new(10000, 2));
        assert_eq!(taxed.total, Decimal::new(11000, 2));

        assert!(matches!(
            resolve_totals(&items, Some(Decimal::new(-1, 0)), None),
            Err(BillingError::NegativeAmount)
        ));
    }

    #[test]
    fn test_max_amount_matches_column() {
        assert_eq!(MAX_AMOUNT, Decimal::new(999_999_999_999, 2));
    }

    #[test]
    fn test_resolve_totals_rejects_oversized_amounts() {
        assert!(matches!(
            resolve_totals(&[], Some(Decimal::MAX), Some(Decimal::MAX)),
            Err(BillingError::AmountTooLarge)
        ));

        // Each part fits, the sum does not
        let half = Decimal::new(600_000_000_000, 2);
        assert!(matches!(
            resolve_totals(&[], Some(half), Some(half)),
            Err(BillingError::AmountTooLarge)
        ));

        assert!(resolve_totals(&[], Some(MAX_AMOUNT), None).is_ok());
    }

    #[test]
    fn test_void_is_terminal() {
        let id = Uuid::new_v4();

        for next in [PaymentStatus::Pending, PaymentStatus::Paid, PaymentStatus::Refunded] {
            assert!(matches!(
                check_status_change(id, PaymentStatus::Void, Some(next)),
                Err(BillingError::PaymentVoided(found)) if found == id
            ));
        }

        assert!(check_status_change(id, PaymentStatus::Void, Some(PaymentStatus::Void)).is_ok());
        assert!(check_status_change(id, PaymentStatus::Void, None).is_ok());
        assert!(check_status_change(id, PaymentStatus::Paid, Some(PaymentStatus::Void)).is_ok());
        assert!(check_status_change(id, PaymentStatus::Pending, Some(PaymentStatus::Paid)).is_ok());
    }

    #[test]
    fn test_validate_billable() {
        let coach = Uuid::new_v4();
        let ok = vec![completed(coach, 60), completed(coach, 45)];
        assert!(validate_billable(&ok, coach).is_ok());

        assert!(matches!(validate_billable(&[], coach), Err(BillingError::NoSessions)));

        let other_coach = completed(Uuid::new_v4(), 60);
        let id = other_coach.id;
        assert!(matches!(
            validate_billable(&[other_coach], coach),
            Err(BillingError::WrongCoach(found)) if found == id
        ));

        let mut scheduled = completed(coach, 60);
        scheduled.status = SessionStatus::Scheduled;
        assert!(matches!(
            validate_billable(&[scheduled], coach),
            Err(BillingError::NotCompleted(_))
        ));

        let mut billed = completed(coach, 60);
        billed.payment_id = Some(Uuid::new_v4());
        let billed_id = billed.id;
        match validate_billable(&[completed(coach, 30), billed], coach) {
            Err(BillingError::AlreadyBilled(ids)) => assert_eq!(ids, vec![billed_id]),
            other => panic!("expected AlreadyBilled, got {:?}", other),
        }
    }

    #[test]
    fn test_billing_period() {
        let coach = Uuid::new_v4();
        let early = completed(coach, 60);
        let mut late = completed(coach, 30);
        late.scheduled_at = early.scheduled_at + Duration::days(2);
        late.end_time = late.scheduled_at + Duration::minutes(30);

        let (start, end) = billing_period(&[late.clone(), early.clone()]).unwrap();
        assert_eq!(start, early.scheduled_at);
        assert_eq!(end, late.end_time);
        assert!(billing_period(&[]).is_none());
    }

    #[test]
    fn test_dedup_keeps_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup(vec![a, b, a]), vec![a, b]);
    }

    #[test]
    fn test_error_messages_list_ids() {
        let id = Uuid::nil();
        assert_eq!(
            BillingError::AlreadyBilled(vec![id]).to_string(),
            "Sessions already billed: 00000000-0000-0000-0000-000000000000"
        );
    }
}
