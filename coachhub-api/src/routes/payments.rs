/// Payment and invoice endpoints
///
/// # Endpoints
///
/// - `GET   /api/v1/payments` - List (coaches see their own)
/// - `POST  /api/v1/payments` - Invoice with optional explicit amounts
/// - `POST  /api/v1/payments/generate` - Invoice computed from sessions
/// - `GET   /api/v1/payments/stats`
/// - `GET   /api/v1/payments/:paymentId`
/// - `PATCH /api/v1/payments/:paymentId` - Status, paid date, reminders
/// - `GET   /api/v1/payments/:paymentId/invoice` - HTML invoice download
/// - `POST  /api/v1/payments/:paymentId/send-invoice` - Email it to the coach
///
/// Entrepreneurs have no access to payments.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    pagination::{PageInfo, PageParams, DEFAULT_LIMIT, MAX_LIMIT},
    response::{ApiResponse, Created},
    routes::{attachment, parse_date_param},
    services::invoice::{invoice_filename, render_invoice},
};
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use coachhub_shared::{
    auth::{
        authorization::{require_organization, require_role, OrganizationScope, SCHEDULERS, STAFF},
        middleware::AuthContext,
    },
    billing::{self, InvoiceRequest},
    models::{
        activity::{Activity, ActivityType, NewActivity},
        organization::Organization,
        payment::{
            Payment, PaymentChanges, PaymentFilter, PaymentStats, PaymentStatus, Reminder,
            ReminderType, PAYMENT_DEFAULT_SORT, PAYMENT_SORT_KEYS,
        },
        user::{User, UserRole},
        SortOrder,
    },
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPaymentsQuery {
    pub status: Option<PaymentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePaymentRequest {
    pub coach_id: Uuid,

    #[validate(length(min = 1, message = "At least one session is required"))]
    pub session_ids: Vec<Uuid>,

    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

fn validate_period(period: &Period) -> Result<(), ValidationError> {
    if period.start_date > period.end_date {
        let mut err = ValidationError::new("period_order");
        err.message = Some("Period start must not be after its end".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub coach_id: Uuid,

    #[validate(length(min = 1, message = "At least one session is required"))]
    pub session_ids: Vec<Uuid>,

    pub amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,

    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: Option<String>,

    pub due_date: Option<DateTime<Utc>>,

    #[validate(custom(function = "validate_period"))]
    pub period: Option<Period>,

    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    #[serde(rename = "type")]
    pub kind: ReminderType,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentRequest {
    pub status: Option<PaymentStatus>,

    #[validate(url(message = "Invalid invoice URL"))]
    pub invoice_url: Option<String>,

    pub paid_at: Option<DateTime<Utc>>,

    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,

    pub reminder: Option<ReminderRequest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub coach_id: Option<Uuid>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSent {
    pub payment_id: Uuid,
    pub invoice_number: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
}

/// Loads a payment the caller can see; coaches only their own.
async fn visible_payment(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Payment> {
    require_role(auth, SCHEDULERS)?;
    let organization_id = OrganizationScope::of(auth).filter()?;

    let payment = Payment::find_in_organization(&state.db, id, organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;

    if auth.role == UserRole::Coach && payment.coach_id != auth.user_id {
        return Err(ApiError::Forbidden(
            "Not authorized to access this payment".to_string(),
        ));
    }

    Ok(payment)
}

async fn log_generated(state: &AppState, auth: &AuthContext, payment: &Payment) {
    tracing::info!(
        payment_id = %payment.id,
        invoice = %payment.invoice_number,
        total = %payment.total_amount,
        sessions = payment.session_ids.len(),
        "Invoice generated"
    );

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::PaymentGenerated,
            format!("Invoice {} generated", payment.invoice_number),
        )
        .organization(Some(payment.organization_id))
        .actor(auth.user_id)
        .entity("payment", payment.id)
        .metadata(json!({
            "coachId": payment.coach_id,
            "totalAmount": payment.total_amount,
            "sessionCount": payment.session_ids.len(),
        })),
    )
    .await;
}

/// Invoice document for `payment`
async fn invoice_document(state: &AppState, payment: &Payment) -> ApiResult<(String, User)> {
    let organization = Organization::find_by_id(&state.db, payment.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    let coach = User::find_by_id(&state.db, payment.coach_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach not found".to_string()))?;

    Ok((render_invoice(payment, &organization, &coach), coach))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListPaymentsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Payment>>>> {
    require_role(&auth, SCHEDULERS)?;

    let filter = PaymentFilter {
        organization_id: OrganizationScope::of(&auth).filter()?,
        coach_id: (auth.role == UserRole::Coach).then_some(auth.user_id),
        status: query.status,
        ..Default::default()
    };
    let params = PageParams::resolve(query.page, query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let sort = SortOrder::parse(query.sort.as_deref(), PAYMENT_SORT_KEYS, PAYMENT_DEFAULT_SORT);

    let payments = Payment::list(&state.db, &filter, sort, params.limit, params.offset()).await?;
    let total = Payment::count(&state.db, &filter).await?;

    Ok(ApiResponse::paginated(payments, PageInfo::for_params(params, total)))
}

/// Invoices completed, unbilled sessions of one coach at the coach's rate
/// plus tax.
pub async fn generate_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<GeneratePaymentRequest>,
) -> ApiResult<Created<Payment>> {
    require_role(&auth, STAFF)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    let mut invoice = InvoiceRequest::generate(organization_id, req.coach_id, req.session_ids);
    invoice.notes = req.notes;
    invoice.created_by = Some(auth.user_id);

    let payment = billing::create_invoice(&state.db, invoice).await?;
    log_generated(&state, &auth, &payment).await;

    Ok(ApiResponse::created(payment))
}

pub async fn create_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<Created<Payment>> {
    require_role(&auth, STAFF)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    let invoice = InvoiceRequest {
        organization_id,
        coach_id: req.coach_id,
        session_ids: req.session_ids,
        notes: req.notes,
        created_by: Some(auth.user_id),
        amount: req.amount,
        tax_amount: req.tax_amount,
        currency: req.currency.map(|c| c.to_uppercase()),
        due_date: req.due_date,
        period: req.period.map(|p| (p.start_date, p.end_date)),
    };

    let payment = billing::create_invoice(&state.db, invoice).await?;
    log_generated(&state, &auth, &payment).await;

    Ok(ApiResponse::created(payment))
}

pub async fn payment_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<ApiResponse<PaymentStats>>> {
    require_role(&auth, SCHEDULERS)?;

    let coach_id = match auth.role {
        UserRole::Coach => Some(auth.user_id),
        _ => query.coach_id,
    };

    let filter = PaymentFilter {
        organization_id: OrganizationScope::of(&auth).filter()?,
        coach_id,
        status: None,
        from: parse_date_param(query.start_date.as_deref(), false),
        to: parse_date_param(query.end_date.as_deref(), true),
    };

    Ok(ApiResponse::ok(Payment::stats(&state.db, &filter).await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Payment>>> {
    Ok(ApiResponse::ok(visible_payment(&state, &auth, payment_id).await?))
}

pub async fn update_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<UpdatePaymentRequest>,
) -> ApiResult<Json<ApiResponse<Payment>>> {
    require_role(&auth, STAFF)?;
    req.validate()?;

    let current = visible_payment(&state, &auth, payment_id).await?;

    let mut payment = billing::update_payment(
        &state.db,
        payment_id,
        PaymentChanges {
            status: req.status,
            invoice_url: req.invoice_url,
            paid_at: req.paid_at,
            notes: req.notes,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;

    if payment.status == PaymentStatus::Paid && current.status != PaymentStatus::Paid {
        Activity::log(
            &state.db,
            NewActivity::new(
                ActivityType::PaymentCompleted,
                format!("Invoice {} paid", payment.invoice_number),
            )
            .organization(Some(payment.organization_id))
            .actor(auth.user_id)
            .entity("payment", payment.id)
            .metadata(json!({ "totalAmount": payment.total_amount })),
        )
        .await;
    }

    if let Some(reminder) = req.reminder {
        let reminder = Reminder {
            sent_at: Utc::now(),
            kind: reminder.kind,
        };
        payment = Payment::add_reminder(&state.db, payment_id, &reminder)
            .await?
            .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;
    }

    Ok(ApiResponse::ok(payment))
}

pub async fn download_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Response> {
    let payment = visible_payment(&state, &auth, payment_id).await?;
    let (html, _) = invoice_document(&state, &payment).await?;

    attachment(
        "text/html; charset=utf-8",
        &invoice_filename(&payment.invoice_number),
        html,
    )
}

pub async fn send_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<InvoiceSent>>> {
    require_role(&auth, STAFF)?;

    let payment = visible_payment(&state, &auth, payment_id).await?;
    let (html, coach) = invoice_document(&state, &payment).await?;

    state
        .email
        .send_invoice(&coach.email, Some(&coach.full_name()), &payment.invoice_number, html)
        .await?;

    let sent_at = Utc::now();
    Payment::add_reminder(
        &state.db,
        payment.id,
        &Reminder {
            sent_at,
            kind: ReminderType::Email,
        },
    )
    .await?;

    tracing::info!(payment_id = %payment.id, recipient = %coach.email, "Invoice emailed");

    Ok(ApiResponse::ok(InvoiceSent {
        payment_id: payment.id,
        invoice_number: payment.invoice_number,
        recipient: coach.email,
        sent_at,
    }))
}
