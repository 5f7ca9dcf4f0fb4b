/// Coaching session endpoints
///
/// # Endpoints
///
/// - `GET    /api/v1/sessions` - List (coaches and entrepreneurs see their own)
/// - `POST   /api/v1/sessions` - Book a session
/// - `POST   /api/v1/sessions/check-conflict` - Dry-run the overlap check
/// - `GET    /api/v1/sessions/calendar` - Month view grouped by day
/// - `GET    /api/v1/sessions/:sessionId`
/// - `PATCH  /api/v1/sessions/:sessionId` - Reschedule or change status
/// - `DELETE /api/v1/sessions/:sessionId`
/// - `POST   /api/v1/sessions/:sessionId/rate` - Entrepreneur feedback
///
/// # Conflicts
///
/// A coach cannot hold two active sessions whose windows overlap. Booking
/// and rescheduling answer `409` with the clashing session in `data`:
///
/// ```json
/// {
///   "error": "conflict",
///   "message": "Coach already has a session in this time window",
///   "data": { "id": "...", "scheduledAt": "...", "endTime": "..." }
/// }
/// ```

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    pagination::{PageInfo, PageParams, DEFAULT_LIMIT, MAX_LIMIT},
    response::{ApiResponse, Created},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Datelike, Utc};
use coachhub_shared::{
    auth::{
        authorization::{
            require_organization, require_participant, require_role, OrganizationScope,
            SCHEDULERS, STAFF,
        },
        middleware::AuthContext,
    },
    models::{
        activity::{Activity, ActivityType, NewActivity},
        session::{
            group_by_day, month_bounds, AgendaItem, NewSession, ScheduleOutcome, Session,
            SessionChanges, SessionFilter, SessionStatus, TimeWindow, MAX_DURATION_MINUTES,
            MIN_DURATION_MINUTES, SESSION_DEFAULT_SORT, SESSION_SORT_KEYS,
        },
        user::{User, UserRole},
        SortOrder,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

const CONFLICT_MESSAGE: &str = "Coach already has a session in this time window";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
    pub upcoming: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub coach_id: Uuid,
    pub entrepreneur_id: Uuid,
    pub manager_id: Uuid,
    pub scheduled_at: DateTime<Utc>,

    #[validate(range(min = 15, max = 480, message = "Duration must be 15-480 minutes"))]
    pub duration: i32,

    #[serde(default)]
    pub agenda_items: Vec<AgendaItem>,

    #[validate(length(max = 500, message = "Location must be at most 500 characters"))]
    pub location: Option<String>,

    #[validate(url(message = "Invalid video conference URL"))]
    pub video_conference_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckConflictRequest {
    pub coach_id: Uuid,
    pub scheduled_at: DateTime<Utc>,

    #[validate(range(min = 15, max = 480, message = "Duration must be 15-480 minutes"))]
    pub duration: i32,

    pub exclude_session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_session: Option<Session>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
    /// Only `month` is supported
    pub view: Option<String>,
    pub coach_id: Option<Uuid>,
    pub entrepreneur_id: Option<Uuid>,
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub calendar: BTreeMap<String, Vec<Session>>,
    pub month: u32,
    pub year: i32,
    pub total: usize,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    pub scheduled_at: Option<DateTime<Utc>>,

    #[validate(range(min = 15, max = 480, message = "Duration must be 15-480 minutes"))]
    pub duration: Option<i32>,

    pub status: Option<SessionStatus>,

    pub notes: Option<JsonValue>,

    pub agenda_items: Option<Vec<AgendaItem>>,

    #[validate(length(max = 500, message = "Location must be at most 500 characters"))]
    pub location: Option<String>,

    #[validate(url(message = "Invalid video conference URL"))]
    pub video_conference_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RateSessionRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,

    #[validate(length(max = 2000, message = "Comment must be at most 2000 characters"))]
    pub comment: Option<String>,
}

/// Coaches and entrepreneurs only ever see their own sessions.
fn participant_filter(auth: &AuthContext) -> (Option<Uuid>, Option<Uuid>) {
    match auth.role {
        UserRole::Coach => (Some(auth.user_id), None),
        UserRole::Entrepreneur => (None, Some(auth.user_id)),
        UserRole::Admin | UserRole::Manager => (None, None),
    }
}

fn billed() -> ApiError {
    ApiError::Conflict("Billed sessions cannot be rescheduled or change status".to_string())
}

fn conflict(existing: Session) -> ApiResult<ApiError> {
    Ok(ApiError::ConflictWith {
        message: CONFLICT_MESSAGE.to_string(),
        data: serde_json::to_value(existing)?,
    })
}

/// Loads `user_id` from the organization and checks its role.
async fn member_with_role(
    state: &AppState,
    organization_id: Uuid,
    user_id: Uuid,
    roles: &[UserRole],
    label: &str,
) -> ApiResult<User> {
    User::find_in_organization(&state.db, user_id, Some(organization_id))
        .await?
        .filter(|u| u.is_active && roles.contains(&u.role))
        .ok_or_else(|| ApiError::BadRequest(format!("{} not found in organization", label)))
}

/// Loads a session visible to the caller; other tenants get 404, strangers 403.
async fn visible_session(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Session> {
    let organization_id = OrganizationScope::of(auth).filter()?;

    let session = Session::find_in_organization(&state.db, id, organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    require_participant(auth, &session.participants())?;
    Ok(session)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Session>>>> {
    let (coach_id, entrepreneur_id) = participant_filter(&auth);

    let filter = SessionFilter {
        organization_id: OrganizationScope::of(&auth).filter()?,
        coach_id,
        entrepreneur_id,
        status: query.status,
        upcoming: query.upcoming.unwrap_or(false),
        ..Default::default()
    };
    let params = PageParams::resolve(query.page, query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let sort = SortOrder::parse(query.sort.as_deref(), SESSION_SORT_KEYS, SESSION_DEFAULT_SORT);

    let sessions = Session::list(&state.db, &filter, sort, params.limit, params.offset()).await?;
    let total = Session::count(&state.db, &filter).await?;

    Ok(ApiResponse::paginated(sessions, PageInfo::for_params(params, total)))
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Created<Session>> {
    require_role(&auth, SCHEDULERS)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    if auth.role == UserRole::Coach && req.coach_id != auth.user_id {
        return Err(ApiError::Forbidden(
            "Coaches can only schedule their own sessions".to_string(),
        ));
    }

    member_with_role(&state, organization_id, req.coach_id, &[UserRole::Coach], "Coach").await?;
    member_with_role(
        &state,
        organization_id,
        req.entrepreneur_id,
        &[UserRole::Entrepreneur],
        "Entrepreneur",
    )
    .await?;
    member_with_role(&state, organization_id, req.manager_id, STAFF, "Manager").await?;

    let outcome = Session::schedule(
        &state.db,
        NewSession {
            organization_id,
            coach_id: req.coach_id,
            entrepreneur_id: req.entrepreneur_id,
            manager_id: req.manager_id,
            scheduled_at: req.scheduled_at,
            duration: req.duration,
            agenda_items: req.agenda_items,
            location: req.location,
            video_conference_url: req.video_conference_url,
        },
    )
    .await?;

    let session = match outcome {
        ScheduleOutcome::Created(session) => session,
        ScheduleOutcome::Conflict(existing) => {
            tracing::debug!(coach_id = %req.coach_id, conflicting = %existing.id, "Booking rejected");
            return Err(conflict(existing)?);
        }
        ScheduleOutcome::Billed(_) => {
            return Err(ApiError::InternalError("New session reported as billed".to_string()))
        }
    };

    tracing::info!(session_id = %session.id, coach_id = %session.coach_id, "Session scheduled");

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::SessionCreated,
            format!("Session scheduled for {}", session.scheduled_at.to_rfc3339()),
        )
        .organization(Some(organization_id))
        .actor(auth.user_id)
        .entity("session", session.id)
        .metadata(json!({
            "coachId": session.coach_id,
            "entrepreneurId": session.entrepreneur_id,
        })),
    )
    .await;

    Ok(ApiResponse::created(session))
}

pub async fn check_conflict(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CheckConflictRequest>,
) -> ApiResult<Json<ApiResponse<ConflictCheckResponse>>> {
    require_role(&auth, SCHEDULERS)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    member_with_role(&state, organization_id, req.coach_id, &[UserRole::Coach], "Coach").await?;

    let window = TimeWindow::new(req.scheduled_at, req.duration);
    let existing =
        Session::find_conflict(&state.db, req.coach_id, window, req.exclude_session_id).await?;

    Ok(ApiResponse::ok(ConflictCheckResponse {
        has_conflict: existing.is_some(),
        conflicting_session: existing,
    }))
}

pub async fn calendar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<CalendarQuery>,
) -> ApiResult<Json<ApiResponse<CalendarResponse>>> {
    if query.view.as_deref().is_some_and(|v| v != "month") {
        return Err(ApiError::BadRequest("Only the month view is supported".to_string()));
    }

    let today = Utc::now();
    let month = query.month.unwrap_or_else(|| today.month());
    let year = query.year.unwrap_or_else(|| today.year());

    let (from, to) = month_bounds(year, month)
        .ok_or_else(|| ApiError::BadRequest("Month must be between 1 and 12".to_string()))?;

    let (own_coach, own_entrepreneur) = participant_filter(&auth);

    let filter = SessionFilter {
        organization_id: OrganizationScope::of(&auth).filter()?,
        coach_id: own_coach.or(query.coach_id),
        entrepreneur_id: own_entrepreneur.or(query.entrepreneur_id),
        status: query.status,
        upcoming: false,
        from: Some(from),
        to: Some(to),
    };

    let sessions = Session::list_all(&state.db, &filter).await?;
    let total = sessions.len();

    Ok(ApiResponse::ok(CalendarResponse {
        calendar: group_by_day(sessions),
        month,
        year,
        total,
    }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Session>>> {
    Ok(ApiResponse::ok(visible_session(&state, &auth, session_id).await?))
}

pub async fn update_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<UpdateSessionRequest>,
) -> ApiResult<Json<ApiResponse<Session>>> {
    require_role(&auth, SCHEDULERS)?;
    req.validate()?;

    let current = visible_session(&state, &auth, session_id).await?;

    let changes = SessionChanges {
        scheduled_at: req.scheduled_at,
        duration: req.duration,
        status: req.status,
        notes: req.notes,
        agenda_items: req.agenda_items,
        location: req.location,
        video_conference_url: req.video_conference_url,
    };

    if changes.blocked_by_billing(&current) {
        return Err(billed());
    }

    let status_change = changes.status.filter(|s| *s != current.status);

    let session = match Session::apply_changes(&state.db, &current, changes).await? {
        ScheduleOutcome::Created(session) => session,
        ScheduleOutcome::Conflict(existing) => return Err(conflict(existing)?),
        ScheduleOutcome::Billed(session) => {
            tracing::warn!(session_id = %session.id, payment_id = ?session.payment_id, "Session billed during update");
            return Err(billed());
        }
    };

    let logged = match status_change {
        Some(SessionStatus::Completed) => Some((ActivityType::SessionCompleted, "completed")),
        Some(SessionStatus::Cancelled) => Some((ActivityType::SessionCancelled, "cancelled")),
        _ => None,
    };

    if let Some((activity_type, verb)) = logged {
        Activity::log(
            &state.db,
            NewActivity::new(activity_type, format!("Session {}", verb))
                .organization(Some(session.organization_id))
                .actor(auth.user_id)
                .entity("session", session.id)
                .metadata(json!({ "from": current.status.as_str() })),
        )
        .await;
    }

    Ok(ApiResponse::ok(session))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_role(&auth, STAFF)?;

    let session = visible_session(&state, &auth, session_id).await?;

    if session.is_billed() || !Session::delete_unbilled(&state.db, session.id).await? {
        return Err(ApiError::Conflict("Billed sessions cannot be deleted".to_string()));
    }

    tracing::info!(session_id = %session_id, by = %auth.user_id, "Session deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn rate_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RateSessionRequest>,
) -> ApiResult<Json<ApiResponse<Session>>> {
    require_role(&auth, &[UserRole::Entrepreneur])?;
    req.validate()?;

    let session = visible_session(&state, &auth, session_id).await?;

    if session.entrepreneur_id != auth.user_id {
        return Err(ApiError::Forbidden(
            "Only the session's entrepreneur can rate it".to_string(),
        ));
    }
    if session.status != SessionStatus::Completed {
        return Err(ApiError::BadRequest(
            "Only completed sessions can be rated".to_string(),
        ));
    }

    let session = Session::rate(&state.db, session_id, req.rating, req.comment)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Only completed sessions can be rated".to_string()))?;

    Ok(ApiResponse::ok(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: UserRole) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            organization_id: Some(Uuid::new_v4()),
            role,
            email: "user@example.com".to_string(),
        }
    }

    #[test]
    fn test_participant_filter() {
        let coach = ctx(UserRole::Coach);
        assert_eq!(participant_filter(&coach), (Some(coach.user_id), None));

        let founder = ctx(UserRole::Entrepreneur);
        assert_eq!(participant_filter(&founder), (None, Some(founder.user_id)));

        assert_eq!(participant_filter(&ctx(UserRole::Manager)), (None, None));
    }

    #[test]
    fn test_duration_bounds_match_model() {
        let mut req: CreateSessionRequest = serde_json::from_value(json!({
            "coachId": Uuid::new_v4(),
            "entrepreneurId": Uuid::new_v4(),
            "managerId": Uuid::new_v4(),
            "scheduledAt": "2026-03-02T10:00:00Z",
            "duration": MIN_DURATION_MINUTES,
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(req.agenda_items.is_empty());

        req.duration = MAX_DURATION_MINUTES + 1;
        assert!(req.validate().unwrap_err().field_errors().contains_key("duration"));

        req.duration = MIN_DURATION_MINUTES - 1;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_rating_range() {
        assert!(RateSessionRequest { rating: 5, comment: None }.validate().is_ok());
        assert!(RateSessionRequest { rating: 0, comment: None }.validate().is_err());
        assert!(RateSessionRequest { rating: 6, comment: None }.validate().is_err());
    }

    #[test]
    fn test_conflict_response_shape() {
        let response = ConflictCheckResponse {
            has_conflict: false,
            conflicting_session: None,
        };
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json, json!({ "hasConflict": false }));
    }
}
