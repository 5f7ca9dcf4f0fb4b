/// Goal endpoints
///
/// # Endpoints
///
/// - `GET    /api/v1/goals`
/// - `POST   /api/v1/goals`
/// - `GET    /api/v1/goals/:goalId`
/// - `PATCH  /api/v1/goals/:goalId`
/// - `DELETE /api/v1/goals/:goalId`
/// - `PATCH  /api/v1/goals/:goalId/progress`
/// - `PATCH  /api/v1/goals/:goalId/milestones/:milestoneId`
/// - `POST   /api/v1/goals/:goalId/comments`
/// - `POST   /api/v1/goals/:goalId/collaborators`
/// - `POST   /api/v1/goals/:goalId/sessions/:sessionId`
///
/// # Access
///
/// Admins and managers see every goal of their organization, coaches the
/// goals they coach or collaborate on, entrepreneurs their own. A goal is
/// loaded, changed in memory and written back with an optimistic check on
/// `updatedAt`; a lost race answers `409`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::{ApiResponse, Created},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use coachhub_shared::{
    auth::{
        authorization::{require_organization, require_role, OrganizationScope, SCHEDULERS, STAFF},
        middleware::AuthContext,
    },
    models::{
        goal::{
            Goal, GoalChanges, GoalComment, GoalFilter, GoalPriority, GoalStatus, Milestone,
            MilestoneStatus, NewGoal,
        },
        session::Session,
        user::{User, UserRole},
    },
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

const DEFAULT_COLLABORATOR_ROLE: &str = "contributor";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGoalsQuery {
    pub status: Option<GoalStatus>,
    pub priority: Option<GoalPriority>,
    pub include_archived: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneInput {
    #[validate(length(min = 1, max = 200, message = "Milestone title must be 1-200 characters"))]
    pub title: String,

    pub target_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoalRequest {
    pub entrepreneur_id: Uuid,
    pub coach_id: Uuid,

    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,

    pub status: Option<GoalStatus>,
    pub priority: Option<GoalPriority>,
    pub target_date: Option<DateTime<Utc>>,

    #[serde(default)]
    #[validate(nested)]
    pub milestones: Vec<MilestoneInput>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGoalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,

    pub status: Option<GoalStatus>,
    pub priority: Option<GoalPriority>,

    #[validate(range(min = 0, max = 100, message = "Progress must be between 0 and 100"))]
    pub progress: Option<i32>,

    pub target_date: Option<DateTime<Utc>>,
    pub is_archived: Option<bool>,
}

impl From<UpdateGoalRequest> for GoalChanges {
    fn from(req: UpdateGoalRequest) -> Self {
        GoalChanges {
            title: req.title,
            description: req.description,
            status: req.status,
            priority: req.priority,
            progress: req.progress,
            target_date: req.target_date,
            is_archived: req.is_archived,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProgressRequest {
    #[validate(range(min = 0, max = 100, message = "Progress must be between 0 and 100"))]
    pub progress: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MilestoneUpdateRequest {
    pub status: MilestoneStatus,

    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1-2000 characters"))]
    pub text: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, max = 50, message = "Role must be 1-50 characters"))]
    pub role: Option<String>,
}

/// Loads a goal the caller can read.
async fn visible_goal(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<Goal> {
    let organization_id = OrganizationScope::of(auth).filter()?;

    let goal = Goal::find_in_organization(&state.db, id, organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Goal not found".to_string()))?;

    if !goal.is_visible_to(auth.user_id, auth.role) {
        return Err(ApiError::Forbidden(
            "Not authorized to access this goal".to_string(),
        ));
    }

    Ok(goal)
}

async fn save(state: &AppState, goal: &Goal) -> ApiResult<Goal> {
    goal.save(&state.db).await?.ok_or_else(|| {
        ApiError::Conflict("Goal was modified concurrently, reload and retry".to_string())
    })
}

async fn require_member(
    state: &AppState,
    organization_id: Uuid,
    user_id: Uuid,
    role: UserRole,
) -> ApiResult<User> {
    User::find_in_organization(&state.db, user_id, Some(organization_id))
        .await?
        .filter(|u| u.role == role)
        .ok_or_else(|| ApiError::BadRequest(format!("{} not found in organization", capitalized(role))))
}

fn capitalized(role: UserRole) -> String {
    let name = role.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub async fn list_goals(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListGoalsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Goal>>>> {
    let mut filter = GoalFilter {
        organization_id: OrganizationScope::of(&auth).filter()?,
        status: query.status,
        priority: query.priority,
        include_archived: query.include_archived.unwrap_or(false),
        ..Default::default()
    };

    match auth.role {
        UserRole::Coach => filter.visible_to_coach = Some(auth.user_id),
        UserRole::Entrepreneur => filter.entrepreneur_id = Some(auth.user_id),
        UserRole::Admin | UserRole::Manager => {}
    }

    Ok(ApiResponse::ok(Goal::list(&state.db, &filter).await?))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateGoalRequest>,
) -> ApiResult<Created<Goal>> {
    require_role(&auth, SCHEDULERS)?;
    let organization_id = require_organization(&auth)?;
    req.validate()?;

    require_member(&state, organization_id, req.entrepreneur_id, UserRole::Entrepreneur).await?;
    require_member(&state, organization_id, req.coach_id, UserRole::Coach).await?;

    let goal = Goal::create(
        &state.db,
        NewGoal {
            organization_id,
            entrepreneur_id: req.entrepreneur_id,
            coach_id: req.coach_id,
            title: req.title,
            description: req.description,
            status: req.status.unwrap_or(GoalStatus::NotStarted),
            priority: req.priority.unwrap_or(GoalPriority::Medium),
            target_date: req.target_date,
            milestones: req
                .milestones
                .into_iter()
                .map(|m| Milestone::new(m.title, m.target_date))
                .collect(),
        },
    )
    .await?;

    tracing::info!(goal_id = %goal.id, entrepreneur_id = %goal.entrepreneur_id, "Goal created");

    Ok(ApiResponse::created(goal))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(goal_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Goal>>> {
    Ok(ApiResponse::ok(visible_goal(&state, &auth, goal_id).await?))
}

pub async fn update_goal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(goal_id): Path<Uuid>,
    Json(req): Json<UpdateGoalRequest>,
) -> ApiResult<Json<ApiResponse<Goal>>> {
    req.validate()?;
    let changes = GoalChanges::from(req);

    if auth.role == UserRole::Entrepreneur && !changes.only_progress_and_status() {
        return Err(ApiError::Forbidden(
            "Entrepreneurs can only update progress and status".to_string(),
        ));
    }

    let mut goal = visible_goal(&state, &auth, goal_id).await?;
    goal.apply_changes(changes, auth.user_id, Utc::now())?;

    Ok(ApiResponse::ok(save(&state, &goal).await?))
}

pub async fn delete_goal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(goal_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_role(&auth, STAFF)?;

    let goal = visible_goal(&state, &auth, goal_id).await?;
    if !Goal::delete(&state.db, goal.id).await? {
        return Err(ApiError::NotFound("Goal not found".to_string()));
    }

    tracing::info!(goal_id = %goal_id, by = %auth.user_id, "Goal deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_progress(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(goal_id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> ApiResult<Json<ApiResponse<Goal>>> {
    req.validate()?;

    let mut goal = visible_goal(&state, &auth, goal_id).await?;
    goal.set_progress(req.progress, auth.user_id, Utc::now())?;

    Ok(ApiResponse::ok(save(&state, &goal).await?))
}

pub async fn update_milestone(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((goal_id, milestone_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<MilestoneUpdateRequest>,
) -> ApiResult<Json<ApiResponse<Goal>>> {
    req.validate()?;

    let mut goal = visible_goal(&state, &auth, goal_id).await?;
    goal.update_milestone(milestone_id, req.status, req.notes, auth.user_id, Utc::now())?;

    Ok(ApiResponse::ok(save(&state, &goal).await?))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(goal_id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<Created<GoalComment>> {
    req.validate()?;

    let mut goal = visible_goal(&state, &auth, goal_id).await?;
    let comment = goal.add_comment(auth.user_id, req.text, Utc::now()).clone();
    save(&state, &goal).await?;

    Ok(ApiResponse::created(comment))
}

pub async fn add_collaborator(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(goal_id): Path<Uuid>,
    Json(req): Json<CollaboratorRequest>,
) -> ApiResult<Created<Goal>> {
    require_role(&auth, SCHEDULERS)?;
    req.validate()?;

    let mut goal = visible_goal(&state, &auth, goal_id).await?;

    User::find_in_organization(&state.db, req.user_id, Some(goal.organization_id))
        .await?
        .ok_or_else(|| ApiError::BadRequest("User not found in organization".to_string()))?;

    let role = req.role.unwrap_or_else(|| DEFAULT_COLLABORATOR_ROLE.to_string());
    goal.add_collaborator(req.user_id, role, Utc::now())?;

    Ok(ApiResponse::created(save(&state, &goal).await?))
}

pub async fn link_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((goal_id, session_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<ApiResponse<Goal>>> {
    require_role(&auth, SCHEDULERS)?;

    let mut goal = visible_goal(&state, &auth, goal_id).await?;

    Session::find_in_organization(&state.db, session_id, Some(goal.organization_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    goal.link_session(session_id)?;

    Ok(ApiResponse::ok(save(&state, &goal).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entrepreneur_change_detection() {
        let progress_only = GoalChanges::from(UpdateGoalRequest {
            progress: Some(40),
            status: Some(GoalStatus::InProgress),
            ..Default::default()
        });
        assert!(progress_only.only_progress_and_status());

        let retitled = GoalChanges::from(UpdateGoalRequest {
            title: Some("New title".to_string()),
            ..Default::default()
        });
        assert!(!retitled.only_progress_and_status());
    }

    #[test]
    fn test_create_request_validates_milestones() {
        let req: CreateGoalRequest = serde_json::from_value(json!({
            "entrepreneurId": Uuid::new_v4(),
            "coachId": Uuid::new_v4(),
            "title": "Close seed round",
            "milestones": [{ "title": "" }]
        }))
        .unwrap();

        assert!(req.validate().is_err());
    }

    #[test]
    fn test_progress_range() {
        assert!(ProgressRequest { progress: 100 }.validate().is_ok());
        assert!(ProgressRequest { progress: 101 }.validate().is_err());
        assert!(ProgressRequest { progress: -1 }.validate().is_err());
    }

    #[test]
    fn test_capitalized_role() {
        assert_eq!(capitalized(UserRole::Entrepreneur), "Entrepreneur");
        assert_eq!(capitalized(UserRole::Coach), "Coach");
    }
}
