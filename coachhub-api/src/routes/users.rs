/// User management endpoints
///
/// # Endpoints
///
/// - `GET    /api/v1/users` - List users of the organization
/// - `POST   /api/v1/users` - Create a user
/// - `PATCH  /api/v1/users/me` - Update own profile (any role)
/// - `GET    /api/v1/users/:userId`
/// - `PATCH  /api/v1/users/:userId`
/// - `DELETE /api/v1/users/:userId` - Soft delete
///
/// Everything except `/me` is restricted to admins and managers and scoped
/// to the caller's organization.

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
use coachhub_shared::{
    auth::{
        authorization::{can_assign_role, require_role, OrganizationScope, STAFF},
        middleware::AuthContext,
        password,
    },
    models::{
        activity::{Activity, ActivityType, NewActivity},
        user::{CreateUser, UpdateUser, User, UserFilter, UserRole, USER_DEFAULT_SORT, USER_SORT_KEYS},
        SortOrder,
    },
    quota::QuotaEnforcer,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,

    pub role: UserRole,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: String,

    pub hourly_rate: Option<Decimal>,

    #[validate(length(min = 1, max = 200, message = "Startup name must be 1-200 characters"))]
    pub startup_name: Option<String>,

    #[validate(length(max = 30, message = "Phone must be at most 30 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 64, message = "Timezone must be at most 64 characters"))]
    pub timezone: Option<String>,

    /// Honoured for super admins only; everyone else creates in their own
    /// organization.
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: Option<String>,

    pub hourly_rate: Option<Decimal>,

    #[validate(length(min = 1, max = 200, message = "Startup name must be 1-200 characters"))]
    pub startup_name: Option<String>,

    #[validate(length(max = 30, message = "Phone must be at most 30 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 64, message = "Timezone must be at most 64 characters"))]
    pub timezone: Option<String>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: Option<String>,

    #[validate(length(max = 30, message = "Phone must be at most 30 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 64, message = "Timezone must be at most 64 characters"))]
    pub timezone: Option<String>,

    #[validate(length(min = 1, max = 200, message = "Startup name must be 1-200 characters"))]
    pub startup_name: Option<String>,

    pub hourly_rate: Option<Decimal>,
}

/// Role-specific profile requirements for a new user
pub fn check_role_profile(
    role: UserRole,
    hourly_rate: Option<Decimal>,
    startup_name: Option<&str>,
) -> ApiResult<()> {
    match role {
        UserRole::Coach if hourly_rate.is_none() => Err(ApiError::BadRequest(
            "Hourly rate is required for coaches".to_string(),
        )),
        UserRole::Entrepreneur if startup_name.is_none() => Err(ApiError::BadRequest(
            "Startup name is required for entrepreneurs".to_string(),
        )),
        _ => check_hourly_rate(hourly_rate),
    }
}

fn check_hourly_rate(hourly_rate: Option<Decimal>) -> ApiResult<()> {
    match hourly_rate {
        Some(rate) if rate.is_sign_negative() => Err(ApiError::invalid_field(
            "hourlyRate",
            "Hourly rate must not be negative",
        )),
        _ => Ok(()),
    }
}

async fn scoped_user(state: &AppState, auth: &AuthContext, id: Uuid) -> ApiResult<User> {
    let organization_id = OrganizationScope::of(auth).filter()?;

    User::find_in_organization(&state.db, id, organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

async fn log_activation(state: &AppState, auth: &AuthContext, user: &User, active: bool) {
    let (activity_type, verb) = if active {
        (ActivityType::UserActivated, "activated")
    } else {
        (ActivityType::UserDeactivated, "deactivated")
    };

    Activity::log(
        &state.db,
        NewActivity::new(activity_type, format!("{} {}", user.full_name(), verb))
            .organization(user.organization_id)
            .actor(auth.user_id)
            .entity("user", user.id),
    )
    .await;
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    require_role(&auth, STAFF)?;

    let filter = UserFilter {
        organization_id: OrganizationScope::of(&auth).filter()?,
        role: query.role,
        is_active: query.is_active,
    };
    let params = PageParams::resolve(query.page, query.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let sort = SortOrder::parse(query.sort.as_deref(), USER_SORT_KEYS, USER_DEFAULT_SORT);

    let users = User::list(&state.db, &filter, sort, params.limit, params.offset()).await?;
    let total = User::count(&state.db, &filter).await?;

    Ok(ApiResponse::paginated(users, PageInfo::for_params(params, total)))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<Created<User>> {
    require_role(&auth, STAFF)?;
    req.validate()?;
    password::validate_password_strength(&req.password)
        .map_err(|e| ApiError::weak_password("password", e))?;

    if !can_assign_role(&auth, req.role) {
        return Err(ApiError::Forbidden(format!(
            "Not allowed to create {} users",
            req.role
        )));
    }

    check_role_profile(req.role, req.hourly_rate, req.startup_name.as_deref())?;

    let organization_id = match auth.organization_id {
        Some(id) => id,
        None if auth.is_super_admin() => req.organization_id.ok_or_else(|| {
            ApiError::BadRequest("organizationId is required".to_string())
        })?,
        None => {
            return Err(ApiError::Forbidden(
                "User is not associated with an organization".to_string(),
            ))
        }
    };

    QuotaEnforcer::new(state.db.clone())
        .enforce(organization_id, req.role)
        .await?;

    if User::email_taken(&state.db, &req.email, None).await? {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            organization_id: Some(organization_id),
            email: req.email,
            password_hash,
            role: req.role,
            first_name: req.first_name,
            last_name: req.last_name,
            hourly_rate: req.hourly_rate,
            startup_name: req.startup_name,
            phone: req.phone,
            timezone: req.timezone,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, created_by = %auth.user_id, role = %user.role, "User created");

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::UserRegistered,
            format!("{} added as {}", user.full_name(), user.role),
        )
        .organization(user.organization_id)
        .actor(auth.user_id)
        .entity("user", user.id),
    )
    .await;

    Ok(ApiResponse::created(user))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<User>>> {
    require_role(&auth, STAFF)?;

    Ok(ApiResponse::ok(scoped_user(&state, &auth, user_id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<ApiResponse<User>>> {
    require_role(&auth, STAFF)?;
    req.validate()?;
    check_hourly_rate(req.hourly_rate)?;

    let current = scoped_user(&state, &auth, user_id).await?;

    if !can_assign_role(&auth, current.role) {
        return Err(ApiError::Forbidden(format!(
            "Not allowed to modify {} users",
            current.role
        )));
    }

    if req.is_active == Some(false) && user_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    if let Some(email) = req.email.as_deref() {
        if User::email_taken(&state.db, email, Some(user_id)).await? {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }
    }

    let mut user = User::update(
        &state.db,
        user_id,
        UpdateUser {
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            hourly_rate: req.hourly_rate,
            startup_name: req.startup_name,
            phone: req.phone,
            timezone: req.timezone,
            is_active: None,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if let Some(active) = req.is_active.filter(|&a| a != current.is_active) {
        User::set_active(&state.db, user_id, active).await?;
        user.is_active = active;
        log_activation(&state, &auth, &user, active).await;
    }

    Ok(ApiResponse::ok(user))
}

/// Soft delete; the account's tokens stop working immediately.
pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_role(&auth, STAFF)?;

    let user = scoped_user(&state, &auth, user_id).await?;

    if user_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "You cannot deactivate your own account".to_string(),
        ));
    }
    if !can_assign_role(&auth, user.role) {
        return Err(ApiError::Forbidden(format!(
            "Not allowed to modify {} users",
            user.role
        )));
    }

    User::set_active(&state.db, user_id, false).await?;
    tracing::info!(user_id = %user_id, by = %auth.user_id, "User deactivated");
    log_activation(&state, &auth, &user, false).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ApiResponse<User>>> {
    req.validate()?;

    if req.startup_name.is_some() && auth.role != UserRole::Entrepreneur {
        return Err(ApiError::BadRequest(
            "Only entrepreneurs have a startup name".to_string(),
        ));
    }
    if req.hourly_rate.is_some() && auth.role != UserRole::Coach {
        return Err(ApiError::BadRequest(
            "Only coaches have an hourly rate".to_string(),
        ));
    }
    check_hourly_rate(req.hourly_rate)?;

    let user = User::update(
        &state.db,
        auth.user_id,
        UpdateUser {
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
            timezone: req.timezone,
            startup_name: req.startup_name,
            hourly_rate: req.hourly_rate,
            ..Default::default()
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(ApiResponse::ok(user))
}
