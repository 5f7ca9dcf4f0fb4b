/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /api/v1/auth/register` - Self sign-up (not for admins)
/// - `POST /api/v1/auth/login` - Email + password login
/// - `POST /api/v1/auth/refresh` - Rotate the token pair
/// - `POST /api/v1/auth/logout` - Revoke all tokens of the caller
/// - `GET  /api/v1/auth/me` - Caller profile
/// - `POST /api/v1/auth/forgot-password` - Email a reset link
/// - `POST /api/v1/auth/verify-reset-token` - Check a reset token
/// - `POST /api/v1/auth/reset-password` - Set a new password
///
/// Refresh and reset tokens are stored as SHA-256 digests only.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::{self, ApiResponse, Created},
};
use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Duration, Utc};
use coachhub_shared::{
    auth::{
        jwt::{self, TokenPair},
        middleware::{check_user_state, AuthContext},
        password, tokens,
    },
    models::{
        activity::{Activity, ActivityType, NewActivity},
        organization::Organization,
        user::{CreateUser, User, UserRole},
    },
    quota::QuotaEnforcer,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Reset tokens expire after this many minutes
pub const RESET_TOKEN_TTL_MINUTES: i64 = 15;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked against the full password policy after validation
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    pub role: UserRole,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: String,

    pub organization_id: Option<Uuid>,

    #[validate(length(max = 200, message = "Startup name must be at most 200 characters"))]
    pub startup_name: Option<String>,

    pub hourly_rate: Option<Decimal>,

    #[validate(length(max = 30, message = "Phone must be at most 30 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 64, message = "Timezone must be at most 64 characters"))]
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResetTokenRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Reset token is required"))]
    pub reset_token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Reset token is required"))]
    pub reset_token: String,

    pub new_password: String,
}

/// User plus a fresh token pair
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,

    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordResponse {
    /// Only outside production, so the flow can be exercised without email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResetTokenResponse {
    pub valid: bool,
}

/// Why a reset token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResetTokenError {
    #[error("No account found for this email")]
    UnknownUser,

    #[error("No password reset was requested for this account")]
    NotRequested,

    #[error("Reset token has expired")]
    Expired,

    #[error("Invalid reset token")]
    Mismatch,
}

impl From<ResetTokenError> for ApiError {
    fn from(err: ResetTokenError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Checks `token` against the digest and expiry stored on `user`.
pub fn check_reset_token(
    user: Option<&User>,
    token: &str,
    now: DateTime<Utc>,
) -> Result<(), ResetTokenError> {
    let user = user.ok_or(ResetTokenError::UnknownUser)?;

    let (Some(hash), Some(expires_at)) = (&user.reset_token_hash, user.reset_token_expires_at)
    else {
        return Err(ResetTokenError::NotRequested);
    };

    if expires_at <= now {
        return Err(ResetTokenError::Expired);
    }
    if !tokens::verify_token(token, hash) {
        return Err(ResetTokenError::Mismatch);
    }

    Ok(())
}

/// Issues a token pair and stores the digest of its refresh token.
async fn sign_in(state: &AppState, user: User) -> ApiResult<AuthResponse> {
    let tokens = jwt::issue_token_pair(&user, state.jwt_secret(), &state.token_ttl())?;
    User::record_login(&state.db, user.id, &tokens::hash_token(&tokens.refresh_token)).await?;

    Ok(AuthResponse { user, tokens })
}

/// Registration endpoint
///
/// # Errors
///
/// - `400 Bad Request`: admin role, or unknown/inactive organization
/// - `403 Forbidden`: organization quota for the role is exhausted
/// - `409 Conflict`: email already registered
/// - `422 Unprocessable Entity`: validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Created<AuthResponse>> {
    req.validate()?;
    password::validate_password_strength(&req.password)
        .map_err(|e| ApiError::weak_password("password", e))?;

    if !req.role.is_self_registrable() {
        return Err(ApiError::BadRequest(
            "Admin accounts cannot be self-registered".to_string(),
        ));
    }

    if let Some(organization_id) = req.organization_id {
        let organization = Organization::find_by_id(&state.db, organization_id).await?;
        if !organization.is_some_and(|o| o.is_active) {
            return Err(ApiError::BadRequest(
                "Organization not found or inactive".to_string(),
            ));
        }

        QuotaEnforcer::new(state.db.clone())
            .enforce(organization_id, req.role)
            .await?;
    }

    if User::email_taken(&state.db, &req.email, None).await? {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            organization_id: req.organization_id,
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

    tracing::info!(user_id = %user.id, role = %user.role, "User registered");

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::UserRegistered,
            format!("{} registered as {}", user.full_name(), user.role),
        )
        .organization(user.organization_id)
        .actor(user.id)
        .entity("user", user.id),
    )
    .await;

    let body = sign_in(&state, user).await?;
    Ok(ApiResponse::created(body))
}

/// Login endpoint
///
/// # Errors
///
/// - `401 Unauthorized`: unknown email, wrong password or inactive account
/// - `422 Unprocessable Entity`: validation failed
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<ApiResponse<AuthResponse>>> {
    req.validate()?;

    let user = User::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::debug!(user_id = %user.id, "Login with wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is inactive".to_string()));
    }

    let body = sign_in(&state, user).await?;
    Ok(ApiResponse::ok(body))
}

/// Token refresh endpoint
///
/// The presented refresh token must be the one most recently issued; both
/// tokens are replaced.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<ApiResponse<TokenPair>>> {
    let token = req
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Refresh token is required".to_string()))?;

    let claims = jwt::validate_refresh_token(&token, state.jwt_secret())?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".to_string()))?;

    check_user_state(&user, claims.token_version)?;

    let stored = user
        .refresh_token_hash
        .as_deref()
        .filter(|hash| tokens::verify_token(&token, hash))
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".to_string()))?;

    let pair = jwt::issue_token_pair(&user, state.jwt_secret(), &state.token_ttl())?;
    let rotated = User::rotate_refresh_token(
        &state.db,
        user.id,
        stored,
        &tokens::hash_token(&pair.refresh_token),
    )
    .await?;

    if !rotated {
        tracing::warn!(user_id = %user.id, "Refresh token reused concurrently");
        return Err(ApiError::Unauthorized("Invalid refresh token".to_string()));
    }

    Ok(ApiResponse::ok(pair))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<Option<()>>>> {
    User::revoke_tokens(&state.db, auth.user_id).await?;
    tracing::info!(user_id = %auth.user_id, "User logged out");

    Ok(response::message("Logged out successfully"))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(ApiResponse::ok(user))
}

/// Starts a password reset
///
/// Answers the same way whether or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<ApiResponse<ForgotPasswordResponse>>> {
    req.validate()?;

    let mut echoed = None;

    if let Some(user) = User::find_by_email(&state.db, &req.email)
        .await?
        .filter(|u| u.is_active)
    {
        let (token, hash) = tokens::generate_token();
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
        User::set_reset_token(&state.db, user.id, &hash, expires_at).await?;

        let name = user.full_name();
        if let Err(e) = state
            .email
            .send_password_reset(&user.email, Some(&name), &token)
            .await
        {
            tracing::error!(user_id = %user.id, error = %e, "Failed to send password reset email");
        }

        if !state.config.api.production {
            echoed = Some(token);
        }
    }

    Ok(ApiResponse::with_message(
        ForgotPasswordResponse { reset_token: echoed },
        FORGOT_PASSWORD_MESSAGE,
    ))
}

pub async fn verify_reset_token(
    State(state): State<AppState>,
    Json(req): Json<VerifyResetTokenRequest>,
) -> ApiResult<Json<ApiResponse<VerifyResetTokenResponse>>> {
    req.validate()?;

    let user = User::find_by_email(&state.db, &req.email).await?;
    check_reset_token(user.as_ref(), &req.reset_token, Utc::now())?;

    Ok(ApiResponse::ok(VerifyResetTokenResponse { valid: true }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<ApiResponse<Option<()>>>> {
    req.validate()?;
    password::validate_password_strength(&req.new_password)
        .map_err(|e| ApiError::weak_password("newPassword", e))?;

    let user = User::find_by_email(&state.db, &req.email).await?;
    check_reset_token(user.as_ref(), &req.reset_token, Utc::now())?;
    let Some(user) = user else {
        return Err(ResetTokenError::UnknownUser.into());
    };

    let password_hash = password::hash_password(&req.new_password)?;
    User::reset_password(&state.db, user.id, &password_hash).await?;

    tracing::info!(user_id = %user.id, "Password reset completed");

    Ok(response::message("Password has been reset successfully"))
}
