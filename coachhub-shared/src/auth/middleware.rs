/// Request authentication
///
/// Turns an `Authorization: Bearer <jwt>` header into an [`AuthContext`].
/// A token is only accepted if its signature and lifetime check out *and*
/// the user it names still exists, is active, and has the same token
/// version as the one embedded in the token.
///
/// The API server wraps [`authenticate`] in an axum middleware and inserts
/// the resulting context into request extensions.
///
/// # Example
///
/// ```no_run
/// use coachhub_shared::auth::middleware::{authenticate, extract_bearer_token};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, header: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
/// let token = extract_bearer_token(header)?;
/// let auth = authenticate(&pool, "jwt-secret", token).await?;
/// println!("{} is a {}", auth.email, auth.role);
/// # Ok(())
/// # }
/// ```

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::jwt::{validate_access_token, JwtError};
use crate::models::user::{User, UserRole};

/// Identity of the caller, available to handlers via `Extension<AuthContext>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: Uuid,

    /// `None` only for super admins
    pub organization_id: Option<Uuid>,

    pub role: UserRole,

    pub email: String,
}

impl AuthContext {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            organization_id: user.organization_id,
            role: user.role,
            email: user.email.clone(),
        }
    }

    /// An admin who belongs to no organization and sees every tenant
    pub fn is_super_admin(&self) -> bool {
        self.role == UserRole::Admin && self.organization_id.is_none()
    }

    pub fn has_any_role(&self, roles: &[UserRole]) -> bool {
        roles.contains(&self.role)
    }
}

/// Error type for request authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,

    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidToken(String),

    #[error("User no longer exists")]
    UserNotFound,

    #[error("Account is inactive")]
    AccountInactive,

    /// Token version no longer matches (logout or password reset)
    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
            other => AuthError::InvalidToken(other.to_string()),
        }
    }
}

/// Pulls the token out of an `Authorization` header value.
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingCredentials)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    Ok(token)
}

/// Validates an access token and loads the live user behind it.
///
/// The returned context reflects the user row, not the claims, so a role or
/// organization change takes effect immediately.
pub async fn authenticate(pool: &PgPool, secret: &str, token: &str) -> Result<AuthContext, AuthError> {
    let claims = validate_access_token(token, secret)?;

    let user = User::find_by_id(pool, claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    check_user_state(&user, claims.token_version)?;

    Ok(AuthContext::from_user(&user))
}

/// Rejects inactive users and stale token versions.
pub fn check_user_state(user: &User, token_version: i32) -> Result<(), AuthError> {
    if !user.is_active {
        return Err(AuthError::AccountInactive);
    }
    if user.token_version != token_version {
        return Err(AuthError::TokenRevoked);
    }

    Ok(())
}
