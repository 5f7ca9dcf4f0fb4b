/// JWT token generation and validation
///
/// Access and refresh tokens are HS256-signed JWTs carrying the user's
/// identity, organization, role and *token version*. The version is
/// compared against the user row on every authenticated request, so bumping
/// it (logout, password reset) invalidates every outstanding token at once.
///
/// # Token Types
///
/// - **Access Token**: short-lived (15 minutes by default), sent as a Bearer token
/// - **Refresh Token**: long-lived (7 days by default), exchanged at `/auth/refresh`
///
/// # Example
///
/// ```
/// use coachhub_shared::auth::jwt::{create_token, validate_access_token, Claims, TokenType};
/// use coachhub_shared::models::user::UserRole;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let user_id = Uuid::new_v4();
/// let claims = Claims::new(user_id, Some(Uuid::new_v4()), UserRole::Coach, 0, TokenType::Access);
/// let token = create_token(&claims, "your-secret-key-at-least-32-bytes")?;
///
/// let validated = validate_access_token(&token, "your-secret-key-at-least-32-bytes")?;
/// assert_eq!(validated.sub, user_id);
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::{User, UserRole};

/// Issuer written into and required from every token
pub const ISSUER: &str = "coachhub";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to create token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Signature, issuer or structure check failed
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Token was of the other type
    #[error("Expected {expected} token")]
    WrongType { expected: &'static str },
}

/// Token type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    /// Lifetime used when no explicit TTL is configured
    pub fn default_expiration(&self) -> Duration {
        match self {
            TokenType::Access => Duration::minutes(15),
            TokenType::Refresh => Duration::days(7),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims
///
/// Standard claims (`sub`, `iss`, `iat`, `exp`, `nbf`, `jti`) plus:
///
/// - `org`: organization of the user, absent for super admins
/// - `role`: role at issue time
/// - `ver`: token version at issue time
/// - `token_type`: access or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - User ID
    pub sub: Uuid,

    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,

    /// Unique token ID, so two tokens issued in the same second differ
    pub jti: Uuid,

    /// Organization ID
    #[serde(rename = "org", default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,

    /// User role
    pub role: UserRole,

    /// Token version; must equal `users.token_version`
    #[serde(rename = "ver")]
    pub token_version: i32,

    pub token_type: TokenType,
}

impl Claims {
    /// Creates claims with the default lifetime for `token_type`.
    pub fn new(
        user_id: Uuid,
        organization_id: Option<Uuid>,
        role: UserRole,
        token_version: i32,
        token_type: TokenType,
    ) -> Self {
        Self::with_expiration(
            user_id,
            organization_id,
            role,
            token_version,
            token_type,
            token_type.default_expiration(),
        )
    }

    /// Creates claims with an explicit lifetime.
    pub fn with_expiration(
        user_id: Uuid,
        organization_id: Option<Uuid>,
        role: UserRole,
        token_version: i32,
        token_type: TokenType,
        expires_in: Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4(),
            organization_id,
            role,
            token_version,
            token_type,
        }
    }

    /// Claims for `user` in its current state.
    pub fn for_user(user: &User, token_type: TokenType, expires_in: Duration) -> Self {
        Self::with_expiration(
            user.id,
            user.organization_id,
            user.role,
            user.token_version,
            token_type,
            expires_in,
        )
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Seconds until `exp`, or `None` once expired
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Utc::now().timestamp();
        (self.exp > now).then(|| Duration::seconds(self.exp - now))
    }
}

/// Token lifetimes, usually read from configuration
#[derive(Debug, Clone, Copy)]
pub struct TokenTtl {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenTtl {
    fn default() -> Self {
        Self {
            access: TokenType::Access.default_expiration(),
            refresh: TokenType::Refresh.default_expiration(),
        }
    }
}

/// Access/refresh pair handed to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Signs `claims` with HS256.
///
/// # Errors
///
/// Returns `JwtError::CreateError` if encoding fails.
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Issues a fresh access/refresh pair for `user`.
pub fn issue_token_pair(user: &User, secret: &str, ttl: &TokenTtl) -> Result<TokenPair, JwtError> {
    let access = Claims::for_user(user, TokenType::Access, ttl.access);
    let refresh = Claims::for_user(user, TokenType::Refresh, ttl.refresh);

    Ok(TokenPair {
        access_token: create_token(&access, secret)?,
        refresh_token: create_token(&refresh, secret)?,
        expires_in: ttl.access.num_seconds(),
    })
}

/// Verifies signature, issuer, `exp` and `nbf` and returns the claims.
///
/// # Errors
///
/// - `JwtError::Expired` when `exp` has passed
/// - `JwtError::ValidationError` for anything else
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::ValidationError(e.to_string()),
    })?;

    Ok(token_data.claims)
}

/// Validates `token` and requires it to be an access token.
pub fn validate_access_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;

    if claims.token_type != TokenType::Access {
        return Err(JwtError::WrongType { expected: "access" });
    }

    Ok(claims)
}

/// Validates `token` and requires it to be a refresh token.
pub fn validate_refresh_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;

    if claims.token_type != TokenType::Refresh {
        return Err(JwtError::WrongType { expected: "refresh" });
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn claims(token_type: TokenType) -> Claims {
        Claims::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            UserRole::Manager,
            3,
            token_type,
        )
    }

    #[test]
    fn test_token_type_expiration() {
        assert_eq!(TokenType::Access.default_expiration(), Duration::minutes(15));
        assert_eq!(TokenType::Refresh.default_expiration(), Duration::days(7));
    }

    #[test]
    fn test_create_and_validate_token() {
        let original = claims(TokenType::Access);
        let token = create_token(&original, SECRET).expect("Should create token");

        let validated = validate_token(&token, SECRET).expect("Should validate token");
        assert_eq!(validated.sub, original.sub);
        assert_eq!(validated.organization_id, original.organization_id);
        assert_eq!(validated.role, UserRole::Manager);
        assert_eq!(validated.token_version, 3);
        assert_eq!(validated.iss, ISSUER);
    }

    #[test]
    fn test_super_admin_token_has_no_organization() {
        let claims = Claims::new(Uuid::new_v4(), None, UserRole::Admin, 0, TokenType::Access);
        let token = create_token(&claims, SECRET).unwrap();

        let validated = validate_access_token(&token, SECRET).unwrap();
        assert!(validated.organization_id.is_none());
    }

    #[test]
    fn test_validate_with_wrong_secret() {
        let token = create_token(&claims(TokenType::Access), SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-key-at-least-32-bytes").is_err());
    }

    #[test]
    fn test_validate_expired_token() {
        let expired = Claims::with_expiration(
            Uuid::new_v4(),
            None,
            UserRole::Coach,
            0,
            TokenType::Access,
            Duration::seconds(-3600),
        );
        assert!(expired.is_expired());
        assert!(expired.time_until_expiration().is_none());

        let token = create_token(&expired, SECRET).unwrap();
        assert!(matches!(validate_token(&token, SECRET), Err(JwtError::Expired)));
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let access = create_token(&claims(TokenType::Access), SECRET).unwrap();
        let refresh = create_token(&claims(TokenType::Refresh), SECRET).unwrap();

        assert!(validate_access_token(&access, SECRET).is_ok());
        assert!(validate_refresh_token(&refresh, SECRET).is_ok());
        assert!(matches!(
            validate_access_token(&refresh, SECRET),
            Err(JwtError::WrongType { expected: "access" })
        ));
        assert!(matches!(
            validate_refresh_token(&access, SECRET),
            Err(JwtError::WrongType { expected: "refresh" })
        ));
    }

    #[test]
    fn test_tokens_issued_together_differ() {
        let user = crate::models::user::tests::sample_user(UserRole::Coach);
        let first = issue_token_pair(&user, SECRET, &TokenTtl::default()).unwrap();
        let second = issue_token_pair(&user, SECRET, &TokenTtl::default()).unwrap();

        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(first.expires_in, 900);
    }

    #[test]
    fn test_custom_expiration() {
        let claims = Claims::with_expiration(
            Uuid::new_v4(),
            None,
            UserRole::Entrepreneur,
            0,
            TokenType::Access,
            Duration::hours(1),
        );

        let left = claims.time_until_expiration().unwrap();
        assert!(left.num_seconds() > 3500);
        assert!(left.num_seconds() <= 3600);
    }
}
