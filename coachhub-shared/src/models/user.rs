/// User model and database operations
///
/// A user belongs to at most one organization and has exactly one role.
/// Credentials live on the same row: the Argon2id password hash, the digest
/// of the current refresh token, the digest and expiry of a pending password
/// reset, and the token version that invalidates issued JWTs.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID REFERENCES organizations (id),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     password_hash VARCHAR(255) NOT NULL,
///     role user_role NOT NULL,
///     first_name VARCHAR(100) NOT NULL,
///     last_name VARCHAR(100) NOT NULL,
///     hourly_rate NUMERIC(10, 2),
///     startup_name VARCHAR(200),
///     phone VARCHAR(50),
///     timezone VARCHAR(64),
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     token_version INTEGER NOT NULL DEFAULT 0,
///     refresh_token_hash VARCHAR(64),
///     reset_token_hash VARCHAR(64),
///     reset_token_expires_at TIMESTAMPTZ,
///     created_at, updated_at, last_login_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

use super::SortOrder;

/// User roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Runs an organization; without an organization, runs the platform
    Admin,

    /// Schedules sessions and handles billing for an organization
    Manager,

    /// Delivers sessions and is paid per hour
    Coach,

    /// Receives coaching and owns goals
    Entrepreneur,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Coach => "coach",
            UserRole::Entrepreneur => "entrepreneur",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "manager" => Some(UserRole::Manager),
            "coach" => Some(UserRole::Coach),
            "entrepreneur" => Some(UserRole::Entrepreneur),
            _ => None,
        }
    }

    /// Roles that may sign themselves up
    pub fn is_self_registrable(&self) -> bool {
        !matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User account
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,

    /// `None` only for super admins
    pub organization_id: Option<Uuid>,

    /// Stored lowercase
    pub email: String,

    #[serde(skip)]
    pub password_hash: String,

    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,

    /// Coaches only; used to price sessions
    pub hourly_rate: Option<Decimal>,

    /// Entrepreneurs only
    pub startup_name: Option<String>,

    pub phone: Option<String>,
    pub timezone: Option<String>,
    pub is_active: bool,

    #[serde(skip)]
    pub token_version: i32,

    #[serde(skip)]
    pub refresh_token_hash: Option<String>,

    #[serde(skip)]
    pub reset_token_hash: Option<String>,

    #[serde(skip)]
    pub reset_token_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub organization_id: Option<Uuid>,
    pub email: String,
    /// Argon2id hash, never the plaintext password
    pub password_hash: String,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub hourly_rate: Option<Decimal>,
    pub startup_name: Option<String>,
    pub phone: Option<String>,
    pub timezone: Option<String>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub hourly_rate: Option<Decimal>,
    pub startup_name: Option<String>,
    pub phone: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

/// List filter; `organization_id: None` lists every tenant
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub organization_id: Option<Uuid>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

/// Sort keys accepted by [`User::list`]
pub const USER_SORT_KEYS: &[(&str, &str)] = &[
    ("createdAt", "created_at"),
    ("email", "email"),
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("role", "role"),
    ("lastLoginAt", "last_login_at"),
];

/// Default user ordering, newest first
pub const USER_DEFAULT_SORT: SortOrder = SortOrder {
    column: "created_at",
    descending: true,
};

/// Lowercases and trims an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    /// Inserts a new active user with token version 0.
    ///
    /// # Errors
    ///
    /// Unique violation on `users_email_key` when the email is taken.
    pub async fn create(pool: &PgPool, data: CreateUser) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                organization_id, email, password_hash, role, first_name, last_name,
                hourly_rate, startup_name, phone, timezone
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(data.organization_id)
        .bind(normalize_email(&data.email))
        .bind(data.password_hash)
        .bind(data.role)
        .bind(data.first_name)
        .bind(data.last_name)
        .bind(data.hourly_rate)
        .bind(data.startup_name)
        .bind(data.phone)
        .bind(data.timezone)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Case-insensitive lookup
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    /// Finds a user inside one organization; `organization_id: None` searches
    /// every tenant.
    pub async fn find_in_organization(
        pool: &PgPool,
        id: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE id = $1 AND ($2::uuid IS NULL OR organization_id = $2)
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await
    }

    /// Whether `email` belongs to someone other than `exclude`
    pub async fn email_taken(
        pool: &PgPool,
        email: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                WHERE email = $1 AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(normalize_email(email))
        .bind(exclude)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateUser,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                hourly_rate = COALESCE($5, hourly_rate),
                startup_name = COALESCE($6, startup_name),
                phone = COALESCE($7, phone),
                timezone = COALESCE($8, timezone),
                is_active = COALESCE($9, is_active)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.email.as_deref().map(normalize_email))
        .bind(data.first_name)
        .bind(data.last_name)
        .bind(data.hourly_rate)
        .bind(data.startup_name)
        .bind(data.phone)
        .bind(data.timezone)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await
    }

    /// Soft delete or reactivation. Deactivating also revokes all tokens.
    pub async fn set_active(pool: &PgPool, id: Uuid, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                is_active = $2,
                token_version = CASE WHEN $2 THEN token_version ELSE token_version + 1 END,
                refresh_token_hash = CASE WHEN $2 THEN refresh_token_hash ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(active)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a successful login and the digest of the refresh token just
    /// issued.
    pub async fn record_login(
        pool: &PgPool,
        id: Uuid,
        refresh_token_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET last_login_at = NOW(), refresh_token_hash = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(refresh_token_hash)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replaces the stored refresh digest only if it still equals `expected`.
    ///
    /// Returns `false` when another request rotated the token first, so a
    /// refresh token can be redeemed once.
    pub async fn rotate_refresh_token(
        pool: &PgPool,
        id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users SET refresh_token_hash = $3
            WHERE id = $1 AND refresh_token_hash = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(replacement)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Invalidates every issued token (logout).
    pub async fn revoke_tokens(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users SET token_version = token_version + 1, refresh_token_hash = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn set_reset_token(
        pool: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET reset_token_hash = $2, reset_token_expires_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Sets a new password, clears the reset token and revokes all tokens.
    pub async fn reset_password(
        pool: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users SET
                password_hash = $2,
                reset_token_hash = NULL,
                reset_token_expires_at = NULL,
                refresh_token_hash = NULL,
                token_version = token_version + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list(
        pool: &PgPool,
        filter: &UserFilter,
        sort: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            r#"
            SELECT * FROM users
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::user_role IS NULL OR role = $2)
              AND ($3::boolean IS NULL OR is_active = $3)
            ORDER BY {}
            LIMIT $4 OFFSET $5
            "#,
            sort.to_sql()
        );

        sqlx::query_as::<_, User>(&query)
            .bind(filter.organization_id)
            .bind(filter.role)
            .bind(filter.is_active)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Every matching user ordered by name, for exports.
    pub async fn list_all(pool: &PgPool, filter: &UserFilter) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::user_role IS NULL OR role = $2)
              AND ($3::boolean IS NULL OR is_active = $3)
            ORDER BY last_name, first_name, id
            "#,
        )
        .bind(filter.organization_id)
        .bind(filter.role)
        .bind(filter.is_active)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &PgPool, filter: &UserFilter) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::user_role IS NULL OR role = $2)
              AND ($3::boolean IS NULL OR is_active = $3)
            "#,
        )
        .bind(filter.organization_id)
        .bind(filter.role)
        .bind(filter.is_active)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_user(role: UserRole) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            organization_id: Some(Uuid::new_v4()),
            email: format!("{}@example.com", role),
            password_hash: "$argon2id$v=19$m=65536,t=3,p=4$c2FsdA$aGFzaA".to_string(),
            role,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            hourly_rate: (role == UserRole::Coach).then(|| Decimal::new(12000, 2)),
            startup_name: (role == UserRole::Entrepreneur).then(|| "Analytical Engines".to_string()),
            phone: None,
            timezone: Some("Europe/London".to_string()),
            is_active: true,
            token_version: 0,
            refresh_token_hash: Some("digest".to_string()),
            reset_token_hash: Some("digest".to_string()),
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[test]
    fn test_role_round_trip_through_str() {
        for role in [
            UserRole::Admin,
            UserRole::Manager,
            UserRole::Coach,
            UserRole::Entrepreneur,
        ] {
            assert_eq!(UserRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::from_str("owner"), None);
    }

    #[test]
    fn test_admin_is_not_self_registrable() {
        assert!(!UserRole::Admin.is_self_registrable());
        assert!(UserRole::Coach.is_self_registrable());
        assert!(UserRole::Entrepreneur.is_self_registrable());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Coach@Example.COM "), "coach@example.com");
    }

    #[test]
    fn test_serialization_hides_credentials() {
        let user = sample_user(UserRole::Coach);
        let json = serde_json::to_value(&user).unwrap();

        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["role"], "coach");
        assert_eq!(json["hourlyRate"], 120.0);
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("refreshTokenHash").is_none());
        assert!(json.get("resetTokenHash").is_none());
        assert!(json.get("tokenVersion").is_none());
    }

    #[test]
    fn test_full_name() {
        assert_eq!(sample_user(UserRole::Manager).full_name(), "Ada Lovelace");
    }
}
