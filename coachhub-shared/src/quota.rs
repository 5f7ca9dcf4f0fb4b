/// Seat quotas per organization
///
/// Organizations may cap how many users they hold. Each role is checked
/// against one limit:
///
/// - coaches against `max_coaches`
/// - entrepreneurs against `max_entrepreneurs`
/// - admins and managers against `max_users`
///
/// A missing limit means unlimited.
///
/// # Example
///
/// ```no_run
/// use coachhub_shared::models::user::UserRole;
/// use coachhub_shared::quota::QuotaEnforcer;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, org_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let enforcer = QuotaEnforcer::new(pool);
///
/// // Fails with QuotaError::LimitExceeded once the coach seats are used up
/// enforcer.enforce(org_id, UserRole::Coach).await?;
/// # Ok(())
/// # }
/// ```

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::organization::Organization;
use crate::models::user::UserRole;

/// Quota enforcement error
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Organization has reached the maximum limit of {limit} {}", plural(.role))]
    LimitExceeded { role: UserRole, limit: i64, current: i64 },

    #[error("Organization not found")]
    OrganizationNotFound(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

fn plural(role: &UserRole) -> &'static str {
    match role {
        UserRole::Admin => "admins",
        UserRole::Manager => "managers",
        UserRole::Coach => "coaches",
        UserRole::Entrepreneur => "entrepreneurs",
    }
}

/// Limit that applies to `role` in `org`
pub fn limit_for(org: &Organization, role: UserRole) -> Option<i64> {
    let limit = match role {
        UserRole::Coach => org.max_coaches,
        UserRole::Entrepreneur => org.max_entrepreneurs,
        UserRole::Admin | UserRole::Manager => org.max_users,
    };
    limit.map(i64::from)
}

/// Result of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheckResult {
    pub allowed: bool,
    pub current: i64,
    pub limit: Option<i64>,
}

impl QuotaCheckResult {
    pub fn evaluate(current: i64, limit: Option<i64>) -> Self {
        QuotaCheckResult {
            allowed: limit.map_or(true, |limit| current < limit),
            current,
            limit,
        }
    }
}

/// Usage of one seat pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// `used / limit * 100`, rounded to two decimals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

impl QuotaUsage {
    pub fn new(used: i64, limit: Option<i64>) -> Self {
        let percentage = limit
            .filter(|limit| *limit > 0)
            .map(|limit| ((used as f64 / limit as f64) * 10_000.0).round() / 100.0);

        QuotaUsage {
            used,
            limit,
            percentage,
        }
    }
}

/// Usage of every seat pool of an organization
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrganizationQuotaUsage {
    pub users: QuotaUsage,
    pub coaches: QuotaUsage,
    pub entrepreneurs: QuotaUsage,
}

/// Seat counts of an organization (admins excluded from `users`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatCounts {
    pub users: i64,
    pub coaches: i64,
    pub entrepreneurs: i64,
}

impl SeatCounts {
    pub async fn load(pool: &PgPool, organization_id: Uuid) -> Result<Self, sqlx::Error> {
        let (users, coaches, entrepreneurs): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE role <> 'admin'),
                COUNT(*) FILTER (WHERE role = 'coach'),
                COUNT(*) FILTER (WHERE role = 'entrepreneur')
            FROM users
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await?;

        Ok(SeatCounts {
            users,
            coaches,
            entrepreneurs,
        })
    }

    pub fn usage(&self, org: &Organization) -> OrganizationQuotaUsage {
        OrganizationQuotaUsage {
            users: QuotaUsage::new(self.users, org.max_users.map(i64::from)),
            coaches: QuotaUsage::new(self.coaches, org.max_coaches.map(i64::from)),
            entrepreneurs: QuotaUsage::new(
                self.entrepreneurs,
                org.max_entrepreneurs.map(i64::from),
            ),
        }
    }
}

/// Quota enforcement service
pub struct QuotaEnforcer {
    db: PgPool,
}

impl QuotaEnforcer {
    pub fn new(db: PgPool) -> Self {
        QuotaEnforcer { db }
    }

    /// Checks whether one more user with `role` fits in the organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the organization does not exist or the query
    /// fails.
    pub async fn check(
        &self,
        organization_id: Uuid,
        role: UserRole,
    ) -> Result<QuotaCheckResult, QuotaError> {
        let org = Organization::find_by_id(&self.db, organization_id)
            .await?
            .ok_or(QuotaError::OrganizationNotFound(organization_id))?;

        let Some(limit) = limit_for(&org, role) else {
            return Ok(QuotaCheckResult::evaluate(0, None));
        };

        let current = self.count_role(organization_id, role).await?;
        Ok(QuotaCheckResult::evaluate(current, Some(limit)))
    }

    /// Like [`check`](Self::check) but fails when the quota is exhausted.
    pub async fn enforce(&self, organization_id: Uuid, role: UserRole) -> Result<(), QuotaError> {
        let result = self.check(organization_id, role).await?;

        match result.limit {
            Some(limit) if !result.allowed => Err(QuotaError::LimitExceeded {
                role,
                limit,
                current: result.current,
            }),
            _ => Ok(()),
        }
    }

    async fn count_role(&self, organization_id: Uuid, role: UserRole) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE organization_id = $1 AND role = $2")
            .bind(organization_id)
            .bind(role)
            .fetch_one(&self.db)
            .await
    }
}
