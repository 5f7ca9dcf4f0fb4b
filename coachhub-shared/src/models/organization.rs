/// Organization model and database operations
///
/// An organization is a tenant. Every user, session, goal and payment
/// belongs to exactly one organization, except super admins who belong to
/// none.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE organizations (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     slug VARCHAR(100) NOT NULL UNIQUE,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     subscription_plan subscription_plan NOT NULL DEFAULT 'free',
///     subscription_status subscription_status NOT NULL DEFAULT 'active',
///     subscription_renewal_at TIMESTAMPTZ,
///     max_users INTEGER,
///     max_coaches INTEGER,
///     max_entrepreneurs INTEGER,
///     billing_email VARCHAR(255),
///     contact JSONB NOT NULL DEFAULT '{}',
///     settings JSONB NOT NULL DEFAULT '{}',
///     preferences JSONB NOT NULL DEFAULT '{}',
///     logo_path VARCHAR(512),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use coachhub_shared::models::organization::{CreateOrganization, Organization, SubscriptionPlan};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let org = Organization::create(
///     &pool,
///     CreateOrganization {
///         name: "Northwind Accelerator".to_string(),
///         slug: "northwind".to_string(),
///         subscription_plan: SubscriptionPlan::Standard,
///         max_users: Some(50),
///         max_coaches: Some(10),
///         max_entrepreneurs: Some(40),
///         billing_email: None,
///         contact: Default::default(),
///         settings: None,
///     },
/// )
/// .await?;
/// println!("created {} ({:?})", org.slug, org.subscription_status);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Subscription plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_plan", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Free,
    Standard,
    Premium,
}

impl SubscriptionPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Free => "free",
            SubscriptionPlan::Standard => "standard",
            SubscriptionPlan::Premium => "premium",
        }
    }

    /// Status a new organization starts in: free plans are active right
    /// away, paid plans start trialing.
    pub fn initial_status(&self) -> SubscriptionStatus {
        match self {
            SubscriptionPlan::Free => SubscriptionStatus::Active,
            SubscriptionPlan::Standard | SubscriptionPlan::Premium => SubscriptionStatus::Trialing,
        }
    }
}

/// Subscription lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Paused,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

/// Contact block stored as JSONB
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Organization (tenant)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Lowercase, unique
    pub slug: String,
    pub is_active: bool,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub subscription_renewal_at: Option<DateTime<Utc>>,
    pub max_users: Option<i32>,
    pub max_coaches: Option<i32>,
    pub max_entrepreneurs: Option<i32>,
    pub billing_email: Option<String>,
    pub contact: Json<Contact>,
    pub settings: JsonValue,
    pub preferences: JsonValue,
    pub logo_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an organization
#[derive(Debug, Clone)]
pub struct CreateOrganization {
    pub name: String,
    /// Normalized with [`normalize_slug`] before insert
    pub slug: String,
    pub subscription_plan: SubscriptionPlan,
    pub max_users: Option<i32>,
    pub max_coaches: Option<i32>,
    pub max_entrepreneurs: Option<i32>,
    pub billing_email: Option<String>,
    pub contact: Contact,
    pub settings: Option<JsonValue>,
}

/// Partial update; `None` leaves a column unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub is_active: Option<bool>,
    pub subscription_plan: Option<SubscriptionPlan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub subscription_renewal_at: Option<DateTime<Utc>>,
    pub max_users: Option<i32>,
    pub max_coaches: Option<i32>,
    pub max_entrepreneurs: Option<i32>,
    pub billing_email: Option<String>,
    pub contact: Option<Contact>,
    pub settings: Option<JsonValue>,
    pub preferences: Option<JsonValue>,
}

/// Super-admin listing filter
#[derive(Debug, Clone, Default)]
pub struct OrganizationFilter {
    pub is_active: Option<bool>,
    pub subscription_plan: Option<SubscriptionPlan>,
    pub subscription_status: Option<SubscriptionStatus>,
    /// Case-insensitive substring of name, slug or billing email
    pub search: Option<String>,
}

/// Settings keys a manager may change
pub const MANAGER_SETTINGS_KEYS: &[&str] =
    &["notificationPreferences", "dashboardLayout", "approvalThresholds"];

/// Lowercases a slug and trims surrounding whitespace.
pub fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase()
}

/// Slugs are 2..100 characters of `a-z`, `0-9` and inner hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    (2..=100).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
}

/// Recursively merges `patch` into `target`; objects merge key by key, every
/// other value replaces what was there.
pub fn deep_merge(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(target), JsonValue::Object(patch)) => {
            for (key, value) in patch {
                deep_merge(target.entry(key.clone()).or_insert(JsonValue::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Applies the manager-editable keys of `patch` to `settings`.
///
/// Keys outside [`MANAGER_SETTINGS_KEYS`] are ignored in the patch and left
/// untouched in the stored settings.
pub fn merge_manager_settings(settings: &JsonValue, patch: &JsonValue) -> JsonValue {
    let mut merged = match settings {
        JsonValue::Object(_) => settings.clone(),
        _ => JsonValue::Object(Map::new()),
    };

    if let (JsonValue::Object(target), JsonValue::Object(patch)) = (&mut merged, patch) {
        for key in MANAGER_SETTINGS_KEYS {
            if let Some(value) = patch.get(*key) {
                deep_merge(
                    target.entry(key.to_string()).or_insert(JsonValue::Null),
                    value,
                );
            }
        }
    }

    merged
}

impl Organization {
    /// Inserts an organization; the subscription status follows the plan.
    ///
    /// # Errors
    ///
    /// Unique violation on `organizations_slug_key` when the slug is taken.
    pub async fn create(pool: &PgPool, data: CreateOrganization) -> Result<Self, sqlx::Error> {
        let status = data.subscription_plan.initial_status();

        sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (
                name, slug, subscription_plan, subscription_status,
                max_users, max_coaches, max_entrepreneurs, billing_email, contact, settings
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, '{}'::jsonb))
            RETURNING *
            "#,
        )
        .bind(data.name)
        .bind(normalize_slug(&data.slug))
        .bind(data.subscription_plan)
        .bind(status)
        .bind(data.max_users)
        .bind(data.max_coaches)
        .bind(data.max_entrepreneurs)
        .bind(data.billing_email)
        .bind(Json(data.contact))
        .bind(data.settings)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Whether `slug` is used by an organization other than `exclude`
    pub async fn slug_taken(
        pool: &PgPool,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organizations
                WHERE slug = $1 AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(normalize_slug(slug))
        .bind(exclude)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateOrganization,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(
            r#"
            UPDATE organizations SET
                name = COALESCE($2, name),
                slug = COALESCE($3, slug),
                is_active = COALESCE($4, is_active),
                subscription_plan = COALESCE($5, subscription_plan),
                subscription_status = COALESCE($6, subscription_status),
                subscription_renewal_at = COALESCE($7, subscription_renewal_at),
                max_users = COALESCE($8, max_users),
                max_coaches = COALESCE($9, max_coaches),
                max_entrepreneurs = COALESCE($10, max_entrepreneurs),
                billing_email = COALESCE($11, billing_email),
                contact = COALESCE($12, contact),
                settings = COALESCE($13, settings),
                preferences = COALESCE($14, preferences)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.slug.as_deref().map(normalize_slug))
        .bind(data.is_active)
        .bind(data.subscription_plan)
        .bind(data.subscription_status)
        .bind(data.subscription_renewal_at)
        .bind(data.max_users)
        .bind(data.max_coaches)
        .bind(data.max_entrepreneurs)
        .bind(data.billing_email)
        .bind(data.contact.map(Json))
        .bind(data.settings)
        .bind(data.preferences)
        .fetch_optional(pool)
        .await
    }

    /// Replaces the settings document.
    pub async fn set_settings(
        pool: &PgPool,
        id: Uuid,
        settings: &JsonValue,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(
            "UPDATE organizations SET settings = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(settings)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_logo_path(
        pool: &PgPool,
        id: Uuid,
        logo_path: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(
            "UPDATE organizations SET logo_path = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(logo_path)
        .fetch_optional(pool)
        .await
    }

    /// Soft delete
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE organizations SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest first
    pub async fn list(
        pool: &PgPool,
        filter: &OrganizationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations
            WHERE ($1::boolean IS NULL OR is_active = $1)
              AND ($2::subscription_plan IS NULL OR subscription_plan = $2)
              AND ($3::subscription_status IS NULL OR subscription_status = $3)
              AND ($4::text IS NULL
                   OR name ILIKE '%' || $4 || '%'
                   OR slug ILIKE '%' || $4 || '%'
                   OR billing_email ILIKE '%' || $4 || '%')
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.is_active)
        .bind(filter.subscription_plan)
        .bind(filter.subscription_status)
        .bind(filter.search.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &PgPool, filter: &OrganizationFilter) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM organizations
            WHERE ($1::boolean IS NULL OR is_active = $1)
              AND ($2::subscription_plan IS NULL OR subscription_plan = $2)
              AND ($3::subscription_status IS NULL OR subscription_status = $3)
              AND ($4::text IS NULL
                   OR name ILIKE '%' || $4 || '%'
                   OR slug ILIKE '%' || $4 || '%'
                   OR billing_email ILIKE '%' || $4 || '%')
            "#,
        )
        .bind(filter.is_active)
        .bind(filter.subscription_plan)
        .bind(filter.subscription_status)
        .bind(filter.search.as_deref())
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initial_status_follows_plan() {
        assert_eq!(SubscriptionPlan::Free.initial_status(), SubscriptionStatus::Active);
        assert_eq!(
            SubscriptionPlan::Standard.initial_status(),
            SubscriptionStatus::Trialing
        );
        assert_eq!(
            SubscriptionPlan::Premium.initial_status(),
            SubscriptionStatus::Trialing
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(SubscriptionStatus::PastDue).unwrap(),
            json!("past_due")
        );
        assert_eq!(SubscriptionStatus::PastDue.as_str(), "past_due");
    }

    #[test]
    fn test_slug_rules() {
        assert_eq!(normalize_slug("  North-Wind "), "north-wind");
        assert!(is_valid_slug("north-wind-2"));
        assert!(!is_valid_slug("a"));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("trailing-"));
        assert!(!is_valid_slug("Upper"));
        assert!(!is_valid_slug("spa ce"));
    }

    #[test]
    fn test_merge_manager_settings_keeps_other_keys() {
        let stored = json!({
            "billingCycle": "monthly",
            "notificationPreferences": { "email": true, "sms": false },
            "dashboardLayout": { "widgets": ["sessions"] }
        });
        let patch = json!({
            "notificationPreferences": { "sms": true },
            "approvalThresholds": { "payment": 500 },
            "billingCycle": "yearly"
        });

        let merged = merge_manager_settings(&stored, &patch);

        assert_eq!(merged["billingCycle"], "monthly");
        assert_eq!(merged["notificationPreferences"], json!({ "email": true, "sms": true }));
        assert_eq!(merged["dashboardLayout"], json!({ "widgets": ["sessions"] }));
        assert_eq!(merged["approvalThresholds"], json!({ "payment": 500 }));
    }

    #[test]
    fn test_merge_manager_settings_on_non_object() {
        let merged = merge_manager_settings(&JsonValue::Null, &json!({ "dashboardLayout": "grid" }));
        assert_eq!(merged, json!({ "dashboardLayout": "grid" }));
    }

    #[test]
    fn test_deep_merge_replaces_arrays() {
        let mut target = json!({ "a": [1, 2], "b": { "c": 1 } });
        deep_merge(&mut target, &json!({ "a": [3], "b": { "d": 2 } }));
        assert_eq!(target, json!({ "a": [3], "b": { "c": 1, "d": 2 } }));
    }
}
