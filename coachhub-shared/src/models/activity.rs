/// Activity (audit log) model
///
/// Append-only record of domain events. Writing an entry must never fail the
/// request that caused it: use [`Activity::log`], which swallows and logs
/// database errors, from request handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Audited event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    UserRegistered,
    UserActivated,
    UserDeactivated,
    SessionCreated,
    SessionCompleted,
    SessionCancelled,
    PaymentGenerated,
    PaymentCompleted,
    OrganizationCreated,
    OrganizationUpdated,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::UserRegistered => "USER_REGISTERED",
            ActivityType::UserActivated => "USER_ACTIVATED",
            ActivityType::UserDeactivated => "USER_DEACTIVATED",
            ActivityType::SessionCreated => "SESSION_CREATED",
            ActivityType::SessionCompleted => "SESSION_COMPLETED",
            ActivityType::SessionCancelled => "SESSION_CANCELLED",
            ActivityType::PaymentGenerated => "PAYMENT_GENERATED",
            ActivityType::PaymentCompleted => "PAYMENT_COMPLETED",
            ActivityType::OrganizationCreated => "ORGANIZATION_CREATED",
            ActivityType::OrganizationUpdated => "ORGANIZATION_UPDATED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USER_REGISTERED" => Some(ActivityType::UserRegistered),
            "USER_ACTIVATED" => Some(ActivityType::UserActivated),
            "USER_DEACTIVATED" => Some(ActivityType::UserDeactivated),
            "SESSION_CREATED" => Some(ActivityType::SessionCreated),
            "SESSION_COMPLETED" => Some(ActivityType::SessionCompleted),
            "SESSION_CANCELLED" => Some(ActivityType::SessionCancelled),
            "PAYMENT_GENERATED" => Some(ActivityType::PaymentGenerated),
            "PAYMENT_COMPLETED" => Some(ActivityType::PaymentCompleted),
            "ORGANIZATION_CREATED" => Some(ActivityType::OrganizationCreated),
            "ORGANIZATION_UPDATED" => Some(ActivityType::OrganizationUpdated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub activity_type: ActivityType,
    pub description: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Entry to append
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub activity_type: ActivityType,
    pub description: String,
    pub entity_type: Option<&'static str>,
    pub entity_id: Option<Uuid>,
    pub metadata: JsonValue,
}

impl NewActivity {
    pub fn new(activity_type: ActivityType, description: impl Into<String>) -> Self {
        Self {
            organization_id: None,
            actor_id: None,
            activity_type,
            description: description.into(),
            entity_type: None,
            entity_id: None,
            metadata: JsonValue::Object(Default::default()),
        }
    }

    pub fn organization(mut self, organization_id: Option<Uuid>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn entity(mut self, entity_type: &'static str, entity_id: Uuid) -> Self {
        self.entity_type = Some(entity_type);
        self.entity_id = Some(entity_id);
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Listing filter. `organization_id: None` spans all tenants.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub organization_id: Option<Uuid>,
    pub activity_type: Option<ActivityType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

const FILTER_CLAUSE: &str = r#"
    WHERE ($1::uuid IS NULL OR organization_id = $1)
      AND ($2::activity_type IS NULL OR activity_type = $2)
      AND ($3::timestamptz IS NULL OR created_at >= $3)
      AND ($4::timestamptz IS NULL OR created_at <= $4)
"#;

impl Activity {
    pub async fn record(pool: &PgPool, entry: NewActivity) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Activity>(
            r#"
            INSERT INTO activities (
                organization_id, actor_id, activity_type, description,
                entity_type, entity_id, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(entry.organization_id)
        .bind(entry.actor_id)
        .bind(entry.activity_type)
        .bind(entry.description)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.metadata)
        .fetch_one(pool)
        .await
    }

    /// Records `entry`, logging instead of returning a failure.
    pub async fn log(pool: &PgPool, entry: NewActivity) {
        let activity_type = entry.activity_type;
        if let Err(err) = Self::record(pool, entry).await {
            tracing::warn!(
                activity_type = activity_type.as_str(),
                error = %err,
                "Failed to record activity"
            );
        }
    }

    /// Newest first
    pub async fn list(
        pool: &PgPool,
        filter: &ActivityFilter,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT * FROM activities {} ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6",
            FILTER_CLAUSE
        );

        sqlx::query_as::<_, Activity>(&query)
            .bind(filter.organization_id)
            .bind(filter.activity_type)
            .bind(filter.from)
            .bind(filter.to)
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
            .await
    }

    pub async fn count(pool: &PgPool, filter: &ActivityFilter) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM activities {}", FILTER_CLAUSE);

        sqlx::query_scalar(&query)
            .bind(filter.organization_id)
            .bind(filter.activity_type)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(pool)
            .await
    }

    /// Entry count per type; types without entries are absent.
    pub async fn counts_by_type(
        pool: &PgPool,
        filter: &ActivityFilter,
    ) -> Result<BTreeMap<ActivityType, i64>, sqlx::Error> {
        let query = format!(
            "SELECT activity_type, COUNT(*) FROM activities {} GROUP BY activity_type",
            FILTER_CLAUSE
        );

        let rows: Vec<(ActivityType, i64)> = sqlx::query_as(&query)
            .bind(filter.organization_id)
            .bind(filter.activity_type)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_type_names() {
        assert_eq!(ActivityType::SessionCancelled.as_str(), "SESSION_CANCELLED");
        assert_eq!(
            serde_json::to_value(ActivityType::OrganizationUpdated).unwrap(),
            json!("ORGANIZATION_UPDATED")
        );
        assert_eq!(
            ActivityType::from_str("PAYMENT_GENERATED"),
            Some(ActivityType::PaymentGenerated)
        );
        assert_eq!(ActivityType::from_str("payment_generated"), None);
    }

    #[test]
    fn test_new_activity_builder() {
        let org = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let session = Uuid::new_v4();

        let entry = NewActivity::new(ActivityType::SessionCreated, "Session scheduled")
            .organization(Some(org))
            .actor(actor)
            .entity("session", session)
            .metadata(json!({ "duration": 60 }));

        assert_eq!(entry.organization_id, Some(org));
        assert_eq!(entry.actor_id, Some(actor));
        assert_eq!(entry.entity_type, Some("session"));
        assert_eq!(entry.entity_id, Some(session));
        assert_eq!(entry.metadata["duration"], 60);
    }
}
