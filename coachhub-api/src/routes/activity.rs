/// Audit log endpoints
///
/// - `GET /api/v1/admin/activity` - Newest first, offset paginated
/// - `GET /api/v1/admin/activity/stats` - Entry count per type

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    pagination::{OffsetInfo, OffsetQuery},
    response::ApiResponse,
    routes::parse_date_param,
};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use coachhub_shared::{
    auth::{
        authorization::{require_role, OrganizationScope, STAFF},
        middleware::AuthContext,
    },
    models::activity::{Activity, ActivityFilter, ActivityType},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub activity_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ActivityQuery {
    fn offset(&self) -> OffsetQuery {
        OffsetQuery {
            skip: self.skip,
            limit: self.limit,
        }
    }

    /// Unknown type names are rejected, unparseable dates ignored.
    fn filter(&self, auth: &AuthContext) -> ApiResult<ActivityFilter> {
        let activity_type = match self.activity_type.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(ActivityType::from_str(raw).ok_or_else(|| {
                ApiError::BadRequest(format!("Unknown activity type: {}", raw))
            })?),
            None => None,
        };

        Ok(ActivityFilter {
            organization_id: OrganizationScope::of(auth).filter()?,
            activity_type,
            from: parse_date_param(self.start_date.as_deref(), false),
            to: parse_date_param(self.end_date.as_deref(), true),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ActivityPage {
    pub success: bool,
    pub data: Vec<Activity>,
    pub pagination: OffsetInfo,
}

pub async fn list_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<ActivityPage>> {
    require_role(&auth, STAFF)?;

    let filter = query.filter(&auth)?;
    let offset = query.offset();
    let (skip, limit) = (offset.skip(), offset.limit(DEFAULT_LIMIT, MAX_LIMIT));

    let data = Activity::list(&state.db, &filter, limit, skip).await?;
    let total = Activity::count(&state.db, &filter).await?;

    Ok(Json(ActivityPage {
        success: true,
        data,
        pagination: OffsetInfo::new(total, limit, skip),
    }))
}

pub async fn activity_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<ApiResponse<BTreeMap<ActivityType, i64>>>> {
    require_role(&auth, STAFF)?;

    let filter = query.filter(&auth)?;
    Ok(ApiResponse::ok(Activity::counts_by_type(&state.db, &filter).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachhub_shared::models::user::UserRole;
    use uuid::Uuid;

    fn manager() -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: "manager@example.com".to_string(),
            role: UserRole::Manager,
            organization_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_filter_scopes_to_own_organization() {
        let auth = manager();
        let query = ActivityQuery {
            activity_type: Some("SESSION_CREATED".to_string()),
            start_date: Some("not a date".to_string()),
            end_date: Some("2026-03-31".to_string()),
            ..Default::default()
        };

        let filter = query.filter(&auth).unwrap();
        assert_eq!(filter.organization_id, auth.organization_id);
        assert_eq!(filter.activity_type, Some(ActivityType::SessionCreated));
        assert!(filter.from.is_none());
        assert!(filter.to.is_some());
    }

    #[test]
    fn test_unknown_activity_type_rejected() {
        let query = ActivityQuery {
            activity_type: Some("SOMETHING_ELSE".to_string()),
            ..Default::default()
        };

        assert!(matches!(query.filter(&manager()), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_offset_limits() {
        let query = ActivityQuery {
            limit: Some(500),
            skip: Some(-3),
            ..Default::default()
        };

        let offset = query.offset();
        assert_eq!(offset.limit(DEFAULT_LIMIT, MAX_LIMIT), MAX_LIMIT);
        assert_eq!(offset.skip(), 0);
    }
}
