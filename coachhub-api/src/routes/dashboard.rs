/// Dashboard figures
///
/// Admins and managers see their organization (super admins every tenant);
/// coaches see only their own sessions, goals and revenue.

use crate::{app::AppState, error::ApiResult, response::ApiResponse};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use coachhub_shared::{
    auth::{
        authorization::{require_role, OrganizationScope, SCHEDULERS},
        middleware::AuthContext,
    },
    models::user::UserRole,
    reports::{self, DashboardStats, DayCounts, GoalBreakdown, ReportScope, TrendRange},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionTrend {
    pub data: BTreeMap<String, DayCounts>,
    pub range: TrendRange,
}

#[derive(Debug, Serialize)]
pub struct RevenueReport {
    pub data: BTreeMap<String, Decimal>,
    pub total: Decimal,
    pub range: TrendRange,
}

fn report_scope(auth: &AuthContext) -> ApiResult<ReportScope> {
    require_role(auth, SCHEDULERS)?;

    Ok(ReportScope {
        organization_id: OrganizationScope::of(auth).filter()?,
        coach_id: (auth.role == UserRole::Coach).then_some(auth.user_id),
    })
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<DashboardStats>>> {
    let scope = report_scope(&auth)?;
    Ok(ApiResponse::ok(DashboardStats::load(&state.db, scope).await?))
}

pub async fn sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<ApiResponse<SessionTrend>>> {
    let scope = report_scope(&auth)?;
    let range = TrendRange::parse(query.range.as_deref());

    let data = reports::sessions_trend(&state.db, scope, range, Utc::now().date_naive()).await?;

    Ok(ApiResponse::ok(SessionTrend { data, range }))
}

pub async fn goals_by_category(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<GoalBreakdown>>> {
    let scope = report_scope(&auth)?;
    Ok(ApiResponse::ok(reports::goal_breakdown(&state.db, scope).await?))
}

pub async fn revenue(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<ApiResponse<RevenueReport>>> {
    let scope = report_scope(&auth)?;
    let range = TrendRange::parse(query.range.as_deref());

    let trend = reports::revenue_trend(&state.db, scope, range, Utc::now().date_naive()).await?;

    Ok(ApiResponse::ok(RevenueReport {
        data: trend.data,
        total: trend.total,
        range,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use uuid::Uuid;

    fn ctx(role: UserRole) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            organization_id: Some(Uuid::new_v4()),
            role,
            email: "someone@example.com".to_string(),
        }
    }

    #[test]
    fn test_coach_scope_is_own_figures() {
        let coach = ctx(UserRole::Coach);
        let scope = report_scope(&coach).unwrap();

        assert_eq!(scope.coach_id, Some(coach.user_id));
        assert_eq!(scope.organization_id, coach.organization_id);
    }

    #[test]
    fn test_manager_scope_is_organization() {
        let manager = ctx(UserRole::Manager);
        assert_eq!(report_scope(&manager).unwrap().coach_id, None);
    }

    #[test]
    fn test_entrepreneur_has_no_dashboard() {
        assert!(matches!(
            report_scope(&ctx(UserRole::Entrepreneur)),
            Err(ApiError::Forbidden(_))
        ));
    }
}
