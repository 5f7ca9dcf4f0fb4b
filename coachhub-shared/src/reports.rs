/// Aggregate figures for organization stats and dashboards
///
/// All queries take a [`ReportScope`]: `organization_id: None` spans every
/// tenant (super admins), `coach_id` narrows session, goal and revenue
/// figures to one coach.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::goal::{GoalPriority, GoalStatus};
use crate::models::organization::{Organization, SubscriptionPlan, SubscriptionStatus};
use crate::quota::{OrganizationQuotaUsage, SeatCounts};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportScope {
    pub organization_id: Option<Uuid>,
    pub coach_id: Option<Uuid>,
}

/// Trailing window for trend charts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendRange {
    Week,
    Month,
    Year,
}

impl TrendRange {
    /// Unknown values fall back to a month
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("week") => TrendRange::Week,
            Some("year") => TrendRange::Year,
            _ => TrendRange::Month,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            TrendRange::Week => 7,
            TrendRange::Month => 30,
            TrendRange::Year => 365,
        }
    }

    /// First day included when the window ends on `today`
    pub fn start_date(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.days() - 1)
    }
}

/// Every date from `start` to `end` inclusive as `YYYY-MM-DD`
pub fn date_keys(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| day.format("%Y-%m-%d").to_string())
        .collect()
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationStats {
    pub organization_id: Uuid,
    pub name: String,
    pub total_users: i64,
    pub total_coaches: i64,
    pub total_entrepreneurs: i64,
    pub total_sessions: i64,
    pub total_revenue: Decimal,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub quota_usage: OrganizationQuotaUsage,
}

impl OrganizationStats {
    /// Revenue counts every invoice except void and refunded ones.
    pub async fn load(pool: &PgPool, org: &Organization) -> Result<Self, sqlx::Error> {
        let seats = SeatCounts::load(pool, org.id).await?;

        let (total_sessions, total_revenue): (i64, Decimal) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sessions WHERE organization_id = $1),
                (SELECT COALESCE(SUM(total_amount), 0) FROM payments
                 WHERE organization_id = $1 AND status NOT IN ('void', 'refunded'))
            "#,
        )
        .bind(org.id)
        .fetch_one(pool)
        .await?;

        Ok(OrganizationStats {
            organization_id: org.id,
            name: org.name.clone(),
            total_users: seats.users,
            total_coaches: seats.coaches,
            total_entrepreneurs: seats.entrepreneurs,
            total_sessions,
            total_revenue,
            subscription_plan: org.subscription_plan,
            subscription_status: org.subscription_status,
            quota_usage: seats.usage(org),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub total: i64,
    pub coaches: i64,
    pub entrepreneurs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub total: i64,
    pub upcoming: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevenueTotal {
    /// Sum of paid invoice totals
    pub total: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub users: UserCounts,
    pub sessions: SessionCounts,
    pub revenue: RevenueTotal,
}

impl DashboardStats {
    pub async fn load(pool: &PgPool, scope: ReportScope) -> Result<Self, sqlx::Error> {
        let (users, coaches, entrepreneurs): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE role <> 'admin'),
                COUNT(*) FILTER (WHERE role = 'coach'),
                COUNT(*) FILTER (WHERE role = 'entrepreneur')
            FROM users
            WHERE ($1::uuid IS NULL OR organization_id = $1) AND is_active
            "#,
        )
        .bind(scope.organization_id)
        .fetch_one(pool)
        .await?;

        let (total, upcoming, completed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status IN ('scheduled', 'rescheduled') AND scheduled_at >= NOW()),
                COUNT(*) FILTER (WHERE status = 'completed')
            FROM sessions
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::uuid IS NULL OR coach_id = $2)
            "#,
        )
        .bind(scope.organization_id)
        .bind(scope.coach_id)
        .fetch_one(pool)
        .await?;

        let revenue: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_amount), 0) FROM payments
            WHERE status = 'paid'
              AND ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::uuid IS NULL OR coach_id = $2)
            "#,
        )
        .bind(scope.organization_id)
        .bind(scope.coach_id)
        .fetch_one(pool)
        .await?;

        Ok(DashboardStats {
            users: UserCounts {
                total: users,
                coaches,
                entrepreneurs,
            },
            sessions: SessionCounts {
                total,
                upcoming,
                completed,
            },
            revenue: RevenueTotal { total: revenue },
        })
    }
}

/// Sessions per day by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayCounts {
    pub scheduled: i64,
    pub completed: i64,
    pub cancelled: i64,
}

/// Session counts for every day of the range ending today, zero-filled.
pub async fn sessions_trend(
    pool: &PgPool,
    scope: ReportScope,
    range: TrendRange,
    today: NaiveDate,
) -> Result<BTreeMap<String, DayCounts>, sqlx::Error> {
    let start = range.start_date(today);

    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT
            to_char(scheduled_at AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS day,
            COUNT(*) FILTER (WHERE status IN ('scheduled', 'rescheduled', 'in_progress')),
            COUNT(*) FILTER (WHERE status = 'completed'),
            COUNT(*) FILTER (WHERE status IN ('cancelled', 'no_show'))
        FROM sessions
        WHERE scheduled_at >= $1 AND scheduled_at < $2
          AND ($3::uuid IS NULL OR organization_id = $3)
          AND ($4::uuid IS NULL OR coach_id = $4)
        GROUP BY day
        "#,
    )
    .bind(start_of(start))
    .bind(start_of(today) + Duration::days(1))
    .bind(scope.organization_id)
    .bind(scope.coach_id)
    .fetch_all(pool)
    .await?;

    let mut days: BTreeMap<String, DayCounts> = date_keys(start, today)
        .into_iter()
        .map(|day| (day, DayCounts::default()))
        .collect();

    for (day, scheduled, completed, cancelled) in rows {
        days.insert(
            day,
            DayCounts {
                scheduled,
                completed,
                cancelled,
            },
        );
    }

    Ok(days)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevenueTrend {
    pub data: BTreeMap<String, Decimal>,
    pub total: Decimal,
}

/// Paid revenue per day by `paid_at`, zero-filled.
pub async fn revenue_trend(
    pool: &PgPool,
    scope: ReportScope,
    range: TrendRange,
    today: NaiveDate,
) -> Result<RevenueTrend, sqlx::Error> {
    let start = range.start_date(today);

    let rows: Vec<(String, Decimal)> = sqlx::query_as(
        r#"
        SELECT
            to_char(paid_at AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS day,
            COALESCE(SUM(total_amount), 0)
        FROM payments
        WHERE status = 'paid'
          AND paid_at >= $1 AND paid_at < $2
          AND ($3::uuid IS NULL OR organization_id = $3)
          AND ($4::uuid IS NULL OR coach_id = $4)
        GROUP BY day
        "#,
    )
    .bind(start_of(start))
    .bind(start_of(today) + Duration::days(1))
    .bind(scope.organization_id)
    .bind(scope.coach_id)
    .fetch_all(pool)
    .await?;

    let mut trend = RevenueTrend {
        data: date_keys(start, today)
            .into_iter()
            .map(|day| (day, Decimal::ZERO))
            .collect(),
        total: Decimal::ZERO,
    };

    for (day, amount) in rows {
        trend.total += amount;
        trend.data.insert(day, amount);
    }

    Ok(trend)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalBreakdown {
    pub by_status: BTreeMap<&'static str, i64>,
    pub by_priority: BTreeMap<&'static str, i64>,
}

/// Non-archived goal counts by status and priority.
pub async fn goal_breakdown(pool: &PgPool, scope: ReportScope) -> Result<GoalBreakdown, sqlx::Error> {
    let rows: Vec<(GoalStatus, GoalPriority, i64)> = sqlx::query_as(
        r#"
        SELECT status, priority, COUNT(*)
        FROM goals
        WHERE NOT is_archived
          AND ($1::uuid IS NULL OR organization_id = $1)
          AND ($2::uuid IS NULL OR coach_id = $2)
        GROUP BY status, priority
        "#,
    )
    .bind(scope.organization_id)
    .bind(scope.coach_id)
    .fetch_all(pool)
    .await?;

    Ok(fold_goal_rows(rows))
}

/// Sums `(status, priority, count)` rows; every status and priority is
/// present, zero when absent.
pub fn fold_goal_rows(rows: Vec<(GoalStatus, GoalPriority, i64)>) -> GoalBreakdown {
    let mut breakdown = GoalBreakdown::default();

    for status in [
        GoalStatus::NotStarted,
        GoalStatus::InProgress,
        GoalStatus::Completed,
        GoalStatus::Blocked,
    ] {
        breakdown.by_status.insert(status.as_str(), 0);
    }
    for priority in [GoalPriority::Low, GoalPriority::Medium, GoalPriority::High] {
        breakdown.by_priority.insert(priority.as_str(), 0);
    }

    for (status, priority, count) in rows {
        *breakdown.by_status.entry(status.as_str()).or_default() += count;
        *breakdown.by_priority.entry(priority.as_str()).or_default() += count;
    }

    breakdown
}
