/// Coaching session model and the scheduling conflict check
///
/// A session books a coach, an entrepreneur and a manager for a time window
/// `[scheduled_at, end_time)` where `end_time = scheduled_at + duration`.
/// A coach can never hold two *active* sessions (scheduled, rescheduled or
/// in progress) whose windows overlap.
///
/// Scheduling runs in a transaction holding a per-coach advisory lock, so
/// two concurrent bookings for the same coach are serialized: the second one
/// sees the first and reports a conflict.
///
/// # Example
///
/// ```no_run
/// use chrono::{Duration, Utc};
/// use coachhub_shared::models::session::{NewSession, ScheduleOutcome, Session};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, org: Uuid, coach: Uuid, founder: Uuid, manager: Uuid) -> Result<(), sqlx::Error> {
/// let outcome = Session::schedule(
///     &pool,
///     NewSession {
///         organization_id: org,
///         coach_id: coach,
///         entrepreneur_id: founder,
///         manager_id: manager,
///         scheduled_at: Utc::now() + Duration::days(1),
///         duration: 60,
///         agenda_items: Vec::new(),
///         location: None,
///         video_conference_url: None,
///     },
/// )
/// .await?;
///
/// match outcome {
///     ScheduleOutcome::Created(session) => println!("booked {}", session.id),
///     ScheduleOutcome::Conflict(existing) => println!("clashes with {}", existing.id),
///     ScheduleOutcome::Billed(_) => unreachable!("new sessions carry no invoice"),
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::SortOrder;

/// Shortest bookable session in minutes
pub const MIN_DURATION_MINUTES: i32 = 15;

/// Longest bookable session in minutes
pub const MAX_DURATION_MINUTES: i32 = 480;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Rescheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Rescheduled => "rescheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::NoShow => "no_show",
        }
    }

    /// Active sessions occupy the coach's calendar
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Scheduled | SessionStatus::Rescheduled | SessionStatus::InProgress
        )
    }
}

/// One agenda entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
}

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Touching windows (one ends exactly when the other starts) do not
    /// overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Coaching session
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub coach_id: Uuid,
    pub entrepreneur_id: Uuid,
    pub manager_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    /// Minutes
    pub duration: i32,
    pub end_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub agenda_items: Json<Vec<AgendaItem>>,
    pub notes: JsonValue,
    pub location: Option<String>,
    pub video_conference_url: Option<String>,
    pub rating: Option<i16>,
    pub rating_comment: Option<String>,
    /// Set once the session has been invoiced
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.scheduled_at,
            end: self.end_time,
        }
    }

    pub fn is_billed(&self) -> bool {
        self.payment_id.is_some()
    }

    pub fn participants(&self) -> [Uuid; 3] {
        [self.coach_id, self.entrepreneur_id, self.manager_id]
    }
}

/// Input for booking a session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub organization_id: Uuid,
    pub coach_id: Uuid,
    pub entrepreneur_id: Uuid,
    pub manager_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration: i32,
    pub agenda_items: Vec<AgendaItem>,
    pub location: Option<String>,
    pub video_conference_url: Option<String>,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct SessionChanges {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub status: Option<SessionStatus>,
    pub notes: Option<JsonValue>,
    pub agenda_items: Option<Vec<AgendaItem>>,
    pub location: Option<String>,
    pub video_conference_url: Option<String>,
}

impl SessionChanges {
    pub fn moves_window(&self, current: &Session) -> bool {
        self.scheduled_at.is_some_and(|at| at != current.scheduled_at)
            || self.duration.is_some_and(|d| d != current.duration)
    }

    pub fn changes_status(&self, current: &Session) -> bool {
        self.status.is_some_and(|s| s != current.status)
    }

    /// Billed sessions keep their window and status.
    pub fn blocked_by_billing(&self, current: &Session) -> bool {
        current.is_billed() && (self.moves_window(current) || self.changes_status(current))
    }
}

/// Result of a write that had to pass the conflict check
#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    Created(Session),
    /// The write was rolled back; holds the clashing session
    Conflict(Session),
    /// The write was rolled back; holds the session as invoiced
    Billed(Session),
}

/// List filter. Every field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub organization_id: Option<Uuid>,
    pub coach_id: Option<Uuid>,
    pub entrepreneur_id: Option<Uuid>,
    pub status: Option<SessionStatus>,
    /// Scheduled or rescheduled, starting now or later
    pub upcoming: bool,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Sort keys accepted by [`Session::list`]
pub const SESSION_SORT_KEYS: &[(&str, &str)] = &[
    ("scheduledAt", "scheduled_at"),
    ("createdAt", "created_at"),
    ("duration", "duration"),
    ("status", "status"),
];

/// Earliest first
pub const SESSION_DEFAULT_SORT: SortOrder = SortOrder {
    column: "scheduled_at",
    descending: false,
};

const FILTER_CLAUSE: &str = r#"
    WHERE ($1::uuid IS NULL OR organization_id = $1)
      AND ($2::uuid IS NULL OR coach_id = $2)
      AND ($3::uuid IS NULL OR entrepreneur_id = $3)
      AND ($4::session_status IS NULL OR status = $4)
      AND (NOT $5 OR (status IN ('scheduled', 'rescheduled') AND scheduled_at >= NOW()))
      AND ($6::timestamptz IS NULL OR scheduled_at >= $6)
      AND ($7::timestamptz IS NULL OR scheduled_at < $7)
"#;

/// Serializes scheduling for one coach until the transaction ends.
async fn lock_coach(conn: &mut PgConnection, coach_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(coach_id)
        .execute(conn)
        .await?;

    Ok(())
}

impl Session {
    /// Returns an active session of `coach_id` overlapping `window`, if any.
    ///
    /// `exclude` skips one session, used when moving an existing booking.
    pub async fn find_conflict<'e, E>(
        executor: E,
        coach_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE coach_id = $1
              AND status IN ('scheduled', 'rescheduled', 'in_progress')
              AND scheduled_at < $3
              AND $2 < end_time
              AND ($4::uuid IS NULL OR id <> $4)
            ORDER BY scheduled_at
            LIMIT 1
            "#,
        )
        .bind(coach_id)
        .bind(window.start)
        .bind(window.end)
        .bind(exclude)
        .fetch_optional(executor)
        .await
    }

    /// Books a session unless the coach is already busy in that window.
    pub async fn schedule(pool: &PgPool, data: NewSession) -> Result<ScheduleOutcome, sqlx::Error> {
        let window = TimeWindow::new(data.scheduled_at, data.duration);
        let mut tx = pool.begin().await?;

        lock_coach(&mut tx, data.coach_id).await?;

        if let Some(existing) = Self::find_conflict(&mut *tx, data.coach_id, window, None).await? {
            tx.rollback().await?;
            return Ok(ScheduleOutcome::Conflict(existing));
        }

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (
                organization_id, coach_id, entrepreneur_id, manager_id,
                scheduled_at, duration, end_time, agenda_items, location, video_conference_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(data.organization_id)
        .bind(data.coach_id)
        .bind(data.entrepreneur_id)
        .bind(data.manager_id)
        .bind(window.start)
        .bind(data.duration)
        .bind(window.end)
        .bind(Json(data.agenda_items))
        .bind(data.location)
        .bind(data.video_conference_url)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ScheduleOutcome::Created(session))
    }

    /// Applies `changes` to the session `snapshot` was read from.
    ///
    /// The row is re-read under `FOR UPDATE`, so an invoice issued after
    /// `snapshot` was taken still blocks window and status changes. When
    /// the window moves or the session becomes active again, the conflict
    /// check runs under the coach lock with the session itself excluded.
    pub async fn apply_changes(
        pool: &PgPool,
        snapshot: &Session,
        changes: SessionChanges,
    ) -> Result<ScheduleOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(snapshot.id)
            .fetch_one(&mut *tx)
            .await?;

        if changes.blocked_by_billing(&current) {
            tx.rollback().await?;
            return Ok(ScheduleOutcome::Billed(current));
        }

        let scheduled_at = changes.scheduled_at.unwrap_or(current.scheduled_at);
        let duration = changes.duration.unwrap_or(current.duration);
        let status = changes.status.unwrap_or(current.status);
        let window = TimeWindow::new(scheduled_at, duration);

        let needs_check = status.is_active()
            && (changes.moves_window(&current) || !current.status.is_active());

        if needs_check {
            lock_coach(&mut tx, current.coach_id).await?;

            if let Some(existing) =
                Self::find_conflict(&mut *tx, current.coach_id, window, Some(current.id)).await?
            {
                tx.rollback().await?;
                return Ok(ScheduleOutcome::Conflict(existing));
            }
        }

        let session = sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions SET
                scheduled_at = $2,
                duration = $3,
                end_time = $4,
                status = $5,
                notes = COALESCE($6, notes),
                agenda_items = COALESCE($7, agenda_items),
                location = COALESCE($8, location),
                video_conference_url = COALESCE($9, video_conference_url)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(window.start)
        .bind(duration)
        .bind(window.end)
        .bind(status)
        .bind(changes.notes)
        .bind(changes.agenda_items.map(Json))
        .bind(changes.location)
        .bind(changes.video_conference_url)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ScheduleOutcome::Created(session))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// `organization_id: None` searches every tenant
    pub async fn find_in_organization(
        pool: &PgPool,
        id: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE id = $1 AND ($2::uuid IS NULL OR organization_id = $2)",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await
    }

    /// Stores a rating; only completed sessions can be rated.
    pub async fn rate(
        pool: &PgPool,
        id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions SET rating = $2, rating_comment = $3
            WHERE id = $1 AND status = 'completed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(rating)
        .bind(comment)
        .fetch_optional(pool)
        .await
    }

    /// Deletes an unbilled session. Returns `false` if nothing was deleted.
    pub async fn delete_unbilled(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND payment_id IS NULL")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list(
        pool: &PgPool,
        filter: &SessionFilter,
        sort: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT * FROM sessions {} ORDER BY {} LIMIT $8 OFFSET $9",
            FILTER_CLAUSE,
            sort.to_sql()
        );

        sqlx::query_as::<_, Session>(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.entrepreneur_id)
            .bind(filter.status)
            .bind(filter.upcoming)
            .bind(filter.from)
            .bind(filter.to)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn count(pool: &PgPool, filter: &SessionFilter) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM sessions {}", FILTER_CLAUSE);

        sqlx::query_scalar(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.entrepreneur_id)
            .bind(filter.status)
            .bind(filter.upcoming)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(pool)
            .await
    }

    /// Every matching session ordered by start, for calendars and exports.
    pub async fn list_all(pool: &PgPool, filter: &SessionFilter) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!("SELECT * FROM sessions {} ORDER BY scheduled_at, id", FILTER_CLAUSE);

        sqlx::query_as::<_, Session>(&query)
            .bind(filter.organization_id)
            .bind(filter.coach_id)
            .bind(filter.entrepreneur_id)
            .bind(filter.status)
            .bind(filter.upcoming)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(pool)
            .await
    }
}

/// `[first instant of the month, first instant of the next month)` in UTC.
///
/// Returns `None` for a month outside 1..=12 or an unrepresentable year.
pub fn month_bounds(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };

    Some((
        Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0)?),
        Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0)?),
    ))
}

/// Groups sessions by the UTC date they start on (`YYYY-MM-DD`).
pub fn group_by_day(sessions: Vec<Session>) -> BTreeMap<String, Vec<Session>> {
    let mut days: BTreeMap<String, Vec<Session>> = BTreeMap::new();
    for session in sessions {
        let key = format!(
            "{:04}-{:02}-{:02}",
            session.scheduled_at.year(),
            session.scheduled_at.month(),
            session.scheduled_at.day()
        );
        days.entry(key).or_default().push(session);
    }
    days
}
