/// Goal model
///
/// A goal belongs to one entrepreneur and is guided by one coach. Its
/// milestones, collaborators, comments and change history are stored as
/// JSONB sub-documents on the goal row and are edited in memory through the
/// methods on [`Goal`], then written back with [`Goal::save`].
///
/// `save` only succeeds if the row has not changed since it was read, so two
/// concurrent edits cannot silently overwrite each other.
///
/// # Example
///
/// ```no_run
/// use chrono::Utc;
/// use coachhub_shared::models::goal::Goal;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, goal_id: Uuid, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let mut goal = Goal::find_by_id(&pool, goal_id).await?.ok_or("not found")?;
/// goal.set_progress(80, user_id, Utc::now())?;
///
/// match goal.save(&pool).await? {
///     Some(saved) => println!("{}% done", saved.progress),
///     None => println!("goal changed underneath us"),
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::user::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "goal_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::NotStarted => "not_started",
            GoalStatus::InProgress => "in_progress",
            GoalStatus::Completed => "completed",
            GoalStatus::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "goal_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GoalPriority {
    Low,
    Medium,
    High,
}

impl GoalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalPriority::Low => "low",
            GoalPriority::Medium => "medium",
            GoalPriority::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: Uuid,
    pub title: String,
    pub status: MilestoneStatus,
    #[serde(default)]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Milestone {
    pub fn new(title: String, target_date: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            status: MilestoneStatus::Pending,
            target_date,
            completed_at: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: Uuid,
    /// Free-form label such as `advisor` or `mentor`
    pub role: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalComment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One field change in the goal history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLogEntry {
    pub field: String,
    pub from: JsonValue,
    pub to: JsonValue,
    pub user_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Errors from editing a goal in memory
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GoalError {
    #[error("Progress must be between 0 and 100, got {0}")]
    InvalidProgress(i32),

    #[error("Milestone not found")]
    MilestoneNotFound,

    #[error("User is already a collaborator on this goal")]
    DuplicateCollaborator,

    #[error("Session is already linked to this goal")]
    SessionAlreadyLinked,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entrepreneur_id: Uuid,
    pub coach_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: GoalStatus,
    pub priority: GoalPriority,
    /// Percent, 0..=100
    pub progress: i32,
    pub target_date: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub milestones: Json<Vec<Milestone>>,
    pub linked_sessions: Vec<Uuid>,
    pub collaborators: Json<Vec<Collaborator>>,
    pub comments: Json<Vec<GoalComment>>,
    pub update_log: Json<Vec<UpdateLogEntry>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a goal
#[derive(Debug, Clone)]
pub struct NewGoal {
    pub organization_id: Uuid,
    pub entrepreneur_id: Uuid,
    pub coach_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: GoalStatus,
    pub priority: GoalPriority,
    pub target_date: Option<DateTime<Utc>>,
    pub milestones: Vec<Milestone>,
}

/// Partial update of scalar fields
#[derive(Debug, Clone, Default)]
pub struct GoalChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<GoalStatus>,
    pub priority: Option<GoalPriority>,
    pub progress: Option<i32>,
    pub target_date: Option<DateTime<Utc>>,
    pub is_archived: Option<bool>,
}

impl GoalChanges {
    /// Entrepreneurs may only report progress and status
    pub fn only_progress_and_status(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.target_date.is_none()
            && self.is_archived.is_none()
    }
}

/// List filter
#[derive(Debug, Clone, Default)]
pub struct GoalFilter {
    pub organization_id: Option<Uuid>,
    pub entrepreneur_id: Option<Uuid>,
    /// Goals coached by this user or shared with them as a collaborator
    pub visible_to_coach: Option<Uuid>,
    pub status: Option<GoalStatus>,
    pub priority: Option<GoalPriority>,
    pub include_archived: bool,
}

/// `round(completed / total * 100)`; zero milestones means zero progress.
pub fn milestone_progress(milestones: &[Milestone]) -> i32 {
    if milestones.is_empty() {
        return 0;
    }
    let completed = milestones
        .iter()
        .filter(|m| m.status == MilestoneStatus::Completed)
        .count();

    ((completed as f64 / milestones.len() as f64) * 100.0).round() as i32
}

impl Goal {
    pub fn is_collaborator(&self, user_id: Uuid) -> bool {
        self.collaborators.iter().any(|c| c.user_id == user_id)
    }

    /// Read access within the goal's organization
    pub fn is_visible_to(&self, user_id: Uuid, role: UserRole) -> bool {
        match role {
            UserRole::Admin | UserRole::Manager => true,
            UserRole::Coach => self.coach_id == user_id || self.is_collaborator(user_id),
            UserRole::Entrepreneur => self.entrepreneur_id == user_id,
        }
    }

    fn log_change(&mut self, field: &str, from: JsonValue, to: JsonValue, user_id: Uuid, at: DateTime<Utc>) {
        if from != to {
            self.update_log.push(UpdateLogEntry {
                field: field.to_string(),
                from,
                to,
                user_id,
                at,
            });
        }
    }

    fn set_status(&mut self, status: GoalStatus, user_id: Uuid, at: DateTime<Utc>) {
        let from = json!(self.status);
        self.status = status;
        self.log_change("status", from, json!(status), user_id, at);
    }

    /// Sets progress and logs the change; reaching 100 completes the goal.
    pub fn set_progress(&mut self, progress: i32, user_id: Uuid, at: DateTime<Utc>) -> Result<(), GoalError> {
        if !(0..=100).contains(&progress) {
            return Err(GoalError::InvalidProgress(progress));
        }

        let from = json!(self.progress);
        self.progress = progress;
        self.log_change("progress", from, json!(progress), user_id, at);

        if progress == 100 && self.status != GoalStatus::Completed {
            self.set_status(GoalStatus::Completed, user_id, at);
        }

        Ok(())
    }

    /// Applies scalar changes, logging status, priority and progress moves.
    pub fn apply_changes(&mut self, changes: GoalChanges, user_id: Uuid, at: DateTime<Utc>) -> Result<(), GoalError> {
        if let Some(title) = changes.title {
            self.title = title;
        }
        if let Some(description) = changes.description {
            self.description = Some(description);
        }
        if let Some(target_date) = changes.target_date {
            self.target_date = Some(target_date);
        }
        if let Some(is_archived) = changes.is_archived {
            self.is_archived = is_archived;
        }
        if let Some(priority) = changes.priority {
            let from = json!(self.priority);
            self.priority = priority;
            self.log_change("priority", from, json!(priority), user_id, at);
        }
        if let Some(status) = changes.status {
            self.set_status(status, user_id, at);
        }
        if let Some(progress) = changes.progress {
            self.set_progress(progress, user_id, at)?;
        }

        Ok(())
    }

    /// Moves a milestone to `status` and recomputes the goal's progress.
    ///
    /// `completed_at` is stamped on completion and cleared otherwise.
    pub fn update_milestone(
        &mut self,
        milestone_id: Uuid,
        status: MilestoneStatus,
        notes: Option<String>,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<&Milestone, GoalError> {
        let index = self
            .milestones
            .iter()
            .position(|m| m.id == milestone_id)
            .ok_or(GoalError::MilestoneNotFound)?;

        {
            let milestone = &mut self.milestones[index];
            milestone.status = status;
            milestone.completed_at = match status {
                MilestoneStatus::Completed => milestone.completed_at.or(Some(at)),
                _ => None,
            };
            if notes.is_some() {
                milestone.notes = notes;
            }
        }

        let progress = milestone_progress(&self.milestones);
        self.set_progress(progress, user_id, at)?;

        Ok(&self.milestones[index])
    }

    pub fn add_comment(&mut self, user_id: Uuid, text: String, at: DateTime<Utc>) -> &GoalComment {
        self.comments.push(GoalComment {
            id: Uuid::new_v4(),
            user_id,
            text,
            created_at: at,
        });
        &self.comments[self.comments.len() - 1]
    }

    pub fn add_collaborator(
        &mut self,
        user_id: Uuid,
        role: String,
        at: DateTime<Utc>,
    ) -> Result<&Collaborator, GoalError> {
        if self.is_collaborator(user_id) {
            return Err(GoalError::DuplicateCollaborator);
        }

        self.collaborators.push(Collaborator {
            user_id,
            role,
            added_at: at,
        });
        Ok(&self.collaborators[self.collaborators.len() - 1])
    }

    pub fn link_session(&mut self, session_id: Uuid) -> Result<(), GoalError> {
        if self.linked_sessions.contains(&session_id) {
            return Err(GoalError::SessionAlreadyLinked);
        }
        self.linked_sessions.push(session_id);
        Ok(())
    }
}

impl Goal {
    pub async fn create(pool: &PgPool, data: NewGoal) -> Result<Self, sqlx::Error> {
        let progress = match data.status {
            GoalStatus::Completed => 100,
            _ => milestone_progress(&data.milestones),
        };

        sqlx::query_as::<_, Goal>(
            r#"
            INSERT INTO goals (
                organization_id, entrepreneur_id, coach_id, title, description,
                status, priority, progress, target_date, milestones
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(data.organization_id)
        .bind(data.entrepreneur_id)
        .bind(data.coach_id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.status)
        .bind(data.priority)
        .bind(progress)
        .bind(data.target_date)
        .bind(Json(data.milestones))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = $1")
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
        sqlx::query_as::<_, Goal>(
            "SELECT * FROM goals WHERE id = $1 AND ($2::uuid IS NULL OR organization_id = $2)",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await
    }

    /// Writes every editable column back.
    ///
    /// Returns `None` if the row changed (or vanished) since it was loaded.
    pub async fn save(&self, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Goal>(
            r#"
            UPDATE goals SET
                title = $3,
                description = $4,
                status = $5,
                priority = $6,
                progress = $7,
                target_date = $8,
                is_archived = $9,
                milestones = $10,
                linked_sessions = $11,
                collaborators = $12,
                comments = $13,
                update_log = $14
            WHERE id = $1 AND updated_at = $2
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.updated_at)
        .bind(&self.title)
        .bind(&self.description)
        .bind(self.status)
        .bind(self.priority)
        .bind(self.progress)
        .bind(self.target_date)
        .bind(self.is_archived)
        .bind(&self.milestones)
        .bind(&self.linked_sessions)
        .bind(&self.collaborators)
        .bind(&self.comments)
        .bind(&self.update_log)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM goals WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest first
    pub async fn list(pool: &PgPool, filter: &GoalFilter) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Goal>(
            r#"
            SELECT * FROM goals
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::uuid IS NULL OR entrepreneur_id = $2)
              AND ($3::uuid IS NULL
                   OR coach_id = $3
                   OR collaborators @> jsonb_build_array(jsonb_build_object('userId', $3::text)))
              AND ($4::goal_status IS NULL OR status = $4)
              AND ($5::goal_priority IS NULL OR priority = $5)
              AND ($6 OR NOT is_archived)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(filter.organization_id)
        .bind(filter.entrepreneur_id)
        .bind(filter.visible_to_coach)
        .bind(filter.status)
        .bind(filter.priority)
        .bind(filter.include_archived)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_goal() -> Goal {
        let now = Utc::now();
        Goal {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            entrepreneur_id: Uuid::new_v4(),
            coach_id: Uuid::new_v4(),
            title: "Close seed round".to_string(),
            description: None,
            status: GoalStatus::InProgress,
            priority: GoalPriority::High,
            progress: 0,
            target_date: None,
            is_archived: false,
            milestones: Json(vec![
                Milestone::new("Deck".to_string(), None),
                Milestone::new("Data room".to_string(), None),
                Milestone::new("Term sheet".to_string(), None),
            ]),
            linked_sessions: Vec::new(),
            collaborators: Json(Vec::new()),
            comments: Json(Vec::new()),
            update_log: Json(Vec::new()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_milestone_progress_rounds() {
        let mut goal = sample_goal();
        assert_eq!(milestone_progress(&goal.milestones), 0);

        goal.milestones[0].status = MilestoneStatus::Completed;
        assert_eq!(milestone_progress(&goal.milestones), 33);

        goal.milestones[1].status = MilestoneStatus::Completed;
        assert_eq!(milestone_progress(&goal.milestones), 67);

        assert_eq!(milestone_progress(&[]), 0);
    }

    #[test]
    fn test_update_milestone_recomputes_progress() {
        let mut goal = sample_goal();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let id = goal.milestones[1].id;

        let milestone = goal
            .update_milestone(id, MilestoneStatus::Completed, Some("sent".to_string()), user, now)
            .unwrap();
        assert_eq!(milestone.completed_at, Some(now));
        assert_eq!(milestone.notes.as_deref(), Some("sent"));
        assert_eq!(goal.progress, 33);

        goal.update_milestone(id, MilestoneStatus::InProgress, None, user, now)
            .unwrap();
        assert_eq!(goal.milestones[1].completed_at, None);
        assert_eq!(goal.progress, 0);
    }

    #[test]
    fn test_completing_all_milestones_completes_goal() {
        let mut goal = sample_goal();
        let user = Uuid::new_v4();
        let ids: Vec<Uuid> = goal.milestones.iter().map(|m| m.id).collect();

        for id in ids {
            goal.update_milestone(id, MilestoneStatus::Completed, None, user, Utc::now())
                .unwrap();
        }

        assert_eq!(goal.progress, 100);
        assert_eq!(goal.status, GoalStatus::Completed);
    }

    #[test]
    fn test_unknown_milestone() {
        let mut goal = sample_goal();
        let result = goal.update_milestone(
            Uuid::new_v4(),
            MilestoneStatus::Completed,
            None,
            Uuid::new_v4(),
            Utc::now(),
        );
        assert_eq!(result.unwrap_err(), GoalError::MilestoneNotFound);
    }

    #[test]
    fn test_set_progress_logs_and_completes() {
        let mut goal = sample_goal();
        let user = Uuid::new_v4();

        goal.set_progress(40, user, Utc::now()).unwrap();
        assert_eq!(goal.update_log.len(), 1);
        assert_eq!(goal.update_log[0].field, "progress");
        assert_eq!(goal.update_log[0].from, json!(0));
        assert_eq!(goal.update_log[0].to, json!(40));

        goal.set_progress(100, user, Utc::now()).unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
        assert_eq!(goal.update_log.last().unwrap().field, "status");

        assert_eq!(
            goal.set_progress(101, user, Utc::now()),
            Err(GoalError::InvalidProgress(101))
        );
    }

    #[test]
    fn test_unchanged_values_are_not_logged() {
        let mut goal = sample_goal();
        goal.set_progress(0, Uuid::new_v4(), Utc::now()).unwrap();
        assert!(goal.update_log.is_empty());
    }

    #[test]
    fn test_collaborators_and_links_reject_duplicates() {
        let mut goal = sample_goal();
        let advisor = Uuid::new_v4();
        let session = Uuid::new_v4();

        goal.add_collaborator(advisor, "advisor".to_string(), Utc::now())
            .unwrap();
        assert_eq!(
            goal.add_collaborator(advisor, "mentor".to_string(), Utc::now())
                .unwrap_err(),
            GoalError::DuplicateCollaborator
        );

        goal.link_session(session).unwrap();
        assert_eq!(goal.link_session(session), Err(GoalError::SessionAlreadyLinked));
    }

    #[test]
    fn test_visibility() {
        let mut goal = sample_goal();
        let stranger = Uuid::new_v4();

        assert!(goal.is_visible_to(stranger, UserRole::Manager));
        assert!(goal.is_visible_to(goal.coach_id, UserRole::Coach));
        assert!(goal.is_visible_to(goal.entrepreneur_id, UserRole::Entrepreneur));
        assert!(!goal.is_visible_to(stranger, UserRole::Coach));
        assert!(!goal.is_visible_to(stranger, UserRole::Entrepreneur));

        goal.add_collaborator(stranger, "advisor".to_string(), Utc::now())
            .unwrap();
        assert!(goal.is_visible_to(stranger, UserRole::Coach));
    }

    #[test]
    fn test_entrepreneur_change_restriction() {
        let progress_only = GoalChanges {
            progress: Some(50),
            status: Some(GoalStatus::InProgress),
            ..Default::default()
        };
        assert!(progress_only.only_progress_and_status());

        let retitle = GoalChanges {
            title: Some("Other".to_string()),
            ..Default::default()
        };
        assert!(!retitle.only_progress_and_status());
    }

    #[test]
    fn test_comment_appended() {
        let mut goal = sample_goal();
        let user = Uuid::new_v4();
        let comment = goal.add_comment(user, "Great week".to_string(), Utc::now());
        assert_eq!(comment.user_id, user);
        assert_eq!(goal.comments.len(), 1);
    }
}
