/// Data export
///
/// `GET /api/v1/exports/dashboard?format=json|csv` dumps the caller's
/// organization (every tenant for super admins) as a file download.

use crate::{
    app::AppState,
    error::ApiResult,
    routes::attachment,
    services::export::{
        goal_row, payment_row, session_row, user_row, CsvDocument, GOAL_HEADERS,
        PAYMENT_HEADERS, SESSION_HEADERS, USER_HEADERS,
    },
};
use axum::{
    extract::{Query, State},
    response::Response,
    Extension,
};
use chrono::{DateTime, Utc};
use coachhub_shared::{
    auth::{
        authorization::{require_role, OrganizationScope, STAFF},
        middleware::AuthContext,
    },
    models::{
        goal::{Goal, GoalFilter},
        payment::{Payment, PaymentFilter},
        session::{Session, SessionFilter},
        user::{User, UserFilter},
    },
    reports::{DashboardStats, ReportScope},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardExport {
    pub exported_at: DateTime<Utc>,
    pub summary: DashboardStats,
    pub users: Vec<User>,
    pub sessions: Vec<Session>,
    pub goals: Vec<Goal>,
    pub payments: Vec<Payment>,
}

impl DashboardExport {
    pub fn to_csv(&self) -> String {
        let mut doc = CsvDocument::new();
        doc.section("users", USER_HEADERS, self.users.iter().map(user_row))
            .section("sessions", SESSION_HEADERS, self.sessions.iter().map(session_row))
            .section("goals", GOAL_HEADERS, self.goals.iter().map(goal_row))
            .section("payments", PAYMENT_HEADERS, self.payments.iter().map(payment_row));
        doc.finish()
    }
}

fn export_filename(format: ExportFormat, at: DateTime<Utc>) -> String {
    let ext = match format {
        ExportFormat::Json => "json",
        ExportFormat::Csv => "csv",
    };
    format!("dashboard-export-{}.{}", at.format("%Y%m%d-%H%M%S"), ext)
}

pub async fn export_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    require_role(&auth, STAFF)?;
    let organization_id = OrganizationScope::of(&auth).filter()?;

    let export = DashboardExport {
        exported_at: Utc::now(),
        summary: DashboardStats::load(
            &state.db,
            ReportScope {
                organization_id,
                coach_id: None,
            },
        )
        .await?,
        users: User::list_all(
            &state.db,
            &UserFilter {
                organization_id,
                ..Default::default()
            },
        )
        .await?,
        sessions: Session::list_all(
            &state.db,
            &SessionFilter {
                organization_id,
                ..Default::default()
            },
        )
        .await?,
        goals: Goal::list(
            &state.db,
            &GoalFilter {
                organization_id,
                include_archived: true,
                ..Default::default()
            },
        )
        .await?,
        payments: Payment::list_all(
            &state.db,
            &PaymentFilter {
                organization_id,
                ..Default::default()
            },
        )
        .await?,
    };

    tracing::info!(
        user_id = %auth.user_id,
        format = ?query.format,
        users = export.users.len(),
        sessions = export.sessions.len(),
        goals = export.goals.len(),
        payments = export.payments.len(),
        "Dashboard exported"
    );

    let filename = export_filename(query.format, export.exported_at);
    match query.format {
        ExportFormat::Json => {
            let body = serde_json::to_string_pretty(&export)?;
            attachment("application/json", &filename, body)
        }
        ExportFormat::Csv => attachment("text/csv; charset=utf-8", &filename, export.to_csv()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn empty_export() -> DashboardExport {
        DashboardExport {
            exported_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
            summary: DashboardStats::default(),
            users: vec![],
            sessions: vec![],
            goals: vec![],
            payments: vec![],
        }
    }

    #[test]
    fn test_format_defaults_to_json() {
        let query: ExportQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.format, ExportFormat::Json);

        let query: ExportQuery = serde_json::from_str(r#"{"format":"csv"}"#).unwrap();
        assert_eq!(query.format, ExportFormat::Csv);
    }

    #[test]
    fn test_csv_has_section_per_entity() {
        let csv = empty_export().to_csv();

        for section in ["# users", "# sessions", "# goals", "# payments"] {
            assert!(csv.contains(section), "missing {}", section);
        }
        assert!(csv.contains("invoiceNumber"));
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(empty_export()).unwrap();

        assert!(value["exportedAt"].is_string());
        assert!(value["summary"]["users"].is_object());
        assert!(value["payments"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_export_filename() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            export_filename(ExportFormat::Csv, at),
            "dashboard-export-20260301-093000.csv"
        );
    }
}
