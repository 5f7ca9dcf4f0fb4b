/// API route handlers
///
/// One module per resource:
///
/// - `health`: liveness and database status
/// - `auth`: registration, login, token refresh, password reset
/// - `organizations`: own organization and platform administration
/// - `users`: user management and own profile
/// - `sessions`: scheduling, conflict check, calendar, ratings
/// - `goals`: goals, milestones, comments, collaborators
/// - `payments`: invoice generation, payment tracking, invoice delivery
/// - `activity`: audit log
/// - `dashboard`: aggregated figures
/// - `exports`: JSON/CSV data export

pub mod activity;
pub mod auth;
pub mod dashboard;
pub mod exports;
pub mod goals;
pub mod health;
pub mod organizations;
pub mod payments;
pub mod sessions;
pub mod users;

use crate::error::{ApiError, ApiResult};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Parses a query date given as RFC 3339 or `YYYY-MM-DD`.
///
/// A bare date means the start of that day, or its last instant when
/// `end_of_day` is set, so ranges stay inclusive. Unparseable input is
/// ignored.
pub fn parse_date_param(raw: Option<&str>, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).and_utc())
}

/// File download response
pub fn attachment(content_type: &'static str, filename: &str, body: String) -> ApiResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(body))
        .map_err(|e| ApiError::InternalError(format!("Failed to build download response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_param() {
        assert_eq!(
            parse_date_param(Some("2026-03-01"), false),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_date_param(Some("2026-03-01T12:30:00+02:00"), false),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap())
        );

        let end = parse_date_param(Some("2026-03-01"), true).unwrap();
        assert!(end > Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_date_param_ignores_garbage() {
        assert_eq!(parse_date_param(Some("yesterday"), false), None);
        assert_eq!(parse_date_param(Some(""), true), None);
        assert_eq!(parse_date_param(None, false), None);
    }

    #[test]
    fn test_attachment_headers() {
        let response = attachment("text/csv", "export.csv", "a,b\r\n".to_string()).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"export.csv\""
        );
    }
}
