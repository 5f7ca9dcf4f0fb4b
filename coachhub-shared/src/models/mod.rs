/// Database models for CoachHub
///
/// Each model owns its SQL. Handlers never build queries themselves.
///
/// # Models
///
/// - `organization`: tenants, plans and quotas
/// - `user`: accounts and roles
/// - `session`: scheduled coaching meetings and the overlap check
/// - `goal`: entrepreneur goals with milestones, comments and collaborators
/// - `payment`: invoices generated from completed sessions
/// - `activity`: append-only audit log
///
/// # Example
///
/// ```no_run
/// use coachhub_shared::models::user::User;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// if let Some(user) = User::find_by_email(&pool, "coach@example.com").await? {
///     println!("{} {}", user.first_name, user.last_name);
/// }
/// # Ok(())
/// # }
/// ```

pub mod activity;
pub mod goal;
pub mod organization;
pub mod payment;
pub mod session;
pub mod user;

/// Validated `ORDER BY` clause built from a client sort key such as
/// `-createdAt`.
///
/// Only keys listed in the model's whitelist are accepted, so the clause can
/// be interpolated into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: &'static str,
    pub descending: bool,
}

impl SortOrder {
    /// Parses `raw` against `allowed` (`(apiKey, column)` pairs); unknown
    /// keys fall back to `default`.
    pub fn parse(raw: Option<&str>, allowed: &[(&str, &'static str)], default: SortOrder) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return default;
        };

        let (descending, key) = match raw.strip_prefix('-') {
            Some(key) => (true, key),
            None => (false, raw),
        };

        allowed
            .iter()
            .find(|(name, _)| *name == key)
            .map(|&(_, column)| SortOrder { column, descending })
            .unwrap_or(default)
    }

    /// `column ASC|DESC` followed by `id` as a tiebreaker
    pub fn to_sql(&self) -> String {
        let direction = if self.descending { "DESC" } else { "ASC" };
        format!("{} {}, id {}", self.column, direction, direction)
    }
}

/// Offset for a 1-based page number. Saturates, so an absurd page just
/// reads past the end.
pub fn page_offset(page: i64, limit: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(limit.max(0))
}

/// Number of pages needed for `total` rows
pub fn page_count(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }
    let total = total.max(0);
    total / limit + i64::from(total % limit != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &[(&str, &str)] = &[("createdAt", "created_at"), ("email", "email")];
    const DEFAULT: SortOrder = SortOrder {
        column: "created_at",
        descending: true,
    };

    #[test]
    fn test_page_offset_saturates() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 25), 50);
        assert_eq!(page_offset(-4, 25), 0);
        assert_eq!(page_offset(i64::MAX, 100), i64::MAX);
        assert_eq!(page_count(i64::MAX, 100), i64::MAX / 100 + 1);
        assert_eq!(page_count(41, 20), 3);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(
            SortOrder::parse(Some("email"), ALLOWED, DEFAULT),
            SortOrder {
                column: "email",
                descending: false
            }
        );
        assert_eq!(
            SortOrder::parse(Some("-createdAt"), ALLOWED, DEFAULT),
            SortOrder {
                column: "created_at",
                descending: true
            }
        );
    }

    #[test]
    fn test_sort_order_rejects_unknown_keys() {
        assert_eq!(SortOrder::parse(Some("password_hash"), ALLOWED, DEFAULT), DEFAULT);
        assert_eq!(
            SortOrder::parse(Some("-email; DROP TABLE users"), ALLOWED, DEFAULT),
            DEFAULT
        );
        assert_eq!(SortOrder::parse(None, ALLOWED, DEFAULT), DEFAULT);
        assert_eq!(SortOrder::parse(Some("  "), ALLOWED, DEFAULT), DEFAULT);
    }

    #[test]
    fn test_sort_order_sql() {
        assert_eq!(DEFAULT.to_sql(), "created_at DESC, id DESC");
    }

    #[test]
    fn test_paging_helpers() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(0, 20), 0);
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(41, 20), 3);
        assert_eq!(page_count(40, 20), 2);
    }
}
