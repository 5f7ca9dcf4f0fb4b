//! # CoachHub Shared Library
//!
//! Domain types, persistence and business rules used by the CoachHub API
//! server.
//!
//! ## Module Organization
//!
//! - `db`: Connection pool and embedded migrations
//! - `models`: Database models and their queries
//! - `auth`: Tokens, password hashing, request identity and role checks
//! - `quota`: Per-organization user quotas
//! - `billing`: Invoice arithmetic and transactional payment generation
//! - `reports`: Aggregations behind the dashboard and export endpoints

pub mod auth;
pub mod billing;
pub mod db;
pub mod models;
pub mod quota;
pub mod reports;

/// Current version of the CoachHub shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
