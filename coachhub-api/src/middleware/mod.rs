/// Middleware modules for the API server
///
/// - `security`: security response headers
/// - `rate_limit`: per-client token buckets for the auth endpoints
///
/// JWT authentication lives in [`crate::app`] next to the router.

pub mod rate_limit;
pub mod security;
