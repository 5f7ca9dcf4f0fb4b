/// Authentication and authorization
///
/// # Modules
///
/// - [`password`]: Argon2id hashing and the password policy
/// - [`jwt`]: access/refresh JWTs with token versioning
/// - [`tokens`]: opaque reset/refresh token digests
/// - [`middleware`]: Bearer token to [`middleware::AuthContext`]
/// - [`authorization`]: role and organization checks
///
/// # Example
///
/// ```no_run
/// use coachhub_shared::auth::password::{hash_password, verify_password};
/// use coachhub_shared::auth::tokens::generate_token;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Coach!ng2024")?;
/// assert!(verify_password("Coach!ng2024", &hash)?);
///
/// let (reset_token, reset_hash) = generate_token();
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod tokens;
