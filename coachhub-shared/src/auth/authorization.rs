/// Role-based access checks
///
/// CoachHub has four roles. Admins and managers run an organization; coaches
/// and entrepreneurs only see records they take part in. Every record belongs
/// to exactly one organization and is invisible outside it, except to super
/// admins (admins without an organization).
///
/// # Example
///
/// ```
/// use coachhub_shared::auth::authorization::{require_role, OrganizationScope, STAFF};
/// use coachhub_shared::auth::middleware::AuthContext;
/// use coachhub_shared::models::user::UserRole;
/// use uuid::Uuid;
///
/// let auth = AuthContext {
///     user_id: Uuid::new_v4(),
///     organization_id: Some(Uuid::new_v4()),
///     role: UserRole::Manager,
///     email: "manager@example.com".to_string(),
/// };
///
/// assert!(require_role(&auth, STAFF).is_ok());
/// assert!(OrganizationScope::of(&auth).contains(auth.organization_id));
/// ```

use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::user::UserRole;

/// Admins and managers
pub const STAFF: &[UserRole] = &[UserRole::Admin, UserRole::Manager];

/// Roles allowed to schedule sessions and manage goals
pub const SCHEDULERS: &[UserRole] = &[UserRole::Admin, UserRole::Manager, UserRole::Coach];

/// Error type for authorization checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error("Insufficient permissions: requires one of {required:?}, has {actual:?}")]
    InsufficientRole {
        required: Vec<UserRole>,
        actual: UserRole,
    },

    /// Caller is not attached to any organization
    #[error("User is not associated with an organization")]
    NoOrganization,

    /// Caller may see the resource but not act on it
    #[error("Not authorized to access this resource")]
    NotAuthorized,
}

/// Fails unless the caller holds one of `roles`.
pub fn require_role(auth: &AuthContext, roles: &[UserRole]) -> Result<(), AuthzError> {
    if auth.has_any_role(roles) {
        Ok(())
    } else {
        Err(AuthzError::InsufficientRole {
            required: roles.to_vec(),
            actual: auth.role,
        })
    }
}

/// Returns the caller's organization, failing for users without one.
pub fn require_organization(auth: &AuthContext) -> Result<Uuid, AuthzError> {
    auth.organization_id.ok_or(AuthzError::NoOrganization)
}

/// Which organizations a caller can read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationScope {
    /// Super admin
    All,
    Single(Uuid),
    /// Non-admin without an organization; sees nothing
    Nothing,
}

impl OrganizationScope {
    pub fn of(auth: &AuthContext) -> Self {
        match auth.organization_id {
            Some(id) => OrganizationScope::Single(id),
            None if auth.is_super_admin() => OrganizationScope::All,
            None => OrganizationScope::Nothing,
        }
    }

    /// Whether a record owned by `organization_id` is visible
    pub fn contains(&self, organization_id: Option<Uuid>) -> bool {
        match self {
            OrganizationScope::All => true,
            OrganizationScope::Single(id) => organization_id == Some(*id),
            OrganizationScope::Nothing => false,
        }
    }

    /// Filter value for queries: `None` means no organization filter.
    ///
    /// # Errors
    ///
    /// `AuthzError::NoOrganization` for [`OrganizationScope::Nothing`].
    pub fn filter(&self) -> Result<Option<Uuid>, AuthzError> {
        match self {
            OrganizationScope::All => Ok(None),
            OrganizationScope::Single(id) => Ok(Some(*id)),
            OrganizationScope::Nothing => Err(AuthzError::NoOrganization),
        }
    }
}

/// Whether the caller may create a user with `target` role.
///
/// Managers may add coaches, entrepreneurs and other managers but never
/// admins.
pub fn can_assign_role(auth: &AuthContext, target: UserRole) -> bool {
    match auth.role {
        UserRole::Admin => true,
        UserRole::Manager => target != UserRole::Admin,
        UserRole::Coach | UserRole::Entrepreneur => false,
    }
}

/// Checks that a coach or entrepreneur only touches their own records.
///
/// Staff pass unconditionally; `participants` lists the users attached to
/// the record.
pub fn require_participant(auth: &AuthContext, participants: &[Uuid]) -> Result<(), AuthzError> {
    if auth.has_any_role(STAFF) || participants.contains(&auth.user_id) {
        Ok(())
    } else {
        Err(AuthzError::NotAuthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: UserRole, organization_id: Option<Uuid>) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            organization_id,
            role,
            email: "someone@example.com".to_string(),
        }
    }

    #[test]
    fn test_require_role() {
        let coach = ctx(UserRole::Coach, Some(Uuid::new_v4()));

        assert!(require_role(&coach, SCHEDULERS).is_ok());
        assert_eq!(
            require_role(&coach, STAFF),
            Err(AuthzError::InsufficientRole {
                required: vec![UserRole::Admin, UserRole::Manager],
                actual: UserRole::Coach,
            })
        );
    }

    #[test]
    fn test_require_organization() {
        let org = Uuid::new_v4();
        assert_eq!(require_organization(&ctx(UserRole::Manager, Some(org))), Ok(org));
        assert_eq!(
            require_organization(&ctx(UserRole::Admin, None)),
            Err(AuthzError::NoOrganization)
        );
    }

    #[test]
    fn test_organization_scope() {
        let org = Uuid::new_v4();
        let other = Uuid::new_v4();

        let scoped = OrganizationScope::of(&ctx(UserRole::Admin, Some(org)));
        assert!(scoped.contains(Some(org)));
        assert!(!scoped.contains(Some(other)));
        assert!(!scoped.contains(None));
        assert_eq!(scoped.filter(), Ok(Some(org)));

        let super_admin = OrganizationScope::of(&ctx(UserRole::Admin, None));
        assert_eq!(super_admin, OrganizationScope::All);
        assert!(super_admin.contains(Some(other)));
        assert_eq!(super_admin.filter(), Ok(None));

        let orphan = OrganizationScope::of(&ctx(UserRole::Coach, None));
        assert_eq!(orphan, OrganizationScope::Nothing);
        assert!(!orphan.contains(Some(org)));
        assert_eq!(orphan.filter(), Err(AuthzError::NoOrganization));
    }

    #[test]
    fn test_can_assign_role() {
        let admin = ctx(UserRole::Admin, Some(Uuid::new_v4()));
        let manager = ctx(UserRole::Manager, Some(Uuid::new_v4()));
        let coach = ctx(UserRole::Coach, Some(Uuid::new_v4()));

        assert!(can_assign_role(&admin, UserRole::Admin));
        assert!(can_assign_role(&manager, UserRole::Coach));
        assert!(!can_assign_role(&manager, UserRole::Admin));
        assert!(!can_assign_role(&coach, UserRole::Entrepreneur));
    }

    #[test]
    fn test_require_participant() {
        let coach = ctx(UserRole::Coach, Some(Uuid::new_v4()));
        let manager = ctx(UserRole::Manager, Some(Uuid::new_v4()));
        let stranger = Uuid::new_v4();

        assert!(require_participant(&coach, &[coach.user_id, stranger]).is_ok());
        assert_eq!(
            require_participant(&coach, &[stranger]),
            Err(AuthzError::NotAuthorized)
        );
        assert!(require_participant(&manager, &[stranger]).is_ok());
    }
}
