//! Role gating for routes. Each route names a fixed permitted set at
//! registration time; the check itself is a pure predicate with no side
//! effects, so different tiers can gate different routes under the same
//! path prefix.

use super::principal::{Principal, Role};
use crate::error::AppError;

/// A named, fixed set of roles permitted to reach a route.
#[derive(Debug, Clone, Copy)]
pub struct RoleSet {
    pub name: &'static str,
    pub roles: &'static [Role],
}

/// Every operational role. Gates read surfaces and the realtime handshake,
/// and doubles as the recognized set for authentication itself.
pub const STAFF: RoleSet = RoleSet {
    name: "staff",
    roles: &[Role::SuperAdmin, Role::Admin, Role::Waiter, Role::KitchenStaff],
};

/// Mutating staff administration.
pub const MANAGEMENT: RoleSet = RoleSet {
    name: "management",
    roles: &[Role::SuperAdmin, Role::Admin],
};

impl RoleSet {
    pub fn contains(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    fn describe(&self) -> String {
        self.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
    }
}

/// Require an authenticated identity whose role is inside the permitted set.
/// No identity at all is an authentication failure (401); an identity outside
/// the set is an authorization failure (403) naming the permitted roles.
pub fn require_role(identity: Option<&Principal>, allowed: &RoleSet) -> Result<(), AppError> {
    let Some(principal) = identity else {
        return Err(AppError::auth("unauthorized", "authentication required"));
    };
    if allowed.contains(principal.role) {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "insufficient_role".to_string(),
            format!("requires one of: {}", allowed.describe()),
        ))
    }
}
