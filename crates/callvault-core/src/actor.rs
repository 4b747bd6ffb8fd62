//! The typed per-request actor and role model.
//!
//! Every operation receives an [`Actor`] resolved once at the request
//! boundary, rather than re-deriving identity and role ad hoc inside each
//! handler. Membership/role resolution itself belongs to the external
//! organization store; this module only defines the resolved shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary member: may read and verify evidence.
    Member,
    /// Administrator: may manage legal holds.
    Admin,
    /// Organization owner: may manage legal holds.
    Owner,
}

impl Role {
    /// Whether the role may perform hold mutations.
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }
}

/// An authenticated caller, resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The authenticated user.
    pub user_id: Uuid,
    /// The organization the request is scoped to.
    pub organization_id: Uuid,
    /// The user's role within that organization.
    pub role: Role,
}

impl Actor {
    /// Whether the actor belongs to the given organization.
    #[must_use]
    pub fn is_member_of(&self, organization_id: Uuid) -> bool {
        self.organization_id == organization_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_roles() {
        assert!(!Role::Member.is_elevated());
        assert!(Role::Admin.is_elevated());
        assert!(Role::Owner.is_elevated());
    }

    #[test]
    fn test_membership_scope() {
        let org = Uuid::new_v4();
        let actor = Actor {
            user_id: Uuid::new_v4(),
            organization_id: org,
            role: Role::Member,
        };
        assert!(actor.is_member_of(org));
        assert!(!actor.is_member_of(Uuid::new_v4()));
    }
}
