//! Role and ownership checks for connection actions.
//!
//! Every predicate is a pure function of the caller's role, the connection
//! owner and the caller id.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Developer,
    User,
    #[serde(other)]
    Guest,
}

impl Role {
    /// Pick the most privileged role out of a token's role list.
    pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Self {
        roles
            .iter()
            .map(|r| Self::parse(r.as_ref()))
            .min_by_key(Self::rank)
            .unwrap_or(Self::Guest)
    }

    pub fn parse(role: &str) -> Self {
        match role.to_lowercase().as_str() {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            "developer" => Self::Developer,
            "user" => Self::User,
            _ => Self::Guest,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Admin => 0,
            Self::Manager => 1,
            Self::Developer => 2,
            Self::User => 3,
            Self::Guest => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Create,
    Edit,
    Delete,
    ViewCredentials,
    Test,
}

pub fn can_create(role: &Role) -> bool {
    matches!(role, Role::Admin | Role::Manager | Role::Developer)
}

pub fn can_edit(role: &Role, owner_id: &str, caller_id: &str) -> bool {
    is_admin_or_owner(role, owner_id, caller_id)
}

pub fn can_delete(role: &Role, owner_id: &str, caller_id: &str) -> bool {
    is_admin_or_owner(role, owner_id, caller_id)
}

pub fn can_view_credentials(role: &Role, owner_id: &str, caller_id: &str) -> bool {
    is_admin_or_owner(role, owner_id, caller_id)
}

/// Any authenticated role may run a test.
pub fn can_test(role: &Role) -> bool {
    !matches!(role, Role::Guest)
}

pub fn check(action: ConnectionAction, role: &Role, owner_id: &str, caller_id: &str) -> bool {
    match action {
        ConnectionAction::Create => can_create(role),
        ConnectionAction::Edit => can_edit(role, owner_id, caller_id),
        ConnectionAction::Delete => can_delete(role, owner_id, caller_id),
        ConnectionAction::ViewCredentials => can_view_credentials(role, owner_id, caller_id),
        ConnectionAction::Test => can_test(role),
    }
}

fn is_admin_or_owner(role: &Role, owner_id: &str, caller_id: &str) -> bool {
    *role == Role::Admin || (!caller_id.is_empty() && owner_id == caller_id)
}
