use crate::organization::domain::{Approve, RemoveMemberCmd};
use serde::Serialize;

/// Published when an invite is accepted or a join request is approved.
#[derive(Debug, Clone, Serialize)]
pub struct UserJoinEvent {
    pub org_name: String,
    pub user_name: String,
    pub created_at: i64,
}

impl UserJoinEvent {
    pub fn new(approve: &Approve) -> Self {
        Self {
            org_name: approve.org_name.to_string(),
            user_name: approve.username.to_string(),
            created_at: approve.created_at,
        }
    }
}

/// Published when a confirmed member is removed from an organization.
#[derive(Debug, Clone, Serialize)]
pub struct UserRemoveEvent {
    pub org_name: String,
    pub user_name: String,
}

impl UserRemoveEvent {
    pub fn new(cmd: &RemoveMemberCmd) -> Self {
        Self {
            org_name: cmd.org.to_string(),
            user_name: cmd.account.to_string(),
        }
    }
}

/// Published after an organization is deleted.
#[derive(Debug, Clone, Serialize)]
pub struct OrgDeleteEvent {
    pub org_name: String,
}
