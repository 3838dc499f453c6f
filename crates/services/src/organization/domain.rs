use crate::account::{Account, Role};
use crate::organization::ports::OrganizationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Discriminates the two directions of membership acquisition: an
/// admin-initiated invite or a user-initiated join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproveKind {
    Invite,
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproveStatus {
    Pending,
    Approved,
    Rejected,
}

/// A pending membership transaction, embedded in `Organization::approves`.
/// Invites carry an expiry (unix seconds); requests do not expire
/// (`expire_at == 0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approve {
    pub username: Account,
    pub org_name: Account,
    pub role: Role,
    pub kind: ApproveKind,
    pub expire_at: i64,
    pub inviter: Account,
    /// Account that moved the entry to a terminal status.
    #[serde(default)]
    pub by: String,
    pub status: ApproveStatus,
    #[serde(default)]
    pub msg: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Approve {
    /// Convert an accepted/approved entry into a confirmed membership.
    /// The role is carried over verbatim.
    pub fn into_member(self) -> OrgMember {
        let now = Utc::now();
        OrgMember {
            id: Uuid::new_v4(),
            org_name: self.org_name,
            username: self.username,
            role: self.role,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.kind == ApproveKind::Invite && self.expire_at < now
    }
}

/// A confirmed (org, user, role) membership record. Unique per
/// (org_name, username); carries its own optimistic version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    pub id: Uuid,
    pub org_name: Account,
    pub username: Account,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

/// The organization aggregate. `approves` is the embedded list of pending
/// invites and join requests; the whole aggregate is persisted under a single
/// optimistic version, so any two concurrent mutations of the same org
/// resolve to one winner and one `ConcurrentUpdating` loser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    /// Unique account-shaped identifier, immutable after creation.
    pub name: Account,
    pub full_name: String,
    pub description: String,
    pub website: String,
    pub avatar_id: String,
    /// Account that created the organization; always implicitly an admin.
    pub owner: Account,
    /// Role handed to approved join requests.
    pub default_role: Role,
    /// Gate for the request-to-join workflow.
    pub allow_request: bool,
    pub approves: Vec<Approve>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl Organization {
    fn has_pending(&self, username: &Account, kind: ApproveKind) -> bool {
        self.approves
            .iter()
            .any(|a| a.kind == kind && a.status == ApproveStatus::Pending && &a.username == username)
    }

    /// Append a pending invite. Rejects a second pending invite for the same
    /// username before anything is persisted.
    pub fn add_invite(
        &mut self,
        username: Account,
        role: Role,
        expiry_secs: i64,
        inviter: Account,
        msg: String,
    ) -> Result<&Approve, OrganizationError> {
        if self.has_pending(&username, ApproveKind::Invite) {
            return Err(OrganizationError::AlreadyMember);
        }

        let now = now_unix();
        self.approves.push(Approve {
            username,
            org_name: self.name.clone(),
            role,
            kind: ApproveKind::Invite,
            expire_at: now + expiry_secs,
            inviter,
            by: String::new(),
            status: ApproveStatus::Pending,
            msg,
            created_at: now,
            updated_at: now,
        });

        Ok(self.approves.last().expect("entry was just pushed"))
    }

    /// Append a pending join request. Requests never expire; the role is the
    /// organization's default role, decided by the caller.
    pub fn add_request(
        &mut self,
        username: Account,
        role: Role,
        msg: String,
    ) -> Result<&Approve, OrganizationError> {
        if self.has_pending(&username, ApproveKind::Request) {
            return Err(OrganizationError::AlreadyMember);
        }

        let now = now_unix();
        self.approves.push(Approve {
            username: username.clone(),
            org_name: self.name.clone(),
            role,
            kind: ApproveKind::Request,
            expire_at: 0,
            inviter: username,
            by: String::new(),
            status: ApproveStatus::Pending,
            msg,
            created_at: now,
            updated_at: now,
        });

        Ok(self.approves.last().expect("entry was just pushed"))
    }

    /// Remove and return the pending invite for `username`. Deliberately does
    /// NOT check expiry: the acceptance path re-validates after removal so an
    /// expired invite is consumed exactly once and cannot be accepted late.
    pub fn remove_invite(&mut self, username: &Account) -> Result<Approve, OrganizationError> {
        self.remove_pending(username, ApproveKind::Invite)
    }

    /// Remove and return the pending join request for `username`.
    pub fn remove_request(&mut self, username: &Account) -> Result<Approve, OrganizationError> {
        self.remove_pending(username, ApproveKind::Request)
    }

    fn remove_pending(
        &mut self,
        username: &Account,
        kind: ApproveKind,
    ) -> Result<Approve, OrganizationError> {
        let pos = self
            .approves
            .iter()
            .position(|a| {
                a.kind == kind && a.status == ApproveStatus::Pending && &a.username == username
            })
            .ok_or(OrganizationError::NotFound)?;

        Ok(self.approves.remove(pos))
    }

    /// Pending entries of one kind, optionally filtered by a predicate on the
    /// entry.
    pub fn pending(&self, kind: ApproveKind) -> impl Iterator<Item = &Approve> {
        self.approves
            .iter()
            .filter(move |a| a.kind == kind && a.status == ApproveStatus::Pending)
    }
}

/// Command to create a new organization.
#[derive(Debug, Clone)]
pub struct CreateOrgCmd {
    pub name: Account,
    pub full_name: String,
    pub description: String,
    pub website: String,
    pub avatar_id: String,
    pub owner: Account,
}

impl CreateOrgCmd {
    pub fn validate(&self) -> Result<(), OrganizationError> {
        if self.full_name.trim().is_empty() {
            return Err(OrganizationError::InvalidParam(
                "org fullname is empty".to_string(),
            ));
        }
        if !self.website.is_empty() && !is_url(&self.website) {
            return Err(OrganizationError::InvalidParam("invalid website".to_string()));
        }
        Ok(())
    }

    pub fn into_org(self, default_role: Role) -> Organization {
        let now = Utc::now();
        Organization {
            id: Uuid::new_v4(),
            name: self.name,
            full_name: self.full_name,
            description: self.description,
            website: self.website,
            avatar_id: self.avatar_id,
            owner: self.owner,
            default_role,
            allow_request: false,
            approves: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteOrgCmd {
    pub actor: Account,
    pub name: Account,
}

/// Command to update an organization's basic information. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateOrgCmd {
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub avatar_id: Option<String>,
    pub allow_request: Option<bool>,
    pub default_role: Option<Role>,
}

impl UpdateOrgCmd {
    /// Apply the command to the aggregate, reporting whether anything
    /// actually changed.
    pub fn apply(&self, org: &mut Organization) -> Result<bool, OrganizationError> {
        let mut change = false;

        if let Some(website) = &self.website {
            if !is_url(website) {
                return Err(OrganizationError::InvalidParam("invalid website".to_string()));
            }
            if website != &org.website {
                org.website = website.clone();
                change = true;
            }
        }

        if let Some(full_name) = &self.full_name {
            if !full_name.is_empty() && full_name != &org.full_name {
                org.full_name = full_name.clone();
                change = true;
            }
        }

        if let Some(description) = &self.description {
            if description != &org.description {
                org.description = description.clone();
                change = true;
            }
        }

        if let Some(avatar_id) = &self.avatar_id {
            if avatar_id != &org.avatar_id {
                org.avatar_id = avatar_id.clone();
                change = true;
            }
        }

        if let Some(allow_request) = self.allow_request {
            if allow_request != org.allow_request {
                org.allow_request = allow_request;
                change = true;
            }
        }

        if let Some(default_role) = self.default_role {
            if default_role != org.default_role {
                org.default_role = default_role;
                change = true;
            }
        }

        if change {
            org.updated_at = Utc::now();
        }

        Ok(change)
    }
}

fn is_url(s: &str) -> bool {
    (s.starts_with("http://") || s.starts_with("https://")) && s.len() > 8
}

#[derive(Debug, Clone)]
pub struct InviteMemberCmd {
    pub actor: Account,
    pub account: Account,
    pub org: Account,
    pub role: Role,
    pub msg: String,
}

#[derive(Debug, Clone)]
pub struct AcceptInviteCmd {
    pub actor: Account,
    pub org: Account,
    pub msg: String,
}

#[derive(Debug, Clone)]
pub struct RevokeInviteCmd {
    pub actor: Account,
    pub account: Account,
    pub org: Account,
    pub msg: String,
}

#[derive(Debug, Clone)]
pub struct RequestMemberCmd {
    pub actor: Account,
    pub org: Account,
    pub msg: String,
}

#[derive(Debug, Clone)]
pub struct CancelRequestCmd {
    pub actor: Account,
    pub requester: Account,
    pub org: Account,
    pub msg: String,
}

pub type ApproveRequestCmd = CancelRequestCmd;

#[derive(Debug, Clone)]
pub struct RemoveMemberCmd {
    pub actor: Account,
    pub account: Account,
    pub org: Account,
}

#[derive(Debug, Clone)]
pub struct EditMemberCmd {
    pub actor: Account,
    pub account: Account,
    pub org: Account,
    pub role: Role,
}

/// Query for pending invitations. Exactly one of `org` / `invitee` /
/// `inviter` must be set.
#[derive(Debug, Clone, Default)]
pub struct ListInvitationsCmd {
    pub org: Option<Account>,
    pub invitee: Option<Account>,
    pub inviter: Option<Account>,
}

impl ListInvitationsCmd {
    pub fn validate(&self) -> Result<(), OrganizationError> {
        let count = [
            self.org.is_some(),
            self.invitee.is_some(),
            self.inviter.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        match count {
            0 => Err(OrganizationError::InvalidParam(
                "one of org/invitee/inviter must be set".to_string(),
            )),
            1 => Ok(()),
            _ => Err(OrganizationError::InvalidParam(
                "only one of org/invitee/inviter can be used".to_string(),
            )),
        }
    }
}

/// Query for pending join requests, by organization or by requester.
#[derive(Debug, Clone, Default)]
pub struct ListRequestsCmd {
    pub org: Option<Account>,
    pub requester: Option<Account>,
}

impl ListRequestsCmd {
    pub fn validate(&self) -> Result<(), OrganizationError> {
        if self.org.is_none() && self.requester.is_none() {
            return Err(OrganizationError::InvalidParam(
                "one of org/requester must be set".to_string(),
            ));
        }
        Ok(())
    }
}
