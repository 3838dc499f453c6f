pub mod domain;
pub mod events;
pub mod ports;

pub use domain::*;
pub use events::{OrgDeleteEvent, UserJoinEvent, UserRemoveEvent};
pub use ports::*;

use crate::account::{Account, Action, ObjType, Role};
use crate::permission::{PermissionEngine, PermissionError};
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Orchestrates organization lifecycle and the invite / request membership
/// workflows. All mutations go through the optimistic-CAS repositories; the
/// external platform is provisioned before any local durable write.
pub struct OrganizationService {
    orgs: Arc<dyn OrganizationRepository>,
    members: Arc<dyn MembershipRepository>,
    provisioner: Arc<dyn PlatformProvisioner>,
    directory: Arc<dyn AccountDirectory>,
    publisher: Arc<dyn EventPublisher>,
    perm: Arc<PermissionEngine>,
    default_role: Role,
    invite_expiry: i64,
    max_orgs_per_owner: i64,
}

fn no_permission(msg: impl Into<String>) -> OrganizationError {
    PermissionError::NoPermission(msg.into()).into()
}

impl OrganizationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orgs: Arc<dyn OrganizationRepository>,
        members: Arc<dyn MembershipRepository>,
        provisioner: Arc<dyn PlatformProvisioner>,
        directory: Arc<dyn AccountDirectory>,
        publisher: Arc<dyn EventPublisher>,
        perm: Arc<PermissionEngine>,
        policy: &config::OrganizationConfig,
    ) -> Result<Self, OrganizationError> {
        let default_role = Role::from_str(&policy.default_role)
            .map_err(|err| OrganizationError::InvalidParam(err.to_string()))?;

        Ok(Self {
            orgs,
            members,
            provisioner,
            directory,
            publisher,
            perm,
            default_role,
            invite_expiry: policy.invite_expiry_seconds,
            max_orgs_per_owner: policy.max_orgs_per_owner,
        })
    }

    /// Create an organization. The name must be free across both users and
    /// organizations, the owner must be under their quota, and the external
    /// platform must accept the org before anything is stored locally.
    pub async fn create(&self, cmd: CreateOrgCmd) -> Result<Organization, OrganizationError> {
        cmd.validate()?;

        if self
            .directory
            .name_taken(&cmd.name)
            .await
            .map_err(OrganizationError::from_repo)?
        {
            return Err(OrganizationError::NameTaken(cmd.name.to_string()));
        }

        let owned = self
            .orgs
            .count_by_owner(&cmd.owner)
            .await
            .map_err(OrganizationError::from_repo)?;
        if owned >= self.max_orgs_per_owner {
            return Err(OrganizationError::QuotaExceeded);
        }

        let org = cmd.into_org(self.default_role);

        self.provisioner
            .create_org(&org)
            .await
            .map_err(|err| OrganizationError::Internal(err.context("failed to create platform org")))?;

        let org = match self.orgs.add(&org).await {
            Ok(org) => org,
            Err(err) => {
                if let Err(undo) = self.provisioner.delete_org(&org.name).await {
                    error!(org = %org.name, error = %undo, "failed to undo platform org after local insert failed");
                }
                return Err(OrganizationError::from_repo(err));
            }
        };

        // The creator is always an admin member.
        let now = Utc::now();
        let owner_member = OrgMember {
            id: uuid::Uuid::new_v4(),
            org_name: org.name.clone(),
            username: org.owner.clone(),
            role: Role::Admin,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        if let Err(err) = self.members.add(&owner_member).await {
            if let Err(undo) = self.provisioner.delete_org(&org.name).await {
                error!(org = %org.name, error = %undo, "failed to undo platform org after member insert failed");
            }
            if let Err(undo) = self.orgs.delete(&org).await {
                error!(org = %org.name, error = %undo, "failed to undo local org after member insert failed");
            }
            return Err(OrganizationError::from_repo(err));
        }

        debug!(org = %org.name, owner = %org.owner, "organization created");
        Ok(org)
    }

    /// Delete an organization. Only allowed when the external platform
    /// reports no owned repositories remain; cascades all membership rows.
    pub async fn delete(&self, cmd: DeleteOrgCmd) -> Result<(), OrganizationError> {
        self.perm
            .check(&cmd.actor, &cmd.name, ObjType::Organization, Action::Delete)
            .await?;

        let Some(org) = self
            .orgs
            .get_by_name(&cmd.name)
            .await
            .map_err(OrganizationError::from_repo)?
        else {
            // Already gone; deletion is idempotent.
            return Ok(());
        };

        let can = self
            .provisioner
            .can_delete(&org.name)
            .await
            .map_err(|err| OrganizationError::Internal(err.context("failed to query platform")))?;
        if !can {
            return Err(OrganizationError::ResourcesRemain);
        }

        self.members
            .delete_by_org(&org.name)
            .await
            .map_err(OrganizationError::from_repo)?;

        self.provisioner
            .delete_org(&org.name)
            .await
            .map_err(|err| OrganizationError::Internal(err.context("failed to delete platform org")))?;

        self.orgs
            .delete(&org)
            .await
            .map_err(OrganizationError::from_repo)?;

        self.publish_org_delete(OrgDeleteEvent {
            org_name: org.name.to_string(),
        })
        .await;

        Ok(())
    }

    /// Update basic info. A command that changes nothing is an error, not a
    /// silent success, since callers may be debugging an apparently-failed
    /// edit.
    pub async fn update_basic_info(
        &self,
        actor: &Account,
        org_name: &Account,
        cmd: UpdateOrgCmd,
    ) -> Result<Organization, OrganizationError> {
        self.perm
            .check(actor, org_name, ObjType::Organization, Action::Write)
            .await?;

        let mut org = self.load(org_name).await?;

        if !cmd.apply(&mut org)? {
            return Err(OrganizationError::NothingChanged);
        }

        self.orgs
            .save(&org)
            .await
            .map_err(OrganizationError::from_repo)
    }

    pub async fn get_by_name(&self, name: &Account) -> Result<Organization, OrganizationError> {
        self.load(name).await
    }

    pub async fn get_by_owner(
        &self,
        owner: &Account,
    ) -> Result<Vec<Organization>, OrganizationError> {
        self.orgs
            .get_by_owner(owner)
            .await
            .map_err(OrganizationError::from_repo)
    }

    /// Organizations the user is a confirmed member of.
    pub async fn get_by_user(&self, user: &Account) -> Result<Vec<Organization>, OrganizationError> {
        let memberships = self
            .members
            .get_by_user(user)
            .await
            .map_err(OrganizationError::from_repo)?;

        let mut orgs = Vec::with_capacity(memberships.len());
        for membership in &memberships {
            orgs.push(self.load(&membership.org_name).await?);
        }
        Ok(orgs)
    }

    /// Members of the organization, optionally restricted to one role.
    pub async fn list_members(
        &self,
        org: &Account,
        role: Option<Role>,
    ) -> Result<Vec<OrgMember>, OrganizationError> {
        match role {
            Some(role) => self
                .members
                .get_by_org_and_role(org, role)
                .await
                .map_err(OrganizationError::from_repo),
            None => self
                .members
                .get_by_org(org)
                .await
                .map_err(OrganizationError::from_repo),
        }
    }

    pub async fn get_member(
        &self,
        org: &Account,
        user: &Account,
    ) -> Result<OrgMember, OrganizationError> {
        self.members
            .get_by_org_and_user(org, user)
            .await
            .map_err(OrganizationError::from_repo)?
            .ok_or(OrganizationError::NotFound)
    }

    /// Whether the user is already a confirmed member. Fails safe: if the
    /// membership store cannot be read we report "member" so that no invite
    /// or request is created on top of an unknown state.
    pub async fn has_member(&self, org: &Account, user: &Account) -> bool {
        match self.members.get_by_org_and_user(org, user).await {
            Ok(member) => member.is_some(),
            Err(err) => {
                error!(org = %org, user = %user, error = %err, "membership existence check failed");
                true
            }
        }
    }

    /// Invite a user into the organization. Requires `Create` on the member
    /// namespace; rejected when the user is already a member or already has a
    /// pending invite.
    pub async fn invite_member(&self, cmd: InviteMemberCmd) -> Result<Approve, OrganizationError> {
        if self.has_member(&cmd.org, &cmd.account).await {
            return Err(OrganizationError::AlreadyMember);
        }

        self.perm
            .check(&cmd.actor, &cmd.org, ObjType::Member, Action::Create)
            .await?;

        let mut org = self.load(&cmd.org).await?;

        let approve = org
            .add_invite(
                cmd.account,
                cmd.role,
                self.invite_expiry,
                cmd.actor,
                cmd.msg,
            )?
            .clone();

        self.orgs
            .save(&org)
            .await
            .map_err(OrganizationError::from_repo)?;

        Ok(approve)
    }

    /// Revoke a pending invite: the invitee may decline their own, anyone
    /// else needs `Delete` on the invite namespace.
    pub async fn revoke_invite(&self, cmd: RevokeInviteCmd) -> Result<Approve, OrganizationError> {
        if cmd.actor != cmd.account {
            self.perm
                .check(&cmd.actor, &cmd.org, ObjType::Invite, Action::Delete)
                .await?;
        }

        let mut org = self.load(&cmd.org).await?;

        let mut approve = org.remove_invite(&cmd.account)?;
        approve.status = ApproveStatus::Rejected;
        approve.by = cmd.actor.to_string();
        approve.msg = cmd.msg;
        approve.updated_at = Utc::now().timestamp();

        self.orgs
            .save(&org)
            .await
            .map_err(OrganizationError::from_repo)?;

        Ok(approve)
    }

    /// Accept an invitation sent to the acting user.
    ///
    /// The pending entry is removed first; if it turns out to be expired the
    /// removal is still persisted before the error is returned, so an expired
    /// invite is consumed exactly once and a retry yields a clean NotFound.
    /// The platform membership is provisioned before the local member row is
    /// written, so a provisioning failure leaves no orphaned local state.
    pub async fn accept_invite(&self, cmd: AcceptInviteCmd) -> Result<Approve, OrganizationError> {
        if self.has_member(&cmd.org, &cmd.actor).await {
            return Err(OrganizationError::AlreadyMember);
        }

        let mut org = self.load(&cmd.org).await?;

        let mut approve = org.remove_invite(&cmd.actor)?;

        if approve.is_expired(Utc::now().timestamp()) {
            self.orgs
                .save(&org)
                .await
                .map_err(OrganizationError::from_repo)?;
            return Err(OrganizationError::Expired);
        }

        approve.status = ApproveStatus::Approved;
        approve.by = cmd.actor.to_string();
        approve.msg = cmd.msg;
        approve.updated_at = Utc::now().timestamp();

        self.join_member(&mut org, &approve).await?;

        Ok(approve)
    }

    /// Ask to join an organization that allows requests. The granted role is
    /// the organization's default role.
    pub async fn request_member(&self, cmd: RequestMemberCmd) -> Result<Approve, OrganizationError> {
        if self.has_member(&cmd.org, &cmd.actor).await {
            return Err(OrganizationError::AlreadyMember);
        }

        let mut org = self.load(&cmd.org).await?;

        if !org.allow_request {
            return Err(OrganizationError::RequestsNotAllowed);
        }

        let default_role = org.default_role;
        let approve = org
            .add_request(cmd.actor, default_role, cmd.msg)?
            .clone();

        self.orgs
            .save(&org)
            .await
            .map_err(OrganizationError::from_repo)?;

        Ok(approve)
    }

    /// Cancel a pending join request: the requester may withdraw their own,
    /// an admin rejecting someone else's needs `Delete` on the invite
    /// namespace.
    pub async fn cancel_request(&self, cmd: CancelRequestCmd) -> Result<Approve, OrganizationError> {
        if cmd.actor != cmd.requester {
            self.perm
                .check(&cmd.actor, &cmd.org, ObjType::Invite, Action::Delete)
                .await?;
        }

        let mut org = self.load(&cmd.org).await?;

        let mut approve = org.remove_request(&cmd.requester)?;
        approve.status = ApproveStatus::Rejected;
        approve.by = cmd.actor.to_string();
        approve.msg = cmd.msg;
        approve.updated_at = Utc::now().timestamp();

        self.orgs
            .save(&org)
            .await
            .map_err(OrganizationError::from_repo)?;

        Ok(approve)
    }

    /// Approve a pending join request. Requesters cannot approve themselves;
    /// approval requires `Write` on the invite namespace.
    pub async fn approve_request(
        &self,
        cmd: ApproveRequestCmd,
    ) -> Result<Approve, OrganizationError> {
        if cmd.actor == cmd.requester {
            return Err(no_permission("can't approve your own request"));
        }

        self.perm
            .check(&cmd.actor, &cmd.org, ObjType::Invite, Action::Write)
            .await?;

        let mut org = self.load(&cmd.org).await?;

        let mut approve = org.remove_request(&cmd.requester)?;
        approve.status = ApproveStatus::Approved;
        approve.by = cmd.actor.to_string();
        approve.msg = cmd.msg;
        approve.updated_at = Utc::now().timestamp();

        self.join_member(&mut org, &approve).await?;

        Ok(approve)
    }

    /// Terminal half of both acquisition paths: provision the platform
    /// membership, insert the member row, persist the aggregate with the
    /// consumed entry removed, then fan out the join event.
    ///
    /// The member insert and the aggregate save are two separate optimistic
    /// writes; there is no cross-aggregate transaction, so a crash between
    /// them is repaired on next read rather than rolled back.
    async fn join_member(
        &self,
        org: &mut Organization,
        approve: &Approve,
    ) -> Result<(), OrganizationError> {
        let member = approve.clone().into_member();

        self.provisioner
            .add_member(&org.name, &member)
            .await
            .map_err(|err| OrganizationError::Internal(err.context("failed to add platform member")))?;

        self.members
            .add(&member)
            .await
            .map_err(OrganizationError::from_repo)?;

        self.orgs
            .save(org)
            .await
            .map_err(OrganizationError::from_repo)?;

        self.publish_user_join(UserJoinEvent::new(approve)).await;

        Ok(())
    }

    /// Invariant gate shared by member removal and role edits.
    ///
    /// An organization must always retain at least one member overall and at
    /// least one admin; a target that is the sole member, or the only admin,
    /// cannot be removed. A target that is not a member at all is NotFound.
    fn can_remove_member(
        members: &[OrgMember],
        target: &Account,
    ) -> Result<(), OrganizationError> {
        match members.len() {
            0 => return Err(no_permission("the org has no member")),
            1 => return Err(OrganizationError::SoleMember),
            _ => {}
        }

        let mut admin_count = 0usize;
        let mut target_is_admin = false;
        let mut target_is_member = false;
        for member in members {
            if member.role == Role::Admin {
                admin_count += 1;
                if &member.username == target {
                    target_is_admin = true;
                }
            }
            if &member.username == target {
                target_is_member = true;
            }
        }

        if admin_count == 1 && target_is_admin {
            return Err(OrganizationError::LastAdmin);
        }

        if !target_is_member {
            return Err(OrganizationError::NotFound);
        }

        Ok(())
    }

    /// Remove a confirmed member. Leaving (self-removal) only needs `Read` on
    /// the member namespace; removing someone else needs `Delete`. The remote
    /// membership is removed first; if the local delete then fails the remote
    /// membership is re-added as best-effort compensation.
    pub async fn remove_member(&self, cmd: RemoveMemberCmd) -> Result<(), OrganizationError> {
        let all = self
            .members
            .get_by_org(&cmd.org)
            .await
            .map_err(OrganizationError::from_repo)?;
        Self::can_remove_member(&all, &cmd.account)?;

        if cmd.actor == cmd.account {
            self.perm
                .check(&cmd.actor, &cmd.org, ObjType::Member, Action::Read)
                .await?;
        } else {
            self.perm
                .check(&cmd.actor, &cmd.org, ObjType::Member, Action::Delete)
                .await?;
        }

        let mut org = self.load(&cmd.org).await?;

        let member = self.get_member(&cmd.org, &cmd.account).await?;

        self.provisioner
            .remove_member(&org.name, &member)
            .await
            .map_err(|err| {
                OrganizationError::Internal(err.context("failed to remove platform member"))
            })?;

        if let Err(err) = self.members.delete(&member).await {
            // Compensate: the remote membership was already removed.
            if let Err(undo) = self.provisioner.add_member(&org.name, &member).await {
                error!(
                    org = %org.name,
                    user = %member.username,
                    error = %undo,
                    "compensating platform member re-add failed"
                );
            }
            return Err(OrganizationError::from_repo(err));
        }

        // When the recorded owner leaves, ownership passes to the acting
        // admin.
        if org.owner == cmd.account {
            org.owner = cmd.actor.clone();
            org.updated_at = Utc::now();
            self.orgs
                .save(&org)
                .await
                .map_err(OrganizationError::from_repo)?;
        }

        self.publish_user_remove(UserRemoveEvent::new(&cmd)).await;

        Ok(())
    }

    /// Change a member's role. The organization's original owner is a
    /// permanent admin and cannot be edited through this path. A no-op edit
    /// (same role) is treated as success, but logged.
    pub async fn edit_member(&self, cmd: EditMemberCmd) -> Result<OrgMember, OrganizationError> {
        let all = self
            .members
            .get_by_org(&cmd.org)
            .await
            .map_err(OrganizationError::from_repo)?;
        Self::can_remove_member(&all, &cmd.account)?;

        self.perm
            .check(&cmd.actor, &cmd.org, ObjType::Member, Action::Write)
            .await?;

        let org = self.load(&cmd.org).await?;
        if org.owner == cmd.account {
            return Err(OrganizationError::InvalidParam(
                "the role of the organization owner can not be changed".to_string(),
            ));
        }

        let mut member = self.get_member(&cmd.org, &cmd.account).await?;

        if member.role == cmd.role {
            warn!(org = %cmd.org, user = %cmd.account, role = %cmd.role, "role not changed");
            return Ok(member);
        }

        let old_role = member.role;
        member.role = cmd.role;
        member.updated_at = Utc::now();

        self.provisioner
            .edit_member_role(&org.name, old_role, &member)
            .await
            .map_err(|err| {
                OrganizationError::Internal(err.context("failed to edit platform member role"))
            })?;

        self.members
            .save(&member)
            .await
            .map_err(OrganizationError::from_repo)
    }

    /// Pending invitations, selected by exactly one of org / invitee /
    /// inviter. Org-scoped listing needs `Read` on the invite namespace; a
    /// user may only list invitations they sent or received.
    pub async fn list_invitations(
        &self,
        actor: &Account,
        cmd: ListInvitationsCmd,
    ) -> Result<Vec<Approve>, OrganizationError> {
        cmd.validate()?;

        if let Some(org_name) = &cmd.org {
            self.perm
                .check(actor, org_name, ObjType::Invite, Action::Read)
                .await?;

            let org = self.load(org_name).await?;
            return Ok(org.pending(ApproveKind::Invite).cloned().collect());
        }

        if let Some(invitee) = &cmd.invitee {
            if invitee != actor {
                return Err(no_permission(
                    "can not list invitation received by other user",
                ));
            }
            return self
                .pending_matching(invitee, |approve| &approve.username == invitee)
                .await;
        }

        let inviter = cmd.inviter.as_ref().expect("validated selector");
        if inviter != actor {
            return Err(no_permission("can not list invitation sent by other user"));
        }
        self.pending_matching(inviter, |approve| &approve.inviter == inviter)
            .await
    }

    /// Pending join requests, by organization (admin view) or by requester
    /// (self view).
    pub async fn list_requests(
        &self,
        actor: &Account,
        cmd: ListRequestsCmd,
    ) -> Result<Vec<Approve>, OrganizationError> {
        cmd.validate()?;

        if let Some(org_name) = &cmd.org {
            self.perm
                .check(actor, org_name, ObjType::Invite, Action::Read)
                .await?;

            let org = self.load(org_name).await?;
            let requester = cmd.requester.clone();
            return Ok(org
                .pending(ApproveKind::Request)
                .filter(|approve| {
                    requester
                        .as_ref()
                        .map(|r| &approve.username == r)
                        .unwrap_or(true)
                })
                .cloned()
                .collect());
        }

        let requester = cmd.requester.as_ref().expect("validated selector");
        if requester != actor {
            return Err(no_permission("can't list requests from other people"));
        }

        let orgs = self
            .orgs
            .get_by_pending_user(requester)
            .await
            .map_err(OrganizationError::from_repo)?;
        Ok(orgs
            .iter()
            .flat_map(|org| org.pending(ApproveKind::Request))
            .filter(|approve| &approve.username == requester)
            .cloned()
            .collect())
    }

    async fn pending_matching(
        &self,
        user: &Account,
        keep: impl Fn(&Approve) -> bool,
    ) -> Result<Vec<Approve>, OrganizationError> {
        let orgs = self
            .orgs
            .get_by_pending_user(user)
            .await
            .map_err(OrganizationError::from_repo)?;
        Ok(orgs
            .iter()
            .flat_map(|org| org.pending(ApproveKind::Invite))
            .filter(|approve| keep(approve))
            .cloned()
            .collect())
    }

    async fn load(&self, name: &Account) -> Result<Organization, OrganizationError> {
        self.orgs
            .get_by_name(name)
            .await
            .map_err(OrganizationError::from_repo)?
            .ok_or(OrganizationError::NotFound)
    }

    async fn publish_user_join(&self, event: UserJoinEvent) {
        if let Err(err) = self.publisher.send_user_join(&event).await {
            warn!(org = %event.org_name, user = %event.user_name, error = %err, "failed to publish user join event");
        }
    }

    async fn publish_user_remove(&self, event: UserRemoveEvent) {
        if let Err(err) = self.publisher.send_user_remove(&event).await {
            warn!(org = %event.org_name, user = %event.user_name, error = %err, "failed to publish user remove event");
        }
    }

    async fn publish_org_delete(&self, event: OrgDeleteEvent) {
        if let Err(err) = self.publisher.send_org_delete(&event).await {
            warn!(org = %event.org_name, error = %err, "failed to publish org delete event");
        }
    }
}
