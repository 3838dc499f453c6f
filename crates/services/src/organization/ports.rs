use crate::account::{Account, Role};
use crate::common::RepositoryError;
use crate::organization::domain::{Organization, OrgMember};
use crate::organization::events::{OrgDeleteEvent, UserJoinEvent, UserRemoveEvent};
use crate::permission::PermissionError;
use async_trait::async_trait;

/// Domain errors surfaced by the organization core. Invariant violations get
/// precise variants; infrastructure failures are wrapped, not reclassified.
#[derive(Debug, thiserror::Error)]
pub enum OrganizationError {
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    NoPermission(#[from] PermissionError),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("concurrent updating, re-read and retry")]
    ConcurrentUpdating,

    #[error("member already exists")]
    AlreadyMember,

    #[error("the invitation has expired")]
    Expired,

    #[error("the only admin can not be removed")]
    LastAdmin,

    #[error("the org has only one member")]
    SoleMember,

    #[error("the org does not allow membership requests")]
    RequestsNotAllowed,

    #[error("nothing changed")]
    NothingChanged,

    #[error("name {0} is already taken")]
    NameTaken(String),

    #[error("org count per owner exceeded")]
    QuotaExceeded,

    #[error("can't delete the organization while owned repositories still exist")]
    ResourcesRemain,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrganizationError {
    /// Translate a port-level failure into the domain vocabulary.
    pub(crate) fn from_repo(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(_) => OrganizationError::NotFound,
            RepositoryError::ConcurrentUpdate => OrganizationError::ConcurrentUpdating,
            RepositoryError::AlreadyExists => OrganizationError::AlreadyMember,
            other => OrganizationError::Internal(other.into()),
        }
    }
}

/// CRUD over the organization aggregate (including its embedded pending
/// invite/request list). `save` is a compare-and-swap on the aggregate
/// version.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn add(&self, org: &Organization) -> Result<Organization, RepositoryError>;

    /// Conditional update gated on the version the aggregate was read with;
    /// increments the stored version by one. `ConcurrentUpdate` when the
    /// version no longer matches.
    async fn save(&self, org: &Organization) -> Result<Organization, RepositoryError>;

    async fn delete(&self, org: &Organization) -> Result<(), RepositoryError>;

    async fn get_by_name(&self, name: &Account) -> Result<Option<Organization>, RepositoryError>;

    async fn get_by_owner(&self, owner: &Account) -> Result<Vec<Organization>, RepositoryError>;

    async fn count_by_owner(&self, owner: &Account) -> Result<i64, RepositoryError>;

    /// Organizations holding a pending approve entry for `user` (either
    /// direction). Backs the invitee/inviter/requester listings.
    async fn get_by_pending_user(
        &self,
        user: &Account,
    ) -> Result<Vec<Organization>, RepositoryError>;
}

/// CRUD + lookups over confirmed membership rows, keyed by (org, user) and by
/// org, with per-record optimistic version.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn add(&self, member: &OrgMember) -> Result<OrgMember, RepositoryError>;

    /// CAS on the member row version, same protocol as the aggregate save.
    async fn save(&self, member: &OrgMember) -> Result<OrgMember, RepositoryError>;

    async fn delete(&self, member: &OrgMember) -> Result<(), RepositoryError>;

    async fn delete_by_org(&self, org: &Account) -> Result<(), RepositoryError>;

    async fn get_by_org(&self, org: &Account) -> Result<Vec<OrgMember>, RepositoryError>;

    async fn get_by_org_and_role(
        &self,
        org: &Account,
        role: Role,
    ) -> Result<Vec<OrgMember>, RepositoryError>;

    async fn get_by_org_and_user(
        &self,
        org: &Account,
        user: &Account,
    ) -> Result<Option<OrgMember>, RepositoryError>;

    async fn get_by_user(&self, user: &Account) -> Result<Vec<OrgMember>, RepositoryError>;
}

/// External git-hosting platform that mirrors organizations and memberships.
/// Called before local durable writes so a provisioning failure never leaves
/// an orphaned local record.
#[async_trait]
pub trait PlatformProvisioner: Send + Sync {
    async fn create_org(&self, org: &Organization) -> anyhow::Result<()>;

    async fn delete_org(&self, name: &Account) -> anyhow::Result<()>;

    /// True only if no repositories remain owned by the organization.
    async fn can_delete(&self, name: &Account) -> anyhow::Result<bool>;

    async fn add_member(&self, org: &Account, member: &OrgMember) -> anyhow::Result<()>;

    async fn remove_member(&self, org: &Account, member: &OrgMember) -> anyhow::Result<()>;

    async fn edit_member_role(
        &self,
        org: &Account,
        old_role: Role,
        member: &OrgMember,
    ) -> anyhow::Result<()>;
}

/// Uniqueness oracle over the global account namespace (users and
/// organizations share it). Thin port over the user domain.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn name_taken(&self, name: &Account) -> Result<bool, RepositoryError>;
}

/// Downstream notification fan-out. Fire-and-forget: failures are logged by
/// the caller, never retried synchronously and never fail the triggering
/// command.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn send_user_join(&self, event: &UserJoinEvent) -> anyhow::Result<()>;

    async fn send_user_remove(&self, event: &UserRemoveEvent) -> anyhow::Result<()>;

    async fn send_org_delete(&self, event: &OrgDeleteEvent) -> anyhow::Result<()>;
}

/// Capability interface satisfied by the model/dataset/space resource
/// domains; consumed by the generic permission facade layered on
/// [`crate::permission::PermissionEngine`].
pub trait Resource: Send + Sync {
    fn owned_by(&self, account: &Account) -> bool;

    fn is_public(&self) -> bool;

    fn resource_type(&self) -> crate::account::ObjType;

    fn resource_owner(&self) -> Account;

    fn owned_by_person(&self) -> bool;
}
