//! In-memory test doubles for the organization ports, mirroring the
//! optimistic-CAS protocol of the real repositories.

use crate::account::{Account, Role};
use crate::common::RepositoryError;
use crate::organization::domain::{CreateOrgCmd, Organization, OrgMember};
use crate::organization::events::{OrgDeleteEvent, UserJoinEvent, UserRemoveEvent};
use crate::organization::ports::{
    AccountDirectory, EventPublisher, MembershipRepository, OrganizationRepository,
    PlatformProvisioner,
};
use crate::organization::OrganizationService;
use crate::permission::{PermissionEngine, PermissionMatrix};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use config::{OrganizationConfig, PermissionRule, PermissionRuleSet};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn acct(name: &str) -> Account {
    Account::new(name).unwrap()
}

pub fn member(org: &str, user: &str, role: Role) -> OrgMember {
    let now = Utc::now();
    OrgMember {
        id: Uuid::new_v4(),
        org_name: acct(org),
        username: acct(user),
        role,
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

#[derive(Default)]
pub struct InMemoryOrgRepository {
    orgs: Mutex<Vec<Organization>>,
}

#[async_trait]
impl OrganizationRepository for InMemoryOrgRepository {
    async fn add(&self, org: &Organization) -> Result<Organization, RepositoryError> {
        let mut orgs = self.orgs.lock().unwrap();
        if orgs.iter().any(|o| o.name == org.name) {
            return Err(RepositoryError::AlreadyExists);
        }
        orgs.push(org.clone());
        Ok(org.clone())
    }

    async fn save(&self, org: &Organization) -> Result<Organization, RepositoryError> {
        let mut orgs = self.orgs.lock().unwrap();
        let stored = orgs
            .iter_mut()
            .find(|o| o.name == org.name)
            .ok_or_else(|| RepositoryError::NotFound(org.name.to_string()))?;
        if stored.version != org.version {
            return Err(RepositoryError::ConcurrentUpdate);
        }
        *stored = org.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete(&self, org: &Organization) -> Result<(), RepositoryError> {
        let mut orgs = self.orgs.lock().unwrap();
        let before = orgs.len();
        orgs.retain(|o| o.name != org.name);
        if orgs.len() == before {
            return Err(RepositoryError::NotFound(org.name.to_string()));
        }
        Ok(())
    }

    async fn get_by_name(&self, name: &Account) -> Result<Option<Organization>, RepositoryError> {
        let orgs = self.orgs.lock().unwrap();
        Ok(orgs.iter().find(|o| &o.name == name).cloned())
    }

    async fn get_by_owner(&self, owner: &Account) -> Result<Vec<Organization>, RepositoryError> {
        let orgs = self.orgs.lock().unwrap();
        Ok(orgs.iter().filter(|o| &o.owner == owner).cloned().collect())
    }

    async fn count_by_owner(&self, owner: &Account) -> Result<i64, RepositoryError> {
        let orgs = self.orgs.lock().unwrap();
        Ok(orgs.iter().filter(|o| &o.owner == owner).count() as i64)
    }

    async fn get_by_pending_user(
        &self,
        user: &Account,
    ) -> Result<Vec<Organization>, RepositoryError> {
        let orgs = self.orgs.lock().unwrap();
        Ok(orgs
            .iter()
            .filter(|o| {
                o.approves
                    .iter()
                    .any(|a| &a.username == user || &a.inviter == user)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMemberRepository {
    members: Mutex<Vec<OrgMember>>,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl InMemoryMemberRepository {
    /// All subsequent reads fail as if the store were unreachable.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// All subsequent single-row deletes fail.
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn add_sync(&self, member: OrgMember) -> Result<(), RepositoryError> {
        let mut members = self.members.lock().unwrap();
        if members
            .iter()
            .any(|m| m.org_name == member.org_name && m.username == member.username)
        {
            return Err(RepositoryError::AlreadyExists);
        }
        members.push(member);
        Ok(())
    }

    fn check_reads(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::ConnectionFailed(
                "injected read failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for InMemoryMemberRepository {
    async fn add(&self, member: &OrgMember) -> Result<OrgMember, RepositoryError> {
        self.add_sync(member.clone())?;
        Ok(member.clone())
    }

    async fn save(&self, member: &OrgMember) -> Result<OrgMember, RepositoryError> {
        let mut members = self.members.lock().unwrap();
        let stored = members
            .iter_mut()
            .find(|m| m.id == member.id)
            .ok_or_else(|| RepositoryError::NotFound(member.username.to_string()))?;
        if stored.version != member.version {
            return Err(RepositoryError::ConcurrentUpdate);
        }
        *stored = member.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete(&self, member: &OrgMember) -> Result<(), RepositoryError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseError(anyhow!(
                "injected delete failure"
            )));
        }
        let mut members = self.members.lock().unwrap();
        let before = members.len();
        members.retain(|m| m.id != member.id);
        if members.len() == before {
            return Err(RepositoryError::NotFound(member.username.to_string()));
        }
        Ok(())
    }

    async fn delete_by_org(&self, org: &Account) -> Result<(), RepositoryError> {
        let mut members = self.members.lock().unwrap();
        members.retain(|m| &m.org_name != org);
        Ok(())
    }

    async fn get_by_org(&self, org: &Account) -> Result<Vec<OrgMember>, RepositoryError> {
        self.check_reads()?;
        let members = self.members.lock().unwrap();
        Ok(members
            .iter()
            .filter(|m| &m.org_name == org)
            .cloned()
            .collect())
    }

    async fn get_by_org_and_role(
        &self,
        org: &Account,
        role: Role,
    ) -> Result<Vec<OrgMember>, RepositoryError> {
        self.check_reads()?;
        let members = self.members.lock().unwrap();
        Ok(members
            .iter()
            .filter(|m| &m.org_name == org && m.role == role)
            .cloned()
            .collect())
    }

    async fn get_by_org_and_user(
        &self,
        org: &Account,
        user: &Account,
    ) -> Result<Option<OrgMember>, RepositoryError> {
        self.check_reads()?;
        let members = self.members.lock().unwrap();
        Ok(members
            .iter()
            .find(|m| &m.org_name == org && &m.username == user)
            .cloned())
    }

    async fn get_by_user(&self, user: &Account) -> Result<Vec<OrgMember>, RepositoryError> {
        self.check_reads()?;
        let members = self.members.lock().unwrap();
        Ok(members
            .iter()
            .filter(|m| &m.username == user)
            .cloned()
            .collect())
    }
}

/// Records every platform call; individual calls can be made to fail.
#[derive(Default)]
pub struct MockProvisioner {
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    edits: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_add: AtomicBool,
    deny_delete: AtomicBool,
}

impl MockProvisioner {
    pub fn created_orgs(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted_orgs(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn added_members(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed_members(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn role_edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }

    pub fn fail_create_org(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_add_member(&self) {
        self.fail_add.store(true, Ordering::SeqCst);
    }

    pub fn unfail_add_member(&self) {
        self.fail_add.store(false, Ordering::SeqCst);
    }

    pub fn set_can_delete(&self, can: bool) {
        self.deny_delete.store(!can, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlatformProvisioner for MockProvisioner {
    async fn create_org(&self, org: &Organization) -> anyhow::Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("platform unavailable"));
        }
        self.created.lock().unwrap().push(org.name.to_string());
        Ok(())
    }

    async fn delete_org(&self, name: &Account) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn can_delete(&self, _name: &Account) -> anyhow::Result<bool> {
        Ok(!self.deny_delete.load(Ordering::SeqCst))
    }

    async fn add_member(&self, org: &Account, member: &OrgMember) -> anyhow::Result<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(anyhow!("platform unavailable"));
        }
        self.added
            .lock()
            .unwrap()
            .push(format!("{org}/{}", member.username));
        Ok(())
    }

    async fn remove_member(&self, org: &Account, member: &OrgMember) -> anyhow::Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push(format!("{org}/{}", member.username));
        Ok(())
    }

    async fn edit_member_role(
        &self,
        org: &Account,
        old_role: Role,
        member: &OrgMember,
    ) -> anyhow::Result<()> {
        self.edits
            .lock()
            .unwrap()
            .push(format!("{org}/{}:{old_role}->{}", member.username, member.role));
        Ok(())
    }
}

#[derive(Default)]
pub struct CapturingPublisher {
    joins: Mutex<Vec<String>>,
    removes: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
}

impl CapturingPublisher {
    pub fn joined(&self) -> Vec<String> {
        self.joins.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removes.lock().unwrap().clone()
    }

    pub fn org_deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn send_user_join(&self, event: &UserJoinEvent) -> anyhow::Result<()> {
        self.joins
            .lock()
            .unwrap()
            .push(format!("{}/{}", event.org_name, event.user_name));
        Ok(())
    }

    async fn send_user_remove(&self, event: &UserRemoveEvent) -> anyhow::Result<()> {
        self.removes
            .lock()
            .unwrap()
            .push(format!("{}/{}", event.org_name, event.user_name));
        Ok(())
    }

    async fn send_org_delete(&self, event: &OrgDeleteEvent) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(event.org_name.clone());
        Ok(())
    }
}

/// Name oracle with an explicitly seeded set of taken names.
#[derive(Default)]
pub struct StaticDirectory {
    taken: Mutex<HashSet<String>>,
}

impl StaticDirectory {
    pub fn reserve(&self, name: &str) {
        self.taken.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn name_taken(&self, name: &Account) -> Result<bool, RepositoryError> {
        Ok(self.taken.lock().unwrap().contains(name.as_str()))
    }
}

fn rule(role: &str, ops: &[&str]) -> PermissionRule {
    PermissionRule {
        role: role.to_string(),
        operation: ops.iter().map(|s| s.to_string()).collect(),
    }
}

/// The standard policy used across the service tests: admins manage the org,
/// write/contributor/read members can look at the roster and leave.
fn standard_rules() -> Vec<PermissionRuleSet> {
    vec![
        PermissionRuleSet {
            object_type: "organization".to_string(),
            rules: vec![
                rule("admin", &["read", "write", "delete"]),
                rule("write", &["read"]),
                rule("contributor", &["read"]),
                rule("read", &["read"]),
            ],
        },
        PermissionRuleSet {
            object_type: "member".to_string(),
            rules: vec![
                rule("admin", &["read", "write", "delete", "create"]),
                rule("write", &["read"]),
                rule("contributor", &["read"]),
                rule("read", &["read"]),
            ],
        },
        PermissionRuleSet {
            object_type: "invite".to_string(),
            rules: vec![
                rule("admin", &["read", "write", "delete", "create"]),
                rule("write", &["read"]),
            ],
        },
    ]
}

/// A fully wired [`OrganizationService`] over in-memory doubles.
pub struct Fixture {
    pub service: OrganizationService,
    pub orgs: Arc<InMemoryOrgRepository>,
    pub members: Arc<InMemoryMemberRepository>,
    pub provisioner: Arc<MockProvisioner>,
    pub directory: Arc<StaticDirectory>,
    pub publisher: Arc<CapturingPublisher>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(10, 3600)
    }

    pub fn with_max_orgs(max: i64) -> Self {
        Self::build(max, 3600)
    }

    pub fn with_invite_expiry(secs: i64) -> Self {
        Self::build(10, secs)
    }

    fn build(max_orgs: i64, invite_expiry: i64) -> Self {
        let orgs = Arc::new(InMemoryOrgRepository::default());
        let members = Arc::new(InMemoryMemberRepository::default());
        let provisioner = Arc::new(MockProvisioner::default());
        let directory = Arc::new(StaticDirectory::default());
        let publisher = Arc::new(CapturingPublisher::default());

        let matrix = PermissionMatrix::from_rules(&standard_rules()).unwrap();
        let perm = Arc::new(PermissionEngine::new(matrix, members.clone()));

        let policy = OrganizationConfig {
            invite_expiry_seconds: invite_expiry,
            default_role: "read".to_string(),
            max_orgs_per_owner: max_orgs,
        };

        let service = OrganizationService::new(
            orgs.clone(),
            members.clone(),
            provisioner.clone(),
            directory.clone(),
            publisher.clone(),
            perm,
            &policy,
        )
        .unwrap();

        Self {
            service,
            orgs,
            members,
            provisioner,
            directory,
            publisher,
        }
    }

    pub fn create_cmd(&self, name: &str, owner: &str) -> CreateOrgCmd {
        CreateOrgCmd {
            name: acct(name),
            full_name: format!("{name} org"),
            description: String::new(),
            website: String::new(),
            avatar_id: String::new(),
            owner: acct(owner),
        }
    }

    /// Insert a confirmed member directly, mirroring what a completed
    /// invite/accept cycle would produce (platform call included).
    pub async fn join(&self, org: &str, user: &str, role: Role) {
        let member = member(org, user, role);
        self.provisioner
            .add_member(&member.org_name, &member)
            .await
            .unwrap();
        self.members.add(&member).await.unwrap();
    }

    /// Flip the aggregate's request gate without going through the service.
    pub async fn allow_requests(&self, org: &str) {
        let mut stored = self
            .orgs
            .get_by_name(&acct(org))
            .await
            .unwrap()
            .expect("org exists");
        stored.allow_request = true;
        self.orgs.save(&stored).await.unwrap();
    }
}
