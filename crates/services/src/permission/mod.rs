use crate::account::{Account, Action, ObjType, Role};
use crate::organization::ports::MembershipRepository;
use config::PermissionRuleSet;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Error raised while building the permission matrix from configuration.
/// Any of these is fatal at startup: a partially loaded policy would be a
/// silent security hole.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("unknown object type in permission config: {0}")]
    UnknownObjectType(String),
    #[error("unknown role in permission config: {0}")]
    UnknownRole(String),
    #[error("unknown action in permission config: {0}")]
    UnknownAction(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("no permission: {0}")]
    NoPermission(String),
}

/// Static `(object type, role) -> action bitmask` table. Built once at process
/// start from configuration and never mutated afterwards, so it is safe to
/// share across request tasks without synchronization.
#[derive(Debug, Clone, Default)]
pub struct PermissionMatrix {
    permissions: HashMap<ObjType, HashMap<Role, u64>>,
}

impl PermissionMatrix {
    pub fn from_rules(rule_sets: &[PermissionRuleSet]) -> Result<Self, MatrixError> {
        let mut permissions: HashMap<ObjType, HashMap<Role, u64>> = HashMap::new();

        for set in rule_sets {
            let obj_type = ObjType::from_str(&set.object_type)
                .map_err(|_| MatrixError::UnknownObjectType(set.object_type.clone()))?;

            let entry = permissions.entry(obj_type).or_default();
            for rule in &set.rules {
                let role = Role::from_str(&rule.role)
                    .map_err(|_| MatrixError::UnknownRole(rule.role.clone()))?;

                let mut bitmap = 0u64;
                for op in &rule.operation {
                    let action = Action::from_str(op)
                        .map_err(|_| MatrixError::UnknownAction(op.clone()))?;
                    bitmap |= action.bit();
                }
                entry.insert(role, bitmap);
            }
        }

        Ok(Self { permissions })
    }

    pub fn allows(&self, obj_type: ObjType, role: Role, action: Action) -> bool {
        self.permissions
            .get(&obj_type)
            .and_then(|rules| rules.get(&role))
            .map(|bitmap| bitmap & action.bit() != 0)
            .unwrap_or(false)
    }
}

/// Evaluates whether an actor may perform an action on an object owned by
/// some account. Pure read: resolves the actor's role in the owning
/// organization and consults the matrix.
pub struct PermissionEngine {
    matrix: PermissionMatrix,
    members: Arc<dyn MembershipRepository>,
}

impl PermissionEngine {
    pub fn new(matrix: PermissionMatrix, members: Arc<dyn MembershipRepository>) -> Self {
        Self { matrix, members }
    }

    /// Check whether `actor` may perform `action` on the `obj_type` namespace
    /// owned by `object`.
    ///
    /// An account always has full rights over its own namespace. For anything
    /// else the actor must hold a role in the owning organization whose
    /// bitmask covers the action. Membership absence and membership-read
    /// failures both collapse to `NoPermission`: callers must not be able to
    /// distinguish a non-existent organization from a private one.
    pub async fn check(
        &self,
        actor: &Account,
        object: &Account,
        obj_type: ObjType,
        action: Action,
    ) -> Result<(), PermissionError> {
        if actor == object {
            return Ok(());
        }

        let member = match self.members.get_by_org_and_user(object, actor).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                return Err(PermissionError::NoPermission(format!(
                    "{actor} does not have a valid role in {object}"
                )));
            }
            Err(err) => {
                // Fail closed: an unreadable membership store must never
                // grant access, and must not leak whether the org exists.
                error!(actor = %actor, object = %object, error = %err, "membership lookup failed");
                return Err(PermissionError::NoPermission(format!(
                    "{actor} does not have a valid role in {object}"
                )));
            }
        };

        let allowed = self.matrix.allows(obj_type, member.role, action);
        debug!(
            actor = %actor,
            role = %member.role,
            object = %object,
            obj_type = %obj_type,
            action = %action,
            allowed,
            "permission check"
        );

        if allowed {
            Ok(())
        } else {
            Err(PermissionError::NoPermission(format!(
                "{actor} {action} {obj_type} permission denied"
            )))
        }
    }

    /// Resource-level variant of [`check`](Self::check) for things that live
    /// under either a personal or an organizational namespace.
    ///
    /// Public resources are readable by anyone. A resource owned by an
    /// individual is only touchable by that individual; a resource owned by
    /// an organization falls through to the role matrix.
    pub async fn check_resource(
        &self,
        actor: &Account,
        resource: &dyn crate::organization::ports::Resource,
        action: Action,
    ) -> Result<(), PermissionError> {
        if action == Action::Read && resource.is_public() {
            return Ok(());
        }

        if resource.owned_by_person() {
            if resource.owned_by(actor) {
                return Ok(());
            }
            return Err(PermissionError::NoPermission(format!(
                "{actor} {action} {} permission denied",
                resource.resource_type()
            )));
        }

        self.check(
            actor,
            &resource.resource_owner(),
            resource.resource_type(),
            action,
        )
        .await
    }
}
