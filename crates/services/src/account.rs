use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of an account name.
pub const MAX_ACCOUNT_LEN: usize = 64;

/// A validated account name. Both individual users and organizations live in
/// the same global namespace, so the same type names either one.
///
/// Construction goes through [`Account::new`]; an invalid name can never enter
/// an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Account(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid account name: {0}")]
pub struct InvalidAccount(String);

impl Account {
    /// Validate and wrap an account name: lowercase ASCII alphanumerics plus
    /// `-` and `_`, 1..=64 chars, not starting or ending with `-`.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidAccount> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_ACCOUNT_LEN {
            return Err(InvalidAccount(name));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(InvalidAccount(name));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
        {
            return Err(InvalidAccount(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Account {
    type Error = InvalidAccount;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Account::new(value)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a member inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Write,
    Contributor,
    Read,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid role: {0}")]
pub struct InvalidRole(String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "write" => Ok(Role::Write),
            "contributor" => Ok(Role::Contributor),
            "read" => Ok(Role::Read),
            _ => Err(InvalidRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Write => "write",
            Role::Contributor => "contributor",
            Role::Read => "read",
        };
        f.write_str(s)
    }
}

/// Type of object a permission rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjType {
    User,
    Organization,
    Model,
    Dataset,
    Space,
    Member,
    Invite,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid object type: {0}")]
pub struct InvalidObjType(String);

impl FromStr for ObjType {
    type Err = InvalidObjType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ObjType::User),
            "organization" => Ok(ObjType::Organization),
            "model" => Ok(ObjType::Model),
            "dataset" => Ok(ObjType::Dataset),
            "space" => Ok(ObjType::Space),
            "member" => Ok(ObjType::Member),
            "invite" => Ok(ObjType::Invite),
            _ => Err(InvalidObjType(s.to_string())),
        }
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjType::User => "user",
            ObjType::Organization => "organization",
            ObjType::Model => "model",
            ObjType::Dataset => "dataset",
            ObjType::Space => "space",
            ObjType::Member => "member",
            ObjType::Invite => "invite",
        };
        f.write_str(s)
    }
}

/// An action gated by the permission matrix. The discriminant doubles as the
/// bit position in a role's action bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read = 0,
    Write = 1,
    Delete = 2,
    Create = 3,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid action: {0}")]
pub struct InvalidAction(String);

impl Action {
    pub fn bit(self) -> u64 {
        1 << (self as u64)
    }

    pub fn is_modification(self) -> bool {
        matches!(self, Action::Write | Action::Delete)
    }
}

impl FromStr for Action {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "delete" => Ok(Action::Delete),
            "create" => Ok(Action::Create),
            _ => Err(InvalidAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Create => "create",
        };
        f.write_str(s)
    }
}
