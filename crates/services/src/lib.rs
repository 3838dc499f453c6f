pub mod account;
pub mod common;
pub mod organization;
pub mod permission;

pub use account::{Account, Action, ObjType, Role};
pub use organization::OrganizationService;
pub use permission::{PermissionEngine, PermissionMatrix};

#[cfg(test)]
mod test_utils;
