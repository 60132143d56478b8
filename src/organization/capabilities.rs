//! Capability set of an organization member.
//!
//! The flags are independent: the owner is treated as an admin for every
//! check, but an admin is not an owner and a driver is neither.

use serde::{Deserialize, Serialize};

use crate::db::{AddMemberRequest, OrganizationMember, UpdateMemberRoleRequest};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_driver: bool,
}

impl From<&OrganizationMember> for Capabilities {
    fn from(member: &OrganizationMember) -> Self {
        Self {
            is_owner: member.is_owner,
            is_admin: member.is_admin,
            is_driver: member.is_driver,
        }
    }
}

impl Capabilities {
    pub fn owner() -> Self {
        Self {
            is_owner: true,
            is_admin: true,
            is_driver: false,
        }
    }

    /// Admin privileges, held by admins and the owner
    pub fn is_admin_or_owner(&self) -> bool {
        self.is_owner || self.is_admin
    }

    pub fn can_manage_members(&self) -> bool {
        self.is_admin_or_owner()
    }

    pub fn can_edit_organization(&self) -> bool {
        self.is_admin_or_owner()
    }

    pub fn can_delete_organization(&self) -> bool {
        self.is_owner
    }

    pub fn can_see_access_code(&self) -> bool {
        self.is_admin_or_owner()
    }

    /// Hosting or accepting a ride inside the organization. The owner's
    /// flags cannot be edited, so ownership carries the driver capability.
    pub fn can_drive(&self) -> bool {
        self.is_owner || self.is_driver
    }
}

/// Decide whether `actor` may apply `change` to `target`.
///
/// Targeting the owner is refused before the actor is looked at, so the
/// answer is the same for every actor.
pub fn authorize_role_change(
    actor: Capabilities,
    target: Capabilities,
    change: &UpdateMemberRoleRequest,
) -> ServiceResult<()> {
    if target.is_owner {
        return Err(ServiceError::CannotModifyOwner);
    }
    if change.is_admin.is_some() && !actor.is_owner {
        return Err(ServiceError::not_authorized(
            "Only the owner can grant or revoke admin rights",
        ));
    }
    if change.is_driver.is_some() && !actor.is_admin_or_owner() {
        return Err(ServiceError::not_authorized(
            "Only admins can grant or revoke driver rights",
        ));
    }
    Ok(())
}

/// Adding a user directly needs member management; granting admin on
/// arrival stays with the owner, as it does for role changes.
pub fn authorize_addition(actor: Capabilities, req: &AddMemberRequest) -> ServiceResult<()> {
    if !actor.can_manage_members() {
        return Err(ServiceError::not_authorized("Only admins can add members"));
    }
    if req.is_admin == Some(true) && !actor.is_owner {
        return Err(ServiceError::not_authorized(
            "Only the owner can grant or revoke admin rights",
        ));
    }
    Ok(())
}

pub fn authorize_removal(actor: Capabilities, target: Capabilities) -> ServiceResult<()> {
    if target.is_owner {
        return Err(ServiceError::CannotModifyOwner);
    }
    if !actor.can_manage_members() {
        return Err(ServiceError::not_authorized("Only admins can remove members"));
    }
    Ok(())
}
