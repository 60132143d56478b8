//! Organization (club) and capability-based membership models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Organization entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Shared secret used to join
    pub access_code: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership record linking a user to an organization
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrganizationMember {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_driver: bool,
    pub joined_at: String,
}

/// Member with user details
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrganizationMemberWithUser {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_driver: bool,
    pub joined_at: String,
    pub user_name: String,
    pub user_email: String,
}

/// Organization as seen by one of its members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub member_count: i64,
    /// Only present for admins and the owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_driver: bool,
    pub created_at: String,
}

/// Organization detail response with members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationDetail {
    #[serde(flatten)]
    pub summary: OrganizationSummary,
    pub members: Vec<OrganizationMemberWithUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrganizationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOrganizationRequest {
    pub access_code: String,
}

/// Capability changes for a member; absent flags are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemberRoleRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_driver: Option<bool>,
}

/// Direct addition of an existing user by an admin or the owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_driver: Option<bool>,
}

/// Member who may drive for the organization, with their approved profile
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrganizationDriver {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub driver_id: String,
    pub vehicle_description: String,
    pub license_plate: String,
    pub average_rating: Option<f64>,
    pub review_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationRidesQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
