//! User, identity and driver profile models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Gender as collected at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Stored integer code (0 male, 1 female, 2 other)
    pub fn code(&self) -> i64 {
        match self {
            Gender::Male => 0,
            Gender::Female => 1,
            Gender::Other => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Gender::Male),
            1 => Some(Gender::Female),
            2 => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub gender: i64,
    pub preferred_contact: String,
    pub is_system_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn gender_enum(&self) -> Gender {
        Gender::from_code(self.gender).unwrap_or(Gender::Other)
    }
}

/// Driver application and, once approved, the driver's public record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DriverProfile {
    pub id: String,
    pub user_id: String,
    pub vehicle_description: String,
    pub license_plate: String,
    pub license_image: String,
    pub is_approved: bool,
    pub approved_at: Option<String>,
    pub average_rating: Option<f64>,
    pub review_count: i64,
    pub created_at: String,
}

/// Where a user stands with respect to driving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    /// Never applied
    NotADriver,
    /// Applied, waiting for an administrator
    Pending,
    /// May post rides and accept requests
    Approved,
}

impl DriverStatus {
    pub fn of(profile: Option<&DriverProfile>) -> Self {
        match profile {
            None => DriverStatus::NotADriver,
            Some(p) if p.is_approved => DriverStatus::Approved,
            Some(_) => DriverStatus::Pending,
        }
    }
}

/// Profile returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub gender: Gender,
    pub preferred_contact: String,
    pub is_system_admin: bool,
    pub is_driver: bool,
    pub driver_status: DriverStatus,
    pub driver_id: Option<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn new(user: User, driver: Option<&DriverProfile>) -> Self {
        let driver_status = DriverStatus::of(driver);
        Self {
            gender: user.gender_enum(),
            id: user.id,
            email: user.email,
            name: user.name,
            preferred_contact: user.preferred_contact,
            is_system_admin: user.is_system_admin,
            is_driver: driver_status == DriverStatus::Approved,
            driver_status,
            driver_id: driver.map(|d| d.id.clone()),
            created_at: user.created_at,
        }
    }
}

/// Login or registration through the identity provider
#[derive(Debug, Deserialize)]
pub struct GoogleAuthRequest {
    /// ID token issued by the identity provider
    pub token: String,
    /// Required when registering
    pub gender: Option<i64>,
    /// Required when registering
    pub preferred_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
    pub is_new_user: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyDriverRequest {
    pub vehicle_description: String,
    pub license_plate: String,
    /// Reference to the uploaded license image
    pub license_image: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveDriverRequest {
    pub approved: bool,
}
