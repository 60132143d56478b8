//! Ride and rider membership models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stored lifecycle status of a ride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Active,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RideStatus::Active)
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown ride status: {}", s)),
        }
    }
}

/// How riders contribute to the trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOption {
    Free,
    Gas,
    GasWithFee,
}

impl std::fmt::Display for PriceOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Gas => write!(f, "gas"),
            Self::GasWithFee => write!(f, "gas_with_fee"),
        }
    }
}

impl std::str::FromStr for PriceOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "gas" => Ok(Self::Gas),
            // Older clients send the human-readable label
            "gas_with_fee" | "gas with fee" => Ok(Self::GasWithFee),
            _ => Err(format!("Unknown price option: {}", s)),
        }
    }
}

/// Lifecycle phase derived from status, driver and seat occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RidePhase {
    /// No driver yet, the requester is a rider
    OpenRequest,
    /// Driver assigned, seats left
    OpenPost,
    /// Driver assigned, every seat taken
    Full,
    Completed,
    Cancelled,
}

impl std::fmt::Display for RidePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OpenRequest => "open_request",
            Self::OpenPost => "open_post",
            Self::Full => "full",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Columns selected for every ride read, see [`RIDE_SELECT`]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ride {
    pub id: String,
    pub pickup_address: String,
    pub destination_address: String,
    pub pickup_time: String,
    pub max_riders: i64,
    pub price_option: String,
    pub status: String,
    pub driver_id: Option<String>,
    pub organization_id: Option<String>,
    pub driver_comment: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    /// User behind `driver_id`
    pub driver_user_id: Option<String>,
    /// Current number of rider memberships
    pub rider_count: i64,
}

/// Base query for [`Ride`]; callers append `WHERE`/`ORDER BY` clauses.
pub const RIDE_SELECT: &str = r#"
    SELECT r.id, r.pickup_address, r.destination_address, r.pickup_time,
           r.max_riders, r.price_option, r.status, r.driver_id, r.organization_id,
           r.driver_comment, r.created_at, r.updated_at, r.completed_at,
           d.user_id AS driver_user_id,
           (SELECT COUNT(*) FROM ride_riders rr WHERE rr.ride_id = r.id) AS rider_count
    FROM rides r
    LEFT JOIN driver_profiles d ON d.id = r.driver_id
"#;

impl Ride {
    pub fn status_enum(&self) -> RideStatus {
        // Unknown values never come from this service; treat them as finished
        self.status.parse().unwrap_or(RideStatus::Cancelled)
    }

    pub fn price_option_enum(&self) -> PriceOption {
        self.price_option.parse().unwrap_or(PriceOption::Free)
    }
}

/// Ride as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideResponse {
    pub id: String,
    pub pickup_address: String,
    pub destination_address: String,
    pub pickup_time: String,
    pub max_riders: i64,
    pub rider_count: i64,
    pub available_seats: i64,
    pub price_option: PriceOption,
    pub status: RideStatus,
    pub phase: RidePhase,
    pub driver_id: Option<String>,
    pub driver_user_id: Option<String>,
    pub organization_id: Option<String>,
    pub driver_comment: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<Ride> for RideResponse {
    fn from(ride: Ride) -> Self {
        Self {
            available_seats: ride.available_seats(),
            phase: ride.phase(),
            status: ride.status_enum(),
            price_option: ride.price_option_enum(),
            id: ride.id,
            pickup_address: ride.pickup_address,
            destination_address: ride.destination_address,
            pickup_time: ride.pickup_time,
            max_riders: ride.max_riders,
            rider_count: ride.rider_count,
            driver_id: ride.driver_id,
            driver_user_id: ride.driver_user_id,
            organization_id: ride.organization_id,
            driver_comment: ride.driver_comment,
            created_at: ride.created_at,
            completed_at: ride.completed_at,
        }
    }
}

/// A rider's membership on a ride, joined with the rider's identity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RideRider {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub comment: Option<String>,
    pub joined_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRideRequest {
    pub pickup_address: String,
    pub destination_address: String,
    /// RFC 3339 timestamp
    pub pickup_time: String,
    pub price_option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_riders: Option<i64>,
    /// Set when a driver posts a ride; must be the caller's own driver profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_comment: Option<String>,
    /// Requester's note on a rider request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rider_comment: Option<String>,
}

/// Edits to an active ride; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRideRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_riders: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinRideRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptRideRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideSearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
    /// Calendar day in UTC, `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_seats: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// Confirmation returned by `leave`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRideResponse {
    pub message: String,
    pub ride_id: String,
    /// True when the departure emptied a rider request and cancelled it
    pub ride_cancelled: bool,
}
