//! Driver reviews written by riders after a completed ride.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub id: String,
    pub ride_id: String,
    pub driver_id: String,
    pub author_id: String,
    pub stars: f64,
    pub comment: String,
    pub created_at: String,
}

/// Review with the author's display name
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReviewWithAuthor {
    pub id: String,
    pub ride_id: String,
    pub driver_id: String,
    pub author_id: String,
    pub author_name: String,
    pub stars: f64,
    pub comment: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReviewRequest {
    pub stars: f64,
    #[serde(default)]
    pub comment: String,
}
