//! Driver applications, approval and reviews.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{
    now_timestamp, ApplyDriverRequest, ApproveDriverRequest, DriverProfile, ReviewWithAuthor, User,
};
use crate::error::is_unique_violation;
use crate::review::service as reviews;
use crate::AppState;

use super::error::{ApiError, ErrorCode, ValidationErrorBuilder};
use super::validation::{validate_address, validate_license_plate};

fn validate_apply_request(req: &ApplyDriverRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_address(&req.vehicle_description, "Vehicle description") {
        errors.add("vehicle_description", e);
    }
    if let Err(e) = validate_license_plate(&req.license_plate) {
        errors.add("license_plate", e);
    }
    if req.license_image.trim().is_empty() {
        errors.add("license_image", "License image is required");
    }

    errors.finish()
}

fn require_system_admin(user: &User) -> Result<(), ApiError> {
    if !user.is_system_admin {
        return Err(ApiError::new(
            ErrorCode::NotAuthorized,
            "Only system administrators can review driver applications",
        ));
    }
    Ok(())
}

async fn find_profile(state: &AppState, id: &str) -> Result<DriverProfile, ApiError> {
    sqlx::query_as::<_, DriverProfile>("SELECT * FROM driver_profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Driver not found"))
}

/// Apply to drive; the profile stays unapproved until an administrator
/// approves it
pub async fn apply(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<ApplyDriverRequest>,
) -> Result<(StatusCode, Json<DriverProfile>), ApiError> {
    validate_apply_request(&req)?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM driver_profiles WHERE user_id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::validation_field("driver", "You have already applied to drive"));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO driver_profiles (id, user_id, vehicle_description, license_plate, license_image, is_approved, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(req.vehicle_description.trim())
    .bind(req.license_plate.trim().to_uppercase())
    .bind(req.license_image.trim())
    .bind(now_timestamp())
    .execute(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::validation_field("license_plate", "This license plate is already registered")
        } else {
            e.into()
        }
    })?;

    let profile = find_profile(&state, &id).await?;
    info!(user_id = %user.id, driver_id = %profile.id, "Driver application submitted");
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn my_profile(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<DriverProfile>, ApiError> {
    let profile = sqlx::query_as::<_, DriverProfile>("SELECT * FROM driver_profiles WHERE user_id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("You have not applied to drive"))?;
    Ok(Json(profile))
}

pub async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    _user: User,
) -> Result<Json<DriverProfile>, ApiError> {
    Ok(Json(find_profile(&state, &id).await?))
}

/// Applications waiting for approval, oldest first
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<DriverProfile>>, ApiError> {
    require_system_admin(&user)?;

    let pending = sqlx::query_as::<_, DriverProfile>(
        "SELECT * FROM driver_profiles WHERE is_approved = 0 ORDER BY created_at ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(pending))
}

/// Approve or revoke a driver
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<ApproveDriverRequest>,
) -> Result<Json<DriverProfile>, ApiError> {
    if let Err(e) = require_system_admin(&user) {
        warn!(user_id = %user.id, driver_id = %id, "Non-admin attempted driver approval");
        return Err(e);
    }
    find_profile(&state, &id).await?;

    let approved_at = req.approved.then(now_timestamp);
    sqlx::query("UPDATE driver_profiles SET is_approved = ?, approved_at = ? WHERE id = ?")
        .bind(req.approved)
        .bind(&approved_at)
        .bind(&id)
        .execute(&state.db)
        .await?;

    let profile = find_profile(&state, &id).await?;
    info!(driver_id = %id, approved = req.approved, admin_id = %user.id, "Driver approval updated");
    Ok(Json(profile))
}

pub async fn driver_reviews(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    _user: User,
) -> Result<Json<Vec<ReviewWithAuthor>>, ApiError> {
    Ok(Json(reviews::driver_reviews(&state, &id).await?))
}
