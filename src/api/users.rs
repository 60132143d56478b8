//! User profile endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::db::{now_timestamp, DbPool, DriverProfile, RideResponse, UpdateProfileRequest, User, UserResponse};
use crate::ride::service as rides;
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_gender, validate_name, validate_preferred_contact};

/// Profile payload, including the user's driver standing
pub async fn user_response(pool: &DbPool, user: User) -> Result<UserResponse, ApiError> {
    let profile = sqlx::query_as::<_, DriverProfile>("SELECT * FROM driver_profiles WHERE user_id = ?")
        .bind(&user.id)
        .fetch_optional(pool)
        .await?;
    Ok(UserResponse::new(user, profile.as_ref()))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    _user: User,
) -> Result<Json<UserResponse>, ApiError> {
    let found = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user_response(&state.db, found).await?))
}

fn validate_update_request(req: &UpdateProfileRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(ref name) = req.name {
        if let Err(e) = validate_name(name) {
            errors.add("name", e);
        }
    }
    if let Some(gender) = req.gender {
        if let Err(e) = validate_gender(gender) {
            errors.add("gender", e);
        }
    }
    if let Some(ref contact) = req.preferred_contact {
        if let Err(e) = validate_preferred_contact(contact) {
            errors.add("preferred_contact", e);
        }
    }

    errors.finish()
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    validate_update_request(&req)?;

    let name = req.name.as_deref().map(str::trim).unwrap_or(&user.name);
    let gender = req.gender.unwrap_or(user.gender);
    let contact = req
        .preferred_contact
        .as_deref()
        .map(str::trim)
        .unwrap_or(&user.preferred_contact);

    sqlx::query("UPDATE users SET name = ?, gender = ?, preferred_contact = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(gender)
        .bind(contact)
        .bind(now_timestamp())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    let updated = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_one(&state.db)
        .await?;
    info!(user_id = %updated.id, "Profile updated");
    Ok(Json(user_response(&state.db, updated).await?))
}

/// Rides the user rides in or drives; clients derive active-ride status from it
pub async fn user_rides(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<Vec<RideResponse>>, ApiError> {
    let rides = rides::user_rides(&state, &user, &id).await?;
    Ok(Json(rides.into_iter().map(RideResponse::from).collect()))
}
