//! Ride endpoints. Handlers validate input, call the ride service and shape
//! the result into [`RideResponse`] payloads.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    AcceptRideRequest, CreateReviewRequest, CreateRideRequest, JoinRideRequest, LeaveRideResponse,
    Review, RideListQuery, RideResponse, RideRider, RideSearchQuery, UpdateRideRequest, User,
};
use crate::review::service as reviews;
use crate::ride::service::{self as rides, Listing};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_comment, validate_create_ride, validate_date, validate_update_ride,
};

fn responses(rides: Vec<crate::db::Ride>) -> Json<Vec<RideResponse>> {
    Json(rides.into_iter().map(RideResponse::from).collect())
}

pub async fn create_ride(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<RideResponse>), ApiError> {
    validate_create_ride(&req, &state.config.rides)?;
    let ride = rides::create(&state, &user, req).await?;
    Ok((StatusCode::CREATED, Json(ride.into())))
}

pub async fn rider_requests(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<RideListQuery>,
) -> Result<Json<Vec<RideResponse>>, ApiError> {
    let rides = rides::list(&state, &user, Listing::RiderRequests, &query).await?;
    Ok(responses(rides))
}

pub async fn driver_posts(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<RideListQuery>,
) -> Result<Json<Vec<RideResponse>>, ApiError> {
    let rides = rides::list(&state, &user, Listing::DriverPosts, &query).await?;
    Ok(responses(rides))
}

pub async fn search_rides(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<RideSearchQuery>,
) -> Result<Json<Vec<RideResponse>>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref date) = query.date {
        if let Err(e) = validate_date(date) {
            errors.add("date", e);
        }
    }
    if query.min_seats.is_some_and(|n| n < 0) {
        errors.add("min_seats", "min_seats cannot be negative");
    }
    errors.finish()?;

    let rides = rides::search(&state, &user, &query).await?;
    Ok(responses(rides))
}

pub async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = rides::get(&state, &user, &id).await?;
    Ok(Json(ride.into()))
}

pub async fn update_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<UpdateRideRequest>,
) -> Result<Json<RideResponse>, ApiError> {
    validate_update_ride(&req, &state.config.rides)?;
    let ride = rides::update(&state, &user, &id, req).await?;
    Ok(Json(ride.into()))
}

pub async fn join_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    body: Option<Json<JoinRideRequest>>,
) -> Result<Json<RideResponse>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    validate_comment(req.user_comment.as_deref())
        .map_err(|e| ApiError::validation_field("user_comment", e))?;

    let ride = rides::join(&state, &user, &id, req.user_comment).await?;
    Ok(Json(ride.into()))
}

pub async fn leave_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<LeaveRideResponse>, ApiError> {
    Ok(Json(rides::leave(&state, &user, &id).await?))
}

/// An approved driver takes a rider request
pub async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    body: Option<Json<AcceptRideRequest>>,
) -> Result<Json<RideResponse>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    validate_comment(req.driver_comment.as_deref())
        .map_err(|e| ApiError::validation_field("driver_comment", e))?;

    let ride = rides::accept(&state, &user, &id, req.driver_comment).await?;
    Ok(Json(ride.into()))
}

pub async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = rides::complete(&state, &user, &id).await?;
    Ok(Json(ride.into()))
}

pub async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = rides::cancel(&state, &user, &id).await?;
    Ok(Json(ride.into()))
}

pub async fn list_riders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<Vec<RideRider>>, ApiError> {
    Ok(Json(rides::riders(&state, &user, &id).await?))
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    let review = reviews::create_review(&state, &user, &id, req).await?;
    Ok((StatusCode::CREATED, Json(review)))
}
