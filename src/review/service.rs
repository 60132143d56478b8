use tracing::info;
use uuid::Uuid;

use super::rolling_average;
use crate::api::validation::{validate_comment, validate_stars};
use crate::db::{now_timestamp, CreateReviewRequest, DriverProfile, Review, ReviewWithAuthor, RideStatus, User};
use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::ride::service::fetch;
use crate::AppState;

/// A rider rates the driver of a completed ride, once per ride
pub async fn create_review(
    state: &AppState,
    user: &User,
    ride_id: &str,
    req: CreateReviewRequest,
) -> ServiceResult<Review> {
    validate_stars(req.stars).map_err(|e| ServiceError::validation("stars", e))?;
    let comment = req.comment.trim().to_string();
    validate_comment(Some(&comment)).map_err(|e| ServiceError::validation("comment", e))?;

    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    let rode: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM ride_riders WHERE ride_id = ? AND user_id = ?")
            .bind(ride_id)
            .bind(&user.id)
            .fetch_optional(&mut *tx)
            .await?;
    if rode.is_none() {
        return Err(ServiceError::not_authorized("Only riders of this ride can review it"));
    }
    if ride.status_enum() != RideStatus::Completed {
        return Err(ServiceError::invalid_state("Rides can be reviewed once they are completed"));
    }
    let driver_id = ride
        .driver_id
        .ok_or_else(|| ServiceError::invalid_state("This ride had no driver"))?;

    let profile: DriverProfile = sqlx::query_as("SELECT * FROM driver_profiles WHERE id = ?")
        .bind(&driver_id)
        .fetch_one(&mut *tx)
        .await?;

    let review_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO reviews (id, ride_id, driver_id, author_id, stars, comment, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&review_id)
    .bind(ride_id)
    .bind(&driver_id)
    .bind(&user.id)
    .bind(req.stars)
    .bind(&comment)
    .bind(now_timestamp())
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ServiceError::validation("ride_id", "You have already reviewed this ride")
        } else {
            ServiceError::Database(e)
        }
    })?;

    let average = rolling_average(profile.average_rating, profile.review_count, req.stars);
    sqlx::query("UPDATE driver_profiles SET average_rating = ?, review_count = review_count + 1 WHERE id = ?")
        .bind(average)
        .bind(&driver_id)
        .execute(&mut *tx)
        .await?;

    let review: Review = sqlx::query_as("SELECT * FROM reviews WHERE id = ?")
        .bind(&review_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(ride_id = %ride_id, driver_id = %driver_id, stars = req.stars, average, "Driver reviewed");
    Ok(review)
}

/// Reviews of a driver, newest first
pub async fn driver_reviews(state: &AppState, driver_id: &str) -> ServiceResult<Vec<ReviewWithAuthor>> {
    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM driver_profiles WHERE id = ?")
        .bind(driver_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ServiceError::not_found("Driver not found"));
    }

    let reviews = sqlx::query_as::<_, ReviewWithAuthor>(
        r#"
        SELECT rv.id, rv.ride_id, rv.driver_id, rv.author_id, u.name AS author_name,
               rv.stars, rv.comment, rv.created_at
        FROM reviews rv
        JOIN users u ON u.id = rv.author_id
        WHERE rv.driver_id = ?
        ORDER BY rv.created_at DESC
        "#,
    )
    .bind(driver_id)
    .fetch_all(&state.db)
    .await?;
    Ok(reviews)
}
