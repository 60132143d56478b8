//! Ride operations backed by the database.
//!
//! Every mutation takes `AppState::ride_writes`, opens a transaction, reads
//! the ride inside it, runs the lifecycle guards and the single-active-ride
//! check, and writes before committing. The lock makes the check-then-write
//! sequence atomic with respect to other mutations in this process.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use super::exclusivity::ensure_no_active_ride;
use super::lifecycle;
use crate::db::{
    now_timestamp, to_timestamp, CreateRideRequest, DriverProfile, LeaveRideResponse, PriceOption,
    Ride, RideListQuery, RideRider, RideSearchQuery, RideStatus, UpdateRideRequest, User,
    RIDE_SELECT,
};
use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::organization::service::{membership, require_member};
use crate::organization::Capabilities;
use crate::AppState;

pub async fn fetch(conn: &mut SqliteConnection, ride_id: &str) -> ServiceResult<Ride> {
    let sql = format!("{} WHERE r.id = ?", RIDE_SELECT);
    sqlx::query_as::<_, Ride>(&sql)
        .bind(ride_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Ride not found"))
}

async fn is_rider(conn: &mut SqliteConnection, ride_id: &str, user_id: &str) -> ServiceResult<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM ride_riders WHERE ride_id = ? AND user_id = ?")
            .bind(ride_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.is_some())
}

/// The user's driver profile, if it has been approved
pub async fn approved_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> ServiceResult<Option<DriverProfile>> {
    let profile = sqlx::query_as::<_, DriverProfile>(
        "SELECT * FROM driver_profiles WHERE user_id = ? AND is_approved = 1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(profile)
}

/// Organization rides are only visible to members; participants keep
/// access after leaving the organization.
async fn ensure_visible(conn: &mut SqliteConnection, ride: &Ride, user: &User) -> ServiceResult<()> {
    let Some(org_id) = ride.organization_id.as_deref() else {
        return Ok(());
    };
    if ride.is_driven_by(&user.id) || is_rider(conn, &ride.id, &user.id).await? {
        return Ok(());
    }
    if membership(conn, org_id, &user.id).await?.is_none() {
        return Err(ServiceError::not_authorized(
            "This ride belongs to an organization you are not a member of",
        ));
    }
    Ok(())
}

/// Organization membership and, when driving, the member's driver capability
async fn ensure_org_role(
    conn: &mut SqliteConnection,
    org_id: &str,
    user: &User,
    as_driver: bool,
) -> ServiceResult<()> {
    let member = require_member(conn, org_id, &user.id).await?;
    if as_driver && !Capabilities::from(&member).can_drive() {
        return Err(ServiceError::not_authorized(
            "You are not a driver in this organization",
        ));
    }
    Ok(())
}

fn parse_pickup_time(value: &str) -> ServiceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ServiceError::validation("pickup_time", "Pickup time must be an RFC 3339 timestamp"))
}

fn map_active_driver_conflict(err: sqlx::Error) -> ServiceError {
    // idx_rides_active_driver backs the driver side of the active ride check
    if is_unique_violation(&err) {
        ServiceError::AlreadyInActiveRide
    } else {
        ServiceError::Database(err)
    }
}

/// Create a rider request (no driver) or a driver post
pub async fn create(state: &AppState, user: &User, req: CreateRideRequest) -> ServiceResult<Ride> {
    let pickup_address = req.pickup_address.trim().to_string();
    let destination_address = req.destination_address.trim().to_string();
    if pickup_address.is_empty() {
        return Err(ServiceError::validation("pickup_address", "Pickup address is required"));
    }
    if destination_address.is_empty() {
        return Err(ServiceError::validation(
            "destination_address",
            "Destination address is required",
        ));
    }
    let pickup_time = parse_pickup_time(&req.pickup_time)?;
    if pickup_time <= Utc::now() {
        return Err(ServiceError::validation("pickup_time", "Pickup time must be in the future"));
    }
    let price_option: PriceOption = req
        .price_option
        .parse()
        .map_err(|e: String| ServiceError::validation("price_option", e))?;

    let rides = &state.config.rides;
    let as_driver = req.driver_id.is_some();
    let max_riders = req.max_riders.unwrap_or(if as_driver {
        rides.default_driver_capacity
    } else {
        rides.default_request_capacity
    });
    if max_riders < 1 || max_riders > rides.max_capacity {
        return Err(ServiceError::validation(
            "max_riders",
            format!("max_riders must be between 1 and {}", rides.max_capacity),
        ));
    }

    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let driver_id = match req.driver_id.as_deref() {
        Some(driver_id) => {
            let profile = approved_profile(&mut tx, &user.id).await?;
            match profile {
                Some(p) if p.id == driver_id => Some(p.id),
                _ => {
                    return Err(ServiceError::not_authorized(
                        "Only approved drivers can post rides, and only as themselves",
                    ))
                }
            }
        }
        None => None,
    };

    ensure_no_active_ride(&mut tx, &user.id).await?;

    if let Some(org_id) = req.organization_id.as_deref() {
        ensure_org_role(&mut tx, org_id, user, as_driver).await?;
    }

    let ride_id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    sqlx::query(
        r#"
        INSERT INTO rides (id, pickup_address, destination_address, pickup_time, max_riders,
                           price_option, status, driver_id, organization_id, driver_comment,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&ride_id)
    .bind(&pickup_address)
    .bind(&destination_address)
    .bind(to_timestamp(pickup_time))
    .bind(max_riders)
    .bind(price_option.to_string())
    .bind(&driver_id)
    .bind(&req.organization_id)
    .bind(&req.driver_comment)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .map_err(map_active_driver_conflict)?;

    if driver_id.is_none() {
        sqlx::query("INSERT INTO ride_riders (ride_id, user_id, comment, joined_at) VALUES (?, ?, ?, ?)")
            .bind(&ride_id)
            .bind(&user.id)
            .bind(&req.rider_comment)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }

    let ride = fetch(&mut tx, &ride_id).await?;
    tx.commit().await?;

    info!(
        ride_id = %ride.id,
        user_id = %user.id,
        phase = %ride.phase(),
        max_riders,
        "Ride created"
    );
    Ok(ride)
}

pub async fn join(
    state: &AppState,
    user: &User,
    ride_id: &str,
    comment: Option<String>,
) -> ServiceResult<Ride> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    if let Some(org_id) = ride.organization_id.as_deref() {
        if !ride.status_enum().is_terminal() {
            ensure_org_role(&mut tx, org_id, user, false).await?;
        }
    }
    let already_rider = is_rider(&mut tx, ride_id, &user.id).await?;
    lifecycle::check_join(&ride, &user.id, already_rider)?;
    ensure_no_active_ride(&mut tx, &user.id).await?;

    sqlx::query("INSERT INTO ride_riders (ride_id, user_id, comment, joined_at) VALUES (?, ?, ?, ?)")
        .bind(ride_id)
        .bind(&user.id)
        .bind(comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()))
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;
    touch(&mut tx, ride_id).await?;

    let ride = fetch(&mut tx, ride_id).await?;
    tx.commit().await?;

    info!(ride_id = %ride_id, user_id = %user.id, seats_left = ride.available_seats(), "Rider joined");
    Ok(ride)
}

pub async fn leave(state: &AppState, user: &User, ride_id: &str) -> ServiceResult<LeaveRideResponse> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    let member = is_rider(&mut tx, ride_id, &user.id).await?;
    lifecycle::check_leave(&ride, member)?;

    sqlx::query("DELETE FROM ride_riders WHERE ride_id = ? AND user_id = ?")
        .bind(ride_id)
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;

    let ride_cancelled = lifecycle::cancels_on_leave(&ride);
    if ride_cancelled {
        set_status(&mut tx, ride_id, RideStatus::Cancelled).await?;
    } else {
        touch(&mut tx, ride_id).await?;
    }
    tx.commit().await?;

    info!(ride_id = %ride_id, user_id = %user.id, ride_cancelled, "Rider left");
    Ok(LeaveRideResponse {
        message: if ride_cancelled {
            "Left the ride; the request had no riders left and was cancelled".to_string()
        } else {
            "Left the ride".to_string()
        },
        ride_id: ride_id.to_string(),
        ride_cancelled,
    })
}

/// An approved driver takes over a rider request
pub async fn accept(
    state: &AppState,
    user: &User,
    ride_id: &str,
    driver_comment: Option<String>,
) -> ServiceResult<Ride> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    let riding = is_rider(&mut tx, ride_id, &user.id).await?;
    lifecycle::check_accept(&ride, riding)?;

    let profile = approved_profile(&mut tx, &user.id)
        .await?
        .ok_or_else(|| ServiceError::not_authorized("Only approved drivers can accept rides"))?;
    if let Some(org_id) = ride.organization_id.as_deref() {
        ensure_org_role(&mut tx, org_id, user, true).await?;
    }
    ensure_no_active_ride(&mut tx, &user.id).await?;

    let result = sqlx::query(
        "UPDATE rides SET driver_id = ?, driver_comment = ?, updated_at = ?
         WHERE id = ? AND driver_id IS NULL AND status = 'active'",
    )
    .bind(&profile.id)
    .bind(driver_comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()))
    .bind(now_timestamp())
    .bind(ride_id)
    .execute(&mut *tx)
    .await
    .map_err(map_active_driver_conflict)?;
    if result.rows_affected() == 0 {
        return Err(ServiceError::invalid_state("This ride already has a driver"));
    }

    let ride = fetch(&mut tx, ride_id).await?;
    tx.commit().await?;

    info!(ride_id = %ride_id, driver_id = %profile.id, "Ride accepted by driver");
    Ok(ride)
}

pub async fn complete(state: &AppState, user: &User, ride_id: &str) -> ServiceResult<Ride> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    lifecycle::check_complete(&ride, &user.id)?;
    set_status(&mut tx, ride_id, RideStatus::Completed).await?;

    let ride = fetch(&mut tx, ride_id).await?;
    tx.commit().await?;

    info!(ride_id = %ride_id, riders = ride.rider_count, "Ride completed");
    Ok(ride)
}

pub async fn cancel(state: &AppState, user: &User, ride_id: &str) -> ServiceResult<Ride> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    let riding = is_rider(&mut tx, ride_id, &user.id).await?;
    lifecycle::check_cancel(&ride, &user.id, riding)?;
    set_status(&mut tx, ride_id, RideStatus::Cancelled).await?;

    let ride = fetch(&mut tx, ride_id).await?;
    tx.commit().await?;

    info!(ride_id = %ride_id, user_id = %user.id, "Ride cancelled");
    Ok(ride)
}

/// Edit an active ride. The driver edits a post; the sole rider edits their
/// own driverless request.
pub async fn update(
    state: &AppState,
    user: &User,
    ride_id: &str,
    req: UpdateRideRequest,
) -> ServiceResult<Ride> {
    let pickup_address = req.pickup_address.as_deref().map(str::trim);
    if pickup_address == Some("") {
        return Err(ServiceError::validation("pickup_address", "Pickup address is required"));
    }
    let destination_address = req.destination_address.as_deref().map(str::trim);
    if destination_address == Some("") {
        return Err(ServiceError::validation(
            "destination_address",
            "Destination address is required",
        ));
    }
    let pickup_time = req
        .pickup_time
        .as_deref()
        .map(parse_pickup_time)
        .transpose()?;
    if pickup_time.is_some_and(|t| t <= Utc::now()) {
        return Err(ServiceError::validation("pickup_time", "Pickup time must be in the future"));
    }
    let price_option: Option<PriceOption> = req
        .price_option
        .as_deref()
        .map(|p| p.parse().map_err(|e: String| ServiceError::validation("price_option", e)))
        .transpose()?;
    let max_capacity = state.config.rides.max_capacity;
    if let Some(max_riders) = req.max_riders {
        if max_riders < 1 || max_riders > max_capacity {
            return Err(ServiceError::validation(
                "max_riders",
                format!("max_riders must be between 1 and {}", max_capacity),
            ));
        }
    }

    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let ride = fetch(&mut tx, ride_id).await?;
    let riding = is_rider(&mut tx, ride_id, &user.id).await?;
    lifecycle::check_update(&ride, &user.id, riding, req.max_riders)?;
    if req.driver_comment.is_some() && !ride.has_driver() {
        return Err(ServiceError::validation(
            "driver_comment",
            "Only rides with a driver carry a driver comment",
        ));
    }

    // An empty driver comment clears it
    let driver_comment = req.driver_comment.as_deref().map(str::trim);
    sqlx::query(
        r#"
        UPDATE rides
        SET pickup_address = COALESCE(?, pickup_address),
            destination_address = COALESCE(?, destination_address),
            pickup_time = COALESCE(?, pickup_time),
            price_option = COALESCE(?, price_option),
            max_riders = COALESCE(?, max_riders),
            driver_comment = CASE WHEN ? THEN NULLIF(?, '') ELSE driver_comment END,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(pickup_address)
    .bind(destination_address)
    .bind(pickup_time.map(to_timestamp))
    .bind(price_option.map(|p| p.to_string()))
    .bind(req.max_riders)
    .bind(driver_comment.is_some())
    .bind(driver_comment)
    .bind(now_timestamp())
    .bind(ride_id)
    .execute(&mut *tx)
    .await?;

    let ride = fetch(&mut tx, ride_id).await?;
    tx.commit().await?;

    info!(ride_id = %ride_id, user_id = %user.id, max_riders = ride.max_riders, "Ride updated");
    Ok(ride)
}

async fn set_status(conn: &mut SqliteConnection, ride_id: &str, status: RideStatus) -> ServiceResult<()> {
    let now = now_timestamp();
    let completed_at = (status == RideStatus::Completed).then(|| now.clone());
    sqlx::query("UPDATE rides SET status = ?, completed_at = COALESCE(?, completed_at), updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(completed_at)
        .bind(&now)
        .bind(ride_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn touch(conn: &mut SqliteConnection, ride_id: &str) -> ServiceResult<()> {
    sqlx::query("UPDATE rides SET updated_at = ? WHERE id = ?")
        .bind(now_timestamp())
        .bind(ride_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get(state: &AppState, user: &User, ride_id: &str) -> ServiceResult<Ride> {
    let mut conn = state.db.acquire().await?;
    let ride = fetch(&mut conn, ride_id).await?;
    ensure_visible(&mut conn, &ride, user).await?;
    Ok(ride)
}

pub async fn riders(state: &AppState, user: &User, ride_id: &str) -> ServiceResult<Vec<RideRider>> {
    let mut conn = state.db.acquire().await?;
    let ride = fetch(&mut conn, ride_id).await?;
    ensure_visible(&mut conn, &ride, user).await?;

    let riders = sqlx::query_as::<_, RideRider>(
        r#"
        SELECT rr.user_id, u.name, u.email, rr.comment, rr.joined_at
        FROM ride_riders rr
        JOIN users u ON u.id = rr.user_id
        WHERE rr.ride_id = ?
        ORDER BY rr.joined_at ASC
        "#,
    )
    .bind(ride_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(riders)
}

/// Which side of the driver/rider split a listing shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// Driverless requests waiting for a driver
    RiderRequests,
    /// Rides offered by a driver
    DriverPosts,
}

/// Open, future rides. Without an organization only public rides are listed;
/// with one, the caller must be a member and only that organization's rides
/// are listed.
pub async fn list(
    state: &AppState,
    user: &User,
    listing: Listing,
    query: &RideListQuery,
) -> ServiceResult<Vec<Ride>> {
    let mut conn = state.db.acquire().await?;
    if let Some(org_id) = query.organization_id.as_deref() {
        require_member(&mut conn, org_id, &user.id).await?;
    }

    let page_limit = state.config.rides.listing_page_limit;
    let limit = query.limit.unwrap_or(page_limit).clamp(1, page_limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut qb = open_rides_query(query.organization_id.as_deref());
    match listing {
        Listing::RiderRequests => qb.push(" AND r.driver_id IS NULL"),
        Listing::DriverPosts => qb.push(" AND r.driver_id IS NOT NULL"),
    };
    qb.push(" ORDER BY r.pickup_time ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rides = qb.build_query_as::<Ride>().fetch_all(&mut *conn).await?;
    Ok(rides)
}

/// Active rides with a pickup time still ahead, scoped to one organization or
/// to public rides
fn open_rides_query(organization_id: Option<&str>) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(RIDE_SELECT);
    qb.push(" WHERE r.status = 'active' AND r.pickup_time > ")
        .push_bind(now_timestamp());
    match organization_id {
        Some(org_id) => {
            qb.push(" AND r.organization_id = ").push_bind(org_id.to_string());
        }
        None => {
            qb.push(" AND r.organization_id IS NULL");
        }
    }
    qb
}

/// Case-insensitive substring pattern with LIKE wildcards in the term escaped
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Search open rides the caller can see
pub async fn search(state: &AppState, user: &User, query: &RideSearchQuery) -> ServiceResult<Vec<Ride>> {
    let mut conn = state.db.acquire().await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(RIDE_SELECT);
    qb.push(" WHERE r.status = 'active' AND r.pickup_time > ")
        .push_bind(now_timestamp());

    match query.organization_id.as_deref() {
        Some(org_id) => {
            require_member(&mut conn, org_id, &user.id).await?;
            qb.push(" AND r.organization_id = ").push_bind(org_id.to_string());
        }
        None => {
            qb.push(
                " AND (r.organization_id IS NULL OR r.organization_id IN \
                 (SELECT organization_id FROM organization_members WHERE user_id = ",
            )
            .push_bind(user.id.clone())
            .push("))");
        }
    }

    if let Some(pickup) = query.pickup_address.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND LOWER(r.pickup_address) LIKE ")
            .push_bind(like_pattern(pickup))
            .push(" ESCAPE '\\'");
    }
    if let Some(dest) = query
        .destination_address
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        qb.push(" AND LOWER(r.destination_address) LIKE ")
            .push_bind(like_pattern(dest))
            .push(" ESCAPE '\\'");
    }
    if let Some(date) = query.date.as_deref() {
        let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| ServiceError::validation("date", "Date must be formatted as YYYY-MM-DD"))?;
        let start = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        let end = day.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|t| t.and_utc());
        if let (Some(start), Some(end)) = (start, end) {
            qb.push(" AND r.pickup_time >= ")
                .push_bind(to_timestamp(start))
                .push(" AND r.pickup_time < ")
                .push_bind(to_timestamp(end));
        }
    }
    if let Some(min_seats) = query.min_seats {
        qb.push(" AND r.max_riders - (SELECT COUNT(*) FROM ride_riders s WHERE s.ride_id = r.id) >= ")
            .push_bind(min_seats);
    }
    qb.push(" ORDER BY r.pickup_time ASC LIMIT ")
        .push_bind(state.config.rides.listing_page_limit);

    let rides = qb.build_query_as::<Ride>().fetch_all(&mut *conn).await?;
    Ok(rides)
}

/// Rides a user rides in or drives, newest pickup first. Visible to the user
/// and to system admins.
pub async fn user_rides(state: &AppState, caller: &User, user_id: &str) -> ServiceResult<Vec<Ride>> {
    if caller.id != user_id && !caller.is_system_admin {
        return Err(ServiceError::not_authorized("You can only list your own rides"));
    }

    let sql = format!(
        r#"{}
        WHERE EXISTS (SELECT 1 FROM ride_riders m WHERE m.ride_id = r.id AND m.user_id = ?)
           OR d.user_id = ?
        ORDER BY r.pickup_time DESC
        "#,
        RIDE_SELECT
    );
    let rides = sqlx::query_as::<_, Ride>(&sql)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&state.db)
        .await?;
    Ok(rides)
}

/// All rides of an organization, optionally filtered by status
pub async fn organization_rides(
    state: &AppState,
    user: &User,
    org_id: &str,
    status: Option<&str>,
) -> ServiceResult<Vec<Ride>> {
    let status: Option<RideStatus> = status
        .map(|s| s.parse().map_err(|e: String| ServiceError::validation("status", e)))
        .transpose()?;

    let mut conn = state.db.acquire().await?;
    require_member(&mut conn, org_id, &user.id).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(RIDE_SELECT);
    qb.push(" WHERE r.organization_id = ").push_bind(org_id.to_string());
    if let Some(status) = status {
        qb.push(" AND r.status = ").push_bind(status.to_string());
    }
    qb.push(" ORDER BY r.pickup_time DESC");

    let rides = qb.build_query_as::<Ride>().fetch_all(&mut *conn).await?;
    Ok(rides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateOrganizationRequest, RidePhase, UpdateMemberRoleRequest};
    use crate::organization::service as orgs;
    use crate::testing::{context, driver, tomorrow, user};
    use std::sync::Arc;

    fn request() -> CreateRideRequest {
        CreateRideRequest {
            pickup_address: "Mesa Court".to_string(),
            destination_address: "LAX".to_string(),
            pickup_time: tomorrow(),
            price_option: "gas".to_string(),
            ..Default::default()
        }
    }

    fn post(profile: &DriverProfile, max_riders: i64) -> CreateRideRequest {
        CreateRideRequest {
            driver_id: Some(profile.id.clone()),
            max_riders: Some(max_riders),
            driver_comment: Some("Leaving from the parking structure".to_string()),
            ..request()
        }
    }

    #[tokio::test]
    async fn test_request_defaults_to_single_seat_with_creator_as_rider() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;

        let ride = create(
            &ctx.state,
            &alice,
            CreateRideRequest {
                rider_comment: Some("Two suitcases".to_string()),
                ..request()
            },
        )
        .await
        .unwrap();
        assert_eq!(ride.max_riders, 1);
        assert_eq!(ride.rider_count, 1);
        assert_eq!(ride.available_seats(), 0);
        assert_eq!(ride.phase(), RidePhase::OpenRequest);

        let riders = riders(&ctx.state, &alice, &ride.id).await.unwrap();
        assert_eq!(riders.len(), 1);
        assert_eq!(riders[0].user_id, alice.id);
        assert_eq!(riders[0].comment.as_deref(), Some("Two suitcases"));
    }

    #[tokio::test]
    async fn test_third_join_on_two_seats_is_full() {
        let ctx = context().await;
        let (dana, profile) = driver(&ctx.state, "Dana").await;
        let ride = create(&ctx.state, &dana, post(&profile, 2)).await.unwrap();
        assert_eq!(ride.phase(), RidePhase::OpenPost);
        assert_eq!(ride.rider_count, 0);

        let a = user(&ctx.state, "Ann").await;
        let b = user(&ctx.state, "Ben").await;
        let c = user(&ctx.state, "Cal").await;
        join(&ctx.state, &a, &ride.id, Some("hi".into())).await.unwrap();
        let full = join(&ctx.state, &b, &ride.id, None).await.unwrap();
        assert_eq!(full.phase(), RidePhase::Full);
        assert_eq!(full.available_seats(), 0);

        assert!(matches!(
            join(&ctx.state, &c, &ride.id, None).await,
            Err(ServiceError::RideFull)
        ));
        let riders = riders(&ctx.state, &a, &ride.id).await.unwrap();
        assert_eq!(riders.len(), 2);
        assert!(riders.iter().all(|r| r.user_id != c.id));
    }

    #[tokio::test]
    async fn test_accept_then_second_accept_is_invalid_state() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let (bob, _) = driver(&ctx.state, "Bob").await;
        let (carol, _) = driver(&ctx.state, "Carol").await;
        let plain = user(&ctx.state, "Pat").await;

        let ride = create(&ctx.state, &alice, request()).await.unwrap();

        assert!(matches!(
            accept(&ctx.state, &plain, &ride.id, None).await,
            Err(ServiceError::NotAuthorized(_))
        ));

        let accepted = accept(&ctx.state, &bob, &ride.id, Some("On my way".into()))
            .await
            .unwrap();
        assert_eq!(accepted.driver_user_id.as_deref(), Some(bob.id.as_str()));
        assert_eq!(accepted.driver_comment.as_deref(), Some("On my way"));
        // A one-seat request already holds its requester, so it is a full post
        assert_eq!(accepted.phase(), RidePhase::Full);
        assert_eq!(accepted.available_seats(), 0);

        assert!(matches!(
            accept(&ctx.state, &carol, &ride.id, None).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_joined_user_cannot_create_request() {
        let ctx = context().await;
        let (dana, profile) = driver(&ctx.state, "Dana").await;
        let ride = create(&ctx.state, &dana, post(&profile, 3)).await.unwrap();
        let alice = user(&ctx.state, "Alice").await;
        join(&ctx.state, &alice, &ride.id, None).await.unwrap();

        assert!(matches!(
            create(&ctx.state, &alice, request()).await,
            Err(ServiceError::AlreadyInActiveRide)
        ));
        // The driver is busy too
        assert!(matches!(
            create(&ctx.state, &dana, post(&profile, 3)).await,
            Err(ServiceError::AlreadyInActiveRide)
        ));
    }

    #[tokio::test]
    async fn test_leave_rules_and_request_cancellation() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let bob = user(&ctx.state, "Bob").await;
        let ride = create(&ctx.state, &alice, request()).await.unwrap();

        assert!(matches!(
            leave(&ctx.state, &bob, &ride.id).await,
            Err(ServiceError::NotAMember(_))
        ));
        assert_eq!(get(&ctx.state, &alice, &ride.id).await.unwrap().rider_count, 1);

        let left = leave(&ctx.state, &alice, &ride.id).await.unwrap();
        assert!(left.ride_cancelled);
        let ride = get(&ctx.state, &alice, &ride.id).await.unwrap();
        assert_eq!(ride.phase(), RidePhase::Cancelled);

        // Alice is free to request again
        create(&ctx.state, &alice, request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_is_driver_only_and_terminal() {
        let ctx = context().await;
        let (dana, profile) = driver(&ctx.state, "Dana").await;
        let alice = user(&ctx.state, "Alice").await;
        let bob = user(&ctx.state, "Bob").await;
        let ride = create(&ctx.state, &dana, post(&profile, 3)).await.unwrap();
        join(&ctx.state, &alice, &ride.id, None).await.unwrap();

        assert!(matches!(
            complete(&ctx.state, &alice, &ride.id).await,
            Err(ServiceError::NotAuthorized(_))
        ));

        let done = complete(&ctx.state, &dana, &ride.id).await.unwrap();
        assert_eq!(done.status_enum(), RideStatus::Completed);
        assert!(done.completed_at.is_some());

        assert!(matches!(
            join(&ctx.state, &bob, &ride.id, None).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            leave(&ctx.state, &alice, &ride.id).await,
            Err(ServiceError::InvalidState(_))
        ));
        let (carol, _) = driver(&ctx.state, "Carol").await;
        assert!(matches!(
            accept(&ctx.state, &carol, &ride.id, None).await,
            Err(ServiceError::InvalidState(_))
        ));

        // Completed rides no longer hold anyone
        create(&ctx.state, &alice, request()).await.unwrap();
        create(&ctx.state, &dana, post(&profile, 2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_permissions() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let bob = user(&ctx.state, "Bob").await;
        let ride = create(&ctx.state, &alice, request()).await.unwrap();

        assert!(matches!(
            cancel(&ctx.state, &bob, &ride.id).await,
            Err(ServiceError::NotAuthorized(_))
        ));
        let cancelled = cancel(&ctx.state, &alice, &ride.id).await.unwrap();
        assert_eq!(cancelled.phase(), RidePhase::Cancelled);
        assert!(matches!(
            cancel(&ctx.state, &alice, &ride.id).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_posting_as_someone_else_is_rejected() {
        let ctx = context().await;
        let (_, profile) = driver(&ctx.state, "Dana").await;
        let alice = user(&ctx.state, "Alice").await;

        assert!(matches!(
            create(&ctx.state, &alice, post(&profile, 2)).await,
            Err(ServiceError::NotAuthorized(_))
        ));
        assert!(matches!(
            create(
                &ctx.state,
                &alice,
                CreateRideRequest {
                    max_riders: Some(99),
                    ..request()
                }
            )
            .await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            create(
                &ctx.state,
                &alice,
                CreateRideRequest {
                    pickup_time: "2001-01-01T00:00:00Z".to_string(),
                    ..request()
                }
            )
            .await,
            Err(ServiceError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_joins_on_last_seat() {
        let ctx = context().await;
        let (dana, profile) = driver(&ctx.state, "Dana").await;
        let ride = create(&ctx.state, &dana, post(&profile, 1)).await.unwrap();

        let mut riders = Vec::new();
        for i in 0..8 {
            riders.push(user(&ctx.state, &format!("Rider{}", i)).await);
        }

        let mut handles = Vec::new();
        for rider in riders {
            let state = Arc::clone(&ctx.state);
            let ride_id = ride.id.clone();
            handles.push(tokio::spawn(async move {
                join(&state, &rider, &ride_id, None).await
            }));
        }

        let mut joined = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => joined += 1,
                Err(ServiceError::RideFull) => full += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(joined, 1);
        assert_eq!(full, 7);
        assert_eq!(get(&ctx.state, &dana, &ride.id).await.unwrap().rider_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_joins_by_one_user_hold_one_ride() {
        let ctx = context().await;
        let (d1, p1) = driver(&ctx.state, "Dana").await;
        let (d2, p2) = driver(&ctx.state, "Dev").await;
        let r1 = create(&ctx.state, &d1, post(&p1, 3)).await.unwrap();
        let r2 = create(&ctx.state, &d2, post(&p2, 3)).await.unwrap();
        let alice = user(&ctx.state, "Alice").await;

        let (a, b) = tokio::join!(
            join(&ctx.state, &alice, &r1.id, None),
            join(&ctx.state, &alice, &r2.id, None)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(user_rides(&ctx.state, &alice, &alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listings_split_and_scope() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let owner = user(&ctx.state, "Olivia").await;
        let (eve, profile) = driver(&ctx.state, "Eve").await;
        let outsider = user(&ctx.state, "Otto").await;

        let org = orgs::create(
            &ctx.state,
            &owner,
            CreateOrganizationRequest {
                name: "Ski Club".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
        orgs::join(&ctx.state, &eve, &org.access_code.clone().unwrap())
            .await
            .unwrap();

        let request_ride = create(&ctx.state, &alice, request()).await.unwrap();

        // An approved driver still needs the organization's driver capability
        let org_post = CreateRideRequest {
            organization_id: Some(org.id.clone()),
            ..post(&profile, 3)
        };
        assert!(matches!(
            create(&ctx.state, &eve, org_post.clone()).await,
            Err(ServiceError::NotAuthorized(_))
        ));
        orgs::update_member_role(
            &ctx.state,
            &owner,
            &org.id,
            &eve.id,
            UpdateMemberRoleRequest {
                is_admin: None,
                is_driver: Some(true),
            },
        )
        .await
        .unwrap();
        let org_ride = create(&ctx.state, &eve, org_post).await.unwrap();

        let public_requests = list(&ctx.state, &outsider, Listing::RiderRequests, &RideListQuery::default())
            .await
            .unwrap();
        assert_eq!(public_requests.len(), 1);
        assert_eq!(public_requests[0].id, request_ride.id);

        let public_posts = list(&ctx.state, &outsider, Listing::DriverPosts, &RideListQuery::default())
            .await
            .unwrap();
        assert!(public_posts.is_empty());

        let scoped = RideListQuery {
            organization_id: Some(org.id.clone()),
            ..Default::default()
        };
        assert!(matches!(
            list(&ctx.state, &outsider, Listing::DriverPosts, &scoped).await,
            Err(ServiceError::NotAuthorized(_))
        ));
        let org_posts = list(&ctx.state, &owner, Listing::DriverPosts, &scoped).await.unwrap();
        assert_eq!(org_posts.len(), 1);
        assert_eq!(org_posts[0].id, org_ride.id);

        assert!(matches!(
            get(&ctx.state, &outsider, &org_ride.id).await,
            Err(ServiceError::NotAuthorized(_))
        ));
        assert!(matches!(
            join(&ctx.state, &outsider, &org_ride.id, None).await,
            Err(ServiceError::NotAuthorized(_))
        ));
        join(&ctx.state, &owner, &org_ride.id, None).await.unwrap();

        let found = search(
            &ctx.state,
            &outsider,
            &RideSearchQuery {
                destination_address: Some("lax".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, request_ride.id);

        // Members see the organization's rides in search as well
        let found = search(
            &ctx.state,
            &owner,
            &RideSearchQuery {
                min_seats: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, org_ride.id);

        let org_rides = organization_rides(&ctx.state, &owner, &org.id, Some("active")).await.unwrap();
        assert_eq!(org_rides.len(), 1);
        assert!(organization_rides(&ctx.state, &owner, &org.id, Some("completed"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_past_rides_are_not_listed() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let ride = create(&ctx.state, &alice, request()).await.unwrap();
        sqlx::query("UPDATE rides SET pickup_time = '2001-01-01T00:00:00Z' WHERE id = ?")
            .bind(&ride.id)
            .execute(&ctx.state.db)
            .await
            .unwrap();

        let listed = list(&ctx.state, &alice, Listing::RiderRequests, &RideListQuery::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
        // Still the user's ride, still active
        let mine = user_rides(&ctx.state, &alice, &alice.id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status_enum(), RideStatus::Active);
    }

    #[tokio::test]
    async fn test_user_rides_privacy() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let bob = user(&ctx.state, "Bob").await;
        assert!(matches!(
            user_rides(&ctx.state, &bob, &alice.id).await,
            Err(ServiceError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_accepting_roomy_request_opens_it_as_post() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let (bob, _) = driver(&ctx.state, "Bob").await;
        let ride = create(
            &ctx.state,
            &alice,
            CreateRideRequest {
                max_riders: Some(2),
                ..request()
            },
        )
        .await
        .unwrap();
        assert_eq!(ride.phase(), RidePhase::OpenRequest);

        let accepted = accept(&ctx.state, &bob, &ride.id, None).await.unwrap();
        assert_eq!(accepted.phase(), RidePhase::OpenPost);
        assert_eq!(accepted.available_seats(), 1);

        let pat = user(&ctx.state, "Pat").await;
        let full = join(&ctx.state, &pat, &ride.id, None).await.unwrap();
        assert_eq!(full.phase(), RidePhase::Full);
    }

    #[tokio::test]
    async fn test_update_by_driver_and_requester() {
        let ctx = context().await;
        let (dana, profile) = driver(&ctx.state, "Dana").await;
        let ride = create(&ctx.state, &dana, post(&profile, 3)).await.unwrap();
        let ann = user(&ctx.state, "Ann").await;
        let ben = user(&ctx.state, "Ben").await;
        join(&ctx.state, &ann, &ride.id, None).await.unwrap();
        join(&ctx.state, &ben, &ride.id, None).await.unwrap();

        let updated = update(
            &ctx.state,
            &dana,
            &ride.id,
            UpdateRideRequest {
                destination_address: Some("  SNA  ".to_string()),
                price_option: Some("free".to_string()),
                max_riders: Some(2),
                driver_comment: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.destination_address, "SNA");
        assert_eq!(updated.pickup_address, "Mesa Court");
        assert_eq!(updated.price_option_enum(), PriceOption::Free);
        assert_eq!(updated.phase(), RidePhase::Full);
        assert_eq!(updated.driver_comment, None);

        assert!(matches!(
            update(
                &ctx.state,
                &dana,
                &ride.id,
                UpdateRideRequest {
                    max_riders: Some(1),
                    ..Default::default()
                },
            )
            .await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            update(
                &ctx.state,
                &dana,
                &ride.id,
                UpdateRideRequest {
                    max_riders: Some(ctx.state.config.rides.max_capacity + 1),
                    ..Default::default()
                },
            )
            .await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            update(
                &ctx.state,
                &dana,
                &ride.id,
                UpdateRideRequest {
                    pickup_time: Some("2001-01-01T00:00:00Z".to_string()),
                    ..Default::default()
                },
            )
            .await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            update(&ctx.state, &ann, &ride.id, UpdateRideRequest::default()).await,
            Err(ServiceError::NotAuthorized(_))
        ));

        // The requester edits their own request
        let carol = user(&ctx.state, "Carol").await;
        let request_ride = create(&ctx.state, &carol, request()).await.unwrap();
        let widened = update(
            &ctx.state,
            &carol,
            &request_ride.id,
            UpdateRideRequest {
                max_riders: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(widened.max_riders, 3);
        assert_eq!(widened.phase(), RidePhase::OpenRequest);

        cancel(&ctx.state, &dana, &ride.id).await.unwrap();
        assert!(matches!(
            update(&ctx.state, &dana, &ride.id, UpdateRideRequest::default()).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let ctx = context().await;
        let alice = user(&ctx.state, "Alice").await;
        let ride = create(
            &ctx.state,
            &alice,
            CreateRideRequest {
                pickup_address: "Lot_5 Anteater Drive".to_string(),
                ..request()
            },
        )
        .await
        .unwrap();

        let by_pickup = |term: &str| RideSearchQuery {
            pickup_address: Some(term.to_string()),
            ..Default::default()
        };
        assert!(search(&ctx.state, &alice, &by_pickup("%")).await.unwrap().is_empty());
        assert!(search(&ctx.state, &alice, &by_pickup("lotx5")).await.unwrap().is_empty());
        let found = search(&ctx.state, &alice, &by_pickup("lot_5")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ride.id);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Mesa"), "%mesa%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
