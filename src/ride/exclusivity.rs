//! Single active ride per user.
//!
//! A user holds an active ride when they are a rider on, or the assigned
//! driver of, a ride whose stored status is `active`. Mutating operations run
//! this check inside their write transaction while holding the ride write
//! lock, so two concurrent requests from the same user cannot both pass it.

use sqlx::SqliteConnection;

use crate::error::{ServiceError, ServiceResult};

/// Id of the user's active ride, as rider or as driver
pub async fn active_ride_id(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT r.id FROM rides r
        WHERE r.status = 'active'
          AND (
            EXISTS (SELECT 1 FROM ride_riders rr WHERE rr.ride_id = r.id AND rr.user_id = ?)
            OR r.driver_id IN (SELECT d.id FROM driver_profiles d WHERE d.user_id = ?)
          )
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| r.0))
}

/// Fails with `AlreadyInActiveRide` when the user already holds an active ride
pub async fn ensure_no_active_ride(conn: &mut SqliteConnection, user_id: &str) -> ServiceResult<()> {
    if let Some(ride_id) = active_ride_id(conn, user_id).await? {
        tracing::debug!(user_id = %user_id, ride_id = %ride_id, "User already has an active ride");
        return Err(ServiceError::AlreadyInActiveRide);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use crate::db::{self, now_timestamp};

    async fn seed(pool: &db::DbPool) {
        let now = now_timestamp();
        for (id, email) in [("u1", "a@uci.edu"), ("u2", "b@uci.edu"), ("u3", "c@uci.edu")] {
            sqlx::query(
                "INSERT INTO users (id, email, name, gender, preferred_contact, created_at, updated_at)
                 VALUES (?, ?, ?, 2, 'text', ?, ?)",
            )
            .bind(id)
            .bind(email)
            .bind(id)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .unwrap();
        }
        sqlx::query(
            "INSERT INTO driver_profiles (id, user_id, vehicle_description, license_plate, license_image, is_approved, created_at)
             VALUES ('d2', 'u2', 'Civic', '8ABC123', 'img', 1, ?)",
        )
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_ride(pool: &db::DbPool, id: &str, status: &str, driver: Option<&str>) {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO rides (id, pickup_address, destination_address, pickup_time, max_riders, status, driver_id, created_at, updated_at)
             VALUES (?, 'A', 'B', '2030-01-01T10:00:00Z', 3, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(status)
        .bind(driver)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_rider_and_driver_memberships_count() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path()).await.unwrap();
        seed(&pool).await;
        insert_ride(&pool, "r1", "active", Some("d2")).await;
        sqlx::query("INSERT INTO ride_riders (ride_id, user_id, joined_at) VALUES ('r1', 'u1', ?)")
            .bind(now_timestamp())
            .execute(&pool)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(active_ride_id(&mut conn, "u1").await.unwrap().as_deref(), Some("r1"));
        assert_eq!(active_ride_id(&mut conn, "u2").await.unwrap().as_deref(), Some("r1"));
        assert_eq!(active_ride_id(&mut conn, "u3").await.unwrap(), None);
        assert!(matches!(
            ensure_no_active_ride(&mut conn, "u1").await,
            Err(ServiceError::AlreadyInActiveRide)
        ));
        assert_ok!(ensure_no_active_ride(&mut conn, "u3").await);
    }

    #[tokio::test]
    async fn test_terminated_rides_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path()).await.unwrap();
        seed(&pool).await;
        insert_ride(&pool, "done", "completed", Some("d2")).await;
        insert_ride(&pool, "gone", "cancelled", None).await;
        for ride in ["done", "gone"] {
            sqlx::query("INSERT INTO ride_riders (ride_id, user_id, joined_at) VALUES (?, 'u1', ?)")
                .bind(ride)
                .bind(now_timestamp())
                .execute(&pool)
                .await
                .unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(active_ride_id(&mut conn, "u1").await.unwrap(), None);
        assert_eq!(active_ride_id(&mut conn, "u2").await.unwrap(), None);
    }
}
