//! Ride lifecycle state machine.
//!
//! The stored row only carries `status`, `driver_id` and the rider count; the
//! phase (`open_request`, `open_post`, `full`, `completed`, `cancelled`) is
//! derived from those. The guards below decide whether a transition may be
//! applied to a ride as read inside the current write transaction. They are
//! pure so the rules can be tested without a database.

use crate::db::{Ride, RidePhase, RideStatus};
use crate::error::{ServiceError, ServiceResult};

/// Operations that move a ride through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Join,
    Leave,
    Accept,
    Complete,
    Cancel,
    Update,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Transition::Join => "join",
            Transition::Leave => "leave",
            Transition::Accept => "accept",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
            Transition::Update => "edit",
        };
        write!(f, "{}", s)
    }
}

impl Ride {
    /// Seats still open, never negative
    pub fn available_seats(&self) -> i64 {
        (self.max_riders - self.rider_count).max(0)
    }

    pub fn has_driver(&self) -> bool {
        self.driver_id.is_some()
    }

    pub fn is_driven_by(&self, user_id: &str) -> bool {
        self.driver_user_id.as_deref() == Some(user_id)
    }

    pub fn phase(&self) -> RidePhase {
        match self.status_enum() {
            RideStatus::Completed => RidePhase::Completed,
            RideStatus::Cancelled => RidePhase::Cancelled,
            RideStatus::Active if !self.has_driver() => RidePhase::OpenRequest,
            RideStatus::Active if self.available_seats() == 0 => RidePhase::Full,
            RideStatus::Active => RidePhase::OpenPost,
        }
    }
}

/// Fails with `InvalidState` when the ride is completed or cancelled
pub fn ensure_active(ride: &Ride, transition: Transition) -> ServiceResult<()> {
    if ride.status_enum().is_terminal() {
        return Err(ServiceError::invalid_state(format!(
            "Cannot {} a ride that is {}",
            transition,
            ride.status_enum()
        )));
    }
    Ok(())
}

/// Checks that `user_id` may join. `is_rider` tells whether the caller
/// already holds a membership on this ride.
pub fn check_join(ride: &Ride, user_id: &str, is_rider: bool) -> ServiceResult<()> {
    ensure_active(ride, Transition::Join)?;
    if is_rider {
        return Err(ServiceError::AlreadyMember(
            "You are already a rider on this ride".to_string(),
        ));
    }
    if ride.is_driven_by(user_id) {
        return Err(ServiceError::not_authorized(
            "The driver cannot join their own ride as a rider",
        ));
    }
    if ride.available_seats() == 0 {
        return Err(ServiceError::RideFull);
    }
    Ok(())
}

pub fn check_leave(ride: &Ride, is_rider: bool) -> ServiceResult<()> {
    ensure_active(ride, Transition::Leave)?;
    if !is_rider {
        return Err(ServiceError::NotAMember(
            "You are not a rider on this ride".to_string(),
        ));
    }
    Ok(())
}

/// Checks that an approved driver may take over a rider request
pub fn check_accept(ride: &Ride, is_rider: bool) -> ServiceResult<()> {
    ensure_active(ride, Transition::Accept)?;
    if ride.has_driver() {
        return Err(ServiceError::invalid_state("This ride already has a driver"));
    }
    if is_rider {
        return Err(ServiceError::not_authorized(
            "You cannot drive a ride you are riding in",
        ));
    }
    Ok(())
}

/// Only the assigned driver completes, and only while the ride is active
pub fn check_complete(ride: &Ride, user_id: &str) -> ServiceResult<()> {
    ensure_active(ride, Transition::Complete)?;
    if !ride.is_driven_by(user_id) {
        return Err(ServiceError::not_authorized(
            "Only the assigned driver can complete this ride",
        ));
    }
    Ok(())
}

/// The assigned driver, or the sole rider of a driverless request
fn manages(ride: &Ride, user_id: &str, is_rider: bool) -> bool {
    let owns_request = !ride.has_driver() && is_rider && ride.rider_count == 1;
    ride.is_driven_by(user_id) || owns_request
}

/// The assigned driver cancels a post; the sole rider cancels their own
/// driverless request.
pub fn check_cancel(ride: &Ride, user_id: &str, is_rider: bool) -> ServiceResult<()> {
    ensure_active(ride, Transition::Cancel)?;
    if !manages(ride, user_id, is_rider) {
        return Err(ServiceError::not_authorized(
            "Only the driver or the requester can cancel this ride",
        ));
    }
    Ok(())
}

/// Editing follows the same ownership as cancelling. A new capacity must
/// still hold everyone already on board.
pub fn check_update(
    ride: &Ride,
    user_id: &str,
    is_rider: bool,
    max_riders: Option<i64>,
) -> ServiceResult<()> {
    ensure_active(ride, Transition::Update)?;
    if !manages(ride, user_id, is_rider) {
        return Err(ServiceError::not_authorized(
            "Only the driver or the requester can edit this ride",
        ));
    }
    if let Some(max_riders) = max_riders {
        if max_riders < ride.rider_count {
            return Err(ServiceError::validation(
                "max_riders",
                format!(
                    "max_riders cannot be lower than the {} riders already on this ride",
                    ride.rider_count
                ),
            ));
        }
    }
    Ok(())
}

/// A driverless request left without riders has nobody to drive for
pub fn cancels_on_leave(ride: &Ride) -> bool {
    !ride.has_driver() && ride.rider_count <= 1
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio_test::assert_ok;

    pub(crate) fn ride(max_riders: i64, rider_count: i64, driver: Option<&str>) -> Ride {
        Ride {
            id: "ride-1".to_string(),
            pickup_address: "Mesa Court".to_string(),
            destination_address: "John Wayne Airport".to_string(),
            pickup_time: "2030-01-01T10:00:00Z".to_string(),
            max_riders,
            price_option: "gas".to_string(),
            status: "active".to_string(),
            driver_id: driver.map(|_| "driver-profile".to_string()),
            organization_id: None,
            driver_comment: None,
            created_at: "2029-12-31T10:00:00Z".to_string(),
            updated_at: "2029-12-31T10:00:00Z".to_string(),
            completed_at: None,
            driver_user_id: driver.map(str::to_string),
            rider_count,
        }
    }

    fn with_status(mut ride: Ride, status: RideStatus) -> Ride {
        ride.status = status.to_string();
        ride
    }

    #[test]
    fn test_phase_derivation() {
        assert_eq!(ride(1, 1, None).phase(), RidePhase::OpenRequest);
        assert_eq!(ride(3, 1, Some("d")).phase(), RidePhase::OpenPost);
        assert_eq!(ride(3, 0, Some("d")).phase(), RidePhase::OpenPost);
        assert_eq!(ride(2, 2, Some("d")).phase(), RidePhase::Full);
        assert_eq!(
            with_status(ride(2, 2, Some("d")), RideStatus::Completed).phase(),
            RidePhase::Completed
        );
        assert_eq!(
            with_status(ride(1, 1, None), RideStatus::Cancelled).phase(),
            RidePhase::Cancelled
        );
    }

    #[test]
    fn test_available_seats_never_negative() {
        assert_eq!(ride(4, 1, Some("d")).available_seats(), 3);
        assert_eq!(ride(2, 2, Some("d")).available_seats(), 0);
        // Capacity lowered below the current occupancy
        assert_eq!(ride(1, 3, Some("d")).available_seats(), 0);
    }

    #[test]
    fn test_join_rules() {
        let open = ride(2, 1, Some("driver"));
        assert_ok!(check_join(&open, "rider", false));
        assert!(matches!(
            check_join(&open, "rider", true),
            Err(ServiceError::AlreadyMember(_))
        ));
        assert!(matches!(
            check_join(&open, "driver", false),
            Err(ServiceError::NotAuthorized(_))
        ));
        assert!(matches!(
            check_join(&ride(2, 2, Some("driver")), "rider", false),
            Err(ServiceError::RideFull)
        ));
        // A request can be joined while it still has room
        assert_ok!(check_join(&ride(2, 1, None), "rider", false));
    }

    #[test]
    fn test_terminal_rides_reject_every_transition() {
        for status in [RideStatus::Completed, RideStatus::Cancelled] {
            let done = with_status(ride(3, 1, Some("driver")), status);
            assert!(matches!(
                check_join(&done, "rider", false),
                Err(ServiceError::InvalidState(_))
            ));
            assert!(matches!(
                check_leave(&done, true),
                Err(ServiceError::InvalidState(_))
            ));
            assert!(matches!(
                check_accept(&done, false),
                Err(ServiceError::InvalidState(_))
            ));
            assert!(matches!(
                check_complete(&done, "driver"),
                Err(ServiceError::InvalidState(_))
            ));
            assert!(matches!(
                check_cancel(&done, "driver", false),
                Err(ServiceError::InvalidState(_))
            ));
            assert!(matches!(
                check_update(&done, "driver", false, None),
                Err(ServiceError::InvalidState(_))
            ));
            // The lifecycle state is reported before who is asking
            assert!(matches!(
                check_complete(&done, "someone-else"),
                Err(ServiceError::InvalidState(_))
            ));
            assert!(matches!(
                check_cancel(&done, "someone-else", false),
                Err(ServiceError::InvalidState(_))
            ));
        }
    }

    #[test]
    fn test_accept_only_from_open_request() {
        assert_ok!(check_accept(&ride(1, 1, None), false));
        assert!(matches!(
            check_accept(&ride(3, 0, Some("driver")), false),
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            check_accept(&ride(1, 1, None), true),
            Err(ServiceError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_complete_requires_assigned_driver() {
        let post = ride(3, 1, Some("driver"));
        assert_ok!(check_complete(&post, "driver"));
        assert!(matches!(
            check_complete(&post, "someone-else"),
            Err(ServiceError::NotAuthorized(_))
        ));
        assert!(matches!(
            check_complete(&ride(1, 1, None), "rider"),
            Err(ServiceError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_cancel_rules() {
        assert_ok!(check_cancel(&ride(3, 2, Some("driver")), "driver", false));
        assert_ok!(check_cancel(&ride(1, 1, None), "requester", true));
        assert!(matches!(
            check_cancel(&ride(2, 2, None), "requester", true),
            Err(ServiceError::NotAuthorized(_))
        ));
        assert!(matches!(
            check_cancel(&ride(3, 2, Some("driver")), "rider", true),
            Err(ServiceError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_leave_rules() {
        assert_ok!(check_leave(&ride(3, 1, Some("driver")), true));
        assert!(matches!(
            check_leave(&ride(3, 1, Some("driver")), false),
            Err(ServiceError::NotAMember(_))
        ));
        assert!(cancels_on_leave(&ride(1, 1, None)));
        assert!(!cancels_on_leave(&ride(2, 2, None)));
        assert!(!cancels_on_leave(&ride(3, 1, Some("driver"))));
    }

    #[test]
    fn test_update_rules() {
        let post = ride(3, 2, Some("driver"));
        assert_ok!(check_update(&post, "driver", false, Some(2)));
        assert_ok!(check_update(&ride(1, 1, None), "requester", true, Some(3)));
        assert!(matches!(
            check_update(&post, "driver", false, Some(1)),
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            check_update(&post, "rider", true, None),
            Err(ServiceError::NotAuthorized(_))
        ));
        assert!(matches!(
            check_update(&ride(2, 2, None), "requester", true, None),
            Err(ServiceError::NotAuthorized(_))
        ));
    }
}
