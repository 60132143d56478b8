//! Input validation for API requests.
//!
//! The individual validators return a message; request-level validators
//! collect them with [`ValidationErrorBuilder`] so that one response lists
//! every offending field. The client runs the same request-level validators
//! before sending anything.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::config::RideConfig;
use crate::db::{CreateRideRequest, Gender, PriceOption, UpdateRideRequest};
use crate::organization::access_code;

const MAX_ADDRESS_LEN: usize = 200;
const MAX_COMMENT_LEN: usize = 500;
const MAX_NAME_LEN: usize = 100;

lazy_static! {
    /// License plates: letters, digits, single spaces or dashes between them
    static ref LICENSE_PLATE_REGEX: Regex = Regex::new(
        r"^[A-Z0-9]+([ -]?[A-Z0-9]+)*$"
    ).unwrap();

    /// Calendar day, `YYYY-MM-DD`
    static ref DATE_REGEX: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}$"
    ).unwrap();
}

pub fn validate_address(address: &str, label: &str) -> Result<(), String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(format!("{} is required", label));
    }
    if address.len() > MAX_ADDRESS_LEN {
        return Err(format!("{} is too long (max {} characters)", label, MAX_ADDRESS_LEN));
    }
    Ok(())
}

/// Pickup time must be an RFC 3339 timestamp in the future
pub fn validate_pickup_time(pickup_time: &str) -> Result<(), String> {
    if pickup_time.trim().is_empty() {
        return Err("Pickup time is required".to_string());
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(pickup_time.trim())
        .map_err(|_| "Pickup time must be an RFC 3339 timestamp".to_string())?;
    if parsed <= chrono::Utc::now() {
        return Err("Pickup time must be in the future".to_string());
    }
    Ok(())
}

pub fn validate_price_option(price_option: &str) -> Result<(), String> {
    price_option
        .parse::<PriceOption>()
        .map(|_| ())
        .map_err(|_| "Price option must be one of: free, gas, gas_with_fee".to_string())
}

pub fn validate_max_riders(max_riders: Option<i64>, max_capacity: i64) -> Result<(), String> {
    match max_riders {
        Some(n) if n < 1 || n > max_capacity => {
            Err(format!("max_riders must be between 1 and {}", max_capacity))
        }
        _ => Ok(()),
    }
}

pub fn validate_comment(comment: Option<&str>) -> Result<(), String> {
    match comment {
        Some(c) if c.len() > MAX_COMMENT_LEN => {
            Err(format!("Comment is too long (max {} characters)", MAX_COMMENT_LEN))
        }
        _ => Ok(()),
    }
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("Name is too long (max {} characters)", MAX_NAME_LEN));
    }
    Ok(())
}

pub fn validate_organization_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Organization name is required".to_string());
    }
    if name.len() < 2 {
        return Err("Organization name is too short (min 2 characters)".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "Organization name is too long (max {} characters)",
            MAX_NAME_LEN
        ));
    }
    Ok(())
}

pub fn validate_gender(gender: i64) -> Result<(), String> {
    Gender::from_code(gender)
        .map(|_| ())
        .ok_or_else(|| "Gender must be 0 (male), 1 (female) or 2 (other)".to_string())
}

pub fn validate_preferred_contact(contact: &str) -> Result<(), String> {
    let contact = contact.trim();
    if contact.is_empty() {
        return Err("Preferred contact is required".to_string());
    }
    if contact.len() > MAX_NAME_LEN {
        return Err(format!(
            "Preferred contact is too long (max {} characters)",
            MAX_NAME_LEN
        ));
    }
    Ok(())
}

pub fn validate_license_plate(plate: &str) -> Result<(), String> {
    let plate = plate.trim().to_uppercase();
    if plate.is_empty() {
        return Err("License plate is required".to_string());
    }
    if plate.len() > 10 || !LICENSE_PLATE_REGEX.is_match(&plate) {
        return Err("License plate may contain up to 10 letters, digits, spaces or dashes".to_string());
    }
    Ok(())
}

/// Client-side access code check; the server only looks the code up
pub fn validate_access_code(code: &str) -> Result<(), String> {
    let code = access_code::normalize(code);
    if code.is_empty() {
        return Err("Access code is required".to_string());
    }
    if !access_code::is_well_formed(&code, access_code::DEFAULT_LENGTH) {
        return Err(format!(
            "Access code must be {} characters",
            access_code::DEFAULT_LENGTH
        ));
    }
    Ok(())
}

/// Review stars: 0.5 to 5 in half steps
pub fn validate_stars(stars: f64) -> Result<(), String> {
    if !(0.5..=5.0).contains(&stars) || (stars * 2.0).fract() != 0.0 {
        return Err("Stars must be between 0.5 and 5 in steps of 0.5".to_string());
    }
    Ok(())
}

pub fn validate_date(date: &str) -> Result<(), String> {
    if !DATE_REGEX.is_match(date.trim())
        || chrono::NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").is_err()
    {
        return Err("Date must be formatted as YYYY-MM-DD".to_string());
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Every field of a ride creation request
pub fn validate_create_ride(req: &CreateRideRequest, rides: &RideConfig) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_address(&req.pickup_address, "Pickup address") {
        errors.add("pickup_address", e);
    }
    if let Err(e) = validate_address(&req.destination_address, "Destination address") {
        errors.add("destination_address", e);
    }
    if let Err(e) = validate_pickup_time(&req.pickup_time) {
        errors.add("pickup_time", e);
    }
    if let Err(e) = validate_price_option(&req.price_option) {
        errors.add("price_option", e);
    }
    if let Err(e) = validate_max_riders(req.max_riders, rides.max_capacity) {
        errors.add("max_riders", e);
    }
    if let Some(driver_id) = &req.driver_id {
        if let Err(e) = validate_uuid(driver_id, "driver_id") {
            errors.add("driver_id", e);
        }
    }
    if let Some(org_id) = &req.organization_id {
        if let Err(e) = validate_uuid(org_id, "organization_id") {
            errors.add("organization_id", e);
        }
    }
    if let Err(e) = validate_comment(req.driver_comment.as_deref()) {
        errors.add("driver_comment", e);
    }
    if let Err(e) = validate_comment(req.rider_comment.as_deref()) {
        errors.add("rider_comment", e);
    }

    errors.finish()
}

/// Fields present in a ride edit; absent ones are not checked
pub fn validate_update_ride(req: &UpdateRideRequest, rides: &RideConfig) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(address) = &req.pickup_address {
        if let Err(e) = validate_address(address, "Pickup address") {
            errors.add("pickup_address", e);
        }
    }
    if let Some(address) = &req.destination_address {
        if let Err(e) = validate_address(address, "Destination address") {
            errors.add("destination_address", e);
        }
    }
    if let Some(pickup_time) = &req.pickup_time {
        if let Err(e) = validate_pickup_time(pickup_time) {
            errors.add("pickup_time", e);
        }
    }
    if let Some(price_option) = &req.price_option {
        if let Err(e) = validate_price_option(price_option) {
            errors.add("price_option", e);
        }
    }
    if let Err(e) = validate_max_riders(req.max_riders, rides.max_capacity) {
        errors.add("max_riders", e);
    }
    if let Err(e) = validate_comment(req.driver_comment.as_deref()) {
        errors.add("driver_comment", e);
    }

    errors.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tomorrow() -> String {
        (chrono::Utc::now() + chrono::Duration::days(1)).to_rfc3339()
    }

    fn ride() -> CreateRideRequest {
        CreateRideRequest {
            pickup_address: "Mesa Court".to_string(),
            destination_address: "Irvine Station".to_string(),
            pickup_time: tomorrow(),
            price_option: "free".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_pickup_time() {
        assert!(validate_pickup_time(&tomorrow()).is_ok());
        assert!(validate_pickup_time("2030-06-01T08:00:00-07:00").is_ok());
        assert!(validate_pickup_time("").is_err());
        assert!(validate_pickup_time("tomorrow at noon").is_err());
        assert!(validate_pickup_time("2001-01-01T00:00:00Z").is_err());
    }

    #[test]
    fn test_validate_price_option() {
        assert!(validate_price_option("free").is_ok());
        assert!(validate_price_option("gas_with_fee").is_ok());
        assert!(validate_price_option("Gas with fee").is_ok());
        assert!(validate_price_option("cash").is_err());
    }

    #[test]
    fn test_validate_max_riders() {
        assert!(validate_max_riders(None, 8).is_ok());
        assert!(validate_max_riders(Some(1), 8).is_ok());
        assert!(validate_max_riders(Some(8), 8).is_ok());
        assert!(validate_max_riders(Some(0), 8).is_err());
        assert!(validate_max_riders(Some(9), 8).is_err());
    }

    #[test]
    fn test_validate_license_plate() {
        assert!(validate_license_plate("8ABC123").is_ok());
        assert!(validate_license_plate("abc-123").is_ok());
        assert!(validate_license_plate("").is_err());
        assert!(validate_license_plate("AB--12").is_err());
        assert!(validate_license_plate("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn test_validate_stars() {
        assert!(validate_stars(0.5).is_ok());
        assert!(validate_stars(4.5).is_ok());
        assert!(validate_stars(5.0).is_ok());
        assert!(validate_stars(0.0).is_err());
        assert!(validate_stars(4.3).is_err());
        assert!(validate_stars(5.5).is_err());
    }

    #[test]
    fn test_validate_access_code() {
        assert!(validate_access_code("ab7k9x").is_ok());
        assert!(validate_access_code("").is_err());
        assert!(validate_access_code("ABC").is_err());
    }

    #[test]
    fn test_validate_gender_and_date() {
        assert!(validate_gender(0).is_ok());
        assert!(validate_gender(2).is_ok());
        assert!(validate_gender(3).is_err());
        assert!(validate_date("2030-02-28").is_ok());
        assert!(validate_date("2030-02-30").is_err());
        assert!(validate_date("02/28/2030").is_err());
    }

    #[test]
    fn test_validate_create_ride_collects_fields() {
        let config = RideConfig::default();
        assert!(validate_create_ride(&ride(), &config).is_ok());

        let bad = CreateRideRequest {
            pickup_address: " ".to_string(),
            price_option: "cash".to_string(),
            max_riders: Some(20),
            ..ride()
        };
        let err = validate_create_ride(&bad, &config).unwrap_err();
        assert!(err.message().contains("3 fields"));
    }

    #[test]
    fn test_validate_update_ride_checks_present_fields_only() {
        let config = RideConfig::default();
        assert!(validate_update_ride(&UpdateRideRequest::default(), &config).is_ok());

        let bad = UpdateRideRequest {
            destination_address: Some(String::new()),
            pickup_time: Some("2001-01-01T00:00:00Z".to_string()),
            max_riders: Some(0),
            ..Default::default()
        };
        let err = validate_update_ride(&bad, &config).unwrap_err();
        assert!(err.message().contains("3 fields"));
    }
}
