//! Ride lifecycle, single-active-ride rule and ride operations.

pub mod exclusivity;
pub mod lifecycle;
pub mod service;

pub use lifecycle::Transition;
pub use service::Listing;
