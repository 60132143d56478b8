//! Organizations (clubs) running private ride networks.

pub mod access_code;
pub mod capabilities;
pub mod service;

pub use capabilities::Capabilities;
