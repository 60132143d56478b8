//! Database models split into domain-specific modules.

pub mod organization;
pub mod review;
pub mod ride;
pub mod user;

pub use organization::*;
pub use review::*;
pub use ride::*;
pub use user::*;
