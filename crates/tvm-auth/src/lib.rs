//! TVM Auth: token issuance and verification, OAuth identity exchange,
//! and admin-gated role management.

pub mod config;
pub mod error;
pub mod identity;
pub mod service;
pub mod token;

pub use config::{UserInfoConfig, VendingConfig};
pub use error::IdentityError;
pub use identity::{HttpUserInfoProvider, IdentityProvider};
pub use service::{IssuedToken, VendingMachine};
