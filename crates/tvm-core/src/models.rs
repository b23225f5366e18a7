//! Domain models for the token vending machine.
//!
//! These are the value types shared across all crates.

pub mod entity;
pub mod organization;
pub mod resource;
pub mod scope;
pub mod token;
pub mod user;
pub mod user_scope;
pub mod workspace;
