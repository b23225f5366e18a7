//! User domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::Entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Normalised (trimmed, lower-cased) email. Unique across users, so
    /// logins through different upstream providers land on one user.
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn entity(&self) -> Entity {
        Entity::user(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
}
