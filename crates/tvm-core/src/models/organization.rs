//! Organization domain model.
//!
//! Organizations are the top of the containment hierarchy below System.
//! They contain workspaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::Entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn entity(&self) -> Entity {
        Entity::organization(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
}
