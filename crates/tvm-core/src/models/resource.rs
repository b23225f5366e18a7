//! Resource (deployed app) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::Entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn entity(&self) -> Entity {
        Entity::resource(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResource {
    pub workspace_id: i64,
    pub name: String,
}
