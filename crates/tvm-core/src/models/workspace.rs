//! Workspace domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::Entity;

/// A workspace groups deployable resources inside one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    /// The organization this workspace belongs to.
    pub organization_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn entity(&self) -> Entity {
        Entity::workspace(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkspace {
    pub organization_id: i64,
    pub name: String,
}
