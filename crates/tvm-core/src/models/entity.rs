//! Entity domain model.
//!
//! Entities identify principals and resources in the containment
//! hierarchy: System → Organization → Workspace → Resource, with User
//! as a cross-cutting principal. An entity is identity only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TvmError;

/// Id of the single System entity.
pub const SYSTEM_ENTITY_ID: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    System,
    Organization,
    Workspace,
    Resource,
    User,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::System,
        EntityType::Organization,
        EntityType::Workspace,
        EntityType::Resource,
        EntityType::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::System => "System",
            EntityType::Organization => "Organization",
            EntityType::Workspace => "Workspace",
            EntityType::Resource => "Resource",
            EntityType::User => "User",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = TvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "System" => Ok(EntityType::System),
            "Organization" => Ok(EntityType::Organization),
            "Workspace" => Ok(EntityType::Workspace),
            "Resource" => Ok(EntityType::Resource),
            "User" => Ok(EntityType::User),
            other => Err(TvmError::Validation {
                message: format!("unknown entity type: {other}"),
            }),
        }
    }
}

/// A concrete instance in the hierarchy, e.g. `Workspace:7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub id: i64,
}

impl Entity {
    pub const fn new(entity_type: EntityType, id: i64) -> Self {
        Self { entity_type, id }
    }

    pub const fn system() -> Self {
        Self::new(EntityType::System, SYSTEM_ENTITY_ID)
    }

    pub const fn organization(id: i64) -> Self {
        Self::new(EntityType::Organization, id)
    }

    pub const fn workspace(id: i64) -> Self {
        Self::new(EntityType::Workspace, id)
    }

    pub const fn resource(id: i64) -> Self {
        Self::new(EntityType::Resource, id)
    }

    pub const fn user(id: i64) -> Self {
        Self::new(EntityType::User, id)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}
