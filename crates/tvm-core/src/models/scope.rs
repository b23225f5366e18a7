//! Scope domain model.
//!
//! A [`Scope`] is a capability label. There is no ordering between
//! levels: holding `Admin` on an entity does not imply `Read` on it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TvmError;
use crate::models::entity::{Entity, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    Read,
    Write,
    Admin,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Read, Scope::Write, Scope::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "Read",
            Scope::Write => "Write",
            Scope::Admin => "Admin",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = TvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Read" => Ok(Scope::Read),
            "Write" => Ok(Scope::Write),
            "Admin" => Ok(Scope::Admin),
            other => Err(TvmError::Validation {
                message: format!("unknown scope: {other}"),
            }),
        }
    }
}

/// One capability: a [`Scope`] on one [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityScope {
    pub entity: Entity,
    pub scope: Scope,
}

impl EntityScope {
    pub const fn new(entity: Entity, scope: Scope) -> Self {
        Self { entity, scope }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type
    }
}

impl fmt::Display for EntityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.scope)
    }
}
