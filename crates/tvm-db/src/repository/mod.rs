//! SurrealDB repository implementations.

mod organization;
mod resource;
mod token;
mod user;
mod user_scope;
mod workspace;

pub use organization::SurrealOrganizationRepository;
pub use resource::SurrealResourceRepository;
pub use token::SurrealTokenRepository;
pub use user::SurrealUserRepository;
pub use user_scope::SurrealUserScopeRepository;
pub use workspace::SurrealWorkspaceRepository;

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tvm_core::models::entity::{Entity, EntityType};
use tvm_core::models::scope::{EntityScope, Scope};

use crate::error::DbError;

/// One `(entity_type, entity_id, scope)` triple as stored, both in the
/// `user_scope` table and inside a token's `scopes` array.
#[derive(Debug, Clone, SurrealValue)]
pub(crate) struct GrantRow {
    entity_type: String,
    entity_id: i64,
    scope: String,
}

impl GrantRow {
    pub(crate) fn from_entity_scope(es: &EntityScope) -> Self {
        Self {
            entity_type: es.entity.entity_type.as_str().into(),
            entity_id: es.entity.id,
            scope: es.scope.as_str().into(),
        }
    }

    pub(crate) fn try_into_entity_scope(self) -> Result<EntityScope, DbError> {
        let entity_type = parse_entity_type(&self.entity_type)?;
        let scope = self
            .scope
            .parse::<Scope>()
            .map_err(|e| DbError::Corrupt(e.to_string()))?;
        Ok(EntityScope::new(Entity::new(entity_type, self.entity_id), scope))
    }
}

pub(crate) fn parse_entity_type(s: &str) -> Result<EntityType, DbError> {
    s.parse::<EntityType>()
        .map_err(|e| DbError::Corrupt(e.to_string()))
}

pub(crate) fn rows_into_scopes(rows: Vec<GrantRow>) -> Result<Vec<EntityScope>, DbError> {
    rows.into_iter()
        .map(GrantRow::try_into_entity_scope)
        .collect()
}

#[derive(Debug, SurrealValue)]
struct SequenceRow {
    current: i64,
}

/// Allocate the next id from a named sequence.
pub(crate) async fn next_id<C: Connection>(db: &Surreal<C>, name: &str) -> Result<i64, DbError> {
    let result = db
        .query(
            "UPSERT type::record('_sequence', $name) \
             SET current = (current OR 0) + 1 \
             RETURN current",
        )
        .bind(("name", name.to_string()))
        .await?;

    let mut result = result.check().map_err(|e| DbError::Query(e.to_string()))?;
    let rows: Vec<SequenceRow> = result.take(0)?;
    rows.into_iter()
        .next()
        .map(|r| r.current)
        .ok_or_else(|| DbError::Query(format!("sequence {name} returned nothing")))
}
