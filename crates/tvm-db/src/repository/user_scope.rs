//! SurrealDB implementation of [`UserScopeRepository`].
//!
//! Grant rows are keyed deterministically by their 4-tuple, so adding an
//! existing grant is an idempotent `UPSERT` and removal is a keyed
//! `DELETE`. Batches are sent as one `BEGIN … COMMIT` request: the
//! server applies all of it or none of it, even if the client goes away
//! mid-request.

use std::fmt::Write as _;

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use tvm_core::error::{TvmError, TvmResult};
use tvm_core::models::entity::{Entity, EntityType, SYSTEM_ENTITY_ID};
use tvm_core::models::scope::{EntityScope, Scope};
use tvm_core::models::user_scope::UserScope;
use tvm_core::repository::UserScopeRepository;

use super::{GrantRow, rows_into_scopes};
use crate::error::{DbError, ENTITY_NOT_FOUND_MARKER};

#[derive(Debug, SurrealValue)]
struct GranteeRow {
    user_id: i64,
    delegatable: Option<Vec<String>>,
}

impl GranteeRow {
    fn into_user_scope(self, grant: EntityScope) -> Result<UserScope, DbError> {
        let delegatable = self
            .delegatable
            .map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.parse::<Scope>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|e| DbError::Corrupt(e.to_string()))?;
        Ok(UserScope {
            user_id: self.user_id,
            grant,
            delegatable,
        })
    }
}

fn grant_key(user_id: i64, grant: &EntityScope) -> String {
    format!(
        "{user_id}_{}_{}_{}",
        grant.entity.entity_type, grant.entity.id, grant.scope
    )
}

/// Table and id column holding entities of a type. System has no table.
fn entity_table(entity_type: EntityType) -> Option<(&'static str, &'static str)> {
    match entity_type {
        EntityType::System => None,
        EntityType::Organization => Some(("organization", "organization_id")),
        EntityType::Workspace => Some(("workspace", "workspace_id")),
        EntityType::Resource => Some(("resource", "resource_id")),
        EntityType::User => Some(("user", "user_id")),
    }
}

fn check_system_entity(entity: &Entity) -> TvmResult<()> {
    if entity.entity_type == EntityType::System && entity.id != SYSTEM_ENTITY_ID {
        return Err(TvmError::EntityNotFound {
            entity: entity.to_string(),
        });
    }
    Ok(())
}

/// Map the errors of a failed grant transaction. A `THROW` raised by the
/// existence checks wins over the generic "not executed" errors the
/// other statements report.
fn transaction_error(errors: Vec<String>) -> TvmError {
    if let Some(msg) = errors.iter().find(|m| m.contains(ENTITY_NOT_FOUND_MARKER)) {
        let entity = msg
            .split(ENTITY_NOT_FOUND_MARKER)
            .nth(1)
            .map(|rest| rest.trim_end_matches(['"', '\'', '`']).to_string())
            .unwrap_or_default();
        return TvmError::EntityNotFound { entity };
    }
    let first = errors.into_iter().next().unwrap_or_default();
    DbError::Query(first).into()
}

/// SurrealDB implementation of the durable grant repository.
#[derive(Clone)]
pub struct SurrealUserScopeRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUserScopeRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> UserScopeRepository for SurrealUserScopeRepository<C> {
    async fn get_user_scopes(&self, user_id: i64) -> TvmResult<Vec<EntityScope>> {
        let mut result = self
            .db
            .query(
                "SELECT entity_type, entity_id, scope FROM user_scope \
                 WHERE user_id = $user_id \
                 ORDER BY entity_type, entity_id, scope",
            )
            .bind(("user_id", user_id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows_into_scopes(rows)?)
    }

    async fn get_user_scopes_on_organization(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> TvmResult<Vec<EntityScope>> {
        let mut result = self
            .db
            .query(
                "LET $workspaces = (SELECT VALUE workspace_id FROM workspace \
                     WHERE organization_id = $organization_id); \
                 LET $resources = (SELECT VALUE resource_id FROM resource \
                     WHERE workspace_id IN $workspaces); \
                 SELECT entity_type, entity_id, scope FROM user_scope \
                 WHERE user_id = $user_id AND (\
                     (entity_type = 'Organization' AND entity_id = $organization_id) \
                     OR (entity_type = 'Workspace' AND entity_id IN $workspaces) \
                     OR (entity_type = 'Resource' AND entity_id IN $resources)\
                 ) \
                 ORDER BY entity_type, entity_id, scope;",
            )
            .bind(("user_id", user_id))
            .bind(("organization_id", organization_id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRow> = result.take(2).map_err(DbError::from)?;
        Ok(rows_into_scopes(rows)?)
    }

    async fn get_user_scopes_on_workspace(
        &self,
        user_id: i64,
        workspace_id: i64,
    ) -> TvmResult<Vec<EntityScope>> {
        let mut result = self
            .db
            .query(
                "LET $resources = (SELECT VALUE resource_id FROM resource \
                     WHERE workspace_id = $workspace_id); \
                 SELECT entity_type, entity_id, scope FROM user_scope \
                 WHERE user_id = $user_id AND (\
                     (entity_type = 'Workspace' AND entity_id = $workspace_id) \
                     OR (entity_type = 'Resource' AND entity_id IN $resources)\
                 ) \
                 ORDER BY entity_type, entity_id, scope;",
            )
            .bind(("user_id", user_id))
            .bind(("workspace_id", workspace_id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRow> = result.take(1).map_err(DbError::from)?;
        Ok(rows_into_scopes(rows)?)
    }

    async fn get_user_scopes_on_entity(
        &self,
        user_id: i64,
        entity: Entity,
    ) -> TvmResult<Vec<EntityScope>> {
        let mut result = self
            .db
            .query(
                "SELECT entity_type, entity_id, scope FROM user_scope \
                 WHERE user_id = $user_id \
                 AND entity_type = $entity_type AND entity_id = $entity_id \
                 ORDER BY scope",
            )
            .bind(("user_id", user_id))
            .bind(("entity_type", entity.entity_type.as_str()))
            .bind(("entity_id", entity.id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows_into_scopes(rows)?)
    }

    async fn add_user_scope(&self, user_id: i64, grant: EntityScope) -> TvmResult<()> {
        self.apply_user_scope_changes(user_id, &[grant], &[]).await
    }

    async fn remove_user_scope(&self, user_id: i64, grant: EntityScope) -> TvmResult<()> {
        self.apply_user_scope_changes(user_id, &[], &[grant]).await
    }

    async fn apply_user_scope_changes(
        &self,
        user_id: i64,
        add: &[EntityScope],
        remove: &[EntityScope],
    ) -> TvmResult<()> {
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        for grant in add {
            check_system_entity(&grant.entity)?;
        }

        // Statement text only interpolates enum names and table names;
        // every value is bound.
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (i, grant) in add.iter().enumerate() {
            if let Some((table, column)) = entity_table(grant.entity.entity_type) {
                let _ = writeln!(
                    sql,
                    "LET $found_a{i} = (SELECT VALUE {column} FROM {table} \
                     WHERE {column} = $a{i}_id);\n\
                     IF array::len($found_a{i}) = 0 {{ \
                     THROW \"{ENTITY_NOT_FOUND_MARKER}{entity}\" }};",
                    entity = grant.entity,
                );
            }
            let _ = writeln!(
                sql,
                "UPSERT type::record('user_scope', $a{i}_key) SET \
                 user_id = $user_id, scope = $a{i}_scope, \
                 entity_type = $a{i}_type, entity_id = $a{i}_id;"
            );
        }
        for i in 0..remove.len() {
            let _ = writeln!(sql, "DELETE type::record('user_scope', $r{i}_key);");
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(sql).bind(("user_id", user_id));
        for (i, grant) in add.iter().enumerate() {
            query = query
                .bind((format!("a{i}_key"), grant_key(user_id, grant)))
                .bind((format!("a{i}_scope"), grant.scope.as_str()))
                .bind((format!("a{i}_type"), grant.entity.entity_type.as_str()))
                .bind((format!("a{i}_id"), grant.entity.id));
        }
        for (i, grant) in remove.iter().enumerate() {
            query = query.bind((format!("r{i}_key"), grant_key(user_id, grant)));
        }

        let mut response = query.await.map_err(DbError::from)?;
        let errors = response.take_errors();
        if !errors.is_empty() {
            let mut errors: Vec<(usize, surrealdb::Error)> = errors.into_iter().collect();
            errors.sort_by_key(|(idx, _)| *idx);
            return Err(transaction_error(
                errors.into_iter().map(|(_, e)| e.to_string()).collect(),
            ));
        }

        debug!(
            user_id,
            added = add.len(),
            removed = remove.len(),
            "Applied user scope changes"
        );
        Ok(())
    }

    async fn list_grantees(&self, entity: Entity, scope: Scope) -> TvmResult<Vec<UserScope>> {
        let mut result = self
            .db
            .query(
                "SELECT user_id, delegatable FROM user_scope \
                 WHERE entity_type = $entity_type AND entity_id = $entity_id \
                 AND scope = $scope \
                 ORDER BY user_id",
            )
            .bind(("entity_type", entity.entity_type.as_str()))
            .bind(("entity_id", entity.id))
            .bind(("scope", scope.as_str()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GranteeRow> = result.take(0).map_err(DbError::from)?;
        let grant = EntityScope::new(entity, scope);
        rows.into_iter()
            .map(|row| row.into_user_scope(grant))
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }
}
