//! SurrealDB implementation of [`ResourceRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tvm_core::error::TvmResult;
use tvm_core::models::resource::{CreateResource, Resource};
use tvm_core::repository::ResourceRepository;

use super::next_id;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct ResourceRow {
    resource_id: i64,
    workspace_id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Resource {
            id: row.resource_id,
            workspace_id: row.workspace_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// SurrealDB implementation of the Resource repository.
#[derive(Clone)]
pub struct SurrealResourceRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealResourceRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ResourceRepository for SurrealResourceRepository<C> {
    async fn create(&self, input: CreateResource) -> TvmResult<Resource> {
        // The parent must exist; containment queries rely on it.
        let mut parent = self
            .db
            .query("SELECT VALUE workspace_id FROM type::record('workspace', $id)")
            .bind(("id", input.workspace_id))
            .await
            .map_err(DbError::from)?;
        let parents: Vec<i64> = parent.take(0).map_err(DbError::from)?;
        if parents.is_empty() {
            return Err(DbError::NotFound {
                entity: "workspace".into(),
                id: input.workspace_id.to_string(),
            }
            .into());
        }

        let id = next_id(&self.db, "resource").await?;

        let result = self
            .db
            .query(
                "CREATE type::record('resource', $id) SET \
                 resource_id = $id, \
                 workspace_id = $workspace_id, \
                 name = $name",
            )
            .bind(("id", id))
            .bind(("workspace_id", input.workspace_id))
            .bind(("name", input.name))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("resource", e))?;

        let rows: Vec<ResourceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "resource".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64) -> TvmResult<Resource> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('resource', $id)")
            .bind(("id", id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ResourceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "resource".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn list_by_workspace(&self, workspace_id: i64) -> TvmResult<Vec<Resource>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM resource \
                 WHERE workspace_id = $workspace_id \
                 ORDER BY resource_id ASC",
            )
            .bind(("workspace_id", workspace_id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ResourceRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
