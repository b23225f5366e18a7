//! SurrealDB implementation of [`WorkspaceRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tvm_core::error::TvmResult;
use tvm_core::models::workspace::{CreateWorkspace, Workspace};
use tvm_core::repository::WorkspaceRepository;

use super::next_id;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct WorkspaceRow {
    workspace_id: i64,
    organization_id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Workspace {
            id: row.workspace_id,
            organization_id: row.organization_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// SurrealDB implementation of the Workspace repository.
#[derive(Clone)]
pub struct SurrealWorkspaceRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealWorkspaceRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> WorkspaceRepository for SurrealWorkspaceRepository<C> {
    async fn create(&self, input: CreateWorkspace) -> TvmResult<Workspace> {
        // The parent must exist; containment queries rely on it.
        let mut parent = self
            .db
            .query("SELECT VALUE organization_id FROM type::record('organization', $id)")
            .bind(("id", input.organization_id))
            .await
            .map_err(DbError::from)?;
        let parents: Vec<i64> = parent.take(0).map_err(DbError::from)?;
        if parents.is_empty() {
            return Err(DbError::NotFound {
                entity: "organization".into(),
                id: input.organization_id.to_string(),
            }
            .into());
        }

        let id = next_id(&self.db, "workspace").await?;

        let result = self
            .db
            .query(
                "CREATE type::record('workspace', $id) SET \
                 workspace_id = $id, \
                 organization_id = $organization_id, \
                 name = $name",
            )
            .bind(("id", id))
            .bind(("organization_id", input.organization_id))
            .bind(("name", input.name))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("workspace", e))?;

        let rows: Vec<WorkspaceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "workspace".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64) -> TvmResult<Workspace> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('workspace', $id)")
            .bind(("id", id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<WorkspaceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "workspace".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn list_by_organization(&self, organization_id: i64) -> TvmResult<Vec<Workspace>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM workspace \
                 WHERE organization_id = $organization_id \
                 ORDER BY workspace_id ASC",
            )
            .bind(("organization_id", organization_id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<WorkspaceRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
