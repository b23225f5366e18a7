//! SurrealDB implementation of [`OrganizationRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tvm_core::error::TvmResult;
use tvm_core::models::organization::{CreateOrganization, Organization};
use tvm_core::repository::OrganizationRepository;

use super::next_id;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct OrganizationRow {
    organization_id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.organization_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// SurrealDB implementation of the Organization repository.
#[derive(Clone)]
pub struct SurrealOrganizationRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOrganizationRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> OrganizationRepository for SurrealOrganizationRepository<C> {
    async fn create(&self, input: CreateOrganization) -> TvmResult<Organization> {
        let id = next_id(&self.db, "organization").await?;

        let result = self
            .db
            .query(
                "CREATE type::record('organization', $id) SET \
                 organization_id = $id, name = $name",
            )
            .bind(("id", id))
            .bind(("name", input.name))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("organization", e))?;

        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "organization".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64) -> TvmResult<Organization> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('organization', $id)")
            .bind(("id", id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "organization".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn list(&self) -> TvmResult<Vec<Organization>> {
        let mut result = self
            .db
            .query("SELECT * FROM organization ORDER BY organization_id ASC")
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
