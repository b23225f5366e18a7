//! SurrealDB implementation of [`TokenRepository`].
//!
//! Records are keyed by the SHA-256 digest of the secret; the raw
//! token never reaches the database.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tvm_core::error::{TvmError, TvmResult};
use tvm_core::models::entity::Entity;
use tvm_core::models::token::{TokenMetadata, TokenRecord, token_id};
use tvm_core::repository::TokenRepository;

use super::{GrantRow, parse_entity_type, rows_into_scopes};
use crate::error::{DbError, is_conflict_message};

#[derive(Debug, SurrealValue)]
struct TokenRow {
    token_hash: String,
    entity_type: String,
    entity_id: i64,
    scopes: Vec<GrantRow>,
    name: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TokenRow {
    fn into_metadata(self) -> Result<TokenMetadata, DbError> {
        let entity_type = parse_entity_type(&self.entity_type)?;
        Ok(TokenMetadata {
            id: self.token_hash,
            entity: Entity::new(entity_type, self.entity_id),
            scopes: rows_into_scopes(self.scopes)?,
            name: self.name,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// SurrealDB implementation of the Token repository.
#[derive(Clone)]
pub struct SurrealTokenRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTokenRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> TokenRepository for SurrealTokenRepository<C> {
    async fn get(&self, token: &str) -> TvmResult<TokenRecord> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('token', $key)")
            .bind(("key", token_id(token)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TokenRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or(TvmError::TokenNotFound)?;
        let meta = row.into_metadata()?;

        Ok(TokenRecord {
            token: token.to_string(),
            entity: meta.entity,
            scopes: meta.scopes,
            name: meta.name,
            expires_at: meta.expires_at,
            created_at: meta.created_at,
        })
    }

    async fn put(&self, record: &TokenRecord) -> TvmResult<()> {
        let scopes: Vec<GrantRow> = record.scopes.iter().map(GrantRow::from_entity_scope).collect();

        let result = self
            .db
            .query(
                "CREATE type::record('token', $key) SET \
                 token_hash = $key, \
                 entity_type = $entity_type, \
                 entity_id = $entity_id, \
                 scopes = $scopes, \
                 name = $name, \
                 expires_at = $expires_at, \
                 created_at = $created_at",
            )
            .bind(("key", token_id(&record.token)))
            .bind(("entity_type", record.entity.entity_type.as_str()))
            .bind(("entity_id", record.entity.id))
            .bind(("scopes", scopes))
            .bind(("name", record.name.clone()))
            .bind(("expires_at", record.expires_at))
            .bind(("created_at", record.created_at))
            .await
            .map_err(DbError::from)?;

        match result.check() {
            Ok(_) => Ok(()),
            Err(e) if is_conflict_message(&e.to_string()) => Err(TvmError::TokenConflict),
            Err(e) => Err(DbError::Query(e.to_string()).into()),
        }
    }

    async fn delete(&self, token: &str) -> TvmResult<()> {
        self.db
            .query("DELETE type::record('token', $key)")
            .bind(("key", token_id(token)))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_for_entity(&self, entity: Entity) -> TvmResult<Vec<TokenMetadata>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM token \
                 WHERE entity_type = $entity_type AND entity_id = $entity_id \
                 ORDER BY created_at ASC",
            )
            .bind(("entity_type", entity.entity_type.as_str()))
            .bind(("entity_id", entity.id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TokenRow> = result.take(0).map_err(DbError::from)?;

        rows.into_iter()
            .map(TokenRow::into_metadata)
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(Into::into)
    }

    async fn delete_by_id(&self, entity: Entity, id: &str) -> TvmResult<()> {
        let mut result = self
            .db
            .query(
                "DELETE type::record('token', $key) \
                 WHERE entity_type = $entity_type AND entity_id = $entity_id \
                 RETURN BEFORE",
            )
            .bind(("key", id.to_string()))
            .bind(("entity_type", entity.entity_type.as_str()))
            .bind(("entity_id", entity.id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TokenRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(TvmError::TokenNotFound);
        }
        Ok(())
    }

    async fn purge_expired(&self) -> TvmResult<u64> {
        // Count expired tokens first, then delete.
        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM token \
                 WHERE expires_at <= time::now() GROUP ALL",
            )
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        self.db
            .query("DELETE token WHERE expires_at <= time::now()")
            .await
            .map_err(DbError::from)?;

        Ok(total)
    }
}
