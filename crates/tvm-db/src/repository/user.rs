//! SurrealDB implementation of [`UserRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tvm_core::error::TvmResult;
use tvm_core::models::user::{CreateUser, User};
use tvm_core::repository::UserRepository;

use super::next_id;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct UserRow {
    user_id: i64,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.user_id,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUserRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, input: CreateUser) -> TvmResult<User> {
        let id = next_id(&self.db, "user").await?;

        let result = self
            .db
            .query(
                "CREATE type::record('user', $id) SET \
                 user_id = $id, email = $email",
            )
            .bind(("id", id))
            .bind(("email", input.email))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("user", e))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64) -> TvmResult<User> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('user', $id)")
            .bind(("id", id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: id.to_string(),
        })?;

        Ok(row.into())
    }

    async fn get_by_email(&self, email: &str) -> TvmResult<User> {
        let email_owned = email.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM user WHERE email = $email")
            .bind(("email", email_owned.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id: format!("email={email_owned}"),
        })?;

        Ok(row.into())
    }
}
