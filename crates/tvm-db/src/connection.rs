//! SurrealDB connection management.
//!
//! Grants and users must live on a durable instance. The token table
//! can be pointed at a separate instance of its own; losing it only
//! forces users to log in again.

use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;
use crate::schema::run_migrations;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// WebSocket address (e.g., `127.0.0.1:8000`).
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials. Leave both unset for an instance started
    /// with `--unauthenticated`.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name used in logs to tell stores apart.
    pub label: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "tvm".into(),
            database: "main".into(),
            username: Some("root".into()),
            password: Some("root".into()),
            label: "main".into(),
        }
    }
}

/// A live connection with namespace and database selected.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
    label: String,
}

impl DbManager {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            store = %config.label,
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );

        let db = Surreal::new::<Ws>(&config.url).await?;

        match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                db.signin(Root {
                    username: username.clone(),
                    password: password.clone(),
                })
                .await?;
            }
            (None, None) => {}
            _ => {
                return Err(DbError::Query(format!(
                    "store {}: username and password must be set together",
                    config.label
                )));
            }
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        info!(store = %config.label, "Connected to SurrealDB");

        Ok(Self {
            db,
            label: config.label.clone(),
        })
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }

    /// Bring this store's schema up to date.
    pub async fn migrate(&self) -> Result<(), DbError> {
        info!(store = %self.label, "Checking schema version");
        run_migrations(&self.db).await
    }
}
