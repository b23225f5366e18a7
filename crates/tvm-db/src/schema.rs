//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode. Entity ids are integers
//! allocated from the `_sequence` table and are also used as record
//! keys. Enums are stored as strings with ASSERT constraints.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Id sequences
-- =======================================================================
DEFINE TABLE _sequence SCHEMAFULL;
DEFINE FIELD current ON TABLE _sequence TYPE int;

-- =======================================================================
-- Containment hierarchy
-- =======================================================================
DEFINE TABLE organization SCHEMAFULL;
DEFINE FIELD organization_id ON TABLE organization TYPE int;
DEFINE FIELD name ON TABLE organization TYPE string;
DEFINE FIELD created_at ON TABLE organization TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_organization_id ON TABLE organization \
    COLUMNS organization_id UNIQUE;

DEFINE TABLE workspace SCHEMAFULL;
DEFINE FIELD workspace_id ON TABLE workspace TYPE int;
DEFINE FIELD organization_id ON TABLE workspace TYPE int;
DEFINE FIELD name ON TABLE workspace TYPE string;
DEFINE FIELD created_at ON TABLE workspace TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_workspace_id ON TABLE workspace \
    COLUMNS workspace_id UNIQUE;
DEFINE INDEX idx_workspace_org ON TABLE workspace \
    COLUMNS organization_id;

DEFINE TABLE resource SCHEMAFULL;
DEFINE FIELD resource_id ON TABLE resource TYPE int;
DEFINE FIELD workspace_id ON TABLE resource TYPE int;
DEFINE FIELD name ON TABLE resource TYPE string;
DEFINE FIELD created_at ON TABLE resource TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_resource_id ON TABLE resource \
    COLUMNS resource_id UNIQUE;
DEFINE INDEX idx_resource_workspace ON TABLE resource \
    COLUMNS workspace_id;

-- =======================================================================
-- Users
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD user_id ON TABLE user TYPE int;
DEFINE FIELD email ON TABLE user TYPE string;
DEFINE FIELD created_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_id ON TABLE user COLUMNS user_id UNIQUE;
DEFINE INDEX idx_user_email ON TABLE user COLUMNS email UNIQUE;

-- =======================================================================
-- Tokens (keyed by SHA-256 of the secret; may be hosted on a
-- non-durable instance, loss only forces re-login)
-- =======================================================================
DEFINE TABLE token SCHEMAFULL;
DEFINE FIELD token_hash ON TABLE token TYPE string;
DEFINE FIELD entity_type ON TABLE token TYPE string \
    ASSERT $value IN ['System', 'Organization', 'Workspace', \
    'Resource', 'User'];
DEFINE FIELD entity_id ON TABLE token TYPE int;
DEFINE FIELD scopes ON TABLE token TYPE array<object>;
DEFINE FIELD scopes.*.entity_type ON TABLE token TYPE string;
DEFINE FIELD scopes.*.entity_id ON TABLE token TYPE int;
DEFINE FIELD scopes.*.scope ON TABLE token TYPE string;
DEFINE FIELD name ON TABLE token TYPE option<string>;
DEFINE FIELD expires_at ON TABLE token TYPE datetime;
DEFINE FIELD created_at ON TABLE token TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_token_hash ON TABLE token COLUMNS token_hash UNIQUE;
DEFINE INDEX idx_token_entity ON TABLE token \
    COLUMNS entity_type, entity_id;

-- =======================================================================
-- Durable grants
-- =======================================================================
DEFINE TABLE user_scope SCHEMAFULL;
DEFINE FIELD user_id ON TABLE user_scope TYPE int;
DEFINE FIELD scope ON TABLE user_scope TYPE string \
    ASSERT $value IN ['Read', 'Write', 'Admin'];
DEFINE FIELD entity_type ON TABLE user_scope TYPE string \
    ASSERT $value IN ['System', 'Organization', 'Workspace', \
    'Resource', 'User'];
DEFINE FIELD entity_id ON TABLE user_scope TYPE int;
DEFINE FIELD delegatable ON TABLE user_scope TYPE option<array<string>>;
DEFINE INDEX idx_user_scope_unique ON TABLE user_scope \
    COLUMNS user_id, scope, entity_type, entity_id UNIQUE;
DEFINE INDEX idx_user_scope_user_entity ON TABLE user_scope \
    COLUMNS user_id, entity_type, entity_id;
DEFINE INDEX idx_user_scope_entity_scope ON TABLE user_scope \
    COLUMNS entity_type, entity_id, scope;
";

/// Apply every migration newer than the recorded schema version.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "failed to record v{}: {}",
                    migration.version, e,
                ))
            })?;

        info!(version = migration.version, "Migration applied");
    }

    Ok(())
}

/// Raw DDL for schema version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
