//! TVM Database: SurrealDB connection management, schema migrations and
//! the token/grant store implementations of the `tvm-core` repository
//! traits.

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use schema::{run_migrations, schema_v1};
