//! TVM Core: entity and scope model, action catalog, error taxonomy and
//! store traits shared by every crate in the workspace.

pub mod action;
pub mod error;
pub mod models;
pub mod repository;

pub use action::{Action, ActionCatalog, ActionTemplate, CatalogLookup, PublicOperation};
pub use error::{TvmError, TvmResult};
pub use models::entity::{Entity, EntityType};
pub use models::scope::{EntityScope, Scope};
