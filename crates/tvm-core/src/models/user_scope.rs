//! Durable per-user grants.

use serde::{Deserialize, Serialize};

use crate::models::scope::{EntityScope, Scope};

/// One row of the durable ACL, unique on
/// `(user_id, scope, entity_type, entity_id)`.
///
/// Tokens snapshot these rows at issuance; removing a grant does not
/// shrink tokens that were already issued from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScope {
    pub user_id: i64,
    pub grant: EntityScope,
    /// Reserved for delegation. Not consulted by access checks.
    pub delegatable: Option<Vec<Scope>>,
}

impl UserScope {
    pub fn new(user_id: i64, grant: EntityScope) -> Self {
        Self {
            user_id,
            grant,
            delegatable: None,
        }
    }
}
