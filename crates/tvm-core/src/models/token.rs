//! Token domain model.
//!
//! A token is an opaque bearer credential bound to a fixed snapshot of
//! capabilities. Records are never mutated after issuance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::entity::Entity;
use crate::models::scope::EntityScope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The raw secret. Only present in memory; the store persists its
    /// SHA-256 digest.
    pub token: String,
    /// The principal this token acts on behalf of.
    pub entity: Entity,
    /// Point-in-time snapshot of granted capabilities.
    pub scopes: Vec<EntityScope>,
    pub name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Expiry is detected lazily: a token is dead once `now >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Exact membership test against the snapshot.
    pub fn grants(&self, required: &EntityScope) -> bool {
        self.scopes.contains(required)
    }
}

/// The view of a token that remains available after issuance. Never
/// carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Hex SHA-256 digest of the secret. Identifies the token for
    /// listing and revocation; cannot be presented as a bearer.
    pub id: String,
    pub entity: Entity,
    pub scopes: Vec<EntityScope>,
    pub name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 of a raw token, hex-encoded.
///
/// This is the value persisted as the token's key and exposed as
/// [`TokenMetadata::id`].
pub fn token_id(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
