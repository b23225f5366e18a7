//! Vending machine: token issuance, verification and role management.
//!
//! The machine holds no mutable state. Every operation re-reads the
//! stores it was constructed with, so one instance can be shared across
//! tasks behind an `Arc`.
//!
//! Verification is exact: a required `(Type, id, Scope)` is satisfied
//! only by the same triple in the token's snapshot. Holding `Admin` on
//! an organization says nothing about its workspaces, and `Admin` does
//! not imply `Write` or `Read`.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use tvm_core::action::{Action, ActionCatalog};
use tvm_core::error::{TvmError, TvmResult};
use tvm_core::models::entity::{Entity, EntityType};
use tvm_core::models::scope::{EntityScope, Scope};
use tvm_core::models::token::{TokenMetadata, TokenRecord, token_id};
use tvm_core::models::user::{CreateUser, User};
use tvm_core::repository::{TokenRepository, UserRepository, UserScopeRepository};

use crate::config::VendingConfig;
use crate::identity::IdentityProvider;
use crate::token;

/// A freshly minted token. The secret is only ever available here;
/// afterwards the token is reachable as [`TokenMetadata`] alone.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub metadata: TokenMetadata,
}

/// Token vending machine.
///
/// Generic over repository and identity implementations so that the
/// auth layer has no dependency on the database crate.
pub struct VendingMachine<T, G, U, P>
where
    T: TokenRepository,
    G: UserScopeRepository,
    U: UserRepository,
    P: IdentityProvider,
{
    tokens: T,
    grants: G,
    users: U,
    identity: P,
    catalog: ActionCatalog,
    config: VendingConfig,
}

impl<T, G, U, P> VendingMachine<T, G, U, P>
where
    T: TokenRepository,
    G: UserScopeRepository,
    U: UserRepository,
    P: IdentityProvider,
{
    pub fn new(
        tokens: T,
        grants: G,
        users: U,
        identity: P,
        catalog: ActionCatalog,
        config: VendingConfig,
    ) -> Self {
        Self {
            tokens,
            grants,
            users,
            identity,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &VendingConfig {
        &self.config
    }

    // -------------------------------------------------------------------
    // Issuance
    // -------------------------------------------------------------------

    /// Exchange an upstream OAuth access token for a platform token.
    ///
    /// The upstream identity is reduced to a normalised email. Logins
    /// through different providers that assert the same email land on
    /// the same user. A first login creates the user; every login makes
    /// sure it holds `Read` and `Write` on itself. The issued token
    /// snapshots the user's durable grants as they are right now.
    pub async fn exchange_oauth(&self, provider_token: &str) -> TvmResult<IssuedToken> {
        let email = self
            .bounded(self.identity.resolve_identity(provider_token))
            .await
            .map_err(|e| match e {
                TvmError::ExchangeFailure { .. } | TvmError::DeadlineExceeded { .. } => e,
                other => TvmError::ExchangeFailure {
                    reason: other.to_string(),
                },
            })?;
        let email = normalize_email(&email)?;

        let user = self.find_or_create_user(&email).await?;
        let scopes = self.bounded(self.grants.get_user_scopes(user.id)).await?;

        let issued = self
            .mint(
                user.entity(),
                scopes,
                None,
                self.config.oauth_token_lifetime_secs,
            )
            .await?;
        info!(
            user_id = user.id,
            token_id = %issued.metadata.id,
            "Issued token from OAuth exchange"
        );
        Ok(issued)
    }

    /// Mint a token on behalf of `target` carrying `requested` scopes.
    ///
    /// The requesting token must itself satisfy every requested scope,
    /// so a minted token can never hold more than its minter.
    pub async fn create_token(
        &self,
        requesting_token: &str,
        name: Option<String>,
        target: Entity,
        requested: &[EntityScope],
        ttl_secs: u64,
    ) -> TvmResult<IssuedToken> {
        if ttl_secs > self.config.max_token_lifetime_secs {
            return Err(TvmError::DurationExceedsMaxAllowed {
                requested_secs: ttl_secs,
                max_secs: self.config.max_token_lifetime_secs,
            });
        }
        if ttl_secs == 0 {
            return Err(TvmError::Validation {
                message: "token lifetime must be positive".into(),
            });
        }

        self.verify_access(requesting_token, requested).await?;

        let mut scopes: Vec<EntityScope> = Vec::with_capacity(requested.len());
        for es in requested {
            if !scopes.contains(es) {
                scopes.push(*es);
            }
        }

        let issued = self.mint(target, scopes, name, ttl_secs).await?;
        info!(
            entity = %target,
            token_id = %issued.metadata.id,
            scopes = issued.metadata.scopes.len(),
            ttl_secs,
            "Issued token"
        );
        Ok(issued)
    }

    // -------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------

    /// Check that `token` is live and carries every scope in `required`.
    ///
    /// Fails with the first requirement the snapshot does not contain.
    /// An empty requirement only authenticates the token.
    pub async fn verify_access(&self, token: &str, required: &[EntityScope]) -> TvmResult<()> {
        let record = self.load_live(token).await?;
        check_scopes(&record, required)
    }

    /// Bind `action`'s catalog template to `entity` and verify it.
    pub async fn verify_action(&self, token: &str, action: Action, entity: Entity) -> TvmResult<()> {
        let required = self.catalog.bind_action(action, entity)?;
        self.verify_access(token, &[required]).await
    }

    // -------------------------------------------------------------------
    // Role introspection
    // -------------------------------------------------------------------

    /// The durable grants of the user the token was issued for.
    pub async fn get_roles(&self, token: &str) -> TvmResult<Vec<EntityScope>> {
        let record = self.load_live(token).await?;
        if record.entity.entity_type != EntityType::User {
            return Err(TvmError::ImproperUsage {
                reason: format!("get_roles requires a user token, got {}", record.entity),
            });
        }
        check_scopes(&record, &[EntityScope::new(record.entity, Scope::Read)])?;

        self.bounded(self.grants.get_user_scopes(record.entity.id))
            .await
    }

    /// `user_id`'s grants on `entity`, including grants on anything
    /// nested beneath it. Requires `Read` on `entity`.
    ///
    /// The aggregation is a read convenience only; verification stays
    /// exact.
    pub async fn get_roles_by_entity(
        &self,
        token: &str,
        user_id: i64,
        entity: Entity,
    ) -> TvmResult<Vec<EntityScope>> {
        self.verify_access(token, &[EntityScope::new(entity, Scope::Read)])
            .await?;

        match entity.entity_type {
            EntityType::Organization => {
                self.bounded(self.grants.get_user_scopes_on_organization(user_id, entity.id))
                    .await
            }
            EntityType::Workspace => {
                self.bounded(self.grants.get_user_scopes_on_workspace(user_id, entity.id))
                    .await
            }
            EntityType::Resource | EntityType::User | EntityType::System => {
                self.bounded(self.grants.get_user_scopes_on_entity(user_id, entity))
                    .await
            }
        }
    }

    // -------------------------------------------------------------------
    // Role management
    // -------------------------------------------------------------------

    /// Add and remove durable grants for `user_id` in one transaction.
    ///
    /// The token must hold `Admin` on every distinct entity named in
    /// either list; the first one it lacks fails the whole call before
    /// anything is written. Within a batch adds are applied before
    /// removes, so a grant named in both lists ends up removed.
    ///
    /// The admin precheck reads the token snapshot and is not serialized
    /// against other `update_roles` calls. Two concurrent batches on
    /// overlapping entities each see the world as it was before either
    /// committed; the store applies both. Only the apply step is atomic.
    pub async fn update_roles(
        &self,
        token: &str,
        user_id: i64,
        add: &[EntityScope],
        remove: &[EntityScope],
    ) -> TvmResult<()> {
        let record = self.load_live(token).await?;
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }

        let mut entities: Vec<Entity> = Vec::new();
        for es in add.iter().chain(remove) {
            if !entities.contains(&es.entity) {
                entities.push(es.entity);
            }
        }
        for entity in &entities {
            check_scopes(&record, &[EntityScope::new(*entity, Scope::Admin)])?;
        }

        self.bounded(self.users.get_by_id(user_id)).await?;
        self.bounded(self.grants.apply_user_scope_changes(user_id, add, remove))
            .await?;

        info!(
            user_id,
            granted_by = %record.entity,
            added = add.len(),
            removed = remove.len(),
            "Updated roles"
        );
        Ok(())
    }

    // -------------------------------------------------------------------
    // Token management
    // -------------------------------------------------------------------

    /// Metadata of every token issued on behalf of `user_id`. Requires
    /// `Read` on the user.
    pub async fn list_tokens(&self, token: &str, user_id: i64) -> TvmResult<Vec<TokenMetadata>> {
        let user = Entity::user(user_id);
        self.verify_access(token, &[EntityScope::new(user, Scope::Read)])
            .await?;
        self.bounded(self.tokens.list_for_entity(user)).await
    }

    /// Revoke the presented token (logout). Needs no scope; expired
    /// tokens may still be revoked.
    pub async fn revoke_token(&self, token: &str) -> TvmResult<()> {
        let record = self.bounded(self.tokens.get(token)).await?;
        self.bounded(self.tokens.delete(token)).await?;
        info!(
            entity = %record.entity,
            token_id = %token_id(token),
            "Revoked token"
        );
        Ok(())
    }

    /// Revoke one of `user_id`'s tokens by its metadata id. Requires
    /// `Write` on the user.
    pub async fn revoke_token_by_id(&self, token: &str, user_id: i64, id: &str) -> TvmResult<()> {
        let user = Entity::user(user_id);
        self.verify_access(token, &[EntityScope::new(user, Scope::Write)])
            .await?;
        self.bounded(self.tokens.delete_by_id(user, id)).await?;
        info!(user_id, token_id = id, "Revoked token by id");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    async fn load_live(&self, token: &str) -> TvmResult<TokenRecord> {
        let record = self.bounded(self.tokens.get(token)).await?;
        if record.is_expired_at(Utc::now()) {
            debug!(token_id = %token_id(token), "Rejected expired token");
            return Err(TvmError::TokenExpired);
        }
        Ok(record)
    }

    async fn find_or_create_user(&self, email: &str) -> TvmResult<User> {
        let user = match self.bounded(self.users.get_by_email(email)).await {
            Ok(user) => user,
            Err(TvmError::EntityNotFound { .. }) => {
                let created = self
                    .bounded(self.users.create(CreateUser {
                        email: email.to_string(),
                    }))
                    .await;
                match created {
                    Ok(user) => {
                        info!(user_id = user.id, "Created user on first login");
                        user
                    }
                    // Lost the race to a concurrent first login with the
                    // same email.
                    Err(TvmError::AlreadyExists { .. }) => {
                        self.bounded(self.users.get_by_email(email)).await?
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        // Idempotent. Also repairs a first login that failed after the
        // user row was committed.
        let own = [
            EntityScope::new(user.entity(), Scope::Read),
            EntityScope::new(user.entity(), Scope::Write),
        ];
        self.bounded(self.grants.apply_user_scope_changes(user.id, &own, &[]))
            .await?;
        Ok(user)
    }

    async fn mint(
        &self,
        entity: Entity,
        scopes: Vec<EntityScope>,
        name: Option<String>,
        ttl_secs: u64,
    ) -> TvmResult<IssuedToken> {
        let attempts = self.config.token_insert_attempts.max(1);
        let out_of_range = || TvmError::Validation {
            message: format!("token lifetime {ttl_secs}s is out of range"),
        };
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(out_of_range)?;

        for attempt in 1..=attempts {
            let now = Utc::now();
            let expires_at = now.checked_add_signed(ttl).ok_or_else(out_of_range)?;
            let record = TokenRecord {
                token: token::generate_token(),
                entity,
                scopes: scopes.clone(),
                name: name.clone(),
                expires_at,
                created_at: now,
            };

            match self.bounded(self.tokens.put(&record)).await {
                Ok(()) => {
                    let metadata = TokenMetadata {
                        id: token_id(&record.token),
                        entity: record.entity,
                        scopes: record.scopes,
                        name: record.name,
                        expires_at: record.expires_at,
                        created_at: record.created_at,
                    };
                    return Ok(IssuedToken {
                        token: record.token,
                        metadata,
                    });
                }
                Err(TvmError::TokenConflict) => {
                    warn!(attempt, attempts, "Token key collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(TvmError::StoreFailure(format!(
            "token insert collided {attempts} times"
        )))
    }

    /// Run a store or identity call under the configured deadline.
    async fn bounded<R>(&self, fut: impl Future<Output = TvmResult<R>>) -> TvmResult<R> {
        let limit = std::time::Duration::from_millis(self.config.store_timeout_ms);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(TvmError::DeadlineExceeded {
                after_ms: self.config.store_timeout_ms,
            }),
        }
    }
}

fn check_scopes(record: &TokenRecord, required: &[EntityScope]) -> TvmResult<()> {
    if let Some(missing) = required.iter().find(|es| !record.grants(es)) {
        debug!(
            entity = %record.entity,
            missing = %missing,
            "Access denied"
        );
        return Err(TvmError::InsufficientPermissions { missing: *missing });
    }
    Ok(())
}

fn normalize_email(raw: &str) -> TvmResult<String> {
    let email = raw.trim().to_lowercase();
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !well_formed || email.len() > 255 {
        return Err(TvmError::ExchangeFailure {
            reason: "identity provider returned no usable email".into(),
        });
    }
    Ok(email)
}
