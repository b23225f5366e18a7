//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async and must be treated as blocking
//! I/O by callers: do not hold unrelated locks across them.

use crate::error::TvmResult;
use crate::models::{
    entity::Entity,
    organization::{CreateOrganization, Organization},
    resource::{CreateResource, Resource},
    scope::{EntityScope, Scope},
    token::{TokenMetadata, TokenRecord},
    user::{CreateUser, User},
    user_scope::UserScope,
    workspace::{CreateWorkspace, Workspace},
};

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

pub trait TokenRepository: Send + Sync {
    /// Look up a token by its raw secret.
    fn get(&self, token: &str) -> impl Future<Output = TvmResult<TokenRecord>> + Send;

    /// Persist a freshly minted token. A key collision is reported as
    /// [`TvmError::TokenConflict`](crate::error::TvmError::TokenConflict).
    fn put(&self, record: &TokenRecord) -> impl Future<Output = TvmResult<()>> + Send;

    /// Revoke a token by its raw secret.
    fn delete(&self, token: &str) -> impl Future<Output = TvmResult<()>> + Send;

    /// Metadata of every token issued on behalf of `entity`, expired
    /// ones included.
    fn list_for_entity(
        &self,
        entity: Entity,
    ) -> impl Future<Output = TvmResult<Vec<TokenMetadata>>> + Send;

    /// Revoke a token by its metadata id, only if it belongs to `entity`.
    fn delete_by_id(
        &self,
        entity: Entity,
        id: &str,
    ) -> impl Future<Output = TvmResult<()>> + Send;

    /// Remove tokens whose expiry has passed. Operator maintenance only;
    /// expired tokens are already rejected on read.
    fn purge_expired(&self) -> impl Future<Output = TvmResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Durable grants
// ---------------------------------------------------------------------------

pub trait UserScopeRepository: Send + Sync {
    /// Every grant held by the user.
    fn get_user_scopes(
        &self,
        user_id: i64,
    ) -> impl Future<Output = TvmResult<Vec<EntityScope>>> + Send;

    /// Grants on the organization and on every workspace and resource
    /// nested beneath it.
    fn get_user_scopes_on_organization(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> impl Future<Output = TvmResult<Vec<EntityScope>>> + Send;

    /// Grants on the workspace and on every resource nested beneath it.
    fn get_user_scopes_on_workspace(
        &self,
        user_id: i64,
        workspace_id: i64,
    ) -> impl Future<Output = TvmResult<Vec<EntityScope>>> + Send;

    /// Grants on exactly this entity.
    fn get_user_scopes_on_entity(
        &self,
        user_id: i64,
        entity: Entity,
    ) -> impl Future<Output = TvmResult<Vec<EntityScope>>> + Send;

    fn add_user_scope(
        &self,
        user_id: i64,
        grant: EntityScope,
    ) -> impl Future<Output = TvmResult<()>> + Send;

    fn remove_user_scope(
        &self,
        user_id: i64,
        grant: EntityScope,
    ) -> impl Future<Output = TvmResult<()>> + Send;

    /// Apply a batch of additions and removals as one transaction.
    ///
    /// Either every change is persisted or none is. Adding a grant that
    /// already exists and removing one that does not are both no-ops;
    /// adding a grant on an entity that does not exist fails the batch
    /// with `EntityNotFound`.
    fn apply_user_scope_changes(
        &self,
        user_id: i64,
        add: &[EntityScope],
        remove: &[EntityScope],
    ) -> impl Future<Output = TvmResult<()>> + Send;

    /// Grant rows of every user holding `scope` on `entity`, ordered by
    /// user id.
    fn list_grantees(
        &self,
        entity: Entity,
        scope: Scope,
    ) -> impl Future<Output = TvmResult<Vec<UserScope>>> + Send;
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    /// Create a user. Fails with `AlreadyExists` if the email is taken.
    fn create(&self, input: CreateUser) -> impl Future<Output = TvmResult<User>> + Send;
    fn get_by_id(&self, id: i64) -> impl Future<Output = TvmResult<User>> + Send;
    fn get_by_email(&self, email: &str) -> impl Future<Output = TvmResult<User>> + Send;
}

// ---------------------------------------------------------------------------
// Containment hierarchy
// ---------------------------------------------------------------------------

pub trait OrganizationRepository: Send + Sync {
    fn create(
        &self,
        input: CreateOrganization,
    ) -> impl Future<Output = TvmResult<Organization>> + Send;
    fn get_by_id(&self, id: i64) -> impl Future<Output = TvmResult<Organization>> + Send;
    fn list(&self) -> impl Future<Output = TvmResult<Vec<Organization>>> + Send;
}

pub trait WorkspaceRepository: Send + Sync {
    fn create(&self, input: CreateWorkspace) -> impl Future<Output = TvmResult<Workspace>> + Send;
    fn get_by_id(&self, id: i64) -> impl Future<Output = TvmResult<Workspace>> + Send;
    fn list_by_organization(
        &self,
        organization_id: i64,
    ) -> impl Future<Output = TvmResult<Vec<Workspace>>> + Send;
}

pub trait ResourceRepository: Send + Sync {
    fn create(&self, input: CreateResource) -> impl Future<Output = TvmResult<Resource>> + Send;
    fn get_by_id(&self, id: i64) -> impl Future<Output = TvmResult<Resource>> + Send;
    fn list_by_workspace(
        &self,
        workspace_id: i64,
    ) -> impl Future<Output = TvmResult<Vec<Resource>>> + Send;
}
