//! Integration tests for the vending machine over in-memory SurrealDB.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{Duration, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tvm_auth::config::VendingConfig;
use tvm_auth::identity::IdentityProvider;
use tvm_auth::service::VendingMachine;
use tvm_core::action::{Action, ActionCatalog};
use tvm_core::error::{TvmError, TvmResult};
use tvm_core::models::entity::Entity;
use tvm_core::models::organization::CreateOrganization;
use tvm_core::models::scope::{EntityScope, Scope};
use tvm_core::models::token::{TokenMetadata, TokenRecord, token_id};
use tvm_core::models::user::CreateUser;
use tvm_core::models::user_scope::UserScope;
use tvm_core::models::resource::CreateResource;
use tvm_core::models::workspace::CreateWorkspace;
use tvm_core::repository::{
    OrganizationRepository, ResourceRepository, TokenRepository, UserRepository,
    UserScopeRepository, WorkspaceRepository,
};
use tvm_db::repository::{
    SurrealOrganizationRepository, SurrealResourceRepository, SurrealTokenRepository,
    SurrealUserRepository, SurrealUserScopeRepository, SurrealWorkspaceRepository,
};

/// Maps upstream access tokens to the email the provider asserts.
#[derive(Clone, Default)]
struct FakeProvider {
    identities: HashMap<String, String>,
}

impl FakeProvider {
    fn with(mut self, token: &str, email: &str) -> Self {
        self.identities.insert(token.into(), email.into());
        self
    }
}

impl IdentityProvider for FakeProvider {
    async fn resolve_identity(&self, provider_access_token: &str) -> TvmResult<String> {
        self.identities
            .get(provider_access_token)
            .cloned()
            .ok_or_else(|| TvmError::ExchangeFailure {
                reason: "upstream rejected the token".into(),
            })
    }
}

type Machine = VendingMachine<
    SurrealTokenRepository<Db>,
    SurrealUserScopeRepository<Db>,
    SurrealUserRepository<Db>,
    FakeProvider,
>;

struct Harness {
    db: Surreal<Db>,
    vm: Machine,
    tokens: SurrealTokenRepository<Db>,
    grants: SurrealUserScopeRepository<Db>,
    users: SurrealUserRepository<Db>,
}

async fn setup_with(provider: FakeProvider) -> Harness {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tvm_db::run_migrations(&db).await.unwrap();

    let tokens = SurrealTokenRepository::new(db.clone());
    let grants = SurrealUserScopeRepository::new(db.clone());
    let users = SurrealUserRepository::new(db.clone());
    let vm = VendingMachine::new(
        tokens.clone(),
        grants.clone(),
        users.clone(),
        provider,
        ActionCatalog::new(),
        VendingConfig::default(),
    );

    Harness {
        db,
        vm,
        tokens,
        grants,
        users,
    }
}

async fn setup() -> Harness {
    setup_with(FakeProvider::default()).await
}

fn es(entity: Entity, scope: Scope) -> EntityScope {
    EntityScope::new(entity, scope)
}

/// Store a live token with an arbitrary snapshot, bypassing issuance.
async fn plant(h: &Harness, secret: &str, entity: Entity, scopes: Vec<EntityScope>) {
    plant_expiring(h, secret, entity, scopes, Duration::hours(1)).await;
}

async fn plant_expiring(
    h: &Harness,
    secret: &str,
    entity: Entity,
    scopes: Vec<EntityScope>,
    ttl: Duration,
) {
    h.tokens
        .put(&TokenRecord {
            token: secret.into(),
            entity,
            scopes,
            name: None,
            expires_at: Utc::now() + ttl,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn user(h: &Harness, email: &str) -> i64 {
    h.users
        .create(CreateUser {
            email: email.into(),
        })
        .await
        .unwrap()
        .id
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_read_does_not_grant_write() {
    let h = setup().await;
    plant(&h, "tok-a", Entity::user(1), vec![es(Entity::user(1), Scope::Read)]).await;

    let err = h
        .vm
        .verify_access("tok-a", &[es(Entity::user(1), Scope::Write)])
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::InsufficientPermissions { .. }));
}

#[tokio::test]
async fn scenario_b_org_grant_does_not_reach_workspaces() {
    let h = setup().await;
    let orgs = SurrealOrganizationRepository::new(h.db.clone());
    let workspaces = SurrealWorkspaceRepository::new(h.db.clone());
    let org = orgs
        .create(CreateOrganization { name: "acme".into() })
        .await
        .unwrap();
    let ws = workspaces
        .create(CreateWorkspace {
            organization_id: org.id,
            name: "prod".into(),
        })
        .await
        .unwrap();

    plant(
        &h,
        "tok-b",
        Entity::user(1),
        vec![es(org.entity(), Scope::Write)],
    )
    .await;

    h.vm
        .verify_access("tok-b", &[es(org.entity(), Scope::Write)])
        .await
        .unwrap();
    let err = h
        .vm
        .verify_access("tok-b", &[es(ws.entity(), Scope::Write)])
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::InsufficientPermissions { .. }));
}

#[tokio::test]
async fn exact_match_on_every_component() {
    let h = setup().await;
    plant(
        &h,
        "tok-p3",
        Entity::user(1),
        vec![es(Entity::organization(5), Scope::Write)],
    )
    .await;

    h.vm
        .verify_access("tok-p3", &[es(Entity::organization(5), Scope::Write)])
        .await
        .unwrap();

    for wrong in [
        es(Entity::workspace(5), Scope::Write),
        es(Entity::organization(6), Scope::Write),
        es(Entity::organization(5), Scope::Read),
        es(Entity::organization(5), Scope::Admin),
    ] {
        let err = h.vm.verify_access("tok-p3", &[wrong]).await.unwrap_err();
        assert!(
            matches!(err, TvmError::InsufficientPermissions { missing } if missing == wrong),
            "{wrong} should be denied"
        );
    }
}

#[tokio::test]
async fn all_required_scopes_must_be_held() {
    let h = setup().await;
    plant(
        &h,
        "tok-and",
        Entity::user(1),
        vec![
            es(Entity::organization(1), Scope::Read),
            es(Entity::organization(1), Scope::Write),
        ],
    )
    .await;

    h.vm
        .verify_access(
            "tok-and",
            &[
                es(Entity::organization(1), Scope::Read),
                es(Entity::organization(1), Scope::Write),
            ],
        )
        .await
        .unwrap();
    assert!(
        h.vm
            .verify_access(
                "tok-and",
                &[
                    es(Entity::organization(1), Scope::Read),
                    es(Entity::organization(1), Scope::Admin),
                ],
            )
            .await
            .is_err()
    );
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let h = setup().await;
    let err = h.vm.verify_access("never-issued", &[]).await.unwrap_err();
    assert!(matches!(err, TvmError::TokenNotFound));
    assert!(err.is_unauthenticated());
}

#[tokio::test]
async fn expiry_is_terminal() {
    let h = setup().await;
    let grant = es(Entity::organization(1), Scope::Read);
    plant_expiring(&h, "tok-old", Entity::user(1), vec![grant], Duration::seconds(-1)).await;

    for _ in 0..3 {
        let err = h.vm.verify_access("tok-old", &[grant]).await.unwrap_err();
        assert!(matches!(err, TvmError::TokenExpired));
    }
    assert!(matches!(
        h.vm.get_roles("tok-old").await,
        Err(TvmError::TokenExpired)
    ));
}

#[tokio::test]
async fn verify_action_binds_catalog_template() {
    let h = setup().await;
    plant(
        &h,
        "tok-act",
        Entity::user(1),
        vec![es(Entity::resource(3), Scope::Write)],
    )
    .await;

    h.vm
        .verify_action("tok-act", Action::DeployApp, Entity::resource(3))
        .await
        .unwrap();

    let err = h
        .vm
        .verify_action("tok-act", Action::DeleteApp, Entity::resource(3))
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::InsufficientPermissions { .. }));

    let err = h
        .vm
        .verify_action("tok-act", Action::DeployApp, Entity::workspace(3))
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::ImproperUsage { .. }));
}

// ---------------------------------------------------------------------------
// Issuance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_c_minting_is_bounded_by_the_minter() {
    let h = setup().await;
    plant(
        &h,
        "tok-c",
        Entity::user(1),
        vec![es(Entity::organization(1), Scope::Admin)],
    )
    .await;

    let err = h
        .vm
        .create_token(
            "tok-c",
            Some("deploy".into()),
            Entity::user(1),
            &[
                es(Entity::organization(1), Scope::Admin),
                es(Entity::organization(2), Scope::Admin),
            ],
            3600,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TvmError::InsufficientPermissions { missing }
            if missing == es(Entity::organization(2), Scope::Admin)
    ));

    // Admin does not imply Write, so Write on Org 1 must be held too.
    let err = h
        .vm
        .create_token(
            "tok-c",
            None,
            Entity::user(1),
            &[es(Entity::organization(1), Scope::Write)],
            3600,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::InsufficientPermissions { .. }));

    plant(
        &h,
        "tok-c2",
        Entity::user(1),
        vec![
            es(Entity::organization(1), Scope::Admin),
            es(Entity::organization(1), Scope::Write),
        ],
    )
    .await;
    let issued = h
        .vm
        .create_token(
            "tok-c2",
            Some("ci".into()),
            Entity::user(1),
            &[es(Entity::organization(1), Scope::Write)],
            3600,
        )
        .await
        .unwrap();
    assert_eq!(
        issued.metadata.scopes,
        vec![es(Entity::organization(1), Scope::Write)]
    );
    assert_eq!(issued.metadata.name.as_deref(), Some("ci"));
}

#[tokio::test]
async fn minted_scopes_are_accepted_by_the_minter() {
    let h = setup().await;
    let held = vec![
        es(Entity::organization(1), Scope::Read),
        es(Entity::workspace(2), Scope::Write),
        es(Entity::resource(3), Scope::Admin),
    ];
    plant(&h, "tok-p1", Entity::user(1), held.clone()).await;

    let issued = h
        .vm
        .create_token("tok-p1", None, Entity::user(1), &held[1..], 600)
        .await
        .unwrap();

    for scope in &issued.metadata.scopes {
        h.vm.verify_access("tok-p1", &[*scope]).await.unwrap();
        h.vm.verify_access(&issued.token, &[*scope]).await.unwrap();
    }
    assert!(
        h.vm
            .verify_access(&issued.token, &[held[0]])
            .await
            .is_err()
    );
}

#[tokio::test]
async fn lifetime_ceiling_is_enforced() {
    let h = setup().await;
    plant(&h, "tok-ttl", Entity::user(1), vec![]).await;
    let max = h.vm.config().max_token_lifetime_secs;

    let err = h
        .vm
        .create_token("tok-ttl", None, Entity::user(1), &[], max + 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TvmError::DurationExceedsMaxAllowed { requested_secs, max_secs }
            if requested_secs == max + 1 && max_secs == max
    ));

    h.vm
        .create_token("tok-ttl", None, Entity::user(1), &[], max)
        .await
        .unwrap();
}

#[tokio::test]
async fn secret_is_only_returned_once() {
    let h = setup().await;
    let uid = user(&h, "owner@example.com").await;
    let own = vec![
        es(Entity::user(uid), Scope::Read),
        es(Entity::user(uid), Scope::Write),
    ];
    plant(&h, "tok-owner", Entity::user(uid), own.clone()).await;

    let issued = h
        .vm
        .create_token("tok-owner", Some("laptop".into()), Entity::user(uid), &own, 600)
        .await
        .unwrap();
    assert_eq!(issued.metadata.id, token_id(&issued.token));

    let listed: Vec<TokenMetadata> = h.vm.list_tokens("tok-owner", uid).await.unwrap();
    let found = listed
        .iter()
        .find(|m| m.id == issued.metadata.id)
        .unwrap();
    assert_eq!(found.name.as_deref(), Some("laptop"));
    assert!(listed.iter().all(|m| m.id != issued.token));

    // The metadata id is not a bearer credential.
    assert!(matches!(
        h.vm.verify_access(&issued.metadata.id, &[]).await,
        Err(TvmError::TokenNotFound)
    ));
}

// ---------------------------------------------------------------------------
// OAuth exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_login_creates_user_with_self_grants() {
    let h = setup_with(FakeProvider::default().with("google-1", "new@example.com")).await;

    let issued = h.vm.exchange_oauth("google-1").await.unwrap();
    let me = issued.metadata.entity;
    assert_eq!(me.entity_type, tvm_core::EntityType::User);

    h.vm
        .verify_access(
            &issued.token,
            &[es(me, Scope::Read), es(me, Scope::Write)],
        )
        .await
        .unwrap();

    let mut roles = h.vm.get_roles(&issued.token).await.unwrap();
    roles.sort();
    assert_eq!(roles, vec![es(me, Scope::Read), es(me, Scope::Write)]);

    let stored = h.users.get_by_email("new@example.com").await.unwrap();
    assert_eq!(stored.id, me.id);
}

#[tokio::test]
async fn same_email_maps_to_same_user() {
    let provider = FakeProvider::default()
        .with("google-tok", "Alice@Example.com ")
        .with("github-tok", "alice@example.com");
    let h = setup_with(provider).await;

    let first = h.vm.exchange_oauth("google-tok").await.unwrap();
    let second = h.vm.exchange_oauth("github-tok").await.unwrap();
    assert_eq!(first.metadata.entity, second.metadata.entity);
    assert_ne!(first.token, second.token);
}

#[tokio::test]
async fn exchange_snapshots_current_grants() {
    let h = setup_with(FakeProvider::default().with("tok", "bob@example.com")).await;
    let uid = user(&h, "bob@example.com").await;
    h.grants
        .add_user_scope(uid, es(Entity::system(), Scope::Admin))
        .await
        .unwrap();

    let issued = h.vm.exchange_oauth("tok").await.unwrap();
    assert_eq!(issued.metadata.entity, Entity::user(uid));
    assert!(issued.metadata.scopes.contains(&es(Entity::system(), Scope::Admin)));
    assert_eq!(
        (issued.metadata.expires_at - issued.metadata.created_at).num_seconds(),
        h.vm.config().oauth_token_lifetime_secs as i64
    );
}

#[tokio::test]
async fn provider_failures_are_exchange_failures() {
    let h = setup_with(FakeProvider::default().with("garbled", "not-an-email")).await;

    let err = h.vm.exchange_oauth("unknown").await.unwrap_err();
    assert!(matches!(err, TvmError::ExchangeFailure { .. }));

    let err = h.vm.exchange_oauth("garbled").await.unwrap_err();
    assert!(matches!(err, TvmError::ExchangeFailure { .. }));
}

/// Grant store whose next batch write fails once, then recovers.
#[derive(Clone)]
struct FlakyGrants {
    inner: SurrealUserScopeRepository<Db>,
    fail_next_batch: Arc<AtomicBool>,
}

impl UserScopeRepository for FlakyGrants {
    async fn get_user_scopes(&self, user_id: i64) -> TvmResult<Vec<EntityScope>> {
        self.inner.get_user_scopes(user_id).await
    }
    async fn get_user_scopes_on_organization(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> TvmResult<Vec<EntityScope>> {
        self.inner
            .get_user_scopes_on_organization(user_id, organization_id)
            .await
    }
    async fn get_user_scopes_on_workspace(
        &self,
        user_id: i64,
        workspace_id: i64,
    ) -> TvmResult<Vec<EntityScope>> {
        self.inner
            .get_user_scopes_on_workspace(user_id, workspace_id)
            .await
    }
    async fn get_user_scopes_on_entity(
        &self,
        user_id: i64,
        entity: Entity,
    ) -> TvmResult<Vec<EntityScope>> {
        self.inner.get_user_scopes_on_entity(user_id, entity).await
    }
    async fn add_user_scope(&self, user_id: i64, grant: EntityScope) -> TvmResult<()> {
        self.inner.add_user_scope(user_id, grant).await
    }
    async fn remove_user_scope(&self, user_id: i64, grant: EntityScope) -> TvmResult<()> {
        self.inner.remove_user_scope(user_id, grant).await
    }
    async fn apply_user_scope_changes(
        &self,
        user_id: i64,
        add: &[EntityScope],
        remove: &[EntityScope],
    ) -> TvmResult<()> {
        if self.fail_next_batch.swap(false, Ordering::SeqCst) {
            return Err(TvmError::StoreFailure("transient".into()));
        }
        self.inner.apply_user_scope_changes(user_id, add, remove).await
    }
    async fn list_grantees(&self, entity: Entity, scope: Scope) -> TvmResult<Vec<UserScope>> {
        self.inner.list_grantees(entity, scope).await
    }
}

#[tokio::test]
async fn login_after_failed_first_login_restores_self_grants() {
    let h = setup().await;
    let vm = VendingMachine::new(
        h.tokens.clone(),
        FlakyGrants {
            inner: h.grants.clone(),
            fail_next_batch: Arc::new(AtomicBool::new(true)),
        },
        h.users.clone(),
        FakeProvider::default().with("tok", "flaky@example.com"),
        ActionCatalog::new(),
        VendingConfig::default(),
    );

    let err = vm.exchange_oauth("tok").await.unwrap_err();
    assert!(matches!(err, TvmError::StoreFailure(_)));
    // The user row survived the failed login.
    let stored = h.users.get_by_email("flaky@example.com").await.unwrap();

    let issued = vm.exchange_oauth("tok").await.unwrap();
    let me = issued.metadata.entity;
    assert_eq!(me, Entity::user(stored.id));
    assert!(issued.metadata.scopes.contains(&es(me, Scope::Read)));
    assert!(issued.metadata.scopes.contains(&es(me, Scope::Write)));

    let mut roles = vm.get_roles(&issued.token).await.unwrap();
    roles.sort();
    assert_eq!(roles, vec![es(me, Scope::Read), es(me, Scope::Write)]);
}

#[tokio::test]
async fn repeat_login_keeps_self_grants_single() {
    let h = setup_with(FakeProvider::default().with("tok", "twice@example.com")).await;

    let first = h.vm.exchange_oauth("tok").await.unwrap();
    let second = h.vm.exchange_oauth("tok").await.unwrap();
    let me = first.metadata.entity;

    let mut held = h.grants.get_user_scopes(me.id).await.unwrap();
    held.sort();
    assert_eq!(held, vec![es(me, Scope::Read), es(me, Scope::Write)]);
    assert_eq!(second.metadata.scopes.len(), 2);
}

/// Token store where every key is already taken.
struct CollidingTokens {
    puts: Arc<AtomicU32>,
}

impl TokenRepository for CollidingTokens {
    async fn get(&self, _token: &str) -> TvmResult<TokenRecord> {
        Err(TvmError::TokenNotFound)
    }
    async fn put(&self, _record: &TokenRecord) -> TvmResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(TvmError::TokenConflict)
    }
    async fn delete(&self, _token: &str) -> TvmResult<()> {
        Err(TvmError::TokenNotFound)
    }
    async fn list_for_entity(&self, _entity: Entity) -> TvmResult<Vec<TokenMetadata>> {
        Ok(Vec::new())
    }
    async fn delete_by_id(&self, _entity: Entity, _id: &str) -> TvmResult<()> {
        Err(TvmError::TokenNotFound)
    }
    async fn purge_expired(&self) -> TvmResult<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn exhausted_key_collisions_surface_as_store_failure() {
    let h = setup().await;
    let puts = Arc::new(AtomicU32::new(0));
    let vm = VendingMachine::new(
        CollidingTokens { puts: puts.clone() },
        h.grants.clone(),
        h.users.clone(),
        FakeProvider::default().with("tok", "unlucky@example.com"),
        ActionCatalog::new(),
        VendingConfig::default(),
    );

    let err = vm.exchange_oauth("tok").await.unwrap_err();
    assert!(matches!(err, TvmError::StoreFailure(_)));
    assert!(err.is_retryable());
    assert_eq!(
        puts.load(Ordering::SeqCst),
        VendingConfig::default().token_insert_attempts
    );
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_roles_requires_user_token_with_self_read() {
    let h = setup().await;
    plant(
        &h,
        "tok-org",
        Entity::organization(1),
        vec![es(Entity::organization(1), Scope::Read)],
    )
    .await;
    assert!(matches!(
        h.vm.get_roles("tok-org").await,
        Err(TvmError::ImproperUsage { .. })
    ));

    plant(
        &h,
        "tok-noread",
        Entity::user(1),
        vec![es(Entity::user(1), Scope::Write)],
    )
    .await;
    assert!(matches!(
        h.vm.get_roles("tok-noread").await,
        Err(TvmError::InsufficientPermissions { .. })
    ));
}

#[tokio::test]
async fn roles_by_entity_aggregates_nested_grants() {
    let h = setup().await;
    let orgs = SurrealOrganizationRepository::new(h.db.clone());
    let workspaces = SurrealWorkspaceRepository::new(h.db.clone());
    let resources = SurrealResourceRepository::new(h.db.clone());

    let org = orgs
        .create(CreateOrganization { name: "acme".into() })
        .await
        .unwrap();
    let other = orgs
        .create(CreateOrganization { name: "other".into() })
        .await
        .unwrap();
    let ws = workspaces
        .create(CreateWorkspace {
            organization_id: org.id,
            name: "prod".into(),
        })
        .await
        .unwrap();
    let app = resources
        .create(CreateResource {
            workspace_id: ws.id,
            name: "api".into(),
        })
        .await
        .unwrap();
    let other_ws = workspaces
        .create(CreateWorkspace {
            organization_id: other.id,
            name: "prod".into(),
        })
        .await
        .unwrap();
    let other_app = resources
        .create(CreateResource {
            workspace_id: other_ws.id,
            name: "api".into(),
        })
        .await
        .unwrap();

    let uid = user(&h, "member@example.com").await;
    h.grants
        .apply_user_scope_changes(
            uid,
            &[
                es(org.entity(), Scope::Read),
                es(ws.entity(), Scope::Write),
                es(app.entity(), Scope::Admin),
                es(other.entity(), Scope::Admin),
                es(other_ws.entity(), Scope::Write),
                es(other_app.entity(), Scope::Read),
            ],
            &[],
        )
        .await
        .unwrap();

    plant(
        &h,
        "tok-viewer",
        Entity::user(99),
        vec![
            es(org.entity(), Scope::Read),
            es(ws.entity(), Scope::Read),
            es(app.entity(), Scope::Read),
        ],
    )
    .await;

    let mut on_org = h
        .vm
        .get_roles_by_entity("tok-viewer", uid, org.entity())
        .await
        .unwrap();
    on_org.sort();
    let mut expected = vec![
        es(org.entity(), Scope::Read),
        es(ws.entity(), Scope::Write),
        es(app.entity(), Scope::Admin),
    ];
    expected.sort();
    assert_eq!(on_org, expected);
    assert!(!on_org.contains(&es(other_ws.entity(), Scope::Write)));
    assert!(!on_org.contains(&es(other_app.entity(), Scope::Read)));

    let on_ws = h
        .vm
        .get_roles_by_entity("tok-viewer", uid, ws.entity())
        .await
        .unwrap();
    assert_eq!(on_ws.len(), 2);
    assert!(!on_ws.contains(&es(other_app.entity(), Scope::Read)));

    let on_app = h
        .vm
        .get_roles_by_entity("tok-viewer", uid, app.entity())
        .await
        .unwrap();
    assert_eq!(on_app, vec![es(app.entity(), Scope::Admin)]);

    let err = h
        .vm
        .get_roles_by_entity("tok-viewer", uid, other.entity())
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::InsufficientPermissions { .. }));
}

#[tokio::test]
async fn scenario_d_missing_admin_on_one_entity_blocks_the_batch() {
    let h = setup().await;
    let orgs = SurrealOrganizationRepository::new(h.db.clone());
    let org = orgs
        .create(CreateOrganization { name: "acme".into() })
        .await
        .unwrap();
    let uid = user(&h, "target@example.com").await;
    plant(
        &h,
        "tok-d",
        Entity::user(50),
        vec![es(org.entity(), Scope::Admin)],
    )
    .await;

    let err = h
        .vm
        .update_roles(
            "tok-d",
            uid,
            &[es(org.entity(), Scope::Write)],
            &[es(Entity::workspace(9), Scope::Read)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TvmError::InsufficientPermissions { missing }
            if missing == es(Entity::workspace(9), Scope::Admin)
    ));
    assert!(h.grants.get_user_scopes(uid).await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_on_all_but_one_entity_is_not_enough() {
    let h = setup().await;
    let uid = user(&h, "target@example.com").await;
    plant(
        &h,
        "tok-p5",
        Entity::user(50),
        vec![
            es(Entity::organization(1), Scope::Admin),
            es(Entity::organization(2), Scope::Admin),
        ],
    )
    .await;

    let err = h
        .vm
        .update_roles(
            "tok-p5",
            uid,
            &[
                es(Entity::organization(1), Scope::Read),
                es(Entity::organization(2), Scope::Read),
                es(Entity::organization(3), Scope::Read),
            ],
            &[],
        )
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    assert!(h.grants.get_user_scopes(uid).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_apply_leaves_grants_unchanged() {
    let h = setup().await;
    let orgs = SurrealOrganizationRepository::new(h.db.clone());
    let org = orgs
        .create(CreateOrganization { name: "acme".into() })
        .await
        .unwrap();
    let uid = user(&h, "target@example.com").await;
    let existing = es(org.entity(), Scope::Read);
    h.grants.add_user_scope(uid, existing).await.unwrap();

    let ghost = Entity::workspace(4_242);
    plant(
        &h,
        "tok-p4",
        Entity::user(50),
        vec![es(org.entity(), Scope::Admin), es(ghost, Scope::Admin)],
    )
    .await;

    let err = h
        .vm
        .update_roles(
            "tok-p4",
            uid,
            &[es(org.entity(), Scope::Write), es(ghost, Scope::Read)],
            &[existing],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::EntityNotFound { .. }), "got {err:?}");
    assert_eq!(h.grants.get_user_scopes(uid).await.unwrap(), vec![existing]);
}

#[tokio::test]
async fn update_roles_applies_and_leaves_old_snapshots_alone() {
    let h = setup().await;
    let orgs = SurrealOrganizationRepository::new(h.db.clone());
    let org = orgs
        .create(CreateOrganization { name: "acme".into() })
        .await
        .unwrap();
    let uid = user(&h, "target@example.com").await;
    let write = es(org.entity(), Scope::Write);
    h.grants.add_user_scope(uid, write).await.unwrap();

    // A token the target obtained while still holding Write.
    plant(&h, "tok-target", Entity::user(uid), vec![write]).await;
    plant(
        &h,
        "tok-admin",
        Entity::user(50),
        vec![es(org.entity(), Scope::Admin)],
    )
    .await;

    let read = es(org.entity(), Scope::Read);
    h.vm
        .update_roles("tok-admin", uid, &[read], &[write])
        .await
        .unwrap();
    assert_eq!(h.grants.get_user_scopes(uid).await.unwrap(), vec![read]);

    h.vm.verify_access("tok-target", &[write]).await.unwrap();
}

#[tokio::test]
async fn empty_update_is_a_no_op() {
    let h = setup().await;
    plant(&h, "tok-empty", Entity::user(1), vec![]).await;
    h.vm.update_roles("tok-empty", 1, &[], &[]).await.unwrap();
}

#[tokio::test]
async fn update_for_unknown_user_is_entity_not_found() {
    let h = setup().await;
    plant(
        &h,
        "tok-admin",
        Entity::user(50),
        vec![es(Entity::system(), Scope::Admin)],
    )
    .await;

    let err = h
        .vm
        .update_roles("tok-admin", 777, &[es(Entity::system(), Scope::Admin)], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, TvmError::EntityNotFound { .. }));
}

// ---------------------------------------------------------------------------
// Revocation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_revokes_the_presented_token() {
    let h = setup().await;
    plant(&h, "tok-bye", Entity::user(1), vec![]).await;

    h.vm.revoke_token("tok-bye").await.unwrap();
    assert!(matches!(
        h.vm.verify_access("tok-bye", &[]).await,
        Err(TvmError::TokenNotFound)
    ));
    assert!(matches!(
        h.vm.revoke_token("tok-bye").await,
        Err(TvmError::TokenNotFound)
    ));
}

#[tokio::test]
async fn revoke_by_id_requires_write_on_the_owner() {
    let h = setup().await;
    plant(&h, "victim", Entity::user(1), vec![]).await;
    let id = token_id("victim");

    plant(
        &h,
        "tok-reader",
        Entity::user(1),
        vec![es(Entity::user(1), Scope::Read)],
    )
    .await;
    assert!(matches!(
        h.vm.revoke_token_by_id("tok-reader", 1, &id).await,
        Err(TvmError::InsufficientPermissions { .. })
    ));

    plant(
        &h,
        "tok-writer",
        Entity::user(1),
        vec![es(Entity::user(1), Scope::Write)],
    )
    .await;
    h.vm.revoke_token_by_id("tok-writer", 1, &id).await.unwrap();
    assert!(matches!(
        h.vm.verify_access("victim", &[]).await,
        Err(TvmError::TokenNotFound)
    ));
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// A token store that never answers.
struct StalledTokens;

impl TokenRepository for StalledTokens {
    async fn get(&self, _token: &str) -> TvmResult<TokenRecord> {
        std::future::pending().await
    }
    async fn put(&self, _record: &TokenRecord) -> TvmResult<()> {
        std::future::pending().await
    }
    async fn delete(&self, _token: &str) -> TvmResult<()> {
        std::future::pending().await
    }
    async fn list_for_entity(&self, _entity: Entity) -> TvmResult<Vec<TokenMetadata>> {
        std::future::pending().await
    }
    async fn delete_by_id(&self, _entity: Entity, _id: &str) -> TvmResult<()> {
        std::future::pending().await
    }
    async fn purge_expired(&self) -> TvmResult<u64> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stalled_store_hits_the_deadline() {
    let h = setup().await;
    let vm = VendingMachine::new(
        StalledTokens,
        h.grants.clone(),
        h.users.clone(),
        FakeProvider::default(),
        ActionCatalog::new(),
        VendingConfig {
            store_timeout_ms: 50,
            ..VendingConfig::default()
        },
    );

    let err = vm.verify_access("anything", &[]).await.unwrap_err();
    assert!(matches!(err, TvmError::DeadlineExceeded { after_ms: 50 }));
    assert!(err.is_retryable());
}
