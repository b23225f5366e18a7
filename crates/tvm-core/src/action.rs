//! Action catalog: the fixed map from named platform operation to the
//! capability it requires.
//!
//! Each entry is a template `(EntityType, Scope)`. At call time the
//! caller binds the template to the concrete entity the operation
//! targets, yielding the [`EntityScope`] to verify. Adding an operation
//! means adding a table entry; there is no dynamic registration.
//!
//! A handful of operations are deliberately absent from the table and
//! are publicly reachable (see [`PublicOperation`]). Names that are in
//! neither set resolve to [`CatalogLookup::Unknown`] and must be denied.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TvmError, TvmResult};
use crate::models::entity::{Entity, EntityType};
use crate::models::scope::{EntityScope, Scope};

use EntityType::{Organization, Resource, System, User, Workspace};
use Scope::{Admin, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    // System
    ListAllOrganizations,
    ListAllUsers,

    // User
    GetUser,
    UpdateUser,
    GetRoles,
    ListTokens,
    RevokeToken,
    CreateOrganization,

    // Organization
    GetOrganization,
    UpdateOrganization,
    DeleteOrganization,
    ListWorkspaces,
    CreateWorkspace,
    ListMembers,
    UpdateMemberRoles,

    // Workspace
    GetWorkspace,
    UpdateWorkspace,
    DeleteWorkspace,
    ListApps,
    CreateApp,

    // Resource
    GetApp,
    GetAppStatus,
    GetAppLogs,
    DeployApp,
    UpdateAppConfig,
    DeleteApp,
}

/// The capability an action requires, before binding to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub entity_type: EntityType,
    pub scope: Scope,
}

impl ActionTemplate {
    pub const fn new(entity_type: EntityType, scope: Scope) -> Self {
        Self { entity_type, scope }
    }
}

/// Operations that require no token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicOperation {
    CheckEmailAvailability,
    CheckUsernameAvailability,
    CreateAccount,
    Logout,
}

impl PublicOperation {
    pub const ALL: [PublicOperation; 4] = [
        PublicOperation::CheckEmailAvailability,
        PublicOperation::CheckUsernameAvailability,
        PublicOperation::CreateAccount,
        PublicOperation::Logout,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PublicOperation::CheckEmailAvailability => "check_email_availability",
            PublicOperation::CheckUsernameAvailability => "check_username_availability",
            PublicOperation::CreateAccount => "create_account",
            PublicOperation::Logout => "logout",
        }
    }
}

struct CatalogEntry {
    action: Action,
    name: &'static str,
    template: ActionTemplate,
}

const fn entry(action: Action, name: &'static str, ty: EntityType, scope: Scope) -> CatalogEntry {
    CatalogEntry {
        action,
        name,
        template: ActionTemplate::new(ty, scope),
    }
}

static CATALOG: &[CatalogEntry] = &[
    entry(Action::ListAllOrganizations, "list_all_organizations", System, Admin),
    entry(Action::ListAllUsers, "list_all_users", System, Admin),
    entry(Action::GetUser, "get_user", User, Read),
    entry(Action::UpdateUser, "update_user", User, Write),
    entry(Action::GetRoles, "get_roles", User, Read),
    entry(Action::ListTokens, "list_tokens", User, Read),
    entry(Action::RevokeToken, "revoke_token", User, Write),
    entry(Action::CreateOrganization, "create_organization", User, Write),
    entry(Action::GetOrganization, "get_organization", Organization, Read),
    entry(Action::UpdateOrganization, "update_organization", Organization, Write),
    entry(Action::DeleteOrganization, "delete_organization", Organization, Admin),
    entry(Action::ListWorkspaces, "list_workspaces", Organization, Read),
    entry(Action::CreateWorkspace, "create_workspace", Organization, Write),
    entry(Action::ListMembers, "list_members", Organization, Read),
    entry(Action::UpdateMemberRoles, "update_member_roles", Organization, Admin),
    entry(Action::GetWorkspace, "get_workspace", Workspace, Read),
    entry(Action::UpdateWorkspace, "update_workspace", Workspace, Write),
    entry(Action::DeleteWorkspace, "delete_workspace", Workspace, Admin),
    entry(Action::ListApps, "list_apps", Workspace, Read),
    entry(Action::CreateApp, "create_app", Workspace, Write),
    entry(Action::GetApp, "get_app", Resource, Read),
    entry(Action::GetAppStatus, "get_app_status", Resource, Read),
    entry(Action::GetAppLogs, "get_app_logs", Resource, Read),
    entry(Action::DeployApp, "deploy_app", Resource, Write),
    entry(Action::UpdateAppConfig, "update_app_config", Resource, Write),
    entry(Action::DeleteApp, "delete_app", Resource, Admin),
];

/// Result of resolving an operation by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogLookup {
    Gated(Action, ActionTemplate),
    Public(PublicOperation),
    Unknown,
}

/// Read-only view over the static action table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionCatalog;

impl ActionCatalog {
    pub fn new() -> Self {
        Self
    }

    pub fn template(&self, action: Action) -> ActionTemplate {
        // Completeness of the table is asserted by tests.
        CATALOG
            .iter()
            .find(|e| e.action == action)
            .map(|e| e.template)
            .unwrap_or(ActionTemplate::new(System, Admin))
    }

    pub fn name(&self, action: Action) -> &'static str {
        CATALOG
            .iter()
            .find(|e| e.action == action)
            .map(|e| e.name)
            .unwrap_or("unknown")
    }

    /// Resolve a wire name to a gated action, a public operation, or
    /// nothing.
    pub fn lookup(&self, name: &str) -> CatalogLookup {
        if let Some(e) = CATALOG.iter().find(|e| e.name == name) {
            return CatalogLookup::Gated(e.action, e.template);
        }
        match PublicOperation::ALL.iter().find(|p| p.name() == name) {
            Some(p) => CatalogLookup::Public(*p),
            None => CatalogLookup::Unknown,
        }
    }

    /// Bind an action's template to the entity it targets.
    pub fn bind_action(&self, action: Action, entity: Entity) -> TvmResult<EntityScope> {
        bind(entity, self.template(action))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Action, &'static str, ActionTemplate)> {
        CATALOG.iter().map(|e| (e.action, e.name, e.template))
    }
}

/// Attach a concrete entity to a template. The entity's type must be the
/// one the template was declared for.
pub fn bind(entity: Entity, template: ActionTemplate) -> TvmResult<EntityScope> {
    if entity.entity_type != template.entity_type {
        return Err(TvmError::ImproperUsage {
            reason: format!(
                "action requires a {} entity, got {entity}",
                template.entity_type
            ),
        });
    }
    Ok(EntityScope::new(entity, template.scope))
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ActionCatalog.name(*self))
    }
}
