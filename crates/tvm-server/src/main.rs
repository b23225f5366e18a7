//! TVM Server: operator entry point for the token vending machine
//! store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use tvm_auth::{HttpUserInfoProvider, UserInfoConfig, VendingConfig, VendingMachine};
use tvm_core::action::ActionCatalog;
use tvm_core::models::entity::Entity;
use tvm_core::models::scope::{EntityScope, Scope};
use tvm_core::repository::{TokenRepository, UserRepository, UserScopeRepository};
use tvm_db::repository::{SurrealTokenRepository, SurrealUserRepository, SurrealUserScopeRepository};
use tvm_db::{DbConfig, DbManager};

#[derive(Debug, Parser)]
#[command(name = "tvm", version, about = "Token vending machine operator tool")]
struct Cli {
    /// TOML config file. `TVM_`-prefixed environment variables override
    /// it (e.g. `TVM_DB__URL`).
    #[arg(short, long, env = "TVM_CONFIG", default_value = "tvm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Grant System Admin to an existing user.
    GrantAdmin {
        #[arg(long)]
        email: String,
    },
    /// Delete tokens whose expiry has passed.
    PurgeExpiredTokens,
    /// Exchange an upstream OAuth access token for a platform token.
    Exchange {
        #[arg(long, env = "TVM_PROVIDER_TOKEN")]
        provider_token: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerConfig {
    db: DbConfig,
    /// Separate, possibly non-durable, instance for the token table.
    /// Falls back to `db` when unset.
    token_db: Option<DbConfig>,
    vending: VendingConfig,
    userinfo: UserInfoConfig,
}

impl ServerConfig {
    fn load(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("TVM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }
}

struct Stores {
    main: DbManager,
    tokens: DbManager,
}

impl Stores {
    async fn connect(config: &ServerConfig) -> Result<Self> {
        let main = DbManager::connect(&config.db)
            .await
            .context("failed to connect to the grant store")?;
        let tokens = match &config.token_db {
            Some(token_db) => DbManager::connect(token_db)
                .await
                .context("failed to connect to the token store")?,
            None => main.clone(),
        };
        Ok(Self { main, tokens })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tvm=info,info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;
    let stores = Stores::connect(&config).await?;

    match cli.command {
        Command::Migrate => {
            stores.main.migrate().await?;
            if config.token_db.is_some() {
                stores.tokens.migrate().await?;
            }
            tracing::info!("Schema is up to date");
        }
        Command::GrantAdmin { email } => {
            let users = SurrealUserRepository::new(stores.main.client().clone());
            let grants = SurrealUserScopeRepository::new(stores.main.client().clone());

            let user = users
                .get_by_email(&email.trim().to_lowercase())
                .await
                .with_context(|| format!("no user with email {email}"))?;
            grants
                .add_user_scope(user.id, EntityScope::new(Entity::system(), Scope::Admin))
                .await?;
            tracing::info!(user_id = user.id, "Granted System Admin");
        }
        Command::PurgeExpiredTokens => {
            let tokens = SurrealTokenRepository::new(stores.tokens.client().clone());
            let purged = tokens.purge_expired().await?;
            tracing::info!(purged, "Purged expired tokens");
        }
        Command::Exchange { provider_token } => {
            let identity = HttpUserInfoProvider::new(&config.userinfo)?;
            let vm = VendingMachine::new(
                SurrealTokenRepository::new(stores.tokens.client().clone()),
                SurrealUserScopeRepository::new(stores.main.client().clone()),
                SurrealUserRepository::new(stores.main.client().clone()),
                identity,
                ActionCatalog::new(),
                config.vending,
            );
            let issued = vm.exchange_oauth(&provider_token).await?;
            println!("{}", issued.token);
            println!("id: {}", issued.metadata.id);
            println!("entity: {}", issued.metadata.entity);
            println!("expires_at: {}", issued.metadata.expires_at.to_rfc3339());
        }
    }

    Ok(())
}
