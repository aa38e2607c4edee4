use anyhow::Context;
use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::cli::{utils, OutputFormat};
use crate::config::config;
use crate::database::{postgres::PgUserStore, DatabaseManager, StoreError, UserRecord, UserStore};
use crate::types::Role;

#[derive(Subcommand)]
pub enum DbCommands {
    #[command(about = "Create tables, indexes and the audit append-only trigger")]
    Init,

    #[command(about = "Check that the database is reachable")]
    Ping,
}

#[derive(Subcommand)]
pub enum UserCommands {
    #[command(about = "Create a user account")]
    Create {
        #[arg(long, help = "Email address (used to sign in)")]
        email: String,
        #[arg(long, help = "client, therapist, admin, support or platform_admin")]
        role: Role,
        #[arg(long, help = "Practice id; omit only for platform admins")]
        tenant_id: Option<Uuid>,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, env = "HAVEN_USER_PASSWORD", hide_env_values = true, help = "Initial password")]
        password: Option<String>,
    },
}

async fn connect() -> anyhow::Result<DatabaseManager> {
    DatabaseManager::connect(&config().database)
        .await
        .context("failed to connect to PostgreSQL (is DATABASE_URL set?)")
}

pub async fn handle_db(cmd: DbCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let db = connect().await?;
    let result = match cmd {
        DbCommands::Init => {
            db.apply_schema().await?;
            utils::output_success(output_format, "Database schema applied", None)
        }
        DbCommands::Ping => {
            db.health_check().await?;
            utils::output_success(output_format, "Database is reachable", None)
        }
    };
    db.close().await;
    result
}

pub async fn handle_user(cmd: UserCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        UserCommands::Create {
            email,
            role,
            tenant_id,
            first_name,
            last_name,
            password,
        } => {
            if tenant_id.is_none() && role != Role::PlatformAdmin {
                anyhow::bail!("--tenant-id is required for role {}", role);
            }
            let password = password.context("a password is required (--password or HAVEN_USER_PASSWORD)")?;
            if password.chars().count() < 12 {
                anyhow::bail!("password must be at least 12 characters");
            }

            let user = UserRecord::new(tenant_id, &email, &hash_password(&password)?, role, &first_name, &last_name);

            let db = connect().await?;
            let store = PgUserStore::new(db.pool().clone());
            let created = store.create(&user).await;
            db.close().await;

            match created {
                Ok(()) => utils::output_success(
                    output_format,
                    &format!("Created {} {} ({})", role, user.email, user.id),
                    Some(json!({ "user": user })),
                ),
                Err(StoreError::Conflict(msg)) => {
                    utils::output_error(output_format, &msg, Some("CONFLICT"))?;
                    anyhow::bail!("user was not created")
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
