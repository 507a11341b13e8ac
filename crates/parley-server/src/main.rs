//! # Parley
//!
//! Operator binary for the role hierarchy:
//! - schema migrations
//! - users and chats for bootstrapping
//! - authorized membership changes (join, leave, mute, unmute, kick) and blocks
//! - authorized role administration (create, grant, reorder, delete)
//! - level verification and repair after a failed rollback

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use chrono::{Duration, Utc};
use parley_api::{MemberService, RoleService};
use parley_common::config::{self, LogConfig};
use parley_common::error::ParleyError;
use parley_common::models::{ChatKind, CreateRoleRequest, ReorderRolesRequest};
use parley_common::permissions::Permissions;
use parley_db::repository::chats;
use parley_db::{Database, PgChatDirectory, PgRoleStorage, RoleStorage};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Parley - ranked chat roles
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about = "Parley role hierarchy administration", long_about = None)]
struct Cli {
    /// Config file (defaults to ./config.toml when present)
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Create a user
    CreateUser { username: String },

    /// Create a chat with its default role; the owner becomes its first member
    CreateChat {
        owner: Uuid,
        #[arg(short, long)]
        name: Option<String>,
        /// Direct chat instead of a group
        #[arg(long)]
        direct: bool,
        /// Hide the chat from non-members
        #[arg(long)]
        private: bool,
    },

    /// Join a public group chat as `user`
    Join { chat: Uuid, user: Uuid },

    /// Leave a chat as `user`
    Leave { chat: Uuid, user: Uuid },

    /// Mute a member for a number of minutes
    Mute {
        actor: Uuid,
        chat: Uuid,
        user: Uuid,
        #[arg(short, long, default_value_t = 60)]
        minutes: i64,
    },

    /// Lift a member's mute
    Unmute { actor: Uuid, chat: Uuid, user: Uuid },

    /// Remove a member from a chat
    Kick { actor: Uuid, chat: Uuid, user: Uuid },

    /// Record that `user` blocked `blocked`
    Block { user: Uuid, blocked: Uuid },

    /// List a chat's roles, most privileged first
    Roles { chat: Uuid },

    /// Create a ranked role at the bottom of the hierarchy
    CreateRole {
        actor: Uuid,
        chat: Uuid,
        name: String,
        /// Comma separated, e.g. `kick_member,mute_member`
        #[arg(short, long, value_parser = Permissions::parse_list)]
        permissions: Option<Permissions>,
    },

    /// Give a role to a chat member
    Grant {
        actor: Uuid,
        chat: Uuid,
        role: Uuid,
        /// Chat-member id
        member: Uuid,
    },

    /// Move roles to the top of the level span they occupy, in the given order
    Reorder {
        actor: Uuid,
        chat: Uuid,
        #[arg(required = true)]
        roles: Vec<Uuid>,
    },

    /// Delete a ranked role
    DeleteRole { actor: Uuid, chat: Uuid, role: Uuid },

    /// Check that levels are dense and the role counter matches
    Verify {
        chat: Uuid,
        /// Re-densify levels in their current order if inconsistent
        #[arg(long)]
        repair: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.log);

    tracing::debug!("Starting parley v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(config).await?;
    let roles = RoleService::new(db.role_storage(), db.chat_directory(), config);
    let members = MemberService::new(db.chat_directory());

    let storage = roles.store().storage();
    storage.health_check().await?;
    tracing::debug!(backend = storage.backend_name(), "Role storage ready");

    match run(cli.command, &db, &roles, &members).await {
        Err(err) => match err.downcast_ref::<ParleyError>() {
            Some(parley) => {
                print_json(&serde_json::json!({
                    "error": parley.error_code(),
                    "status": parley.status_code(),
                    "message": parley.public_message(),
                }))?;
                std::process::exit(1);
            }
            None => Err(err),
        },
        ok => ok,
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(
    command: Commands,
    db: &Database,
    service: &RoleService<PgRoleStorage, PgChatDirectory>,
    members: &MemberService<PgChatDirectory>,
) -> Result<()> {
    match command {
        Commands::Migrate => db.migrate().await?,

        Commands::CreateUser { username } => {
            let user = chats::create_user(&db.pg, &username).await?;
            print_json(&user)?;
        }

        Commands::CreateChat {
            owner,
            name,
            direct,
            private,
        } => {
            let kind = if direct { ChatKind::Direct } else { ChatKind::Group };
            let chat = chats::create_chat(&db.pg, owner, name.as_deref(), kind, private).await?;
            print_json(&chat)?;
        }

        Commands::Join { chat, user } => {
            let member = members.join(user, chat).await?;
            print_json(&member)?;
        }

        Commands::Leave { chat, user } => members.leave(user, chat).await?,

        Commands::Mute {
            actor,
            chat,
            user,
            minutes,
        } => {
            let until = Utc::now() + Duration::minutes(minutes);
            members.mute(actor, chat, user, until).await?;
        }

        Commands::Unmute { actor, chat, user } => members.unmute(actor, chat, user).await?,

        Commands::Kick { actor, chat, user } => members.kick(actor, chat, user).await?,

        Commands::Block { user, blocked } => members.block(user, blocked).await?,

        Commands::Roles { chat } => {
            let roles = service.store().storage().list_roles(chat).await?;
            print_json(&roles)?;
        }

        Commands::CreateRole {
            actor,
            chat,
            name,
            permissions,
        } => {
            let role = service
                .create_role(actor, chat, CreateRoleRequest { name, permissions })
                .await?;
            print_json(&role)?;
        }

        Commands::Grant {
            actor,
            chat,
            role,
            member,
        } => {
            service.add_role_member(actor, chat, role, member).await?;
        }

        Commands::Reorder { actor, chat, roles } => {
            let moved = service
                .reorder_roles(actor, chat, ReorderRolesRequest { role_ids: roles })
                .await?;
            print_json(&moved)?;
        }

        Commands::DeleteRole { actor, chat, role } => {
            service.delete_role(actor, chat, role).await?;
        }

        Commands::Verify { chat, repair } => {
            let store = service.store();
            let report = store.verify_levels(chat).await?;
            print_json(&report)?;
            if !report.is_consistent() {
                if !repair {
                    anyhow::bail!("role levels of chat {chat} are inconsistent; rerun with --repair");
                }
                let moved = store.repair_levels(chat).await?;
                tracing::info!(chat_id = %chat, moved, "Repair complete");
                print_json(&store.verify_levels(chat).await?)?;
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
