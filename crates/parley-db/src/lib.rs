//! # parley-db
//!
//! Persistence for Parley's role hierarchy:
//! - **ordinal** — pure level planning (reorder, compaction, consistency checks)
//! - **role_store** — the ordinal store that keeps levels dense and the role counter in sync
//! - **repository** — PostgreSQL backend, plus chat/member/user loading
//! - **memory** — in-process backend for tests and local runs

pub mod memory;
pub mod ordinal;
pub mod postgres;
pub mod repository;
pub mod role_store;
pub mod store;

use anyhow::Result;
use sqlx::PgPool;

pub use memory::MemoryStore;
pub use repository::{PgChatDirectory, PgRoleStorage};
pub use role_store::{RoleOrdinalStore, RolePatch};
pub use store::{ChatDirectory, MembershipStore, RoleStorage, RoleTransaction, StoreError, StoreResult};

/// Shared PostgreSQL handle.
#[derive(Clone)]
pub struct Database {
    pub pg: PgPool,
}

impl Database {
    pub async fn connect(config: &parley_common::config::AppConfig) -> Result<Self> {
        tracing::info!("Connecting to PostgreSQL...");
        let pg = postgres::connect(&config.database).await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pg })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pg).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }

    pub fn role_storage(&self) -> PgRoleStorage {
        PgRoleStorage::new(self.pg.clone())
    }

    pub fn chat_directory(&self) -> PgChatDirectory {
        PgChatDirectory::new(self.pg.clone())
    }
}
