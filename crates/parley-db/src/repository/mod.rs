//! Repository layer — PostgreSQL queries organized by domain.

pub mod chats;
pub mod roles;

pub use chats::PgChatDirectory;
pub use roles::PgRoleStorage;
