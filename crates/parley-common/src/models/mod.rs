//! Core domain models shared across all Parley crates.
//!
//! These are the already-loaded entities the policy engine decides over and the
//! ordinal store persists. Ids are UUID v7 (see [`crate::snowflake`]).

pub mod chat;
pub mod member;
pub mod role;
pub mod user;

pub use chat::*;
pub use member::*;
pub use role::*;
pub use user::*;
