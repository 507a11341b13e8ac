//! # parley-policy
//!
//! Authorization decisions for chats, members, roles and messages.
//!
//! Every function here is pure: it receives an already-loaded actor, chat and
//! target, performs no I/O, and returns a [`Verdict`]. Denials are values, not
//! errors. The ranked actions (mute, kick, role edits, reorder, delete) share a
//! single algorithm in [`engine`], parameterised by the [`rules`] table.

pub mod chat;
pub mod engine;
pub mod member;
pub mod message;
pub mod role;
pub mod rules;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::Target;
pub use parley_common::verdict::{Verdict, VerdictCode};
pub use rules::{Action, Rule};
