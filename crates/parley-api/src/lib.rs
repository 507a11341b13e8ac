//! # parley-api
//!
//! The facade a request layer calls. Each operation loads the actor and chat,
//! asks the policy engine, and only then touches the ordinal store. Denials
//! surface as [`ParleyError::Denied`] carrying the verdict.
//!
//! [`ParleyError::Denied`]: parley_common::error::ParleyError::Denied

pub mod members;
pub mod roles;

pub use members::MemberService;
pub use roles::RoleService;
