//! # parley-common
//!
//! Shared types, configuration, error handling, and the rank utilities used across all Parley crates.
//! This is the foundation layer: models and primitives, no storage and no policy decisions.

pub mod config;
pub mod error;
pub mod models;
pub mod permissions;
pub mod snowflake;
pub mod validation;
pub mod verdict;
