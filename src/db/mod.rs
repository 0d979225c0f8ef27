//! Database module: row mappers and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row-to-entity mapping and view models returned by repositories.
//! - `repo`: SQL-only functions for settings, jobs, job logs, admins and sessions.
//!
//! External modules should import from `wp_translator::db`; the repository
//! API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{AdminCredentials, NewJob};
