//! Cross-engine tenant schema migration: discovery, DDL translation, row copy,
//! stored-logic recreation and verification between MySQL, PostgreSQL and Supabase.

pub mod api;
pub mod db_types;
pub mod ddl;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod rows;
pub mod settings;
pub mod sql_utils;
pub mod stored_logic;
pub mod value;

#[cfg(test)]
mod test_support;

pub use error::{MigrationError, Result};
pub use orchestrator::{MigrationOptions, MigrationReport, MigrationRunner};
