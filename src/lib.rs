//! checksql - compile-checks SQL and PL/pgSQL fragments stored in table
//! columns against a test schema.
//!
//! This library exposes the core modules for use in integration tests.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod harness;
pub mod logging;
pub mod neutralize;
pub mod report;
pub mod scan;
pub mod sql;
