//! Integration tests for checksql.
//!
//! `scan_test` runs against the in-memory databases. `postgres_test` needs
//! a running PostgreSQL database: set DATABASE_URL to run it.

pub mod postgres_test;
pub mod scan_test;
