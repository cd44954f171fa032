//! # Postgres
//!
//! This crate provides the database connection pool for the passport tracker.

/// Database client for the passport tracker application.
pub mod database;
