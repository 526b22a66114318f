//! # SQLite
//!
//! Relational store behind every service.
//!
//! Core purpose is to hold the course/video/quiz catalog and all per-learner
//! state (enrollments, section progress, attempts, the seen-video log).
//!
//! ## Implementation
//!
//! - Single pool shared through [`crate::state::AppState`]
//! - Schema applied idempotently at startup from `schema.sql`
//! - Per-learner rows are keyed by unique constraints and written with
//!   `INSERT .. ON CONFLICT .. DO UPDATE`, so concurrent retries of the same
//!   logical operation converge without explicit locking
//! - Grading side effects run inside one transaction; a partial write is never
//!   visible to a concurrent reader
use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

const SCHEMA: &str = include_str!("schema.sql");

pub async fn init_pool(database_url: &str) -> SqlitePool {
    let options = SqliteConnectOptions::from_str(database_url)
        .expect("Invalid database URL")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("Failed to open database");

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("Failed to apply schema");

    pool
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // One connection so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

    pool
}
