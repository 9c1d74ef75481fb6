//! Relational samples store
//!
//! The alert monitor only sees the [`SampleStore`] trait; the HTTP layer
//! works against the concrete SQLite implementation.

pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::data::OvercrowdedReading;

pub use sqlite::SqliteStore;

/// Read interface the overcrowding monitor is built against
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// All samples with `timestamp >= cutoff` and `visitor_count > threshold`,
    /// joined with their location name, oldest first.
    async fn overcrowded_since(
        &self,
        cutoff: DateTime<Utc>,
        threshold: i64,
    ) -> Result<Vec<OvercrowdedReading>, StoreError>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration {version} ({name}) failed: {source}")]
    Migration {
        version: i32,
        name: &'static str,
        source: rusqlite::Error,
    },

    #[error("Location {0} not found")]
    LocationNotFound(i64),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}
