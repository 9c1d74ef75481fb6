//! footfall: tourist foot-traffic tracking with overcrowding alerts
//!
//! Visitor-count samples are recorded per location in SQLite. A background
//! monitor checks the trailing window on a fixed cadence and sends one
//! batched notification per cycle for every location over the threshold.
//!
//! # Features
//!
//! - **Overcrowding Monitor**: scheduled, read-only, one message per cycle
//! - **Dispatchers**: SMTP, webhook, or log-only
//! - **Samples API**: record, list and delete visitor counts
//! - **Recommendations**: quietest spots, or the busiest spots for an interest
//! - **Owner Trend**: visitors per location per day over the last week
//! - **Planner Reports**: regional and daily totals, next-day prediction, CSV export
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use footfall::alerts::{AlertPolicy, LogDispatcher, OvercrowdingMonitor};
//! use footfall::data::{NewLocation, NewSample};
//! use footfall::storage::SqliteStore;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! let beach = store.create_location(NewLocation::new("Beach", "Wellington")).await?;
//! store.record_sample(NewSample::new(beach.id, 80)).await?;
//!
//! let monitor = OvercrowdingMonitor::new(store, Arc::new(LogDispatcher), AlertPolicy::default());
//! let outcome = monitor.run_cycle().await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod data;
pub mod reports;
pub mod storage;

// Re-export commonly used types
pub use alerts::{AlertPolicy, CycleOutcome, OvercrowdingMonitor};
pub use data::{Location, VisitorSample};
pub use storage::{SampleStore, SqliteStore, StoreError};
