use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};

use super::migrations::apply_migrations;
use super::{SampleStore, StoreError};
use crate::data::{from_millis, Location, NewLocation, NewSample, OvercrowdedReading, VisitorSample};
use crate::reports::{
    DailyTotal, Interest, InterestRecommendation, LocationDailyTotal, Recommendation,
    RegionDailyTotal, RegionTotal, TrendFilter,
};

/// SQLite-backed samples store.
///
/// A single connection guarded by a mutex; all statements run on the
/// blocking thread pool so async callers never stall the runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("conn", &"<SQLite Connection>")
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Invalid(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::info!(path = %path.display(), "Opened samples database");
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and ephemeral runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        apply_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // ------------------------------------------------------------------
    // Locations
    // ------------------------------------------------------------------

    pub async fn create_location(&self, location: NewLocation) -> Result<Location, StoreError> {
        let name = location.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::Invalid("location name is required".to_string()));
        }

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO locations (name, region, category) VALUES (?1, ?2, ?3)",
                params![name, location.region, location.category],
            )?;

            Ok(Location {
                id: conn.last_insert_rowid(),
                name,
                region: location.region,
                category: location.category,
            })
        })
        .await
    }

    pub async fn list_locations(&self) -> Result<Vec<Location>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, region, category FROM locations ORDER BY name, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Location {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    region: row.get(2)?,
                    category: row.get(3)?,
                })
            })?;

            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------

    /// Record one observation. Unknown locations and negative counts are rejected.
    pub async fn record_sample(&self, sample: NewSample) -> Result<VisitorSample, StoreError> {
        if sample.visitor_count < 0 {
            return Err(StoreError::Invalid(format!(
                "visitor_count must be non-negative, got {}",
                sample.visitor_count
            )));
        }

        let timestamp = sample.timestamp.unwrap_or_else(Utc::now);

        self.with_conn(move |conn| {
            let location_name: String = conn
                .query_row(
                    "SELECT name FROM locations WHERE id = ?1",
                    [sample.location_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::LocationNotFound(sample.location_id))?;

            conn.execute(
                "INSERT INTO flow_data (location_id, recorded_at, visitors) VALUES (?1, ?2, ?3)",
                params![
                    sample.location_id,
                    timestamp.timestamp_millis(),
                    sample.visitor_count
                ],
            )?;

            Ok(VisitorSample {
                id: conn.last_insert_rowid(),
                location_id: sample.location_id,
                location_name,
                timestamp: from_millis(timestamp.timestamp_millis()),
                visitor_count: sample.visitor_count,
            })
        })
        .await
    }

    /// Most recent samples, newest first
    pub async fn latest_samples(&self, limit: usize) -> Result<Vec<VisitorSample>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, f.location_id, l.name, f.recorded_at, f.visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  ORDER BY f.recorded_at DESC, f.id DESC
                  LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], sample_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Samples with `from <= timestamp <= to`, newest first
    pub async fn samples_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VisitorSample>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, f.location_id, l.name, f.recorded_at, f.visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  WHERE f.recorded_at BETWEEN ?1 AND ?2
                  ORDER BY f.recorded_at DESC, f.id DESC",
            )?;
            let rows = stmt.query_map(
                [from.timestamp_millis(), to.timestamp_millis()],
                sample_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Delete a raw entry. Returns whether a row was removed.
    pub async fn delete_sample(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM flow_data WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Aggregations
    // ------------------------------------------------------------------

    /// Total visitors per region, busiest first
    pub async fn region_totals(&self, filter: TrendFilter) -> Result<Vec<RegionTotal>, StoreError> {
        self.with_conn(move |conn| {
            let (clause, args) = filter_clause(&filter);
            let sql = format!(
                "SELECT l.region, SUM(f.visitors) AS total_visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  {}
                  GROUP BY l.region
                  ORDER BY total_visitors DESC, l.region",
                clause
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok(RegionTotal {
                    region: row.get(0)?,
                    total_visitors: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Total visitors per UTC day, oldest first
    pub async fn daily_totals(&self, filter: TrendFilter) -> Result<Vec<DailyTotal>, StoreError> {
        self.with_conn(move |conn| {
            let (clause, args) = filter_clause(&filter);
            let sql = format!(
                "SELECT date(f.recorded_at / 1000, 'unixepoch') AS day, SUM(f.visitors) AS total
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  {}
                  GROUP BY day
                  ORDER BY day",
                clause
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok(DailyTotal {
                    day: row.get(0)?,
                    total: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Per-region, per-day totals for the CSV export
    pub async fn region_daily_totals(&self) -> Result<Vec<RegionDailyTotal>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.region, date(f.recorded_at / 1000, 'unixepoch') AS day,
                        SUM(f.visitors) AS total_visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  GROUP BY l.region, day
                  ORDER BY l.region, day",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(RegionDailyTotal {
                    region: row.get(0)?,
                    day: row.get(1)?,
                    total_visitors: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Least busy locations since `since`, by average visitor count
    pub async fn quietest_locations(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.name, AVG(f.visitors) AS avg_visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  WHERE f.recorded_at >= ?1
                  GROUP BY l.id, l.name
                  ORDER BY avg_visitors ASC, l.name
                  LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![since.timestamp_millis(), limit as i64], |row| {
                Ok(Recommendation {
                    location_id: row.get(0)?,
                    location: row.get(1)?,
                    avg_visitors: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Busiest locations of one category since `since`, by summed visitors
    pub async fn interest_recommendations(
        &self,
        interest: Interest,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InterestRecommendation>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.name, l.region, l.category, SUM(f.visitors) AS total_visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  WHERE l.category = ?1
                    AND f.recorded_at >= ?2
                  GROUP BY l.id
                  ORDER BY total_visitors DESC, l.name
                  LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![interest.as_str(), since.timestamp_millis(), limit as i64],
                |row| {
                    Ok(InterestRecommendation {
                        location_id: row.get(0)?,
                        name: row.get(1)?,
                        region: row.get(2)?,
                        category: row.get(3)?,
                        total_visitors: row.get(4)?,
                    })
                },
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Per-location, per-UTC-day totals since `since`, oldest day first
    pub async fn location_daily_totals(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationDailyTotal>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT l.name, date(f.recorded_at / 1000, 'unixepoch') AS day,
                        SUM(f.visitors) AS visitors
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  WHERE f.recorded_at >= ?1
                  GROUP BY l.id, day
                  ORDER BY day, l.name",
            )?;
            let rows = stmt.query_map([since.timestamp_millis()], |row| {
                Ok(LocationDailyTotal {
                    location: row.get(0)?,
                    day: row.get(1)?,
                    visitors: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    async fn overcrowded_since(
        &self,
        cutoff: DateTime<Utc>,
        threshold: i64,
    ) -> Result<Vec<OvercrowdedReading>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT l.name, f.visitors, f.recorded_at
                   FROM flow_data f
                   JOIN locations l ON f.location_id = l.id
                  WHERE f.recorded_at >= ?1
                    AND f.visitors > ?2
                  ORDER BY f.recorded_at, l.name",
            )?;
            let rows = stmt.query_map(params![cutoff.timestamp_millis(), threshold], |row| {
                Ok(OvercrowdedReading {
                    location_name: row.get(0)?,
                    visitor_count: row.get(1)?,
                    timestamp: from_millis(row.get(2)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn sample_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VisitorSample> {
    Ok(VisitorSample {
        id: row.get(0)?,
        location_id: row.get(1)?,
        location_name: row.get(2)?,
        timestamp: from_millis(row.get(3)?),
        visitor_count: row.get(4)?,
    })
}

/// WHERE clause and bound values for a trend filter
fn filter_clause(filter: &TrendFilter) -> (String, Vec<SqlValue>) {
    let mut clause = String::from("WHERE 1=1");
    let mut args = Vec::new();

    if let Some(region) = filter.region() {
        clause.push_str(" AND l.region = ?");
        args.push(SqlValue::Text(region.to_string()));
    }
    if let Some((from, to)) = filter.range() {
        clause.push_str(" AND f.recorded_at BETWEEN ? AND ?");
        args.push(SqlValue::Integer(from.timestamp_millis()));
        args.push(SqlValue::Integer(to.timestamp_millis()));
    }

    (clause, args)
}
