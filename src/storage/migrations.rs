use rusqlite::Connection;

use super::StoreError;

pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "locations_and_flow_data",
        sql: "
            CREATE TABLE IF NOT EXISTS locations (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                name     TEXT NOT NULL,
                region   TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS flow_data (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
                recorded_at INTEGER NOT NULL,
                visitors    INTEGER NOT NULL CHECK (visitors >= 0)
            );
        ",
    },
    Migration {
        version: 2,
        name: "flow_data_time_indexes",
        sql: "
            CREATE INDEX IF NOT EXISTS idx_flow_data_recorded_at
                ON flow_data(recorded_at);
            CREATE INDEX IF NOT EXISTS idx_flow_data_location_time
                ON flow_data(location_id, recorded_at);
        ",
    },
];

pub fn schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get::<_, i32>(0),
        )?;

    Ok(version)
}

/// Apply every migration newer than the recorded schema version
pub fn apply_migrations(conn: &Connection) -> Result<usize, StoreError> {
    let current = schema_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            migration = migration.name,
            "Applying schema migration"
        );

        conn.execute_batch(migration.sql)
            .and_then(|_| {
                conn.execute(
                    "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                    [migration.version],
                )
            })
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                name: migration.name,
                source,
            })?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_has_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_migrations_apply_once() {
        let conn = Connection::open_in_memory().unwrap();

        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len());
        assert_eq!(
            schema_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );

        // Second run is a no-op
        assert_eq!(apply_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_negative_visitors_rejected_by_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute("INSERT INTO locations (name) VALUES ('Beach')", [])
            .unwrap();
        let result = conn.execute(
            "INSERT INTO flow_data (location_id, recorded_at, visitors) VALUES (1, 0, -1)",
            [],
        );
        assert!(result.is_err());
    }
}
