//! Schema DDL and migration for the vitals store.
//!
//! One append-only event table deduplicated on (device, idempotency key)
//! with tombstone columns, one projection table per domain keyed by (device_id, date),
//! one summary table, and an append-only compensation record table.
//! Calendar dates are stored as ISO `YYYY-MM-DD` text; instants as
//! microseconds since the Unix epoch.

use rusqlite::Connection;

/// Current schema version written to `store_meta`.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS store_meta (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    event_id         TEXT PRIMARY KEY,
    device_id        TEXT NOT NULL,
    event_type       TEXT NOT NULL,
    idempotency_key  TEXT NOT NULL,
    occurred_at_us   INTEGER NOT NULL,
    occurred_end_us  INTEGER,
    date_start       TEXT NOT NULL,
    date_end         TEXT NOT NULL,
    payload          TEXT NOT NULL,
    stored_at_us     INTEGER NOT NULL,
    deleted_by       TEXT,
    superseded_by    TEXT,
    UNIQUE (device_id, idempotency_key)
);

CREATE INDEX IF NOT EXISTS idx_events_device_dates
    ON events (device_id, date_start, date_end);

CREATE TABLE IF NOT EXISTS compensations (
    compensation_event_id  TEXT PRIMARY KEY,
    device_id              TEXT NOT NULL,
    kind                   TEXT NOT NULL,
    target_event_id        TEXT NOT NULL,
    target_event_type      TEXT NOT NULL,
    affected_dates         TEXT NOT NULL,
    recorded_at_us         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS proj_steps (
    device_id               TEXT NOT NULL,
    date                    TEXT NOT NULL,
    total_steps             INTEGER NOT NULL,
    active_hours            INTEGER NOT NULL,
    most_active_hour        INTEGER,
    most_active_hour_steps  INTEGER,
    first_step_at_us        INTEGER,
    last_step_at_us         INTEGER,
    hourly                  TEXT NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_activity (
    device_id                 TEXT NOT NULL,
    date                      TEXT NOT NULL,
    total_active_minutes      INTEGER NOT NULL,
    active_hours              INTEGER NOT NULL,
    most_active_hour          INTEGER,
    most_active_hour_minutes  INTEGER,
    hourly                    TEXT NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_calories (
    device_id   TEXT NOT NULL,
    date        TEXT NOT NULL,
    total_kcal  REAL NOT NULL,
    hourly      TEXT NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_heart (
    device_id     TEXT NOT NULL,
    date          TEXT NOT NULL,
    avg_bpm       REAL,
    min_bpm       INTEGER,
    max_bpm       INTEGER,
    resting_bpm   INTEGER,
    sample_count  INTEGER NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_sleep (
    device_id       TEXT NOT NULL,
    date            TEXT NOT NULL,
    total_minutes   INTEGER NOT NULL,
    session_count   INTEGER NOT NULL,
    sleep_start_us  INTEGER,
    sleep_end_us    INTEGER,
    score           INTEGER,
    sessions        TEXT NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_workout (
    device_id               TEXT NOT NULL,
    date                    TEXT NOT NULL,
    workout_count           INTEGER NOT NULL,
    total_duration_minutes  INTEGER NOT NULL,
    total_calories          INTEGER,
    workouts                TEXT NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_meals (
    device_id            TEXT NOT NULL,
    date                 TEXT NOT NULL,
    meal_count           INTEGER NOT NULL,
    total_kcal           INTEGER NOT NULL,
    protein_grams        INTEGER NOT NULL,
    fat_grams            INTEGER NOT NULL,
    carbohydrates_grams  INTEGER NOT NULL,
    meals                TEXT NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_weight (
    device_id         TEXT NOT NULL,
    date              TEXT NOT NULL,
    weight_kg         REAL NOT NULL,
    body_fat_percent  REAL,
    measured_at_us    INTEGER NOT NULL,
    sample_count      INTEGER NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS proj_body (
    device_id          TEXT NOT NULL,
    date               TEXT NOT NULL,
    measurement_count  INTEGER NOT NULL,
    sites              TEXT NOT NULL,
    measured_at_us     INTEGER NOT NULL,
    PRIMARY KEY (device_id, date)
);

CREATE TABLE IF NOT EXISTS daily_summary (
    device_id        TEXT NOT NULL,
    date             TEXT NOT NULL,
    summary          TEXT NOT NULL,
    generated_at_us  INTEGER NOT NULL,
    PRIMARY KEY (device_id, date)
);
";

/// Read the schema version recorded in `store_meta` (0 when absent).
///
/// # Errors
///
/// Returns an error if the query fails for reasons other than a missing
/// meta table.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta')",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Ok(0);
    }
    conn.query_row(
        "SELECT schema_version FROM store_meta WHERE id = 1",
        [],
        |row| row.get(0),
    )
}

/// Apply pending migrations, bringing the store to the latest version.
///
/// # Errors
///
/// Returns an error if DDL execution or the version bump fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let version = current_schema_version(conn)?;
    if version >= LATEST_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.execute(
        "INSERT INTO store_meta (id, schema_version) VALUES (1, ?1)
         ON CONFLICT (id) DO UPDATE SET schema_version = ?1",
        [LATEST_SCHEMA_VERSION],
    )?;
    tx.commit()?;

    tracing::debug!(from = version, to = LATEST_SCHEMA_VERSION, "schema migrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_migrated() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        migrate(&mut conn).expect("migrate");
        conn
    }

    #[test]
    fn migrate_creates_all_tables() {
        let conn = open_migrated();
        let expected = [
            "events",
            "compensations",
            "proj_steps",
            "proj_activity",
            "proj_calories",
            "proj_heart",
            "proj_sleep",
            "proj_workout",
            "proj_meals",
            "proj_weight",
            "proj_body",
            "daily_summary",
        ];
        for table in expected {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [table],
                    |row| row.get(0),
                )
                .expect("table existence query");
            assert!(exists, "missing table {table}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = open_migrated();
        migrate(&mut conn).expect("second migrate");
        assert_eq!(
            current_schema_version(&conn).expect("version"),
            LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn idempotency_key_is_unique_per_device() {
        let conn = open_migrated();
        let insert = "INSERT INTO events (event_id, device_id, event_type, idempotency_key,
                      occurred_at_us, date_start, date_end, payload, stored_at_us)
                      VALUES (?1, ?2, 't', 'same-key', 0, '2025-01-05', '2025-01-05', '{}', 0)";
        conn.execute(insert, ["ev-1", "dev-1"]).expect("first insert");
        let err = conn.execute(insert, ["ev-2", "dev-1"]).unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));

        // Another device may reuse the key.
        conn.execute(insert, ["ev-3", "dev-2"])
            .expect("other device insert");
    }
}
