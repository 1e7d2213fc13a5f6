//! Storage layer for reconciled work units.
//!
//! Keeps a history of every unit seen across sync passes using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Give each thread its own `Database` or serialize access with a `Mutex`.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond
//! precision (e.g. `2009-03-10T20:43:55.000Z`), so lexicographic order is
//! chronological order.
//!
//! A unit's row ID is derived from its client, fingerprint and download
//! time. Seeing the same unit again on a later pass updates the row in place.
//! The `frames` column holds the frame progress as JSON.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use fw_core::{Fingerprint, FrameProgress, ReconciledUnit, WorkUnitResult};
use rusqlite::{Connection, Row, params};
use thiserror::Error;
use uuid::Uuid;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for unit {unit_id}: {timestamp}")]
    TimestampParse {
        unit_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored column could not be decoded.
    #[error("invalid unit data for {unit_id}: {message}")]
    InvalidUnitData { unit_id: String, message: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A unit as stored in the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub id: String,
    pub client: String,
    pub fingerprint: Fingerprint,
    pub protein_name: String,
    pub download_time: Option<DateTime<Utc>>,
    pub due_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    pub folding_id: String,
    pub team: u32,
    pub core_id: String,
    pub core_version: String,
    pub unit_result: WorkUnitResult,
    pub frames: FrameProgress,
    pub last_seen: DateTime<Utc>,
}

impl UnitRecord {
    /// Builds a record for `unit` as seen by `client` at `seen_at`.
    ///
    /// Returns `None` for units without a known fingerprint, such as the
    /// placeholder shown while a client waits for work.
    pub fn from_unit(client: &str, unit: &ReconciledUnit, seen_at: DateTime<Utc>) -> Option<Self> {
        if !unit.fingerprint.is_known() {
            return None;
        }
        Some(Self {
            id: unit_id(client, &unit.fingerprint, unit.download_time),
            client: client.to_string(),
            fingerprint: unit.fingerprint,
            protein_name: unit.protein_name.clone(),
            download_time: unit.download_time,
            due_time: unit.due_time,
            finished_time: unit.finished_time,
            folding_id: unit.folding_id.clone(),
            team: unit.team,
            core_id: unit.core_id.clone(),
            core_version: unit.core_version.clone(),
            unit_result: unit.unit_result,
            frames: unit.frames.clone(),
            last_seen: seen_at,
        })
    }

    pub fn percent_complete(&self) -> u8 {
        self.frames.percent_complete()
    }
}

/// Most recent sync time per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLastSeen {
    pub client: String,
    pub last_seen: String,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Units table: one row per work unit per client
            -- project_id/run/clone/gen: the unit's fingerprint
            -- frames: JSON frame progress
            -- last_seen: when a sync pass last reported the unit
            CREATE TABLE IF NOT EXISTS units (
                id TEXT PRIMARY KEY,
                client TEXT NOT NULL,
                project_id INTEGER NOT NULL,
                run INTEGER NOT NULL,
                clone INTEGER NOT NULL,
                gen INTEGER NOT NULL,
                protein_name TEXT NOT NULL DEFAULT '',
                download_time TEXT,
                due_time TEXT,
                finished_time TEXT,
                folding_id TEXT NOT NULL DEFAULT '',
                team INTEGER NOT NULL DEFAULT 0,
                core_id TEXT NOT NULL DEFAULT '',
                core_version TEXT NOT NULL DEFAULT '',
                unit_result TEXT NOT NULL DEFAULT 'unknown',
                frames TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_units_client ON units(client);
            CREATE INDEX IF NOT EXISTS idx_units_download ON units(download_time);
            CREATE INDEX IF NOT EXISTS idx_units_project ON units(project_id);
            ",
        )?;
        Ok(())
    }

    /// Inserts or refreshes a batch of units.
    ///
    /// Fields that only grow (frames, result, finish time) are overwritten by
    /// the newer pass. Returns the number of rows written.
    pub fn upsert_units(&mut self, units: &[UnitRecord]) -> Result<usize, DbError> {
        if units.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO units
                (id, client, project_id, run, clone, gen, protein_name, download_time, due_time,
                 finished_time, folding_id, team, core_id, core_version, unit_result, frames, last_seen)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    protein_name = excluded.protein_name,
                    due_time = excluded.due_time,
                    finished_time = COALESCE(excluded.finished_time, units.finished_time),
                    folding_id = excluded.folding_id,
                    team = excluded.team,
                    core_id = excluded.core_id,
                    core_version = excluded.core_version,
                    unit_result = excluded.unit_result,
                    frames = excluded.frames,
                    last_seen = excluded.last_seen
                ",
            )?;
            for unit in units {
                let frames = serde_json::to_string(&unit.frames).map_err(|err| {
                    DbError::InvalidUnitData {
                        unit_id: unit.id.clone(),
                        message: err.to_string(),
                    }
                })?;
                written += stmt.execute(params![
                    unit.id,
                    unit.client,
                    unit.fingerprint.project_id,
                    unit.fingerprint.run,
                    unit.fingerprint.clone,
                    unit.fingerprint.generation,
                    unit.protein_name,
                    unit.download_time.map(format_timestamp),
                    unit.due_time.map(format_timestamp),
                    unit.finished_time.map(format_timestamp),
                    unit.folding_id,
                    unit.team,
                    unit.core_id,
                    unit.core_version,
                    unit.unit_result.as_str(),
                    frames,
                    format_timestamp(unit.last_seen),
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(units = written, "upserted units");
        Ok(written)
    }

    /// Lists all units ordered by download time then ID.
    pub fn list_units(&self) -> Result<Vec<UnitRecord>, DbError> {
        self.query_units(None)
    }

    /// Lists one client's units ordered by download time then ID.
    pub fn list_units_for_client(&self, client: &str) -> Result<Vec<UnitRecord>, DbError> {
        self.query_units(Some(client))
    }

    fn query_units(&self, client: Option<&str>) -> Result<Vec<UnitRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, client, project_id, run, clone, gen, protein_name, download_time, due_time,
                   finished_time, folding_id, team, core_id, core_version, unit_result, frames, last_seen
            FROM units
            WHERE ?1 IS NULL OR client = ?1
            ORDER BY download_time ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([client], read_row)?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row?.decode()?);
        }
        Ok(units)
    }

    /// Lists the last sync time per client, ordered by most recent.
    pub fn last_seen_by_client(&self) -> Result<Vec<ClientLastSeen>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT client, MAX(last_seen) AS last_seen
            FROM units
            GROUP BY client
            ORDER BY last_seen DESC, client ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ClientLastSeen {
                client: row.get(0)?,
                last_seen: row.get(1)?,
            })
        })?;
        let mut clients = Vec::new();
        for row in rows {
            clients.push(row?);
        }
        Ok(clients)
    }
}

/// Row columns before timestamp and JSON decoding.
struct RawUnit {
    id: String,
    client: String,
    fingerprint: Fingerprint,
    protein_name: String,
    download_time: Option<String>,
    due_time: Option<String>,
    finished_time: Option<String>,
    folding_id: String,
    team: u32,
    core_id: String,
    core_version: String,
    unit_result: String,
    frames: String,
    last_seen: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawUnit> {
    Ok(RawUnit {
        id: row.get(0)?,
        client: row.get(1)?,
        fingerprint: Fingerprint::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
        protein_name: row.get(6)?,
        download_time: row.get(7)?,
        due_time: row.get(8)?,
        finished_time: row.get(9)?,
        folding_id: row.get(10)?,
        team: row.get(11)?,
        core_id: row.get(12)?,
        core_version: row.get(13)?,
        unit_result: row.get(14)?,
        frames: row.get(15)?,
        last_seen: row.get(16)?,
    })
}

impl RawUnit {
    fn decode(self) -> Result<UnitRecord, DbError> {
        let id = self.id;
        let optional = |value: Option<String>| {
            value
                .map(|timestamp| parse_timestamp(&timestamp, &id))
                .transpose()
        };
        let download_time = optional(self.download_time)?;
        let due_time = optional(self.due_time)?;
        let finished_time = optional(self.finished_time)?;
        let last_seen = parse_timestamp(&self.last_seen, &id)?;
        let unit_result: WorkUnitResult = self
            .unit_result
            .parse()
            .map_err(|message| DbError::InvalidUnitData {
                unit_id: id.clone(),
                message,
            })?;
        let frames: FrameProgress = serde_json::from_str(&self.frames).map_err(|err| DbError::InvalidUnitData {
            unit_id: id.clone(),
            message: err.to_string(),
        })?;

        Ok(UnitRecord {
            id,
            client: self.client,
            fingerprint: self.fingerprint,
            protein_name: self.protein_name,
            download_time,
            due_time,
            finished_time,
            folding_id: self.folding_id,
            team: self.team,
            core_id: self.core_id,
            core_version: self.core_version,
            unit_result,
            frames,
            last_seen,
        })
    }
}

fn unit_id(client: &str, fingerprint: &Fingerprint, download_time: Option<DateTime<Utc>>) -> String {
    let download = download_time.map(format_timestamp).unwrap_or_default();
    let content = format!("{client}|{}|{download}", fingerprint.tag());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string()
}

fn parse_timestamp(timestamp: &str, unit_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            unit_id: unit_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use std::collections::HashSet;

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .expect("prepare index_list");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query index_list");
        rows.map(|row| row.expect("index_list row")).collect()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2009, 3, 10, hour, minute, 0).unwrap()
    }

    fn unit(fingerprint: Fingerprint, download: DateTime<Utc>) -> ReconciledUnit {
        let mut frames = FrameProgress::new();
        frames.set_frame(0, 0, 250_000, NaiveTime::from_hms_opt(20, 44, 3).unwrap());
        ReconciledUnit {
            fingerprint,
            protein_name: "p2677_IBX in water".to_string(),
            download_time: Some(download),
            due_time: Some(download + chrono::TimeDelta::days(3)),
            folding_id: "harlam357".to_string(),
            team: 32,
            core_id: "A2".to_string(),
            core_version: "2.10".to_string(),
            frames,
            ..ReconciledUnit::default()
        }
    }

    const P2677: Fingerprint = Fingerprint::new(2677, 14, 69, 39);
    const P2669: Fingerprint = Fingerprint::new(2669, 13, 247, 48);

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");

        let columns = table_columns(&db.conn, "units");
        assert_eq!(
            columns,
            vec![
                "id",
                "client",
                "project_id",
                "run",
                "clone",
                "gen",
                "protein_name",
                "download_time",
                "due_time",
                "finished_time",
                "folding_id",
                "team",
                "core_id",
                "core_version",
                "unit_result",
                "frames",
                "last_seen",
            ]
        );

        let indexes = index_names(&db.conn, "units");
        let expected: HashSet<String> = ["idx_units_client", "idx_units_download", "idx_units_project"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(expected.is_subset(&indexes));
    }

    #[test]
    fn open_creates_file_and_reopens() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("fw.db");
        {
            let mut db = Database::open(&path).unwrap();
            let record = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
            db.upsert_units(&[record]).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_units().unwrap().len(), 1);
    }

    #[test]
    fn placeholder_units_are_not_recorded() {
        assert!(UnitRecord::from_unit("home", &ReconciledUnit::default(), at(21, 0)).is_none());
    }

    #[test]
    fn unit_id_is_stable_per_client_and_download() {
        let a = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
        let b = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(22, 0)).unwrap();
        let other_client = UnitRecord::from_unit("work", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
        let redownload = UnitRecord::from_unit("home", &unit(P2677, at(23, 0)), at(21, 0)).unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, other_client.id);
        assert_ne!(a.id, redownload.id);
    }

    #[test]
    fn upsert_updates_progress_in_place() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        let first = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
        db.upsert_units(&[first]).unwrap();

        let mut later = unit(P2677, at(20, 43));
        later
            .frames
            .set_frame(1, 2500, 250_000, NaiveTime::from_hms_opt(20, 51, 35).unwrap());
        later.unit_result = WorkUnitResult::FinishedUnit;
        later.finished_time = Some(at(22, 0));
        let second = UnitRecord::from_unit("home", &later, at(22, 5)).unwrap();
        db.upsert_units(&[second]).unwrap();

        let units = db.list_units().unwrap();
        assert_eq!(units.len(), 1);
        let stored = &units[0];
        assert_eq!(stored.percent_complete(), 1);
        assert_eq!(stored.frames.observed(), 2);
        assert_eq!(stored.unit_result, WorkUnitResult::FinishedUnit);
        assert_eq!(stored.finished_time, Some(at(22, 0)));
        assert_eq!(stored.last_seen, at(22, 5));
    }

    #[test]
    fn upsert_keeps_finish_time_when_later_pass_lacks_it() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        let mut finished = unit(P2677, at(20, 43));
        finished.finished_time = Some(at(22, 0));
        db.upsert_units(&[UnitRecord::from_unit("home", &finished, at(22, 0)).unwrap()])
            .unwrap();
        db.upsert_units(&[UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(23, 0)).unwrap()])
            .unwrap();

        let stored = db.list_units().unwrap();
        assert_eq!(stored[0].finished_time, Some(at(22, 0)));
    }

    #[test]
    fn list_units_round_trips_and_orders_by_download() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        let newer = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
        let older = UnitRecord::from_unit("home", &unit(P2669, at(19, 40)), at(21, 0)).unwrap();
        db.upsert_units(&[newer.clone(), older.clone()]).unwrap();

        let units = db.list_units().unwrap();
        assert_eq!(units, vec![older, newer]);
    }

    #[test]
    fn list_units_for_client_filters() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        let home = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
        let work = UnitRecord::from_unit("work", &unit(P2669, at(19, 40)), at(21, 0)).unwrap();
        db.upsert_units(&[home, work]).unwrap();

        let units = db.list_units_for_client("work").unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].fingerprint, P2669);
    }

    #[test]
    fn last_seen_by_client_orders_by_recency() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        db.upsert_units(&[
            UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap(),
            UnitRecord::from_unit("work", &unit(P2669, at(19, 40)), at(23, 0)).unwrap(),
        ])
        .unwrap();

        let clients = db.last_seen_by_client().unwrap();
        let names: Vec<&str> = clients.iter().map(|c| c.client.as_str()).collect();
        assert_eq!(names, ["work", "home"]);
        assert_eq!(clients[0].last_seen, "2009-03-10T23:00:00.000Z");
    }

    #[test]
    fn corrupt_result_is_reported() {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        let record = UnitRecord::from_unit("home", &unit(P2677, at(20, 43)), at(21, 0)).unwrap();
        db.upsert_units(&[record]).unwrap();
        db.conn
            .execute("UPDATE units SET unit_result = 'exploded'", [])
            .unwrap();

        let err = db.list_units().unwrap_err();
        assert!(matches!(err, DbError::InvalidUnitData { .. }));
    }
}
