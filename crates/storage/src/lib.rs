#![forbid(unsafe_code)]

use lm_core::ids::LicenseId;
use lm_core::model::{LicenseRecord, LicenseState, LicenseType};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    UnknownId,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownId => write!(f, "unknown id"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

/// The record store: one SQLite connection, one `licenses` table. All access
/// happens from the single store-service thread; the connection is never
/// shared.
#[derive(Debug)]
pub struct LicenseStore {
    conn: Connection,
}

impl LicenseStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS licenses (
              id INTEGER PRIMARY KEY,
              type TEXT NOT NULL,
              created_at TEXT NOT NULL,
              expires_at TEXT NOT NULL,
              state TEXT NOT NULL,
              is_default INTEGER NOT NULL,
              serial_number TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn all_records(&self) -> Result<Vec<LicenseRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, type, created_at, expires_at, state, is_default, serial_number
            FROM licenses
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map([], map_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_by_id(&self, id: LicenseId) -> Result<Option<LicenseRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, type, created_at, expires_at, state, is_default, serial_number
                FROM licenses
                WHERE id = ?1
                "#,
                params![id.as_u32()],
                map_record,
            )
            .optional()?)
    }

    pub fn insert(&mut self, record: &LicenseRecord) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO licenses(id, type, created_at, expires_at, state, is_default, serial_number)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id.as_u32(),
                record.kind.as_str(),
                record.created_at,
                record.expires_at,
                record.state.as_str(),
                record.is_default,
                record.serial_number
            ],
        )?;
        Ok(())
    }

    pub fn update_state(&mut self, id: LicenseId, state: LicenseState) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE licenses SET state = ?2 WHERE id = ?1",
            params![id.as_u32(), state.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownId);
        }
        Ok(())
    }

    pub fn update_expiry(&mut self, id: LicenseId, expires_at: &str) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE licenses SET expires_at = ?2 WHERE id = ?1",
            params![id.as_u32(), expires_at],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownId);
        }
        Ok(())
    }

    pub fn delete(&mut self, id: LicenseId) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM licenses WHERE id = ?1", params![id.as_u32()])?;
        if deleted == 0 {
            return Err(StoreError::UnknownId);
        }
        Ok(())
    }

    /// Forces every default row active. Deliberately keyed on the flag rather
    /// than an id so a healed table needs no prior lookup.
    pub fn activate_default(&mut self) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE licenses SET state = ?1 WHERE is_default = 1",
            params![LicenseState::Active.as_str()],
        )?;
        Ok(())
    }

    pub fn count_records(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<LicenseRecord> {
    let id: u32 = row.get(0)?;
    let kind: String = row.get(1)?;
    let state: String = row.get(4)?;
    Ok(LicenseRecord {
        id: LicenseId::new(id),
        kind: LicenseType::parse_lossy(&kind),
        created_at: row.get(2)?,
        expires_at: row.get(3)?,
        state: LicenseState::parse_lossy(&state),
        is_default: row.get(5)?,
        serial_number: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, state: LicenseState) -> LicenseRecord {
        LicenseRecord {
            id: LicenseId::new(id),
            kind: LicenseType::Basic,
            created_at: "2020/01/01".to_string(),
            expires_at: "2099/12/31".to_string(),
            state,
            is_default: false,
            serial_number: "serial".to_string(),
        }
    }

    #[test]
    fn insert_and_read_back_round_trips() {
        let mut store = LicenseStore::open_in_memory().expect("open");
        let original = record(1_234_567, LicenseState::Inactive);
        store.insert(&original).expect("insert");

        let all = store.all_records().expect("all");
        assert_eq!(all, vec![original.clone()]);
        assert_eq!(
            store.record_by_id(original.id).expect("by id"),
            Some(original)
        );
        assert_eq!(store.count_records().expect("count"), 1);
    }

    #[test]
    fn record_by_id_misses_cleanly() {
        let store = LicenseStore::open_in_memory().expect("open");
        assert_eq!(
            store.record_by_id(LicenseId::new(7_654_321)).expect("by id"),
            None
        );
    }

    #[test]
    fn update_state_and_expiry_touch_only_the_target() {
        let mut store = LicenseStore::open_in_memory().expect("open");
        store
            .insert(&record(1_111_111, LicenseState::Inactive))
            .expect("insert");
        store
            .insert(&record(2_222_222, LicenseState::Inactive))
            .expect("insert");

        store
            .update_state(LicenseId::new(1_111_111), LicenseState::Locked)
            .expect("update state");
        store
            .update_expiry(LicenseId::new(1_111_111), "2000/01/01")
            .expect("update expiry");

        let untouched = store
            .record_by_id(LicenseId::new(2_222_222))
            .expect("by id")
            .expect("present");
        assert_eq!(untouched.state, LicenseState::Inactive);
        assert_eq!(untouched.expires_at, "2099/12/31");

        let touched = store
            .record_by_id(LicenseId::new(1_111_111))
            .expect("by id")
            .expect("present");
        assert_eq!(touched.state, LicenseState::Locked);
        assert_eq!(touched.expires_at, "2000/01/01");
    }

    #[test]
    fn updates_against_missing_rows_report_unknown_id() {
        let mut store = LicenseStore::open_in_memory().expect("open");
        assert!(matches!(
            store.update_state(LicenseId::new(1), LicenseState::Locked),
            Err(StoreError::UnknownId)
        ));
        assert!(matches!(
            store.update_expiry(LicenseId::new(1), "2030/01/01"),
            Err(StoreError::UnknownId)
        ));
        assert!(matches!(
            store.delete(LicenseId::new(1)),
            Err(StoreError::UnknownId)
        ));
    }

    #[test]
    fn activate_default_flips_every_default_row() {
        let mut store = LicenseStore::open_in_memory().expect("open");
        let mut fallback = record(9_000_001, LicenseState::Inactive);
        fallback.is_default = true;
        store.insert(&fallback).expect("insert");
        store
            .insert(&record(9_000_002, LicenseState::Inactive))
            .expect("insert");

        store.activate_default().expect("activate default");

        let all = store.all_records().expect("all");
        let by_id = |id: u32| {
            all.iter()
                .find(|r| r.id == LicenseId::new(id))
                .expect("present")
        };
        assert_eq!(by_id(9_000_001).state, LicenseState::Active);
        assert_eq!(by_id(9_000_002).state, LicenseState::Inactive);
    }

    #[test]
    fn delete_removes_the_row() {
        let mut store = LicenseStore::open_in_memory().expect("open");
        store
            .insert(&record(3_333_333, LicenseState::Inactive))
            .expect("insert");
        store.delete(LicenseId::new(3_333_333)).expect("delete");
        assert_eq!(store.count_records().expect("count"), 0);
    }

    #[test]
    fn lossy_mapping_applies_on_read() {
        let mut store = LicenseStore::open_in_memory().expect("open");
        store
            .insert(&record(4_444_444, LicenseState::Inactive))
            .expect("insert");
        store
            .conn
            .execute(
                "UPDATE licenses SET type = 'Mystery', state = 'Mystery' WHERE id = 4444444",
                [],
            )
            .expect("corrupt row");

        let row = store
            .record_by_id(LicenseId::new(4_444_444))
            .expect("by id")
            .expect("present");
        assert_eq!(row.kind, LicenseType::Basic);
        assert_eq!(row.state, LicenseState::Locked);
    }
}
