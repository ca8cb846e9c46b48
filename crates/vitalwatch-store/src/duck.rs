//! DuckDB-backed vitals history and throttle ledger.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use tracing::{debug, info};
use vitalwatch_core::{PatientId, VitalRecord, VitalsSnapshot};

use crate::{StoreError, ThrottleKey, ThrottleLedger, VitalRepository};

const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS vital_id_seq START 1;
CREATE TABLE IF NOT EXISTS vitals (
    vital_id   BIGINT PRIMARY KEY DEFAULT nextval('vital_id_seq'),
    patient_id BIGINT,
    created_at BIGINT NOT NULL,
    source     VARCHAR NOT NULL,
    payload    VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS throttle_ledger (
    patient_id BIGINT NOT NULL,
    vital      VARCHAR NOT NULL,
    sent_at    BIGINT NOT NULL,
    PRIMARY KEY (patient_id, vital)
);
";

/// DuckDB store for accepted snapshots and notification delivery times.
///
/// Snapshots are kept as JSON payloads alongside the columns used for
/// lookup (`patient_id`, `created_at` in epoch microseconds). The throttle
/// ledger is one row per (patient, vital), so a persistent store keeps
/// rate limits across restarts.
///
/// Use [`open`](Self::open) for an ephemeral in-memory database and
/// [`open_persistent`](Self::open_persistent) for a file-backed one.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened persistent vitals store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored snapshots.
    pub fn vitals_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vitals", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert_row(&self, snapshot: &VitalsSnapshot) -> Result<VitalRecord, StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        let patient_id = snapshot.patient_id.map(|p| p.0 as i64);
        let conn = self.conn.lock()?;
        let vital_id: i64 = conn.query_row(
            "INSERT INTO vitals (patient_id, created_at, source, payload) \
             VALUES (?, ?, ?, ?) RETURNING vital_id",
            params![
                patient_id,
                snapshot.timestamp.timestamp_micros(),
                snapshot.source.as_str(),
                payload
            ],
            |row| row.get(0),
        )?;
        debug!(vital_id, patient_id, "stored vitals snapshot");
        Ok(VitalRecord {
            vital_id,
            snapshot: snapshot.clone(),
        })
    }

    fn select_rows(&self, patient_id: Option<PatientId>, limit: usize) -> Result<Vec<VitalRecord>, StoreError> {
        let conn = self.conn.lock()?;
        let rows: Vec<(i64, String)> = match patient_id {
            Some(patient) => {
                let mut stmt = conn.prepare(
                    "SELECT vital_id, payload FROM vitals WHERE patient_id = ? \
                     ORDER BY created_at DESC, vital_id DESC LIMIT ?",
                )?;
                stmt.query_map(params![patient.0 as i64, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT vital_id, payload FROM vitals \
                     ORDER BY created_at DESC, vital_id DESC LIMIT ?",
                )?;
                stmt.query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<_, _>>()?
            }
        };

        rows.into_iter()
            .map(|(vital_id, payload)| {
                Ok(VitalRecord {
                    vital_id,
                    snapshot: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VitalRepository for DuckStore {
    async fn insert(&self, snapshot: &VitalsSnapshot) -> Result<VitalRecord, StoreError> {
        self.insert_row(snapshot)
    }

    async fn query(&self, patient_id: PatientId, limit: usize) -> Result<Vec<VitalRecord>, StoreError> {
        self.select_rows(Some(patient_id), limit)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<VitalRecord>, StoreError> {
        self.select_rows(None, limit)
    }
}

impl ThrottleLedger for DuckStore {
    fn last_sent(&self, key: &ThrottleKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt =
            conn.prepare("SELECT sent_at FROM throttle_ledger WHERE patient_id = ? AND vital = ?")?;
        let mut rows = stmt.query_map(params![key.patient_id.0 as i64, key.vital.as_str()], |row| {
            row.get::<_, i64>(0)
        })?;
        match rows.next() {
            Some(micros) => {
                let micros = micros?;
                DateTime::from_timestamp_micros(micros)
                    .map(Some)
                    .ok_or(StoreError::InvalidTimestamp(micros))
            }
            None => Ok(None),
        }
    }

    fn mark_sent(&self, key: &ThrottleKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO throttle_ledger (patient_id, vital, sent_at) VALUES (?, ?, ?)",
            params![key.patient_id.0 as i64, key.vital.as_str(), at.timestamp_micros()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use vitalwatch_core::{Vital, VitalSource, VitalValue};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap()
    }

    fn snapshot(patient: u64, offset_secs: i64) -> VitalsSnapshot {
        VitalsSnapshot::new(
            Some(PatientId(patient)),
            t0() + Duration::seconds(offset_secs),
            VitalSource::Camera,
        )
        .with(Vital::Hr, 145.0)
        .with(Vital::Abp, "120/80/93")
    }

    #[test]
    fn open_in_memory() {
        let store = DuckStore::open().unwrap();
        assert_eq!(store.vitals_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_and_query_newest_first() {
        let store = DuckStore::open().unwrap();
        let first = store.insert(&snapshot(7, 0)).await.unwrap();
        let second = store.insert(&snapshot(7, 3)).await.unwrap();
        store.insert(&snapshot(8, 6)).await.unwrap();
        assert!(second.vital_id > first.vital_id);

        let rows = store.query(PatientId(7), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vital_id, second.vital_id);
        assert_eq!(rows[0].snapshot.get(Vital::Abp), Some(&VitalValue::from("120/80/93")));

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent[0].snapshot.patient_id, Some(PatientId(8)));
    }

    #[test]
    fn ledger_upserts_per_key() {
        let store = DuckStore::open().unwrap();
        let key = ThrottleKey::new(PatientId(7), Vital::Hr);
        assert_eq!(store.last_sent(&key).unwrap(), None);

        store.mark_sent(&key, t0()).unwrap();
        store.mark_sent(&key, t0() + Duration::minutes(6)).unwrap();
        assert_eq!(store.last_sent(&key).unwrap(), Some(t0() + Duration::minutes(6)));
        assert_eq!(
            store.last_sent(&ThrottleKey::new(PatientId(7), Vital::SpO2)).unwrap(),
            None
        );
    }

    // ── Persistent storage tests ──

    #[tokio::test]
    async fn persistent_reopen_keeps_history_and_ledger() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("vitals.duckdb");
        let key = ThrottleKey::new(PatientId(7), Vital::Hr);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert!(db_path.exists());
        store.insert(&snapshot(7, 0)).await.unwrap();
        store.mark_sent(&key, t0()).unwrap();
        drop(store);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.vitals_count().unwrap(), 1);
        assert_eq!(store.last_sent(&key).unwrap(), Some(t0()));

        let next = store.insert(&snapshot(7, 3)).await.unwrap();
        assert_eq!(next.vital_id, 2);
    }
}
