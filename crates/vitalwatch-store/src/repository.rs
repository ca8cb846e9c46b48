//! Persistence contract for accepted vitals snapshots.

use std::sync::Mutex;

use async_trait::async_trait;
use vitalwatch_core::{PatientId, VitalRecord, VitalsSnapshot};

use crate::StoreError;

/// Storage collaborator for vitals.
///
/// The pipeline needs only `insert` and `query`; `recent` backs the
/// all-patients overview.
#[async_trait]
pub trait VitalRepository: Send + Sync {
    /// Persist a snapshot and return it with its assigned id.
    async fn insert(&self, snapshot: &VitalsSnapshot) -> Result<VitalRecord, StoreError>;

    /// Up to `limit` records for one patient, newest first.
    async fn query(&self, patient_id: PatientId, limit: usize) -> Result<Vec<VitalRecord>, StoreError>;

    /// Up to `limit` records across all patients, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<VitalRecord>, StoreError>;
}

/// Process-local repository. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<Vec<VitalRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first<'a>(
        records: impl Iterator<Item = &'a VitalRecord>,
        limit: usize,
    ) -> Vec<VitalRecord> {
        let mut selected: Vec<VitalRecord> = records.cloned().collect();
        selected.sort_by(|a, b| {
            b.snapshot
                .timestamp
                .cmp(&a.snapshot.timestamp)
                .then(b.vital_id.cmp(&a.vital_id))
        });
        selected.truncate(limit);
        selected
    }
}

#[async_trait]
impl VitalRepository for MemoryRepository {
    async fn insert(&self, snapshot: &VitalsSnapshot) -> Result<VitalRecord, StoreError> {
        let mut records = self.records.lock()?;
        let record = VitalRecord {
            vital_id: records.len() as i64 + 1,
            snapshot: snapshot.clone(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn query(&self, patient_id: PatientId, limit: usize) -> Result<Vec<VitalRecord>, StoreError> {
        let records = self.records.lock()?;
        Ok(Self::newest_first(
            records
                .iter()
                .filter(|r| r.snapshot.patient_id == Some(patient_id)),
            limit,
        ))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<VitalRecord>, StoreError> {
        let records = self.records.lock()?;
        Ok(Self::newest_first(records.iter(), limit))
    }
}
