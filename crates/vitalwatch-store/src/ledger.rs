//! Throttle ledger: when a notification was last delivered per
//! (patient, vital).

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use vitalwatch_core::{PatientId, Vital};

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub patient_id: PatientId,
    pub vital: Vital,
}

impl ThrottleKey {
    pub fn new(patient_id: PatientId, vital: Vital) -> Self {
        Self { patient_id, vital }
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.patient_id, self.vital)
    }
}

/// Key-value record of last delivery times.
///
/// Callers that need read-check-write atomicity per key must serialise
/// around `last_sent` + `mark_sent` themselves.
pub trait ThrottleLedger: Send + Sync {
    fn last_sent(&self, key: &ThrottleKey) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn mark_sent(&self, key: &ThrottleKey, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Ledger held in memory; does not survive restarts.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<ThrottleKey, DateTime<Utc>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThrottleLedger for MemoryLedger {
    fn last_sent(&self, key: &ThrottleKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.entries.lock()?.get(key).copied())
    }

    fn mark_sent(&self, key: &ThrottleKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.entries.lock()?.insert(*key, at);
        Ok(())
    }
}
