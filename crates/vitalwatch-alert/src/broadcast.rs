//! Real-time fan-out of vitals and alerts.
//!
//! Every event goes to the global channel and, when it belongs to a patient,
//! to that patient's channel. Channels are `tokio::sync::broadcast`: each
//! connected receiver gets each event at most once and late joiners get no
//! backlog.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use vitalwatch_core::{Alert, PatientId, VitalRecord};

pub const DEFAULT_CAPACITY: usize = 256;

/// Event pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum LiveEvent {
    VitalUpdate(VitalRecord),
    Alert(Alert),
}

impl LiveEvent {
    pub fn patient_id(&self) -> Option<PatientId> {
        match self {
            Self::VitalUpdate(record) => record.snapshot.patient_id,
            Self::Alert(alert) => Some(alert.patient_id),
        }
    }
}

/// Receivers reached by one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivered {
    pub patient: usize,
    pub global: usize,
}

pub struct Broadcaster {
    capacity: usize,
    global: broadcast::Sender<LiveEvent>,
    patients: Mutex<HashMap<PatientId, broadcast::Sender<LiveEvent>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster {
    /// `capacity` bounds how far a slow receiver may lag before it starts
    /// missing events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self {
            capacity,
            global,
            patients: Mutex::default(),
        }
    }

    /// Publish an accepted vitals record.
    pub fn publish(&self, record: VitalRecord) -> Delivered {
        self.send(LiveEvent::VitalUpdate(record))
    }

    pub fn publish_alert(&self, alert: Alert) -> Delivered {
        self.send(LiveEvent::Alert(alert))
    }

    pub fn subscribe_patient(&self, patient_id: PatientId) -> broadcast::Receiver<LiveEvent> {
        self.patients()
            .entry(patient_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<LiveEvent> {
        self.global.subscribe()
    }

    fn send(&self, event: LiveEvent) -> Delivered {
        let mut delivered = Delivered::default();

        if let Some(patient_id) = event.patient_id() {
            let mut patients = self.patients();
            if let Some(sender) = patients.get(&patient_id) {
                match sender.send(event.clone()) {
                    Ok(n) => delivered.patient = n,
                    Err(_) => {
                        // Every receiver for this patient has gone away.
                        patients.remove(&patient_id);
                        debug!(patient = %patient_id, "pruned idle patient channel");
                    }
                }
            }
        }

        delivered.global = self.global.send(event).unwrap_or(0);
        trace!(patient = delivered.patient, global = delivered.global, "event published");
        delivered
    }

    fn patients(&self) -> MutexGuard<'_, HashMap<PatientId, broadcast::Sender<LiveEvent>>> {
        self.patients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
