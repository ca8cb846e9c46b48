//! Deduplicating alert store with change subscriptions.
//!
//! One store instance is constructed at startup and shared (behind an `Arc`)
//! by everything that records or reads alerts. Two views are offered over the
//! same recorded alerts:
//!
//! - history: [`AlertStore::get`] returns every alert for a patient in
//!   insertion order until [`AlertStore::clear`];
//! - live: [`AlertStore::latest_per_vital`] returns only the newest alert for
//!   each vital, minus the ones dismissed with [`AlertStore::dismiss`].
//!
//! Reads take only the patient's lock. Mutations take the store-wide dispatch
//! lock first and the patient's lock second, and keep the dispatch lock while
//! subscribers run, so callbacks fire synchronously, in mutation order, after
//! the change is visible, once per mutating call. Callbacks may read the store
//! but must not mutate it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::debug;
use vitalwatch_core::{Alert, AlertId, PatientId, Vital};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

#[derive(Debug, Default)]
struct PatientAlerts {
    history: Vec<Alert>,
    ids: HashSet<AlertId>,
    dismissed: HashSet<AlertId>,
}

/// Handle returned by [`AlertStore::subscribe`].
///
/// The callback stays registered until [`unsubscribe`](Self::unsubscribe)
/// is called.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Remove the callback. Safe to call after the store is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).callbacks.remove(&self.id);
        }
    }
}

#[derive(Default)]
pub struct AlertStore {
    patients: RwLock<HashMap<PatientId, Arc<Mutex<PatientAlerts>>>>,
    subscribers: Arc<Mutex<Subscribers>>,
    dispatch: Mutex<()>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an alert. Returns `false` (and notifies nobody) when an alert
    /// with the same id is already stored for the patient.
    pub fn record(&self, alert: Alert) -> bool {
        let entry = self.entry(alert.patient_id);
        let dispatch = lock(&self.dispatch);
        {
            let mut patient = lock(&entry);
            if !patient.ids.insert(alert.id.clone()) {
                debug!(id = %alert.id, "duplicate alert ignored");
                return false;
            }
            debug!(id = %alert.id, severity = %alert.severity, "alert recorded");
            patient.history.push(alert);
        }
        self.notify(dispatch);
        true
    }

    /// Every alert recorded for the patient, in insertion order.
    pub fn get(&self, patient_id: PatientId) -> Vec<Alert> {
        self.existing(patient_id)
            .map(|entry| lock(&entry).history.clone())
            .unwrap_or_default()
    }

    /// Alerts across all patients, newest first.
    pub fn get_all(&self) -> Vec<Alert> {
        let entries: Vec<_> = read(&self.patients).values().cloned().collect();
        let mut all: Vec<Alert> = entries
            .iter()
            .flat_map(|entry| lock(entry).history.clone())
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all
    }

    /// The newest non-dismissed alert for each vital, in display order.
    ///
    /// A newer alert for a vital supersedes older ones; dismissing it leaves
    /// that vital empty until the next breach is recorded.
    pub fn latest_per_vital(&self, patient_id: PatientId) -> Vec<Alert> {
        let Some(entry) = self.existing(patient_id) else {
            return Vec::new();
        };
        let patient = lock(&entry);
        let mut latest: BTreeMap<Vital, &Alert> = BTreeMap::new();
        for alert in &patient.history {
            let newer = latest
                .get(&alert.vital)
                .is_none_or(|current| alert.timestamp >= current.timestamp);
            if newer {
                latest.insert(alert.vital, alert);
            }
        }
        latest
            .into_values()
            .filter(|a| !patient.dismissed.contains(&a.id))
            .cloned()
            .collect()
    }

    /// Hide one alert from the live view. The history keeps it until
    /// [`clear`](Self::clear).
    pub fn dismiss(&self, patient_id: PatientId, id: &AlertId) -> bool {
        let Some(entry) = self.existing(patient_id) else {
            return false;
        };
        let dispatch = lock(&self.dispatch);
        {
            let mut patient = lock(&entry);
            if !patient.ids.contains(id) || !patient.dismissed.insert(id.clone()) {
                return false;
            }
        }
        self.notify(dispatch);
        true
    }

    /// Remove every alert for the patient. Always notifies subscribers.
    pub fn clear(&self, patient_id: PatientId) {
        let entry = self.entry(patient_id);
        let dispatch = lock(&self.dispatch);
        {
            let mut patient = lock(&entry);
            let removed = patient.history.len();
            *patient = PatientAlerts::default();
            debug!(patient = %patient_id, removed, "alerts cleared");
        }
        self.notify(dispatch);
    }

    /// Register a zero-argument change callback.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).callbacks.len()
    }

    fn existing(&self, patient_id: PatientId) -> Option<Arc<Mutex<PatientAlerts>>> {
        read(&self.patients).get(&patient_id).cloned()
    }

    fn entry(&self, patient_id: PatientId) -> Arc<Mutex<PatientAlerts>> {
        if let Some(entry) = self.existing(patient_id) {
            return entry;
        }
        self.patients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(patient_id)
            .or_default()
            .clone()
    }

    /// Runs every callback while the caller still holds the dispatch lock.
    /// The patient lock must already be released.
    fn notify(&self, _dispatch: MutexGuard<'_, ()>) {
        let callbacks: Vec<Callback> = lock(&self.subscribers).callbacks.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}
