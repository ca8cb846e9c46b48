//! One extraction cycle per frame, and the periodic capture loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vitalwatch_alert::{AlertEvaluator, AlertStore, Broadcaster, NotifyOutcome, ThrottledNotifier};
use vitalwatch_core::{Alert, PatientId, VitalRecord, VitalSource, VitalsSnapshot};
use vitalwatch_extract::{DualExtractor, Frame};
use vitalwatch_store::VitalRepository;

use crate::{FrameSource, MonitorConfig, MonitorError};

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing could be read; the snapshot was neither stored nor published.
    Empty,
    Accepted {
        record: VitalRecord,
        /// Alerts newly added to the store this cycle.
        alerts: Vec<Alert>,
        /// Notifier verdict for each of `alerts`, in the same order.
        notifications: Vec<NotifyOutcome>,
    },
}

impl CycleOutcome {
    pub fn alerts(&self) -> &[Alert] {
        match self {
            Self::Empty => &[],
            Self::Accepted { alerts, .. } => alerts,
        }
    }
}

/// The assembled pipeline.
///
/// Cycles for different patients run independently. Cycles for the same
/// patient are serialised from storage through alert recording so alerts are
/// evaluated in snapshot order; notification happens after that section, so
/// a slow delivery never holds up the patient's next cycle.
pub struct Monitor {
    config: MonitorConfig,
    extractor: DualExtractor,
    repository: Arc<dyn VitalRepository>,
    evaluator: AlertEvaluator,
    alerts: Arc<AlertStore>,
    broadcaster: Arc<Broadcaster>,
    notifier: ThrottledNotifier,
    patient_locks: Mutex<HashMap<PatientId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        extractor: DualExtractor,
        repository: Arc<dyn VitalRepository>,
        evaluator: AlertEvaluator,
        alerts: Arc<AlertStore>,
        broadcaster: Arc<Broadcaster>,
        notifier: ThrottledNotifier,
    ) -> Self {
        Self {
            config,
            extractor,
            repository,
            evaluator,
            alerts,
            broadcaster,
            notifier,
            patient_locks: Mutex::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn evaluator(&self) -> &AlertEvaluator {
        &self.evaluator
    }

    /// Extract, fuse and process one frame for a patient.
    pub async fn process_frame(
        &self,
        patient_id: PatientId,
        frame: &Frame,
        source: VitalSource,
    ) -> Result<CycleOutcome, MonitorError> {
        let captured_at = Utc::now();
        let outcome = self
            .extractor
            .run(frame, &self.config.rois, Some(patient_id), captured_at, source)
            .await;
        self.process_snapshot(patient_id, outcome.snapshot).await
    }

    /// Store, evaluate and fan out a fused snapshot.
    ///
    /// The snapshot is stored and broadcast first; alerts from the newest
    /// stored snapshot are then recorded and broadcast. New alerts are handed
    /// to the notifier once the patient lock is released. Delivery failures
    /// never fail the cycle.
    pub async fn process_snapshot(
        &self,
        patient_id: PatientId,
        mut snapshot: VitalsSnapshot,
    ) -> Result<CycleOutcome, MonitorError> {
        if snapshot.is_empty() {
            debug!(patient = %patient_id, "no readable vitals, skipping cycle");
            return Ok(CycleOutcome::Empty);
        }
        snapshot.patient_id = Some(patient_id);

        let lock = self.patient_lock(patient_id);
        let serialised = lock.lock().await;

        let record = self.repository.insert(&snapshot).await?;
        self.broadcaster.publish(record.clone());

        let history = self
            .repository
            .query(patient_id, self.config.history_limit)
            .await?;
        let evaluated = self.evaluator.process(patient_id, &history);

        let mut alerts = Vec::with_capacity(evaluated.len());
        for alert in evaluated {
            if !self.alerts.record(alert.clone()) {
                continue;
            }
            info!(
                patient = %patient_id,
                vital = %alert.vital,
                severity = %alert.severity,
                summary = %alert.summary(),
                "alert raised"
            );
            self.broadcaster.publish_alert(alert.clone());
            alerts.push(alert);
        }
        drop(serialised);

        let mut notifications = Vec::with_capacity(alerts.len());
        for alert in &alerts {
            notifications.push(self.notifier.notify(alert).await);
        }

        Ok(CycleOutcome::Accepted {
            record,
            alerts,
            notifications,
        })
    }

    /// Capture and process a frame every `capture_interval` until `cancel`
    /// fires. A failed capture or cycle is logged and the loop carries on.
    pub async fn watch(
        &self,
        patient_id: PatientId,
        frames: &dyn FrameSource,
        source: VitalSource,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.capture_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            patient = %patient_id,
            interval_secs = self.config.capture_interval_secs,
            "watch loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = match frames.capture().await {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(patient = %patient_id, error = %err, "frame capture failed");
                            continue;
                        }
                    };
                    match self.process_frame(patient_id, &frame, source).await {
                        Ok(CycleOutcome::Empty) => {}
                        Ok(CycleOutcome::Accepted { record, alerts, .. }) => {
                            debug!(vital_id = record.vital_id, alerts = alerts.len(), "cycle complete");
                        }
                        Err(err) => error!(patient = %patient_id, error = %err, "cycle failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!(patient = %patient_id, "watch loop shutting down");
                    break;
                }
            }
        }
    }

    fn patient_lock(&self, patient_id: PatientId) -> Arc<tokio::sync::Mutex<()>> {
        self.patient_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(patient_id)
            .or_default()
            .clone()
    }
}
