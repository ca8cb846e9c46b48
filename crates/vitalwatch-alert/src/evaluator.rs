//! Threshold evaluation of the latest snapshot per patient.
//!
//! [`evaluate_snapshot`] is the pure core: the same snapshot always yields
//! the same alerts with the same ids. [`AlertEvaluator`] wraps it with the
//! per-patient bookkeeping the pipeline needs: only the newest snapshot is
//! scored, snapshots not newer than the last one evaluated are ignored, and
//! each (patient, vital) carries a `Normal`/`Active` state.
//!
//! "Newer" is judged at millisecond precision, the precision of alert ids, so
//! two evaluated snapshots can never produce colliding ids.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use vitalwatch_core::{
    Alert, PatientId, Severity, ThresholdTable, Vital, VitalRecord, VitalValue, VitalsSnapshot,
};

/// Alert state of one vital for one patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VitalState {
    #[default]
    Normal,
    Active(Severity),
}

/// The number thresholds are applied to: systolic for ABP, diastolic for
/// PAP, the leading number for scalars.
///
/// `None` means evaluation of this field is skipped.
fn measured_value(vital: Vital, value: &VitalValue) -> Option<f64> {
    match vital {
        Vital::Abp => value.segment(0),
        Vital::Pap => value.segment(1),
        _ => value.as_number(),
    }
}

/// Score one snapshot against the threshold table.
///
/// Returns one alert per breaching vital, in display order. Unparsable
/// fields are skipped silently.
pub fn evaluate_snapshot(
    table: &ThresholdTable,
    patient_id: PatientId,
    snapshot: &VitalsSnapshot,
) -> Vec<Alert> {
    snapshot
        .values()
        .filter_map(|(vital, value)| {
            let Some(measured) = measured_value(vital, value) else {
                debug!(patient = %patient_id, vital = %vital, value = %value, "unparsable reading, skipping");
                return None;
            };
            let breach = table.classify(vital, measured)?;
            Some(Alert::new(
                patient_id,
                vital,
                measured,
                breach.kind,
                breach.severity,
                snapshot.timestamp,
            ))
        })
        .collect()
}

#[derive(Debug, Default)]
struct Ledger {
    last_evaluated: HashMap<PatientId, DateTime<Utc>>,
    states: HashMap<(PatientId, Vital), VitalState>,
}

/// Stateful evaluator shared by every pipeline cycle.
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    table: ThresholdTable,
    ledger: Mutex<Ledger>,
}

impl AlertEvaluator {
    pub fn new(table: ThresholdTable) -> Self {
        Self {
            table,
            ledger: Mutex::default(),
        }
    }

    pub fn table(&self) -> &ThresholdTable {
        &self.table
    }

    /// Evaluate the most recent snapshot in `history`; older ones are not
    /// re-scored.
    pub fn process(&self, patient_id: PatientId, history: &[VitalRecord]) -> Vec<Alert> {
        match history.iter().max_by_key(|r| (r.snapshot.timestamp, r.vital_id)) {
            Some(latest) => self.evaluate_latest(patient_id, &latest.snapshot),
            None => Vec::new(),
        }
    }

    /// Evaluate `snapshot` if it is newer than anything already evaluated for
    /// this patient.
    pub fn evaluate_latest(&self, patient_id: PatientId, snapshot: &VitalsSnapshot) -> Vec<Alert> {
        let mut ledger = self.lock();
        if let Some(last) = ledger.last_evaluated.get(&patient_id)
            && snapshot.timestamp.timestamp_millis() <= last.timestamp_millis()
        {
            debug!(
                patient = %patient_id,
                timestamp = %snapshot.timestamp,
                last = %last,
                "snapshot not newer than last evaluated, skipping"
            );
            return Vec::new();
        }
        ledger.last_evaluated.insert(patient_id, snapshot.timestamp);

        let alerts = evaluate_snapshot(&self.table, patient_id, snapshot);
        for (vital, value) in snapshot.values() {
            if measured_value(vital, value).is_none() {
                continue;
            }
            let next = alerts
                .iter()
                .find(|a| a.vital == vital)
                .map_or(VitalState::Normal, |a| VitalState::Active(a.severity));
            let previous = ledger
                .states
                .insert((patient_id, vital), next)
                .unwrap_or_default();
            if previous != next {
                info!(
                    patient = %patient_id,
                    vital = %vital,
                    from = ?previous,
                    to = ?next,
                    "vital state changed"
                );
            }
        }
        alerts
    }

    /// Current state of one vital; `Normal` until a breach is seen.
    pub fn state(&self, patient_id: PatientId, vital: Vital) -> VitalState {
        self.lock()
            .states
            .get(&(patient_id, vital))
            .copied()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use vitalwatch_core::{AlertId, AlertKind, VitalSource};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap()
    }

    fn snap(at: DateTime<Utc>) -> VitalsSnapshot {
        VitalsSnapshot::new(Some(PatientId(7)), at, VitalSource::Camera)
    }

    fn evaluate(snapshot: &VitalsSnapshot) -> Vec<(Vital, AlertKind, Severity)> {
        evaluate_snapshot(&ThresholdTable::default(), PatientId(7), snapshot)
            .into_iter()
            .map(|a| (a.vital, a.kind, a.severity))
            .collect()
    }

    #[test]
    fn hr_boundaries() {
        let cases = [
            (100.0, None),
            (101.0, Some((AlertKind::High, Severity::Warning))),
            (121.0, Some((AlertKind::High, Severity::Critical))),
            (50.0, Some((AlertKind::Low, Severity::Critical))),
            (51.0, Some((AlertKind::Low, Severity::Warning))),
        ];
        for (value, expected) in cases {
            let got = evaluate(&snap(t0()).with(Vital::Hr, value));
            let expected: Vec<_> = expected.map(|(k, s)| (Vital::Hr, k, s)).into_iter().collect();
            assert_eq!(got, expected, "HR {value}");
        }
    }

    #[test]
    fn composite_segments() {
        assert!(evaluate(&snap(t0()).with(Vital::Abp, "119/80/93")).is_empty());
        assert_eq!(
            evaluate(&snap(t0()).with(Vital::Abp, "85/60/70")),
            vec![(Vital::Abp, AlertKind::Low, Severity::Warning)]
        );
        assert!(evaluate(&snap(t0()).with(Vital::Abp, "bad/80")).is_empty());

        // PAP is judged on its diastolic segment.
        assert_eq!(
            evaluate(&snap(t0()).with(Vital::Pap, "25/22/15")),
            vec![(Vital::Pap, AlertKind::High, Severity::Critical)]
        );
        assert!(evaluate(&snap(t0()).with(Vital::Pap, "25")).is_empty());
    }

    #[test]
    fn alert_carries_measured_value_and_deterministic_id() {
        let snapshot = snap(t0()).with(Vital::Hr, "145").with(Vital::SpO2, 98.0);
        let table = ThresholdTable::default();
        let first = evaluate_snapshot(&table, PatientId(7), &snapshot);
        let second = evaluate_snapshot(&table, PatientId(7), &snapshot);

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].value, VitalValue::Number(145.0));
        assert_eq!(first[0].id, AlertId::for_reading(PatientId(7), Vital::Hr, t0()));
    }

    #[test]
    fn only_newer_snapshots_are_evaluated() {
        let evaluator = AlertEvaluator::default();
        let snapshot = snap(t0()).with(Vital::Hr, 145.0);

        assert_eq!(evaluator.evaluate_latest(PatientId(7), &snapshot).len(), 1);
        assert!(evaluator.evaluate_latest(PatientId(7), &snapshot).is_empty());

        let older = snap(t0() - Duration::seconds(3)).with(Vital::Hr, 30.0);
        assert!(evaluator.evaluate_latest(PatientId(7), &older).is_empty());

        // Newer by less than a millisecond would reuse the same alert ids.
        let same_millisecond = snap(t0() + Duration::microseconds(400)).with(Vital::Hr, 150.0);
        assert!(evaluator.evaluate_latest(PatientId(7), &same_millisecond).is_empty());
        let next_millisecond = snap(t0() + Duration::milliseconds(1)).with(Vital::Hr, 150.0);
        assert_eq!(evaluator.evaluate_latest(PatientId(7), &next_millisecond).len(), 1);

        // Other patients are tracked separately.
        assert_eq!(evaluator.evaluate_latest(PatientId(8), &snapshot).len(), 1);
    }

    #[test]
    fn process_scores_only_the_latest_record() {
        let evaluator = AlertEvaluator::default();
        let history = vec![
            VitalRecord {
                vital_id: 2,
                snapshot: snap(t0() + Duration::seconds(3)).with(Vital::Hr, 80.0),
            },
            VitalRecord {
                vital_id: 1,
                snapshot: snap(t0()).with(Vital::Hr, 145.0),
            },
        ];
        assert!(evaluator.process(PatientId(7), &history).is_empty());
        assert!(evaluator.process(PatientId(7), &[]).is_empty());
    }

    #[test]
    fn state_follows_breach_and_recovery() {
        let evaluator = AlertEvaluator::default();
        let p = PatientId(7);
        assert_eq!(evaluator.state(p, Vital::Hr), VitalState::Normal);

        evaluator.evaluate_latest(p, &snap(t0()).with(Vital::Hr, 110.0));
        assert_eq!(evaluator.state(p, Vital::Hr), VitalState::Active(Severity::Warning));

        evaluator.evaluate_latest(p, &snap(t0() + Duration::seconds(3)).with(Vital::Hr, 130.0));
        assert_eq!(evaluator.state(p, Vital::Hr), VitalState::Active(Severity::Critical));

        // A snapshot without HR leaves its state alone.
        evaluator.evaluate_latest(p, &snap(t0() + Duration::seconds(6)).with(Vital::SpO2, 97.0));
        assert_eq!(evaluator.state(p, Vital::Hr), VitalState::Active(Severity::Critical));

        evaluator.evaluate_latest(p, &snap(t0() + Duration::seconds(9)).with(Vital::Hr, 72.0));
        assert_eq!(evaluator.state(p, Vital::Hr), VitalState::Normal);
    }
}
