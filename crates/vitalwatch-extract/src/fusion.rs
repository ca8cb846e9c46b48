//! Fusion of the model-based and pattern-based extractions.
//!
//! Per label: the model value if it is plausible, else the pattern value if
//! it is plausible, else whichever is present (model first), else nothing.
//! Scalars are plausible when their numeric reading falls inside
//! [`Vital::plausible_range`]; blood-pressure composites whenever present.
//! No cross-source agreement is required and no value is ever synthesised.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;
use vitalwatch_core::{Extraction, PatientId, Vital, VitalSource, VitalValue, VitalsSnapshot};

/// Whether `value` is a believable reading for `vital`.
pub fn is_plausible(vital: Vital, value: &VitalValue) -> bool {
    if value.is_blank() {
        return false;
    }
    match vital.plausible_range() {
        Some(range) => value.as_number().is_some_and(|n| range.contains(&n)),
        None => true,
    }
}

/// Pick one value for a label from the two candidates.
pub fn choose(
    vital: Vital,
    model: Option<&VitalValue>,
    pattern: Option<&VitalValue>,
) -> Option<VitalValue> {
    let model = model.filter(|v| !v.is_blank());
    let pattern = pattern.filter(|v| !v.is_blank());

    if let Some(v) = model.filter(|v| is_plausible(vital, v)) {
        return Some(v.clone());
    }
    if let Some(v) = pattern.filter(|v| is_plausible(vital, v)) {
        return Some(v.clone());
    }
    model.or(pattern).cloned()
}

/// Merge two extractor results into one snapshot.
pub fn select(
    model: &Extraction,
    pattern: &Extraction,
    patient_id: Option<PatientId>,
    timestamp: DateTime<Utc>,
    source: VitalSource,
) -> VitalsSnapshot {
    let labels: BTreeSet<Vital> = [model, pattern]
        .into_iter()
        .filter_map(Extraction::readings)
        .flat_map(|raw| raw.labels())
        .collect();

    let mut snapshot = VitalsSnapshot::new(patient_id, timestamp, source);
    for vital in labels {
        let chosen = choose(vital, model.value(vital), pattern.value(vital));
        debug!(
            vital = %vital,
            model = ?model.value(vital),
            pattern = ?pattern.value(vital),
            chosen = ?chosen,
            "fused reading"
        );
        snapshot.set(vital, chosen);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vitalwatch_core::{RawExtraction, Reading};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap()
    }

    fn fuse(model: Extraction, pattern: Extraction) -> VitalsSnapshot {
        select(&model, &pattern, Some(PatientId(1)), ts(), VitalSource::Camera)
    }

    #[test]
    fn plausible_model_value_wins_regardless_of_pattern() {
        for (vital, model_value, pattern_value) in [
            (Vital::Hr, 72.0, 75.0),
            (Vital::Pulse, 199.0, 60.0),
            (Vital::SpO2, 70.0, 99.0),
            (Vital::EtCo2, 80.0, 4.0),
            (Vital::AwRr, 5.0, 300.0),
        ] {
            let snap = fuse(
                RawExtraction::new().with(vital, model_value).into(),
                RawExtraction::new().with(vital, pattern_value).into(),
            );
            assert_eq!(snap.get(vital), Some(&VitalValue::Number(model_value)), "{vital}");
        }
    }

    #[test]
    fn implausible_model_falls_back_to_pattern() {
        let snap = fuse(
            RawExtraction::new().with(Vital::Hr, 720.0).with(Vital::SpO2, 9.0).into(),
            RawExtraction::new().with(Vital::Hr, "72").with(Vital::SpO2, "97").into(),
        );
        assert_eq!(snap.get(Vital::Hr), Some(&VitalValue::from("72")));
        assert_eq!(snap.get(Vital::SpO2), Some(&VitalValue::from("97")));
    }

    #[test]
    fn missing_model_falls_back_to_pattern() {
        let mut model = RawExtraction::new();
        model.insert(Vital::Hr, Reading::Missing);
        let snap = fuse(model.into(), RawExtraction::new().with(Vital::Hr, "88").into());
        assert_eq!(snap.get(Vital::Hr), Some(&VitalValue::from("88")));
    }

    #[test]
    fn both_implausible_keeps_model_value() {
        let snap = fuse(
            RawExtraction::new().with(Vital::Hr, 250.0).into(),
            RawExtraction::new().with(Vital::Hr, "7").into(),
        );
        assert_eq!(snap.get(Vital::Hr), Some(&VitalValue::Number(250.0)));

        let snap = fuse(
            Extraction::failed("timeout"),
            RawExtraction::new().with(Vital::Hr, "7").into(),
        );
        assert_eq!(snap.get(Vital::Hr), Some(&VitalValue::from("7")));
    }

    #[test]
    fn composites_accept_any_present_value() {
        let snap = fuse(
            RawExtraction::new().with(Vital::Abp, "bad/80").into(),
            RawExtraction::new().with(Vital::Abp, "120/80/93").into(),
        );
        assert_eq!(snap.get(Vital::Abp), Some(&VitalValue::from("bad/80")));

        let snap = fuse(
            RawExtraction::new().with(Vital::Pap, "").into(),
            RawExtraction::new().with(Vital::Pap, "25/10/15").into(),
        );
        assert_eq!(snap.get(Vital::Pap), Some(&VitalValue::from("25/10/15")));
    }

    #[test]
    fn never_fabricates_values() {
        let snap = fuse(
            Extraction::failed("no key"),
            Extraction::failed("tesseract missing"),
        );
        assert!(snap.is_empty());
        assert_eq!(snap.patient_id, Some(PatientId(1)));

        let snap = fuse(
            RawExtraction::new().with(Vital::Hr, 80.0).into(),
            Extraction::failed("tesseract missing"),
        );
        assert_eq!(snap.values().count(), 1);
    }
}
