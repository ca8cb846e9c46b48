//! Clinical alert thresholds.
//!
//! One canonical table. Each vital has a warning band (`low`..=`high`) and a
//! wider critical band. A value outside the warning band alerts; how far
//! outside decides the severity:
//!
//! | Vital | Warning low/high | Critical low/high |
//! |---|---|---|
//! | HR, Pulse | 60 / 100 | 50 / 120 |
//! | SpO2 | 90 / none | 85 / none |
//! | ABP (systolic) | 90 / 120 | 70 / 180 |
//! | PAP (diastolic) | 4 / 12 | 2 / 20 |
//! | EtCO2 | 35 / 45 | 25 / 55 |
//! | awRR | 12 / 20 | 8 / 25 |
//!
//! Warning bounds are exclusive (HR 100 is normal, 101 alerts). The critical
//! low bound is inclusive (HR 50 is critical) and the critical high bound
//! exclusive (HR 120 is a warning, 121 critical).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AlertKind, Severity, Vital};

/// Bounds for one vital. `None` disables that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalThreshold {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
}

/// Classification of an out-of-range value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breach {
    pub kind: AlertKind,
    pub severity: Severity,
}

impl VitalThreshold {
    pub const fn new(low: f64, high: f64, critical_low: f64, critical_high: f64) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
            critical_low: Some(critical_low),
            critical_high: Some(critical_high),
        }
    }

    /// Low-side only (no high alert).
    pub const fn low_only(low: f64, critical_low: f64) -> Self {
        Self {
            low: Some(low),
            high: None,
            critical_low: Some(critical_low),
            critical_high: None,
        }
    }

    pub fn classify(&self, value: f64) -> Option<Breach> {
        if let Some(low) = self.low
            && value < low
        {
            let critical = self.critical_low.is_some_and(|c| value <= c);
            return Some(Breach {
                kind: AlertKind::Low,
                severity: if critical { Severity::Critical } else { Severity::Warning },
            });
        }
        if let Some(high) = self.high
            && value > high
        {
            let critical = self.critical_high.is_some_and(|c| value > c);
            return Some(Breach {
                kind: AlertKind::High,
                severity: if critical { Severity::Critical } else { Severity::Warning },
            });
        }
        None
    }
}

/// Thresholds keyed by vital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    entries: BTreeMap<Vital, VitalThreshold>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        let entries = BTreeMap::from([
            (Vital::Hr, VitalThreshold::new(60.0, 100.0, 50.0, 120.0)),
            (Vital::Pulse, VitalThreshold::new(60.0, 100.0, 50.0, 120.0)),
            (Vital::SpO2, VitalThreshold::low_only(90.0, 85.0)),
            (Vital::Abp, VitalThreshold::new(90.0, 120.0, 70.0, 180.0)),
            (Vital::Pap, VitalThreshold::new(4.0, 12.0, 2.0, 20.0)),
            (Vital::EtCo2, VitalThreshold::new(35.0, 45.0, 25.0, 55.0)),
            (Vital::AwRr, VitalThreshold::new(12.0, 20.0, 8.0, 25.0)),
        ]);
        Self { entries }
    }
}

impl ThresholdTable {
    pub fn get(&self, vital: Vital) -> Option<&VitalThreshold> {
        self.entries.get(&vital)
    }

    /// Replace one vital's bounds.
    pub fn set(&mut self, vital: Vital, threshold: VitalThreshold) {
        self.entries.insert(vital, threshold);
    }

    pub fn classify(&self, vital: Vital, value: f64) -> Option<Breach> {
        self.get(vital).and_then(|t| t.classify(value))
    }
}
