//! Threshold-breach alerts.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{PatientId, Vital, VitalValue};

/// Direction of a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    High,
    Low,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// Ordered so that `Critical > Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert identity: `{patient}-{vital}-{timestamp}`.
///
/// Derived only from the triple, so evaluating the same snapshot twice
/// yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn for_reading(patient_id: PatientId, vital: Vital, timestamp: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}-{}",
            patient_id,
            vital.as_str().to_ascii_lowercase(),
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        ))
    }

    /// Wrap an externally chosen id, e.g. for operator-raised test alerts.
    pub fn custom(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An out-of-range vital for one patient at one snapshot timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub patient_id: PatientId,
    pub vital: Vital,
    pub value: VitalValue,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Build an alert with its deterministic id.
    pub fn new(
        patient_id: PatientId,
        vital: Vital,
        value: impl Into<VitalValue>,
        kind: AlertKind,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::for_reading(patient_id, vital, timestamp),
            patient_id,
            vital,
            value: value.into(),
            kind,
            severity,
            timestamp,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// One-line human summary, e.g. `HR is HIGH: 145`.
    pub fn summary(&self) -> String {
        format!(
            "{} is {}: {}",
            self.vital.measured_label(),
            self.kind.as_str().to_ascii_uppercase(),
            self.value
        )
    }
}
