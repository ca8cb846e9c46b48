//! Fused vitals snapshots and their persisted form.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Vital, VitalValue};

/// Patient identifier as issued by the records system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub u64);

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the frame behind a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VitalSource {
    Camera,
    Video,
    Manual,
}

impl VitalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Video => "video",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for VitalSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera" => Ok(Self::Camera),
            "video" => Ok(Self::Video),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown vital source: {other}")),
        }
    }
}

/// One best-effort reading of every vital, produced once per extraction cycle.
///
/// Serialises with the display labels as keys and `null` for fields the
/// extractors could not read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSnapshot {
    #[serde(rename = "HR")]
    pub hr: Option<VitalValue>,
    #[serde(rename = "Pulse")]
    pub pulse: Option<VitalValue>,
    #[serde(rename = "SpO2")]
    pub spo2: Option<VitalValue>,
    #[serde(rename = "ABP")]
    pub abp: Option<VitalValue>,
    #[serde(rename = "PAP")]
    pub pap: Option<VitalValue>,
    #[serde(rename = "EtCO2")]
    pub etco2: Option<VitalValue>,
    #[serde(rename = "awRR")]
    pub aw_rr: Option<VitalValue>,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    pub timestamp: DateTime<Utc>,
    pub source: VitalSource,
}

impl VitalsSnapshot {
    /// An empty snapshot; every field `None`.
    pub fn new(patient_id: Option<PatientId>, timestamp: DateTime<Utc>, source: VitalSource) -> Self {
        Self {
            hr: None,
            pulse: None,
            spo2: None,
            abp: None,
            pap: None,
            etco2: None,
            aw_rr: None,
            patient_id,
            timestamp,
            source,
        }
    }

    pub fn with(mut self, vital: Vital, value: impl Into<VitalValue>) -> Self {
        self.set(vital, Some(value.into()));
        self
    }

    pub fn get(&self, vital: Vital) -> Option<&VitalValue> {
        self.slot(vital).as_ref()
    }

    pub fn set(&mut self, vital: Vital, value: Option<VitalValue>) {
        *self.slot_mut(vital) = value;
    }

    /// Present fields in display order.
    pub fn values(&self) -> impl Iterator<Item = (Vital, &VitalValue)> + '_ {
        Vital::ALL
            .into_iter()
            .filter_map(|vital| self.get(vital).map(|v| (vital, v)))
    }

    /// True when no vital could be read.
    pub fn is_empty(&self) -> bool {
        self.values().next().is_none()
    }

    fn slot(&self, vital: Vital) -> &Option<VitalValue> {
        match vital {
            Vital::Hr => &self.hr,
            Vital::Pulse => &self.pulse,
            Vital::SpO2 => &self.spo2,
            Vital::Abp => &self.abp,
            Vital::Pap => &self.pap,
            Vital::EtCo2 => &self.etco2,
            Vital::AwRr => &self.aw_rr,
        }
    }

    fn slot_mut(&mut self, vital: Vital) -> &mut Option<VitalValue> {
        match vital {
            Vital::Hr => &mut self.hr,
            Vital::Pulse => &mut self.pulse,
            Vital::SpO2 => &mut self.spo2,
            Vital::Abp => &mut self.abp,
            Vital::Pap => &mut self.pap,
            Vital::EtCo2 => &mut self.etco2,
            Vital::AwRr => &mut self.aw_rr,
        }
    }
}

/// A snapshot accepted by the storage collaborator, with its assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalRecord {
    pub vital_id: i64,
    #[serde(flatten)]
    pub snapshot: VitalsSnapshot,
}
