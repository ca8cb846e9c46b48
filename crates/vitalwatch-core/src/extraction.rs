//! Raw extractor output, validated at the extractor boundary.
//!
//! Extractors report per-label [`Reading`]s; an extractor that could not run
//! at all reports [`Extraction::Failed`]. Nothing downstream of an extractor
//! sees the untyped shapes returned by OCR engines or model services.

use std::collections::BTreeMap;

use crate::{Vital, VitalValue};

/// Outcome for one label from one extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Value(VitalValue),
    /// The extractor looked but found nothing usable.
    Missing,
    /// Extraction of this label alone failed.
    Failed(String),
}

impl Reading {
    pub fn value(&self) -> Option<&VitalValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing | Self::Failed(_) => None,
        }
    }
}

impl From<Option<VitalValue>> for Reading {
    fn from(value: Option<VitalValue>) -> Self {
        match value {
            Some(v) if !v.is_blank() => Self::Value(v),
            _ => Self::Missing,
        }
    }
}

/// Per-label readings from a single extractor invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction {
    readings: BTreeMap<Vital, Reading>,
}

impl RawExtraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vital: Vital, reading: Reading) {
        self.readings.insert(vital, reading);
    }

    /// Builder-style insert of a present value.
    pub fn with(mut self, vital: Vital, value: impl Into<VitalValue>) -> Self {
        self.insert(vital, Reading::Value(value.into()));
        self
    }

    pub fn get(&self, vital: Vital) -> Option<&Reading> {
        self.readings.get(&vital)
    }

    pub fn value(&self, vital: Vital) -> Option<&VitalValue> {
        self.get(vital).and_then(Reading::value)
    }

    /// Labels this extractor emitted a key for, present or not.
    pub fn labels(&self) -> impl Iterator<Item = Vital> + '_ {
        self.readings.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Whole-invocation result of a region extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Values(RawExtraction),
    /// Source unreachable, malformed response, missing credentials, timeout.
    Failed(String),
}

impl Extraction {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Readings, or `None` when the extractor produced no result.
    pub fn readings(&self) -> Option<&RawExtraction> {
        match self {
            Self::Values(raw) => Some(raw),
            Self::Failed(_) => None,
        }
    }

    pub fn value(&self, vital: Vital) -> Option<&VitalValue> {
        self.readings().and_then(|raw| raw.value(vital))
    }
}

impl From<RawExtraction> for Extraction {
    fn from(raw: RawExtraction) -> Self {
        Self::Values(raw)
    }
}
