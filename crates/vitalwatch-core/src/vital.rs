//! Vital-sign labels and the values a monitor display can show for them.
//!
//! Seven labels are recognised. Five are scalars (HR, Pulse, SpO2, EtCO2,
//! awRR) and two are blood-pressure composites rendered as `sys/dia/mean`
//! strings (ABP, PAP).

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A vital-sign label as it appears on the monitor and in extraction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Vital {
    #[serde(rename = "HR")]
    Hr,
    #[serde(rename = "Pulse")]
    Pulse,
    #[serde(rename = "SpO2")]
    SpO2,
    #[serde(rename = "ABP")]
    Abp,
    #[serde(rename = "PAP")]
    Pap,
    #[serde(rename = "EtCO2")]
    EtCo2,
    #[serde(rename = "awRR")]
    AwRr,
}

impl Vital {
    /// All labels in display order.
    pub const ALL: [Vital; 7] = [
        Vital::Hr,
        Vital::Pulse,
        Vital::SpO2,
        Vital::Abp,
        Vital::Pap,
        Vital::EtCo2,
        Vital::AwRr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hr => "HR",
            Self::Pulse => "Pulse",
            Self::SpO2 => "SpO2",
            Self::Abp => "ABP",
            Self::Pap => "PAP",
            Self::EtCo2 => "EtCO2",
            Self::AwRr => "awRR",
        }
    }

    /// Look up a label exactly as written on the display (`"SpO2"`, `"awRR"`).
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == label.trim())
    }

    /// Blood-pressure fields carry `sys/dia/mean` strings instead of a scalar.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Abp | Self::Pap)
    }

    /// Physiologically plausible range used to reject obviously wrong reads.
    ///
    /// Composite fields have no numeric range: any non-empty value passes.
    pub fn plausible_range(&self) -> Option<RangeInclusive<f64>> {
        match self {
            Self::Hr | Self::Pulse => Some(30.0..=200.0),
            Self::SpO2 => Some(70.0..=100.0),
            Self::EtCo2 => Some(10.0..=80.0),
            Self::AwRr => Some(5.0..=40.0),
            Self::Abp | Self::Pap => None,
        }
    }

    /// Name of the quantity the alert thresholds are applied to.
    ///
    /// ABP is judged on its systolic segment and PAP on its diastolic one.
    pub fn measured_label(&self) -> &'static str {
        match self {
            Self::Abp => "ABP Sys",
            Self::Pap => "PAP Dia",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Vital {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vital {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| CoreError::UnknownVital(s.to_string()))
    }
}

/// A value read off the display: a number, or text such as `"120/80/93"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VitalValue {
    Number(f64),
    Text(String),
}

impl VitalValue {
    /// Numeric interpretation of the value.
    ///
    /// Text is read leniently: the leading number is taken and the rest
    /// ignored, so `"72"` and `"120/80"` yield 72 and 120.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Number(_) => None,
            Self::Text(s) => parse_leading_number(s),
        }
    }

    /// The `index`-th `/`-separated segment, parsed as a number.
    pub fn segment(&self, index: usize) -> Option<f64> {
        match self {
            Self::Number(n) if index == 0 && n.is_finite() => Some(*n),
            Self::Number(_) => None,
            Self::Text(s) => s.split('/').nth(index).and_then(parse_leading_number),
        }
    }

    /// Empty or whitespace-only text carries no reading.
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for VitalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for VitalValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for VitalValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Parse the leading decimal number of `s`, ignoring anything after it.
///
/// Returns `None` when `s` does not start (after whitespace) with a digit,
/// optionally preceded by a sign.
pub fn parse_leading_number(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }

    s[..end].parse().ok()
}
