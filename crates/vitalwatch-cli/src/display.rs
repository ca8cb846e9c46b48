//! Terminal rendering for extractions and alerts.

use serde_json::{Map, Value, json};
use vitalwatch_core::{Alert, Extraction, Reading, Severity};

/// JSON view of one extractor's result: `{"failed": reason}` for a
/// whole-call failure, otherwise one key per label with the value, `null`,
/// or `{"failed": reason}` for a single ROI.
pub fn extraction_json(extraction: &Extraction) -> Value {
    let raw = match extraction {
        Extraction::Failed(reason) => return json!({ "failed": reason }),
        Extraction::Values(raw) => raw,
    };
    let mut out = Map::new();
    for vital in raw.labels() {
        let value = match raw.get(vital) {
            Some(Reading::Value(v)) => json!(v),
            Some(Reading::Failed(reason)) => json!({ "failed": reason }),
            Some(Reading::Missing) | None => Value::Null,
        };
        out.insert(vital.as_str().to_string(), value);
    }
    Value::Object(out)
}

/// One line per alert: time, severity, summary, id.
pub fn alert_line(alert: &Alert) -> String {
    let marker = match alert.severity {
        Severity::Critical => "CRITICAL",
        Severity::Warning => "warning ",
    };
    format!(
        "{}  {}  patient {}  {}  [{}]",
        alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
        marker,
        alert.patient_id,
        alert.summary(),
        alert.id
    )
}

pub fn print_alerts(heading: &str, alerts: &[Alert]) {
    println!("{heading} ({})", alerts.len());
    if alerts.is_empty() {
        println!("  (none)");
    }
    for alert in alerts {
        println!("  {}", alert_line(alert));
    }
}
