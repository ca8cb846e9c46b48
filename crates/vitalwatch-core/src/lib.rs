pub mod alert;
pub mod error;
pub mod extraction;
pub mod roi;
pub mod snapshot;
pub mod thresholds;
pub mod vital;

pub use alert::{Alert, AlertId, AlertKind, Severity};
pub use error::CoreError;
pub use extraction::{Extraction, RawExtraction, Reading};
pub use roi::{PixelRect, Roi, default_rois};
pub use snapshot::{PatientId, VitalRecord, VitalSource, VitalsSnapshot};
pub use thresholds::{Breach, ThresholdTable, VitalThreshold};
pub use vital::{Vital, VitalValue, parse_leading_number};
