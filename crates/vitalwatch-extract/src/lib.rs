//! Extraction layer: two independent region extractors over a monitor frame,
//! run concurrently and fused into one snapshot.

mod dual;
mod error;
mod extractor;
mod frame;
pub mod fusion;
pub mod model;
pub mod pattern;

pub use dual::{DualExtractor, DualOutcome};
pub use error::ExtractError;
pub use extractor::RegionExtractor;
pub use frame::Frame;
pub use fusion::select;
pub use model::{ModelConfig, ModelExtractor};
pub use pattern::{CharacterRecognizer, PatternExtractor, TesseractRecognizer};
