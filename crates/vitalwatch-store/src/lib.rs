//! Storage layer: vital record persistence and the throttle ledger.
//!
//! In-memory implementations are always available; DuckDB-backed,
//! file-persistent ones are behind the `duckdb` feature.

mod error;
mod ledger;
mod repository;

pub use error::StoreError;
pub use ledger::{MemoryLedger, ThrottleKey, ThrottleLedger};
pub use repository::{MemoryRepository, VitalRepository};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
