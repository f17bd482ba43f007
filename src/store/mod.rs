// src/store/mod.rs - In-process quarantine and telemetry stores

pub mod quarantine;
pub mod telemetry;

pub use quarantine::{QuarantineRecord, QuarantineStats, QuarantineStore, DEFAULT_QUARANTINE_CAPACITY};
pub use telemetry::{TaskTelemetry, TelemetryRecord, TelemetryStats, TelemetryStore};
