//! Drone telemetry data model and payload codec, shared by the gateway and
//! the store.

pub mod codec;
pub mod model;

pub use codec::{decode, DecodeError};
pub use model::{Position, StoredRecord, TelemetryRecord};
