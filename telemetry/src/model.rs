use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Drone position as reported by the emitter.
///
/// Older drones report a point on the integer grid (`[x, y]`), newer ones a
/// geographic fix (`{"latitude": .., "longitude": ..}`). Both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Grid(i64, i64),
    GeoCoordinate { latitude: f64, longitude: f64 },
}

/// Drone telemetry report, as accepted by the gateway and the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(rename = "drone_id")]
    pub emitter_id: String,
    pub position: Position,
    pub battery_level: u8,
}

/// A record accepted by the store, stamped on insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: TelemetryRecord,
    pub received_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(record: TelemetryRecord, received_at: DateTime<Utc>) -> Self {
        Self {
            record,
            received_at,
        }
    }

    pub fn emitter_id(&self) -> &str {
        &self.record.emitter_id
    }
}
