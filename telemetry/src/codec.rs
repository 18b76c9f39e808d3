use crate::model::{Position, TelemetryRecord};
use serde_json::{Map, Value};
use thiserror::Error;

const ID_FIELDS: &[&str] = &["drone_id", "emitter_id", "name"];
const BATTERY_FIELDS: &[&str] = &["battery_level", "battery"];

const BATTERY_MIN: f64 = 0.0;
const BATTERY_MAX: f64 = 100.0;
const LATITUDE_LIMIT: f64 = 90.0;
const LONGITUDE_LIMIT: f64 = 180.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Decodes a raw datagram or broker payload into a telemetry record.
///
/// The payload is read as UTF-8 with invalid sequences replaced, then parsed
/// as a JSON object. Field names of every emitter generation are accepted:
/// `drone_id`/`emitter_id`/`name` for the identifier, `position` or a
/// top-level `x`/`y` pair for the position, `battery_level`/`battery` for the
/// battery. Numeric fields may arrive as numbers or numeric strings.
pub fn decode(raw: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    let text = String::from_utf8_lossy(raw);
    let value: Value = serde_json::from_str(text.trim_matches('\0').trim())
        .map_err(|e| DecodeError::InvalidFormat(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(DecodeError::InvalidFormat(
            "payload is not a JSON object".to_string(),
        ));
    };

    Ok(TelemetryRecord {
        emitter_id: decode_emitter_id(&fields)?,
        position: decode_position(&fields)?,
        battery_level: decode_battery(&fields)?,
    })
}

fn lookup<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| fields.get(*name))
        .find(|value| !value.is_null())
}

fn decode_emitter_id(fields: &Map<String, Value>) -> Result<String, DecodeError> {
    let value = lookup(fields, ID_FIELDS).ok_or(DecodeError::MissingField("drone_id"))?;

    let id = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(DecodeError::invalid(
                "drone_id",
                format!("expected a string, got {}", kind(other)),
            ))
        }
    };

    // The id is the cache key, so it is kept byte for byte
    if id.trim().is_empty() {
        return Err(DecodeError::invalid("drone_id", "cannot be empty"));
    }

    Ok(id)
}

fn decode_position(fields: &Map<String, Value>) -> Result<Position, DecodeError> {
    if let Some(value) = lookup(fields, &["position"]) {
        return match value {
            Value::Array(items) if items.len() == 2 => {
                let x = grid_coordinate(&items[0])?;
                let y = grid_coordinate(&items[1])?;
                Ok(Position::Grid(x, y))
            }
            Value::Array(items) => Err(DecodeError::invalid(
                "position",
                format!("expected 2 grid coordinates, got {}", items.len()),
            )),
            Value::Object(coords) => geo_coordinate(coords),
            other => Err(DecodeError::invalid(
                "position",
                format!("expected an array or an object, got {}", kind(other)),
            )),
        };
    }

    // Legacy payloads carry the grid point as top-level fields
    match (lookup(fields, &["x"]), lookup(fields, &["y"])) {
        (Some(x), Some(y)) => Ok(Position::Grid(grid_coordinate(x)?, grid_coordinate(y)?)),
        _ => Err(DecodeError::MissingField("position")),
    }
}

fn grid_coordinate(value: &Value) -> Result<i64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        DecodeError::invalid("position", format!("grid coordinate {} is not an integer", value))
    })
}

fn geo_coordinate(coords: &Map<String, Value>) -> Result<Position, DecodeError> {
    let latitude = degrees(coords, "latitude", LATITUDE_LIMIT)?;
    let longitude = degrees(coords, "longitude", LONGITUDE_LIMIT)?;
    Ok(Position::GeoCoordinate {
        latitude,
        longitude,
    })
}

fn degrees(coords: &Map<String, Value>, name: &str, limit: f64) -> Result<f64, DecodeError> {
    let value = coords
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| DecodeError::invalid("position", format!("missing {}", name)))?;

    let degrees = as_f64(value)
        .filter(|f| f.is_finite())
        .ok_or_else(|| DecodeError::invalid("position", format!("{} is not a number", name)))?;

    if degrees.abs() > limit {
        return Err(DecodeError::invalid(
            "position",
            format!("{} {} out of range [-{}, {}]", name, degrees, limit, limit),
        ));
    }

    Ok(degrees)
}

fn decode_battery(fields: &Map<String, Value>) -> Result<u8, DecodeError> {
    let value =
        lookup(fields, BATTERY_FIELDS).ok_or(DecodeError::MissingField("battery_level"))?;

    let level = as_f64(value)
        .filter(|f| f.is_finite())
        .ok_or_else(|| {
            DecodeError::invalid("battery_level", format!("{} is not a number", value))
        })?;

    Ok(level.round().clamp(BATTERY_MIN, BATTERY_MAX) as u8)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
