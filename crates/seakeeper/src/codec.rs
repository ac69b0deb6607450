//! Status message codec.
//!
//! The device publishes its full state as one JSON object. Decoding yields
//! a typed projection of the fields the bridge acts on, plus the complete
//! key/value map for callers that want everything else. Both come from the
//! same byte slice in one call.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Typed view of the device telemetry.
///
/// Unknown fields are dropped here but kept in the raw map returned by
/// [`decode_status`]. Missing and `null` fields fall back to their zero
/// value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    #[serde(deserialize_with = "null_as_default")]
    pub battery_voltage: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub boat_roll_angle: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub sea_hours: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub drive_current: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub drive_temperature: String,
    #[serde(rename = "progress_bar_percentage", deserialize_with = "null_as_default")]
    pub progress_bar: f64,
    /// `> 0` means stabilization is on
    #[serde(deserialize_with = "null_as_default")]
    pub stabilize_enabled: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub stabilize_available: bool,
    /// `>= 1` means power can be switched on
    #[serde(deserialize_with = "null_as_default")]
    pub power_available: f64,
    /// `> 0` means power is on
    #[serde(deserialize_with = "null_as_default")]
    pub power_enabled: f64,
}

/// Read `null` as the zero value, like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Status {
    /// Whether the flywheel power is on.
    ///
    /// Any positive value counts, including intermediate values reported
    /// while the device is transitioning.
    pub fn is_power_on(&self) -> bool {
        self.power_enabled > 0.0
    }

    pub fn is_power_available(&self) -> bool {
        self.power_available >= 1.0
    }

    /// Whether stabilization is engaged. Same threshold as [`Self::is_power_on`].
    pub fn is_stabilize_on(&self) -> bool {
        self.stabilize_enabled > 0.0
    }

    pub fn is_stabilize_available(&self) -> bool {
        self.stabilize_available
    }
}

/// Decode a status payload into its typed projection and the raw map.
///
/// The payload is parsed once into a JSON object; the typed record is
/// projected from that object, so the two can never disagree.
pub fn decode_status(payload: &[u8]) -> Result<(Status, Map<String, Value>)> {
    let raw: Map<String, Value> = serde_json::from_slice(payload)?;
    let status = serde_json::from_value(Value::Object(raw.clone()))?;
    Ok((status, raw))
}

/// Encode a single-key command payload, e.g. `{"power":1.0}`.
pub fn encode_command(key: &str, on: bool) -> Result<Vec<u8>> {
    let mut command = Map::new();
    command.insert(key.to_string(), Value::from(if on { 1.0 } else { 0.0 }));
    Ok(serde_json::to_vec(&command)?)
}
