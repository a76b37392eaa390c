//! Incremental aircraft-config packets.
//!
//! Peers send their parts (gear, flaps, lights, engines) as JSON. After one
//! full packet only the members that changed are sent. The full state is
//! rebuilt by merging each increment onto the last known parts.

use serde_json::{Map, Value};

use crate::aircraft::AircraftParts;
use crate::error::{AirspaceError, Result};

/// Merge `incremental` onto `previous`: nested objects merge member-wise,
/// every other value replaces the previous one.
pub fn apply_incremental_object(previous: &Map<String, Value>, incremental: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = previous.clone();
    for (key, value) in incremental {
        let replacement = match (merged.get(key), value) {
            (Some(Value::Object(old)), Value::Object(new)) => Value::Object(apply_incremental_object(old, new)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), replacement);
    }
    merged
}

impl AircraftParts {
    pub fn to_json(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(AirspaceError::InvalidAircraftConfig(format!(
                "parts serialized to non-object {other}"
            ))),
        }
    }

    /// Rebuild the full parts state from `self` plus an incremental packet.
    ///
    /// Callsign and timestamp are carried over from `self`.
    pub fn apply_incremental(&self, incremental: &Value) -> Result<AircraftParts> {
        let Value::Object(incremental) = incremental else {
            return Err(AirspaceError::InvalidAircraftConfig(format!(
                "expected JSON object, got {incremental}"
            )));
        };
        let merged = apply_incremental_object(&self.to_json()?, incremental);
        let mut parts: AircraftParts = serde_json::from_value(Value::Object(merged))?;
        parts.callsign = self.callsign.clone();
        parts.timestamp = self.timestamp;
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_packet() -> Value {
        json!({
            "lights": {
                "strobe_on": true,
                "landing_on": true,
                "taxi_on": false,
                "beacon_on": true,
                "nav_on": true,
                "logo_on": false
            },
            "gear_down": true,
            "flaps_pct": 25,
            "spoilers_out": false,
            "engines": { "1": { "on": true }, "2": { "on": true } },
            "on_ground": false
        })
    }

    #[test]
    fn incremental_changes_only_the_given_member() {
        let baseline = AircraftParts::default().apply_incremental(&full_packet()).unwrap();
        let updated = baseline.apply_incremental(&json!({ "gear_down": false })).unwrap();

        let mut expected = baseline.clone();
        expected.gear_down = false;
        assert_eq!(updated, expected);
    }

    #[test]
    fn nested_objects_merge_member_wise() {
        let baseline = AircraftParts::default().apply_incremental(&full_packet()).unwrap();
        let updated = baseline
            .apply_incremental(&json!({ "lights": { "landing_on": false }, "engines": { "2": { "on": false } } }))
            .unwrap();

        assert!(!updated.lights.landing_on);
        assert!(updated.lights.strobe_on);
        assert!(updated.lights.beacon_on);
        assert_eq!(updated.engines.get(&1).map(|e| e.on), Some(true));
        assert_eq!(updated.engines.get(&2).map(|e| e.on), Some(false));
        assert_eq!(updated.flaps_pct, 25);
    }

    #[test]
    fn non_object_packet_is_rejected() {
        let result = AircraftParts::default().apply_incremental(&json!([1, 2, 3]));
        assert!(matches!(result, Err(AirspaceError::InvalidAircraftConfig(_))));
    }
}
