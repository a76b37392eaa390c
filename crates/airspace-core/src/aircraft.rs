//! Remote aircraft, their situations, parts and ICAO information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{AircraftModel, Callsign, Client, Frequency, GeoPosition, User};

/// ICAO codes describing aircraft type and operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftIcao {
    /// Aircraft type designator, e.g. "B738"
    #[serde(default)]
    pub aircraft_designator: String,
    /// Combined type, e.g. "L2J"
    #[serde(default)]
    pub combined_type: String,
    #[serde(default)]
    pub airline_designator: String,
    #[serde(default)]
    pub livery: String,
}

impl AircraftIcao {
    pub fn new(
        aircraft_designator: impl Into<String>,
        combined_type: impl Into<String>,
        airline_designator: impl Into<String>,
    ) -> Self {
        Self {
            aircraft_designator: aircraft_designator.into().trim().to_uppercase(),
            combined_type: combined_type.into().trim().to_uppercase(),
            airline_designator: airline_designator.into().trim().to_uppercase(),
            livery: String::new(),
        }
    }

    pub fn has_aircraft_designator(&self) -> bool {
        !self.aircraft_designator.trim().is_empty()
    }

    /// 2-5 upper-case alphanumerics starting with a letter.
    pub fn has_valid_aircraft_designator(&self) -> bool {
        is_valid_designator(&self.aircraft_designator)
    }
}

pub fn is_valid_designator(designator: &str) -> bool {
    let len = designator.chars().count();
    if !(2..=5).contains(&len) {
        return false;
    }
    let mut chars = designator.chars();
    let first_is_letter = chars.next().map(|c| c.is_ascii_uppercase()).unwrap_or(false);
    first_is_letter && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransponderMode {
    #[default]
    Standby,
    ModeC,
    Ident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transponder {
    pub code: u16,
    #[serde(default)]
    pub mode: TransponderMode,
}

impl Default for Transponder {
    fn default() -> Self {
        Self {
            code: 7000,
            mode: TransponderMode::Standby,
        }
    }
}

impl Transponder {
    /// Octal squawk code, every digit 0-7.
    pub fn is_valid_code(code: u16) -> bool {
        code <= 7777 && [code / 1000, (code / 100) % 10, (code / 10) % 10, code % 10]
            .iter()
            .all(|digit| *digit <= 7)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComSystem {
    pub active: Frequency,
    #[serde(default)]
    pub standby: Frequency,
}

/// Position snapshot of a remote aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftSituation {
    #[serde(default)]
    pub callsign: Callsign,
    pub position: GeoPosition,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub pitch_deg: f64,
    #[serde(default)]
    pub bank_deg: f64,
    #[serde(default)]
    pub ground_speed_kts: f64,
    #[serde(default)]
    pub on_ground: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Expected offset to the next update, used by interpolation
    #[serde(default)]
    pub time_offset_ms: i64,
}

impl AircraftSituation {
    pub fn new(callsign: Callsign, position: GeoPosition) -> Self {
        Self {
            callsign,
            position,
            heading_deg: 0.0,
            pitch_deg: 0.0,
            bank_deg: 0.0,
            ground_speed_kts: 0.0,
            on_ground: false,
            timestamp: Utc::now(),
            time_offset_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AircraftLights {
    pub strobe_on: bool,
    pub landing_on: bool,
    pub taxi_on: bool,
    pub beacon_on: bool,
    pub nav_on: bool,
    pub logo_on: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    pub on: bool,
}

/// Aircraft configuration (gear, flaps, lights, engines).
///
/// The JSON shape matches the aircraft-config packets exchanged on the network,
/// with engines keyed by their 1-based number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AircraftParts {
    #[serde(skip)]
    pub callsign: Callsign,
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
    pub lights: AircraftLights,
    pub gear_down: bool,
    pub flaps_pct: u8,
    pub spoilers_out: bool,
    pub engines: BTreeMap<u8, EngineState>,
    pub on_ground: bool,
}

/// Another pilot's aircraft in range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAircraft {
    pub callsign: Callsign,
    #[serde(default)]
    pub pilot: User,
    pub situation: Option<AircraftSituation>,
    #[serde(default)]
    pub transponder: Transponder,
    #[serde(default)]
    pub icao: AircraftIcao,
    #[serde(default)]
    pub com1: ComSystem,
    #[serde(default)]
    pub client: Client,
    #[serde(default)]
    pub model: AircraftModel,
    #[serde(default)]
    pub parts: Option<AircraftParts>,
    #[serde(default)]
    pub parts_synchronized: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub distance_to_own_m: Option<f64>,
}

fn enabled_by_default() -> bool {
    true
}

impl RemoteAircraft {
    pub fn new(callsign: Callsign) -> Self {
        Self {
            pilot: User::for_callsign(callsign.clone()),
            client: Client::placeholder(callsign.clone()),
            callsign,
            enabled: true,
            ..Self::default()
        }
    }

    pub fn has_valid_aircraft_designator(&self) -> bool {
        self.icao.has_valid_aircraft_designator()
    }

    pub fn has_valid_real_name(&self) -> bool {
        self.pilot.has_valid_real_name() || self.client.user.has_valid_real_name()
    }

    pub fn position(&self) -> Option<GeoPosition> {
        self.situation.as_ref().map(|s| s.position)
    }

    /// Attach peer metadata; the client's model and real name fill gaps on the aircraft.
    pub fn set_client(&mut self, client: Client) {
        if client.model.has_model_string() {
            self.model = client.model.clone();
        }
        if !self.pilot.has_valid_real_name() && client.user.has_valid_real_name() {
            self.pilot.real_name = client.user.real_name.clone();
        }
        self.client = client;
    }
}
