//! Core data models for network participants: callsigns, users, clients and ATC stations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::spatial::{bearing_deg, haversine_distance};

/// Unique identifier of a network participant (aircraft or ATC facility).
///
/// Callsigns are trimmed and upper-cased on construction, so `"dlh123 "`
/// and `"DLH123"` address the same entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Callsign(String);

impl Callsign {
    pub fn new(callsign: impl AsRef<str>) -> Self {
        Self(callsign.as_ref().trim().to_uppercase())
    }

    /// Synthetic tower callsign for an airport, e.g. `KLBB` -> `KLBB_TWR`.
    pub fn tower_for_airport(airport_icao: &str) -> Self {
        Self::new(format!("{}_TWR", airport_icao))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Callsign {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Callsign {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Callsign> for String {
    fn from(value: Callsign) -> Self {
        value.0
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Radio frequency in Hz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency(pub u32);

impl Frequency {
    pub fn from_khz(khz: u32) -> Self {
        Self(khz.saturating_mul(1_000))
    }

    pub fn from_mhz(mhz: f64) -> Self {
        Self((mhz * 1_000_000.0).round().max(0.0) as u32)
    }

    pub fn hz(&self) -> u32 {
        self.0
    }

    pub fn mhz(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_set(&self) -> bool {
        self.0 > 0
    }

    /// True if both frequencies fall into the same channel for the given spacing.
    pub fn is_within_channel_spacing(&self, other: Frequency, spacing_hz: u32) -> bool {
        let diff = (self.0 as i64 - other.0 as i64).unsigned_abs();
        diff * 2 < spacing_hz as u64
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} MHz", self.mhz())
    }
}

/// Geodetic position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

impl GeoPosition {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self { lat, lon, altitude_m }
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &GeoPosition) -> f64 {
        haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }

    /// Initial bearing towards `other` in degrees, 0..360.
    pub fn bearing_to(&self, other: &GeoPosition) -> f64 {
        bearing_deg(self.lat, self.lon, other.lat, other.lon)
    }
}

/// A person behind a callsign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub callsign: Callsign,
    #[serde(default)]
    pub real_name: String,
    /// Network id, if known.
    #[serde(default)]
    pub id: String,
}

impl User {
    pub fn for_callsign(callsign: Callsign) -> Self {
        Self {
            callsign,
            ..Self::default()
        }
    }

    pub fn has_valid_real_name(&self) -> bool {
        !self.real_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceCapabilities {
    #[default]
    Unknown,
    Voice,
    VoiceReceivingOnly,
    TextOnly,
}

impl VoiceCapabilities {
    /// Derive voice capabilities from flight plan remarks (`/v/`, `/r/`, `/t/`).
    pub fn from_remarks(remarks: &str) -> Self {
        let remarks = remarks.to_lowercase();
        if remarks.contains("/v/") || remarks.contains("/voice/") {
            Self::Voice
        } else if remarks.contains("/t/") {
            Self::TextOnly
        } else if remarks.contains("/r/") {
            Self::VoiceReceivingOnly
        } else {
            Self::Unknown
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Capabilities a peer declares in its capability reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub atis_responses: bool,
    pub interim_positions: bool,
    pub model_description: bool,
    pub aircraft_config: bool,
}

impl Capabilities {
    pub const ACCEPTS_ATIS_RESPONSES: u32 = 1 << 0;
    pub const SUPPORTS_INTERIM_POSITIONS: u32 = 1 << 1;
    pub const SUPPORTS_MODEL_DESCRIPTIONS: u32 = 1 << 2;
    pub const SUPPORTS_AIRCRAFT_CONFIGS: u32 = 1 << 3;

    pub fn from_flags(flags: u32) -> Self {
        Self {
            atis_responses: flags & Self::ACCEPTS_ATIS_RESPONSES != 0,
            interim_positions: flags & Self::SUPPORTS_INTERIM_POSITIONS != 0,
            model_description: flags & Self::SUPPORTS_MODEL_DESCRIPTIONS != 0,
            aircraft_config: flags & Self::SUPPORTS_AIRCRAFT_CONFIGS != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    Unknown,
    /// Model string announced by the peer over the network.
    QueriedFromNetwork,
    /// Model chosen by the model-matching collaborator.
    Matched,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftModel {
    #[serde(default)]
    pub model_string: String,
    #[serde(default)]
    pub model_type: ModelType,
}

impl AircraftModel {
    pub fn has_model_string(&self) -> bool {
        !self.model_string.is_empty()
    }
}

/// Peer metadata for a callsign, independent of any aircraft or station entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub callsign: Callsign,
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub voice: VoiceCapabilities,
    #[serde(default)]
    pub model: AircraftModel,
}

impl Client {
    /// Minimal placeholder, filled in later by partial updates.
    pub fn placeholder(callsign: Callsign) -> Self {
        Self {
            user: User::for_callsign(callsign.clone()),
            callsign,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Atis,
    Metar,
}

/// ATIS or METAR text with its reception time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationMessage {
    pub kind: MessageKind,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InformationMessage {
    pub fn atis(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Atis,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn metar(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Metar,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One controller position, online or booked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtcStation {
    pub callsign: Callsign,
    #[serde(default)]
    pub controller: User,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub position: GeoPosition,
    /// Visible range in nautical miles
    #[serde(default)]
    pub range_nm: f64,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub atis: Option<InformationMessage>,
    #[serde(default)]
    pub metar: Option<InformationMessage>,
    #[serde(default)]
    pub voice_room_url: Option<String>,
    #[serde(default)]
    pub booked_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub booked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distance_to_own_m: Option<f64>,
    #[serde(default)]
    pub bearing_to_own_deg: Option<f64>,
}

impl AtcStation {
    pub fn new(callsign: Callsign) -> Self {
        Self {
            controller: User::for_callsign(callsign.clone()),
            callsign,
            ..Self::default()
        }
    }

    /// Recompute distance and bearing relative to the own aircraft.
    pub fn calculate_distance_and_bearing(&mut self, own_position: &GeoPosition) {
        self.distance_to_own_m = Some(own_position.distance_to(&self.position));
        self.bearing_to_own_deg = Some(own_position.bearing_to(&self.position));
    }

    /// Exchange data between an online station and its booking.
    ///
    /// The online station takes over the booking window, the booking is marked
    /// online, and controller names fill whichever side lacks one.
    /// Returns the number of changed fields across both stations.
    pub fn merge_with_booking(&mut self, booking: &mut AtcStation) -> usize {
        let mut changed = 0;
        if self.booked_from != booking.booked_from {
            self.booked_from = booking.booked_from;
            changed += 1;
        }
        if self.booked_until != booking.booked_until {
            self.booked_until = booking.booked_until;
            changed += 1;
        }
        if !booking.online {
            booking.online = true;
            changed += 1;
        }
        if !self.controller.has_valid_real_name() && booking.controller.has_valid_real_name() {
            self.controller.real_name = booking.controller.real_name.clone();
            changed += 1;
        } else if self.controller.has_valid_real_name() && !booking.controller.has_valid_real_name() {
            booking.controller.real_name = self.controller.real_name.clone();
            changed += 1;
        }
        if !booking.frequency.is_set() && self.frequency.is_set() {
            booking.frequency = self.frequency;
            changed += 1;
        }
        changed
    }
}

/// Flight plan as filed on the network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    #[serde(default)]
    pub callsign: Callsign,
    #[serde(default)]
    pub flight_rules: String,
    #[serde(default)]
    pub aircraft_type: String,
    #[serde(default)]
    pub departure: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub alternate: String,
    #[serde(default)]
    pub cruise_altitude: String,
    #[serde(default)]
    pub true_airspeed_kts: u32,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub remarks: String,
    /// When the plan was last sent or loaded from the network
    #[serde(default)]
    pub sent_or_loaded_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callsign_is_normalized() {
        assert_eq!(Callsign::new(" dlh123 "), Callsign::new("DLH123"));
        assert_eq!(Callsign::tower_for_airport("KLBB").as_str(), "KLBB_TWR");
    }

    #[test]
    fn channel_spacing_uses_half_width() {
        let station = Frequency::from_mhz(118.700);
        assert!(station.is_within_channel_spacing(Frequency::from_mhz(118.705), 25_000));
        assert!(!station.is_within_channel_spacing(Frequency::from_mhz(118.725), 25_000));
    }

    #[test]
    fn voice_capabilities_from_remarks() {
        assert_eq!(VoiceCapabilities::from_remarks("RMK/V/ TCAS"), VoiceCapabilities::Voice);
        assert_eq!(VoiceCapabilities::from_remarks("/t/"), VoiceCapabilities::TextOnly);
        assert_eq!(VoiceCapabilities::from_remarks("/R/"), VoiceCapabilities::VoiceReceivingOnly);
        assert_eq!(VoiceCapabilities::from_remarks(""), VoiceCapabilities::Unknown);
    }

    #[test]
    fn capability_flags_are_decoded() {
        let caps = Capabilities::from_flags(
            Capabilities::ACCEPTS_ATIS_RESPONSES | Capabilities::SUPPORTS_AIRCRAFT_CONFIGS,
        );
        assert!(caps.atis_responses);
        assert!(!caps.interim_positions);
        assert!(!caps.model_description);
        assert!(caps.aircraft_config);
    }

    #[test]
    fn merge_with_booking_updates_both_sides() {
        let now = Utc::now();
        let mut online = AtcStation::new(Callsign::new("EDDF_TWR"));
        online.frequency = Frequency::from_mhz(119.900);
        online.controller.real_name = "Jane Doe".to_string();

        let mut booking = AtcStation::new(Callsign::new("EDDF_TWR"));
        booking.booked_until = Some(now);

        let changed = online.merge_with_booking(&mut booking);
        assert!(changed > 0);
        assert_eq!(online.booked_until, Some(now));
        assert!(booking.online);
        assert_eq!(booking.controller.real_name, "Jane Doe");
        assert_eq!(booking.frequency, online.frequency);

        assert_eq!(online.merge_with_booking(&mut booking), 0);
    }
}
