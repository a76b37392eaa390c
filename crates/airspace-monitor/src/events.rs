//! Decoded inbound network events and outbound change notifications.

use airspace_core::{
    AircraftIcao, AircraftParts, AircraftSituation, AtcStation, Callsign, FlightPlan, Frequency, GeoPosition,
    RemoteAircraft, Transponder,
};
use serde::{Deserialize, Serialize};

/// One event as produced by the transport after decoding a packet, or by the
/// booking and data-file readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    AtcPositionUpdate {
        callsign: Callsign,
        frequency: Frequency,
        position: GeoPosition,
        #[serde(default)]
        range_nm: f64,
    },
    AtisReply {
        callsign: Callsign,
        message: String,
    },
    AtisVoiceRoomReply {
        callsign: Callsign,
        url: String,
    },
    AtisLogoffTimeReply {
        callsign: Callsign,
        /// `hhmm`, zulu
        zulu_time: String,
    },
    MetarReply {
        message: String,
    },
    FlightPlanReply {
        callsign: Callsign,
        flight_plan: FlightPlan,
    },
    RealNameReply {
        callsign: Callsign,
        real_name: String,
    },
    IcaoCodesReply {
        callsign: Callsign,
        icao: AircraftIcao,
    },
    PilotDisconnected {
        callsign: Callsign,
    },
    AtcDisconnected {
        callsign: Callsign,
    },
    AircraftPositionUpdate {
        callsign: Callsign,
        situation: AircraftSituation,
        #[serde(default)]
        transponder: Transponder,
    },
    FrequencyReply {
        callsign: Callsign,
        frequency: Frequency,
    },
    CapabilitiesReply {
        callsign: Callsign,
        flags: u32,
    },
    CustomPacket {
        callsign: Callsign,
        packet_id: String,
        #[serde(default)]
        data: Vec<String>,
    },
    ServerReply {
        callsign: Callsign,
        server: String,
    },
    AircraftConfigPacket {
        callsign: Callsign,
        config: serde_json::Value,
        #[serde(default)]
        is_full: bool,
    },
    BookingsRead {
        bookings: Vec<AtcStation>,
    },
    DataFileRead,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::AtcPositionUpdate { .. } => "atc_position_update",
            InboundEvent::AtisReply { .. } => "atis_reply",
            InboundEvent::AtisVoiceRoomReply { .. } => "atis_voice_room_reply",
            InboundEvent::AtisLogoffTimeReply { .. } => "atis_logoff_time_reply",
            InboundEvent::MetarReply { .. } => "metar_reply",
            InboundEvent::FlightPlanReply { .. } => "flight_plan_reply",
            InboundEvent::RealNameReply { .. } => "real_name_reply",
            InboundEvent::IcaoCodesReply { .. } => "icao_codes_reply",
            InboundEvent::PilotDisconnected { .. } => "pilot_disconnected",
            InboundEvent::AtcDisconnected { .. } => "atc_disconnected",
            InboundEvent::AircraftPositionUpdate { .. } => "aircraft_position_update",
            InboundEvent::FrequencyReply { .. } => "frequency_reply",
            InboundEvent::CapabilitiesReply { .. } => "capabilities_reply",
            InboundEvent::CustomPacket { .. } => "custom_packet",
            InboundEvent::ServerReply { .. } => "server_reply",
            InboundEvent::AircraftConfigPacket { .. } => "aircraft_config_packet",
            InboundEvent::BookingsRead { .. } => "bookings_read",
            InboundEvent::DataFileRead => "data_file_read",
        }
    }
}

/// Change notifications for GUI and simulator collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum AirspaceNotification {
    AtcStationsOnlineChanged,
    AtcStationsBookedChanged,
    AtcStationConnectionStatusChanged { station: AtcStation, online: bool },
    AircraftInRangeChanged,
    AircraftAdded { aircraft: RemoteAircraft },
    AircraftRemoved { callsign: Callsign },
    RemoteSituationAdded { situation: AircraftSituation },
    RemotePartsAdded { callsign: Callsign, parts: AircraftParts },
    /// Aircraft plus client data, handed to model matching
    ReadyForModelMatching { aircraft: RemoteAircraft },
}
