//! Error type for inbound data that cannot be turned into domain values.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AirspaceError>;

#[derive(Error, Debug)]
pub enum AirspaceError {
    #[error("malformed METAR {0:?}")]
    MalformedMetar(String),

    #[error("malformed {packet_id} packet from {callsign}: {reason}")]
    MalformedCustomPacket {
        callsign: String,
        packet_id: String,
        reason: String,
    },

    #[error("unknown custom packet {packet_id} from {callsign}")]
    UnknownCustomPacket { callsign: String, packet_id: String },

    #[error("unparseable zulu time {0:?}")]
    InvalidZuluTime(String),

    #[error("invalid aircraft config: {0}")]
    InvalidAircraftConfig(String),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),
}
