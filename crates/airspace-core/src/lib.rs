pub mod aircraft;
pub mod error;
pub mod messages;
pub mod models;
pub mod parts;
pub mod patch;
pub mod settings;
pub mod spatial;

pub use aircraft::{
    AircraftIcao, AircraftLights, AircraftParts, AircraftSituation, ComSystem, EngineState,
    RemoteAircraft, Transponder, TransponderMode,
};
pub use error::{AirspaceError, Result};
pub use models::{
    AircraftModel, AtcStation, Callsign, Capabilities, Client, FlightPlan, Frequency, GeoPosition,
    InformationMessage, MessageKind, ModelType, User, VoiceCapabilities,
};
pub use patch::{AircraftPatch, ClientPatch, StationPatch};
pub use settings::MonitorSettings;
pub use spatial::haversine_distance;
