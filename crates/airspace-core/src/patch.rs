//! Typed partial updates.
//!
//! Each event handler only knows one or two fields of an entity. A patch
//! carries exactly those fields; `apply` writes the ones that differ and
//! reports how many actually changed, so callers can skip notifications
//! for no-op writes.

use chrono::{DateTime, Utc};

use crate::aircraft::{AircraftIcao, AircraftParts, AircraftSituation, RemoteAircraft, Transponder};
use crate::models::{
    AircraftModel, AtcStation, Capabilities, Client, Frequency, GeoPosition, InformationMessage,
    VoiceCapabilities,
};

fn assign<T: PartialEq + Clone>(slot: &mut T, value: &Option<T>) -> usize {
    match value {
        Some(value) if slot != value => {
            *slot = value.clone();
            1
        }
        _ => 0,
    }
}

fn assign_opt<T: PartialEq + Clone>(slot: &mut Option<T>, value: &Option<T>) -> usize {
    match value {
        Some(value) if slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            1
        }
        _ => 0,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationPatch {
    pub frequency: Option<Frequency>,
    pub position: Option<GeoPosition>,
    pub range_nm: Option<f64>,
    pub online: Option<bool>,
    pub controller_real_name: Option<String>,
    pub atis: Option<InformationMessage>,
    pub metar: Option<InformationMessage>,
    pub voice_room_url: Option<String>,
    pub booked_until: Option<DateTime<Utc>>,
}

impl StationPatch {
    pub fn apply(&self, station: &mut AtcStation) -> usize {
        assign(&mut station.frequency, &self.frequency)
            + assign(&mut station.position, &self.position)
            + assign(&mut station.range_nm, &self.range_nm)
            + assign(&mut station.online, &self.online)
            + assign(&mut station.controller.real_name, &self.controller_real_name)
            + assign_opt(&mut station.atis, &self.atis)
            + assign_opt(&mut station.metar, &self.metar)
            + assign_opt(&mut station.voice_room_url, &self.voice_room_url)
            + assign_opt(&mut station.booked_until, &self.booked_until)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientPatch {
    pub real_name: Option<String>,
    pub server: Option<String>,
    pub capabilities: Option<Capabilities>,
    pub voice: Option<VoiceCapabilities>,
    pub model: Option<AircraftModel>,
}

impl ClientPatch {
    pub fn apply(&self, client: &mut Client) -> usize {
        assign(&mut client.user.real_name, &self.real_name)
            + assign(&mut client.server, &self.server)
            + assign(&mut client.capabilities, &self.capabilities)
            + assign(&mut client.voice, &self.voice)
            + assign(&mut client.model, &self.model)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftPatch {
    pub situation: Option<AircraftSituation>,
    pub transponder: Option<Transponder>,
    pub distance_to_own_m: Option<f64>,
    pub icao: Option<AircraftIcao>,
    pub com1_active: Option<Frequency>,
    pub pilot_real_name: Option<String>,
    pub parts: Option<AircraftParts>,
    pub parts_synchronized: Option<bool>,
    pub enabled: Option<bool>,
    pub model: Option<AircraftModel>,
    /// Applied to the aircraft's nested client
    pub client: Option<ClientPatch>,
}

impl AircraftPatch {
    pub fn apply(&self, aircraft: &mut RemoteAircraft) -> usize {
        let mut changed = assign_opt(&mut aircraft.situation, &self.situation)
            + assign(&mut aircraft.transponder, &self.transponder)
            + assign_opt(&mut aircraft.distance_to_own_m, &self.distance_to_own_m)
            + assign(&mut aircraft.icao, &self.icao)
            + assign(&mut aircraft.com1.active, &self.com1_active)
            + assign(&mut aircraft.pilot.real_name, &self.pilot_real_name)
            + assign_opt(&mut aircraft.parts, &self.parts)
            + assign(&mut aircraft.parts_synchronized, &self.parts_synchronized)
            + assign(&mut aircraft.enabled, &self.enabled)
            + assign(&mut aircraft.model, &self.model);
        if let Some(client) = &self.client {
            changed += client.apply(&mut aircraft.client);
        }
        changed
    }

    pub fn for_client(client: ClientPatch) -> Self {
        Self {
            client: Some(client),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Callsign;

    #[test]
    fn station_patch_reports_only_real_changes() {
        let mut station = AtcStation::new(Callsign::new("EDDM_GND"));
        let patch = StationPatch {
            frequency: Some(Frequency::from_mhz(121.775)),
            range_nm: Some(20.0),
            ..StationPatch::default()
        };
        assert_eq!(patch.apply(&mut station), 2);
        assert_eq!(patch.apply(&mut station), 0);
        assert_eq!(station.frequency, Frequency::from_mhz(121.775));
    }

    #[test]
    fn aircraft_patch_reaches_nested_client() {
        let mut aircraft = RemoteAircraft::new(Callsign::new("DLH123"));
        let patch = AircraftPatch::for_client(ClientPatch {
            server: Some("GERMANY".to_string()),
            ..ClientPatch::default()
        });
        assert_eq!(patch.apply(&mut aircraft), 1);
        assert_eq!(aircraft.client.server, "GERMANY");
    }
}
