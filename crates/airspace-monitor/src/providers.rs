//! Read-only collaborators: the own aircraft and the bulk network data file.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use airspace_core::{
    AircraftIcao, AtcStation, Callsign, ComSystem, GeoPosition, RemoteAircraft, User, VoiceCapabilities,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComUnit {
    Com1,
    Com2,
}

/// Snapshot of the local user's aircraft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnAircraft {
    pub callsign: Callsign,
    pub pilot: User,
    pub position: Option<GeoPosition>,
    pub icao: AircraftIcao,
    pub model_string: String,
    pub com1: ComSystem,
    pub com2: ComSystem,
}

impl OwnAircraft {
    pub fn com(&self, unit: ComUnit) -> &ComSystem {
        match unit {
            ComUnit::Com1 => &self.com1,
            ComUnit::Com2 => &self.com2,
        }
    }
}

pub trait OwnAircraftProvider: Send + Sync {
    fn own_aircraft(&self) -> OwnAircraft;
}

/// Own aircraft held in memory, updated by whoever drives the simulator side.
#[derive(Debug, Default)]
pub struct StaticOwnAircraft {
    inner: RwLock<OwnAircraft>,
}

impl StaticOwnAircraft {
    pub fn new(own: OwnAircraft) -> Self {
        Self { inner: RwLock::new(own) }
    }

    pub fn update(&self, apply: impl FnOnce(&mut OwnAircraft)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut guard);
    }
}

impl OwnAircraftProvider for StaticOwnAircraft {
    fn own_aircraft(&self) -> OwnAircraft {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Lookups against the periodically downloaded network data file.
pub trait DataFileReader: Send + Sync {
    fn voice_capabilities_for(&self, callsign: &Callsign) -> VoiceCapabilities;

    /// ICAO data announced for a callsign, if it carries an aircraft designator.
    fn icao_for(&self, callsign: &Callsign) -> Option<AircraftIcao>;

    fn users_for(&self, callsign: &Callsign) -> Vec<User>;

    /// Prefill a station from its data-file entry; returns the number of filled fields.
    fn update_station(&self, station: &mut AtcStation) -> usize;

    /// Prefill a new aircraft from its data-file entry; returns the number of filled fields.
    fn update_aircraft(&self, aircraft: &mut RemoteAircraft) -> usize;

    /// Pick up a newer copy of the file. Fixed readers have nothing to do.
    fn refresh(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A pilot or controller entry of the data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFileClient {
    pub callsign: Callsign,
    pub real_name: String,
    pub id: String,
    pub icao: Option<AircraftIcao>,
    /// Flight plan remarks, carrying the voice flags
    pub remarks: String,
    pub voice: Option<VoiceCapabilities>,
}

impl DataFileClient {
    pub fn voice_capabilities(&self) -> VoiceCapabilities {
        self.voice
            .unwrap_or_else(|| VoiceCapabilities::from_remarks(&self.remarks))
    }

    pub fn user(&self) -> User {
        User {
            callsign: self.callsign.clone(),
            real_name: self.real_name.clone(),
            id: self.id.clone(),
        }
    }
}

/// Parsed data file, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFileSnapshot {
    pub stations: Vec<AtcStation>,
    pub clients: Vec<DataFileClient>,
}

impl DataFileSnapshot {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Failed to parse data file {}", path.display()))
    }

    fn client(&self, callsign: &Callsign) -> Option<&DataFileClient> {
        self.clients.iter().find(|client| &client.callsign == callsign)
    }

    fn station(&self, callsign: &Callsign) -> Option<&AtcStation> {
        self.stations.iter().find(|station| &station.callsign == callsign)
    }
}

impl DataFileReader for DataFileSnapshot {
    fn voice_capabilities_for(&self, callsign: &Callsign) -> VoiceCapabilities {
        self.client(callsign)
            .map(DataFileClient::voice_capabilities)
            .unwrap_or_default()
    }

    fn icao_for(&self, callsign: &Callsign) -> Option<AircraftIcao> {
        self.client(callsign)
            .and_then(|client| client.icao.clone())
            .filter(AircraftIcao::has_aircraft_designator)
    }

    fn users_for(&self, callsign: &Callsign) -> Vec<User> {
        self.clients
            .iter()
            .filter(|client| &client.callsign == callsign)
            .map(DataFileClient::user)
            .chain(
                self.stations
                    .iter()
                    .filter(|station| &station.callsign == callsign)
                    .map(|station| station.controller.clone()),
            )
            .collect()
    }

    fn update_station(&self, station: &mut AtcStation) -> usize {
        let Some(known) = self.station(&station.callsign) else {
            return 0;
        };
        let mut filled = 0;
        if !station.controller.has_valid_real_name() && known.controller.has_valid_real_name() {
            station.controller.real_name = known.controller.real_name.clone();
            filled += 1;
        }
        if station.controller.id.is_empty() && !known.controller.id.is_empty() {
            station.controller.id = known.controller.id.clone();
            filled += 1;
        }
        if !station.frequency.is_set() && known.frequency.is_set() {
            station.frequency = known.frequency;
            filled += 1;
        }
        if station.voice_room_url.is_none() && known.voice_room_url.is_some() {
            station.voice_room_url = known.voice_room_url.clone();
            filled += 1;
        }
        if station.atis.is_none() && known.atis.is_some() {
            station.atis = known.atis.clone();
            filled += 1;
        }
        filled
    }

    fn update_aircraft(&self, aircraft: &mut RemoteAircraft) -> usize {
        let Some(known) = self.client(&aircraft.callsign) else {
            return 0;
        };
        let mut filled = 0;
        if !aircraft.pilot.has_valid_real_name() && !known.real_name.trim().is_empty() {
            aircraft.pilot.real_name = known.real_name.clone();
            filled += 1;
        }
        if aircraft.pilot.id.is_empty() && !known.id.is_empty() {
            aircraft.pilot.id = known.id.clone();
            filled += 1;
        }
        if !aircraft.icao.has_aircraft_designator() {
            if let Some(icao) = known.icao.as_ref().filter(|icao| icao.has_aircraft_designator()) {
                aircraft.icao = icao.clone();
                filled += 1;
            }
        }
        filled
    }
}

/// Data file on disk, re-read on every [`DataFileReader::refresh`].
///
/// A failed reload keeps the previous snapshot.
#[derive(Debug)]
pub struct ReloadableDataFile {
    path: PathBuf,
    snapshot: RwLock<DataFileSnapshot>,
}

impl ReloadableDataFile {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let snapshot = DataFileSnapshot::load(&path)?;
        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
    }

    fn current(&self) -> RwLockReadGuard<'_, DataFileSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DataFileReader for ReloadableDataFile {
    fn voice_capabilities_for(&self, callsign: &Callsign) -> VoiceCapabilities {
        self.current().voice_capabilities_for(callsign)
    }

    fn icao_for(&self, callsign: &Callsign) -> Option<AircraftIcao> {
        self.current().icao_for(callsign)
    }

    fn users_for(&self, callsign: &Callsign) -> Vec<User> {
        self.current().users_for(callsign)
    }

    fn update_station(&self, station: &mut AtcStation) -> usize {
        self.current().update_station(station)
    }

    fn update_aircraft(&self, aircraft: &mut RemoteAircraft) -> usize {
        self.current().update_aircraft(aircraft)
    }

    fn refresh(&self) -> anyhow::Result<()> {
        let fresh = DataFileSnapshot::load(&self.path)?;
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airspace_core::Frequency;

    fn snapshot() -> DataFileSnapshot {
        DataFileSnapshot::from_json(
            r#"{
                "stations": [
                    { "callsign": "EDDF_TWR", "controller": { "callsign": "EDDF_TWR", "real_name": "Jane Doe", "id": "1000001" },
                      "frequency": 119900000, "voice_room_url": "voice.example.net/eddf_twr" }
                ],
                "clients": [
                    { "callsign": "DLH123", "real_name": "Max Muster", "id": "1234567",
                      "icao": { "aircraft_designator": "A321", "combined_type": "L2J", "airline_designator": "DLH" },
                      "remarks": "PBN/A1B1 /v/" },
                    { "callsign": "N123", "real_name": "Pat Pilot", "voice": "text_only" }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn voice_capabilities_come_from_remarks_or_explicit_value() {
        let data = snapshot();
        assert_eq!(data.voice_capabilities_for(&Callsign::new("DLH123")), VoiceCapabilities::Voice);
        assert_eq!(data.voice_capabilities_for(&Callsign::new("N123")), VoiceCapabilities::TextOnly);
        assert_eq!(data.voice_capabilities_for(&Callsign::new("XXX")), VoiceCapabilities::Unknown);
    }

    #[test]
    fn icao_without_designator_is_not_returned() {
        let data = snapshot();
        assert_eq!(
            data.icao_for(&Callsign::new("DLH123")).map(|icao| icao.aircraft_designator),
            Some("A321".to_string())
        );
        assert!(data.icao_for(&Callsign::new("N123")).is_none());
    }

    #[test]
    fn station_prefill_only_fills_gaps() {
        let data = snapshot();
        let mut station = AtcStation::new(Callsign::new("eddf_twr"));
        station.frequency = Frequency::from_mhz(118.5);

        assert_eq!(data.update_station(&mut station), 3);
        assert_eq!(station.controller.real_name, "Jane Doe");
        assert_eq!(station.frequency, Frequency::from_mhz(118.5));
        assert_eq!(station.voice_room_url.as_deref(), Some("voice.example.net/eddf_twr"));
        assert_eq!(data.update_station(&mut station), 0);
    }

    #[test]
    fn aircraft_prefill_sets_pilot_and_icao() {
        let data = snapshot();
        let mut aircraft = RemoteAircraft::new(Callsign::new("DLH123"));
        assert_eq!(data.update_aircraft(&mut aircraft), 3);
        assert_eq!(aircraft.pilot.real_name, "Max Muster");
        assert!(aircraft.has_valid_aircraft_designator());
    }

    #[test]
    fn reloadable_data_file_picks_up_changes() {
        let path = std::env::temp_dir().join(format!("airspace-datafile-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "clients": [ { "callsign": "N123", "voice": "text_only" } ] }"#).unwrap();
        let data = ReloadableDataFile::open(&path).unwrap();
        let callsign = Callsign::new("N123");
        assert_eq!(data.voice_capabilities_for(&callsign), VoiceCapabilities::TextOnly);

        std::fs::write(&path, r#"{ "clients": [ { "callsign": "N123", "voice": "voice" } ] }"#).unwrap();
        assert_eq!(data.voice_capabilities_for(&callsign), VoiceCapabilities::TextOnly);
        data.refresh().unwrap();
        assert_eq!(data.voice_capabilities_for(&callsign), VoiceCapabilities::Voice);

        std::fs::write(&path, "not json").unwrap();
        assert!(data.refresh().is_err());
        assert_eq!(data.voice_capabilities_for(&callsign), VoiceCapabilities::Voice);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn own_aircraft_updates_are_visible() {
        let own = StaticOwnAircraft::new(OwnAircraft {
            callsign: Callsign::new("SWR8"),
            ..OwnAircraft::default()
        });
        own.update(|own| own.com1.active = Frequency::from_mhz(121.5));
        let snapshot = own.own_aircraft();
        assert_eq!(snapshot.com(ComUnit::Com1).active, Frequency::from_mhz(121.5));
        assert_eq!(snapshot.callsign, Callsign::new("SWR8"));
    }
}
