//! Authoritative in-memory airspace collections.
//!
//! Owned by a single monitor task, so plain maps are used for the entity
//! collections; only the caches are shared (see [`AirspaceCaches`]).

use std::collections::{BTreeMap, HashMap, VecDeque};

use airspace_core::{
    AircraftParts, AircraftPatch, AircraftSituation, AtcStation, Callsign, Client, ClientPatch, Frequency,
    GeoPosition, MonitorSettings, RemoteAircraft, StationPatch, Transponder, User,
};
use chrono::{Duration as ChronoDuration, Utc};

use crate::cache::AirspaceCaches;

/// Outcome of an insert-or-merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    /// Existing entry merged; number of fields that actually changed
    Updated(usize),
}

impl Upsert {
    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created)
    }

    /// True if the call created the entry or changed at least one field.
    pub fn has_changes(&self) -> bool {
        !matches!(self, Upsert::Updated(0))
    }
}

pub struct AirspaceStore {
    online: BTreeMap<Callsign, AtcStation>,
    booked: BTreeMap<Callsign, AtcStation>,
    aircraft: BTreeMap<Callsign, RemoteAircraft>,
    /// Newest first
    situations: HashMap<Callsign, VecDeque<AircraftSituation>>,
    /// Newest first
    parts: HashMap<Callsign, VecDeque<AircraftParts>>,
    clients: BTreeMap<Callsign, Client>,
    caches: AirspaceCaches,
    situation_retention: ChronoDuration,
    parts_retention: ChronoDuration,
}

impl AirspaceStore {
    pub fn new(settings: &MonitorSettings, caches: AirspaceCaches) -> Self {
        Self {
            online: BTreeMap::new(),
            booked: BTreeMap::new(),
            aircraft: BTreeMap::new(),
            situations: HashMap::new(),
            parts: HashMap::new(),
            clients: BTreeMap::new(),
            caches,
            situation_retention: ChronoDuration::milliseconds(settings.situation_retention_ms as i64),
            parts_retention: ChronoDuration::milliseconds(settings.parts_retention_ms as i64),
        }
    }

    pub fn caches(&self) -> &AirspaceCaches {
        &self.caches
    }

    // ---- ATC stations ----

    /// Insert a station, or merge frequency, position and range into the existing one.
    pub fn upsert_online_station(&mut self, station: AtcStation) -> Upsert {
        match self.online.get_mut(&station.callsign) {
            Some(existing) => {
                let patch = StationPatch {
                    frequency: Some(station.frequency),
                    position: Some(station.position),
                    range_nm: Some(station.range_nm),
                    ..StationPatch::default()
                };
                Upsert::Updated(patch.apply(existing))
            }
            None => {
                self.online.insert(station.callsign.clone(), station);
                Upsert::Created
            }
        }
    }

    pub fn remove_online_station(&mut self, callsign: &Callsign) -> Option<AtcStation> {
        self.online.remove(callsign)
    }

    pub fn online_station(&self, callsign: &Callsign) -> Option<&AtcStation> {
        self.online.get(callsign)
    }

    pub fn online_station_mut(&mut self, callsign: &Callsign) -> Option<&mut AtcStation> {
        self.online.get_mut(callsign)
    }

    pub fn booked_station_mut(&mut self, callsign: &Callsign) -> Option<&mut AtcStation> {
        self.booked.get_mut(callsign)
    }

    pub fn is_station_online(&self, callsign: &Callsign) -> bool {
        self.online.contains_key(callsign)
    }

    /// Snapshot of the online stations, with distance and bearing relative to `own_position`.
    pub fn online_stations(&self, own_position: Option<&GeoPosition>) -> Vec<AtcStation> {
        with_distances(self.online.values(), own_position)
    }

    pub fn booked_stations(&self, own_position: Option<&GeoPosition>) -> Vec<AtcStation> {
        with_distances(self.booked.values(), own_position)
    }

    pub fn apply_station_patch(&mut self, callsign: &Callsign, patch: &StationPatch) -> usize {
        self.online.get_mut(callsign).map(|station| patch.apply(station)).unwrap_or(0)
    }

    pub fn apply_booked_patch(&mut self, callsign: &Callsign, patch: &StationPatch) -> usize {
        self.booked.get_mut(callsign).map(|station| patch.apply(station)).unwrap_or(0)
    }

    /// Replace the booked list wholesale.
    pub fn replace_booked(&mut self, bookings: Vec<AtcStation>) {
        self.booked = bookings
            .into_iter()
            .map(|booking| (booking.callsign.clone(), booking))
            .collect();
    }

    /// Online stations whose frequency matches `frequency` within half the
    /// channel spacing, nearest first.
    pub fn find_stations_tuned_to(
        &self,
        frequency: Frequency,
        channel_spacing_hz: u32,
        own_position: Option<&GeoPosition>,
    ) -> Vec<AtcStation> {
        if !frequency.is_set() {
            return Vec::new();
        }
        let tuned = self
            .online
            .values()
            .filter(|station| station.frequency.is_within_channel_spacing(frequency, channel_spacing_hz));
        let mut stations = with_distances(tuned, own_position);
        stations.sort_by(|a, b| {
            let a = a.distance_to_own_m.unwrap_or(f64::MAX);
            let b = b.distance_to_own_m.unwrap_or(f64::MAX);
            a.total_cmp(&b)
        });
        stations
    }

    // ---- aircraft ----

    /// Insert a new aircraft (pre-filled from the ICAO cache, which is consumed,
    /// and any known client) or merge situation, transponder and distance into
    /// the existing one.
    pub fn upsert_aircraft(
        &mut self,
        situation: AircraftSituation,
        transponder: Transponder,
        own_position: Option<&GeoPosition>,
    ) -> Upsert {
        let callsign = situation.callsign.clone();
        let distance = own_position.map(|own| own.distance_to(&situation.position));

        if let Some(existing) = self.aircraft.get_mut(&callsign) {
            let patch = AircraftPatch {
                situation: Some(situation),
                transponder: Some(transponder),
                distance_to_own_m: distance,
                ..AircraftPatch::default()
            };
            return Upsert::Updated(patch.apply(existing));
        }

        let mut aircraft = RemoteAircraft::new(callsign.clone());
        aircraft.situation = Some(situation);
        aircraft.transponder = transponder;
        aircraft.distance_to_own_m = distance;
        if let Some(icao) = self.caches.icao.take(&callsign) {
            aircraft.icao = icao;
        }
        if let Some(client) = self.clients.get(&callsign) {
            aircraft.set_client(client.clone());
        }
        self.aircraft.insert(callsign, aircraft);
        Upsert::Created
    }

    /// Remove an aircraft with its histories and cached ICAO/flight plan data.
    pub fn remove_aircraft(&mut self, callsign: &Callsign) -> bool {
        let existed = self.aircraft.remove(callsign).is_some();
        self.situations.remove(callsign);
        self.parts.remove(callsign);
        self.caches.invalidate_aircraft(callsign);
        existed
    }

    pub fn aircraft(&self, callsign: &Callsign) -> Option<&RemoteAircraft> {
        self.aircraft.get(callsign)
    }

    pub fn aircraft_mut(&mut self, callsign: &Callsign) -> Option<&mut RemoteAircraft> {
        self.aircraft.get_mut(callsign)
    }

    pub fn contains_aircraft(&self, callsign: &Callsign) -> bool {
        self.aircraft.contains_key(callsign)
    }

    pub fn aircraft_in_range(&self) -> Vec<RemoteAircraft> {
        self.aircraft.values().cloned().collect()
    }

    pub fn aircraft_callsigns(&self) -> Vec<Callsign> {
        self.aircraft.keys().cloned().collect()
    }

    pub fn apply_aircraft_patch(&mut self, callsign: &Callsign, patch: &AircraftPatch) -> usize {
        self.aircraft.get_mut(callsign).map(|aircraft| patch.apply(aircraft)).unwrap_or(0)
    }

    pub fn insert_situation(&mut self, situation: AircraftSituation) {
        let cutoff = Utc::now() - self.situation_retention;
        let history = self.situations.entry(situation.callsign.clone()).or_default();
        history.push_front(situation);
        history.retain(|s| s.timestamp >= cutoff);
    }

    pub fn situations(&self, callsign: &Callsign) -> Vec<AircraftSituation> {
        self.situations
            .get(callsign)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Store a timestamped parts snapshot; snapshots without a timestamp are stamped now.
    pub fn insert_parts(&mut self, mut parts: AircraftParts) {
        let now = Utc::now();
        let cutoff = now - self.parts_retention;
        parts.timestamp.get_or_insert(now);
        let history = self.parts.entry(parts.callsign.clone()).or_default();
        history.push_front(parts);
        history.retain(|p| p.timestamp.map(|ts| ts >= cutoff).unwrap_or(false));
    }

    pub fn parts_history(&self, callsign: &Callsign) -> Vec<AircraftParts> {
        self.parts
            .get(callsign)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest_parts(&self, callsign: &Callsign) -> Option<&AircraftParts> {
        self.parts.get(callsign).and_then(|history| history.front())
    }

    // ---- clients ----

    /// Patch a client; with `create_placeholder` a missing client is created first.
    pub fn apply_client_patch(&mut self, callsign: &Callsign, patch: &ClientPatch, create_placeholder: bool) -> usize {
        if !self.clients.contains_key(callsign) {
            if !create_placeholder {
                return 0;
            }
            self.clients.insert(callsign.clone(), Client::placeholder(callsign.clone()));
        }
        self.clients.get_mut(callsign).map(|client| patch.apply(client)).unwrap_or(0)
    }

    /// Create a placeholder client unless one exists; true if created.
    pub fn ensure_client(&mut self, callsign: &Callsign) -> bool {
        if self.clients.contains_key(callsign) {
            return false;
        }
        self.clients.insert(callsign.clone(), Client::placeholder(callsign.clone()));
        true
    }

    pub fn client(&self, callsign: &Callsign) -> Option<&Client> {
        self.clients.get(callsign)
    }

    pub fn clients(&self) -> Vec<Client> {
        self.clients.values().cloned().collect()
    }

    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.values_mut()
    }

    pub fn remove_client(&mut self, callsign: &Callsign) -> bool {
        self.clients.remove(callsign).is_some()
    }

    /// One client per callsign; unknown callsigns yield a bare placeholder.
    pub fn clients_for_callsigns(&self, callsigns: &[Callsign]) -> Vec<Client> {
        callsigns
            .iter()
            .map(|callsign| {
                self.clients
                    .get(callsign)
                    .cloned()
                    .unwrap_or_else(|| Client::placeholder(callsign.clone()))
            })
            .collect()
    }

    // ---- users ----

    /// Every controller and pilot currently known.
    pub fn users(&self) -> Vec<User> {
        self.online
            .values()
            .map(|station| station.controller.clone())
            .chain(self.aircraft.values().map(|aircraft| aircraft.pilot.clone()))
            .collect()
    }

    /// The pilot or controller behind a callsign in range.
    pub fn user_for(&self, callsign: &Callsign) -> Option<User> {
        self.aircraft
            .get(callsign)
            .map(|aircraft| aircraft.pilot.clone())
            .or_else(|| self.online.get(callsign).map(|station| station.controller.clone()))
    }

    /// Drop every collection and cache.
    pub fn clear(&mut self) {
        self.online.clear();
        self.booked.clear();
        self.aircraft.clear();
        self.situations.clear();
        self.parts.clear();
        self.clients.clear();
        self.caches.clear();
    }
}

fn with_distances<'a>(
    stations: impl Iterator<Item = &'a AtcStation>,
    own_position: Option<&GeoPosition>,
) -> Vec<AtcStation> {
    stations
        .map(|station| {
            let mut station = station.clone();
            if let Some(own) = own_position {
                station.calculate_distance_and_bearing(own);
            }
            station
        })
        .collect()
}
