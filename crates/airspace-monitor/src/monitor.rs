//! Airspace monitor: turns decoded network events into airspace state.
//!
//! The monitor owns the store, the caches and both watchdogs. It mutates
//! only through `&mut self` and is meant to live inside a single task (see
//! [`crate::loops::monitor_loop`]); timers are driven by calling
//! [`AirspaceMonitor::on_tick`] and the periodic request methods from there.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use airspace_core::messages::{self, FsinnKind, FSINN_REPLY_ID, FSINN_REQUEST_ID};
use airspace_core::spatial::meters_to_nm;
use airspace_core::{
    AircraftIcao, AircraftModel, AircraftParts, AircraftPatch, AircraftSituation, AtcStation, Callsign,
    Capabilities, Client, ClientPatch, FlightPlan, Frequency, GeoPosition, InformationMessage, ModelType,
    MonitorSettings, RemoteAircraft, StationPatch, Transponder, User, VoiceCapabilities,
};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::cache::AirspaceCaches;
use crate::commands::NetworkCommands;
use crate::events::{AirspaceNotification, InboundEvent};
use crate::providers::{ComUnit, DataFileReader, OwnAircraftProvider};
use crate::state::{AirspaceStore, Upsert};
use crate::watchdog::Watchdog;

const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct PendingModelMatching {
    trial: u32,
    due: Instant,
}

pub struct AirspaceMonitor {
    settings: MonitorSettings,
    store: AirspaceStore,
    atc_watchdog: Watchdog,
    aircraft_watchdog: Watchdog,
    network: Arc<dyn NetworkCommands>,
    own_aircraft: Arc<dyn OwnAircraftProvider>,
    data_file: Arc<dyn DataFileReader>,
    notifications: broadcast::Sender<AirspaceNotification>,
    pending_model_matching: HashMap<Callsign, PendingModelMatching>,
    shutting_down: bool,
}

impl AirspaceMonitor {
    pub fn new(
        settings: MonitorSettings,
        network: Arc<dyn NetworkCommands>,
        own_aircraft: Arc<dyn OwnAircraftProvider>,
        data_file: Arc<dyn DataFileReader>,
    ) -> Self {
        let caches = AirspaceCaches::new(&settings);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            store: AirspaceStore::new(&settings, caches),
            atc_watchdog: Watchdog::new("atc", settings.atc_watchdog_timeout()),
            aircraft_watchdog: Watchdog::new("aircraft", settings.aircraft_watchdog_timeout()),
            settings,
            network,
            own_aircraft,
            data_file,
            notifications,
            pending_model_matching: HashMap::new(),
            shutting_down: false,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AirspaceNotification> {
        self.notifications.subscribe()
    }

    pub(crate) fn notification_sender(&self) -> broadcast::Sender<AirspaceNotification> {
        self.notifications.clone()
    }

    /// Shared handle to the entity caches.
    pub fn caches(&self) -> AirspaceCaches {
        self.store.caches().clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    fn notify(&self, notification: AirspaceNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn own_position(&self) -> Option<GeoPosition> {
        self.own_aircraft.own_aircraft().position
    }

    /// Voice capabilities from the data file, unless unknown there.
    fn known_voice_capabilities(&self, callsign: &Callsign) -> Option<VoiceCapabilities> {
        Some(self.data_file.voice_capabilities_for(callsign)).filter(|voice| !voice.is_unknown())
    }

    fn station_snapshot(&self, mut station: AtcStation) -> AtcStation {
        if let Some(own) = self.own_position() {
            station.calculate_distance_and_bearing(&own);
        }
        station
    }

    pub fn handle_event(&mut self, event: InboundEvent) {
        if self.shutting_down {
            tracing::debug!("Ignoring {} after shutdown", event.kind());
            return;
        }
        match event {
            InboundEvent::AtcPositionUpdate {
                callsign,
                frequency,
                position,
                range_nm,
            } => self.on_atc_position_update(&callsign, frequency, position, range_nm),
            InboundEvent::AtisReply { callsign, message } => self.on_atis_reply(&callsign, &message),
            InboundEvent::AtisVoiceRoomReply { callsign, url } => self.on_atis_voice_room_reply(&callsign, &url),
            InboundEvent::AtisLogoffTimeReply { callsign, zulu_time } => {
                self.on_atis_logoff_time_reply(&callsign, &zulu_time)
            }
            InboundEvent::MetarReply { message } => self.on_metar_reply(&message),
            InboundEvent::FlightPlanReply { callsign, flight_plan } => self.on_flight_plan_reply(&callsign, flight_plan),
            InboundEvent::RealNameReply { callsign, real_name } => self.on_real_name_reply(&callsign, &real_name),
            InboundEvent::IcaoCodesReply { callsign, icao } => self.on_icao_codes_reply(&callsign, icao),
            InboundEvent::PilotDisconnected { callsign } => self.on_pilot_disconnected(&callsign),
            InboundEvent::AtcDisconnected { callsign } => self.on_atc_disconnected(&callsign),
            InboundEvent::AircraftPositionUpdate {
                callsign,
                situation,
                transponder,
            } => self.on_aircraft_position_update(&callsign, situation, transponder),
            InboundEvent::FrequencyReply { callsign, frequency } => self.on_frequency_reply(&callsign, frequency),
            InboundEvent::CapabilitiesReply { callsign, flags } => self.on_capabilities_reply(&callsign, flags),
            InboundEvent::CustomPacket {
                callsign,
                packet_id,
                data,
            } => self.on_custom_packet(&callsign, &packet_id, &data),
            InboundEvent::ServerReply { callsign, server } => self.on_server_reply(&callsign, &server),
            InboundEvent::AircraftConfigPacket {
                callsign,
                config,
                is_full,
            } => self.on_aircraft_config_packet(&callsign, &config, is_full),
            InboundEvent::BookingsRead { bookings } => self.on_bookings_read(bookings),
            InboundEvent::DataFileRead => self.on_data_file_read(),
        }
    }

    // ---- ATC ----

    pub fn on_atc_position_update(
        &mut self,
        callsign: &Callsign,
        frequency: Frequency,
        position: GeoPosition,
        range_nm: f64,
    ) {
        if callsign.is_empty() {
            return;
        }

        let mut station = AtcStation::new(callsign.clone());
        station.frequency = frequency;
        station.position = position;
        station.range_nm = range_nm;

        if self.store.is_station_online(callsign) {
            if self.store.upsert_online_station(station).has_changes() {
                self.notify(AirspaceNotification::AtcStationsOnlineChanged);
            }
            self.atc_watchdog.reset_callsign(callsign);
            return;
        }

        station.online = true;
        let mut station = self.station_snapshot(station);
        self.data_file.update_station(&mut station);
        let booked_changed = match self.store.booked_station_mut(callsign) {
            Some(booking) => station.merge_with_booking(booking),
            None => 0,
        };

        tracing::info!("ATC station {} online on {}", callsign, frequency);
        self.store.upsert_online_station(station);

        if self.network.is_connected() {
            self.network.send_real_name_query(callsign);
            // ATIS reply also carries voice room and logoff time
            self.network.send_atis_query(callsign);
            self.network.send_server_query(callsign);
        }

        self.atc_watchdog.add_callsign(callsign.clone());
        self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        if booked_changed > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }
    }

    /// Explicit disconnect or ATC watchdog timeout. Safe to call repeatedly.
    pub fn on_atc_disconnected(&mut self, callsign: &Callsign) {
        self.atc_watchdog.remove_callsign(callsign);
        self.store.remove_client(callsign);

        if let Some(removed) = self.store.remove_online_station(callsign) {
            tracing::info!("ATC station {} disconnected", callsign);
            let removed = self.station_snapshot(removed);
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
            self.notify(AirspaceNotification::AtcStationConnectionStatusChanged {
                station: removed,
                online: false,
            });
        }

        let offline = StationPatch {
            online: Some(false),
            ..StationPatch::default()
        };
        if self.store.apply_booked_patch(callsign, &offline) > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }
    }

    pub fn on_atis_reply(&mut self, callsign: &Callsign, message: &str) {
        if callsign.is_empty() {
            return;
        }
        let atis = InformationMessage::atis(message);
        let online_patch = StationPatch {
            atis: Some(atis.clone()),
            ..StationPatch::default()
        };
        let changed_online = self.store.apply_station_patch(callsign, &online_patch);

        // An ATIS means the station is online
        let booked_patch = StationPatch {
            atis: Some(atis),
            online: Some(true),
            ..StationPatch::default()
        };
        let changed_booked = self.store.apply_booked_patch(callsign, &booked_patch);

        if changed_online > 0 {
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        }
        if changed_booked > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }
    }

    pub fn on_atis_voice_room_reply(&mut self, callsign: &Callsign, url: &str) {
        let url = url.trim().to_string();
        let patch = StationPatch {
            voice_room_url: Some(url.clone()),
            ..StationPatch::default()
        };
        if self.store.apply_station_patch(callsign, &patch) == 0 {
            return;
        }

        if let Some(station) = self.store.online_station(callsign).cloned() {
            let station = self.station_snapshot(station);
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
            self.notify(AirspaceNotification::AtcStationConnectionStatusChanged { station, online: true });
        }

        let booked_patch = StationPatch {
            voice_room_url: Some(url),
            online: Some(true),
            ..StationPatch::default()
        };
        if self.store.apply_booked_patch(callsign, &booked_patch) > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }

        let voice = ClientPatch {
            voice: Some(VoiceCapabilities::Voice),
            ..ClientPatch::default()
        };
        self.store.apply_client_patch(callsign, &voice, false);
    }

    pub fn on_atis_logoff_time_reply(&mut self, callsign: &Callsign, zulu_time: &str) {
        let booked_until = match messages::parse_logoff_time(zulu_time, Utc::now()) {
            Ok(booked_until) => booked_until,
            Err(err) => {
                tracing::warn!("Dropping logoff time for {}: {}", callsign, err);
                return;
            }
        };
        let patch = StationPatch {
            booked_until: Some(booked_until),
            ..StationPatch::default()
        };
        if self.store.apply_station_patch(callsign, &patch) > 0 {
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        }
        if self.store.apply_booked_patch(callsign, &patch) > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }
    }

    pub fn on_metar_reply(&mut self, raw: &str) {
        let report = match messages::parse_metar(raw) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!("{}", err);
                return;
            }
        };

        let patch = StationPatch {
            metar: Some(report.message.clone()),
            ..StationPatch::default()
        };
        let changed_online = self.store.apply_station_patch(&report.tower_callsign, &patch);
        let changed_booked = self.store.apply_booked_patch(&report.tower_callsign, &patch);
        tracing::debug!("METAR for {} received", report.airport_icao);
        self.store.caches().metars.insert(report.airport_icao, report.message);

        if changed_online > 0 {
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        }
        if changed_booked > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }
    }

    pub fn on_flight_plan_reply(&mut self, callsign: &Callsign, mut flight_plan: FlightPlan) {
        if callsign.is_empty() {
            return;
        }
        flight_plan.callsign = callsign.clone();
        flight_plan.sent_or_loaded_at = Some(Utc::now());
        self.store.caches().flight_plans.insert(callsign.clone(), flight_plan);
    }

    // ---- peer data ----

    /// Patch the client (creating a placeholder first) and the aircraft's nested client.
    fn patch_client(&mut self, callsign: &Callsign, patch: ClientPatch) {
        self.store.apply_client_patch(callsign, &patch, true);
        let aircraft_patch = AircraftPatch::for_client(patch);
        if self.store.apply_aircraft_patch(callsign, &aircraft_patch) > 0 {
            self.notify(AirspaceNotification::AircraftInRangeChanged);
        }
    }

    pub fn on_real_name_reply(&mut self, callsign: &Callsign, real_name: &str) {
        let real_name = real_name.trim();
        if callsign.is_empty() || real_name.is_empty() {
            return;
        }

        let station_patch = StationPatch {
            controller_real_name: Some(real_name.to_string()),
            ..StationPatch::default()
        };
        if self.store.apply_station_patch(callsign, &station_patch) > 0 {
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        }
        if self.store.apply_booked_patch(callsign, &station_patch) > 0 {
            self.notify(AirspaceNotification::AtcStationsBookedChanged);
        }

        let client_patch = ClientPatch {
            real_name: Some(real_name.to_string()),
            voice: self.known_voice_capabilities(callsign),
            ..ClientPatch::default()
        };
        let aircraft_patch = AircraftPatch {
            pilot_real_name: Some(real_name.to_string()),
            client: Some(client_patch.clone()),
            ..AircraftPatch::default()
        };
        if self.store.apply_aircraft_patch(callsign, &aircraft_patch) > 0 {
            self.notify(AirspaceNotification::AircraftInRangeChanged);
        }
        self.store.apply_client_patch(callsign, &client_patch, true);
    }

    pub fn on_capabilities_reply(&mut self, callsign: &Callsign, flags: u32) {
        if callsign.is_empty() {
            return;
        }
        let capabilities = Capabilities::from_flags(flags);
        self.patch_client(
            callsign,
            ClientPatch {
                capabilities: Some(capabilities),
                voice: self.known_voice_capabilities(callsign),
                ..ClientPatch::default()
            },
        );

        if capabilities.aircraft_config && self.network.is_connected() {
            self.network.send_aircraft_config_query(callsign);
        }
    }

    pub fn on_server_reply(&mut self, callsign: &Callsign, server: &str) {
        let server = server.trim();
        if callsign.is_empty() || server.is_empty() {
            return;
        }
        self.patch_client(
            callsign,
            ClientPatch {
                server: Some(server.to_string()),
                ..ClientPatch::default()
            },
        );
    }

    pub fn on_custom_packet(&mut self, callsign: &Callsign, packet_id: &str, data: &[String]) {
        if callsign.is_empty() {
            return;
        }
        let packet = match messages::parse_custom_packet(callsign, packet_id, data) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                tracing::debug!("Ignoring custom packet {} from {}", packet_id, callsign);
                return;
            }
            Err(err) => {
                tracing::warn!("Dropping custom packet: {}", err);
                return;
            }
        };
        if packet.model_string.is_empty() {
            tracing::debug!("Custom packet {} from {} without model string", packet_id, callsign);
            return;
        }

        // May arrive before any other packet of that peer
        self.patch_client(
            callsign,
            ClientPatch {
                model: Some(AircraftModel {
                    model_string: packet.model_string.clone(),
                    model_type: ModelType::QueriedFromNetwork,
                }),
                ..ClientPatch::default()
            },
        );

        if packet.kind == FsinnKind::Request && self.network.is_connected() {
            self.send_fsinn_packet(callsign, FSINN_REPLY_ID);
        }

        if packet.icao.has_aircraft_designator() {
            if self.store.contains_aircraft(callsign) {
                self.on_icao_codes_reply(callsign, packet.icao);
            } else {
                self.store.caches().icao.insert(callsign.clone(), packet.icao);
            }
        }
    }

    fn send_fsinn_packet(&self, callsign: &Callsign, packet_id: &str) {
        let own = self.own_aircraft.own_aircraft();
        let model_string = if own.model_string.is_empty() {
            self.settings.application_name.clone()
        } else {
            own.model_string
        };
        self.network
            .send_custom_packet(callsign, packet_id, messages::fsinn_fields(&own.icao, &model_string));
    }

    pub fn on_icao_codes_reply(&mut self, callsign: &Callsign, icao: AircraftIcao) {
        if callsign.is_empty() {
            return;
        }
        let icao = if icao.has_aircraft_designator() {
            icao
        } else {
            tracing::warn!("Empty ICAO info for {}", callsign);
            match self.data_file.icao_for(callsign) {
                Some(icao) => icao,
                None => {
                    // Nothing better will arrive; let the retries degrade
                    if self.store.contains_aircraft(callsign)
                        && !self.pending_model_matching.contains_key(callsign)
                    {
                        self.schedule_model_matching_check(callsign, 1);
                    }
                    return;
                }
            }
        };

        if !self.store.contains_aircraft(callsign) {
            tracing::debug!("Caching ICAO codes for {} until the aircraft is in range", callsign);
            self.store.caches().icao.insert(callsign.clone(), icao);
            return;
        }

        let patch = AircraftPatch {
            icao: Some(icao),
            ..AircraftPatch::default()
        };
        if self.store.apply_aircraft_patch(callsign, &patch) > 0 {
            self.notify(AirspaceNotification::AircraftInRangeChanged);
            self.check_ready_for_model_matching(callsign, 1);
        }
    }

    // ---- aircraft ----

    pub fn on_aircraft_position_update(
        &mut self,
        callsign: &Callsign,
        mut situation: AircraftSituation,
        transponder: Transponder,
    ) {
        if callsign.is_empty() {
            return;
        }
        situation.callsign = callsign.clone();
        self.store.insert_situation(situation.clone());

        let own = self.own_position();
        match self.store.upsert_aircraft(situation.clone(), transponder, own.as_ref()) {
            Upsert::Created => self.on_aircraft_created(callsign),
            Upsert::Updated(_) => self.aircraft_watchdog.reset_callsign(callsign),
        }

        self.notify(AirspaceNotification::RemoteSituationAdded { situation });
        self.notify(AirspaceNotification::AircraftInRangeChanged);
    }

    fn on_aircraft_created(&mut self, callsign: &Callsign) {
        let icao_from_cache = self
            .store
            .aircraft(callsign)
            .map(RemoteAircraft::has_valid_aircraft_designator)
            .unwrap_or(false);
        if let Some(aircraft) = self.store.aircraft_mut(callsign) {
            self.data_file.update_aircraft(aircraft);
        }
        self.store.ensure_client(callsign);
        self.aircraft_watchdog.add_callsign(callsign.clone());

        if let Some(aircraft) = self.store.aircraft(callsign).cloned() {
            tracing::info!(
                "Aircraft {} in range ({:.1} NM)",
                callsign,
                aircraft.distance_to_own_m.map(meters_to_nm).unwrap_or(f64::NAN)
            );
            self.notify(AirspaceNotification::AircraftAdded { aircraft });
        }

        if !self.network.is_connected() {
            return;
        }
        // ICAO codes go last so everything else is in place when they arrive
        self.send_fsinn_packet(callsign, FSINN_REQUEST_ID);
        self.network.send_frequency_query(callsign);
        self.network.send_real_name_query(callsign);
        self.network.send_capabilities_query(callsign);
        self.network.send_server_query(callsign);
        if icao_from_cache {
            self.check_ready_for_model_matching(callsign, 1);
        } else {
            self.network.send_icao_codes_query(callsign);
            // Fires even if the ICAO reply never comes
            self.schedule_model_matching_check(callsign, 1);
        }
    }

    /// Explicit disconnect or aircraft watchdog timeout. Safe to call repeatedly.
    pub fn on_pilot_disconnected(&mut self, callsign: &Callsign) {
        self.aircraft_watchdog.remove_callsign(callsign);
        self.store.remove_client(callsign);
        self.pending_model_matching.remove(callsign);
        if self.store.remove_aircraft(callsign) {
            tracing::info!("Aircraft {} removed", callsign);
            self.notify(AirspaceNotification::AircraftRemoved {
                callsign: callsign.clone(),
            });
            self.notify(AirspaceNotification::AircraftInRangeChanged);
        }
    }

    pub fn on_frequency_reply(&mut self, callsign: &Callsign, frequency: Frequency) {
        let patch = AircraftPatch {
            com1_active: Some(frequency),
            ..AircraftPatch::default()
        };
        if self.store.apply_aircraft_patch(callsign, &patch) > 0 {
            self.notify(AirspaceNotification::AircraftInRangeChanged);
        }
    }

    /// Merge an aircraft config packet onto the last known parts of that aircraft.
    ///
    /// Incremental packets are dropped until a full packet has synchronized the aircraft.
    pub fn on_aircraft_config_packet(&mut self, callsign: &Callsign, config: &serde_json::Value, is_full: bool) {
        let Some(aircraft) = self.store.aircraft(callsign) else {
            tracing::debug!("Skipping aircraft config for unknown {}", callsign);
            return;
        };
        if !aircraft.parts_synchronized && !is_full {
            tracing::debug!("Dropping incremental aircraft config for {}, not synchronized", callsign);
            return;
        }

        let baseline: AircraftParts = self
            .store
            .latest_parts(callsign)
            .cloned()
            .or_else(|| aircraft.parts.clone())
            .unwrap_or_default();
        let mut parts = match baseline.apply_incremental(config) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!("Dropping aircraft config for {}: {}", callsign, err);
                return;
            }
        };
        parts.callsign = callsign.clone();
        parts.timestamp = Some(Utc::now());

        self.store.insert_parts(parts.clone());
        let patch = AircraftPatch {
            parts: Some(parts.clone()),
            parts_synchronized: Some(true),
            ..AircraftPatch::default()
        };
        self.store.apply_aircraft_patch(callsign, &patch);
        self.aircraft_watchdog.reset_callsign(callsign);
        self.notify(AirspaceNotification::RemotePartsAdded {
            callsign: callsign.clone(),
            parts,
        });
    }

    // ---- bulk readers ----

    /// Replace the booked list, completing each booking from the data file and
    /// exchanging data with the matching online station.
    pub fn on_bookings_read(&mut self, bookings: Vec<AtcStation>) {
        let mut online_changed = 0;
        let mut merged = Vec::with_capacity(bookings.len());
        for mut booking in bookings {
            self.data_file.update_station(&mut booking);
            if let Some(online) = self.store.online_station_mut(&booking.callsign) {
                online_changed += online.merge_with_booking(&mut booking);
            }
            merged.push(booking);
        }

        tracing::info!("Loaded {} ATC bookings", merged.len());
        self.store.replace_booked(merged);
        self.notify(AirspaceNotification::AtcStationsBookedChanged);
        if online_changed > 0 {
            self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        }
    }

    /// Fill unknown client voice capabilities from a freshly read data file.
    pub fn on_data_file_read(&mut self) {
        if let Err(err) = self.data_file.refresh() {
            tracing::warn!("Keeping previous data file: {:#}", err);
        }
        let mut refreshed = 0;
        for client in self.store.clients_mut() {
            if !client.voice.is_unknown() {
                continue;
            }
            let voice = self.data_file.voice_capabilities_for(&client.callsign);
            if voice.is_unknown() {
                continue;
            }
            client.voice = voice;
            refreshed += 1;
        }
        tracing::debug!("Data file read, {} client voice capabilities refreshed", refreshed);
    }

    // ---- model matching ----

    /// Emit the ready notification once designator and real name are known,
    /// or after the last attempt with whatever data exists.
    fn check_ready_for_model_matching(&mut self, callsign: &Callsign, trial: u32) {
        if self.shutting_down {
            return;
        }
        let Some(aircraft) = self.store.aircraft(callsign) else {
            return;
        };

        let mut snapshot = aircraft.clone();
        if let Some(client) = self.store.client(callsign) {
            snapshot.set_client(client.clone());
        }

        let complete = snapshot.has_valid_aircraft_designator() && snapshot.has_valid_real_name();
        if !complete && trial < self.settings.model_matching_max_attempts {
            self.schedule_model_matching_check(callsign, trial + 1);
            return;
        }

        self.pending_model_matching.remove(callsign);
        if !complete {
            tracing::debug!(
                "Aircraft {} ready for model matching with partial data after {} attempts",
                callsign,
                trial
            );
        }
        self.notify(AirspaceNotification::ReadyForModelMatching { aircraft: snapshot });
    }

    fn schedule_model_matching_check(&mut self, callsign: &Callsign, trial: u32) {
        let due = Instant::now() + self.settings.model_matching_retry_delay();
        let pending = self
            .pending_model_matching
            .entry(callsign.clone())
            .or_insert(PendingModelMatching { trial, due });
        pending.trial = pending.trial.max(trial);
        pending.due = due;
    }

    pub fn pending_model_matching_checks(&self) -> usize {
        self.pending_model_matching.len()
    }

    // ---- timers ----

    /// Watchdog expiry and deferred model-matching checks.
    pub fn on_tick(&mut self) {
        if self.shutting_down {
            return;
        }
        for callsign in self.atc_watchdog.check_timeouts() {
            tracing::info!("ATC station {} timed out", callsign);
            self.on_atc_disconnected(&callsign);
        }
        for callsign in self.aircraft_watchdog.check_timeouts() {
            tracing::info!("Aircraft {} timed out", callsign);
            self.on_pilot_disconnected(&callsign);
        }

        let now = Instant::now();
        let mut due: Vec<(Callsign, u32)> = self
            .pending_model_matching
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(callsign, pending)| (callsign.clone(), pending.trial))
            .collect();
        due.sort();
        for (callsign, trial) in due {
            self.pending_model_matching.remove(&callsign);
            self.check_ready_for_model_matching(&callsign, trial);
        }
    }

    /// Re-query frequencies, and ICAO codes where still missing.
    pub fn request_data_updates(&mut self) {
        self.store.caches().prune();
        if !self.network.is_connected() {
            return;
        }
        for aircraft in self.store.aircraft_in_range() {
            self.network.send_frequency_query(&aircraft.callsign);
            // Some servers skip the first ICAO query
            if !aircraft.has_valid_aircraft_designator() {
                self.network.send_icao_codes_query(&aircraft.callsign);
            }
        }
    }

    pub fn request_atis_updates(&mut self) {
        if !self.network.is_connected() {
            return;
        }
        for station in self.store.online_stations(None) {
            self.network.send_atis_query(&station.callsign);
        }
    }

    // ---- accessors ----

    pub fn online_stations(&self) -> Vec<AtcStation> {
        self.store.online_stations(self.own_position().as_ref())
    }

    pub fn booked_stations(&self) -> Vec<AtcStation> {
        self.store.booked_stations(self.own_position().as_ref())
    }

    pub fn online_station(&self, callsign: &Callsign) -> Option<AtcStation> {
        self.store
            .online_station(callsign)
            .cloned()
            .map(|station| self.station_snapshot(station))
    }

    pub fn aircraft_in_range(&self) -> Vec<RemoteAircraft> {
        self.store.aircraft_in_range()
    }

    pub fn aircraft(&self, callsign: &Callsign) -> Option<RemoteAircraft> {
        self.store.aircraft(callsign).cloned()
    }

    /// Situation history of one aircraft, newest first.
    pub fn situations(&self, callsign: &Callsign) -> Vec<AircraftSituation> {
        self.store.situations(callsign)
    }

    /// Parts history of one aircraft, newest first.
    pub fn parts(&self, callsign: &Callsign) -> Vec<AircraftParts> {
        self.store.parts_history(callsign)
    }

    pub fn other_clients(&self) -> Vec<Client> {
        self.store.clients()
    }

    pub fn clients_for_callsigns(&self, callsigns: &[Callsign]) -> Vec<Client> {
        self.store.clients_for_callsigns(callsigns)
    }

    pub fn users(&self) -> Vec<User> {
        self.store.users()
    }

    /// One user per distinct callsign: own aircraft, aircraft and stations in
    /// range, then the data file, else a bare user.
    pub fn users_for_callsigns(&self, callsigns: &[Callsign]) -> Vec<User> {
        let own = self.own_aircraft.own_aircraft();
        let mut seen = HashSet::new();
        callsigns
            .iter()
            .filter(|callsign| !callsign.is_empty() && seen.insert((*callsign).clone()))
            .map(|callsign| {
                if !own.callsign.is_empty() && &own.callsign == callsign {
                    let mut pilot = own.pilot.clone();
                    pilot.callsign = callsign.clone();
                    return pilot;
                }
                self.store
                    .user_for(callsign)
                    .or_else(|| self.data_file.users_for(callsign).into_iter().next())
                    .unwrap_or_else(|| User::for_callsign(callsign.clone()))
            })
            .collect()
    }

    /// The nearest online station tuned to the active frequency of a COM unit.
    pub fn station_for_com_unit(&self, unit: ComUnit) -> Option<AtcStation> {
        let own = self.own_aircraft.own_aircraft();
        self.store
            .find_stations_tuned_to(own.com(unit).active, self.settings.channel_spacing_hz, own.position.as_ref())
            .into_iter()
            .next()
    }

    pub fn find_stations_tuned_to(&self, frequency: Frequency) -> Vec<AtcStation> {
        self.store
            .find_stations_tuned_to(frequency, self.settings.channel_spacing_hz, self.own_position().as_ref())
    }

    /// Cached flight plan; a stale or missing entry triggers a network query.
    pub fn flight_plan(&self, callsign: &Callsign) -> Option<FlightPlan> {
        let lookup = self.store.caches().flight_plans.get(callsign);
        if !lookup.fresh && self.network.is_connected() {
            self.network.send_flight_plan_query(callsign);
        }
        lookup.value
    }

    /// Cached METAR for an airport; a stale or missing entry triggers a network query.
    pub fn metar(&self, airport_icao: &str) -> Option<InformationMessage> {
        let airport_icao = airport_icao.trim().to_uppercase();
        if airport_icao.is_empty() {
            return None;
        }
        let lookup = self.store.caches().metars.get(&airport_icao);
        if !lookup.fresh && self.network.is_connected() {
            self.network.send_metar_query(&airport_icao);
        }
        lookup.value
    }

    // ---- collaborator updates ----

    pub fn update_aircraft_enabled(&mut self, callsign: &Callsign, enabled: bool) -> bool {
        let patch = AircraftPatch {
            enabled: Some(enabled),
            ..AircraftPatch::default()
        };
        self.store.apply_aircraft_patch(callsign, &patch) > 0
    }

    pub fn update_aircraft_model(&mut self, callsign: &Callsign, model: AircraftModel) -> bool {
        let patch = AircraftPatch {
            model: Some(model),
            ..AircraftPatch::default()
        };
        self.store.apply_aircraft_patch(callsign, &patch) > 0
    }

    // ---- lifecycle ----

    /// Reset every collection, cache, watchdog and pending check. Call on disconnect.
    pub fn clear(&mut self) {
        for callsign in self.store.aircraft_callsigns() {
            self.notify(AirspaceNotification::AircraftRemoved { callsign });
        }
        self.atc_watchdog.remove_all();
        self.aircraft_watchdog.remove_all();
        self.pending_model_matching.clear();
        self.store.clear();
        tracing::info!("Airspace cleared");

        self.notify(AirspaceNotification::AtcStationsOnlineChanged);
        self.notify(AirspaceNotification::AtcStationsBookedChanged);
        self.notify(AirspaceNotification::AircraftInRangeChanged);
    }

    /// Stop reacting to events and timers; pending checks are dropped.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.pending_model_matching.clear();
        tracing::info!("Airspace monitor shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{DataFileSnapshot, OwnAircraft, StaticOwnAircraft};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        connected: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn connected() -> Arc<Self> {
            let recorder = Self::default();
            recorder.connected.store(true, Ordering::SeqCst);
            Arc::new(recorder)
        }

        fn record(&self, entry: String) {
            self.sent.lock().unwrap().push(entry);
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl NetworkCommands for Recorder {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn send_frequency_query(&self, callsign: &Callsign) {
            self.record(format!("frequency {callsign}"));
        }
        fn send_real_name_query(&self, callsign: &Callsign) {
            self.record(format!("real_name {callsign}"));
        }
        fn send_capabilities_query(&self, callsign: &Callsign) {
            self.record(format!("capabilities {callsign}"));
        }
        fn send_server_query(&self, callsign: &Callsign) {
            self.record(format!("server {callsign}"));
        }
        fn send_icao_codes_query(&self, callsign: &Callsign) {
            self.record(format!("icao {callsign}"));
        }
        fn send_atis_query(&self, callsign: &Callsign) {
            self.record(format!("atis {callsign}"));
        }
        fn send_flight_plan_query(&self, callsign: &Callsign) {
            self.record(format!("flight_plan {callsign}"));
        }
        fn send_metar_query(&self, airport_icao: &str) {
            self.record(format!("metar {airport_icao}"));
        }
        fn send_aircraft_config_query(&self, callsign: &Callsign) {
            self.record(format!("aircraft_config {callsign}"));
        }
        fn send_custom_packet(&self, callsign: &Callsign, packet_id: &str, fields: Vec<String>) {
            self.record(format!("{packet_id} {callsign} {}", fields.join(":")));
        }
    }

    fn monitor(recorder: Arc<Recorder>) -> AirspaceMonitor {
        let own = OwnAircraft {
            callsign: Callsign::new("SWR8"),
            position: Some(GeoPosition::new(47.45, 8.56, 400.0)),
            model_string: "A320 Swiss".to_string(),
            icao: AircraftIcao::new("A320", "L2J", "SWR"),
            ..OwnAircraft::default()
        };
        AirspaceMonitor::new(
            MonitorSettings::default(),
            recorder,
            Arc::new(StaticOwnAircraft::new(own)),
            Arc::new(DataFileSnapshot::default()),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<AirspaceNotification>) -> Vec<AirspaceNotification> {
        let mut out = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            out.push(notification);
        }
        out
    }

    fn position_update(monitor: &mut AirspaceMonitor, callsign: &str) {
        let callsign = Callsign::new(callsign);
        let situation = AircraftSituation::new(callsign.clone(), GeoPosition::new(47.5, 8.6, 3000.0));
        monitor.on_aircraft_position_update(&callsign, situation, Transponder::default());
    }

    #[test]
    fn fsinn_request_is_answered_with_own_aircraft() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder.clone());
        let callsign = Callsign::new("BAW12");
        let data = messages::fsinn_fields(&AircraftIcao::new("B744", "L4J", "BAW"), "PMDG 747");

        monitor.on_custom_packet(&callsign, FSINN_REQUEST_ID, &data);

        assert_eq!(recorder.sent(), vec!["FSIPI BAW12 0:SWR:A320:::::L2J:A320 Swiss".to_string()]);
        let client = monitor.store.client(&callsign).unwrap();
        assert_eq!(client.model.model_string, "PMDG 747");
        assert_eq!(client.model.model_type, ModelType::QueriedFromNetwork);
        // no aircraft yet, designator cached for later
        assert!(monitor.caches().icao.contains(&callsign));
    }

    #[test]
    fn fsinn_reply_is_not_answered() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder.clone());
        let data = messages::fsinn_fields(&AircraftIcao::new("B744", "L4J", "BAW"), "PMDG 747");
        monitor.on_custom_packet(&Callsign::new("BAW12"), FSINN_REPLY_ID, &data);
        assert!(recorder.sent().is_empty());
    }

    #[test]
    fn short_custom_packet_is_dropped() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder.clone());
        monitor.on_custom_packet(&Callsign::new("BAW12"), FSINN_REQUEST_ID, &["0".to_string()]);
        assert!(recorder.sent().is_empty());
        assert!(monitor.other_clients().is_empty());
    }

    #[test]
    fn capabilities_with_aircraft_config_trigger_config_query() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder.clone());
        let callsign = Callsign::new("DLH123");
        monitor.on_capabilities_reply(
            &callsign,
            Capabilities::ACCEPTS_ATIS_RESPONSES | Capabilities::SUPPORTS_AIRCRAFT_CONFIGS,
        );
        assert_eq!(recorder.sent(), vec!["aircraft_config DLH123".to_string()]);
        assert!(monitor.store.client(&callsign).unwrap().capabilities.aircraft_config);
    }

    #[test]
    fn queries_are_suppressed_while_disconnected() {
        let recorder = Arc::new(Recorder::default());
        let mut monitor = monitor(recorder.clone());
        position_update(&mut monitor, "AFR11FW");
        monitor.on_atc_position_update(
            &Callsign::new("LSZH_TWR"),
            Frequency::from_mhz(118.1),
            GeoPosition::new(47.46, 8.55, 0.0),
            30.0,
        );
        monitor.request_data_updates();
        monitor.request_atis_updates();
        assert!(recorder.sent().is_empty());
        assert!(monitor.aircraft_watchdog.contains(&Callsign::new("AFR11FW")));
    }

    #[test]
    fn data_updates_query_icao_only_when_missing() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder.clone());
        position_update(&mut monitor, "AFR11FW");
        position_update(&mut monitor, "DLH123");
        monitor.on_icao_codes_reply(&Callsign::new("DLH123"), AircraftIcao::new("A321", "L2J", "DLH"));
        recorder.sent.lock().unwrap().clear();

        monitor.request_data_updates();
        assert_eq!(
            recorder.sent(),
            vec![
                "frequency AFR11FW".to_string(),
                "icao AFR11FW".to_string(),
                "frequency DLH123".to_string(),
            ]
        );
    }

    #[test]
    fn voice_room_marks_station_online_and_voice_capable() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder);
        let callsign = Callsign::new("LSZH_TWR");
        monitor.on_atc_position_update(&callsign, Frequency::from_mhz(118.1), GeoPosition::new(47.46, 8.55, 0.0), 30.0);
        monitor.on_server_reply(&callsign, "EUROPE-C2");
        let mut rx = monitor.subscribe();

        monitor.on_atis_voice_room_reply(&callsign, "  voice.example.net/lszh_twr ");

        let notifications = drain(&mut rx);
        assert_eq!(notifications.len(), 2);
        assert!(matches!(
            &notifications[1],
            AirspaceNotification::AtcStationConnectionStatusChanged { station, online: true }
                if station.voice_room_url.as_deref() == Some("voice.example.net/lszh_twr")
        ));
        assert_eq!(monitor.store.client(&callsign).unwrap().voice, VoiceCapabilities::Voice);

        monitor.on_atis_voice_room_reply(&callsign, "voice.example.net/lszh_twr");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn logoff_time_sets_booked_until() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder);
        let callsign = Callsign::new("LSZH_TWR");
        monitor.on_atc_position_update(&callsign, Frequency::from_mhz(118.1), GeoPosition::new(47.46, 8.55, 0.0), 30.0);

        monitor.on_atis_logoff_time_reply(&callsign, "2130");
        let station = monitor.online_station(&callsign).unwrap();
        assert_eq!(station.booked_until.map(|t| t.format("%H%M").to_string()), Some("2130".to_string()));

        monitor.on_atis_logoff_time_reply(&callsign, "21:30");
        assert_eq!(monitor.online_station(&callsign).unwrap().booked_until, station.booked_until);
    }

    #[test]
    fn real_name_reaches_aircraft_and_client() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder);
        position_update(&mut monitor, "AFR11FW");
        let callsign = Callsign::new("AFR11FW");

        monitor.on_real_name_reply(&callsign, "Jean Dupont");
        let aircraft = monitor.aircraft(&callsign).unwrap();
        assert_eq!(aircraft.pilot.real_name, "Jean Dupont");
        assert_eq!(aircraft.client.user.real_name, "Jean Dupont");
        assert_eq!(monitor.store.client(&callsign).unwrap().user.real_name, "Jean Dupont");
    }

    #[test]
    fn users_for_callsigns_resolves_each_source_once() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder);
        position_update(&mut monitor, "AFR11FW");
        monitor.on_real_name_reply(&Callsign::new("AFR11FW"), "Jean Dupont");

        let users = monitor.users_for_callsigns(&[
            Callsign::new("SWR8"),
            Callsign::new("AFR11FW"),
            Callsign::new("AFR11FW"),
            Callsign::new("N123"),
        ]);
        let callsigns: Vec<&str> = users.iter().map(|user| user.callsign.as_str()).collect();
        assert_eq!(callsigns, vec!["SWR8", "AFR11FW", "N123"]);
        assert_eq!(users[1].real_name, "Jean Dupont");
        assert!(users[2].real_name.is_empty());
    }

    #[test]
    fn station_for_com_unit_uses_own_active_frequency() {
        let recorder = Recorder::connected();
        let own = Arc::new(StaticOwnAircraft::new(OwnAircraft {
            position: Some(GeoPosition::new(47.45, 8.56, 400.0)),
            ..OwnAircraft::default()
        }));
        let mut monitor = AirspaceMonitor::new(
            MonitorSettings::default(),
            recorder,
            own.clone(),
            Arc::new(DataFileSnapshot::default()),
        );
        monitor.on_atc_position_update(
            &Callsign::new("LSZH_TWR"),
            Frequency::from_mhz(118.1),
            GeoPosition::new(47.46, 8.55, 0.0),
            30.0,
        );
        assert!(monitor.station_for_com_unit(ComUnit::Com1).is_none());

        own.update(|own| own.com1.active = Frequency::from_mhz(118.105));
        let station = monitor.station_for_com_unit(ComUnit::Com1).unwrap();
        assert_eq!(station.callsign, Callsign::new("LSZH_TWR"));
        assert!(station.distance_to_own_m.is_some());
    }

    #[test]
    fn update_enabled_and_model_report_changes() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder);
        position_update(&mut monitor, "AFR11FW");
        let callsign = Callsign::new("AFR11FW");

        assert!(monitor.update_aircraft_enabled(&callsign, false));
        assert!(!monitor.update_aircraft_enabled(&callsign, false));
        let model = AircraftModel {
            model_string: "A320 AFR".to_string(),
            model_type: ModelType::Matched,
        };
        assert!(monitor.update_aircraft_model(&callsign, model.clone()));
        assert!(!monitor.update_aircraft_model(&callsign, model));
        assert!(!monitor.update_aircraft_enabled(&Callsign::new("UNKNOWN"), true));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_metar_is_requeried() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder.clone());
        assert!(monitor.metar("klbb").is_none());
        assert_eq!(recorder.sent(), vec!["metar KLBB".to_string()]);

        monitor.on_metar_reply("KLBB 241753Z 20009KT 10SM CLR 33/M02 A2999");
        assert!(monitor.metar("KLBB").is_some());
        assert_eq!(recorder.sent().len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(monitor.metar("KLBB").is_some());
        assert_eq!(recorder.sent().len(), 2);
    }

    #[test]
    fn events_after_shutdown_are_ignored() {
        let recorder = Recorder::connected();
        let mut monitor = monitor(recorder);
        monitor.shutdown();
        monitor.handle_event(InboundEvent::MetarReply {
            message: "KLBB 241753Z 20009KT 10SM CLR 33/M02 A2999".to_string(),
        });
        assert!(monitor.caches().metars.is_empty());
    }
}
