//! Monitor loop.
//!
//! Owns the [`AirspaceMonitor`] and serializes everything touching it:
//! inbound events, queries from other tasks, watchdog ticks and the periodic
//! data and ATIS refreshes. Other tasks talk to it through a [`MonitorHandle`].

use std::time::Duration;

use airspace_core::{
    AircraftModel, AircraftParts, AircraftSituation, AtcStation, Callsign, Client, FlightPlan, Frequency,
    InformationMessage, MonitorSettings, RemoteAircraft, User,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::cache::{AirspaceCaches, Lookup};
use crate::error::{MonitorError, Result};
use crate::events::{AirspaceNotification, InboundEvent};
use crate::monitor::AirspaceMonitor;
use crate::providers::ComUnit;

const TICK_MILLIS: u64 = 500;
const DATA_UPDATE_SECS: u64 = 30;
const ATIS_UPDATE_SECS: u64 = 60;
/// `tokio::time::interval` panics on a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopIntervals {
    /// Watchdog checks and deferred model-matching checks
    pub tick: Duration,
    pub data_updates: Duration,
    pub atis_updates: Duration,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(TICK_MILLIS),
            data_updates: Duration::from_secs(DATA_UPDATE_SECS),
            atis_updates: Duration::from_secs(ATIS_UPDATE_SECS),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

pub enum MonitorCommand {
    Event(InboundEvent),
    OnlineStations(Reply<Vec<AtcStation>>),
    BookedStations(Reply<Vec<AtcStation>>),
    AircraftInRange(Reply<Vec<RemoteAircraft>>),
    Aircraft(Callsign, Reply<Option<RemoteAircraft>>),
    Situations(Callsign, Reply<Vec<AircraftSituation>>),
    Parts(Callsign, Reply<Vec<AircraftParts>>),
    OtherClients(Reply<Vec<Client>>),
    ClientsForCallsigns(Vec<Callsign>, Reply<Vec<Client>>),
    Users(Reply<Vec<User>>),
    UsersForCallsigns(Vec<Callsign>, Reply<Vec<User>>),
    StationForComUnit(ComUnit, Reply<Option<AtcStation>>),
    StationsTunedTo(Frequency, Reply<Vec<AtcStation>>),
    FlightPlan(Callsign, Reply<Option<FlightPlan>>),
    Metar(String, Reply<Option<InformationMessage>>),
    UpdateAircraftEnabled(Callsign, bool, Reply<bool>),
    UpdateAircraftModel(Callsign, AircraftModel, Reply<bool>),
    Clear,
    Shutdown,
}

/// Cloneable entry point into a running monitor loop.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
    notifications: broadcast::Sender<AirspaceNotification>,
    caches: AirspaceCaches,
    settings: MonitorSettings,
}

impl MonitorHandle {
    fn send(&self, command: MonitorCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| MonitorError::MonitorClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> MonitorCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| MonitorError::MonitorClosed)
    }

    /// Queue an inbound event; events are applied in the order they are dispatched.
    pub fn dispatch(&self, event: InboundEvent) -> Result<()> {
        self.send(MonitorCommand::Event(event))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AirspaceNotification> {
        self.notifications.subscribe()
    }

    pub async fn online_stations(&self) -> Result<Vec<AtcStation>> {
        self.request(MonitorCommand::OnlineStations).await
    }

    pub async fn booked_stations(&self) -> Result<Vec<AtcStation>> {
        self.request(MonitorCommand::BookedStations).await
    }

    pub async fn aircraft_in_range(&self) -> Result<Vec<RemoteAircraft>> {
        self.request(MonitorCommand::AircraftInRange).await
    }

    pub async fn aircraft(&self, callsign: Callsign) -> Result<Option<RemoteAircraft>> {
        self.request(|reply| MonitorCommand::Aircraft(callsign, reply)).await
    }

    pub async fn situations(&self, callsign: Callsign) -> Result<Vec<AircraftSituation>> {
        self.request(|reply| MonitorCommand::Situations(callsign, reply)).await
    }

    pub async fn parts(&self, callsign: Callsign) -> Result<Vec<AircraftParts>> {
        self.request(|reply| MonitorCommand::Parts(callsign, reply)).await
    }

    pub async fn other_clients(&self) -> Result<Vec<Client>> {
        self.request(MonitorCommand::OtherClients).await
    }

    pub async fn clients_for_callsigns(&self, callsigns: Vec<Callsign>) -> Result<Vec<Client>> {
        self.request(|reply| MonitorCommand::ClientsForCallsigns(callsigns, reply)).await
    }

    pub async fn users(&self) -> Result<Vec<User>> {
        self.request(MonitorCommand::Users).await
    }

    pub async fn users_for_callsigns(&self, callsigns: Vec<Callsign>) -> Result<Vec<User>> {
        self.request(|reply| MonitorCommand::UsersForCallsigns(callsigns, reply)).await
    }

    pub async fn station_for_com_unit(&self, unit: ComUnit) -> Result<Option<AtcStation>> {
        self.request(|reply| MonitorCommand::StationForComUnit(unit, reply)).await
    }

    pub async fn stations_tuned_to(&self, frequency: Frequency) -> Result<Vec<AtcStation>> {
        self.request(|reply| MonitorCommand::StationsTunedTo(frequency, reply)).await
    }

    /// Cached flight plan; triggers a network query if missing or stale.
    pub async fn flight_plan(&self, callsign: Callsign) -> Result<Option<FlightPlan>> {
        self.request(|reply| MonitorCommand::FlightPlan(callsign, reply)).await
    }

    /// Cached METAR; triggers a network query if missing or stale.
    pub async fn metar(&self, airport_icao: impl Into<String>) -> Result<Option<InformationMessage>> {
        let airport_icao = airport_icao.into();
        self.request(|reply| MonitorCommand::Metar(airport_icao, reply)).await
    }

    /// Like [`Self::flight_plan`], then waits a bounded time for the reply.
    ///
    /// Returns the freshest value available when the wait ends, possibly none.
    pub async fn load_flight_plan(&self, callsign: Callsign) -> Result<Option<FlightPlan>> {
        let cached = self.flight_plan(callsign.clone()).await?;
        Ok(self
            .wait_for_fresh(cached, || self.caches.flight_plans.get(&callsign))
            .await)
    }

    /// Like [`Self::metar`], then waits a bounded time for the reply.
    pub async fn load_metar(&self, airport_icao: impl Into<String>) -> Result<Option<InformationMessage>> {
        let airport_icao = airport_icao.into().trim().to_uppercase();
        let cached = self.metar(airport_icao.clone()).await?;
        Ok(self
            .wait_for_fresh(cached, || self.caches.metars.get(&airport_icao))
            .await)
    }

    async fn wait_for_fresh<V>(&self, mut best: Option<V>, lookup: impl Fn() -> Lookup<V>) -> Option<V> {
        let deadline = Instant::now() + self.settings.bounded_wait();
        let slice = self.settings.bounded_wait_slice();
        loop {
            let current = lookup();
            if current.value.is_some() {
                if current.fresh {
                    return current.value;
                }
                best = current.value;
            }
            let now = Instant::now();
            if now >= deadline {
                return best;
            }
            tokio::time::sleep(slice.min(deadline - now)).await;
        }
    }

    pub async fn update_aircraft_enabled(&self, callsign: Callsign, enabled: bool) -> Result<bool> {
        self.request(|reply| MonitorCommand::UpdateAircraftEnabled(callsign, enabled, reply))
            .await
    }

    pub async fn update_aircraft_model(&self, callsign: Callsign, model: AircraftModel) -> Result<bool> {
        self.request(|reply| MonitorCommand::UpdateAircraftModel(callsign, model, reply))
            .await
    }

    /// Reset all state, e.g. after the network connection dropped.
    pub fn clear(&self) -> Result<()> {
        self.send(MonitorCommand::Clear)
    }

    /// Stop the loop after everything queued before this call is processed.
    pub fn shutdown(&self) -> Result<()> {
        self.send(MonitorCommand::Shutdown)
    }
}

/// Spawn the monitor loop on the current runtime.
pub fn spawn_monitor(
    monitor: AirspaceMonitor,
    intervals: LoopIntervals,
    shutdown: broadcast::Receiver<()>,
) -> (MonitorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = MonitorHandle {
        tx,
        notifications: monitor.notification_sender(),
        caches: monitor.caches(),
        settings: monitor.settings().clone(),
    };
    let task = tokio::spawn(run_monitor_loop(monitor, rx, intervals, shutdown));
    (handle, task)
}

pub async fn run_monitor_loop(
    mut monitor: AirspaceMonitor,
    mut rx: mpsc::UnboundedReceiver<MonitorCommand>,
    intervals: LoopIntervals,
    mut shutdown: broadcast::Receiver<()>,
) {
    let tick = intervals.tick.max(MIN_PERIOD);
    let data_updates = intervals.data_updates.max(MIN_PERIOD);
    let atis_updates = intervals.atis_updates.max(MIN_PERIOD);

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let start = Instant::now();
    let mut data_ticker = interval_at(start + data_updates, data_updates);
    data_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut atis_ticker = interval_at(start + atis_updates, atis_updates);
    atis_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("Monitor loop started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Monitor loop shutting down");
                monitor.shutdown();
                break;
            }
            maybe_command = rx.recv() => {
                match maybe_command {
                    Some(MonitorCommand::Shutdown) => {
                        monitor.shutdown();
                        break;
                    }
                    Some(command) => handle_command(&mut monitor, command),
                    None => {
                        tracing::info!("Monitor command channel closed");
                        monitor.shutdown();
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                monitor.on_tick();
            }
            _ = data_ticker.tick() => {
                monitor.request_data_updates();
            }
            _ = atis_ticker.tick() => {
                monitor.request_atis_updates();
            }
        }
    }
}

fn handle_command(monitor: &mut AirspaceMonitor, command: MonitorCommand) {
    // A dropped reply receiver only means the caller gave up
    match command {
        MonitorCommand::Event(event) => monitor.handle_event(event),
        MonitorCommand::OnlineStations(reply) => {
            let _ = reply.send(monitor.online_stations());
        }
        MonitorCommand::BookedStations(reply) => {
            let _ = reply.send(monitor.booked_stations());
        }
        MonitorCommand::AircraftInRange(reply) => {
            let _ = reply.send(monitor.aircraft_in_range());
        }
        MonitorCommand::Aircraft(callsign, reply) => {
            let _ = reply.send(monitor.aircraft(&callsign));
        }
        MonitorCommand::Situations(callsign, reply) => {
            let _ = reply.send(monitor.situations(&callsign));
        }
        MonitorCommand::Parts(callsign, reply) => {
            let _ = reply.send(monitor.parts(&callsign));
        }
        MonitorCommand::OtherClients(reply) => {
            let _ = reply.send(monitor.other_clients());
        }
        MonitorCommand::ClientsForCallsigns(callsigns, reply) => {
            let _ = reply.send(monitor.clients_for_callsigns(&callsigns));
        }
        MonitorCommand::Users(reply) => {
            let _ = reply.send(monitor.users());
        }
        MonitorCommand::UsersForCallsigns(callsigns, reply) => {
            let _ = reply.send(monitor.users_for_callsigns(&callsigns));
        }
        MonitorCommand::StationForComUnit(unit, reply) => {
            let _ = reply.send(monitor.station_for_com_unit(unit));
        }
        MonitorCommand::StationsTunedTo(frequency, reply) => {
            let _ = reply.send(monitor.find_stations_tuned_to(frequency));
        }
        MonitorCommand::FlightPlan(callsign, reply) => {
            let _ = reply.send(monitor.flight_plan(&callsign));
        }
        MonitorCommand::Metar(airport_icao, reply) => {
            let _ = reply.send(monitor.metar(&airport_icao));
        }
        MonitorCommand::UpdateAircraftEnabled(callsign, enabled, reply) => {
            let _ = reply.send(monitor.update_aircraft_enabled(&callsign, enabled));
        }
        MonitorCommand::UpdateAircraftModel(callsign, model, reply) => {
            let _ = reply.send(monitor.update_aircraft_model(&callsign, model));
        }
        MonitorCommand::Clear => monitor.clear(),
        MonitorCommand::Shutdown => monitor.shutdown(),
    }
}
