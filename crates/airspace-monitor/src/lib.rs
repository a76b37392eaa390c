//! Airspace monitor - aggregates FSD network traffic into airspace state

pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod loops;
pub mod monitor;
pub mod providers;
pub mod state;
pub mod watchdog;

pub use commands::{ChannelCommands, NetworkCommands, OutboundCommand};
pub use config::Config;
pub use error::{MonitorError, Result};
pub use events::{AirspaceNotification, InboundEvent};
pub use loops::monitor_loop::{spawn_monitor, LoopIntervals, MonitorHandle};
pub use monitor::AirspaceMonitor;
pub use providers::{
    ComUnit, DataFileReader, DataFileSnapshot, OwnAircraft, OwnAircraftProvider, ReloadableDataFile, StaticOwnAircraft,
};
