//! Monitor configuration from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use airspace_core::{Callsign, GeoPosition, MonitorSettings};

use crate::loops::monitor_loop::LoopIntervals;
use crate::providers::OwnAircraft;

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: MonitorSettings,
    pub intervals: LoopIntervals,
    pub own_aircraft: OwnAircraft,
    /// Network data file (JSON) used for prefill and fallbacks
    pub data_file: Option<PathBuf>,
    /// Whether outbound queries are sent at start
    pub connected: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let mut settings = MonitorSettings::default();
        if let Some(ms) = parse_var("AIRSPACE_ATC_WATCHDOG_MS") {
            settings.atc_watchdog_timeout_ms = ms;
        }
        if let Some(ms) = parse_var("AIRSPACE_AIRCRAFT_WATCHDOG_MS") {
            settings.aircraft_watchdog_timeout_ms = ms;
        }
        if let Some(attempts) = parse_var("AIRSPACE_MODEL_MATCHING_ATTEMPTS") {
            settings.model_matching_max_attempts = attempts;
        }
        if let Some(ms) = parse_var("AIRSPACE_MODEL_MATCHING_DELAY_MS") {
            settings.model_matching_retry_delay_ms = ms;
        }

        let defaults = LoopIntervals::default();
        let intervals = LoopIntervals {
            tick: parse_period("AIRSPACE_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick),
            data_updates: parse_period("AIRSPACE_DATA_UPDATE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.data_updates),
            atis_updates: parse_period("AIRSPACE_ATIS_UPDATE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.atis_updates),
        };

        let own_position = match (parse_var("AIRSPACE_OWN_LAT"), parse_var("AIRSPACE_OWN_LON")) {
            (Some(lat), Some(lon)) => Some(GeoPosition::new(
                lat,
                lon,
                parse_var("AIRSPACE_OWN_ALT_M").unwrap_or(0.0),
            )),
            _ => None,
        };
        let own_aircraft = OwnAircraft {
            callsign: env::var("AIRSPACE_OWN_CALLSIGN")
                .map(Callsign::new)
                .unwrap_or_default(),
            position: own_position,
            model_string: env::var("AIRSPACE_OWN_MODEL").unwrap_or_default(),
            ..OwnAircraft::default()
        };

        Self {
            settings,
            intervals,
            own_aircraft,
            data_file: env::var("AIRSPACE_DATA_FILE").ok().map(PathBuf::from),
            connected: parse_var("AIRSPACE_CONNECTED").unwrap_or(true),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Timer periods must be non-zero; zero falls back to the default.
fn parse_period(name: &str) -> Option<u64> {
    parse_var::<u64>(name).filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only test in the crate touching these variables
    #[test]
    fn zero_or_invalid_periods_fall_back_to_defaults() {
        env::set_var("AIRSPACE_TICK_MS", "0");
        env::set_var("AIRSPACE_DATA_UPDATE_SECS", "0");
        env::set_var("AIRSPACE_ATIS_UPDATE_SECS", "soon");
        let zero = Config::from_env().intervals;

        env::set_var("AIRSPACE_TICK_MS", "250");
        env::set_var("AIRSPACE_DATA_UPDATE_SECS", " 5 ");
        env::set_var("AIRSPACE_ATIS_UPDATE_SECS", "90");
        let custom = Config::from_env().intervals;

        env::remove_var("AIRSPACE_TICK_MS");
        env::remove_var("AIRSPACE_DATA_UPDATE_SECS");
        env::remove_var("AIRSPACE_ATIS_UPDATE_SECS");

        assert_eq!(zero, LoopIntervals::default());
        assert_eq!(custom.tick, Duration::from_millis(250));
        assert_eq!(custom.data_updates, Duration::from_secs(5));
        assert_eq!(custom.atis_updates, Duration::from_secs(90));
    }
}
