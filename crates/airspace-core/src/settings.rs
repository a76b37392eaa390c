//! Timeouts, retention windows and retry policy for the airspace monitor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the airspace monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// ATC stations send updates every ~25 s
    pub atc_watchdog_timeout_ms: u64,
    /// Bound to the expected position update cadence of pilots
    pub aircraft_watchdog_timeout_ms: u64,
    /// Situations older than this are pruned from the history
    pub situation_retention_ms: u64,
    /// Parts older than this are pruned from the history
    pub parts_retention_ms: u64,
    /// Cached flight plans older than this trigger a new query
    pub flight_plan_max_age_ms: u64,
    /// Cached METARs older than this trigger a new query
    pub metar_max_age_ms: u64,
    /// Readiness checks before model matching proceeds with partial data
    pub model_matching_max_attempts: u32,
    pub model_matching_retry_delay_ms: u64,
    /// Upper bound for the legacy bounded-wait getters
    pub bounded_wait_ms: u64,
    pub bounded_wait_slice_ms: u64,
    pub channel_spacing_hz: u32,
    /// Used as model string in FSInn replies when the own model is unknown
    pub application_name: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            atc_watchdog_timeout_ms: 50_000,
            aircraft_watchdog_timeout_ms: 30_000,
            situation_retention_ms: 30_000,
            parts_retention_ms: 30_000,
            flight_plan_max_age_ms: 30_000,
            metar_max_age_ms: 10_000,
            model_matching_max_attempts: 3,
            model_matching_retry_delay_ms: 2_500,
            bounded_wait_ms: 1_000,
            bounded_wait_slice_ms: 100,
            channel_spacing_hz: 25_000,
            application_name: concat!("airspace-monitor ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl MonitorSettings {
    pub fn atc_watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.atc_watchdog_timeout_ms)
    }

    pub fn aircraft_watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.aircraft_watchdog_timeout_ms)
    }

    pub fn situation_retention(&self) -> Duration {
        Duration::from_millis(self.situation_retention_ms)
    }

    pub fn parts_retention(&self) -> Duration {
        Duration::from_millis(self.parts_retention_ms)
    }

    pub fn flight_plan_max_age(&self) -> Duration {
        Duration::from_millis(self.flight_plan_max_age_ms)
    }

    pub fn metar_max_age(&self) -> Duration {
        Duration::from_millis(self.metar_max_age_ms)
    }

    pub fn model_matching_retry_delay(&self) -> Duration {
        Duration::from_millis(self.model_matching_retry_delay_ms)
    }

    pub fn bounded_wait(&self) -> Duration {
        Duration::from_millis(self.bounded_wait_ms)
    }

    pub fn bounded_wait_slice(&self) -> Duration {
        Duration::from_millis(self.bounded_wait_slice_ms.max(1))
    }
}
