//! Per-callsign last-seen timers.
//!
//! Network peers do not always announce their disconnect. Every update
//! re-arms the callsign's deadline; [`Watchdog::check_timeouts`] is polled
//! from the monitor tick and reports each expired callsign exactly once.

use std::collections::HashMap;
use std::time::Duration;

use airspace_core::Callsign;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Watchdog {
    name: &'static str,
    timeout: Duration,
    deadlines: HashMap<Callsign, Instant>,
}

impl Watchdog {
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            deadlines: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the timer for a callsign; re-arms if already present.
    pub fn add_callsign(&mut self, callsign: Callsign) {
        self.deadlines.insert(callsign, Instant::now() + self.timeout);
    }

    /// Push the deadline out after an update. Unknown callsigns are ignored.
    pub fn reset_callsign(&mut self, callsign: &Callsign) {
        if let Some(deadline) = self.deadlines.get_mut(callsign) {
            *deadline = Instant::now() + self.timeout;
        }
    }

    /// Forget a callsign without firing.
    pub fn remove_callsign(&mut self, callsign: &Callsign) -> bool {
        self.deadlines.remove(callsign).is_some()
    }

    pub fn remove_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn contains(&self, callsign: &Callsign) -> bool {
        self.deadlines.contains_key(callsign)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return every callsign whose deadline has passed.
    pub fn check_timeouts(&mut self) -> Vec<Callsign> {
        let now = Instant::now();
        let mut expired: Vec<Callsign> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(callsign, _)| callsign.clone())
            .collect();
        expired.sort();

        for callsign in &expired {
            self.deadlines.remove(callsign);
            tracing::debug!("{} watchdog timed out for {}", self.name, callsign);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_exactly_once() {
        let mut watchdog = Watchdog::new("aircraft", Duration::from_secs(30));
        let callsign = Callsign::new("DLH123");
        watchdog.add_callsign(callsign.clone());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(watchdog.check_timeouts().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(watchdog.check_timeouts(), vec![callsign.clone()]);
        assert!(!watchdog.contains(&callsign));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(watchdog.check_timeouts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_before_deadline_prevents_timeout() {
        let mut watchdog = Watchdog::new("atc", Duration::from_secs(50));
        let callsign = Callsign::new("EDDF_TWR");
        watchdog.add_callsign(callsign.clone());

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(25)).await;
            watchdog.reset_callsign(&callsign);
            assert!(watchdog.check_timeouts().is_empty());
        }
        assert!(watchdog.contains(&callsign));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_callsign_never_fires() {
        let mut watchdog = Watchdog::new("aircraft", Duration::from_secs(5));
        let callsign = Callsign::new("BAW12");
        watchdog.add_callsign(callsign.clone());
        assert!(watchdog.remove_callsign(&callsign));
        assert!(!watchdog.remove_callsign(&callsign));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(watchdog.check_timeouts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_of_unknown_callsign_does_not_arm() {
        let mut watchdog = Watchdog::new("aircraft", Duration::from_secs(5));
        watchdog.reset_callsign(&Callsign::new("UNKNOWN"));
        assert!(watchdog.is_empty());
    }
}
