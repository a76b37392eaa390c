//! Outbound command facade towards the network transport.
//!
//! One method per query type, sent exactly once per call. Failures belong to
//! the transport; callers never see them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use airspace_core::Callsign;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub trait NetworkCommands: Send + Sync {
    /// Whether the transport currently has a live session.
    fn is_connected(&self) -> bool;

    fn send_frequency_query(&self, callsign: &Callsign);
    fn send_real_name_query(&self, callsign: &Callsign);
    fn send_capabilities_query(&self, callsign: &Callsign);
    fn send_server_query(&self, callsign: &Callsign);
    fn send_icao_codes_query(&self, callsign: &Callsign);
    fn send_atis_query(&self, callsign: &Callsign);
    fn send_flight_plan_query(&self, callsign: &Callsign);
    fn send_metar_query(&self, airport_icao: &str);
    fn send_aircraft_config_query(&self, callsign: &Callsign);
    fn send_custom_packet(&self, callsign: &Callsign, packet_id: &str, fields: Vec<String>);
}

/// An outbound command as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OutboundCommand {
    FrequencyQuery { callsign: Callsign },
    RealNameQuery { callsign: Callsign },
    CapabilitiesQuery { callsign: Callsign },
    ServerQuery { callsign: Callsign },
    IcaoCodesQuery { callsign: Callsign },
    AtisQuery { callsign: Callsign },
    FlightPlanQuery { callsign: Callsign },
    MetarQuery { airport_icao: String },
    AircraftConfigQuery { callsign: Callsign },
    CustomPacket {
        callsign: Callsign,
        packet_id: String,
        fields: Vec<String>,
    },
}

/// Forwards commands into an unbounded channel drained by the transport.
#[derive(Clone)]
pub struct ChannelCommands {
    tx: mpsc::UnboundedSender<OutboundCommand>,
    connected: Arc<AtomicBool>,
}

impl ChannelCommands {
    pub fn new(connected: bool) -> (Self, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let commands = Self {
            tx,
            connected: Arc::new(AtomicBool::new(connected)),
        };
        (commands, rx)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn send(&self, command: OutboundCommand) {
        if let Err(err) = self.tx.send(command) {
            tracing::warn!("Dropping outbound command, transport gone: {:?}", err.0);
        }
    }
}

impl NetworkCommands for ChannelCommands {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_frequency_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::FrequencyQuery { callsign: callsign.clone() });
    }

    fn send_real_name_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::RealNameQuery { callsign: callsign.clone() });
    }

    fn send_capabilities_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::CapabilitiesQuery { callsign: callsign.clone() });
    }

    fn send_server_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::ServerQuery { callsign: callsign.clone() });
    }

    fn send_icao_codes_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::IcaoCodesQuery { callsign: callsign.clone() });
    }

    fn send_atis_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::AtisQuery { callsign: callsign.clone() });
    }

    fn send_flight_plan_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::FlightPlanQuery { callsign: callsign.clone() });
    }

    fn send_metar_query(&self, airport_icao: &str) {
        self.send(OutboundCommand::MetarQuery {
            airport_icao: airport_icao.to_uppercase(),
        });
    }

    fn send_aircraft_config_query(&self, callsign: &Callsign) {
        self.send(OutboundCommand::AircraftConfigQuery { callsign: callsign.clone() });
    }

    fn send_custom_packet(&self, callsign: &Callsign, packet_id: &str, fields: Vec<String>) {
        self.send(OutboundCommand::CustomPacket {
            callsign: callsign.clone(),
            packet_id: packet_id.to_string(),
            fields,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_forwarded_in_order() {
        let (commands, mut rx) = ChannelCommands::new(true);
        let callsign = Callsign::new("AFR11FW");
        commands.send_icao_codes_query(&callsign);
        commands.send_metar_query("klbb");

        assert_eq!(rx.try_recv().ok(), Some(OutboundCommand::IcaoCodesQuery { callsign }));
        assert_eq!(
            rx.try_recv().ok(),
            Some(OutboundCommand::MetarQuery {
                airport_icao: "KLBB".to_string()
            })
        );
    }

    #[test]
    fn connection_flag_is_shared_between_clones() {
        let (commands, _rx) = ChannelCommands::new(false);
        let clone = commands.clone();
        clone.set_connected(true);
        assert!(commands.is_connected());
    }

    #[test]
    fn send_after_receiver_dropped_does_not_panic() {
        let (commands, rx) = ChannelCommands::new(true);
        drop(rx);
        commands.send_server_query(&Callsign::new("DLH123"));
    }

    #[test]
    fn commands_serialize_with_tag() {
        let json = serde_json::to_value(OutboundCommand::ServerQuery {
            callsign: Callsign::new("dlh123"),
        })
        .unwrap();
        assert_eq!(json["command"], "server_query");
        assert_eq!(json["callsign"], "DLH123");
    }
}
