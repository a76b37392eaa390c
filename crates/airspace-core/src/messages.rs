//! Parsers for the loosely structured payloads of inbound network replies.

use chrono::{DateTime, NaiveTime, Utc};

use crate::aircraft::AircraftIcao;
use crate::error::{AirspaceError, Result};
use crate::models::{Callsign, InformationMessage};

/// Shorter METAR messages are malformed.
pub const METAR_MIN_LEN: usize = 10;

/// FSInn custom packets carry at least this many data fields.
pub const FSINN_MIN_FIELDS: usize = 9;

pub const FSINN_REPLY_ID: &str = "FSIPI";
pub const FSINN_REQUEST_ID: &str = "FSIPIR";
const FSINN_PEER_TO_PEER_ID: &str = "FSIP2PR";

/// A METAR reply resolved to the airport it reports on.
#[derive(Debug, Clone, PartialEq)]
pub struct MetarReport {
    /// Upper-case airport ICAO code, the first four characters of the message
    pub airport_icao: String,
    /// Tower callsign derived from the airport, `<ICAO>_TWR`
    pub tower_callsign: Callsign,
    pub message: InformationMessage,
}

pub fn parse_metar(raw: &str) -> Result<MetarReport> {
    if raw.chars().count() < METAR_MIN_LEN {
        return Err(AirspaceError::MalformedMetar(raw.to_string()));
    }
    let airport_icao: String = raw.chars().take(4).collect::<String>().to_uppercase();
    Ok(MetarReport {
        tower_callsign: Callsign::tower_for_airport(&airport_icao),
        airport_icao,
        message: InformationMessage::metar(raw),
    })
}

/// Parse an ATIS logoff time `hhmm` (zulu) into a timestamp on the day of `today`.
pub fn parse_logoff_time(zulu_time: &str, today: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let invalid = || AirspaceError::InvalidZuluTime(zulu_time.to_string());
    if zulu_time.len() != 4 || !zulu_time.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: u32 = zulu_time[..2].parse().map_err(|_| invalid())?;
    let minutes: u32 = zulu_time[2..].parse().map_err(|_| invalid())?;
    let time = NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)?;
    Ok(today.date_naive().and_time(time).and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsinnKind {
    /// Peer answered with its own data
    Reply,
    /// Peer asks for our data and sends its own along
    Request,
}

/// Decoded FSInn custom packet.
#[derive(Debug, Clone, PartialEq)]
pub struct FsinnPacket {
    pub kind: FsinnKind,
    pub icao: AircraftIcao,
    pub model_string: String,
}

/// Decode a custom vendor packet.
///
/// `Ok(None)` means the packet is known but carries nothing for us.
pub fn parse_custom_packet(callsign: &Callsign, packet_id: &str, data: &[String]) -> Result<Option<FsinnPacket>> {
    let kind = if packet_id.eq_ignore_ascii_case(FSINN_REPLY_ID) {
        FsinnKind::Reply
    } else if packet_id.eq_ignore_ascii_case(FSINN_REQUEST_ID) {
        FsinnKind::Request
    } else if packet_id.eq_ignore_ascii_case(FSINN_PEER_TO_PEER_ID) {
        return Ok(None);
    } else {
        return Err(AirspaceError::UnknownCustomPacket {
            callsign: callsign.to_string(),
            packet_id: packet_id.to_string(),
        });
    };

    if data.len() < FSINN_MIN_FIELDS {
        return Err(AirspaceError::MalformedCustomPacket {
            callsign: callsign.to_string(),
            packet_id: packet_id.to_string(),
            reason: format!("{} fields, expected {}", data.len(), FSINN_MIN_FIELDS),
        });
    }

    Ok(Some(FsinnPacket {
        kind,
        icao: AircraftIcao::new(data[2].as_str(), data[7].as_str(), data[1].as_str()),
        model_string: data[8].trim().to_string(),
    }))
}

/// Data fields of an FSInn packet describing our own aircraft.
pub fn fsinn_fields(icao: &AircraftIcao, model_string: &str) -> Vec<String> {
    vec![
        "0".to_string(),
        icao.airline_designator.clone(),
        icao.aircraft_designator.clone(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        icao.combined_type.clone(),
        model_string.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn metar_resolves_airport_and_tower() {
        let report = parse_metar("KLBB 241753Z 20009KT 10SM CLR 33/M02 A2999").unwrap();
        assert_eq!(report.airport_icao, "KLBB");
        assert_eq!(report.tower_callsign, Callsign::new("KLBB_TWR"));
        assert!(report.message.text.starts_with("KLBB 241753Z"));
    }

    #[test]
    fn short_metar_is_malformed() {
        assert!(matches!(parse_metar("KLBB 2417"), Err(AirspaceError::MalformedMetar(_))));
    }

    #[test]
    fn logoff_time_lands_on_given_day() {
        let today = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let logoff = parse_logoff_time("2145", today).unwrap();
        assert_eq!(logoff.date_naive(), today.date_naive());
        assert_eq!((logoff.hour(), logoff.minute()), (21, 45));
    }

    #[test]
    fn bad_logoff_times_are_rejected() {
        let today = Utc::now();
        for value in ["945", "21:45", "2575", "ab12", ""] {
            assert!(parse_logoff_time(value, today).is_err(), "{value} should fail");
        }
    }

    #[test]
    fn fsinn_packet_fields_are_mapped() {
        let callsign = Callsign::new("BAW12");
        let icao = AircraftIcao::new("B744", "L4J", "BAW");
        let data = fsinn_fields(&icao, "PMDG 747 BA");

        let packet = parse_custom_packet(&callsign, "fsipir", &data).unwrap().unwrap();
        assert_eq!(packet.kind, FsinnKind::Request);
        assert_eq!(packet.icao, icao);
        assert_eq!(packet.model_string, "PMDG 747 BA");
    }

    #[test]
    fn fsinn_packet_with_too_few_fields_is_malformed() {
        let callsign = Callsign::new("BAW12");
        let data = vec!["0".to_string(), "BAW".to_string()];
        assert!(matches!(
            parse_custom_packet(&callsign, FSINN_REPLY_ID, &data),
            Err(AirspaceError::MalformedCustomPacket { .. })
        ));
        assert!(parse_custom_packet(&callsign, "FSIP2PR", &data).unwrap().is_none());
        assert!(matches!(
            parse_custom_packet(&callsign, "XYZ", &data),
            Err(AirspaceError::UnknownCustomPacket { .. })
        ));
    }
}
