//! Frame classification
//!
//! Turns one captured packet into zero or more typed events. The classifier
//! is stateless: deciding whether an event touches a known station is left
//! to the dispatch loop.

use std::collections::BTreeMap;

use crate::frames::{FrameSubtype, FrameType, Ieee80211Frame, MacAddress};
use crate::handshake::{parse_eapol_key, EapolKey};
use crate::ies::{self, EncryptionInfo};
use crate::radiotap::{channel_to_frequency, RadiotapInfo};

/// A packet split into its radiotap metadata and 802.11 frame
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub radiotap: RadiotapInfo,
    pub frame: Ieee80211Frame,
    /// Length of the whole captured packet
    pub len: usize,
}

impl DecodedFrame {
    /// Split a captured packet. Unparsable input yields `None`.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        let radiotap = RadiotapInfo::parse(packet).ok()?;
        let frame = Ieee80211Frame::parse(&packet[radiotap.header_len..], radiotap.has_fcs()).ok()?;
        Some(Self {
            radiotap,
            frame,
            len: packet.len(),
        })
    }

    /// Frame passed the driver's and our own FCS check
    pub fn checksum_valid(&self) -> bool {
        !self.radiotap.bad_fcs() && self.frame.checksum_valid()
    }

    /// Signal strength, or the lowest possible value when not reported
    pub fn rssi(&self) -> i8 {
        self.radiotap.signal_dbm.unwrap_or(i8::MIN)
    }
}

/// Facts extracted from one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Beacon or probe response from an access point
    AccessPoint {
        bssid: MacAddress,
        essid: Option<String>,
        channel: Option<u8>,
        frequency: Option<u16>,
        rssi: i8,
        encryption: EncryptionInfo,
        wps: BTreeMap<String, String>,
        beacon: bool,
    },
    /// Station probing for a network
    Probe {
        station: MacAddress,
        essid: Option<String>,
        rssi: i8,
    },
    /// Station exchanging data with an access point
    Client {
        station: MacAddress,
        bssid: MacAddress,
        rssi: i8,
        frequency: Option<u16>,
    },
    /// Bytes of a data frame
    Traffic {
        source: MacAddress,
        destination: MacAddress,
        bytes: u64,
    },
    /// EAPOL-Key frame of a 4-way handshake
    Handshake {
        bssid: MacAddress,
        station: MacAddress,
        key: EapolKey,
    },
}

/// Stateless frame classifier
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    /// Stations weaker than this (dBm) are not reported
    pub min_rssi: i32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self { min_rssi: -200 }
    }
}

impl Classifier {
    pub fn new(min_rssi: i32) -> Self {
        Self { min_rssi }
    }

    fn strong_enough(&self, rssi: i8) -> bool {
        rssi as i32 >= self.min_rssi
    }

    /// Extract events from a checksum-valid frame
    pub fn classify(&self, decoded: &DecodedFrame) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        match decoded.frame.frame_type() {
            FrameType::Management => self.management(decoded, &mut events),
            FrameType::Data => self.data(decoded, &mut events),
            _ => {}
        }
        events
    }

    fn management(&self, decoded: &DecodedFrame, events: &mut Vec<FrameEvent>) {
        let frame = &decoded.frame;
        let rssi = decoded.rssi();
        match frame.subtype() {
            FrameSubtype::Beacon | FrameSubtype::ProbeResponse => {
                let Some(bssid) = frame.address3().filter(MacAddress::is_station) else {
                    return;
                };
                if !self.strong_enough(rssi) {
                    return;
                }
                let elements = ies::parse(frame.information_elements());
                let channel = elements.ds_channel().or(decoded.radiotap.channel);
                let frequency = decoded
                    .radiotap
                    .frequency
                    .or_else(|| channel.and_then(channel_to_frequency));
                events.push(FrameEvent::AccessPoint {
                    bssid,
                    essid: elements.ssid(),
                    channel,
                    frequency,
                    rssi,
                    encryption: elements.encryption(frame.capabilities().unwrap_or(0)),
                    wps: elements.wps(),
                    beacon: frame.subtype() == FrameSubtype::Beacon,
                });
            }
            FrameSubtype::ProbeRequest => {
                let Some(station) = frame.source().filter(MacAddress::is_station) else {
                    return;
                };
                if !self.strong_enough(rssi) {
                    return;
                }
                let elements = ies::parse(frame.information_elements());
                events.push(FrameEvent::Probe {
                    station,
                    essid: elements.ssid(),
                    rssi,
                });
            }
            _ => {}
        }
    }

    fn data(&self, decoded: &DecodedFrame, events: &mut Vec<FrameEvent>) {
        let frame = &decoded.frame;
        let fc = frame.frame_control();
        let (Some(destination), Some(source)) = (frame.destination(), frame.source()) else {
            return;
        };

        // Station side of the exchange: receiver when coming from the AP
        let client = match (fc.to_ds(), fc.from_ds()) {
            (true, false) => frame.bssid().map(|bssid| (source, bssid)),
            (false, true) => frame.bssid().map(|bssid| (destination, bssid)),
            _ => None,
        };

        if let Some((station, bssid)) = client {
            if station.is_station() && station != bssid && self.strong_enough(decoded.rssi()) {
                events.push(FrameEvent::Client {
                    station,
                    bssid,
                    rssi: decoded.rssi(),
                    frequency: decoded.radiotap.frequency,
                });
            }
        }

        events.push(FrameEvent::Traffic {
            source,
            destination,
            bytes: decoded.len as u64,
        });

        if let Some(key) = frame.eapol_payload().and_then(parse_eapol_key) {
            let (station, bssid) = match client {
                Some(pair) => pair,
                None => {
                    // WDS or ad-hoc EAPOL: AP sends messages 1 and 3
                    if key.message % 2 == 1 {
                        (destination, source)
                    } else {
                        (source, destination)
                    }
                }
            };
            events.push(FrameEvent::Handshake {
                bssid,
                station,
                key,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::BeaconFrame;
    use crate::radiotap::FLAG_FCS;

    /// flags + channel + signal radiotap header
    fn radiotap(freq: u16, signal: i8, flags: u8) -> Vec<u8> {
        let mut rt = vec![0x00, 0x00, 0x0F, 0x00, 0x2A, 0x00, 0x00, 0x00, flags, 0x00];
        rt.extend_from_slice(&freq.to_le_bytes());
        rt.extend_from_slice(&[0xA0, 0x00]);
        rt.push(signal as u8);
        rt
    }

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_beacon_event() {
        let bssid = mac("AA:AA:AA:AA:AA:AA");
        let mut packet = radiotap(2437, -50, 0);
        packet.extend_from_slice(&BeaconFrame::new(bssid, "corp", 6, true, 0).to_bytes());

        let decoded = DecodedFrame::decode(&packet).unwrap();
        assert!(decoded.checksum_valid());
        let events = Classifier::default().classify(&decoded);
        assert_eq!(events.len(), 1);
        match &events[0] {
            FrameEvent::AccessPoint {
                bssid: b,
                essid,
                channel,
                frequency,
                encryption,
                beacon,
                ..
            } => {
                assert_eq!(*b, bssid);
                assert_eq!(essid.as_deref(), Some("corp"));
                assert_eq!(*channel, Some(6));
                assert_eq!(*frequency, Some(2437));
                assert_eq!(encryption.encryption, "WPA2");
                assert!(*beacon);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_min_rssi_filters_weak_beacons() {
        let mut packet = radiotap(2437, -90, 0);
        packet.extend_from_slice(
            &BeaconFrame::new(mac("AA:AA:AA:AA:AA:AA"), "far", 6, false, 0).to_bytes(),
        );
        let decoded = DecodedFrame::decode(&packet).unwrap();
        assert!(Classifier::new(-80).classify(&decoded).is_empty());
        assert_eq!(Classifier::new(-95).classify(&decoded).len(), 1);
    }

    #[test]
    fn test_data_frame_events() {
        let ap = mac("AA:AA:AA:AA:AA:AA");
        let client = mac("BB:BB:BB:BB:BB:BB");
        let mut packet = radiotap(2437, -40, 0);
        packet.extend_from_slice(&[0x08, 0x02, 0x00, 0x00]);
        packet.extend_from_slice(&client.0);
        packet.extend_from_slice(&ap.0);
        packet.extend_from_slice(&ap.0);
        packet.extend_from_slice(&[0x00, 0x00]);
        packet.extend_from_slice(&[0u8; 20]);

        let decoded = DecodedFrame::decode(&packet).unwrap();
        let events = Classifier::default().classify(&decoded);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            FrameEvent::Client { station, bssid, .. } if station == client && bssid == ap
        ));
        assert_eq!(
            events[1],
            FrameEvent::Traffic {
                source: ap,
                destination: client,
                bytes: packet.len() as u64,
            }
        );
    }

    #[test]
    fn test_bad_fcs_detected() {
        let mut packet = radiotap(2412, -40, FLAG_FCS);
        let frame = BeaconFrame::new(mac("AA:AA:AA:AA:AA:AA"), "x", 1, false, 0).to_bytes();
        packet.extend_from_slice(&frame);
        packet.extend_from_slice(&(crate::frames::crc32(&frame) ^ 1).to_le_bytes());

        let decoded = DecodedFrame::decode(&packet).unwrap();
        assert!(!decoded.checksum_valid());
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(DecodedFrame::decode(&[0x00, 0x00, 0x08]).is_none());
        assert!(DecodedFrame::decode(&[0x00, 0x00, 0x08, 0x00, 0, 0, 0, 0, 0x80]).is_none());
    }
}
