//! 802.11 Frame structures and types
//!
//! This module provides Rust representations of IEEE 802.11 frame headers,
//! a parser for captured frames and builders for the management frames
//! the engine injects (deauthentication, authentication, association
//! request and beacon).

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, WirelessError};
use crate::ies::{self, RSN_WPA2_PSK_CCMP};

/// MAC address (6 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Broadcast address (FF:FF:FF:FF:FF:FF)
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// Zero/null address
    pub const ZERO: MacAddress = MacAddress([0x00; 6]);

    /// Create from bytes
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create from slice (must be 6 bytes)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != 6 {
            return Err(WirelessError::InvalidMac(format!(
                "Expected 6 bytes, got {}",
                slice.len()
            )));
        }
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Random locally administered unicast address
    pub fn random() -> Self {
        let mut bytes: [u8; 6] = rand::thread_rng().gen();
        bytes[0] = (bytes[0] & 0xFC) | 0x02;
        Self(bytes)
    }

    /// Get as byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if this is a broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Check if this is a multicast address (bit 0 of first octet set)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Check if this is a locally administered address (bit 1 of first octet set)
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Unicast station address, i.e. something we can register as a device
    pub fn is_station(&self) -> bool {
        !self.is_multicast() && *self != Self::ZERO
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = WirelessError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let sep = if s.contains('-') { '-' } else { ':' };
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(WirelessError::InvalidMac(format!(
                "Expected 6 octets separated by ':' or '-', got '{}'",
                s
            )));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(WirelessError::InvalidMac(format!(
                    "Invalid hex octet: '{}'",
                    part
                )));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| WirelessError::InvalidMac(format!("Invalid hex octet: '{}'", part)))?;
        }

        Ok(Self(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 802.11 Frame Type (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Management frames (beacons, probes, auth, deauth, etc.)
    Management = 0,
    /// Control frames (ACK, RTS, CTS, etc.)
    Control = 1,
    /// Data frames (actual payload)
    Data = 2,
    /// Extension (802.11ad)
    Extension = 3,
}

impl FrameType {
    /// Parse from frame control field
    pub fn from_frame_control(fc: u16) -> Self {
        match (fc >> 2) & 0x03 {
            0 => Self::Management,
            1 => Self::Control,
            2 => Self::Data,
            _ => Self::Extension,
        }
    }
}

/// 802.11 Frame Subtype (4 bits) - Management frames only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameSubtype {
    /// Association Request (subtype 0)
    AssociationRequest = 0,
    /// Association Response (subtype 1)
    AssociationResponse = 1,
    /// Reassociation Request (subtype 2)
    ReassociationRequest = 2,
    /// Reassociation Response (subtype 3)
    ReassociationResponse = 3,
    /// Probe Request (subtype 4)
    ProbeRequest = 4,
    /// Probe Response (subtype 5)
    ProbeResponse = 5,
    /// Beacon (subtype 8)
    Beacon = 8,
    /// Disassociation (subtype 10)
    Disassociation = 10,
    /// Authentication (subtype 11)
    Authentication = 11,
    /// Deauthentication (subtype 12)
    Deauthentication = 12,
    /// Action (subtype 13)
    Action = 13,
    /// Unknown subtype
    Unknown = 255,
}

impl FrameSubtype {
    /// Parse from frame control field (assumes management type)
    pub fn from_frame_control(fc: u16) -> Self {
        match ((fc >> 4) & 0x0F) as u8 {
            0 => Self::AssociationRequest,
            1 => Self::AssociationResponse,
            2 => Self::ReassociationRequest,
            3 => Self::ReassociationResponse,
            4 => Self::ProbeRequest,
            5 => Self::ProbeResponse,
            8 => Self::Beacon,
            10 => Self::Disassociation,
            11 => Self::Authentication,
            12 => Self::Deauthentication,
            13 => Self::Action,
            _ => Self::Unknown,
        }
    }

    /// Frame control value for a management frame of this subtype
    pub fn frame_control(self) -> FrameControl {
        FrameControl::new(((self as u16) & 0x0F) << 4)
    }
}

/// Deauthentication reason codes (IEEE 802.11-2016)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DeauthReason {
    /// Unspecified reason
    Unspecified = 1,
    /// Previous authentication no longer valid
    AuthNoLongerValid = 2,
    /// Deauthenticated because sending station is leaving
    StationLeaving = 3,
    /// Disassociated due to inactivity
    Inactivity = 4,
    /// Class 2 frame received from nonauthenticated STA
    Class2FromNonAuth = 6,
    /// Class 3 frame received from nonassociated STA
    Class3FromNonAssoc = 7,
}

impl DeauthReason {
    /// Get as u16 value
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// 802.11 Frame Control field (2 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    raw: u16,
}

impl FrameControl {
    const TO_DS: u16 = 0x0100;
    const FROM_DS: u16 = 0x0200;
    const PROTECTED: u16 = 0x4000;

    /// Wrap a raw (host order) frame control value
    pub fn new(raw: u16) -> Self {
        Self { raw }
    }

    /// Get frame type
    pub fn frame_type(&self) -> FrameType {
        FrameType::from_frame_control(self.raw)
    }

    /// Get frame subtype (management meaning)
    pub fn subtype(&self) -> FrameSubtype {
        FrameSubtype::from_frame_control(self.raw)
    }

    /// Raw 4 bit subtype, independent of the frame type
    pub fn subtype_bits(&self) -> u8 {
        ((self.raw >> 4) & 0x0F) as u8
    }

    /// Frame travels towards the distribution system (client -> AP)
    pub fn to_ds(&self) -> bool {
        self.raw & Self::TO_DS != 0
    }

    /// Frame comes from the distribution system (AP -> client)
    pub fn from_ds(&self) -> bool {
        self.raw & Self::FROM_DS != 0
    }

    /// Payload is encrypted
    pub fn protected(&self) -> bool {
        self.raw & Self::PROTECTED != 0
    }

    /// QoS data subtype (bit 3 of the subtype)
    pub fn is_qos_data(&self) -> bool {
        self.frame_type() == FrameType::Data && self.subtype_bits() & 0x08 != 0
    }

    /// Get raw value
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// To little-endian bytes
    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.raw.to_le_bytes()
    }
}

/// IEEE 802.11 MAC header used for the management frames we build (24 bytes)
#[derive(Debug, Clone)]
pub struct Ieee80211Header {
    frame_control: FrameControl,
    addr1: MacAddress,
    addr2: MacAddress,
    addr3: MacAddress,
    sequence: u16,
}

impl Ieee80211Header {
    /// Header size in bytes
    pub const SIZE: usize = 24;

    /// Create a new header
    pub fn new(
        frame_control: FrameControl,
        dest: MacAddress,
        src: MacAddress,
        bssid: MacAddress,
    ) -> Self {
        Self {
            frame_control,
            addr1: dest,
            addr2: src,
            addr3: bssid,
            sequence: 0,
        }
    }

    /// Set sequence number
    pub fn with_sequence(mut self, seq: u16) -> Self {
        self.sequence = seq;
        self
    }

    /// Append the encoded header to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frame_control.to_le_bytes());
        // Standard duration value
        out.extend_from_slice(&[0x3A, 0x01]);
        out.extend_from_slice(&self.addr1.0);
        out.extend_from_slice(&self.addr2.0);
        out.extend_from_slice(&self.addr3.0);
        // Sequence number is in bits 4-15, fragment in bits 0-3
        out.extend_from_slice(&((self.sequence << 4) & 0xFFF0).to_le_bytes());
    }
}

/// Complete Deauthentication Frame (26 bytes, no radiotap)
#[derive(Debug, Clone)]
pub struct DeauthFrame {
    header: Ieee80211Header,
    reason: DeauthReason,
}

impl DeauthFrame {
    /// Total frame size (without radiotap)
    pub const SIZE: usize = Ieee80211Header::SIZE + 2;

    /// Create a new deauth frame
    pub fn new(dest: MacAddress, src: MacAddress, bssid: MacAddress, reason: DeauthReason) -> Self {
        Self {
            header: Ieee80211Header::new(
                FrameSubtype::Deauthentication.frame_control(),
                dest,
                src,
                bssid,
            ),
            reason,
        }
    }

    /// Deauth pretending to be from the AP
    pub fn from_ap(bssid: MacAddress, client: MacAddress, reason: DeauthReason) -> Self {
        Self::new(client, bssid, bssid, reason)
    }

    /// Deauth pretending to be from the client
    pub fn from_client(bssid: MacAddress, client: MacAddress, reason: DeauthReason) -> Self {
        Self::new(bssid, client, bssid, reason)
    }

    /// Set sequence number
    pub fn with_sequence(mut self, seq: u16) -> Self {
        self.header = self.header.with_sequence(seq);
        self
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        self.header.write_to(&mut bytes);
        bytes.extend_from_slice(&self.reason.as_u16().to_le_bytes());
        bytes
    }
}

/// Open-system authentication request (station -> AP)
#[derive(Debug, Clone)]
pub struct AuthenticationFrame {
    header: Ieee80211Header,
}

impl AuthenticationFrame {
    /// Authentication request from `station` to the AP `bssid`
    pub fn open_system(bssid: MacAddress, station: MacAddress, seq: u16) -> Self {
        Self {
            header: Ieee80211Header::new(
                FrameSubtype::Authentication.frame_control(),
                bssid,
                station,
                bssid,
            )
            .with_sequence(seq),
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Ieee80211Header::SIZE + 6);
        self.header.write_to(&mut bytes);
        // Algorithm: open system, transaction sequence 1, status success
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes
    }
}

/// Association request advertising WPA2-PSK/CCMP, enough for the AP to
/// answer with EAPOL message 1 (which carries the PMKID when the AP has one)
#[derive(Debug, Clone)]
pub struct AssociationRequest {
    header: Ieee80211Header,
    ssid: String,
}

impl AssociationRequest {
    /// Association request from `station` to `bssid` for `ssid`
    pub fn new(bssid: MacAddress, station: MacAddress, ssid: &str, seq: u16) -> Self {
        Self {
            header: Ieee80211Header::new(
                FrameSubtype::AssociationRequest.frame_control(),
                bssid,
                station,
                bssid,
            )
            .with_sequence(seq),
            ssid: ssid.to_string(),
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Ieee80211Header::SIZE + 64);
        self.header.write_to(&mut bytes);
        // Capabilities: ESS + privacy, listen interval 10
        bytes.extend_from_slice(&0x0011u16.to_le_bytes());
        bytes.extend_from_slice(&0x000Au16.to_le_bytes());
        ies::write_ie(&mut bytes, ies::IE_SSID, self.ssid.as_bytes());
        ies::write_ie(&mut bytes, ies::IE_RATES, &ies::BASIC_RATES);
        ies::write_ie(&mut bytes, ies::IE_RSN, &RSN_WPA2_PSK_CCMP);
        bytes
    }
}

/// Beacon frame for the rogue access point
#[derive(Debug, Clone)]
pub struct BeaconFrame {
    header: Ieee80211Header,
    ssid: String,
    channel: u8,
    encryption: bool,
    interval_tu: u16,
}

impl BeaconFrame {
    /// Beacon interval in time units (1 TU = 1024us)
    pub const DEFAULT_INTERVAL_TU: u16 = 100;

    /// Beacon for `ssid` announced by `bssid` on `channel`
    pub fn new(bssid: MacAddress, ssid: &str, channel: u8, encryption: bool, seq: u16) -> Self {
        Self {
            header: Ieee80211Header::new(
                FrameSubtype::Beacon.frame_control(),
                MacAddress::BROADCAST,
                bssid,
                bssid,
            )
            .with_sequence(seq),
            ssid: ssid.to_string(),
            channel,
            encryption,
            interval_tu: Self::DEFAULT_INTERVAL_TU,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Ieee80211Header::SIZE + 96);
        self.header.write_to(&mut bytes);
        // Timestamp is filled in by the hardware on most drivers
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&self.interval_tu.to_le_bytes());
        let mut capabilities: u16 = 0x0001;
        if self.encryption {
            capabilities |= ies::CAP_PRIVACY;
        }
        bytes.extend_from_slice(&capabilities.to_le_bytes());
        ies::write_ie(&mut bytes, ies::IE_SSID, self.ssid.as_bytes());
        ies::write_ie(&mut bytes, ies::IE_RATES, &ies::BASIC_RATES);
        ies::write_ie(&mut bytes, ies::IE_DS_PARAMS, &[self.channel]);
        // TIM: DTIM count 0, period 1, no buffered traffic
        ies::write_ie(&mut bytes, ies::IE_TIM, &[0x00, 0x01, 0x00, 0x00]);
        if self.encryption {
            ies::write_ie(&mut bytes, ies::IE_RSN, &RSN_WPA2_PSK_CCMP);
        }
        bytes
    }
}

/// Generic 802.11 frame wrapper for parsing captured packets
#[derive(Debug, Clone)]
pub struct Ieee80211Frame {
    /// Raw frame data, FCS stripped
    data: Vec<u8>,
    /// Trailing FCS, when the capture carried one
    fcs: Option<u32>,
    /// Parsed frame control
    frame_control: FrameControl,
}

impl Ieee80211Frame {
    /// Minimal header of any frame (frame control, duration, address 1)
    const MIN_LEN: usize = 10;

    /// Parse from raw bytes (without radiotap header).
    ///
    /// When `has_fcs` is set the last four bytes are split off as the frame
    /// check sequence.
    pub fn parse(data: &[u8], has_fcs: bool) -> Result<Self> {
        let (body, fcs) = if has_fcs {
            if data.len() < Self::MIN_LEN + 4 {
                return Err(WirelessError::InvalidFrame("Frame too short for FCS".into()));
            }
            let split = data.len() - 4;
            (&data[..split], Some(LittleEndian::read_u32(&data[split..])))
        } else {
            (data, None)
        };

        if body.len() < Self::MIN_LEN {
            return Err(WirelessError::InvalidFrame("Frame too short".into()));
        }

        let frame_control = FrameControl::new(LittleEndian::read_u16(&body[0..2]));
        if matches!(
            frame_control.frame_type(),
            FrameType::Management | FrameType::Data
        ) && body.len() < Ieee80211Header::SIZE
        {
            return Err(WirelessError::InvalidFrame(format!(
                "Truncated {:?} header",
                frame_control.frame_type()
            )));
        }

        Ok(Self {
            data: body.to_vec(),
            fcs,
            frame_control,
        })
    }

    /// Frame control
    pub fn frame_control(&self) -> FrameControl {
        self.frame_control
    }

    /// Get frame type
    pub fn frame_type(&self) -> FrameType {
        self.frame_control.frame_type()
    }

    /// Get frame subtype
    pub fn subtype(&self) -> FrameSubtype {
        self.frame_control.subtype()
    }

    /// Check if this is a management frame of the given subtype
    pub fn is_management(&self, subtype: FrameSubtype) -> bool {
        self.frame_type() == FrameType::Management && self.subtype() == subtype
    }

    /// Check the frame check sequence. Captures without FCS have nothing to
    /// verify and are reported valid.
    pub fn checksum_valid(&self) -> bool {
        match self.fcs {
            Some(expected) => crc32(&self.data) == expected,
            None => true,
        }
    }

    /// Address 1 (receiver)
    pub fn address1(&self) -> Option<MacAddress> {
        self.address_at(4)
    }

    /// Address 2 (transmitter)
    pub fn address2(&self) -> Option<MacAddress> {
        self.address_at(10)
    }

    /// Address 3 (BSSID for management frames)
    pub fn address3(&self) -> Option<MacAddress> {
        self.address_at(16)
    }

    fn address_at(&self, offset: usize) -> Option<MacAddress> {
        self.data
            .get(offset..offset + 6)
            .and_then(|s| MacAddress::from_slice(s).ok())
    }

    /// BSSID according to the DS bits
    pub fn bssid(&self) -> Option<MacAddress> {
        match (self.frame_control.to_ds(), self.frame_control.from_ds()) {
            (false, false) => self.address3(),
            (true, false) => self.address1(),
            (false, true) => self.address2(),
            (true, true) => None,
        }
    }

    /// Source (transmitting station) of the frame
    pub fn source(&self) -> Option<MacAddress> {
        self.address2()
    }

    /// Destination (receiving station) of the frame
    pub fn destination(&self) -> Option<MacAddress> {
        self.address1()
    }

    /// Header length for management and data frames
    fn header_len(&self) -> usize {
        let mut len = Ieee80211Header::SIZE;
        if self.frame_type() == FrameType::Data {
            if self.frame_control.to_ds() && self.frame_control.from_ds() {
                len += 6;
            }
            if self.frame_control.is_qos_data() {
                len += 2;
            }
        }
        len
    }

    /// Frame body after the MAC header (FCS excluded)
    pub fn body(&self) -> &[u8] {
        self.data.get(self.header_len()..).unwrap_or(&[])
    }

    /// Information elements of beacons, probe requests/responses and
    /// association frames
    pub fn information_elements(&self) -> &[u8] {
        if self.frame_type() != FrameType::Management {
            return &[];
        }
        let fixed = match self.subtype() {
            FrameSubtype::Beacon | FrameSubtype::ProbeResponse => 12,
            FrameSubtype::AssociationRequest => 4,
            FrameSubtype::ReassociationRequest => 10,
            FrameSubtype::AssociationResponse | FrameSubtype::ReassociationResponse => 6,
            FrameSubtype::ProbeRequest => 0,
            _ => return &[],
        };
        self.body().get(fixed..).unwrap_or(&[])
    }

    /// Capability field of beacons and probe responses
    pub fn capabilities(&self) -> Option<u16> {
        if !self.is_management(FrameSubtype::Beacon)
            && !self.is_management(FrameSubtype::ProbeResponse)
        {
            return None;
        }
        self.body().get(10..12).map(LittleEndian::read_u16)
    }

    /// Payload of an unencrypted LLC/SNAP data frame carrying EAPOL
    pub fn eapol_payload(&self) -> Option<&[u8]> {
        if self.frame_type() != FrameType::Data || self.frame_control.protected() {
            return None;
        }
        let body = self.body();
        if body.len() < 8 {
            return None;
        }
        // LLC/SNAP: AA AA 03 00 00 00 88 8E
        if body[..6] == [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00] && body[6..8] == [0x88, 0x8E] {
            Some(&body[8..])
        } else {
            None
        }
    }

    /// Get raw frame data (FCS stripped)
    pub fn raw(&self) -> &[u8] {
        &self.data
    }
}

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

const CRC32_TABLE: [u32; 256] = crc32_table();

/// CRC-32 (IEEE 802.3), the polynomial used by the 802.11 FCS
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    crc ^ 0xFFFF_FFFF
}
