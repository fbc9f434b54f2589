//! Radiotap header handling for packet injection and capture
//!
//! Radiotap is the de-facto standard header prepended to 802.11 frames
//! when injecting or capturing in monitor mode.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, WirelessError};

/// Radiotap header for injection
#[derive(Debug, Clone)]
pub struct RadiotapHeader {
    data: Vec<u8>,
}

impl RadiotapHeader {
    /// Radiotap header with TX flags for injection
    pub fn for_injection() -> Self {
        // Present flags: bit 15 = TX flags
        // TX flags: 0x0008 = NO_ACK (don't wait for acknowledgment)
        Self {
            data: vec![
                0x00, // Header revision
                0x00, // Header pad
                0x0A, 0x00, // Header length (10 bytes, LE)
                0x00, 0x80, 0x00, 0x00, // Present flags: TX flags (bit 15)
                0x08, 0x00, // TX flags: NO_ACK
            ],
        }
    }

    /// Get header length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if header is empty (shouldn't happen)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get as byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Prepend this header to an 802.11 frame
    pub fn wrap(&self, frame: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(self.len() + frame.len());
        packet.extend_from_slice(&self.data);
        packet.extend_from_slice(frame);
        packet
    }
}

/// Radiotap present flags
#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum RadiotapField {
    /// TSFT (timestamp)
    Tsft = 0,
    /// Flags
    Flags = 1,
    /// Data rate
    Rate = 2,
    /// Channel frequency and flags
    Channel = 3,
    /// FHSS hop set and pattern
    Fhss = 4,
    /// dBm antenna signal
    AntennaSignal = 5,
    /// dBm antenna noise
    AntennaNoise = 6,
    /// Lock quality
    LockQuality = 7,
    /// TX attenuation
    TxAttenuation = 8,
    /// TX attenuation (dB)
    TxAttenuationDb = 9,
    /// TX power (dBm)
    TxPower = 10,
    /// Antenna index
    Antenna = 11,
}

impl RadiotapField {
    const ORDERED: [RadiotapField; 12] = [
        Self::Tsft,
        Self::Flags,
        Self::Rate,
        Self::Channel,
        Self::Fhss,
        Self::AntennaSignal,
        Self::AntennaNoise,
        Self::LockQuality,
        Self::TxAttenuation,
        Self::TxAttenuationDb,
        Self::TxPower,
        Self::Antenna,
    ];

    /// (alignment, size) in bytes
    fn layout(self) -> (usize, usize) {
        match self {
            Self::Tsft => (8, 8),
            Self::Channel => (2, 4),
            Self::Fhss => (1, 2),
            Self::LockQuality | Self::TxAttenuation | Self::TxAttenuationDb => (2, 2),
            _ => (1, 1),
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Radiotap flags: frame includes FCS
pub const FLAG_FCS: u8 = 0x10;
/// Radiotap flags: frame failed FCS check
pub const FLAG_BAD_FCS: u8 = 0x40;

const PRESENT_EXT: u32 = 1 << 31;

/// Convert WiFi channel number to frequency in MHz
pub fn channel_to_frequency(channel: u8) -> Option<u16> {
    match channel {
        // 2.4 GHz band
        1..=13 => Some(2407 + (channel as u16) * 5),
        14 => Some(2484),
        // 5 GHz band
        32..=177 => Some(5000 + (channel as u16) * 5),
        _ => None,
    }
}

/// Convert frequency in MHz to WiFi channel number
pub fn frequency_to_channel(freq: u16) -> Option<u8> {
    match freq {
        2412..=2472 => Some(((freq - 2407) / 5) as u8),
        2484 => Some(14),
        5160..=5885 => Some(((freq - 5000) / 5) as u8),
        _ => None,
    }
}

/// Parsed radiotap information from captured packet
#[derive(Debug, Clone, Default)]
pub struct RadiotapInfo {
    /// Total radiotap header length; the 802.11 frame starts here
    pub header_len: usize,
    /// Radiotap flags field
    pub flags: u8,
    /// Signal strength in dBm
    pub signal_dbm: Option<i8>,
    /// Noise in dBm
    pub noise_dbm: Option<i8>,
    /// Data rate in 500kbps units
    pub rate: Option<u8>,
    /// Channel frequency in MHz
    pub frequency: Option<u16>,
    /// Channel number (derived from frequency)
    pub channel: Option<u8>,
    /// Antenna index
    pub antenna: Option<u8>,
}

impl RadiotapInfo {
    /// Parse the radiotap header at the start of a captured packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(WirelessError::InvalidFrame("Radiotap header too short".into()));
        }

        if data[0] != 0 {
            return Err(WirelessError::InvalidFrame(format!(
                "Unknown radiotap version: {}",
                data[0]
            )));
        }

        let len = LittleEndian::read_u16(&data[2..4]) as usize;
        if len < 8 || data.len() < len {
            return Err(WirelessError::InvalidFrame(format!(
                "Radiotap header length {} exceeds data length {}",
                len,
                data.len()
            )));
        }
        let header = &data[..len];

        let present = LittleEndian::read_u32(&header[4..8]);
        // Skip extended present bitmaps
        let mut offset = 8usize;
        let mut word = present;
        while word & PRESENT_EXT != 0 {
            if offset + 4 > len {
                return Err(WirelessError::InvalidFrame(
                    "Truncated radiotap present bitmap".into(),
                ));
            }
            word = LittleEndian::read_u32(&header[offset..offset + 4]);
            offset += 4;
        }

        let mut info = Self {
            header_len: len,
            ..Self::default()
        };

        for field in RadiotapField::ORDERED {
            if present & field.bit() == 0 {
                continue;
            }
            let (align, size) = field.layout();
            offset = (offset + align - 1) & !(align - 1);
            let Some(value) = header.get(offset..offset + size) else {
                break;
            };
            match field {
                RadiotapField::Flags => info.flags = value[0],
                RadiotapField::Rate => info.rate = Some(value[0]),
                RadiotapField::Channel => {
                    let freq = LittleEndian::read_u16(&value[0..2]);
                    info.frequency = Some(freq);
                    info.channel = frequency_to_channel(freq);
                }
                RadiotapField::AntennaSignal => info.signal_dbm = Some(value[0] as i8),
                RadiotapField::AntennaNoise => info.noise_dbm = Some(value[0] as i8),
                RadiotapField::Antenna => info.antenna = Some(value[0]),
                _ => {}
            }
            offset += size;
        }

        Ok(info)
    }

    /// The 802.11 frame carries a trailing FCS
    pub fn has_fcs(&self) -> bool {
        self.flags & FLAG_FCS != 0
    }

    /// The driver already flagged this frame as corrupt
    pub fn bad_fcs(&self) -> bool {
        self.flags & FLAG_BAD_FCS != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_conversion() {
        assert_eq!(channel_to_frequency(1), Some(2412));
        assert_eq!(channel_to_frequency(6), Some(2437));
        assert_eq!(channel_to_frequency(14), Some(2484));
        assert_eq!(channel_to_frequency(36), Some(5180));
        assert_eq!(channel_to_frequency(0), None);
        assert_eq!(channel_to_frequency(200), None);

        assert_eq!(frequency_to_channel(2412), Some(1));
        assert_eq!(frequency_to_channel(5180), Some(36));
        assert_eq!(frequency_to_channel(1000), None);
    }

    #[test]
    fn test_parse_aligned_fields() {
        // TSFT + flags + rate + channel + signal
        let data = [
            0x00, 0x00, 0x17, 0x00, // version, pad, len 23
            0x2F, 0x00, 0x00, 0x00, // present: tsft, flags, rate, channel, signal
            1, 2, 3, 4, 5, 6, 7, 8, // tsft
            FLAG_FCS, // flags
            0x02, // rate
            0x85, 0x09, 0xA0, 0x00, // 2437 MHz
            0xC4, // -60 dBm
            0x00, // padding to header length
        ];
        let info = RadiotapInfo::parse(&data[..]).unwrap();
        assert_eq!(info.header_len, 23);
        assert!(info.has_fcs());
        assert!(!info.bad_fcs());
        assert_eq!(info.rate, Some(2));
        assert_eq!(info.frequency, Some(2437));
        assert_eq!(info.channel, Some(6));
        assert_eq!(info.signal_dbm, Some(-60));
    }

    #[test]
    fn test_parse_channel_alignment_after_flags() {
        // flags (1 byte) then channel aligned to 2
        let data = [
            0x00, 0x00, 0x0E, 0x00, 0x0A, 0x00, 0x00, 0x00, FLAG_BAD_FCS, 0x00, 0x6C, 0x09, 0xA0,
            0x00,
        ];
        let info = RadiotapInfo::parse(&data[..]).unwrap();
        assert!(info.bad_fcs());
        assert_eq!(info.frequency, Some(2412));
        assert_eq!(info.channel, Some(1));
    }

    #[test]
    fn test_reject_bad_headers() {
        assert!(RadiotapInfo::parse(&[0x00, 0x00]).is_err());
        assert!(RadiotapInfo::parse(&[0x01, 0x00, 0x08, 0x00, 0, 0, 0, 0]).is_err());
        assert!(RadiotapInfo::parse(&[0x00, 0x00, 0x20, 0x00, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_injection_header() {
        let header = RadiotapHeader::for_injection();
        let info = RadiotapInfo::parse(header.as_bytes()).unwrap();
        assert_eq!(info.header_len, header.len());
        assert_eq!(header.wrap(&[0xC0, 0x00]).len(), header.len() + 2);
    }
}
