//! WPA/WPA2 4-way handshake detection and capture
//!
//! This module classifies EAPOL-Key frames into handshake messages,
//! extracts PMKIDs and appends qualifying frames to the handshake pcap.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder};

use crate::frames::MacAddress;
use crate::pcap::PcapWriter;
use crate::source::RawFrame;

/// EAPOL packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapolType {
    /// EAP Packet
    Packet = 0,
    /// EAPOL Start
    Start = 1,
    /// EAPOL Logoff
    Logoff = 2,
    /// EAPOL Key
    Key = 3,
}

/// WPA Key Information flags
#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    raw: u16,
}

impl KeyInfo {
    /// Parse from raw u16
    pub fn new(raw: u16) -> Self {
        Self { raw }
    }

    /// Key descriptor version (1=WPA, 2=WPA2)
    pub fn descriptor_version(&self) -> u8 {
        (self.raw & 0x0007) as u8
    }

    /// Pairwise key (true) or Group key (false)
    pub fn is_pairwise(&self) -> bool {
        (self.raw & 0x0008) != 0
    }

    /// Install flag
    pub fn install(&self) -> bool {
        (self.raw & 0x0040) != 0
    }

    /// ACK flag (set by AP in messages 1 and 3)
    pub fn ack(&self) -> bool {
        (self.raw & 0x0080) != 0
    }

    /// MIC flag (set when MIC is present)
    pub fn mic(&self) -> bool {
        (self.raw & 0x0100) != 0
    }

    /// Secure flag
    pub fn secure(&self) -> bool {
        (self.raw & 0x0200) != 0
    }

    /// Determine handshake message number
    pub fn message_number(&self) -> u8 {
        match (self.ack(), self.mic(), self.install(), self.secure()) {
            (true, false, false, false) => 1, // AP->STA: ACK, no MIC
            (false, true, false, false) => 2, // STA->AP: MIC, no ACK
            (true, true, true, true) => 3,    // AP->STA: ACK, MIC, Install, Secure
            (false, true, false, true) => 4,  // STA->AP: MIC, Secure, no ACK
            _ => 0,
        }
    }
}

/// EAPOL-Key frame summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolKey {
    /// Handshake message number (1-4)
    pub message: u8,
    /// Replay counter
    pub replay_counter: u64,
    /// PMKID carried in the key data of message 1
    pub pmkid: Option<[u8; 16]>,
}

/// Offset of the key data length inside the EAPOL-Key body
const KEY_DATA_LEN_OFFSET: usize = 93;

/// Parse an EAPOL payload (after LLC/SNAP). Returns `None` for anything
/// that is not a pairwise EAPOL-Key frame we can number.
pub fn parse_eapol_key(eapol: &[u8]) -> Option<EapolKey> {
    // 4 byte EAPOL header + 95 byte minimal key body
    if eapol.len() < 99 || eapol[1] != EapolType::Key as u8 {
        return None;
    }
    let key = &eapol[4..];
    let info = KeyInfo::new(BigEndian::read_u16(&key[1..3]));
    if !info.is_pairwise() {
        return None;
    }
    let message = info.message_number();
    if message == 0 {
        return None;
    }

    let replay_counter = BigEndian::read_u64(&key[5..13]);
    let pmkid = if message == 1 {
        let data_len =
            BigEndian::read_u16(&key[KEY_DATA_LEN_OFFSET..KEY_DATA_LEN_OFFSET + 2]) as usize;
        key.get(KEY_DATA_LEN_OFFSET + 2..KEY_DATA_LEN_OFFSET + 2 + data_len)
            .and_then(find_pmkid_kde)
    } else {
        None
    };

    Some(EapolKey {
        message,
        replay_counter,
        pmkid,
    })
}

/// PMKID KDE: DD <len> 00-0F-AC 04 <16 byte PMKID>
fn find_pmkid_kde(data: &[u8]) -> Option<[u8; 16]> {
    let mut offset = 0;
    while offset + 2 <= data.len() {
        let tag = data[offset];
        let len = data[offset + 1] as usize;
        let body = data.get(offset + 2..offset + 2 + len)?;
        if tag == 0xDD && len >= 20 && body[..4] == [0x00, 0x0F, 0xAC, 0x04] {
            let mut pmkid = [0u8; 16];
            pmkid.copy_from_slice(&body[4..20]);
            if pmkid.iter().any(|b| *b != 0) {
                return Some(pmkid);
            }
        }
        offset += 2 + len;
    }
    None
}

/// Appends handshake frames to a pcap artifact.
///
/// The file is opened on the first write and stays open for the lifetime of
/// the recorder. Write failures are logged and never propagated.
pub struct HandshakeRecorder {
    path: PathBuf,
    writer: Option<PcapWriter<File>>,
    open_failed: bool,
    last_beacon: HashMap<MacAddress, RawFrame>,
    beacon_written: HashSet<MacAddress>,
    frames_written: u64,
}

impl HandshakeRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            open_failed: false,
            last_beacon: HashMap::new(),
            beacon_written: HashSet::new(),
            frames_written: 0,
        }
    }

    /// Remember the most recent beacon of an access point
    pub fn remember_beacon(&mut self, bssid: MacAddress, frame: &RawFrame) {
        if !self.beacon_written.contains(&bssid) {
            self.last_beacon.insert(bssid, frame.clone());
        }
    }

    /// Append a handshake frame for `bssid`, preceded once by its beacon
    pub fn record(&mut self, bssid: MacAddress, frame: &RawFrame) {
        if !self.beacon_written.contains(&bssid) {
            if let Some(beacon) = self.last_beacon.remove(&bssid) {
                if self.write(&beacon) {
                    self.beacon_written.insert(bssid);
                }
            }
        }
        self.write(frame);
    }

    /// Frames successfully appended so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write(&mut self, frame: &RawFrame) -> bool {
        if self.writer.is_none() {
            // Log the open failure once rather than for every frame
            if self.open_failed {
                return false;
            }
            match PcapWriter::append(&self.path) {
                Ok(writer) => {
                    tracing::info!(path = %self.path.display(), "Saving handshakes");
                    self.writer = Some(writer);
                }
                Err(e) => {
                    tracing::error!(path = %self.path.display(), "Cannot open handshake file: {}", e);
                    self.open_failed = true;
                    return false;
                }
            }
        }

        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        let result = writer
            .write_packet(frame.timestamp, &frame.data)
            .and_then(|_| writer.flush());
        match result {
            Ok(()) => {
                self.frames_written += 1;
                true
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), "Error writing handshake frame: {}", e);
                false
            }
        }
    }
}

impl Drop for HandshakeRecorder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}
