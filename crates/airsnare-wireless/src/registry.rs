//! Session device registry
//!
//! Stores the access points and clients discovered during recon. The engine
//! only talks to the [`DeviceRegistry`] trait; [`MemoryRegistry`] is the
//! in-process implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frames::MacAddress;
use crate::ies::EncryptionInfo;

/// What kind of station a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceKind {
    AccessPoint,
    Client { bssid: MacAddress },
}

/// EAPOL messages and PMKID seen for a station
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeProgress {
    /// Bit n-1 set when message n of the 4-way handshake was captured
    pub messages: u8,
    /// Hex encoded PMKID, when an AP handed one out
    pub pmkid: Option<String>,
}

impl HandshakeProgress {
    pub fn record_message(&mut self, message: u8) {
        if (1..=4).contains(&message) {
            self.messages |= 1 << (message - 1);
        }
    }

    pub fn has_message(&self, message: u8) -> bool {
        (1..=4).contains(&message) && self.messages & (1 << (message - 1)) != 0
    }

    /// Enough material for offline key recovery
    pub fn is_crackable(&self) -> bool {
        self.pmkid.is_some()
            || (self.has_message(1) && self.has_message(2))
            || (self.has_message(2) && self.has_message(3))
    }

    pub fn is_empty(&self) -> bool {
        self.messages == 0 && self.pmkid.is_none()
    }
}

/// One discovered station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDevice {
    pub address: MacAddress,
    pub kind: DeviceKind,
    pub essid: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub channel: u8,
    pub frequency: u16,
    pub rssi: i8,
    pub encryption: String,
    pub cipher: String,
    pub auth: String,
    pub wps: BTreeMap<String, String>,
    pub sent: u64,
    pub received: u64,
    pub handshake: HandshakeProgress,
}

impl SessionDevice {
    pub fn new(address: MacAddress, kind: DeviceKind) -> Self {
        let now = Utc::now();
        Self {
            address,
            kind,
            essid: None,
            first_seen: now,
            last_seen: now,
            channel: 0,
            frequency: 0,
            rssi: 0,
            encryption: String::new(),
            cipher: String::new(),
            auth: String::new(),
            wps: BTreeMap::new(),
            sent: 0,
            received: 0,
            handshake: HandshakeProgress::default(),
        }
    }

    pub fn is_access_point(&self) -> bool {
        self.kind == DeviceKind::AccessPoint
    }

    /// BSSID of the network this station belongs to
    pub fn bssid(&self) -> MacAddress {
        match self.kind {
            DeviceKind::AccessPoint => self.address,
            DeviceKind::Client { bssid } => bssid,
        }
    }

    /// Networks without any encryption tag are treated as open
    pub fn is_open(&self) -> bool {
        self.encryption.is_empty() || self.encryption == "OPEN"
    }

    pub fn set_encryption(&mut self, info: &EncryptionInfo) {
        self.encryption = info.encryption.clone();
        self.cipher = info.cipher.clone();
        self.auth = info.auth.clone();
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Storage for discovered stations, keyed by hardware address
pub trait DeviceRegistry: Send + Sync {
    /// Snapshot of one record
    fn get(&self, address: &MacAddress) -> Option<SessionDevice>;

    /// Create the record with `kind` when missing, then apply `mutation`.
    /// Returns true when the record was created.
    fn upsert(
        &self,
        address: MacAddress,
        kind: DeviceKind,
        mutation: &mut dyn FnMut(&mut SessionDevice),
    ) -> bool;

    /// Apply `mutation` to an existing record. Returns false when unknown.
    fn update(&self, address: &MacAddress, mutation: &mut dyn FnMut(&mut SessionDevice)) -> bool;

    /// All access points
    fn access_points(&self) -> Vec<SessionDevice>;

    /// Known clients of an access point
    fn clients_of(&self, bssid: &MacAddress) -> Vec<SessionDevice>;
}

/// `RwLock<HashMap>` backed registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<MacAddress, SessionDevice>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn get(&self, address: &MacAddress) -> Option<SessionDevice> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.get(address).cloned()
    }

    fn upsert(
        &self,
        address: MacAddress,
        kind: DeviceKind,
        mutation: &mut dyn FnMut(&mut SessionDevice),
    ) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        let mut created = false;
        let device = devices.entry(address).or_insert_with(|| {
            created = true;
            SessionDevice::new(address, kind)
        });
        mutation(device);
        created
    }

    fn update(&self, address: &MacAddress, mutation: &mut dyn FnMut(&mut SessionDevice)) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        match devices.get_mut(address) {
            Some(device) => {
                mutation(device);
                true
            }
            None => false,
        }
    }

    fn access_points(&self) -> Vec<SessionDevice> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .values()
            .filter(|d| d.is_access_point())
            .cloned()
            .collect()
    }

    fn clients_of(&self, bssid: &MacAddress) -> Vec<SessionDevice> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .values()
            .filter(|d| d.kind == DeviceKind::Client { bssid: *bssid })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_upsert_creates_once() {
        let registry = MemoryRegistry::new();
        let ap = mac("AA:AA:AA:AA:AA:AA");

        assert!(registry.upsert(ap, DeviceKind::AccessPoint, &mut |d| d.channel = 6));
        assert!(!registry.upsert(ap, DeviceKind::AccessPoint, &mut |d| d.rssi = -40));

        let device = registry.get(&ap).unwrap();
        assert_eq!(device.channel, 6);
        assert_eq!(device.rssi, -40);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_requires_existing_record() {
        let registry = MemoryRegistry::new();
        let sta = mac("BB:BB:BB:BB:BB:BB");
        assert!(!registry.update(&sta, &mut |d| d.received += 10));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clients_of() {
        let registry = MemoryRegistry::new();
        let ap = mac("AA:AA:AA:AA:AA:AA");
        let other = mac("CC:CC:CC:CC:CC:CC");
        registry.upsert(ap, DeviceKind::AccessPoint, &mut |_| {});
        registry.upsert(mac("BB:BB:BB:BB:BB:01"), DeviceKind::Client { bssid: ap }, &mut |_| {});
        registry.upsert(mac("BB:BB:BB:BB:BB:02"), DeviceKind::Client { bssid: other }, &mut |_| {});

        assert_eq!(registry.access_points().len(), 1);
        let clients = registry.clients_of(&ap);
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].bssid(), ap);
    }

    #[test]
    fn test_handshake_progress() {
        let mut progress = HandshakeProgress::default();
        assert!(progress.is_empty());
        progress.record_message(1);
        assert!(!progress.is_crackable());
        progress.record_message(2);
        assert!(progress.is_crackable());
        progress.record_message(9);
        assert_eq!(progress.messages, 0b0011);
    }
}
