//! Information element parsing
//!
//! Extracts SSID, channel, encryption and WPS facts from the tagged
//! parameters of management frames.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

pub const IE_SSID: u8 = 0;
pub const IE_RATES: u8 = 1;
pub const IE_DS_PARAMS: u8 = 3;
pub const IE_TIM: u8 = 5;
pub const IE_RSN: u8 = 48;
pub const IE_VENDOR: u8 = 221;

/// Privacy bit of the capability field
pub const CAP_PRIVACY: u16 = 0x0010;

/// 1, 2, 5.5, 11 Mbps basic plus 18, 24, 36, 54 Mbps
pub const BASIC_RATES: [u8; 8] = [0x82, 0x84, 0x8B, 0x96, 0x24, 0x30, 0x48, 0x6C];

/// RSN element body: version 1, CCMP group, one CCMP pairwise, one PSK AKM
pub const RSN_WPA2_PSK_CCMP: [u8; 20] = [
    0x01, 0x00, // version
    0x00, 0x0F, 0xAC, 0x04, // group cipher CCMP
    0x01, 0x00, 0x00, 0x0F, 0xAC, 0x04, // pairwise CCMP
    0x01, 0x00, 0x00, 0x0F, 0xAC, 0x02, // AKM PSK
    0x00, 0x00, // capabilities
];

const OUI_IEEE: [u8; 3] = [0x00, 0x0F, 0xAC];
const OUI_MICROSOFT: [u8; 3] = [0x00, 0x50, 0xF2];
const MS_TYPE_WPA: u8 = 1;
const MS_TYPE_WPS: u8 = 4;

/// Append one tagged element
pub fn write_ie(out: &mut Vec<u8>, id: u8, body: &[u8]) {
    let len = body.len().min(255);
    out.push(id);
    out.push(len as u8);
    out.extend_from_slice(&body[..len]);
}

/// Parsed list of information elements, in frame order
#[derive(Debug, Clone, Default)]
pub struct InformationElements<'a> {
    elements: Vec<(u8, &'a [u8])>,
}

/// Walk the tagged parameters. A truncated trailing element ends the walk.
pub fn parse(data: &[u8]) -> InformationElements<'_> {
    let mut elements = Vec::new();
    let mut offset = 0;
    while offset + 2 <= data.len() {
        let id = data[offset];
        let len = data[offset + 1] as usize;
        let start = offset + 2;
        let Some(body) = data.get(start..start + len) else {
            break;
        };
        elements.push((id, body));
        offset = start + len;
    }
    InformationElements { elements }
}

impl<'a> InformationElements<'a> {
    /// First element with the given id
    pub fn get(&self, id: u8) -> Option<&'a [u8]> {
        self.elements
            .iter()
            .find(|(eid, _)| *eid == id)
            .map(|(_, body)| *body)
    }

    /// Vendor specific elements matching an OUI and type
    fn vendor(&self, oui: [u8; 3], kind: u8) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.elements.iter().filter_map(move |(id, body)| {
            if *id == IE_VENDOR && body.len() >= 4 && body[..3] == oui && body[3] == kind {
                Some(&body[4..])
            } else {
                None
            }
        })
    }

    /// SSID, `None` for hidden (empty or all zero) networks
    pub fn ssid(&self) -> Option<String> {
        let raw = self.get(IE_SSID)?;
        if raw.is_empty() || raw.iter().all(|b| *b == 0) {
            return None;
        }
        Some(String::from_utf8_lossy(raw).into_owned())
    }

    /// Channel announced in the DS parameter set
    pub fn ds_channel(&self) -> Option<u8> {
        self.get(IE_DS_PARAMS).and_then(|b| b.first().copied())
    }

    /// Encryption summary of a beacon or probe response
    pub fn encryption(&self, capabilities: u16) -> EncryptionInfo {
        if let Some(rsn) = self.get(IE_RSN) {
            if let Some(info) = parse_cipher_suites(rsn, OUI_IEEE) {
                let only_sae = !info.akms.is_empty() && info.akms.iter().all(|a| *a == 8);
                let name = if only_sae { "WPA3" } else { "WPA2" };
                return info.into_encryption(name);
            }
        }
        if let Some(wpa) = self.vendor(OUI_MICROSOFT, MS_TYPE_WPA).next() {
            if let Some(info) = parse_cipher_suites(wpa, OUI_MICROSOFT) {
                return info.into_encryption("WPA");
            }
        }
        if capabilities & CAP_PRIVACY != 0 {
            return EncryptionInfo {
                encryption: "WEP".into(),
                cipher: "WEP".into(),
                auth: String::new(),
            };
        }
        EncryptionInfo::open()
    }

    /// Decoded WPS attributes; empty when the frame carries no WPS element
    pub fn wps(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        // WPS data may be split over several vendor elements
        let blob: Vec<u8> = self
            .vendor(OUI_MICROSOFT, MS_TYPE_WPS)
            .flat_map(|b| b.iter().copied())
            .collect();

        let mut offset = 0;
        while offset + 4 <= blob.len() {
            let kind = BigEndian::read_u16(&blob[offset..offset + 2]);
            let len = BigEndian::read_u16(&blob[offset + 2..offset + 4]) as usize;
            let start = offset + 4;
            let Some(value) = blob.get(start..start + len) else {
                break;
            };
            if let Some((name, rendered)) = wps_attribute(kind, value) {
                attrs.insert(name.to_string(), rendered);
            }
            offset = start + len;
        }
        attrs
    }
}

/// Encryption, cipher and authentication tags of a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub encryption: String,
    pub cipher: String,
    pub auth: String,
}

impl EncryptionInfo {
    pub fn open() -> Self {
        Self {
            encryption: "OPEN".into(),
            cipher: String::new(),
            auth: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.encryption == "OPEN"
    }
}

struct CipherSuites {
    pairwise: Vec<u8>,
    akms: Vec<u8>,
}

impl CipherSuites {
    fn into_encryption(self, name: &str) -> EncryptionInfo {
        let cipher = self
            .pairwise
            .iter()
            .map(|c| cipher_name(*c))
            .collect::<Vec<_>>()
            .join(", ");
        let auth = self
            .akms
            .iter()
            .map(|a| akm_name(*a))
            .collect::<Vec<_>>()
            .join(", ");
        EncryptionInfo {
            encryption: name.into(),
            cipher,
            auth,
        }
    }
}

/// RSN and WPA share the layout: version, group suite, pairwise list, AKM list
fn parse_cipher_suites(body: &[u8], oui: [u8; 3]) -> Option<CipherSuites> {
    let mut offset = 2 + 4;
    if body.len() < offset {
        return None;
    }

    let read_list = |offset: &mut usize| -> Option<Vec<u8>> {
        let count = LittleEndian::read_u16(body.get(*offset..*offset + 2)?) as usize;
        *offset += 2;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let suite = body.get(*offset..*offset + 4)?;
            if suite[..3] == oui {
                out.push(suite[3]);
            }
            *offset += 4;
        }
        Some(out)
    };

    let pairwise = read_list(&mut offset).unwrap_or_default();
    let akms = read_list(&mut offset).unwrap_or_default();
    Some(CipherSuites { pairwise, akms })
}

fn cipher_name(suite: u8) -> &'static str {
    match suite {
        1 => "WEP40",
        2 => "TKIP",
        4 => "CCMP",
        5 => "WEP104",
        8 => "GCMP",
        9 => "GCMP-256",
        10 => "CCMP-256",
        _ => "UNKNOWN",
    }
}

fn akm_name(suite: u8) -> &'static str {
    match suite {
        1 | 3 | 5 => "MGT",
        2 | 4 | 6 => "PSK",
        8 | 9 => "SAE",
        18 => "OWE",
        _ => "UNKNOWN",
    }
}

fn wps_attribute(kind: u16, value: &[u8]) -> Option<(&'static str, String)> {
    let text = || String::from_utf8_lossy(value).trim_end_matches('\0').to_string();
    let byte = || value.first().copied().unwrap_or(0);

    let entry = match kind {
        0x104A => ("Version", format!("{}.{}", byte() >> 4, byte() & 0x0F)),
        0x1044 => (
            "State",
            match byte() {
                1 => "Not Configured".to_string(),
                2 => "Configured".to_string(),
                other => format!("Unknown ({})", other),
            },
        ),
        0x1057 => (
            "AP Setup Locked",
            if byte() != 0 { "true" } else { "false" }.to_string(),
        ),
        0x1041 => (
            "Selected Registrar",
            if byte() != 0 { "true" } else { "false" }.to_string(),
        ),
        0x1021 => ("Manufacturer", text()),
        0x1023 => ("Model Name", text()),
        0x1024 => ("Model Number", text()),
        0x1042 => ("Serial Number", text()),
        0x1011 => ("Device Name", text()),
        0x1008 | 0x1053 => {
            let name = if kind == 0x1008 {
                "Config Methods"
            } else {
                "Selected Registrar Config Methods"
            };
            let methods = value.get(..2).map(BigEndian::read_u16).unwrap_or(0);
            (name, config_methods(methods))
        }
        0x1047 => ("UUID-E", hex(value)),
        0x1054 => ("Primary Device Type", hex(value)),
        0x103B => (
            "Response Type",
            match byte() {
                0 => "Enrollee, Info Only".to_string(),
                1 => "Enrollee, open 802.1X".to_string(),
                2 => "Registrar".to_string(),
                3 => "AP".to_string(),
                other => format!("Unknown ({})", other),
            },
        ),
        _ => return None,
    };
    Some(entry)
}

fn config_methods(bits: u16) -> String {
    const NAMES: [(u16, &str); 9] = [
        (0x0001, "USB"),
        (0x0002, "Ethernet"),
        (0x0004, "Label"),
        (0x0008, "Display"),
        (0x0010, "External NFC"),
        (0x0020, "Internal NFC"),
        (0x0040, "NFC Interface"),
        (0x0080, "Push Button"),
        (0x0100, "Keypad"),
    ];
    let names: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        format!("0x{:04x}", bits)
    } else {
        names.join(", ")
    }
}

fn hex(value: &[u8]) -> String {
    value.iter().map(|b| format!("{:02x}", b)).collect()
}
