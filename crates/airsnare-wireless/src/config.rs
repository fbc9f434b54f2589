use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attack::AttackPolicy;
use crate::error::{Result, WirelessError};
use crate::frames::MacAddress;
use crate::radiotap::channel_to_frequency;
use crate::rogue_ap::RogueApConfig;

pub const DEFAULT_INTERFACE: &str = "wlan0";
pub const DEFAULT_MIN_RSSI: i32 = -200;
pub const DEFAULT_HOP_PERIOD_MS: u64 = 250;
pub const DEFAULT_HANDSHAKES_FILE: &str = "~/airsnare-wifi-handshakes.pcap";

/// Operator parameters of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Monitor mode interface
    pub interface: String,
    /// Read frames from this pcap file instead of the interface
    pub source_file: Option<PathBuf>,
    /// Where handshakes are appended
    pub handshakes_file: PathBuf,
    /// Minimum signal strength (dBm) for stations to be registered
    pub min_rssi: i32,
    /// Dwell time per channel while hopping
    pub hop_period_ms: u64,
    /// Drop frames with an invalid checksum
    pub skip_broken: bool,
    /// Channels to hop on; empty means every supported channel
    pub channels: Vec<u8>,
    pub deauth: AttackPolicy,
    pub assoc: AttackPolicy,
    pub ap: RogueApConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            source_file: None,
            handshakes_file: PathBuf::from(DEFAULT_HANDSHAKES_FILE),
            min_rssi: DEFAULT_MIN_RSSI,
            hop_period_ms: DEFAULT_HOP_PERIOD_MS,
            skip_broken: true,
            channels: Vec::new(),
            deauth: AttackPolicy {
                open: true,
                ..AttackPolicy::default()
            },
            assoc: AttackPolicy::default(),
            ap: RogueApConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `AIRSNARE_*` environment variables
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("AIRSNARE_INTERFACE") {
            cfg.interface = v;
        }
        cfg.source_file = env::var("AIRSNARE_SOURCE_FILE")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        if let Ok(v) = env::var("AIRSNARE_HANDSHAKES_FILE") {
            cfg.handshakes_file = PathBuf::from(v);
        }
        cfg.min_rssi = env::var("AIRSNARE_MIN_RSSI")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(cfg.min_rssi);
        cfg.hop_period_ms = env::var("AIRSNARE_HOP_PERIOD_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.hop_period_ms);
        cfg.skip_broken = env_bool("AIRSNARE_SKIP_BROKEN", cfg.skip_broken);
        if let Some(list) = env_list("AIRSNARE_CHANNELS") {
            cfg.channels = list.iter().filter_map(|c| c.parse().ok()).collect();
        }

        cfg.deauth = policy_from_env("DEAUTH", cfg.deauth);
        cfg.assoc = policy_from_env("ASSOC", cfg.assoc);

        if let Ok(v) = env::var("AIRSNARE_AP_SSID") {
            cfg.ap.ssid = v;
        }
        if let Some(mac) = env::var("AIRSNARE_AP_BSSID")
            .ok()
            .and_then(|v| v.parse::<MacAddress>().ok())
        {
            cfg.ap.bssid = mac;
        }
        cfg.ap.channel = env::var("AIRSNARE_AP_CHANNEL")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(cfg.ap.channel);
        cfg.ap.encryption = env_bool("AIRSNARE_AP_ENCRYPTION", cfg.ap.encryption);

        cfg
    }

    /// Read a JSON configuration file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| WirelessError::config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| WirelessError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn hop_period(&self) -> Duration {
        Duration::from_millis(self.hop_period_ms)
    }

    /// Handshake file with `~` expanded
    pub fn handshakes_path(&self) -> PathBuf {
        expand_home(&self.handshakes_file)
    }

    /// Replay file with `~` expanded
    pub fn source_path(&self) -> Option<PathBuf> {
        self.source_file.as_deref().map(expand_home)
    }

    /// Apply one `set <param> <value>` operator command
    pub fn set(&mut self, param: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match param {
            "wifi.interface" => {
                return Err(WirelessError::config(
                    "wifi.interface can only be chosen at startup",
                ))
            }
            "wifi.source.file" => {
                self.source_file = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "wifi.handshakes.file" => self.handshakes_file = PathBuf::from(value),
            "wifi.rssi.min" => self.min_rssi = parse_value(param, value)?,
            "wifi.hop.period" => {
                let ms: u64 = parse_value(param, value)?;
                if ms == 0 {
                    return Err(WirelessError::config("wifi.hop.period must be positive"));
                }
                self.hop_period_ms = ms;
            }
            "wifi.skip-broken" => self.skip_broken = parse_bool(param, value)?,
            "wifi.deauth.skip" => self.deauth.skip = parse_mac_list(value)?,
            "wifi.deauth.silent" => self.deauth.silent = parse_bool(param, value)?,
            "wifi.deauth.open" => self.deauth.open = parse_bool(param, value)?,
            "wifi.assoc.skip" => self.assoc.skip = parse_mac_list(value)?,
            "wifi.assoc.silent" => self.assoc.silent = parse_bool(param, value)?,
            "wifi.assoc.open" => self.assoc.open = parse_bool(param, value)?,
            "wifi.ap.ssid" => self.ap.ssid = value.to_string(),
            "wifi.ap.bssid" => self.ap.bssid = value.parse()?,
            "wifi.ap.channel" => {
                let channel: u8 = parse_value(param, value)?;
                if channel_to_frequency(channel).is_none() {
                    return Err(WirelessError::InvalidChannel(channel as u32));
                }
                self.ap.channel = channel;
            }
            "wifi.ap.encryption" => self.ap.encryption = parse_bool(param, value)?,
            _ => {
                return Err(WirelessError::config(format!(
                    "unknown parameter {}",
                    param
                )))
            }
        }
        Ok(())
    }

    /// Current value of every operator parameter, in `set` syntax
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let macs = |list: &[MacAddress]| {
            list.iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        vec![
            ("wifi.interface", self.interface.clone()),
            (
                "wifi.source.file",
                self.source_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("wifi.handshakes.file", self.handshakes_file.display().to_string()),
            ("wifi.rssi.min", self.min_rssi.to_string()),
            ("wifi.hop.period", self.hop_period_ms.to_string()),
            ("wifi.skip-broken", self.skip_broken.to_string()),
            ("wifi.deauth.skip", macs(&self.deauth.skip)),
            ("wifi.deauth.silent", self.deauth.silent.to_string()),
            ("wifi.deauth.open", self.deauth.open.to_string()),
            ("wifi.assoc.skip", macs(&self.assoc.skip)),
            ("wifi.assoc.silent", self.assoc.silent.to_string()),
            ("wifi.assoc.open", self.assoc.open.to_string()),
            ("wifi.ap.ssid", self.ap.ssid.clone()),
            ("wifi.ap.bssid", self.ap.bssid.to_string()),
            ("wifi.ap.channel", self.ap.channel.to_string()),
            ("wifi.ap.encryption", self.ap.encryption.to_string()),
        ]
    }
}

/// Expand a leading `~` against `$HOME`
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn parse_value<T: std::str::FromStr>(param: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| WirelessError::config(format!("invalid value '{}' for {}", value, param)))
}

fn parse_bool(param: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(WirelessError::config(format!(
            "invalid boolean '{}' for {}",
            value, param
        ))),
    }
}

/// Comma separated MAC addresses; empty clears the list
pub fn parse_mac_list(value: &str) -> Result<Vec<MacAddress>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn policy_from_env(prefix: &str, mut policy: AttackPolicy) -> AttackPolicy {
    if let Ok(list) = env::var(format!("AIRSNARE_{}_SKIP", prefix)) {
        match parse_mac_list(&list) {
            Ok(macs) => policy.skip = macs,
            Err(e) => tracing::warn!("Ignoring AIRSNARE_{}_SKIP: {}", prefix, e),
        }
    }
    policy.silent = env_bool(&format!("AIRSNARE_{}_SILENT", prefix), policy.silent);
    policy.open = env_bool(&format!("AIRSNARE_{}_OPEN", prefix), policy.open);
    policy
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|s| {
        s.split(',')
            .map(|x| x.trim().to_ascii_lowercase())
            .filter(|x| !x.is_empty())
            .collect()
    })
}
