//! Operator commands
//!
//! Parses the textual console commands into [`Command`] and runs them against
//! an [`Engine`], returning the text to show the operator.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::engine::Engine;
use crate::error::{Result, WirelessError};
use crate::frames::MacAddress;
use crate::radiotap::channel_to_frequency;
use crate::registry::SessionDevice;

/// One parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReconOn,
    ReconOff,
    /// Restrict recon to one access point
    ReconFilter(MacAddress),
    ReconClear,
    /// Replace the channel set; empty selects every supported channel
    ReconChannels(Vec<u8>),
    Deauth(MacAddress),
    Associate(MacAddress),
    ApOn,
    ApOff,
    Show,
    ShowWps(MacAddress),
    Set { param: String, value: String },
}

/// `all` and `*` address every station
fn parse_target(arg: &str) -> Result<MacAddress> {
    match arg {
        "all" | "*" => Ok(MacAddress::BROADCAST),
        _ => arg.parse(),
    }
}

/// Channel numbers separated by commas and/or spaces, or `clear`
fn parse_channels(arg: &str) -> Result<Vec<u8>> {
    if arg.trim() == "clear" {
        return Ok(Vec::new());
    }
    arg.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let n: u32 = s
                .parse()
                .map_err(|_| WirelessError::config(format!("'{}' is not a channel number", s)))?;
            u8::try_from(n)
                .ok()
                .filter(|c| channel_to_frequency(*c).is_some())
                .ok_or(WirelessError::InvalidChannel(n))
        })
        .collect()
}

fn usage(cmd: &str) -> WirelessError {
    WirelessError::config(format!("invalid arguments for {}", cmd))
}

impl FromStr for Command {
    type Err = WirelessError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Err(WirelessError::config("empty command"));
        };
        let args: Vec<&str> = words.collect();

        let command = match (cmd, args.as_slice()) {
            ("wifi.recon", ["on"]) => Self::ReconOn,
            ("wifi.recon", ["off"]) => Self::ReconOff,
            ("wifi.recon", ["clear"]) => Self::ReconClear,
            ("wifi.recon", [bssid]) => Self::ReconFilter(bssid.parse()?),
            ("wifi.recon.channel", [_, ..]) => Self::ReconChannels(parse_channels(&args.join(" "))?),
            ("wifi.deauth", [target]) => Self::Deauth(parse_target(target)?),
            ("wifi.assoc", [target]) => Self::Associate(parse_target(target)?),
            ("wifi.ap", []) => Self::ApOn,
            ("wifi.ap", ["off"]) => Self::ApOff,
            ("wifi.show", []) => Self::Show,
            ("wifi.show.wps", [target]) => Self::ShowWps(parse_target(target)?),
            ("set", [param, value @ ..]) => Self::Set {
                param: param.to_string(),
                value: value.join(" "),
            },
            (
                "wifi.recon" | "wifi.recon.channel" | "wifi.deauth" | "wifi.assoc" | "wifi.ap"
                | "wifi.show" | "wifi.show.wps" | "set",
                _,
            ) => return Err(usage(cmd)),
            _ => return Err(WirelessError::config(format!("unknown command {}", cmd))),
        };
        Ok(command)
    }
}

impl Command {
    /// Run against `engine`, returning the operator-facing output
    pub async fn execute(&self, engine: &Engine) -> Result<String> {
        match self {
            Self::ReconOn => {
                engine.start().await?;
                Ok(format!("wifi recon started on {}", engine.interface()))
            }
            Self::ReconOff => {
                engine.stop().await?;
                Ok("wifi recon stopped".to_string())
            }
            Self::ReconFilter(bssid) => {
                engine.set_filter(*bssid)?;
                Ok(format!("recon restricted to {}", bssid))
            }
            Self::ReconClear => {
                engine.clear_filter();
                Ok("recon filter cleared".to_string())
            }
            Self::ReconChannels(channels) => {
                engine.set_channels(channels.clone()).await?;
                if channels.is_empty() {
                    Ok("hopping on all supported channels".to_string())
                } else {
                    let list: Vec<String> = channels.iter().map(u8::to_string).collect();
                    Ok(format!("hopping on channels {}", list.join(",")))
                }
            }
            Self::Deauth(target) => {
                let stats = engine.deauth(*target).await?;
                Ok(format!(
                    "deauth done: {} targets, {} skipped, {} frames sent, {} errors",
                    stats.targets, stats.skipped, stats.frames_sent, stats.errors
                ))
            }
            Self::Associate(target) => {
                let stats = engine.associate(*target).await?;
                Ok(format!(
                    "association done: {} targets, {} skipped, {} frames sent, {} errors",
                    stats.targets, stats.skipped, stats.frames_sent, stats.errors
                ))
            }
            Self::ApOn => {
                engine.start_ap().await?;
                let ap = engine.config().ap;
                Ok(format!(
                    "access point {} ({}) up on channel {}",
                    ap.ssid, ap.bssid, ap.channel
                ))
            }
            Self::ApOff => {
                engine.stop_ap().await?;
                Ok("access point stopped".to_string())
            }
            Self::Show => Ok(render_stations(engine)),
            Self::ShowWps(target) => Ok(render_wps(&engine.wps(*target)?)),
            Self::Set { param, value } => {
                engine.set_param(param, value)?;
                Ok(format!("{} = {}", param, value))
            }
        }
    }
}

fn render_stations(engine: &Engine) -> String {
    let stations = engine.stations();
    let filtered = engine.filter().is_some();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:>5}  {:<17}  {:<24}  {:<16}  {:>3}  {:>7}  {:>9}  {:>9}  {:<3}  {}",
        "RSSI",
        if filtered { "MAC" } else { "BSSID" },
        "SSID",
        "Encryption",
        "Ch",
        "Clients",
        "Sent",
        "Recvd",
        "HS",
        "Seen"
    );
    for station in &stations {
        let clients = if station.is_access_point() {
            engine.registry().clients_of(&station.address).len().to_string()
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "{:>5}  {:<17}  {:<24}  {:<16}  {:>3}  {:>7}  {:>9}  {:>9}  {:<3}  {}",
            station.rssi,
            station.address.to_string(),
            display_essid(station),
            encryption_label(station),
            station.channel,
            clients,
            station.sent,
            station.received,
            if station.handshake.is_crackable() { "yes" } else { "" },
            station.last_seen.format("%H:%M:%S")
        );
    }

    let stats = engine.stats();
    let _ = write!(
        out,
        "{} stations / {} packets / {} bytes / {} injected / channel {}",
        stations.len(),
        stats.packets,
        stats.bytes,
        stats.injected,
        engine.current_channel()
    );
    out
}

fn display_essid(station: &SessionDevice) -> String {
    match station.essid.as_deref() {
        Some(essid) if !essid.is_empty() => essid.chars().take(24).collect(),
        _ => "<hidden>".to_string(),
    }
}

fn encryption_label(station: &SessionDevice) -> String {
    if station.is_open() {
        return "OPEN".to_string();
    }
    let mut label = station.encryption.clone();
    if !station.cipher.is_empty() {
        let _ = write!(label, " ({}", station.cipher);
        if !station.auth.is_empty() {
            let _ = write!(label, ", {}", station.auth);
        }
        label.push(')');
    }
    label
}

fn render_wps(aps: &[SessionDevice]) -> String {
    if aps.is_empty() {
        return "no access point advertised WPS".to_string();
    }
    let mut out = String::new();
    for ap in aps {
        let _ = writeln!(out, "{} {}", ap.address, display_essid(ap));
        if ap.wps.is_empty() {
            let _ = writeln!(out, "  no WPS information");
        }
        for (name, value) in &ap.wps {
            let _ = writeln!(out, "  {:<20} {}", name, value);
        }
    }
    out.truncate(out.trim_end().len());
    out
}
