//! Radio hardware abstraction
//!
//! The engine talks to the wireless adapter only through the [`Radio`]
//! trait: open a capture, bring the interface up, tune, inject. The live
//! implementation uses sysfs for state, `ip`/`iw` for configuration and a
//! raw `AF_PACKET` socket for injection.

use std::fs;
use std::os::unix::io::RawFd;
use std::process::Command;
use std::sync::Mutex;

use nix::sys::socket::{send, MsgFlags};
use nix::unistd::close;

use crate::error::{Result, WirelessError};
use crate::frames::MacAddress;
use crate::radiotap::RadiotapHeader;
use crate::source::{open_packet_socket, FrameSource, LiveSource};

/// Operations the engine needs from a wireless adapter
pub trait Radio: Send + Sync {
    /// Interface name
    fn interface(&self) -> &str;

    /// Open a capture on the interface
    fn open_capture(&self) -> Result<Box<dyn FrameSource>>;

    /// Bring the interface administratively up
    fn bring_up(&self) -> Result<()>;

    /// Frequencies (MHz) the interface can tune to
    fn supported_frequencies(&self) -> Result<Vec<u16>>;

    /// Tune the interface
    fn set_channel(&self, channel: u8) -> Result<()>;

    /// Transmit one 802.11 frame, returning the bytes written
    fn inject(&self, frame: &[u8]) -> Result<usize>;

    /// Hardware address of the interface
    fn mac_address(&self) -> Result<MacAddress>;

    /// Drop transmit handles opened during a session
    fn release(&self) {}
}

const IFF_UP: u32 = 0x1;

/// Get interface index from name
pub fn get_ifindex(name: &str) -> Result<i32> {
    let path = format!("/sys/class/net/{}/ifindex", name);
    let content = fs::read_to_string(&path)
        .map_err(|e| WirelessError::Interface(format!("{}: {}", name, e)))?;

    content
        .trim()
        .parse()
        .map_err(|e| WirelessError::Interface(format!("Invalid ifindex: {}", e)))
}

/// Check the `IFF_UP` flag of an interface
pub fn is_interface_up(name: &str) -> Result<bool> {
    let path = format!("/sys/class/net/{}/flags", name);
    let content = fs::read_to_string(&path)
        .map_err(|e| WirelessError::Interface(format!("{}: {}", name, e)))?;
    let flags = u32::from_str_radix(content.trim().trim_start_matches("0x"), 16)
        .map_err(|e| WirelessError::Interface(format!("Invalid interface flags: {}", e)))?;
    Ok(flags & IFF_UP != 0)
}

/// Set interface up or down
pub fn set_interface_state(name: &str, up: bool) -> Result<()> {
    let state = if up { "up" } else { "down" };
    let status = Command::new("ip")
        .args(["link", "set", name, state])
        .status()
        .map_err(|e| WirelessError::Interface(format!("Failed to run ip command: {}", e)))?;

    if !status.success() {
        return Err(WirelessError::Interface(format!(
            "Failed to set interface {} {}",
            name, state
        )));
    }

    Ok(())
}

/// Set channel using iw
pub fn set_channel_iw(name: &str, channel: u8) -> Result<()> {
    let output = Command::new("iw")
        .args(["dev", name, "set", "channel", &channel.to_string()])
        .output()
        .map_err(|e| WirelessError::Channel(format!("Failed to run iw command: {}", e)))?;

    if !output.status.success() {
        return Err(WirelessError::Channel(format!(
            "Failed to set channel {} on {}: {}",
            channel,
            name,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

/// Get MAC address of interface
pub fn get_mac_address(name: &str) -> Result<MacAddress> {
    let path = format!("/sys/class/net/{}/address", name);
    let content = fs::read_to_string(&path)
        .map_err(|e| WirelessError::Interface(format!("Failed to read MAC: {}", e)))?;
    content.trim().parse()
}

/// Enabled frequencies listed by `iw phy <phy> info`
pub fn parse_iw_frequencies(output: &str) -> Vec<u16> {
    let mut freqs = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("* ") else {
            continue;
        };
        if line.contains("disabled") {
            continue;
        }
        let mut parts = rest.split_whitespace();
        let (Some(value), Some("MHz")) = (parts.next(), parts.next()) else {
            continue;
        };
        // Newer iw prints "2412.0 MHz"
        let value = value.split('.').next().unwrap_or(value);
        if let Ok(freq) = value.parse::<u16>() {
            if !freqs.contains(&freq) {
                freqs.push(freq);
            }
        }
    }
    freqs
}

/// Raw socket for packet injection
#[derive(Debug)]
pub struct InjectionSocket {
    fd: RawFd,
}

impl InjectionSocket {
    /// Create a new injection socket bound to an interface
    pub fn new(interface: &str) -> Result<Self> {
        let ifindex = get_ifindex(interface)?;
        let fd = open_packet_socket(ifindex, None)?;
        tracing::debug!("Created injection socket on interface index {}", ifindex);
        Ok(Self { fd })
    }

    /// Send raw bytes (must include radiotap header)
    pub fn send_raw(&self, data: &[u8]) -> Result<usize> {
        send(self.fd, data, MsgFlags::empty())
            .map_err(|e| WirelessError::Injection(format!("Send failed: {}", e)))
    }
}

impl Drop for InjectionSocket {
    fn drop(&mut self) {
        let _ = close(self.fd);
    }
}

/// Monitor mode adapter driven through the kernel
pub struct LiveRadio {
    interface: String,
    radiotap: RadiotapHeader,
    injector: Mutex<Option<InjectionSocket>>,
}

impl LiveRadio {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            radiotap: RadiotapHeader::for_injection(),
            injector: Mutex::new(None),
        }
    }
}

impl Radio for LiveRadio {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn open_capture(&self) -> Result<Box<dyn FrameSource>> {
        let ifindex = get_ifindex(&self.interface)?;
        if !is_interface_up(&self.interface)? {
            return Err(WirelessError::InterfaceDown(self.interface.clone()));
        }
        Ok(Box::new(LiveSource::open(&self.interface, ifindex)?))
    }

    fn bring_up(&self) -> Result<()> {
        set_interface_state(&self.interface, true)
    }

    fn supported_frequencies(&self) -> Result<Vec<u16>> {
        let phy_path = format!("/sys/class/net/{}/phy80211/name", self.interface);
        let phy = fs::read_to_string(&phy_path)
            .map_err(|e| WirelessError::Interface(format!("{}: {}", self.interface, e)))?;

        let output = Command::new("iw")
            .args(["phy", phy.trim(), "info"])
            .output()
            .map_err(|e| WirelessError::Interface(format!("Failed to run iw phy: {}", e)))?;
        if !output.status.success() {
            return Err(WirelessError::Interface(format!(
                "iw phy {} info failed: {}",
                phy.trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_iw_frequencies(&String::from_utf8_lossy(&output.stdout)))
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        set_channel_iw(&self.interface, channel)
    }

    fn inject(&self, frame: &[u8]) -> Result<usize> {
        let mut guard = self
            .injector
            .lock()
            .map_err(|_| WirelessError::Injection("injection socket lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(InjectionSocket::new(&self.interface)?);
        }
        match guard.as_ref() {
            Some(socket) => socket.send_raw(&self.radiotap.wrap(frame)),
            None => Err(WirelessError::Injection("injection socket unavailable".into())),
        }
    }

    fn mac_address(&self) -> Result<MacAddress> {
        get_mac_address(&self.interface)
    }

    fn release(&self) {
        let socket = self
            .injector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if socket.is_some() {
            tracing::debug!(interface = %self.interface, "Closed injection socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_ifindex() {
        // This test will work on any Linux system with loopback
        let result = get_ifindex("lo");
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_interface_is_config_error() {
        let err = get_ifindex("nosuchif0").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_release_without_socket_is_noop() {
        let radio = LiveRadio::new("nosuchif0");
        radio.release();
        radio.release();
        assert!(radio.injector.lock().unwrap().is_none());
    }

    #[test]
    fn test_parse_iw_frequencies() {
        let output = "\
Wiphy phy0
\tBand 1:
\t\tFrequencies:
\t\t\t* 2412 MHz [1] (20.0 dBm)
\t\t\t* 2417.0 MHz [2] (20.0 dBm)
\t\t\t* 2484 MHz [14] (disabled)
\tBand 2:
\t\tFrequencies:
\t\t\t* 5180 MHz [36] (23.0 dBm)
\t\t\t* 5260 MHz [52] (20.0 dBm) (radar detection)
\t\tBitrates (non-HT):
\t\t\t* 6.0 Mbps
";
        assert_eq!(parse_iw_frequencies(output), vec![2412, 2417, 5180, 5260]);
    }
}
