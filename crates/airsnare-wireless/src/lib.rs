//! # airsnare-wireless
//!
//! 802.11 reconnaissance and attack engine for monitor mode interfaces.
//! Captures frames from a live interface or a pcap replay, keeps a registry
//! of access points and clients, hops channels, records WPA handshakes and
//! PMKIDs, and drives deauthentication, association and rogue AP beaconing.
//! Live operation requires root privileges for raw sockets.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use airsnare_wireless::{Command, Engine, EngineConfig, LiveRadio, MemoryRegistry};
//!
//! # async fn run() -> airsnare_wireless::Result<()> {
//! let config = EngineConfig::from_env();
//! let radio = Arc::new(LiveRadio::new(config.interface.clone()));
//! let engine = Engine::new(config, radio, Arc::new(MemoryRegistry::new()));
//!
//! let output = "wifi.recon on".parse::<Command>()?.execute(&engine).await?;
//! println!("{}", output);
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

#![cfg(target_os = "linux")]
#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod attack;
pub mod barrier;
pub mod capture;
pub mod channel;
pub mod classify;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod handshake;
pub mod hopper;
pub mod ies;
pub mod pcap;
pub mod radio;
pub mod radiotap;
pub mod registry;
pub mod rogue_ap;
pub mod source;

pub use attack::{AttackPolicy, AttackStats};
pub use channel::TrafficStats;
pub use classify::{Classifier, DecodedFrame, FrameEvent};
pub use command::Command;
pub use config::EngineConfig;
pub use engine::{Engine, EngineEvent};
pub use error::{Result, WirelessError};
pub use frames::{DeauthFrame, DeauthReason, FrameSubtype, FrameType, Ieee80211Frame, MacAddress};
pub use handshake::HandshakeRecorder;
pub use hopper::HopState;
pub use pcap::{PcapReader, PcapWriter};
pub use radio::{LiveRadio, Radio};
pub use registry::{DeviceKind, DeviceRegistry, MemoryRegistry, SessionDevice};
pub use rogue_ap::RogueApConfig;
pub use source::{FrameSource, RawFrame, ReadOutcome, ReplaySource};

/// Check if running with sufficient privileges for raw socket operations
pub fn check_privileges() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_check() {
        let _ = check_privileges();
    }
}
