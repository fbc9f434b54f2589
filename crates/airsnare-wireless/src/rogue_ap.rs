//! Rogue access point beaconing
//!
//! Announces a fake network by injecting beacons at a fixed interval on a
//! pinned channel. The configuration is snapshotted at activation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelResource;
use crate::error::{Result, WirelessError};
use crate::frames::{BeaconFrame, MacAddress};
use crate::hopper::HopControl;
use crate::radiotap::channel_to_frequency;

/// Interval between two beacons
pub const BEACON_INTERVAL: Duration = Duration::from_millis(100);

/// Rogue access point configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RogueApConfig {
    /// Network name to announce
    pub ssid: String,
    /// Address the beacons come from
    pub bssid: MacAddress,
    /// Channel to beacon on
    pub channel: u8,
    /// Advertise WPA2 instead of an open network
    pub encryption: bool,
}

impl Default for RogueApConfig {
    fn default() -> Self {
        Self {
            ssid: "FreeWiFi".to_string(),
            bssid: MacAddress::random(),
            channel: 1,
            encryption: true,
        }
    }
}

impl RogueApConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ssid.len() > 32 {
            return Err(WirelessError::config(format!(
                "SSID '{}' is longer than 32 bytes",
                self.ssid
            )));
        }
        if channel_to_frequency(self.channel).is_none() {
            return Err(WirelessError::InvalidChannel(self.channel as u32));
        }
        if !self.bssid.is_station() {
            return Err(WirelessError::InvalidMac(format!(
                "{} cannot be used as BSSID",
                self.bssid
            )));
        }
        Ok(())
    }
}

struct Beaconing {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Beacon loop lifecycle with an activation guard
#[derive(Default)]
pub struct RogueAp {
    active: AtomicBool,
    activations: AtomicU64,
    beaconing: Mutex<Option<Beaconing>>,
}

impl RogueAp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of beacon loops ever started
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::SeqCst)
    }

    /// Start beaconing `config`. Fails while a loop is already running.
    pub async fn activate(
        &self,
        config: RogueApConfig,
        channel: Arc<ChannelResource>,
        hop: &HopControl,
        parent: &CancellationToken,
    ) -> Result<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WirelessError::RogueApActive);
        }
        if let Err(e) = config.validate() {
            self.active.store(false, Ordering::SeqCst);
            return Err(e);
        }

        // Stop hopping for as long as the AP is up
        hop.update(|state| state.ap_pin = Some(config.channel));
        {
            let guard = channel.lock().await;
            if let Err(e) = guard.tune(config.channel).await {
                tracing::warn!(channel = config.channel, "Error switching to AP channel: {}", e);
            }
        }

        self.activations.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "Sending beacons as SSID {} ({}) on channel {} (encryption:{})",
            config.ssid,
            config.bssid,
            config.channel,
            config.encryption
        );

        let cancel = parent.child_token();
        let task = tokio::spawn(beacon_loop(config, channel, cancel.clone()));
        let mut slot = self.beaconing.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Beaconing { cancel, task });
        Ok(())
    }

    /// Stop the beacon loop and wait for it. The AP channel pin is kept
    /// until the operator clears it.
    pub async fn deactivate(&self) -> Result<()> {
        let beaconing = self
            .beaconing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(beaconing) = beaconing else {
            return Err(WirelessError::config("access point is not running"));
        };
        beaconing.cancel.cancel();
        if let Err(e) = beaconing.task.await {
            tracing::warn!("Beacon task ended abnormally: {}", e);
        }
        self.active.store(false, Ordering::SeqCst);
        tracing::info!("Access point stopped");
        Ok(())
    }
}

async fn beacon_loop(config: RogueApConfig, channel: Arc<ChannelResource>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(BEACON_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seq: u16 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let beacon = BeaconFrame::new(
            config.bssid,
            &config.ssid,
            config.channel,
            config.encryption,
            seq,
        )
        .to_bytes();
        seq = (seq + 1) & 0x0FFF;

        let guard = channel.lock().await;
        if let Err(e) = guard.tune(config.channel).await {
            tracing::debug!("Error switching to AP channel: {}", e);
        }
        if let Err(e) = guard.inject(&beacon) {
            tracing::debug!("Could not send beacon: {}", e);
        }
    }
}
