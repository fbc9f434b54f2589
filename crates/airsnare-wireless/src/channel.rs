//! Shared radio channel resource
//!
//! Exactly one writer at a time may tune or transmit: hopper ticks, attack
//! sequencers and the rogue AP all go through [`ChannelResource::lock`].
//! The currently tuned channel is mirrored in an atomic so the dispatch
//! loop can read it per frame without contending for the lock.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, WirelessError};
use crate::radio::Radio;
use crate::radiotap::channel_to_frequency;

/// Global packet and injection counters
#[derive(Debug, Default)]
pub struct TrafficCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    injected: AtomicU64,
    injected_bytes: AtomicU64,
    inject_errors: AtomicU64,
}

impl TrafficCounters {
    pub fn record_frame(&self, len: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_injection(&self, result: &Result<usize>) {
        match result {
            Ok(n) => {
                self.injected.fetch_add(1, Ordering::Relaxed);
                self.injected_bytes.fetch_add(*n as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.inject_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> TrafficStats {
        TrafficStats {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            injected: self.injected.load(Ordering::Relaxed),
            injected_bytes: self.injected_bytes.load(Ordering::Relaxed),
            inject_errors: self.inject_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point in time copy of [`TrafficCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    pub packets: u64,
    pub bytes: u64,
    pub injected: u64,
    pub injected_bytes: u64,
    pub inject_errors: u64,
}

/// The single tunable channel of the radio
pub struct ChannelResource {
    radio: Arc<dyn Radio>,
    counters: Arc<TrafficCounters>,
    writer: Mutex<()>,
    current: AtomicU8,
    hardware: bool,
}

impl ChannelResource {
    /// `hardware` is false when frames come from a replay file: tuning only
    /// updates the recorded channel and transmission is refused.
    pub fn new(radio: Arc<dyn Radio>, counters: Arc<TrafficCounters>, hardware: bool) -> Self {
        Self {
            radio,
            counters,
            writer: Mutex::new(()),
            current: AtomicU8::new(0),
            hardware,
        }
    }

    /// Channel currently tuned, 0 when unknown
    pub fn current(&self) -> u8 {
        self.current.load(Ordering::Acquire)
    }

    /// Whether a real radio sits behind this resource
    pub fn is_hardware(&self) -> bool {
        self.hardware
    }

    /// Wait for exclusive access
    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            resource: self,
            _writer: self.writer.lock().await,
        }
    }
}

/// Exclusive access to tune and transmit
pub struct ChannelGuard<'a> {
    resource: &'a ChannelResource,
    _writer: MutexGuard<'a, ()>,
}

impl ChannelGuard<'_> {
    pub fn current(&self) -> u8 {
        self.resource.current()
    }

    /// Tune unless already on `channel`
    pub async fn tune(&self, channel: u8) -> Result<()> {
        if self.current() == channel {
            return Ok(());
        }
        self.force_tune(channel).await
    }

    /// Tune even when the recorded channel already matches
    pub async fn force_tune(&self, channel: u8) -> Result<()> {
        if channel_to_frequency(channel).is_none() {
            return Err(WirelessError::InvalidChannel(channel as u32));
        }
        if self.resource.hardware {
            let radio = Arc::clone(&self.resource.radio);
            tokio::task::spawn_blocking(move || radio.set_channel(channel))
                .await
                .map_err(|e| WirelessError::Channel(format!("channel task failed: {}", e)))??;
        }
        self.resource.current.store(channel, Ordering::Release);
        tracing::trace!(channel, "Tuned");
        Ok(())
    }

    /// Transmit one 802.11 frame on the current channel
    pub fn inject(&self, frame: &[u8]) -> Result<usize> {
        let result = if self.resource.hardware {
            self.resource.radio.inject(frame)
        } else {
            Err(WirelessError::Unsupported(
                "cannot transmit while reading from a capture file".into(),
            ))
        };
        self.resource.counters.record_injection(&result);
        result
    }
}
