//! Channel hopping scheduler
//!
//! Cycles the channel resource through the configured frequencies, one per
//! dwell tick, or holds a pinned channel. Configuration changes replace the
//! whole [`HopState`] and wake the scheduler through a coalescing signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelResource;
use crate::radiotap::frequency_to_channel;

/// Channel sets larger than this span both bands and get a doubled dwell
const SINGLE_BAND_CHANNELS: usize = 14;

/// Snapshot of what the scheduler should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopState {
    /// Frequencies (MHz) to cycle through
    pub frequencies: Vec<u16>,
    /// Dwell time per frequency
    pub period: Duration,
    /// Channel held for the access point filter
    pub filter_pin: Option<u8>,
    /// Channel held for the rogue access point; wins over the filter pin
    pub ap_pin: Option<u8>,
}

impl HopState {
    /// Effective dwell time for the current channel set
    pub fn dwell(&self) -> Duration {
        if self.frequencies.len() > SINGLE_BAND_CHANNELS {
            self.period * 2
        } else {
            self.period
        }
    }

    /// Channel to hold instead of hopping, if any
    pub fn pinned(&self) -> Option<u8> {
        self.ap_pin.or(self.filter_pin)
    }

    pub fn is_hopping(&self) -> bool {
        self.pinned().is_none() && self.frequencies.len() > 1
    }
}

/// Shared hop configuration plus the change signal
#[derive(Debug)]
pub struct HopControl {
    state: Mutex<HopState>,
    changed: Notify,
    active: AtomicBool,
}

impl HopControl {
    pub fn new(state: HopState) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Notify::new(),
            active: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> HopState {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the state through `f` and wake the scheduler if it runs
    pub fn update(&self, f: impl FnOnce(&mut HopState)) -> HopState {
        let next = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let mut next = state.clone();
            f(&mut next);
            *state = next.clone();
            next
        };
        if self.is_active() {
            // A pending, unconsumed signal is simply overwritten
            self.changed.notify_one();
        }
        next
    }

    /// Scheduler task is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Run the scheduler until `cancel` fires
pub async fn run(control: Arc<HopControl>, channel: Arc<ChannelResource>, cancel: CancellationToken) {
    control.active.store(true, Ordering::Release);
    tracing::debug!("Channel hopper started");

    let mut index = 0usize;
    loop {
        let state = control.snapshot();
        let target = match state.pinned() {
            Some(ch) => Some(ch),
            None if state.frequencies.is_empty() => None,
            None => {
                let freq = state.frequencies[index % state.frequencies.len()];
                index = index.wrapping_add(1);
                frequency_to_channel(freq)
            }
        };

        if let Some(ch) = target {
            // Hold the resource only for the tune itself
            let guard = channel.lock().await;
            if let Err(e) = guard.tune(ch).await {
                tracing::warn!(channel = ch, "Error while hopping: {}", e);
            }
            drop(guard);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = control.changed.notified() => {
                tracing::debug!("Hop configuration changed");
                index = 0;
            }
            _ = tokio::time::sleep(state.dwell()) => {}
        }
    }

    control.active.store(false, Ordering::Release);
    tracing::debug!("Channel hopper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(freqs: &[u16]) -> HopState {
        HopState {
            frequencies: freqs.to_vec(),
            period: Duration::from_millis(250),
            filter_pin: None,
            ap_pin: None,
        }
    }

    #[test]
    fn test_dwell_doubles_for_both_bands() {
        let small = state(&[2412, 2437, 2462]);
        assert_eq!(small.dwell(), Duration::from_millis(250));

        let freqs: Vec<u16> = (1..=13).map(|c| 2407 + c * 5).chain([5180, 5200]).collect();
        assert_eq!(state(&freqs).dwell(), Duration::from_millis(500));
    }

    #[test]
    fn test_update_replaces_state() {
        let control = HopControl::new(state(&[2412, 2437]));
        assert!(control.snapshot().is_hopping());

        control.update(|s| s.filter_pin = Some(6));
        let snap = control.snapshot();
        assert_eq!(snap.pinned(), Some(6));
        assert_eq!(snap.frequencies, vec![2412, 2437]);
        assert!(!snap.is_hopping());
    }

    #[test]
    fn test_ap_pin_wins_over_filter_pin() {
        let control = HopControl::new(state(&[2412, 2437, 2462]));
        control.update(|s| s.ap_pin = Some(6));
        control.update(|s| s.filter_pin = Some(11));
        assert_eq!(control.snapshot().pinned(), Some(6));

        control.update(|s| s.filter_pin = None);
        let snap = control.snapshot();
        assert_eq!(snap.pinned(), Some(6));
        assert!(!snap.is_hopping());

        control.update(|s| s.ap_pin = None);
        assert!(control.snapshot().is_hopping());
    }

    #[test]
    fn test_update_does_not_block_when_inactive() {
        let control = HopControl::new(state(&[2412]));
        assert!(!control.is_active());
        for _ in 0..100 {
            control.update(|s| s.frequencies = vec![2437]);
        }
        assert_eq!(control.snapshot().frequencies, vec![2437]);
    }
}
