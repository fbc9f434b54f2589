//! Recon engine
//!
//! Owns a capture session: the reader thread, the dispatch loop, the channel
//! hopper and the rogue access point. Attack sequencers run on the caller's
//! task and register with the write barrier so that stopping waits for them.
//!
//! Stopping is ordered: raise the stopping flag, stop beaconing, drain the
//! barrier, cancel the session, then join dispatch, hopper and reader. The
//! reader closes the frame source last.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::attack::{AttackContext, AttackKind, AttackPolicy, AttackStats};
use crate::barrier::WriteBarrier;
use crate::capture::{spawn_reader, ReaderExit, CAPTURE_QUEUE};
use crate::channel::{ChannelResource, TrafficCounters, TrafficStats};
use crate::classify::{Classifier, DecodedFrame, FrameEvent};
use crate::config::EngineConfig;
use crate::error::{Result, WirelessError};
use crate::frames::MacAddress;
use crate::handshake::HandshakeRecorder;
use crate::hopper::{self, HopControl, HopState};
use crate::radio::Radio;
use crate::radiotap::{channel_to_frequency, frequency_to_channel};
use crate::registry::{DeviceKind, DeviceRegistry, SessionDevice};
use crate::rogue_ap::RogueAp;
use crate::source::{FrameSource, RawFrame, ReplaySource};

/// Engine events buffered per subscriber
pub const EVENT_QUEUE: usize = 256;

/// Notable things seen while running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    AccessPointNew {
        bssid: MacAddress,
        essid: Option<String>,
        channel: u8,
        encryption: String,
    },
    ClientNew {
        station: MacAddress,
        bssid: MacAddress,
    },
    ClientProbe {
        station: MacAddress,
        essid: Option<String>,
        rssi: i8,
    },
    Handshake {
        bssid: MacAddress,
        station: MacAddress,
        message: u8,
        pmkid: bool,
    },
    /// The frame source is exhausted or failed
    CaptureEnded,
}

struct Session {
    cancel: CancellationToken,
    dispatch: JoinHandle<()>,
    reader: JoinHandle<ReaderExit>,
    hopper: Option<JoinHandle<()>>,
}

#[derive(Clone)]
struct LiveContext {
    attack: AttackContext,
    cancel: CancellationToken,
}

/// 802.11 recon and attack engine
pub struct Engine {
    radio: Arc<dyn Radio>,
    registry: Arc<dyn DeviceRegistry>,
    config: Arc<RwLock<EngineConfig>>,
    filter: RwLock<Option<MacAddress>>,
    hop: Arc<HopControl>,
    counters: Arc<TrafficCounters>,
    barrier: Arc<WriteBarrier>,
    stopping: Arc<AtomicBool>,
    rogue: RogueAp,
    events: broadcast::Sender<EngineEvent>,
    session: tokio::sync::Mutex<Option<Session>>,
    live: RwLock<Option<LiveContext>>,
}

impl Engine {
    pub fn new(config: EngineConfig, radio: Arc<dyn Radio>, registry: Arc<dyn DeviceRegistry>) -> Self {
        let hop = HopControl::new(HopState {
            frequencies: config
                .channels
                .iter()
                .filter_map(|c| channel_to_frequency(*c))
                .collect(),
            period: config.hop_period(),
            filter_pin: None,
            ap_pin: None,
        });
        let (events, _) = broadcast::channel(EVENT_QUEUE);

        Self {
            radio,
            registry,
            config: Arc::new(RwLock::new(config)),
            filter: RwLock::new(None),
            hop: Arc::new(hop),
            counters: Arc::new(TrafficCounters::default()),
            barrier: WriteBarrier::new(),
            stopping: Arc::new(AtomicBool::new(false)),
            rogue: RogueAp::new(),
            events,
            session: tokio::sync::Mutex::new(None),
            live: RwLock::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub fn interface(&self) -> &str {
        self.radio.interface()
    }

    /// Snapshot of the current parameters
    pub fn config(&self) -> EngineConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Change one operator parameter. Most take effect on the next start.
    pub fn set_param(&self, param: &str, value: &str) -> Result<()> {
        let period = {
            let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
            config.set(param, value)?;
            config.hop_period()
        };
        if param == "wifi.hop.period" {
            self.hop.update(|state| state.period = period);
        }
        Ok(())
    }

    pub fn stats(&self) -> TrafficStats {
        self.counters.snapshot()
    }

    pub fn hop_state(&self) -> HopState {
        self.hop.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.live_context().is_ok()
    }

    /// Channel the radio is on, or 0 while stopped
    pub fn current_channel(&self) -> u8 {
        self.live_context()
            .map(|live| live.attack.channel.current())
            .unwrap_or(0)
    }

    /// Number of times the rogue AP has been brought up
    pub fn ap_activations(&self) -> u64 {
        self.rogue.activations()
    }

    pub fn is_ap_active(&self) -> bool {
        self.rogue.is_active()
    }

    fn live_context(&self) -> Result<LiveContext> {
        self.live
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(WirelessError::NotRunning)
    }

    /// Start capturing, dispatching and hopping
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(WirelessError::AlreadyRunning);
        }
        if self.rogue.is_active() {
            // Left over from a session that ended while the AP was coming up
            let _ = self.rogue.deactivate().await;
        }

        let config = self.config();
        let hardware = config.source_file.is_none();
        let mut source: Box<dyn FrameSource> = match config.source_path() {
            Some(path) => {
                tracing::info!(target: "wifi", path = %path.display(), "Reading frames from capture file");
                Box::new(ReplaySource::open(&path)?)
            }
            None => self.open_live_capture()?,
        };

        let channel = Arc::new(ChannelResource::new(
            self.radio.clone(),
            self.counters.clone(),
            hardware,
        ));
        let mut station = MacAddress::random();
        if hardware {
            if let Err(e) = self.prepare_radio(&channel, &config).await {
                source.close();
                return Err(e);
            }
            match self.radio.mac_address() {
                Ok(mac) => station = mac,
                Err(e) => tracing::debug!("Using random station address: {}", e),
            }
        } else {
            self.hop.update(|state| state.period = config.hop_period());
        }

        self.stopping.store(false, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
        let reader = spawn_reader(source, tx, &cancel);

        let dispatcher = Dispatcher {
            registry: self.registry.clone(),
            config: self.config.clone(),
            channel: channel.clone(),
            counters: self.counters.clone(),
            events: self.events.clone(),
            recorder: HandshakeRecorder::new(config.handshakes_path()),
        };
        let dispatch = tokio::spawn(dispatcher.run(rx, cancel.clone()));
        let hopper = hardware.then(|| {
            tokio::spawn(hopper::run(
                self.hop.clone(),
                channel.clone(),
                cancel.clone(),
            ))
        });

        *self.live.write().unwrap_or_else(|e| e.into_inner()) = Some(LiveContext {
            attack: AttackContext {
                registry: self.registry.clone(),
                channel,
                barrier: self.barrier.clone(),
                stopping: self.stopping.clone(),
                station,
            },
            cancel: cancel.clone(),
        });
        *session = Some(Session {
            cancel,
            dispatch,
            reader,
            hopper,
        });

        tracing::info!(target: "wifi", iface = %self.radio.interface(), hardware, "wifi recon started");
        Ok(())
    }

    /// Open the live capture, bringing the interface up once if it is down
    fn open_live_capture(&self) -> Result<Box<dyn FrameSource>> {
        match self.radio.open_capture() {
            Ok(source) => Ok(source),
            Err(e) if e.is_interface_down() => {
                tracing::warn!(iface = %self.radio.interface(), "Interface is down, bringing it up");
                self.radio.bring_up()?;
                self.radio.open_capture()
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare_radio(&self, channel: &ChannelResource, config: &EngineConfig) -> Result<()> {
        // First tune doubles as a check that the radio accepts channel changes
        channel.lock().await.force_tune(1).await?;

        let frequencies = if config.channels.is_empty() {
            self.supported_frequencies().await?
        } else {
            channels_to_frequencies(&config.channels)?
        };
        if frequencies.is_empty() {
            return Err(WirelessError::Channel(format!(
                "{} reports no usable frequencies",
                self.radio.interface()
            )));
        }
        tracing::debug!(count = frequencies.len(), "Hopping frequencies resolved");
        self.hop.update(|state| {
            state.frequencies = frequencies;
            state.period = config.hop_period();
        });
        Ok(())
    }

    async fn supported_frequencies(&self) -> Result<Vec<u16>> {
        let radio = self.radio.clone();
        tokio::task::spawn_blocking(move || radio.supported_frequencies())
            .await
            .map_err(|e| WirelessError::System(format!("frequency query panicked: {}", e)))?
    }

    /// Stop the session and release the radio
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return Err(WirelessError::NotRunning);
        };

        self.stopping.store(true, Ordering::SeqCst);
        self.live.write().unwrap_or_else(|e| e.into_inner()).take();

        if self.rogue.is_active() {
            if let Err(e) = self.rogue.deactivate().await {
                tracing::debug!("Stopping access point: {}", e);
            }
        }

        // Sequencers finish their current frame before the radio goes away
        self.barrier.wait().await;
        session.cancel.cancel();

        if let Err(e) = session.dispatch.await {
            tracing::warn!("Dispatch task ended abnormally: {}", e);
        }
        if let Some(hopper) = session.hopper {
            if let Err(e) = hopper.await {
                tracing::warn!("Hopper task ended abnormally: {}", e);
            }
        }
        match session.reader.await {
            Ok(exit) => tracing::debug!(?exit, "Capture reader joined"),
            Err(e) => tracing::warn!("Capture reader ended abnormally: {}", e),
        }
        self.radio.release();

        tracing::info!(target: "wifi", "wifi recon stopped");
        Ok(())
    }

    /// Restrict recon to one access point and hold its channel
    pub fn set_filter(&self, bssid: MacAddress) -> Result<()> {
        let ap = self
            .registry
            .get(&bssid)
            .filter(SessionDevice::is_access_point)
            .ok_or_else(|| WirelessError::NotFound(bssid.to_string()))?;

        *self.filter.write().unwrap_or_else(|e| e.into_inner()) = Some(bssid);
        let pinned = (ap.channel != 0).then_some(ap.channel);
        self.hop.update(|state| state.filter_pin = pinned);
        tracing::info!(target: "wifi", %bssid, channel = ap.channel, "Recon restricted to access point");
        Ok(())
    }

    /// Drop the target filter and resume hopping over the current channel
    /// set. A beaconing access point keeps its channel.
    pub fn clear_filter(&self) {
        *self.filter.write().unwrap_or_else(|e| e.into_inner()) = None;
        let ap_active = self.rogue.is_active();
        self.hop.update(|state| {
            state.filter_pin = None;
            if !ap_active {
                state.ap_pin = None;
            }
        });
    }

    pub fn filter(&self) -> Option<MacAddress> {
        *self.filter.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the hopping channel set. An empty list selects every channel
    /// the interface supports.
    pub async fn set_channels(&self, channels: Vec<u8>) -> Result<()> {
        let frequencies = if channels.is_empty() {
            let hardware = self
                .live_context()
                .map(|live| live.attack.channel.is_hardware())
                .unwrap_or(false);
            if hardware {
                self.supported_frequencies().await?
            } else {
                // Resolved against the interface on the next start
                Vec::new()
            }
        } else {
            channels_to_frequencies(&channels)?
        };

        // Config and hop state change together
        let state = {
            let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
            config.channels = channels;
            self.hop.update(|state| state.frequencies = frequencies)
        };
        tracing::debug!(frequencies = ?state.frequencies, "Channel set replaced");
        Ok(())
    }

    /// Deauthenticate clients of `address` (AP, client or broadcast)
    pub async fn deauth(&self, address: MacAddress) -> Result<AttackStats> {
        let policy = self.config().deauth;
        self.attack(AttackKind::Deauth, address, &policy).await
    }

    /// Associate with `address` (AP or broadcast) to solicit PMKIDs
    pub async fn associate(&self, address: MacAddress) -> Result<AttackStats> {
        let policy = self.config().assoc;
        self.attack(AttackKind::Associate, address, &policy).await
    }

    async fn attack(
        &self,
        kind: AttackKind,
        address: MacAddress,
        policy: &AttackPolicy,
    ) -> Result<AttackStats> {
        let live = self.live_context()?;
        if !live.attack.channel.is_hardware() {
            return Err(WirelessError::Unsupported(
                "cannot transmit while reading from a capture file".to_string(),
            ));
        }
        live.attack.run(kind, address, policy).await
    }

    /// Start beaconing the configured rogue access point
    pub async fn start_ap(&self) -> Result<()> {
        let live = self.live_context()?;
        if !live.attack.channel.is_hardware() {
            return Err(WirelessError::Unsupported(
                "cannot beacon while reading from a capture file".to_string(),
            ));
        }
        let config = self.config().ap;
        self.rogue
            .activate(config, live.attack.channel.clone(), &self.hop, &live.cancel)
            .await
    }

    pub async fn stop_ap(&self) -> Result<()> {
        self.rogue.deactivate().await
    }

    /// Access points, or the filtered AP's clients, strongest first
    pub fn stations(&self) -> Vec<SessionDevice> {
        let mut list = match self.filter() {
            Some(bssid) => self.registry.clients_of(&bssid),
            None => self.registry.access_points(),
        };
        list.sort_by(|a, b| b.rssi.cmp(&a.rssi).then(a.address.cmp(&b.address)));
        list
    }

    /// Access points with their WPS attributes. Broadcast lists every AP
    /// that advertised WPS.
    pub fn wps(&self, address: MacAddress) -> Result<Vec<SessionDevice>> {
        if address.is_broadcast() {
            let mut list: Vec<_> = self
                .registry
                .access_points()
                .into_iter()
                .filter(|ap| !ap.wps.is_empty())
                .collect();
            list.sort_by(|a, b| b.rssi.cmp(&a.rssi));
            return Ok(list);
        }
        self.registry
            .get(&address)
            .filter(SessionDevice::is_access_point)
            .map(|ap| vec![ap])
            .ok_or_else(|| WirelessError::NotFound(address.to_string()))
    }
}

/// Map channel numbers to frequencies, rejecting unknown channels
pub fn channels_to_frequencies(channels: &[u8]) -> Result<Vec<u16>> {
    channels
        .iter()
        .map(|c| channel_to_frequency(*c).ok_or(WirelessError::InvalidChannel(*c as u32)))
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Applies classified frames to the registry, counters and handshake file
struct Dispatcher {
    registry: Arc<dyn DeviceRegistry>,
    config: Arc<RwLock<EngineConfig>>,
    channel: Arc<ChannelResource>,
    counters: Arc<TrafficCounters>,
    events: broadcast::Sender<EngineEvent>,
    recorder: HandshakeRecorder,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<RawFrame>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        let _ = self.events.send(EngineEvent::CaptureEnded);
                        break;
                    }
                },
            };
            self.handle(&frame);
        }
        tracing::debug!(
            handshake_frames = self.recorder.frames_written(),
            "Dispatch loop stopped"
        );
    }

    fn handle(&mut self, frame: &RawFrame) {
        self.counters.record_frame(frame.data.len());
        let Some(decoded) = DecodedFrame::decode(&frame.data) else {
            tracing::trace!(len = frame.data.len(), "Undecodable frame");
            return;
        };
        let (min_rssi, skip_broken) = {
            let config = self.config.read().unwrap_or_else(|e| e.into_inner());
            (config.min_rssi, config.skip_broken)
        };
        if skip_broken && !decoded.checksum_valid() {
            tracing::trace!("Skipping frame with invalid checksum");
            return;
        }

        for event in Classifier::new(min_rssi).classify(&decoded) {
            self.apply(event, frame);
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn apply(&mut self, event: FrameEvent, frame: &RawFrame) {
        match event {
            FrameEvent::AccessPoint {
                bssid,
                essid,
                channel,
                frequency,
                rssi,
                encryption,
                wps,
                beacon,
            } => {
                let channel = channel.unwrap_or_else(|| self.channel.current());
                let frequency = frequency
                    .or_else(|| channel_to_frequency(channel))
                    .unwrap_or(0);
                let created = self.registry.upsert(bssid, DeviceKind::AccessPoint, &mut |ap| {
                    ap.kind = DeviceKind::AccessPoint;
                    if essid.is_some() {
                        ap.essid = essid.clone();
                    }
                    ap.channel = channel;
                    ap.frequency = frequency;
                    ap.rssi = rssi;
                    ap.set_encryption(&encryption);
                    // Beacons carry fewer WPS attributes than probe responses
                    ap.wps.extend(wps.clone());
                    ap.touch();
                });
                if created {
                    tracing::info!(
                        target: "wifi",
                        %bssid,
                        essid = essid.as_deref().unwrap_or("<hidden>"),
                        channel,
                        encryption = %encryption.encryption,
                        "New access point"
                    );
                    self.emit(EngineEvent::AccessPointNew {
                        bssid,
                        essid,
                        channel,
                        encryption: encryption.encryption,
                    });
                }
                if beacon {
                    self.recorder.remember_beacon(bssid, frame);
                }
            }
            FrameEvent::Probe {
                station,
                essid,
                rssi,
            } => {
                tracing::debug!(%station, essid = essid.as_deref().unwrap_or(""), rssi, "Probe request");
                self.emit(EngineEvent::ClientProbe {
                    station,
                    essid,
                    rssi,
                });
            }
            FrameEvent::Client {
                station,
                bssid,
                rssi,
                frequency,
            } => {
                let Some(ap) = self.registry.get(&bssid).filter(SessionDevice::is_access_point) else {
                    return;
                };
                let channel = frequency
                    .and_then(frequency_to_channel)
                    .unwrap_or(ap.channel);
                let created = self.registry.upsert(station, DeviceKind::Client { bssid }, &mut |client| {
                    if client.is_access_point() {
                        return;
                    }
                    client.kind = DeviceKind::Client { bssid };
                    client.essid = ap.essid.clone();
                    client.rssi = rssi;
                    client.frequency = frequency.unwrap_or(ap.frequency);
                    client.channel = channel;
                    client.touch();
                });
                if created {
                    tracing::info!(target: "wifi", %station, %bssid, "New client");
                    self.emit(EngineEvent::ClientNew { station, bssid });
                }
            }
            FrameEvent::Traffic {
                source,
                destination,
                bytes,
            } => {
                self.registry.update(&source, &mut |d| d.sent += bytes);
                self.registry.update(&destination, &mut |d| d.received += bytes);
            }
            FrameEvent::Handshake {
                bssid,
                station,
                key,
            } => {
                let pmkid = key.pmkid.map(|p| to_hex(&p));
                let mut progress = |device: &mut SessionDevice| {
                    device.handshake.record_message(key.message);
                    if pmkid.is_some() {
                        device.handshake.pmkid = pmkid.clone();
                    }
                };
                self.registry.update(&bssid, &mut progress);
                self.registry.update(&station, &mut progress);
                self.recorder.record(bssid, frame);

                if pmkid.is_some() {
                    tracing::info!(target: "wifi", %bssid, %station, "Captured PMKID");
                } else {
                    tracing::info!(target: "wifi", %bssid, %station, message = key.message, "Captured handshake message");
                }
                self.emit(EngineEvent::Handshake {
                    bssid,
                    station,
                    message: key.message,
                    pmkid: pmkid.is_some(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_to_frequencies() {
        assert_eq!(channels_to_frequencies(&[1, 6, 36]).unwrap(), vec![2412, 2437, 5180]);
        assert!(matches!(
            channels_to_frequencies(&[1, 15]),
            Err(WirelessError::InvalidChannel(15))
        ));
        assert!(channels_to_frequencies(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x10]), "00ab10");
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::ClientNew {
            station: "bb:bb:bb:bb:bb:bb".parse().unwrap(),
            bssid: "aa:aa:aa:aa:aa:aa".parse().unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "client_new");
        assert_eq!(json["station"], "bb:bb:bb:bb:bb:bb");
    }
}
