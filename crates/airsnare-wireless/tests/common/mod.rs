#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use airsnare_wireless::frames::{crc32, BeaconFrame};
use airsnare_wireless::radiotap::{channel_to_frequency, FLAG_BAD_FCS, FLAG_FCS};
use airsnare_wireless::{
    EngineConfig, FrameSource, MacAddress, PcapWriter, Radio, RawFrame, ReadOutcome, Result,
    WirelessError,
};

pub fn mac(s: &str) -> MacAddress {
    s.parse().expect("valid mac")
}

/// Frame source that plays a script and then times out forever
pub struct ScriptedSource {
    frames: VecDeque<Vec<u8>>,
    closes: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<ReadOutcome> {
        match self.frames.pop_front() {
            Some(data) => Ok(ReadOutcome::Frame(RawFrame::new(data))),
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(ReadOutcome::Timeout)
            }
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory radio recording channel changes and injections
pub struct MockRadio {
    pub frequencies: Vec<u16>,
    pub script: Mutex<Vec<Vec<u8>>>,
    pub down: AtomicBool,
    pub bring_ups: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub channels: Mutex<Vec<u8>>,
    pub injected: Mutex<Vec<Vec<u8>>>,
    /// Injections attempted after the capture source was closed
    pub late_injections: AtomicUsize,
    pub releases: AtomicUsize,
}

impl MockRadio {
    pub fn new(script: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            frequencies: [1u8, 6, 11]
                .iter()
                .filter_map(|c| channel_to_frequency(*c))
                .collect(),
            script: Mutex::new(script),
            down: AtomicBool::new(false),
            bring_ups: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            channels: Mutex::new(Vec::new()),
            injected: Mutex::new(Vec::new()),
            late_injections: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn injected(&self) -> Vec<Vec<u8>> {
        self.injected.lock().unwrap().clone()
    }

    pub fn channel_history(&self) -> Vec<u8> {
        self.channels.lock().unwrap().clone()
    }
}

impl Radio for MockRadio {
    fn interface(&self) -> &str {
        "mock0"
    }

    fn open_capture(&self) -> Result<Box<dyn FrameSource>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(WirelessError::InterfaceDown("mock0".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let frames = std::mem::take(&mut *self.script.lock().unwrap());
        Ok(Box::new(ScriptedSource {
            frames: frames.into(),
            closes: self.closes.clone(),
        }))
    }

    fn bring_up(&self) -> Result<()> {
        self.bring_ups.fetch_add(1, Ordering::SeqCst);
        self.down.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn supported_frequencies(&self) -> Result<Vec<u16>> {
        Ok(self.frequencies.clone())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        self.channels.lock().unwrap().push(channel);
        Ok(())
    }

    fn inject(&self, frame: &[u8]) -> Result<usize> {
        if self.closes() > 0 {
            self.late_injections.fetch_add(1, Ordering::SeqCst);
        }
        self.injected.lock().unwrap().push(frame.to_vec());
        Ok(frame.len())
    }

    fn mac_address(&self) -> Result<MacAddress> {
        Ok(mac("02:00:00:00:00:01"))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Live configuration writing handshakes below `dir`
pub fn live_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        handshakes_file: dir.join("handshakes.pcap"),
        hop_period_ms: 50,
        ..EngineConfig::default()
    }
}

/// flags + channel + antenna signal radiotap header (15 bytes)
pub fn radiotap(freq: u16, signal: i8, flags: u8) -> Vec<u8> {
    let mut rt = vec![0x00, 0x00, 0x0F, 0x00, 0x2A, 0x00, 0x00, 0x00, flags, 0x00];
    rt.extend_from_slice(&freq.to_le_bytes());
    rt.extend_from_slice(&[0xA0, 0x00]);
    rt.push(signal as u8);
    rt
}

pub fn beacon(bssid: MacAddress, ssid: &str, channel: u8, encrypted: bool) -> Vec<u8> {
    let freq = channel_to_frequency(channel).expect("valid channel");
    let mut packet = radiotap(freq, -40, 0);
    packet.extend_from_slice(&BeaconFrame::new(bssid, ssid, channel, encrypted, 0).to_bytes());
    packet
}

/// Beacon (`0x80`) or probe response (`0x50`) advertising WPS `attributes`
pub fn wps_frame(
    bssid: MacAddress,
    subtype: u8,
    channel: u8,
    attributes: &[(u16, &[u8])],
) -> Vec<u8> {
    let freq = channel_to_frequency(channel).expect("valid channel");
    let mut packet = radiotap(freq, -40, 0);
    packet.extend_from_slice(&[subtype, 0x00, 0x00, 0x00]);
    packet.extend_from_slice(MacAddress::BROADCAST.as_bytes());
    packet.extend_from_slice(bssid.as_bytes());
    packet.extend_from_slice(bssid.as_bytes());
    packet.extend_from_slice(&[0x00, 0x00]);
    // timestamp, beacon interval, capabilities (ESS)
    packet.extend_from_slice(&[0u8; 8]);
    packet.extend_from_slice(&[0x64, 0x00, 0x01, 0x00]);
    packet.extend_from_slice(&[0x00, 0x04]);
    packet.extend_from_slice(b"corp");
    packet.extend_from_slice(&[0x03, 0x01, channel]);

    let mut wps = vec![0x00, 0x50, 0xF2, 0x04];
    for (kind, value) in attributes {
        wps.extend_from_slice(&kind.to_be_bytes());
        wps.extend_from_slice(&(value.len() as u16).to_be_bytes());
        wps.extend_from_slice(value);
    }
    packet.push(0xDD);
    packet.push(wps.len() as u8);
    packet.extend_from_slice(&wps);
    packet
}

/// Same beacon with an FCS that does not match
pub fn corrupt_beacon(bssid: MacAddress, ssid: &str, channel: u8) -> Vec<u8> {
    let freq = channel_to_frequency(channel).expect("valid channel");
    let frame = BeaconFrame::new(bssid, ssid, channel, true, 0).to_bytes();
    let mut packet = radiotap(freq, -40, FLAG_FCS);
    packet.extend_from_slice(&frame);
    packet.extend_from_slice(&(crc32(&frame) ^ 0xDEAD_BEEF).to_le_bytes());
    packet
}

/// Set the driver's "bad FCS" radiotap flag
pub fn mark_bad_fcs(mut packet: Vec<u8>) -> Vec<u8> {
    packet[8] |= FLAG_BAD_FCS;
    packet
}

fn data_header(bssid: MacAddress, client: MacAddress) -> Vec<u8> {
    // FromDS data frame: addr1 = client, addr2 = BSSID, addr3 = source
    let mut frame = vec![0x08, 0x02, 0x00, 0x00];
    frame.extend_from_slice(client.as_bytes());
    frame.extend_from_slice(bssid.as_bytes());
    frame.extend_from_slice(bssid.as_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame
}

/// Data frame from `bssid` to `client`, `total_len` bytes including radiotap
pub fn data_frame(bssid: MacAddress, client: MacAddress, total_len: usize) -> Vec<u8> {
    let mut packet = radiotap(2437, -50, 0);
    packet.extend_from_slice(&data_header(bssid, client));
    packet.resize(total_len, 0x5A);
    packet
}

/// EAPOL-Key message 1 from `bssid` to `client` carrying a PMKID KDE
pub fn eapol_m1_with_pmkid(bssid: MacAddress, client: MacAddress, pmkid: [u8; 16]) -> Vec<u8> {
    let mut kde = vec![0xDD, 0x14, 0x00, 0x0F, 0xAC, 0x04];
    kde.extend_from_slice(&pmkid);

    let mut key = vec![0u8; 95];
    key[0] = 2;
    key[1..3].copy_from_slice(&0x008Au16.to_be_bytes());
    key[5..13].copy_from_slice(&1u64.to_be_bytes());
    key[93..95].copy_from_slice(&(kde.len() as u16).to_be_bytes());
    key.extend_from_slice(&kde);

    let mut packet = radiotap(2437, -50, 0);
    packet.extend_from_slice(&data_header(bssid, client));
    packet.extend_from_slice(&[0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E]);
    packet.extend_from_slice(&[0x02, 0x03]);
    packet.extend_from_slice(&(key.len() as u16).to_be_bytes());
    packet.extend_from_slice(&key);
    packet
}

/// Write `packets` to a radiotap pcap file
pub fn write_capture(path: &Path, packets: &[Vec<u8>]) {
    let file = std::fs::File::create(path).expect("create capture");
    let mut writer = PcapWriter::new(file).expect("pcap header");
    for packet in packets {
        writer
            .write_packet(SystemTime::now(), packet)
            .expect("write packet");
    }
    writer.flush().expect("flush");
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
