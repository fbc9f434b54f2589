#![cfg(target_os = "linux")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use airsnare_wireless::{
    DeviceKind, DeviceRegistry, Engine, EngineEvent, MemoryRegistry, PcapReader,
};

use common::*;

async fn run_replay(packets: &[Vec<u8>]) -> (tempfile::TempDir, Engine, Arc<MockRadio>, Vec<EngineEvent>) {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("capture.pcap");
    write_capture(&capture, packets);

    let mut config = live_config(dir.path());
    config.source_file = Some(capture);
    let radio = MockRadio::new(Vec::new());
    let engine = Engine::new(config, radio.clone(), Arc::new(MemoryRegistry::new()));

    let mut events = engine.subscribe();
    engine.start().await.expect("replay start");

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::CaptureEnded) => break,
                Ok(event) => seen.push(event),
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("capture should end");

    (dir, engine, radio, seen)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_registers_stations_and_drops_corrupt_frames() {
    let ap = mac("aa:aa:aa:aa:aa:aa");
    let client = mac("bb:bb:bb:bb:bb:bb");
    let rogue = mac("cc:cc:cc:cc:cc:cc");
    let beacon = beacon(ap, "corp", 6, true);
    let corrupt = corrupt_beacon(rogue, "evil", 11);
    let captured = (beacon.len() + 100 + corrupt.len()) as u64;

    let (dir, engine, radio, events) =
        run_replay(&[beacon, data_frame(ap, client, 100), corrupt]).await;

    let registry = engine.registry();
    let aps = registry.access_points();
    assert_eq!(aps.len(), 1);
    assert_eq!(aps[0].address, ap);
    assert_eq!(aps[0].essid.as_deref(), Some("corp"));
    assert_eq!(aps[0].encryption, "WPA2");
    assert_eq!(aps[0].channel, 6);
    assert_eq!(aps[0].sent, 100);

    let station = registry.get(&client).expect("client registered");
    assert_eq!(station.kind, DeviceKind::Client { bssid: ap });
    assert_eq!(station.received, 100);
    assert!(registry.get(&rogue).is_none());

    // Every captured packet counts, whatever its checksum
    let stats = engine.stats();
    assert_eq!(stats.packets, 3);
    assert_eq!(stats.bytes, captured);

    assert!(events.iter().any(|e| matches!(e, EngineEvent::AccessPointNew { bssid, .. } if *bssid == ap)));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::ClientNew { station, .. } if *station == client)));

    // Replay never touches the hardware
    assert_eq!(radio.opens.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(radio.channel_history().is_empty());
    assert!(engine.deauth(ap).await.is_err());
    assert!(radio.injected().is_empty());

    engine.stop().await.unwrap();
    assert!(!dir.path().join("handshakes.pcap").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_records_pmkid_after_beacon() {
    let ap = mac("aa:aa:aa:aa:aa:aa");
    let client = mac("bb:bb:bb:bb:bb:bb");
    let beacon = beacon(ap, "corp", 6, true);
    let eapol = eapol_m1_with_pmkid(ap, client, [0x42; 16]);

    let (dir, engine, _radio, events) = run_replay(&[beacon.clone(), eapol.clone()]).await;

    let record = engine.registry().get(&ap).unwrap();
    assert!(record.handshake.has_message(1));
    assert_eq!(record.handshake.pmkid.as_deref(), Some("42".repeat(16).as_str()));
    assert!(record.handshake.is_crackable());
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Handshake { message: 1, pmkid: true, .. }
    )));

    // Recorder flushes when the dispatch loop ends
    engine.stop().await.unwrap();

    let mut reader = PcapReader::open(&dir.path().join("handshakes.pcap")).unwrap();
    let first = reader.next_record().unwrap().expect("beacon record");
    let second = reader.next_record().unwrap().expect("eapol record");
    assert!(reader.next_record().unwrap().is_none());
    assert_eq!(first.data, beacon);
    assert_eq!(second.data, eapol);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_ignores_frames_with_bad_checksum() {
    let ap = mac("aa:aa:aa:aa:aa:aa");
    let client = mac("bb:bb:bb:bb:bb:bb");

    let (dir, engine, _radio, events) = run_replay(&[
        corrupt_beacon(ap, "corp", 6),
        mark_bad_fcs(eapol_m1_with_pmkid(ap, client, [0x42; 16])),
    ])
    .await;

    assert!(engine.registry().access_points().is_empty());
    assert!(engine.registry().get(&client).is_none());
    assert_eq!(engine.stats().packets, 2);
    assert!(events.is_empty());

    engine.stop().await.unwrap();
    assert!(!dir.path().join("handshakes.pcap").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_merges_wps_attributes() {
    let ap = mac("aa:aa:aa:aa:aa:aa");
    let response = wps_frame(
        ap,
        0x50,
        6,
        &[(0x104A, &[0x10]), (0x1021, b"ACME"), (0x1011, b"Router")],
    );
    let beacon = wps_frame(ap, 0x80, 6, &[(0x104A, &[0x20])]);

    let (_dir, engine, _radio, _events) = run_replay(&[response, beacon]).await;

    let record = engine.registry().get(&ap).expect("access point registered");
    assert_eq!(record.wps.get("Manufacturer").map(String::as_str), Some("ACME"));
    assert_eq!(record.wps.get("Device Name").map(String::as_str), Some("Router"));
    // Newer values replace older ones attribute by attribute
    assert_eq!(record.wps.get("Version").map(String::as_str), Some("2.0"));

    let listed = engine.wps(airsnare_wireless::MacAddress::BROADCAST).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].wps.len(), 3);

    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_keeps_broken_frames_when_asked() {
    let ap = mac("aa:aa:aa:aa:aa:aa");
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("capture.pcap");
    write_capture(&capture, &[corrupt_beacon(ap, "corp", 6)]);

    let mut config = live_config(dir.path());
    config.source_file = Some(capture);
    config.skip_broken = false;
    let engine = Engine::new(config, MockRadio::new(Vec::new()), Arc::new(MemoryRegistry::new()));
    engine.start().await.unwrap();

    assert!(wait_until(|| engine.registry().get(&ap).is_some()).await);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn missing_replay_file_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = live_config(dir.path());
    config.source_file = Some(dir.path().join("nope.pcap"));
    let engine = Engine::new(config, MockRadio::new(Vec::new()), Arc::new(MemoryRegistry::new()));

    let err = engine.start().await.unwrap_err();
    assert!(err.is_config_error());
    assert!(!engine.is_running());
}
