#![cfg(target_os = "linux")]

mod common;

use std::sync::Arc;

use airsnare_wireless::{Command, Engine, MemoryRegistry, WirelessError};

use common::*;

async fn run(engine: &Engine, line: &str) -> Result<String, WirelessError> {
    line.parse::<Command>()?.execute(engine).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn console_session() {
    let dir = tempfile::tempdir().unwrap();
    let ap = mac("aa:aa:aa:aa:aa:aa");
    let client = mac("bb:bb:bb:bb:bb:bb");
    let radio = MockRadio::new(vec![beacon(ap, "corp", 6, true), data_frame(ap, client, 120)]);
    let engine = Engine::new(
        live_config(dir.path()),
        radio.clone(),
        Arc::new(MemoryRegistry::new()),
    );

    assert!(matches!(
        run(&engine, "wifi.deauth all").await,
        Err(WirelessError::NotRunning)
    ));
    assert!(run(&engine, "wifi.recon on").await.unwrap().contains("mock0"));
    assert!(wait_until(|| engine.registry().get(&client).is_some()).await);

    let table = run(&engine, "wifi.show").await.unwrap();
    assert!(table.contains("aa:aa:aa:aa:aa:aa"));
    assert!(table.contains("corp"));
    assert!(table.contains("WPA2"));

    run(&engine, "wifi.recon aa:aa:aa:aa:aa:aa").await.unwrap();
    let table = run(&engine, "wifi.show").await.unwrap();
    assert!(table.contains("bb:bb:bb:bb:bb:bb"));
    run(&engine, "wifi.recon clear").await.unwrap();

    assert_eq!(
        run(&engine, "wifi.recon.channel 1,11").await.unwrap(),
        "hopping on channels 1,11"
    );
    assert_eq!(engine.hop_state().frequencies, vec![2412, 2462]);
    assert!(matches!(
        run(&engine, "wifi.recon.channel 1,200").await,
        Err(WirelessError::InvalidChannel(200))
    ));

    assert_eq!(
        run(&engine, "set wifi.rssi.min -70").await.unwrap(),
        "wifi.rssi.min = -70"
    );
    assert_eq!(engine.config().min_rssi, -70);
    assert!(run(&engine, "set wifi.nope 1").await.is_err());

    let wps = run(&engine, "wifi.show.wps all").await.unwrap();
    assert_eq!(wps, "no access point advertised WPS");

    assert!(run(&engine, "wifi.ap").await.unwrap().contains("FreeWiFi"));
    assert!(matches!(
        run(&engine, "wifi.ap").await,
        Err(WirelessError::RogueApActive)
    ));
    run(&engine, "wifi.ap off").await.unwrap();

    assert_eq!(run(&engine, "wifi.recon off").await.unwrap(), "wifi recon stopped");
    assert_eq!(radio.closes(), 1);
}
