//! Virtual bus traffic and signal decoding end to end
//!
//! Run with: cargo test -p canmux-tests --test traffic_test

use std::sync::Arc;
use std::time::Duration;

use canmux::ManagerEvent;
use canmux_core::{CanFrame, Direction, NetworkConfig, NetworkError};
use canmux_signals::FileDecoderLoader;
use canmux_tests::{manager_with, virtual_catalog};
use canmux_transport::{BackendTransportProvider, VirtualBusSettings};
use tempfile::TempDir;
use tokio::time::Instant;

const POWERTRAIN_YAML: &str = r#"
meta:
  name: Powertrain
  version: "1.0"

messages:
  - id: 0x100
    name: Engine_Status
    signals:
      - name: EngineSpeed
        start_bit: 7
        length: 16
        byte_order: big_endian
        unit: rpm
      - name: CoolantTemp
        start_bit: 24
        length: 8
        offset: -40
        unit: degC
"#;

#[tokio::test(start_paused = true)]
async fn test_simulated_traffic_is_counted_and_published() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(
        &dir,
        virtual_catalog(1),
        Arc::new(BackendTransportProvider::new(VirtualBusSettings::default())),
        Arc::new(FileDecoderLoader),
    );
    let mut events = manager.subscribe();
    let id = manager.create_network(NetworkConfig::named("Sim"));
    manager.connect_network(&id, "virtual:virtual0").await.unwrap();

    tokio::time::sleep(Duration::from_millis(1005)).await;
    manager.tick(Instant::now()).await;

    let mut engine_frames = 0;
    while let Ok(event) = events.try_recv() {
        if let ManagerEvent::FrameReceived(record) = event {
            assert_eq!(record.direction, Direction::Rx);
            assert_eq!(record.bus_number, 1);
            if record.frame.id == 0x100 {
                engine_frames += 1;
            }
        }
    }
    assert_eq!(engine_frames, 3);

    let stats = manager.network_statistics(&id).unwrap();
    assert_eq!(stats.rx_count, 10);
    assert_eq!(stats.message_count, 10);
    assert_eq!(stats.error_count, 0);

    manager.disconnect_network(&id).await.unwrap();
}

#[tokio::test]
async fn test_decode_simulated_engine_frame() {
    let dir = TempDir::new().unwrap();
    let symbols = dir.path().join("powertrain.yaml");
    std::fs::write(&symbols, POWERTRAIN_YAML).unwrap();

    let mut manager = manager_with(
        &dir,
        virtual_catalog(1),
        Arc::new(BackendTransportProvider::new(VirtualBusSettings::default())),
        Arc::new(FileDecoderLoader),
    );
    let mut events = manager.subscribe();
    let id = manager.create_network(NetworkConfig::named("Powertrain"));
    assert!(manager
        .set_symbol_file(&id, symbols.to_str().unwrap())
        .unwrap());
    manager.connect_network(&id, "virtual:virtual0").await.unwrap();

    // The first burst goes out as soon as the traffic task runs
    let frame = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            manager.tick(Instant::now()).await;
            while let Ok(event) = events.try_recv() {
                if let ManagerEvent::FrameReceived(record) = event {
                    if record.frame.id == 0x100 {
                        return record.frame;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let signals = manager.decode(&id, frame.id, &frame.data).unwrap();
    let rpm = signals["EngineSpeed"].value;
    assert!((1700.0..=2900.0).contains(&rpm), "rpm {}", rpm);
    assert_eq!(signals["EngineSpeed"].unit.as_deref(), Some("rpm"));
    let coolant = signals["CoolantTemp"].value;
    assert!((40.0..=55.0).contains(&coolant), "coolant {}", coolant);

    assert!(manager.decode(&id, 0x7FF, &[0; 8]).unwrap().is_empty());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_send_rules_on_virtual_bus() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(
        &dir,
        virtual_catalog(2),
        Arc::new(BackendTransportProvider::new(VirtualBusSettings::silent())),
        Arc::new(FileDecoderLoader),
    );
    let id = manager.create_network(NetworkConfig::named("Tx"));

    let result = manager.send_message(&id, CanFrame::standard(0x123, vec![1])).await;
    assert!(matches!(result, Err(NetworkError::NotConnected)));

    manager.connect_network(&id, "virtual:virtual1").await.unwrap();
    manager
        .send_message(&id, CanFrame::standard(0x123, vec![1, 2, 3]))
        .await
        .unwrap();
    manager
        .send_message(&id, CanFrame::extended(0x18DA_F110, vec![0x02, 0x10, 0x01]))
        .await
        .unwrap();

    let oversized = manager.send_message(&id, CanFrame::standard(0x123, vec![0; 9])).await;
    assert!(matches!(oversized, Err(NetworkError::InvalidFrame(_))));
    let fd_on_classic = manager
        .send_message(&id, CanFrame::standard(0x123, vec![0; 12]).with_fd(true))
        .await;
    assert!(matches!(fd_on_classic, Err(NetworkError::InvalidFrame(_))));

    let stats = manager.network_statistics(&id).unwrap();
    assert_eq!(stats.tx_count, 2);
    assert_eq!(stats.error_count, 0);
    assert!(manager.network(&id).unwrap().is_connected());
}

#[tokio::test]
async fn test_injected_error_frames_follow_network_setting() {
    let dir = TempDir::new().unwrap();
    let provider = BackendTransportProvider::new(VirtualBusSettings::silent());
    let mut manager = manager_with(
        &dir,
        virtual_catalog(2),
        Arc::new(provider.clone()),
        Arc::new(FileDecoderLoader),
    );
    let mut events = manager.subscribe();

    let mut quiet = NetworkConfig::named("Quiet");
    quiet.enable_error_frames = false;
    let quiet = manager.create_network(quiet);
    let mut loud = NetworkConfig::named("Loud");
    loud.enable_error_frames = true;
    let loud = manager.create_network(loud);
    manager.connect_network(&quiet, "virtual:virtual0").await.unwrap();
    manager.connect_network(&loud, "virtual:virtual1").await.unwrap();

    for channel in ["virtual0", "virtual1"] {
        let channel = provider.virtual_channel(channel);
        assert!(channel.inject(CanFrame::standard(0x321, vec![0xDE, 0xAD])));
        assert!(channel.inject_error_frame());
    }
    manager.tick(Instant::now()).await;

    let quiet_stats = manager.network_statistics(&quiet).unwrap();
    assert_eq!(quiet_stats.rx_count, 1);
    assert_eq!(quiet_stats.error_count, 0);
    let loud_stats = manager.network_statistics(&loud).unwrap();
    assert_eq!(loud_stats.rx_count, 2);
    assert_eq!(loud_stats.error_count, 1);

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ManagerEvent::FrameReceived(record) = event {
            received.push((record.network_id, record.frame.error));
        }
    }
    assert_eq!(
        received,
        vec![(quiet.clone(), false), (loud.clone(), false), (loud.clone(), true)]
    );

    // Nothing reaches a disconnected channel
    manager.disconnect_network(&quiet).await.unwrap();
    assert!(!provider.virtual_channel("virtual0").inject_error_frame());
    assert!(provider.virtual_channel("virtual1").is_open());
}

#[tokio::test]
async fn test_unsupported_vendor_hardware_reports_open_failure() {
    use canmux_core::{HardwareDescriptor, HardwareKind};

    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(
        &dir,
        virtual_catalog(0),
        Arc::new(BackendTransportProvider::new(VirtualBusSettings::silent())),
        Arc::new(FileDecoderLoader),
    );
    manager
        .apply_hardware(vec![HardwareDescriptor::new(
            HardwareKind::Pcan,
            "PCAN_USBBUS1",
            "PCAN-USB",
            "PCAN channel",
        )])
        .await;
    let mut config = NetworkConfig::named("Vendor");
    config.auto_reconnect = false;
    let id = manager.create_network(config);

    let result = manager.connect_network(&id, "pcan:PCAN_USBBUS1").await;
    assert!(matches!(result, Err(NetworkError::TransportOpenFailed(_))));
    assert_eq!(
        manager.network(&id).unwrap().state(),
        canmux_core::ConnectionState::Error
    );
}
