//! Integration tests for data routing and device RPC over a discovered tree.

mod common;

use std::time::Duration;

use common::Harness;
use meshnet_base::device::{RgbawPwm, LED_BOARD_TYPE, LED_LAMP_TYPE};
use meshnet_base::{DeviceKind, NetworkConfig, RpcError, SendError, UnknownCommand};
use meshnet_packet::Packet;

const ROOT_LINK_ADDR: u8 = 33;

/// Run a round with root 42 (address 0) and its child 43 (address 1), both
/// identifying as the given devices. Returns the base nonce.
async fn discover(harness: &Harness, lamp_id: u32, board_id: u32) -> u32 {
    let handle = harness.controller.start_discovery().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let base_nonce = harness.beacon_nonce(0);
    harness.child_response(0, ROOT_LINK_ADDR, 42, base_nonce);
    harness.parent_response(0, ROOT_LINK_ADDR, 42, 43, base_nonce);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    harness.identify(0, ROOT_LINK_ADDR, 0, LED_LAMP_TYPE, lamp_id);
    harness.identify(0, ROOT_LINK_ADDR, 1, LED_BOARD_TYPE, board_id);
    handle.join().await.unwrap();
    // Drop the assign traffic.
    harness.links[0].1.take_packets(ROOT_LINK_ADDR);
    base_nonce
}

fn data_to_device(harness: &Harness) -> Vec<(u8, Vec<u8>)> {
    harness.links[0]
        .1
        .take_packets(ROOT_LINK_ADDR)
        .into_iter()
        .filter_map(|(dest, packet)| match packet {
            Packet::DataToDevice { dest_address, data } => {
                assert_eq!(dest, ROOT_LINK_ADDR);
                Some((dest_address, data))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_send_data_routes_through_root() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    discover(&harness, 1, 2).await;

    harness.controller.send_data_to_device(1, &[5, 6]).unwrap();
    assert_eq!(data_to_device(&harness), vec![(1, vec![5, 6])]);

    assert!(matches!(
        harness.controller.send_data_to_device(2, &[5]),
        Err(SendError::UnroutableAddress(2))
    ));
    assert!(matches!(
        harness.controller.send_data_to_device(0, &[0; 40]),
        Err(SendError::Frame(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_typed_device_commands() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    discover(&harness, 0x1111, 0x2222).await;

    let lamp = harness.registry.get(0x1111).unwrap();
    assert_eq!(lamp.kind(), DeviceKind::LedLamp);
    assert_eq!(lamp.address(), Some(0));
    lamp.set_rgbaw_pwm(RgbawPwm {
        red: 1,
        green: 2,
        blue: 3,
        amber: 4,
        white: 5,
    })
    .unwrap();

    let board = harness.registry.get(0x2222).unwrap();
    assert_eq!(board.address(), Some(1));
    board.set_led_state(true).unwrap();
    board.set_led_pwm(200).unwrap();
    assert!(matches!(
        board.set_rgbaw_pwm(RgbawPwm::default()),
        Err(RpcError::UnknownCommand(UnknownCommand(1)))
    ));

    assert_eq!(
        data_to_device(&harness),
        vec![
            (0, vec![1, 1, 2, 3, 4, 5]),
            (1, vec![1, 1]),
            (1, vec![2, 200]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_identify_request() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    discover(&harness, 1, 2).await;

    let dispatcher = harness.controller.dispatcher_for(1).unwrap();
    dispatcher.send_identify_request().unwrap();
    assert_eq!(data_to_device(&harness), vec![(1, vec![0, 45])]);
    assert!(harness.controller.dispatcher_for(7).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_commands_reach_device() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    discover(&harness, 1, 2).await;

    // Board reports its PWM state; an unsupported command is dropped.
    harness.data_to_base(0, ROOT_LINK_ADDR, 1, vec![2, 99]);
    harness.data_to_base(0, ROOT_LINK_ADDR, 1, vec![9, 1]);
    let board = harness.registry.get(2).unwrap();
    let report = board.last_report().unwrap();
    assert_eq!(report.command, 2);
    assert_eq!(report.data, vec![99]);

    // Unknown source address.
    harness.data_to_base(0, ROOT_LINK_ADDR, 200, vec![2, 1]);
    assert_eq!(board.last_report().unwrap().data, vec![99]);
}

#[tokio::test(start_paused = true)]
async fn test_devices_survive_rediscovery() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    discover(&harness, 0x1111, 0x2222).await;
    let lamp = harness.registry.get(0x1111).unwrap();
    assert_eq!(lamp.address(), Some(0));

    // Second round: the devices swap places in the tree.
    discover(&harness, 0x2222, 0x1111).await;
    assert_eq!(harness.registry.len(), 2);

    // Types changed too, so the registry replaced both entries.
    let board_now = harness.registry.get(0x1111).unwrap();
    assert_eq!(board_now.kind(), DeviceKind::LedBoard);
    assert_eq!(board_now.address(), Some(1));
    // The old handle lost its node with the old tree.
    assert_eq!(lamp.address(), None);
}

#[tokio::test(start_paused = true)]
async fn test_same_device_rebinds_to_new_node() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    discover(&harness, 0x1111, 0x2222).await;
    let lamp = harness.registry.get(0x1111).unwrap();

    // Second round with a different tree shape: the lamp is now at address 1.
    let handle = harness.controller.start_discovery().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let base_nonce = harness.beacon_nonce(0);
    harness.child_response(0, ROOT_LINK_ADDR, 50, base_nonce);
    harness.parent_response(0, ROOT_LINK_ADDR, 50, 51, base_nonce);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    harness.identify(0, ROOT_LINK_ADDR, 1, LED_LAMP_TYPE, 0x1111);
    harness.data_to_base(0, ROOT_LINK_ADDR, 0, vec![0x30]);
    handle.join().await.unwrap();

    let same = harness.registry.get(0x1111).unwrap();
    assert!(std::sync::Arc::ptr_eq(&lamp, &same));
    assert_eq!(lamp.address(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_request_identify_skips_identified_nodes() {
    let harness = Harness::new(NetworkConfig::default(), 1);
    let handle = harness.controller.start_discovery().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let base_nonce = harness.beacon_nonce(0);
    harness.child_response(0, ROOT_LINK_ADDR, 42, base_nonce);
    harness.parent_response(0, ROOT_LINK_ADDR, 42, 43, base_nonce);
    harness.parent_response(0, ROOT_LINK_ADDR, 42, 44, base_nonce);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    // Address 0 identifies, address 1 only confirms, address 2 stays silent.
    harness.identify(0, ROOT_LINK_ADDR, 0, LED_LAMP_TYPE, 7);
    harness.data_to_base(0, ROOT_LINK_ADDR, 1, vec![5]);
    handle.join().await.unwrap();
    harness.links[0].1.take_packets(ROOT_LINK_ADDR);

    assert_eq!(harness.controller.request_identify(), 2);
    assert_eq!(data_to_device(&harness), vec![(1, vec![0, 45]), (2, vec![0, 45])]);
}
