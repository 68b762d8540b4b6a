//! Integration test: handshake over Modbus TCP.
//!
//! The device loop runs in-process on the server's bus; the client reaches
//! it through `ModbusTcpClient` only.

use super::common::{SimCamera, client_config, device_config, spawn_device};
use regbus_bus::{ClientConfig, ModbusTcpClient, RegisterAccess};
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_handshake::vision::{Circle, VisionClient};
use regbus_handshake::{AckMode, DeviceLoop, ErrorKind, ResultQueue};
use regbus_server::{BusServer, ServerConfig};
use std::time::Duration;

#[test]
fn vision_cycle_through_the_server() {
    let mut config = ServerConfig::with_defaults("handshake-test");
    config.bus.host = "127.0.0.1".into();
    config.bus.port = 0;
    config.bus.annotations = None;
    let server = BusServer::new(config).unwrap().spawn().unwrap();

    let bus = server.server().bus();
    let layout = ModuleLayout::vision();
    let mut camera = SimCamera::new(vec![vec![
        Circle::pixel(300, 200, 25).with_world(88.5, 12.25),
        Circle::pixel(500, 260, 26).with_world(150.0, 40.0),
    ]]);
    camera.exposure = Duration::from_millis(20);
    let device = spawn_device(&bus, layout.clone(), camera, device_config(AckMode::Explicit, None));

    let remote = ModbusTcpClient::connect(server.local_addr(), ClientConfig::default()).unwrap();
    let queue = ResultQueue::new(
        VisionClient::new(remote, layout, client_config()),
        CancelToken::new(),
    );

    let first = queue.dequeue_next().unwrap();
    assert_eq!(first.world_x, Some(88.5));
    assert_eq!(first.world_y, Some(12.25));
    assert_eq!(queue.dequeue_next().unwrap().pixel_x, 500);

    device.stop().unwrap();
    server.stop().unwrap();
}

#[test]
fn remote_device_loop_refuses_auto_clear() {
    let mut config = ServerConfig::with_defaults("handshake-test");
    config.bus.host = "127.0.0.1".into();
    config.bus.port = 0;
    config.bus.annotations = None;
    let server = BusServer::new(config).unwrap().spawn().unwrap();

    let remote = ModbusTcpClient::connect(server.local_addr(), ClientConfig::default()).unwrap();
    assert!(!remote.atomic_compare());
    let err = DeviceLoop::new(
        remote,
        ModuleLayout::vision(),
        SimCamera::new(vec![]),
        device_config(AckMode::AutoClear, None),
    )
    .spawn(CancelToken::new())
    .err()
    .unwrap();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(server.server().bus().read(204).unwrap(), 0);

    server.stop().unwrap();
}
