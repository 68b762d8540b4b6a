//! Integration test: gripper adapter against a simulated gripper.

use super::common::{SimGripper, bus, client_config, device_config, spawn_device};
use parking_lot::Mutex;
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_handshake::gripper::{DEFAULT_GRIP_ATTEMPTS, GripStatus, GripperClient};
use regbus_handshake::{AckMode, ErrorKind};
use std::sync::Arc;

fn gripper(stops: Vec<u16>) -> (Arc<Mutex<Vec<u16>>>, SimGripper) {
    let moves = Arc::new(Mutex::new(Vec::new()));
    let sim = SimGripper {
        stops: stops.into(),
        force: 0,
        moves: Arc::clone(&moves),
        rejected_moves: 0,
    };
    (moves, sim)
}

#[test]
fn smart_grip_retries_until_an_object_is_held() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    // First attempt closes fully on nothing, second stops on the part.
    let (moves, sim) = gripper(vec![412, 355]);
    let device = spawn_device(&bus, layout.clone(), sim, device_config(AckMode::AutoClear, None));

    let cancel = CancelToken::new();
    let client = GripperClient::new(Arc::clone(&bus), layout, client_config());
    let outcome = client
        .smart_grip(420, DEFAULT_GRIP_ATTEMPTS, &cancel)
        .unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.position, 355);
    assert_eq!(*moves.lock(), vec![420, 420]);
    assert_eq!(client.state().unwrap().status, GripStatus::Gripped);

    device.stop().unwrap();
}

#[test]
fn smart_grip_gives_up_after_max_attempts() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    let (moves, sim) = gripper(vec![]);
    let device = spawn_device(&bus, layout.clone(), sim, device_config(AckMode::Explicit, None));

    let client = GripperClient::new(Arc::clone(&bus), layout, client_config());
    let err = client.smart_grip(420, 3, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Failed);
    assert_eq!(moves.lock().len(), 3);

    device.stop().unwrap();
}

#[test]
fn smart_grip_reports_the_final_attempt() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    let (moves, mut sim) = gripper(vec![]);
    sim.rejected_moves = 1;
    let device = spawn_device(&bus, layout.clone(), sim, device_config(AckMode::Explicit, None));

    let client = GripperClient::new(Arc::clone(&bus), layout, client_config());
    let err = client.smart_grip(420, 2, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Failed);
    assert!(err.message.contains("no object gripped"), "{err}");
    assert_eq!(moves.lock().len(), 2);

    device.stop().unwrap();
}

#[test]
fn settings_are_validated_before_issue() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    let (_, sim) = gripper(vec![]);
    let device = spawn_device(&bus, layout.clone(), sim, device_config(AckMode::Explicit, None));

    let cancel = CancelToken::new();
    let client = GripperClient::new(Arc::clone(&bus), layout, client_config());
    assert_eq!(
        client.set_force(5, &cancel).unwrap_err().kind,
        ErrorKind::Validation
    );
    client.set_force(60, &cancel).unwrap();
    client.set_speed(80, &cancel).unwrap();
    client.quick_open(&cancel).unwrap();
    assert_eq!(client.state().unwrap().position, 1000);

    let sim = device.stop().unwrap();
    assert_eq!(sim.force, 60);
}
