//! Integration test: alarm, timeout, readiness and correlation failures.

use super::common::{SimAngle, bus, client_config, device_config, spawn_device};
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_common::status::StatusWord;
use regbus_handshake::angle::{AngleClient, AngleError, AngleResult, DetectionMode, RESET};
use regbus_handshake::{AckMode, Command, ErrorKind, HandshakeClient, HandshakeConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn measurement() -> AngleResult {
    AngleResult {
        center_x: 320,
        center_y: 240,
        angle: 37.5,
        major_axis: 180,
        minor_axis: 90,
        area: 12_000,
        ..AngleResult::default()
    }
}

#[test]
fn alarm_mid_cycle_fails_without_waiting_for_timeout() {
    let bus = bus();
    let layout = ModuleLayout::angle();
    let device = spawn_device(
        &bus,
        layout.clone(),
        SimAngle {
            script: vec![Err("contour fit diverged".to_string())].into(),
            resets: 0,
            delay: Duration::from_millis(200),
        },
        device_config(AckMode::Explicit, Some(RESET)),
    );

    let cancel = CancelToken::new();
    let client = AngleClient::new(Arc::clone(&bus), layout.clone(), client_config());
    let started = Instant::now();
    let err = client.detect(DetectionMode::Ellipse, &cancel).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        AngleError::Handshake(e) => assert_eq!(e.kind, ErrorKind::Failed),
        other => panic!("expected handshake failure, got {other:?}"),
    }

    // While in alarm nothing but reset is accepted.
    let status = client.handshake().status().unwrap();
    assert!(status.status.is_alarm());
    assert_eq!(status.error_count, 1);
    let refused = client.handshake().issue(Command::new(16)).unwrap_err();
    assert_eq!(refused.kind, ErrorKind::NotReady);

    client.reset(&cancel).unwrap();
    let status = client.handshake().wait_for_ready(&cancel).unwrap();
    assert!(!status.status.is_alarm());

    let sim = device.stop().unwrap();
    assert_eq!(sim.resets, 1);
}

#[test]
fn no_valid_contour_and_success_after_reset() {
    let bus = bus();
    let layout = ModuleLayout::angle();
    let device = spawn_device(
        &bus,
        layout.clone(),
        SimAngle {
            script: vec![Ok(None), Ok(Some(measurement()))].into(),
            resets: 0,
            delay: Duration::from_millis(5),
        },
        device_config(AckMode::Explicit, Some(RESET)),
    );

    let cancel = CancelToken::new();
    let client = AngleClient::new(Arc::clone(&bus), layout, client_config());
    assert_eq!(
        client.detect(DetectionMode::MinAreaRect, &cancel),
        Err(AngleError::NoValidContour)
    );
    let result = client.detect(DetectionMode::Ellipse, &cancel).unwrap();
    assert_eq!(result.center_x, 320);
    assert!((result.angle - 37.5).abs() < 1e-9);

    // Reset outside alarm is an ordinary command.
    client.reset(&cancel).unwrap();
    assert_eq!(device.stop().unwrap().resets, 0);
}

#[test]
fn running_that_never_clears_times_out() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    bus.write(layout.status_addr(), StatusWord::READY.bits()).unwrap();

    let config = HandshakeConfig {
        completion_timeout_ms: 200,
        ..client_config()
    };
    let client = HandshakeClient::new(Arc::clone(&bus), layout.clone(), config);
    let pending = client.issue(Command::new(3).with_params(400, 0)).unwrap();
    assert_eq!(bus.read_many(500, 4).unwrap(), vec![3, 400, 0, 1]);

    // A module picks the command up and hangs.
    bus.write(layout.status_addr(), StatusWord::RUNNING.bits()).unwrap();

    let started = Instant::now();
    let err = pending.wait(&CancelToken::new()).unwrap_err();
    let elapsed = started.elapsed();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
}

#[test]
fn stale_ready_is_not_completion() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    bus.write(layout.status_addr(), StatusWord::READY.bits()).unwrap();

    let config = HandshakeConfig {
        completion_timeout_ms: 100,
        ..client_config()
    };
    let client = HandshakeClient::new(Arc::clone(&bus), layout, config);
    let pending = client.issue(Command::new(3)).unwrap();
    // Nobody executes the command; Ready stays set but op_count never moves.
    let err = pending.wait(&CancelToken::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[test]
fn not_ready_and_nop_are_refused() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    let client = HandshakeClient::new(Arc::clone(&bus), layout.clone(), client_config());

    assert_eq!(client.issue(Command::new(3)).unwrap_err().kind, ErrorKind::NotReady);
    bus.write(layout.status_addr(), StatusWord::READY.bits()).unwrap();
    assert_eq!(client.issue(Command::new(0)).unwrap_err().kind, ErrorKind::Validation);

    bus.write(
        layout.status_addr(),
        (StatusWord::READY | StatusWord::ALARM).bits(),
    )
    .unwrap();
    let err = client.wait_for_ready(&CancelToken::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotReady);
    assert_eq!(bus.read(layout.command_addr()).unwrap(), 0);
}

#[test]
fn cancellation_interrupts_wait() {
    let bus = bus();
    let layout = ModuleLayout::gripper();
    bus.write(layout.status_addr(), StatusWord::READY.bits()).unwrap();
    let client = HandshakeClient::new(Arc::clone(&bus), layout, client_config());
    let pending = client.issue(Command::new(3)).unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });

    let started = Instant::now();
    let err = pending.wait(&cancel).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    canceller.join().unwrap();
}

#[test]
fn repeated_command_id_is_a_correlation_error() {
    let bus = bus();
    let layout = ModuleLayout::angle();
    let device = spawn_device(
        &bus,
        layout.clone(),
        SimAngle {
            script: vec![Ok(Some(measurement())), Ok(Some(measurement()))].into(),
            resets: 0,
            delay: Duration::from_millis(1),
        },
        device_config(AckMode::Explicit, Some(RESET)),
    );

    let cancel = CancelToken::new();
    let client = HandshakeClient::new(Arc::clone(&bus), layout.clone(), client_config());
    let detect = Command::new(16).with_id(77);
    client.execute(detect, &cancel).unwrap();
    let err = client.execute(detect, &cancel).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Correlation);

    // The module stays usable and did not run the duplicate.
    let status = client.wait_for_ready(&cancel).unwrap();
    assert_eq!(status.op_count, 2);
    let sim = device.stop().unwrap();
    assert_eq!(sim.script.len(), 1);
}
