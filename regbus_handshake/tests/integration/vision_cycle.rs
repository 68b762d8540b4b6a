//! Integration test: vision capture/detect cycle feeding the result queue.
//!
//! Module at base 200; the client writes control=16 and the status word goes
//! Ready → Running → Ready while the queue fills in detection order.

use super::common::{SimCamera, bus, client_config, device_config, spawn_device};
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_common::status::StatusWord;
use regbus_handshake::vision::{self, Circle, VisionClient};
use regbus_handshake::{AckMode, HandshakeConfig, ResultQueue};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn frame() -> Vec<Circle> {
    vec![
        Circle::pixel(320, 240, 30).with_world(101.25, -55.5),
        Circle::pixel(410, 300, 28).with_world(140.0, -20.75),
        Circle::pixel(120, 90, 31).with_world(-12.5, 3.0),
    ]
}

#[test]
fn capture_detect_status_sequence_and_queue_order() {
    let bus = bus();
    let layout = ModuleLayout::vision();
    assert_eq!(layout.command_addr(), 200);
    let device = spawn_device(
        &bus,
        layout.clone(),
        SimCamera::new(vec![frame()]),
        device_config(AckMode::AutoClear, None),
    );

    // Record every distinct handshake state seen on the status register.
    let stop = Arc::new(AtomicBool::new(false));
    let observer = {
        let bus = Arc::clone(&bus);
        let stop = Arc::clone(&stop);
        let status_addr = layout.status_addr();
        thread::spawn(move || {
            let mask = StatusWord::READY | StatusWord::RUNNING | StatusWord::ALARM;
            let mut seen: Vec<u16> = Vec::new();
            while !stop.load(Ordering::SeqCst) {
                let raw = bus.read(status_addr).unwrap() & mask.bits();
                if seen.last() != Some(&raw) {
                    seen.push(raw);
                }
                thread::sleep(Duration::from_millis(2));
            }
            seen
        })
    };

    let cancel = CancelToken::new();
    let config = HandshakeConfig {
        ack_mode: AckMode::AutoClear,
        ..client_config()
    };
    let client = VisionClient::new(Arc::clone(&bus), layout.clone(), config);
    let queue = ResultQueue::new(client, cancel.clone());

    let started = Instant::now();
    let first = queue.dequeue_next().expect("cycle produced detections");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(bus.read(layout.result_addr(0)).unwrap() > 0);

    queue.source().handshake().wait_for_ready(&cancel).unwrap();
    stop.store(true, Ordering::SeqCst);
    let seen = observer.join().unwrap();

    let ready = StatusWord::READY.bits();
    let running = StatusWord::RUNNING.bits();
    let pos_running = seen.iter().position(|s| *s == running).expect("Running observed");
    assert!(seen[..pos_running].contains(&ready), "sequence {seen:?}");
    assert_eq!(seen.last(), Some(&ready), "sequence {seen:?}");

    // Detection order is preserved.
    assert_eq!((first.pixel_x, first.pixel_y), (320, 240));
    assert_eq!(first.world_x, Some(101.25));
    let status = queue.peek_status();
    assert_eq!(status.length, 2);
    assert_eq!(status.last_cycle_count, 3);
    assert_eq!(status.cycles_triggered, 1);
    let second = queue.dequeue_next().unwrap();
    let third = queue.dequeue_next().unwrap();
    assert_eq!(second.pixel_x, 410);
    assert_eq!(third.pixel_x, 120);
    assert!(first.id < second.id && second.id < third.id);

    // Camera script exhausted: the next trigger yields nothing.
    assert_eq!(queue.dequeue_next(), None);
    assert_eq!(queue.peek_status().cycles_triggered, 2);

    let camera = device.stop().unwrap();
    assert_eq!(camera.captures, 2);
}

#[test]
fn explicit_ack_restores_ready_only_after_nop() {
    let bus = bus();
    let layout = ModuleLayout::vision();
    let mut camera = SimCamera::new(vec![vec![Circle::pixel(5, 6, 7)]]);
    camera.exposure = Duration::from_millis(10);
    let device = spawn_device(
        &bus,
        layout.clone(),
        camera,
        device_config(AckMode::Explicit, None),
    );

    let cancel = CancelToken::new();
    let client = VisionClient::new(Arc::clone(&bus), layout.clone(), client_config());
    let detections = client.capture_and_detect(&cancel).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].world_x, None);

    // The client acknowledged; the command register is back to NOP.
    assert_eq!(bus.read(layout.command_addr()).unwrap(), 0);
    let block = client.handshake().wait_for_ready(&cancel).unwrap();
    assert_eq!(block.op_count, 1);
    assert!(block.status.contains(StatusWord::INITIALIZED));

    device.stop().unwrap();
}

#[test]
fn queued_results_are_served_before_new_cycles() {
    let bus = bus();
    let layout = ModuleLayout::vision();
    let device = spawn_device(
        &bus,
        layout.clone(),
        SimCamera::new(vec![]),
        device_config(AckMode::AutoClear, None),
    );
    let client = VisionClient::new(Arc::clone(&bus), layout, client_config());
    let queue = ResultQueue::new(client, CancelToken::new());

    queue.enqueue_many(
        frame()
            .into_iter()
            .enumerate()
            .map(|(i, c)| vision::DetectionResult {
                id: 100 + i as u64,
                world_x: c.world.map(|w| w.0),
                world_y: c.world.map(|w| w.1),
                pixel_x: c.pixel_x,
                pixel_y: c.pixel_y,
                radius: c.radius,
                timestamp: chrono::Utc::now(),
            }),
    );
    let ids: Vec<u64> = (0..3).filter_map(|_| queue.dequeue_next()).map(|d| d.id).collect();
    assert_eq!(ids, vec![100, 101, 102]);
    assert_eq!(queue.peek_status().cycles_triggered, 0);

    let camera = device.stop().unwrap();
    assert_eq!(camera.captures, 0);
}
