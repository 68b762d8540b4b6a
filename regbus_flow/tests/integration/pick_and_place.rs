//! Integration test: a pick-and-place flow over real handshakes.

use super::common::{
    SimArm, SimCamera, SimGripper, bus, client_config, journal, orchestrator, spawn_device,
};
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_flow::{
    DeviceAction, FlowDefinition, FlowStatus, FlowStep, Operation, Target,
};
use regbus_handshake::ResultQueue;
use regbus_handshake::gripper::GripperClient;
use regbus_handshake::vision::{Circle, DetectionResult, VisionClient};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn device(name: &str, device: &str, action: DeviceAction) -> FlowStep {
    FlowStep::new(
        name,
        Operation::Device {
            device: device.into(),
            action,
        },
    )
}

fn pick_and_place() -> FlowDefinition {
    FlowDefinition::new(
        1,
        "pick_and_place",
        vec![
            device("detect", "vision", DeviceAction::NextDetection),
            FlowStep::new(
                "above part",
                Operation::MoveJoint {
                    target: Target::LastDetection {
                        reference: "pick_above".into(),
                    },
                },
            ),
            device(
                "grip",
                "gripper",
                DeviceAction::Grip {
                    target: 300,
                    attempts: None,
                },
            ),
            FlowStep::new(
                "place",
                Operation::MoveLinear {
                    target: Target::Point("place".into()),
                },
            )
            .with_barrier(),
            device("release", "gripper", DeviceAction::Release { position: 1000 }),
            FlowStep::new("blow off", Operation::SetOutput { index: 3, on: true }),
        ],
    )
}

#[test]
fn barriers_precede_device_steps() {
    let bus = bus();
    let log = journal();
    let camera = spawn_device(
        &bus,
        ModuleLayout::vision(),
        SimCamera::new(vec![vec![
            Circle::pixel(320, 240, 30).with_world(101.25, -55.5),
            Circle::pixel(410, 300, 28).with_world(140.0, -20.75),
        ]]),
        None,
    );
    let gripper = spawn_device(
        &bus,
        ModuleLayout::gripper(),
        SimGripper {
            journal: Arc::clone(&log),
            part_at: Some(355),
        },
        None,
    );

    let queue: ResultQueue<DetectionResult, _> = ResultQueue::new(
        VisionClient::new(Arc::clone(&bus), ModuleLayout::vision(), client_config()),
        CancelToken::new(),
    );
    let mut orch = orchestrator(&bus, SimArm::new(&log))
        .with_device("vision", Box::new(queue))
        .with_device(
            "gripper",
            Box::new(GripperClient::new(
                Arc::clone(&bus),
                ModuleLayout::gripper(),
                client_config(),
            )),
        );

    let flow = pick_and_place();
    let outcome = orch.execute(&flow);
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.status, FlowStatus::Completed);
    assert_eq!(outcome.steps_completed, 6);
    assert_eq!(outcome.total_steps, 6);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(
        *log.lock(),
        vec![
            "joint 101.25 -55.5 60 15",
            "sync",
            "gripper 300",
            "linear 180 210 15 90",
            "sync",
            "gripper 1000",
            "do 3 true",
            "sync",
        ]
    );
    assert_eq!(bus.read_many(420, 3).unwrap(), vec![100, 6, 6]);
    assert_eq!(orch.last_detection().map(|d| d.pixel_x), Some(320));

    // The second part is already queued; no new capture.
    log.lock().clear();
    assert!(orch.execute(&flow).success);
    assert_eq!(log.lock()[0], "joint 140 -20.75 60 15");

    assert_eq!(camera.stop().unwrap().captures, 1);
    gripper.stop().unwrap();
}

#[test]
fn detection_without_world_coordinates_aborts() {
    let bus = bus();
    let log = journal();
    let camera = spawn_device(
        &bus,
        ModuleLayout::vision(),
        SimCamera::new(vec![vec![Circle::pixel(5, 6, 7)]]),
        None,
    );
    let queue: ResultQueue<DetectionResult, _> = ResultQueue::new(
        VisionClient::new(Arc::clone(&bus), ModuleLayout::vision(), client_config()),
        CancelToken::new(),
    );
    let mut orch = orchestrator(&bus, SimArm::new(&log)).with_device("vision", Box::new(queue));

    let outcome = orch.execute(&pick_and_place());
    assert!(!outcome.success);
    assert_eq!(outcome.status, FlowStatus::Error);
    assert_eq!(outcome.steps_completed, 1);
    assert!(outcome.message.contains("above part"), "{}", outcome.message);
    assert!(log.lock().is_empty());
    assert_eq!(bus.read_many(420, 3).unwrap(), vec![16, 1, 6]);

    camera.stop().unwrap();
}

#[test]
fn cancel_interrupts_a_delay() {
    let bus = bus();
    let log = journal();
    let mut orch = orchestrator(&bus, SimArm::new(&log));
    let flow = FlowDefinition::new(
        2,
        "wait",
        vec![
            FlowStep::new(
                "home",
                Operation::MoveJoint {
                    target: Target::Point("home".into()),
                },
            ),
            FlowStep::new("dwell", Operation::Delay { ms: 10_000 }),
        ],
    );

    let trigger = orch.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = orch.execute(&flow);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.status, FlowStatus::Cancelled);
    assert_eq!(outcome.steps_completed, 1);
    assert_eq!(orch.status(), FlowStatus::Cancelled);
    assert_eq!(*log.lock(), vec!["joint 300 0 120 0"]);
    canceller.join().unwrap();
}

#[test]
fn capture_queues_the_whole_cycle() {
    let bus = bus();
    let log = journal();
    let camera = spawn_device(
        &bus,
        ModuleLayout::vision(),
        SimCamera::new(vec![vec![
            Circle::pixel(100, 100, 20).with_world(10.0, 20.0),
            Circle::pixel(200, 100, 20).with_world(30.0, 40.0),
            Circle::pixel(300, 100, 20).with_world(50.0, 60.0),
        ]]),
        None,
    );
    let queue: ResultQueue<DetectionResult, _> = ResultQueue::new(
        VisionClient::new(Arc::clone(&bus), ModuleLayout::vision(), client_config()),
        CancelToken::new(),
    );
    let mut orch = orchestrator(&bus, SimArm::new(&log)).with_device("vision", Box::new(queue));

    let mut steps = vec![device("capture", "vision", DeviceAction::CaptureDetect)];
    for n in 1..=3 {
        steps.push(device(&format!("detect {n}"), "vision", DeviceAction::NextDetection));
        steps.push(FlowStep::new(
            format!("above part {n}"),
            Operation::MoveJoint {
                target: Target::LastDetection {
                    reference: "pick_above".into(),
                },
            },
        ));
    }
    let outcome = orch.execute(&FlowDefinition::new(3, "sweep", steps));
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.steps_completed, 7);
    assert_eq!(
        *log.lock(),
        vec![
            "joint 10 20 60 15",
            "sync",
            "joint 30 40 60 15",
            "sync",
            "joint 50 60 60 15",
            "sync",
        ]
    );

    assert_eq!(camera.stop().unwrap().captures, 1);
}
