//! Integration test: flows started through the motion module's handshake.

use super::common::{SimArm, bus, client_config, journal, orchestrator, spawn_device};
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_common::words::join_i32;
use regbus_flow::service::{self, RESULT_WIDTH, status_code};
use regbus_flow::{
    FlowDefinition, FlowError, FlowService, FlowStatus, FlowStep, Operation, RetryPolicy, Target,
};
use regbus_handshake::{Command, ErrorKind, HandshakeClient};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn to(name: &str, point: &str) -> FlowStep {
    FlowStep::new(
        name,
        Operation::MoveJoint {
            target: Target::Point(point.into()),
        },
    )
}

#[test]
fn opcode_runs_the_registered_flow() {
    let bus = bus();
    let log = journal();
    let mut flows = FlowService::new(orchestrator(&bus, SimArm::new(&log)))
        .with_policy(RetryPolicy::none());
    flows
        .register(FlowDefinition::new(
            1,
            "home_then_place",
            vec![to("home", "home"), to("place", "place")],
        ))
        .unwrap();
    flows
        .register(FlowDefinition::new(2, "lost", vec![to("nowhere", "nowhere")]))
        .unwrap();

    let layout = ModuleLayout::motion();
    let device = spawn_device(&bus, layout.clone(), flows, Some(service::RESET));
    let cancel = CancelToken::new();
    let client = HandshakeClient::new(Arc::clone(&bus), layout, client_config());

    client.execute(Command::new(1), &cancel).unwrap();
    let results = client.read_results(0, RESULT_WIDTH).unwrap();
    assert_eq!(results[0], 1);
    assert_eq!(&results[1..3], &[2, 2]);
    assert!(join_i32(results[3], results[4]) >= 0);
    assert_eq!(results[5], 1);
    assert_eq!(results[6], status_code(FlowStatus::Completed));
    assert_eq!(bus.read_many(420, 3).unwrap(), vec![100, 2, 2]);

    // Unknown opcode: rejected without alarm.
    let err = client.execute(Command::new(9), &cancel).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(!client.status().unwrap().status.is_alarm());

    // Failing flow raises alarm until reset.
    let err = client.execute(Command::new(2), &cancel).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Failed);
    let status = client.status().unwrap();
    assert!(status.status.is_alarm());
    assert_eq!(status.error_count, 1);
    let results = client.read_results(0, RESULT_WIDTH).unwrap();
    assert_eq!(results[0], 0);
    assert_eq!(results[6], status_code(FlowStatus::Error));

    client.reset(service::RESET, &cancel).unwrap();
    assert!(!client.wait_for_ready(&cancel).unwrap().status.is_alarm());
    client.execute(Command::new(1), &cancel).unwrap();

    let flows = device.stop().unwrap();
    let last = flows.last_outcome().unwrap();
    assert!(last.success);
    assert_eq!(last.flow_id, 1);
    assert_eq!(log.lock().iter().filter(|e| *e == "sync").count(), 2);
}

#[test]
fn reserved_ids_are_refused() {
    let bus = bus();
    let mut flows = FlowService::new(orchestrator(&bus, SimArm::new(&journal())));
    for id in [0, service::RESET] {
        let err = flows
            .register(FlowDefinition::new(id, "reserved", vec![]))
            .unwrap_err();
        assert!(matches!(err, FlowError::ReservedFlowId(rejected) if rejected == id));
    }
    assert!(matches!(flows.run(3), Err(FlowError::UnknownFlow(3))));
}

#[test]
fn flows_load_from_a_directory() {
    let dir = TempDir::new().unwrap();
    for (file, id) in [("b.json", 2), ("a.json", 1)] {
        let flow = FlowDefinition::new(id, format!("flow {id}"), vec![to("home", "home")]);
        fs::write(dir.path().join(file), serde_json::to_string(&flow).unwrap()).unwrap();
    }
    fs::write(dir.path().join("notes.txt"), "not a flow").unwrap();

    let bus = bus();
    let mut flows = FlowService::new(orchestrator(&bus, SimArm::new(&journal())));
    assert_eq!(flows.load_dir(dir.path()).unwrap(), 2);
    assert_eq!(flows.flow_ids().collect::<Vec<_>>(), vec![1, 2]);
}
