//! Integration test: whole-flow retry with recovery.

use super::common::{SimArm, bus, journal, orchestrator};
use regbus_common::cancel::CancelToken;
use regbus_flow::{
    FlowDefinition, FlowStatus, FlowStep, MotionController, MotionError, Operation,
    PauseResumeRecovery, RetryPolicy, Target,
};
use std::thread;
use std::time::{Duration, Instant};

fn shuttle() -> FlowDefinition {
    FlowDefinition::new(
        4,
        "shuttle",
        vec![
            FlowStep::new(
                "home",
                Operation::MoveJoint {
                    target: Target::Point("home".into()),
                },
            ),
            FlowStep::new(
                "place",
                Operation::MoveLinear {
                    target: Target::Point("place".into()),
                },
            )
            .with_barrier(),
        ],
    )
}

fn quick_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        delay_ms: 10,
    }
}

fn quick_recovery() -> PauseResumeRecovery {
    PauseResumeRecovery {
        pause: Duration::from_millis(10),
    }
}

#[test]
fn recovers_and_succeeds_on_second_attempt() {
    let bus = bus();
    let log = journal();
    let mut arm = SimArm::new(&log);
    arm.failing_syncs = 1;
    let mut orch = orchestrator(&bus, arm);

    let outcome = orch.execute_with_retry(&shuttle(), &quick_policy(2), &mut quick_recovery());
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.steps_completed, 2);
    assert_eq!(
        *log.lock(),
        vec![
            "joint 300 0 120 0",
            "linear 180 210 15 90",
            "sync failed",
            "pause",
            "resume",
            "joint 300 0 120 0",
            "linear 180 210 15 90",
            "sync",
        ]
    );
    assert_eq!(bus.read_many(420, 3).unwrap(), vec![100, 2, 2]);
}

#[test]
fn gives_up_after_max_attempts() {
    let bus = bus();
    let log = journal();
    let mut arm = SimArm::new(&log);
    arm.failing_syncs = u32::MAX;
    let mut orch = orchestrator(&bus, arm);

    let outcome = orch.execute_with_retry(&shuttle(), &quick_policy(2), &mut quick_recovery());
    assert!(!outcome.success);
    assert_eq!(outcome.status, FlowStatus::Error);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.steps_completed, 1);
    assert!(outcome.message.contains("collision detected"), "{}", outcome.message);

    let log = log.lock();
    assert_eq!(log.iter().filter(|e| *e == "pause").count(), 2);
    assert_eq!(log.iter().filter(|e| *e == "sync failed").count(), 3);
}

#[test]
fn custom_recovery_closure() {
    let bus = bus();
    let log = journal();
    let mut arm = SimArm::new(&log);
    arm.failing_syncs = 1;
    let mut orch = orchestrator(&bus, arm);

    let mut recoveries = 0;
    let mut recovery = |motion: &mut SimArm, _: &CancelToken| -> Result<(), MotionError> {
        recoveries += 1;
        motion.set_output(7, false)
    };
    let outcome = orch.execute_with_retry(&shuttle(), &quick_policy(1), &mut recovery);
    assert!(outcome.success);
    assert_eq!(recoveries, 1);
    assert!(log.lock().contains(&"do 7 false".to_string()));
}

#[test]
fn cancel_during_retry_delay() {
    let bus = bus();
    let log = journal();
    let mut arm = SimArm::new(&log);
    arm.failing_syncs = u32::MAX;
    let mut orch = orchestrator(&bus, arm);

    let trigger = orch.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let policy = RetryPolicy {
        max_retries: 5,
        delay_ms: 10_000,
    };
    let started = Instant::now();
    let outcome = orch.execute_with_retry(&shuttle(), &policy, &mut quick_recovery());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.status, FlowStatus::Cancelled);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(orch.status(), FlowStatus::Cancelled);
    canceller.join().unwrap();
}
