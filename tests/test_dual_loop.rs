mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use common::{load_fixture, table};
use trialsync::clock::MonotonicClock;
use trialsync::driver::{
    Driver, DriverOptions, GraphicsFn, LoopContext, ProtocolRunner, RunnerOptions, SharedMachine,
    TriggerFlags,
};
use trialsync::error::DriverError;
use trialsync::observability::{EventEmitter, StopReason};
use trialsync::phase::{ChannelSink, DurationPolicy, ParticipantId, StateMachine, Syncer, TransitionResult};

fn read_events(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn count_type(events: &[Value], kind: &str) -> usize {
    events
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str) == Some(kind))
        .count()
}

#[test]
fn runner_completes_fixture_trials() {
    let dir = tempfile::tempdir().unwrap();
    let events_path = dir.path().join("events.jsonl");
    let events = Arc::new(EventEmitter::from_file(&events_path).unwrap());

    let report = ProtocolRunner::new(load_fixture("valid_protocol.yaml"), RunnerOptions::default())
        .with_events(events)
        .run()
        .unwrap();

    assert_eq!(report.trials_completed, 2);
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.responses.len(), 2);
    for response in &report.responses {
        assert!(response.is_some_and(|r| r >= Duration::from_millis(30)));
    }
    assert!(report.loops.fast.ticks > report.loops.graphics.ticks);

    let events = read_events(&events_path);
    assert_eq!(
        events.first().and_then(|e| e["type"].as_str()),
        Some("RunStarted")
    );
    assert_eq!(
        events.last().and_then(|e| e["type"].as_str()),
        Some("RunStopped")
    );
    assert_eq!(events.last().unwrap()["reason"], "completed");
    assert_eq!(count_type(&events, "PhaseEntered"), 8);
    assert_eq!(count_type(&events, "PhaseCompleted"), 8);
    assert_eq!(count_type(&events, "TrialCompleted"), 2);
    assert_eq!(count_type(&events, "BarrierStalled"), 0);

    let sequences: Vec<u64> = events
        .iter()
        .map(|e| e["sequence"].as_u64().unwrap())
        .collect();
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));

    let first_entry = events
        .iter()
        .find(|e| e["type"] == "PhaseEntered")
        .unwrap();
    assert_eq!(first_entry["phase"], "iti");
    assert_eq!(first_entry["trial"], 1);
}

#[test]
fn runner_streams_phase_lines_to_listener_thread() {
    let (sink, listener) = ChannelSink::new();
    let handle = listener.spawn().unwrap();

    let report = ProtocolRunner::new(
        load_fixture("valid_protocol.yaml"),
        RunnerOptions {
            trials: Some(1),
            ..RunnerOptions::default()
        },
    )
    .with_sink(Arc::new(sink))
    .run()
    .unwrap();
    assert_eq!(report.trials_completed, 1);

    // The runner owned the last sender, so the listener has finished
    let handled = handle.join().unwrap();
    // Four phases, each with a begin and an end line, plus the move-on line
    assert!(handled >= 9, "handled {handled} lines");
}

#[test]
fn barrier_waits_for_graphics_acknowledgement() {
    let durations = table(&[
        ("a", DurationPolicy::Immediate),
        ("b", DurationPolicy::Immediate),
    ]);
    let machine = StateMachine::new(durations, "a", MonotonicClock::shared())
        .with_syncer(Arc::new(Syncer::new(2)));
    let driver = Driver::new(
        SharedMachine::new(machine),
        Arc::new(TriggerFlags::new(["probe"])),
        DriverOptions::default(),
    );

    let transitions = Arc::new(AtomicU64::new(0));
    let fast_transitions = Arc::clone(&transitions);
    let acknowledged_entries = Arc::new(Mutex::new(HashSet::new()));
    let graphics_entries = Arc::clone(&acknowledged_entries);

    let report = driver
        .run(
            move |ctx: &LoopContext| -> Result<(), DriverError> {
                let mut machine = ctx.machine.lock();
                match machine.change_state()? {
                    TransitionResult::Entered => {
                        let next = if machine.state() == "a" { "b" } else { "a" };
                        machine.set_next_state(next);
                        ctx.triggers.raise_only(&[machine.state()]);
                    }
                    TransitionResult::Transitioned => {
                        if fast_transitions.fetch_add(1, Ordering::SeqCst) + 1 == 10 {
                            ctx.running.cancel();
                        }
                    }
                    TransitionResult::NoOp => {}
                }
                machine.acknowledge(ParticipantId::FAST);
                Ok(())
            },
            GraphicsFn(move |ctx: &LoopContext| -> Result<(), DriverError> {
                let Some(ticket) = ctx.machine.ticket() else {
                    return Ok(());
                };
                std::thread::sleep(Duration::from_millis(2));
                if ctx.machine.acknowledge(ParticipantId::GRAPHICS, &ticket) {
                    graphics_entries.lock().insert(ticket.entry);
                }
                Ok(())
            }),
        )
        .unwrap();

    let transitions = transitions.load(Ordering::SeqCst);
    assert_eq!(transitions, 10);
    // No phase ended before the graphics loop acknowledged it
    assert!(acknowledged_entries.lock().len() as u64 >= transitions);
    assert!(report.graphics.ticks >= transitions);
}
