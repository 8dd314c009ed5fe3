//! The alignment worker thread: command handling, events, cancellation and
//! shutdown.

use crabalign::alignment::{
    AlignmentWorker, Phase, WorkerCommand, WorkerHandle, AMBIGUOUS_MESSAGE, NO_DETECTION_MESSAGE,
    SEARCHING_MESSAGE,
};
use crabalign::config::AlignConfig;
use crabalign::events::AlignmentEvent;
use crabalign::testing::SimulatedRig;
use crabalign::types::MachineXY;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

fn config() -> AlignConfig {
    let mut config = AlignConfig::default();
    config.camera.reopen_delay_ms = 0;
    config.alignment.idle_poll_ms = 1;
    config.alignment.idle_timeout_ms = 5_000;
    config
}

fn spawn(
    rig: &SimulatedRig,
    config: AlignConfig,
) -> (WorkerHandle, broadcast::Receiver<AlignmentEvent>) {
    let worker = AlignmentWorker::spawn(config, Box::new(rig.camera()), Box::new(rig.machine()))
        .expect("worker thread starts");
    let events = worker.subscribe();
    (worker, events)
}

/// Wait for the first event matching `pred`, skipping everything else.
fn wait_for<F>(
    events: &mut broadcast::Receiver<AlignmentEvent>,
    timeout: Duration,
    pred: F,
) -> Option<AlignmentEvent>
where
    F: Fn(&AlignmentEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match events.try_recv() {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(2)),
            Err(TryRecvError::Closed) => return None,
        }
    }
    None
}

#[test]
fn test_session_completes_through_worker() {
    let rig = SimulatedRig::builder()
        .tool_offsets(vec![MachineXY::new(0.02, 0.01)])
        .build();
    let (worker, mut events) = spawn(&rig, config());

    assert!(worker.start_alignment());
    let done = wait_for(&mut events, Duration::from_secs(120), |e| {
        matches!(
            e,
            AlignmentEvent::SessionComplete { .. } | AlignmentEvent::SessionAborted { .. }
        )
    });
    match done {
        Some(AlignmentEvent::SessionComplete { results, .. }) => {
            assert_eq!(results.len(), 1);
            assert!((results[0].x - 0.02).abs() < 0.005, "{:?}", results[0]);
            assert!((results[0].y - 0.01).abs() < 0.005, "{:?}", results[0]);
        }
        other => panic!("session did not complete: {:?}", other),
    }
    assert!(!worker.is_running());
    worker.shutdown();
    assert!(!rig.camera_open());
}

#[test]
fn test_stop_cancels_and_unloads() {
    let rig = SimulatedRig::builder()
        .idle_latency(Duration::from_millis(20))
        .build();
    let (worker, mut events) = spawn(&rig, config());

    worker.start_alignment();
    let started = wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, AlignmentEvent::Status(s) if s.starts_with("Calibrating T0"))
    });
    assert!(started.is_some());
    worker.stop();

    let aborted = wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, AlignmentEvent::SessionAborted { .. })
    });
    match aborted {
        Some(AlignmentEvent::SessionAborted { message, context, .. }) => {
            assert_eq!(message, "session cancelled");
            assert_eq!(context.tool, Some(0));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(rig.active_tool(), None);
    assert!(rig.commands().iter().any(|c| c == "T-1"));

    // The worker is still alive and accepts a new request.
    assert!(worker.start_detection());
    assert!(wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, AlignmentEvent::Status(s) if s == SEARCHING_MESSAGE)
    })
    .is_some());
    worker.shutdown();
}

/// Count detection frames until the next `DetectionError`.
fn frames_until_detection_error(
    events: &mut broadcast::Receiver<AlignmentEvent>,
) -> (usize, String) {
    let mut frames = 0;
    let mut advisory_seen = false;
    let deadline = Instant::now() + Duration::from_secs(120);
    while Instant::now() < deadline {
        match events.try_recv() {
            Ok(AlignmentEvent::Frame(frame)) => {
                assert!(frame.feature.is_none());
                frames += 1;
            }
            Ok(AlignmentEvent::Message(text)) => {
                assert_eq!(text, NO_DETECTION_MESSAGE);
                advisory_seen = true;
            }
            Ok(AlignmentEvent::DetectionError(text)) => {
                assert!(advisory_seen, "advisory message precedes the error");
                return (frames, text);
            }
            Ok(other) => panic!("unexpected event {:?}", other),
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("event stream broken: {:?}", e),
        }
    }
    panic!("no detection error within the deadline");
}

#[test]
fn test_missing_fiducial_reported_after_miss_limit() {
    let rig = SimulatedRig::builder().build();
    rig.set_fiducial_visible(false);
    let (worker, mut events) = spawn(&rig, config());

    assert!(worker.start_detection());
    assert!(wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, AlignmentEvent::Status(s) if s == SEARCHING_MESSAGE)
    })
    .is_some());

    // One advisory per 26 consecutive empty frames, then the count restarts.
    let (frames, text) = frames_until_detection_error(&mut events);
    assert_eq!(frames, 26);
    assert_eq!(text, "no fiducial found after 26 consecutive frames");
    let (frames, _) = frames_until_detection_error(&mut events);
    assert_eq!(frames, 26);

    worker.stop();
    worker.shutdown();
}

#[test]
fn test_ambiguous_frames_hold_the_sweep() {
    let rig = SimulatedRig::builder()
        .tool_offsets(vec![MachineXY::new(0.0, 0.0)])
        .build();
    let (worker, mut events) = spawn(&rig, config());

    worker.start_alignment();
    assert!(wait_for(&mut events, Duration::from_secs(60), |e| {
        matches!(e, AlignmentEvent::Message(s) if s.starts_with("mpp:"))
    })
    .is_some());

    // Two stray discs in the corners, clear of the sweep circle.
    rig.add_debris(40.0, 40.0, 13.0);
    rig.add_debris(360.0, 260.0, 13.0);
    assert!(wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, AlignmentEvent::Message(s) if s == AMBIGUOUS_MESSAGE)
    })
    .is_some());
    let commands = rig.commands();

    let mut ambiguous = 0;
    let deadline = Instant::now() + Duration::from_secs(30);
    while ambiguous < 5 && Instant::now() < deadline {
        match events.try_recv() {
            Ok(AlignmentEvent::Message(text)) => {
                assert_eq!(text, AMBIGUOUS_MESSAGE);
                ambiguous += 1;
            }
            Ok(AlignmentEvent::Frame(frame)) => assert!(frame.feature.is_none()),
            Ok(other) => panic!("state advanced on ambiguous frames: {:?}", other),
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(2)),
            Err(e) => panic!("event stream broken: {:?}", e),
        }
    }
    assert_eq!(ambiguous, 5);
    assert_eq!(rig.commands(), commands, "no moves while the view is ambiguous");

    worker.stop();
    match wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, AlignmentEvent::SessionAborted { .. })
    }) {
        Some(AlignmentEvent::SessionAborted { context, .. }) => {
            let phase = context.phase;
            assert!(matches!(phase, Phase::CamCalSweep(k) if k >= 2), "{:?}", phase);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    worker.shutdown();
}

#[test]
fn test_xray_toggle_publishes_binary_frames() {
    let rig = SimulatedRig::builder().build();
    let (worker, mut events) = spawn(&rig, config());

    assert!(worker.send(WorkerCommand::ToggleXray));
    let binary = wait_for(&mut events, Duration::from_secs(10), |e| match e {
        AlignmentEvent::Frame(frame) => frame.image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255),
        _ => false,
    });
    assert!(binary.is_some());
    worker.shutdown();
}

#[test]
fn test_loose_toggle_reports_state() {
    let rig = SimulatedRig::builder().build();
    let (worker, mut events) = spawn(&rig, config());

    worker.send(WorkerCommand::ToggleLoose);
    let message = wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, AlignmentEvent::Message(_))
    });
    match message {
        Some(AlignmentEvent::Message(text)) => assert_eq!(text, "Loose detection enabled"),
        other => panic!("unexpected {:?}", other),
    }
    worker.shutdown();
}

#[test]
fn test_drop_joins_worker() {
    let rig = SimulatedRig::builder().build();
    {
        let (_worker, _events) = spawn(&rig, config());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !rig.camera_open() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(rig.camera_open());
    }
    assert!(!rig.camera_open());
}
