//! Mediator behaviour against the mock device.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing_test::traced_test;
use tune_core::protocol::{
    encode_control_info, encode_get_control, encode_set_control, ControlEvent, ControlReply,
    CorrelationId, FlushListener, FlushSignal, QueryKind, SetControlQuery,
};
use tune_core::{
    ControlDescriptor, ControlRef, ControlType, ControlValue, Frame, ManualClock, TuneError,
    ValidationError,
};
use tune_driver_mock::{ErrorConfig, ErrorScenario, MockDevice, EXPOSURE, FPNC, GAIN, TEST_PATTERN};
use tune_mediator::{FlushState, FrameVerdict, Mediator, MediatorConfig, SharedListener};

fn started(device: &MockDevice, clock: &ManualClock) -> Mediator {
    let mut mediator = Mediator::new(
        Box::new(device.clone()),
        Arc::new(clock.clone()),
        MediatorConfig::default(),
    );
    mediator.start().unwrap();
    mediator
}

fn set(name: &str, value: ControlValue, flush: bool) -> SetControlQuery {
    SetControlQuery {
        target: ControlRef::by_name(name),
        value,
        flush,
    }
}

fn frame_at(ts: u64) -> Frame {
    Frame::from_u8(2, 1, vec![0, 0]).with_timestamp(ts)
}

/// Records how many sets had reached the device when each flush arrived.
struct Probe {
    device: MockDevice,
    seen: Vec<(String, u32)>,
}

impl FlushListener for Probe {
    fn on_flush(&mut self, signal: &FlushSignal) {
        let name = signal.control.name.clone().unwrap_or_default();
        self.seen.push((name, self.device.calls().set_control));
    }
}

#[test]
fn test_start_discovers_controls() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = Mediator::new(
        Box::new(device.clone()),
        Arc::new(clock),
        MediatorConfig::default(),
    );
    assert_eq!(mediator.start().unwrap(), 6);
    // Disabled controls are hidden from the listing.
    assert_eq!(mediator.directory().list().count(), 5);

    // Restarting refreshes the directory without reopening.
    mediator.start().unwrap();
    assert_eq!(device.calls().open, 1);
    assert_eq!(device.calls().query_control_directory, 2);
}

#[test]
fn test_start_fails_without_controls() {
    let device = MockDevice::new("empty");
    let mut mediator = Mediator::new(
        Box::new(device),
        Arc::new(ManualClock::new(0)),
        MediatorConfig::default(),
    );
    assert!(matches!(mediator.start(), Err(TuneError::Transport(_))));
}

#[test]
fn test_range_check() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);

    let err = mediator
        .set_control(&set(GAIN, ControlValue::Integer(150), false))
        .unwrap_err();
    assert!(matches!(
        err,
        TuneError::Validation(ValidationError::OutOfRange { value: 150, .. })
    ));
    assert_eq!(device.calls().set_control, 0);

    let applied = mediator
        .set_control(&set(GAIN, ControlValue::Integer(50), false))
        .unwrap();
    assert_eq!(applied.achieved, ControlValue::Integer(50));
    assert_eq!(device.value_i64(GAIN), Some(50));
}

#[test]
fn test_disabled_control_never_reaches_device() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);

    // The directory hides it, so address it by id.
    let id = device.descriptor(TEST_PATTERN).map(|d| d.id).unwrap();
    let err = mediator
        .set_control(&SetControlQuery {
            target: ControlRef::by_id(id),
            value: ControlValue::Integer(1),
            flush: true,
        })
        .unwrap_err();
    assert!(matches!(err, TuneError::Validation(ValidationError::Disabled(_))));
    assert_eq!(device.calls().set_control, 0);
    assert_eq!(mediator.flush_state(), FlushState::Idle);
}

#[test]
fn test_unknown_name_rejected() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);
    let err = mediator
        .set_control(&set("Zoom", ControlValue::Integer(1), false))
        .unwrap_err();
    assert!(matches!(err, TuneError::Validation(ValidationError::UnknownControl(_))));
}

#[test]
fn test_flush_listener_runs_before_set() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);
    let probe = Arc::new(Mutex::new(Probe {
        device: device.clone(),
        seen: Vec::new(),
    }));
    let listener: SharedListener = probe.clone();
    mediator.subscribe(listener);

    mediator
        .set_control(&set(EXPOSURE, ControlValue::Integer(2_000), true))
        .unwrap();
    mediator
        .set_control(&set(GAIN, ControlValue::Integer(3), false))
        .unwrap();
    mediator
        .set_control(&set(GAIN, ControlValue::Integer(4), true))
        .unwrap();

    let seen = probe.lock().seen.clone();
    assert_eq!(
        seen,
        vec![(EXPOSURE.to_string(), 0), (GAIN.to_string(), 2)]
    );
}

#[test]
fn test_stale_and_settling_frames_dropped() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(1_000);
    let mut mediator = started(&device, &clock);

    assert_eq!(mediator.process_frame(&frame_at(900)), FrameVerdict::Pass);

    mediator
        .set_control(&set(EXPOSURE, ControlValue::Integer(5_000), true))
        .unwrap();
    assert_eq!(mediator.last_update_ns(), 1_000);
    assert_eq!(mediator.flush_state(), FlushState::DropExtra);

    assert_eq!(mediator.process_frame(&frame_at(999)), FrameVerdict::DropStale);
    assert_eq!(mediator.process_frame(&frame_at(1_010)), FrameVerdict::DropSettling);
    assert_eq!(mediator.process_frame(&frame_at(1_020)), FrameVerdict::Pass);
    assert_eq!(mediator.flush_state(), FlushState::Idle);
}

#[test]
fn test_drop_disabled_passes_everything() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(1_000);
    let mut mediator = Mediator::new(
        Box::new(device.clone()),
        Arc::new(clock.clone()),
        MediatorConfig {
            drop_on_update: false,
            drop_extra_frame: true,
        },
    );
    mediator.start().unwrap();
    let applied = mediator
        .set_control(&set(EXPOSURE, ControlValue::Integer(5_000), true))
        .unwrap();
    assert!(!applied.flushing);
    assert_eq!(mediator.process_frame(&frame_at(10)), FrameVerdict::Pass);
    assert_eq!(mediator.process_frame(&frame_at(2_000)), FrameVerdict::Pass);
}

#[test]
#[traced_test]
fn test_failed_set_leaves_flush_idle() {
    let device = MockDevice::image_sensor("mock0", 8).with_errors(ErrorConfig::scenario(
        ErrorScenario::Timeout {
            operation: "set_control",
        },
    ));
    let clock = ManualClock::new(500);
    let mut mediator = started(&device, &clock);
    let err = mediator
        .set_control(&set(GAIN, ControlValue::Integer(5), true))
        .unwrap_err();
    assert!(matches!(err, TuneError::Transport(_)));
    assert!(!err.is_local());
    assert_eq!(mediator.flush_state(), FlushState::Idle);
    assert_eq!(mediator.last_update_ns(), 0);
    assert!(logs_contain("set failed"));
}

#[test]
fn test_array_control_round_trip() {
    let device = MockDevice::image_sensor("mock0", 4);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);

    let short = ControlValue::Array(tune_core::ArrayValue::new(4, vec![1, 2, 3]));
    let err = mediator.set_control(&set(FPNC, short, false)).unwrap_err();
    assert!(matches!(
        err,
        TuneError::Validation(ValidationError::ElementCount { expected: 4, found: 3, .. })
    ));

    let full = ControlValue::Array(tune_core::ArrayValue::new(4, vec![4000, 4100, 4096, 3990]));
    let applied = mediator.set_control(&set(FPNC, full.clone(), false)).unwrap();
    assert_eq!(applied.achieved, full);
    assert!(device.calls().query_ext_control >= 1);

    let (_, value) = mediator.get_control(&ControlRef::by_name(FPNC)).unwrap();
    assert_eq!(value, full);
}

#[test]
fn test_query_envelopes() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);

    let reply = mediator
        .handle_query(&encode_set_control(
            CorrelationId(7),
            &ControlRef::by_name(GAIN),
            ControlValue::Integer(12),
            true,
        ))
        .unwrap();
    assert_eq!(reply.correlation, CorrelationId(7));
    match ControlReply::decode(&reply, QueryKind::SetControl).unwrap() {
        ControlReply::SetControl {
            achieved, flushing, ..
        } => {
            assert_eq!(achieved, ControlValue::Integer(12));
            assert!(flushing);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let reply = mediator
        .handle_query(&encode_get_control(CorrelationId(8), &ControlRef::by_name(GAIN)))
        .unwrap();
    assert!(matches!(
        ControlReply::decode(&reply, QueryKind::GetControl).unwrap(),
        ControlReply::GetControl { value: ControlValue::Integer(12), .. }
    ));

    let reply = mediator
        .handle_query(&encode_control_info(CorrelationId(9), &ControlRef::by_name(FPNC)))
        .unwrap();
    match ControlReply::decode(&reply, QueryKind::ControlInfo).unwrap() {
        ControlReply::ControlInfo(descriptor) => {
            assert_eq!(descriptor.extended.map(|e| e.element_count), Some(8));
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn test_info_falls_back_to_simple_query() {
    let device = MockDevice::image_sensor("mock0", 8).without_extended_queries();
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);
    let descriptor: ControlDescriptor = mediator.control_info(&ControlRef::by_name(GAIN)).unwrap();
    assert_eq!(descriptor.name, GAIN);
    assert_eq!(descriptor.control_type, ControlType::Integer);
    assert_eq!(descriptor.maximum, 100);
}

#[test]
fn test_event_applies_without_reply() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);
    let event =
        ControlEvent::set_control(ControlRef::by_name(GAIN), ControlValue::Integer(33), false);
    mediator.handle_event(&event.encode()).unwrap();
    assert_eq!(device.value_i64(GAIN), Some(33));

    // Invalid events are rejected like queries.
    let bad =
        ControlEvent::set_control(ControlRef::by_name(GAIN), ControlValue::Integer(-5), false);
    assert!(mediator.handle_event(&bad.encode()).is_err());
    assert_eq!(device.value_i64(GAIN), Some(33));
}

#[test]
fn test_malformed_query_rejected() {
    let device = MockDevice::image_sensor("mock0", 8);
    let clock = ManualClock::new(0);
    let mut mediator = started(&device, &clock);
    let mut env = encode_set_control(
        CorrelationId(1),
        &ControlRef::by_name(GAIN),
        ControlValue::Integer(1),
        false,
    );
    env.remove(tune_core::protocol::envelope::FLUSH);
    assert!(matches!(mediator.handle_query(&env), Err(TuneError::Protocol(_))));
    assert_eq!(device.calls().set_control, 0);
}
