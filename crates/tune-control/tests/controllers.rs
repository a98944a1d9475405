//! Controllers closing the loop through the mediator against the mock device.
//!
//! Each test renders synthetic frames from the device's current parameter
//! values, so every committed change shows up in the next frame.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing_test::traced_test;
use tune_control::{
    CalibrationConfig, CalibrationController, CalibrationReport, Flow, FrameController, PidConfig,
    PidController, ScorePolicy, SweepConfig, SweepController, TargetType, Termination,
};
use tune_core::kernels::{histogram, magic};
use tune_core::{
    ControlDescriptor, ControlType, ControlValue, Frame, ManualClock, TransportErrorKind,
    TuneError, TuneResult,
};
use tune_driver_mock::{ErrorConfig, ErrorScenario, MockDevice, EXPOSURE, FPNC, V_RAMP};
use tune_mediator::{Mediator, MediatorConfig};

fn started(device: &MockDevice) -> Mediator {
    let mut mediator = Mediator::new(
        Box::new(device.clone()),
        Arc::new(ManualClock::new(0)),
        MediatorConfig::default(),
    );
    mediator.start().unwrap();
    mediator
}

/// Uniform 8-bit frame with histogram metadata.
fn gray8(sequence: u64, level: i64) -> Frame {
    let px = level.clamp(0, 255) as u8;
    let mut frame = Frame::from_u8(16, 2, vec![px; 32]).with_sequence(sequence);
    frame.meta.histogram = Some(histogram::compute(&frame, 256).unwrap());
    frame
}

/// Run `controller` until it finishes, rendering each frame with `render`.
fn run<C: FrameController>(
    controller: &mut C,
    mediator: &mut Mediator,
    limit: u64,
    mut render: impl FnMut(u64) -> Frame,
) -> TuneResult<(Termination, u64)> {
    for sequence in 0..limit {
        let frame = render(sequence);
        if let Flow::Finished(termination) = controller.process_frame(&frame, mediator)? {
            return Ok((termination, sequence + 1));
        }
    }
    panic!("controller did not finish within {limit} frames");
}

// =============================================================================
// PID
// =============================================================================

fn pid_config(target_value: u32) -> PidConfig {
    PidConfig {
        control_name: EXPOSURE.to_string(),
        target_value,
        ..Default::default()
    }
}

#[test]
fn test_pid_reaches_target() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.force_value(EXPOSURE, ControlValue::Integer(100));
    let mut mediator = started(&device);
    let mut pid = PidController::new(pid_config(127));

    let probe = device.clone();
    let (termination, frames) = run(&mut pid, &mut mediator, 10, |seq| {
        gray8(seq, probe.value_i64(EXPOSURE).unwrap())
    })
    .unwrap();

    assert_eq!(termination, Termination::TargetReached { value: 127 });
    assert_eq!(frames, 2);
    assert_eq!(device.value_i64(EXPOSURE), Some(127));
}

#[test]
fn test_pid_inverted_control() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.force_value(EXPOSURE, ControlValue::Integer(100));
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        inverted: true,
        ..pid_config(127)
    });

    // Metric falls as the parameter rises.
    let probe = device.clone();
    let (termination, _) = run(&mut pid, &mut mediator, 10, |seq| {
        gray8(seq, 227 - probe.value_i64(EXPOSURE).unwrap())
    })
    .unwrap();

    assert_eq!(termination, Termination::TargetReached { value: 100 });

    let device = MockDevice::image_sensor("mock0", 16);
    device.force_value(EXPOSURE, ControlValue::Integer(150));
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        inverted: true,
        ..pid_config(127)
    });
    let probe = device.clone();
    let (termination, frames) = run(&mut pid, &mut mediator, 10, |seq| {
        gray8(seq, 227 - probe.value_i64(EXPOSURE).unwrap())
    })
    .unwrap();
    assert_eq!(frames, 2);
    assert_eq!(termination, Termination::TargetReached { value: 100 });
}

#[test]
fn test_pid_oscillation_settles_on_best() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        control_step: 1,
        stop_when_done: true,
        ..pid_config(127)
    });

    // Levels 101, 104, ..., 125, 128: 127 itself is never produced.
    let probe = device.clone();
    let (termination, _) = run(&mut pid, &mut mediator, 40, |seq| {
        let exposure = probe.value_i64(EXPOSURE).unwrap();
        gray8(seq, 3 * (exposure - 1000) + 101)
    })
    .unwrap();

    assert_eq!(
        termination,
        Termination::BestAchievable {
            value: 1009,
            saturated: false
        }
    );
    assert_eq!(device.value_i64(EXPOSURE), Some(1009));
}

#[traced_test]
#[test]
fn test_pid_boundary_reached() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.force_value(EXPOSURE, ControlValue::Integer(100_000));
    let mut mediator = started(&device);
    let mut pid = PidController::new(pid_config(200));

    let (termination, frames) = run(&mut pid, &mut mediator, 5, |seq| gray8(seq, 50)).unwrap();

    assert_eq!(termination, Termination::BoundaryReached { value: 100_000 });
    assert_eq!(frames, 1);
    assert!(logs_contain("reached maximum parameter value"));
}

#[test]
fn test_pid_boundary_fatal_when_stopping() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.force_value(EXPOSURE, ControlValue::Integer(10));
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        stop_when_done: true,
        ..pid_config(20)
    });

    let err = pid.process_frame(&gray8(0, 90), &mut mediator).unwrap_err();
    assert!(matches!(
        err,
        TuneError::Controller {
            controller: "pid",
            ..
        }
    ));
}

#[traced_test]
#[test]
fn test_pid_runs_exhausted() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        control_step: 1,
        max_runs: 3,
        ..pid_config(200)
    });

    let (termination, frames) = run(&mut pid, &mut mediator, 10, |seq| gray8(seq, 10)).unwrap();

    assert_eq!(termination, Termination::RunsExhausted { runs: 3 });
    assert_eq!(frames, 4);
    assert_eq!(device.value_i64(EXPOSURE), Some(1003));
    assert!(logs_contain("reached maximum number of runs"));
}

#[test]
fn test_pid_ignores_repeated_frames() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        control_step: 5,
        ..pid_config(200)
    });

    let frame = gray8(7, 10);
    assert_eq!(pid.process_frame(&frame, &mut mediator).unwrap(), Flow::Continue);
    let sets = device.calls().set_control;
    assert_eq!(pid.process_frame(&frame, &mut mediator).unwrap(), Flow::Continue);
    assert_eq!(device.calls().set_control, sets);
    assert_eq!(pid.runs(), 1);
}

#[test]
fn test_pid_requires_histogram() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut pid = PidController::new(pid_config(127));

    let frame = Frame::from_u8(4, 1, vec![0; 4]);
    let err = pid.process_frame(&frame, &mut mediator).unwrap_err();
    assert!(matches!(err, TuneError::Controller { .. }));
}

#[test]
fn test_pid_absolute_maximum() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.force_value(EXPOSURE, ControlValue::Integer(40));
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        target_type: TargetType::AbsoluteMaximum,
        ..pid_config(200)
    });

    // Dark frame with a few highlights tracking the exposure.
    let probe = device.clone();
    let (termination, _) = run(&mut pid, &mut mediator, 10, |seq| {
        let exposure = probe.value_i64(EXPOSURE).unwrap();
        let mut data = vec![5u8; 32];
        for px in data.iter_mut().take(4) {
            *px = (exposure + 20).clamp(0, 255) as u8;
        }
        let mut frame = Frame::from_u8(16, 2, data).with_sequence(seq);
        frame.meta.histogram = Some(histogram::compute(&frame, 256).unwrap());
        frame
    })
    .unwrap();

    assert_eq!(termination, Termination::TargetReached { value: 180 });
}

#[test]
fn test_pid_huge_gain_clamps_to_range() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut pid = PidController::new(PidConfig {
        kp: 1e30,
        ..pid_config(200)
    });

    let (termination, frames) = run(&mut pid, &mut mediator, 5, |seq| gray8(seq, 10)).unwrap();

    assert_eq!(termination, Termination::BoundaryReached { value: 100_000 });
    assert_eq!(frames, 2);
    assert_eq!(device.value_i64(EXPOSURE), Some(100_000));
}

#[test]
fn test_pid_failed_set_ends_run() {
    let device = MockDevice::image_sensor("mock0", 16).with_errors(ErrorConfig::scenario(
        ErrorScenario::Timeout {
            operation: "set_control",
        },
    ));
    let mut mediator = started(&device);
    let mut pid = PidController::new(pid_config(200));

    let err = pid.process_frame(&gray8(0, 10), &mut mediator).unwrap_err();
    assert!(matches!(
        &err,
        TuneError::Transport(transport) if transport.kind == TransportErrorKind::Timeout
    ));
    assert!(!err.is_local());
    assert_eq!(pid.value(), 1_000);
    assert_eq!(device.value_i64(EXPOSURE), Some(1_000));
}

// =============================================================================
// Sweep
// =============================================================================

fn sweep_config(policy: ScorePolicy, min: i64, max: i64, step: u32) -> SweepConfig {
    SweepConfig {
        control_name: V_RAMP.to_string(),
        policy,
        step,
        sweep_min: Some(min),
        sweep_max: Some(max),
        ..Default::default()
    }
}

#[test]
fn test_sweep_max_average_selects_top() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(sweep_config(ScorePolicy::MaxAverage, 0, 10, 2));

    let probe = device.clone();
    let (termination, frames) = run(&mut sweep, &mut mediator, 20, |seq| {
        gray8(seq, probe.value_i64(V_RAMP).unwrap())
    })
    .unwrap();

    assert_eq!(
        termination,
        Termination::SweepComplete {
            best: Some(10),
            early: false
        }
    );
    assert_eq!(frames, 7);
    assert_eq!(device.value_i64(V_RAMP), Some(10));
}

#[test]
fn test_sweep_wide_integer_control() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.add_control(
        ControlDescriptor::builder(0x009a_0a11, "Wide Ramp", ControlType::Integer64)
            .range(0, 10)
            .build(),
        ControlValue::Integer64(0),
    );
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(SweepConfig {
        control_name: "Wide Ramp".to_string(),
        ..sweep_config(ScorePolicy::MaxAverage, 0, 10, 2)
    });

    let probe = device.clone();
    let (termination, frames) = run(&mut sweep, &mut mediator, 20, |seq| {
        gray8(seq, probe.value_i64("Wide Ramp").unwrap())
    })
    .unwrap();

    assert_eq!(
        termination,
        Termination::SweepComplete {
            best: Some(10),
            early: false
        }
    );
    assert_eq!(frames, 7);
    assert_eq!(device.value("Wide Ramp"), Some(ControlValue::Integer64(10)));
}

#[test]
fn test_sweep_min_column_difference() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut sweep =
        SweepController::new(sweep_config(ScorePolicy::MinColumnDifference, 0, 10, 2));

    // Column structure vanishes at ramp 6.
    let probe = device.clone();
    let (termination, _) = run(&mut sweep, &mut mediator, 20, |seq| {
        let amplitude = (probe.value_i64(V_RAMP).unwrap() - 6).unsigned_abs() as u8;
        let data: Vec<u8> = (0..16).map(|c| 100 + amplitude * (c % 2)).collect();
        let mut frame = Frame::from_u8(16, 1, data).with_sequence(seq);
        frame.meta.magic = Some(magic::compute(&frame).unwrap());
        frame
    })
    .unwrap();

    assert_eq!(
        termination,
        Termination::SweepComplete {
            best: Some(6),
            early: false
        }
    );
    assert_eq!(device.value_i64(V_RAMP), Some(6));
    assert_eq!(sweep.best().map(|c| c.score), Some(0.0));
}

#[traced_test]
#[test]
fn test_sweep_grows_step_on_coarse_device() {
    let device = MockDevice::image_sensor("mock0", 16);
    device.set_quantum(V_RAMP, 4);
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(sweep_config(ScorePolicy::MaxAverage, 0, 12, 1));

    let probe = device.clone();
    let visited = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&visited);
    let (termination, _) = run(&mut sweep, &mut mediator, 20, |seq| {
        let ramp = probe.value_i64(V_RAMP).unwrap();
        seen.lock().push(ramp);
        gray8(seq, ramp)
    })
    .unwrap();

    assert_eq!(
        termination,
        Termination::SweepComplete {
            best: Some(12),
            early: false
        }
    );
    // First frame renders the device default before the lower bound is set.
    assert_eq!(*visited.lock(), vec![40, 0, 4, 8, 12]);
    assert!(logs_contain("increasing step"));
}

#[test]
fn test_sweep_stops_early_at_saturation() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(sweep_config(ScorePolicy::MaxAverage, 0, 255, 1));

    let probe = device.clone();
    let (termination, frames) = run(&mut sweep, &mut mediator, 300, |seq| {
        gray8(seq, 60 * probe.value_i64(V_RAMP).unwrap())
    })
    .unwrap();

    assert_eq!(
        termination,
        Termination::SweepComplete {
            best: Some(5),
            early: true
        }
    );
    assert_eq!(frames, 7);
}

#[traced_test]
#[test]
fn test_sweep_clamps_overrides() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(sweep_config(ScorePolicy::None, -5, 1000, 1));

    assert_eq!(
        sweep.process_frame(&gray8(0, 0), &mut mediator).unwrap(),
        Flow::Continue
    );
    assert_eq!(sweep.bounds(), (0, 255));
    assert_eq!(device.value_i64(V_RAMP), Some(0));
    assert!(logs_contain("invalid sweep max requested"));
}

#[test]
fn test_sweep_rejects_inverted_bounds() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(sweep_config(ScorePolicy::MaxAverage, 200, 100, 1));

    let err = sweep.process_frame(&gray8(0, 0), &mut mediator).unwrap_err();
    assert!(matches!(
        err,
        TuneError::Controller {
            controller: "sweep",
            ..
        }
    ));
}

#[test]
fn test_sweep_without_policy_leaves_last_value() {
    let device = MockDevice::image_sensor("mock0", 16);
    let mut mediator = started(&device);
    let mut sweep = SweepController::new(sweep_config(ScorePolicy::None, 3, 5, 1));

    let (termination, frames) = run(&mut sweep, &mut mediator, 10, |seq| gray8(seq, 0)).unwrap();

    assert_eq!(
        termination,
        Termination::SweepComplete {
            best: None,
            early: false
        }
    );
    assert_eq!(frames, 4);
    assert_eq!(device.value_i64(V_RAMP), Some(5));
}

// =============================================================================
// Calibration
// =============================================================================

const WIDTH: u32 = 8;

/// Even columns respond at 0.98, odd columns at 1.02 of the exposure.
fn calibration_frame(sequence: u64, exposure: i64) -> Frame {
    let pixels: Vec<u16> = (0..WIDTH)
        .map(|c| {
            let gain = if c % 2 == 0 { 0.98 } else { 1.02 };
            (exposure as f64 * gain).round().clamp(0.0, 65535.0) as u16
        })
        .collect();
    let mut frame = Frame::from_u16(WIDTH, 1, &pixels).with_sequence(sequence);
    frame.meta.magic = Some(magic::compute(&frame).unwrap());
    frame
}

fn calibration_config() -> CalibrationConfig {
    CalibrationConfig {
        exposure_min: 10_000,
        exposure_max: 20_001,
        exposure_step: 2_000,
        ..Default::default()
    }
}

#[test]
fn test_calibration_end_to_end() {
    let device = MockDevice::image_sensor("mock0", WIDTH);
    let mut mediator = started(&device);
    let dir = tempfile::tempdir().unwrap();

    let reports: Arc<Mutex<Vec<CalibrationReport>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let mut calibration = CalibrationController::new(CalibrationConfig {
        write_to_file: true,
        file_path: dir.path().join("fpnc"),
        ..calibration_config()
    })
    .with_observer(Box::new(move |report| sink.lock().push(report.clone())));

    let probe = device.clone();
    let (termination, _) = run(&mut calibration, &mut mediator, 20, |seq| {
        calibration_frame(seq, probe.value_i64(EXPOSURE).unwrap())
    })
    .unwrap();

    assert_eq!(termination, Termination::CalibrationComplete { solved: true });
    assert_eq!(calibration.samples().len(), 5);
    assert_eq!(
        calibration
            .samples()
            .iter()
            .map(|s| s.exposure)
            .collect::<Vec<_>>(),
        vec![10_000, 12_000, 14_000, 16_000, 18_000]
    );
    // Starting exposure restored.
    assert_eq!(device.value_i64(EXPOSURE), Some(1_000));

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.success);
    assert_eq!(report.element_count, WIDTH);
    assert_eq!(report.byte_size, 4 * WIDTH as usize);

    let table = &report.correction.elements;
    for (column, &value) in table.iter().enumerate() {
        if column % 2 == 0 {
            assert_eq!(value, 4096, "column {column}");
        } else {
            assert!((3900..3960).contains(&value), "column {column}: {value}");
        }
    }
    let stored = device.value(FPNC).unwrap();
    assert_eq!(stored.as_array().unwrap().elements, *table);

    let written = std::fs::read_to_string(dir.path().join("fpnc").join("calced_fpnc")).unwrap();
    assert_eq!(written.lines().count(), WIDTH as usize);
}

#[traced_test]
#[test]
fn test_calibration_refused_table_fails_run() {
    // The identity table goes through, the solved table is refused.
    let device = MockDevice::image_sensor("mock0", WIDTH).with_errors(ErrorConfig::scenario(
        ErrorScenario::FailAfterN {
            operation: "set_ext_control",
            count: 1,
        },
    ));
    let mut mediator = started(&device);
    let reports: Arc<Mutex<Vec<CalibrationReport>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let mut calibration = CalibrationController::new(calibration_config())
        .with_observer(Box::new(move |report| sink.lock().push(report.clone())));

    let probe = device.clone();
    let err = run(&mut calibration, &mut mediator, 20, |seq| {
        calibration_frame(seq, probe.value_i64(EXPOSURE).unwrap())
    })
    .unwrap_err();

    assert!(matches!(err, TuneError::Transport(_)));
    assert!(calibration.is_complete());
    assert_eq!(calibration.report().map(|r| r.success), Some(false));
    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].success);
    // Exposure restored, identity table still in place.
    assert_eq!(device.value_i64(EXPOSURE), Some(1_000));
    let stored = device.value(FPNC).unwrap();
    assert_eq!(stored.as_array().unwrap().elements, vec![4096; WIDTH as usize]);
    assert!(logs_contain("unable to apply correction table"));
}

#[test]
fn test_calibration_skips_dark_frames() {
    let device = MockDevice::image_sensor("mock0", WIDTH);
    let mut mediator = started(&device);
    let mut calibration = CalibrationController::new(CalibrationConfig {
        exposure_min: 6_000,
        ..calibration_config()
    });

    let probe = device.clone();
    let (termination, _) = run(&mut calibration, &mut mediator, 20, |seq| {
        calibration_frame(seq, probe.value_i64(EXPOSURE).unwrap())
    })
    .unwrap();

    assert_eq!(termination, Termination::CalibrationComplete { solved: true });
    // 6000 and 8000 fall below the usable window.
    assert_eq!(calibration.samples()[0].exposure, 10_000);
}

#[traced_test]
#[test]
fn test_calibration_too_few_samples() {
    let device = MockDevice::image_sensor("mock0", WIDTH);
    let mut mediator = started(&device);
    let called = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&called);
    let mut calibration = CalibrationController::new(calibration_config())
        .with_observer(Box::new(move |_| *flag.lock() = true));

    // Every frame is brighter than the usable window.
    let (termination, frames) = run(&mut calibration, &mut mediator, 20, |seq| {
        calibration_frame(seq, 60_000)
    })
    .unwrap();

    assert_eq!(termination, Termination::CalibrationComplete { solved: false });
    assert_eq!(frames, 3);
    assert!(!*called.lock());
    assert_eq!(device.value_i64(EXPOSURE), Some(1_000));
    assert!(logs_contain("at least 2 usable exposures"));
}

#[test]
fn test_calibration_passes_frames_when_not_ending_stream() {
    let device = MockDevice::image_sensor("mock0", WIDTH);
    let mut mediator = started(&device);
    let mut calibration = CalibrationController::new(CalibrationConfig {
        throw_eos: false,
        ..calibration_config()
    });

    for seq in 0..3 {
        let flow = calibration
            .process_frame(&calibration_frame(seq, 60_000), &mut mediator)
            .unwrap();
        assert_eq!(flow, Flow::Continue);
    }
    assert!(calibration.is_complete());
    let sets = device.calls().set_control;
    calibration
        .process_frame(&calibration_frame(3, 60_000), &mut mediator)
        .unwrap();
    assert_eq!(device.calls().set_control, sets);
}

#[test]
fn test_calibration_requires_magic_metadata() {
    let device = MockDevice::image_sensor("mock0", WIDTH);
    let mut mediator = started(&device);
    let mut calibration = CalibrationController::new(calibration_config());

    let bare = Frame::from_u16(WIDTH, 1, &[0; WIDTH as usize]);
    // The first frame is discarded unseen.
    assert_eq!(
        calibration.process_frame(&bare, &mut mediator).unwrap(),
        Flow::Continue
    );
    let err = calibration.process_frame(&bare, &mut mediator).unwrap_err();
    assert!(matches!(
        err,
        TuneError::Controller {
            controller: "calibration",
            ..
        }
    ));
}

#[test]
fn test_calibration_rejects_width_mismatch() {
    let device = MockDevice::image_sensor("mock0", WIDTH);
    let mut mediator = started(&device);
    let mut calibration = CalibrationController::new(calibration_config());

    let mut frame = calibration_frame(0, 10_000);
    if let Some(magic) = frame.meta.magic.as_mut() {
        magic.column_count = WIDTH - 1;
    }
    calibration.process_frame(&frame, &mut mediator).unwrap();
    let err = calibration.process_frame(&frame, &mut mediator).unwrap_err();
    assert!(err.to_string().contains("not equal to frame width"));
}
