//! Configuration loading from files and the environment.

use sensor_tune::config::TuneConfig;
use sensor_tune::tracing_setup::OutputFormat;
use serial_test::serial;
use std::io::Write;
use std::path::Path;
use tune_control::{ScorePolicy, TargetType};
use tune_core::PixelFormat;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("tune.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = TuneConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, TuneConfig::default());
}

#[test]
#[serial]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[application]
log_format = "json"

[device.sensor]
format = "gray16_le"
width = 128

[pid]
target_value = 200
target_type = "absolute_maximum"

[sweep]
policy = "max_mode"
sweep_max = 120
"#,
    );

    let config = TuneConfig::load_from(&path).unwrap();
    assert_eq!(config.application.log_format, OutputFormat::Json);
    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.device.sensor.format, PixelFormat::Gray16Le);
    assert_eq!(config.device.sensor.width, 128);
    assert_eq!(config.device.sensor.height, 4);
    assert_eq!(config.pid.target_value, 200);
    assert_eq!(config.pid.target_type, TargetType::AbsoluteMaximum);
    assert_eq!(config.pid.kp, 1.0);
    assert_eq!(config.sweep.policy, ScorePolicy::MaxMode);
    assert_eq!(config.sweep.sweep_max, Some(120));
    assert_eq!(config.sweep.sweep_min, None);
    assert_eq!(config.calibration.exposure_step, 1000);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[pid]\ntarget_value = 90\n");

    std::env::set_var("SENSOR_TUNE_PID__TARGET_VALUE", "150");
    std::env::set_var("SENSOR_TUNE_MEDIATOR__DROP_EXTRA_FRAME", "false");
    let loaded = TuneConfig::load_from(&path);
    std::env::remove_var("SENSOR_TUNE_PID__TARGET_VALUE");
    std::env::remove_var("SENSOR_TUNE_MEDIATOR__DROP_EXTRA_FRAME");

    let config = loaded.unwrap();
    assert_eq!(config.pid.target_value, 150);
    assert!(!config.mediator.drop_extra_frame);
    assert!(config.mediator.drop_on_update);
}

#[test]
#[serial]
fn test_invalid_values_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "[calibration]\nexposure_min = 5000\nexposure_max = 1000\n",
    );
    let config = TuneConfig::load_from(&path).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("exposure range"));
}

#[test]
#[serial]
fn test_unknown_enum_value_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[sweep]\npolicy = \"fastest\"\n");
    assert!(TuneConfig::load_from(&path).is_err());
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/tune.toml");
    let config = TuneConfig::load_from(path).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.device.sensor.seed, Some(7));
}
