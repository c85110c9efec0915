use super::*;
use tempfile::TempDir;

#[test]
fn test_default_config_values() {
    let config = Config::default();

    // Key bindings
    assert_eq!(config.pre_action_key, "1");
    assert_eq!(config.fishing_key, "2");
    assert_eq!(config.interact_key, "f");

    // Timing
    assert_eq!(config.bait_interval, 900);
    assert_eq!(config.timeout, 20);
    assert_eq!(config.hook_delay_range(), (200, 600));
    assert_eq!(config.cast_delay_range(), (500, 1500));

    // Sound
    assert!((config.sound_threshold - 0.02).abs() < f32::EPSILON);
    assert_eq!(config.sound_sensitivity, 50);
    assert!((config.trigger_cooldown - 1.0).abs() < f64::EPSILON);
    assert!(config.audio_device.is_none());
    assert_eq!(config.log_level, LogLevel::Info);
}

#[test]
fn test_threshold_endpoints() {
    assert!((threshold_for_sensitivity(0) - 0.1).abs() < 1e-6);
    assert!((threshold_for_sensitivity(100) - 0.005).abs() < 1e-6);
    assert!((threshold_for_sensitivity(50) - 0.0525).abs() < 1e-6);
}

#[test]
fn test_threshold_is_non_increasing() {
    let mut previous = threshold_for_sensitivity(0);
    for s in 1..=100 {
        let current = threshold_for_sensitivity(s);
        assert!(current <= previous, "threshold rose at sensitivity {}", s);
        let expected = 0.1 - f32::from(s) / 100.0 * 0.095;
        assert!((current - expected).abs() < 1e-6);
        previous = current;
    }
}

#[test]
fn test_threshold_clamps_sensitivity_above_range() {
    assert_eq!(threshold_for_sensitivity(255), threshold_for_sensitivity(100));
}

#[test]
fn test_update_threshold_writes_field() {
    let mut config = Config {
        sound_sensitivity: 0,
        ..Config::default()
    };

    let threshold = config.update_threshold();

    assert!((threshold - 0.1).abs() < 1e-6);
    assert!((config.sound_threshold - 0.1).abs() < 1e-6);
}

#[test]
fn test_load_valid_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");

    let json = r#"{
    "pre_action_key": "3",
    "fishing_key": "F5",
    "interact_key": "space",
    "bait_interval": 600,
    "timeout": 15,
    "hook_delay_min": 100,
    "hook_delay_max": 300,
    "sound_sensitivity": 80,
    "audio_device": "Stereo Mix"
}"#;

    std::fs::write(&config_path, json).unwrap();

    let config = Config::load_from(&config_path).unwrap();

    assert_eq!(config.pre_action_key, "3");
    assert_eq!(config.fishing_key, "F5");
    assert_eq!(config.interact_key, "space");
    assert_eq!(config.bait_interval, 600);
    assert_eq!(config.timeout, 15);
    assert_eq!(config.hook_delay_range(), (100, 300));
    assert_eq!(config.sound_sensitivity, 80);
    assert_eq!(config.audio_device.as_deref(), Some("Stereo Mix"));
    assert_eq!(config.path(), Some(config_path.as_path()));
}

#[test]
fn test_missing_config_file_returns_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nonexistent.json");

    let config = Config::load_from(&config_path).unwrap();

    let mut expected = Config::default();
    expected.path = Some(config_path);
    assert_eq!(config, expected);
}

#[test]
fn test_invalid_json_returns_error() {
    let result = Config::parse("this is not valid { json [");

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("JSON"));
}

#[test]
fn test_partial_config_uses_defaults_for_missing() {
    let config = Config::parse(r#"{"interact_key": "e"}"#).unwrap();

    // Specified value
    assert_eq!(config.interact_key, "e");
    // Default values for unspecified fields
    assert_eq!(config.fishing_key, "2");
    assert_eq!(config.timeout, 20);
    assert_eq!(config.cast_delay_range(), (500, 1500));
}

#[test]
fn test_underscore_keys_are_ignored() {
    let config = Config::parse(r#"{"_config_path": "elsewhere.json", "timeout": 30}"#).unwrap();

    assert_eq!(config.timeout, 30);
    assert!(config.path().is_none());
}

#[test]
fn test_serialized_config_is_flat_and_has_no_private_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");

    let config = Config::load_from(&config_path).unwrap();
    let json = serde_json::to_value(&config).unwrap();
    let object = json.as_object().unwrap();

    assert!(object.keys().all(|k| !k.starts_with('_')));
    assert!(!object.contains_key("path"));
    assert!(object.values().all(|v| !v.is_object()));
    assert_eq!(object["fishing_key"], "2");
    assert_eq!(object["log_level"], "info");
}

#[test]
fn test_config_path() {
    let config_path = Config::config_path().unwrap();

    assert!(config_path.ends_with("config.json"));
    assert!(config_path.parent().unwrap().ends_with("autocast"));
}

#[test]
fn test_save_and_load_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");

    let original = Config {
        pre_action_key: "4".to_string(),
        fishing_key: "f2".to_string(),
        interact_key: "enter".to_string(),
        bait_interval: 1800,
        timeout: 25,
        hook_delay_min: 150,
        hook_delay_max: 450,
        cast_delay_min: 700,
        cast_delay_max: 1200,
        sound_threshold: 0.03,
        sound_sensitivity: 70,
        trigger_cooldown: 1.5,
        audio_device: Some("2".to_string()),
        log_level: LogLevel::Debug,
        path: None,
    };

    original.save_to(&config_path).unwrap();
    let loaded = Config::load_from(&config_path).unwrap();

    let mut expected = original;
    expected.path = Some(config_path);
    assert_eq!(expected, loaded);
}

#[test]
fn test_save_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested/dir/config.json");

    let config = Config::default();
    config.save_to(&config_path).unwrap();

    assert!(config_path.exists());
}

#[test]
fn test_save_writes_back_to_loaded_path() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("mine.json");

    let mut config = Config::load_from(&config_path).unwrap();
    config.timeout = 42;
    config.save().unwrap();

    let reloaded = Config::load_from(&config_path).unwrap();
    assert_eq!(reloaded.timeout, 42);
}

#[test]
fn test_unset_audio_device_not_serialized() {
    let json = serde_json::to_string(&Config::default()).unwrap();

    assert!(!json.contains("audio_device"));
}

#[test]
fn test_log_level_directive() {
    assert_eq!(LogLevel::Info.as_directive(), "autocast=info");
    assert_eq!(LogLevel::Trace.as_directive(), "autocast=trace");
}

#[test]
fn test_validate_accepts_defaults() {
    assert!(Config::default().validate().is_ok());
}

#[test]
fn test_validate_rejects_inverted_ranges() {
    let config = Config {
        hook_delay_min: 900,
        hook_delay_max: 100,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

    let config = Config {
        cast_delay_min: 2000,
        cast_delay_max: 1000,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_validate_rejects_zero_timeout_and_bad_cooldown() {
    let config = Config {
        timeout: 0,
        ..Config::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
        trigger_cooldown: -1.0,
        ..Config::default()
    };
    assert!(config.validate().is_err());
    assert_eq!(config.trigger_cooldown_duration(), Duration::from_secs(1));
}

#[test]
fn test_validate_rejects_out_of_range_waits() {
    let config = Config {
        timeout: u64::MAX,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

    let config = Config {
        timeout: MAX_TIMEOUT_SECS,
        ..Config::default()
    };
    assert!(config.validate().is_ok());

    let config = Config {
        hook_delay_max: u64::MAX,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

    let config = Config {
        cast_delay_max: MAX_DELAY_MS + 1,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
}
