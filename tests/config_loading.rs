use std::io::Write;

use casewatch::config::Config;
use casewatch::engine::MonitorSettings;

#[test]
fn test_load_full_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[api]
base_url = "https://sensei.example.org/api"
request_timeout_ms = 5000

[polling]
interval_ms = 2500
failure_streak_threshold = 5

[tracker]
tick_ms = 1000

[logging]
level = "debug"
json = true
"#
    )
    .unwrap();

    let cfg = Config::load(file.path()).unwrap();
    assert_eq!(cfg.api.base_url, "https://sensei.example.org/api");
    assert_eq!(cfg.polling.failure_streak_threshold, 5);
    assert!(cfg.logging.json);

    let settings = MonitorSettings::from(&cfg);
    assert_eq!(settings.poll_interval.as_millis(), 2500);
    assert_eq!(settings.streak_threshold, 5);
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::resolve(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_invalid_values_fail_to_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[polling]\nfailure_streak_threshold = 0\n").unwrap();
    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("failure_streak_threshold"));
}
