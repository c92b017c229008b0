use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use drone_surveillance::config::SurveildConfig;
use drone_surveillance::{CountingMode, OverlayKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SURVEIL_CONFIG",
        "SURVEIL_API_ADDR",
        "SURVEIL_FEED_SOURCES",
        "SURVEIL_COUNTING_MODE",
        "SURVEIL_DETECTOR",
        "SURVEIL_MODEL_PATH",
        "SURVEIL_TARGET_FPS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "127.0.0.1:9100", "max_streams": 4 },
        "stream": { "target_fps": 15, "jpeg_quality": 65 },
        "detector": { "backend": "synthetic", "confidence": 0.4, "tracking": false },
        "feeds": [
            { "name": "civilian", "source": "stub://civ", "overlay": "civilian" },
            { "name": "soldier", "source": "stub://sol", "overlay": "soldier" },
            { "name": "overview", "source": "stub://all", "counting": "instantaneous" }
        ],
        "default_feed": "overview"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SURVEIL_CONFIG", file.path());
    std::env::set_var("SURVEIL_FEED_SOURCES", "soldier=/videos/soldier.mp4");
    std::env::set_var("SURVEIL_TARGET_FPS", "24");
    std::env::set_var("SURVEIL_MODEL_PATH", "/models/best.onnx");

    let cfg = SurveildConfig::load().expect("load config");

    assert_eq!(cfg.api.addr, "127.0.0.1:9100");
    assert_eq!(cfg.api.max_streams, 4);
    assert_eq!(cfg.stream.target_fps, 24);
    assert_eq!(cfg.stream.jpeg_quality, 65);
    assert_eq!(cfg.detector.backend, "synthetic");
    assert!(!cfg.detector.tracking);
    assert!((cfg.detector.confidence - 0.4).abs() < f32::EPSILON);
    assert_eq!(cfg.detector.model_path, Some(PathBuf::from("/models/best.onnx")));
    assert_eq!(cfg.default_feed, "overview");
    assert_eq!(cfg.feeds.len(), 3);
    let soldier = cfg.feed("soldier").expect("soldier feed");
    assert_eq!(soldier.source, "/videos/soldier.mp4");
    assert_eq!(soldier.overlay, OverlayKind::Soldier);
    let overview = cfg.feed("overview").expect("overview feed");
    assert_eq!(overview.overlay, OverlayKind::Both);
    assert_eq!(overview.counting, CountingMode::Instantaneous);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
default_feed = "north"

[stream]
target_fps = 10

[[feeds]]
name = "north"
source = "stub://north"
counting = "instantaneous"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = SurveildConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.default_feed, "north");
    assert_eq!(cfg.stream.target_fps, 10);
    assert_eq!(cfg.stream.jpeg_quality, 80);
    assert_eq!(cfg.api.addr, "0.0.0.0:8000");
    assert_eq!(cfg.feeds[0].counting, CountingMode::Instantaneous);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = SurveildConfig::load().expect("load defaults");
    assert_eq!(cfg.api.addr, "0.0.0.0:8000");
    assert_eq!(cfg.api.max_streams, 16);
    assert_eq!(cfg.stream.target_fps, 30);
    assert_eq!(cfg.default_feed, "civilian");
    assert_eq!(cfg.detector.backend, "synthetic");
    assert!(cfg.detector.tracking);
    let civilian = cfg.feed("civilian").expect("civilian feed");
    assert_eq!(civilian.source, "stub://drone_civilian");
    assert_eq!(civilian.counting, CountingMode::Cumulative);

    clear_env();
}

#[test]
fn counting_mode_override_applies_to_every_feed() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("SURVEIL_COUNTING_MODE", "instantaneous");
    let cfg = SurveildConfig::load().expect("load config");
    assert!(cfg
        .feeds
        .iter()
        .all(|feed| feed.counting == CountingMode::Instantaneous));

    clear_env();
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("SURVEIL_TARGET_FPS", "fast");
    assert!(SurveildConfig::load().is_err());
    clear_env();

    std::env::set_var("SURVEIL_TARGET_FPS", "500");
    assert!(SurveildConfig::load().is_err());
    clear_env();

    std::env::set_var("SURVEIL_FEED_SOURCES", "tanks=/videos/tanks.mp4");
    assert!(SurveildConfig::load().is_err());
    clear_env();

    std::env::set_var("SURVEIL_COUNTING_MODE", "sometimes");
    assert!(SurveildConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_missing_and_malformed_files() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    assert!(SurveildConfig::load_from(Some(std::path::Path::new("/no/such/config.json"))).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"feeds": [{"name": "Bad Name", "source": "stub://x"}], "default_feed": "Bad Name"}"#)
        .expect("write config");
    assert!(SurveildConfig::load_from(Some(file.path())).is_err());

    clear_env();
}
