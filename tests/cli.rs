use std::path::Path;
use std::process::{Command, Output};

fn mediasight(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mediasight"))
        .args(args)
        .current_dir(cwd)
        .env_remove("GEMINI_API_KEY")
        .env_remove("GOOGLE_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run mediasight")
}

fn entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_missing_api_key_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("clip.mp4"), b"fake video").unwrap();

    let output = mediasight(dir.path(), &["video", "--video", "clip.mp4"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ConfigError"), "stderr: {stderr}");
    assert!(
        stderr.contains("error: LoadConfig step failed (ConfigError: MissingAPIKey)"),
        "stderr: {stderr}"
    );
    assert_eq!(entries(dir.path()), vec!["clip.mp4"]);
}

#[test]
fn test_missing_api_key_for_image() {
    let dir = tempfile::tempdir().unwrap();
    let output = mediasight(
        dir.path(),
        &["image", "--image", "cat.png", "--preset", "emotions"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ConfigError"));
    assert!(entries(dir.path()).is_empty());
}

#[test]
fn test_json_error_report() {
    let dir = tempfile::tempdir().unwrap();
    let output = mediasight(dir.path(), &["--json", "video", "--video", "clip.mp4"]);

    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["stage"], "LoadConfig");
    assert_eq!(report["kind"], "ConfigError");
    assert_eq!(report["detail"], "MissingAPIKey");
}

#[test]
fn test_zero_poll_interval_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = mediasight(
        dir.path(),
        &[
            "--api-key",
            "test-key",
            "--poll-interval",
            "0",
            "video",
            "--video",
            "clip.mp4",
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("(ConfigError: InvalidSetting)"),
        "stderr: {stderr}"
    );
}
