use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn voxlisten_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_voxlisten").expect("voxlisten test binary not built")
}

fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "voxlisten_cli_{tag}_{}_{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Silence, one loud burst, then silence again, as 16 kHz mono PCM.
fn write_burst_wav(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    let frame = 1024;
    for (level, frames) in [(0i16, 35), (2_000, 40), (0, 40)] {
        for _ in 0..frames * frame {
            writer.write_sample(level).expect("write sample");
        }
    }
    writer.finalize().expect("finalize wav");
}

#[test]
fn voxlisten_help_mentions_name() {
    let output = Command::new(voxlisten_bin())
        .arg("--help")
        .output()
        .expect("run voxlisten --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("voxlisten"));
    assert!(combined.contains("--replay-wav"));
}

#[test]
fn voxlisten_list_input_devices_uses_test_override() {
    let output = Command::new(voxlisten_bin())
        .arg("--list-input-devices")
        .env("VOXLISTEN_TEST_DEVICES", "Desk Mic, USB Headset")
        .output()
        .expect("run voxlisten --list-input-devices");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available audio input devices:"));
    assert!(stdout.contains("  - Desk Mic"));
    assert!(stdout.contains("  - USB Headset"));
}

#[test]
fn voxlisten_rejects_out_of_range_sensitivity() {
    let output = Command::new(voxlisten_bin())
        .args(["--sensitivity", "9"])
        .output()
        .expect("run voxlisten --sensitivity 9");
    assert!(!output.status.success());
}

#[test]
fn voxlisten_rejects_missing_replay_file() {
    let dir = scratch_dir("missing");
    let output = Command::new(voxlisten_bin())
        .arg("--replay-wav")
        .arg(dir.join("absent.wav"))
        .arg("--no-logs")
        .stdin(Stdio::null())
        .output()
        .expect("run voxlisten with missing replay");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("not a readable file"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn voxlisten_replay_writes_one_utterance() {
    let dir = scratch_dir("replay");
    let input = dir.join("input.wav");
    let out_dir = dir.join("out");
    write_burst_wav(&input);

    let output = Command::new(voxlisten_bin())
        .arg("--replay-wav")
        .arg(&input)
        .arg("--output-dir")
        .arg(&out_dir)
        .args(["--no-secondary-classifier", "--no-logs"])
        .stdin(Stdio::null())
        .output()
        .expect("run voxlisten replay");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", combined_output(&output));

    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("json event line"))
        .collect();
    let names: Vec<&str> = events
        .iter()
        .filter_map(|event| event["event"].as_str())
        .collect();
    assert_eq!(names.first(), Some(&"listening_start"));
    assert!(names.contains(&"recording_start"));
    assert!(names.contains(&"recording_complete"));
    assert_eq!(names.last(), Some(&"listening_stop"));

    let written: Vec<_> = fs::read_dir(&out_dir)
        .expect("read output dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "wav"))
        .collect();
    assert_eq!(written.len(), 1);
    let _ = fs::remove_dir_all(dir);
}
