#![cfg(feature = "cli")]

use assert_cmd::Command;
use board_tracker::aruco::DictionaryId;
use board_tracker::TrackerConfig;
use predicates::prelude::*;
use tempfile::tempdir;

fn bin() -> Command {
    Command::cargo_bin("board-tracker").expect("binary")
}

const CAMERA: [&str; 6] = ["--width", "640", "--height", "480", "--fx", "600"];

#[test]
fn render_writes_a_board_image() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("board.png");
    bin()
        .args(["render", "--px-per-square", "40", "--out"])
        .arg(&out)
        .assert()
        .success();
    // Default board is 5x7 squares plus a one-square quiet zone on each side.
    let img = image::open(&out).expect("png").to_luma8();
    assert_eq!(img.dimensions(), (7 * 40, 9 * 40));
}

#[test]
fn verbose_flag_installs_the_logger() {
    let dir = tempdir().expect("tempdir");
    bin()
        .args(["-v", "render", "--px-per-square", "20", "--out"])
        .arg(dir.path().join("board.png"))
        .assert()
        .success();
}

#[cfg(not(feature = "tracing"))]
#[test]
fn rendering_a_generated_dictionary_warns_about_opencv() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("config.json");
    TrackerConfig {
        dictionary: DictionaryId::Generated4x4_50,
        squares_x: 5,
        squares_y: 4,
        ..TrackerConfig::default()
    }
    .write_json(&config)
    .expect("config");

    bin()
        .arg("render")
        .arg("--config")
        .arg(&config)
        .arg("--out")
        .arg(dir.path().join("board.png"))
        .assert()
        .success()
        .stderr(predicate::str::contains("not an OpenCV dictionary"));
}

#[test]
fn synthesized_view_is_tracked() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("config.json");
    TrackerConfig {
        dictionary: DictionaryId::Generated4x4_50,
        squares_x: 5,
        squares_y: 4,
        ..TrackerConfig::default()
    }
    .write_json(&config)
    .expect("config");

    let frame = dir.path().join("frame.png");
    bin()
        .arg("synth")
        .arg("--config")
        .arg(&config)
        .args(CAMERA)
        .args(["--rvec", "0.2,0,0", "--tvec", "-0.1,-0.08,0.45", "--out"])
        .arg(&frame)
        .assert()
        .success();

    let overlays = dir.path().join("overlays");
    bin()
        .arg("track")
        .arg("--config")
        .arg(&config)
        .args(CAMERA)
        .arg("--overlay-dir")
        .arg(&overlays)
        .arg(&frame)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\":\"estimated\""));
    assert!(overlays.join("overlay_0000.png").exists());
}

#[test]
fn unreadable_frames_are_reported_not_fatal() {
    let dir = tempdir().expect("tempdir");
    bin()
        .arg("track")
        .args(CAMERA)
        .arg(dir.path().join("missing.png"))
        .assert()
        .success()
        .stdout(predicate::str::contains("no frame"));
}

#[test]
fn bad_vectors_fail_cleanly() {
    let dir = tempdir().expect("tempdir");
    bin()
        .arg("synth")
        .args(CAMERA)
        .args(["--tvec", "0,0", "--out"])
        .arg(dir.path().join("x.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tvec expects three"));
}
