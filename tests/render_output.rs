//! End-to-end WAV rendering through the public API

use std::sync::Arc;

use famisound::document::{Document, MemoryDocument};
use famisound::engine::{render_document, render_document_with_registers};
use famisound::{PlayerCursor, RenderLength, RenderSpec, Settings, SoundGenError};

/// Two frames of four rows; pulse, triangle and noise all busy
const SONG: &str = r#"{
    "tracks": [{
        "speed": 6,
        "tempo": 150,
        "rows": 4,
        "frames": [[0, 0, 0, 0, 0], [1, 1, 0, 0, 0]],
        "patterns": [
            [["C-4 .. F 047", "...", "E-4 .. A 452", "..."], ["G-4 .. F", "...", "===", "..."]],
            [["C-3 .. 8", "...", "G-2 .. 8", "..."], ["F-2 .. 8 302", "...", "---", "..."]],
            [["C-3", "...", "G-2", "..."]],
            [["1-# .. 6", "5-# .. 3", "1-# .. 6", "5-# .. 3"]]
        ]
    }]
}"#;

fn song() -> Arc<dyn Document> {
    Arc::new(MemoryDocument::from_json(SONG).expect("test song parses"))
}

#[test]
fn test_identical_renders_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let spec = RenderSpec::new(RenderLength::Loops(2)).with_trailing_silence(250);
    let first = dir.path().join("first.wav");
    let second = dir.path().join("second.wav");

    render_document(song(), &Settings::default(), PlayerCursor::start_of(0), spec, &first).unwrap();
    render_document(song(), &Settings::default(), PlayerCursor::start_of(0), spec, &second).unwrap();

    let a = std::fs::read(&first).unwrap();
    let b = std::fs::read(&second).unwrap();
    assert!(a.len() > 44, "file holds more than a header");
    assert!(a == b, "renders of the same input must match byte for byte");
}

#[test]
fn test_loop_render_length_follows_tempo() {
    let dir = tempfile::tempdir().unwrap();
    let report = render_document(
        song(),
        &Settings::default(),
        PlayerCursor::start_of(0),
        RenderSpec::new(RenderLength::Loops(1)),
        dir.path().join("loop.wav"),
    )
    .unwrap();
    // 2 frames * 4 rows * 6 ticks at 150 BPM, 735 samples per NTSC tick
    assert_eq!(report.samples_written, 48 * 735);
    approx::assert_relative_eq!(report.duration_secs(), 0.8, epsilon = 1e-9);
}

#[test]
fn test_seconds_render_with_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tail.wav");
    let settings = Settings::default().sample_rate(48_000);
    let report = render_document(
        song(),
        &settings,
        PlayerCursor::start_of(0),
        RenderSpec::new(RenderLength::Seconds(2)).with_trailing_silence(500),
        &path,
    )
    .unwrap();
    assert_eq!(report.samples_written, 2 * 48_000 + 24_000);

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 48_000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len() as u64, report.samples_written);
}

#[test]
fn test_eight_bit_render() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("8bit.wav");
    let settings = Settings {
        bit_depth: 8,
        ..Settings::default()
    };
    render_document(
        song(),
        &settings,
        PlayerCursor::start_of(0),
        RenderSpec::new(RenderLength::Seconds(1)),
        &path,
    )
    .unwrap();
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 8);
    assert_eq!(reader.len(), 44_100);
}

#[test]
fn test_pal_render_uses_fifty_hertz_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default().machine(famisound::Machine::Pal);
    let report = render_document(
        song(),
        &settings,
        PlayerCursor::start_of(0),
        RenderSpec::new(RenderLength::Loops(1)),
        dir.path().join("pal.wav"),
    )
    .unwrap();
    // Tempo accounting keeps 150 BPM: rows of 5 ticks at 882 samples
    assert_eq!(report.samples_written, 8 * 5 * 882);
}

#[test]
fn test_invalid_render_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.wav");
    let result = render_document(
        song(),
        &Settings::default(),
        PlayerCursor::at(0, 7, 0),
        RenderSpec::new(RenderLength::Loops(1)),
        &path,
    );
    assert!(matches!(result, Err(SoundGenError::InvalidPlayback(_))));
    assert!(!path.exists());

    let missing = dir.path().join("no/such/dir/out.wav");
    let result = render_document(
        song(),
        &Settings::default(),
        PlayerCursor::start_of(0),
        RenderSpec::new(RenderLength::Loops(1)),
        &missing,
    );
    assert!(matches!(result, Err(SoundGenError::Render(_))));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0, "no staging files left");
}

#[test]
fn test_register_capture_alongside_render() {
    let dir = tempfile::tempdir().unwrap();
    let spec = RenderSpec::new(RenderLength::Loops(1));
    let plain = dir.path().join("plain.wav");
    let captured = dir.path().join("captured.wav");
    render_document(song(), &Settings::default(), PlayerCursor::start_of(0), spec, &plain).unwrap();
    let (report, stream) =
        render_document_with_registers(song(), &Settings::default(), PlayerCursor::start_of(0), spec, &captured)
            .unwrap();

    assert_eq!(report.samples_written, 48 * 735);
    assert!(
        std::fs::read(&plain).unwrap() == std::fs::read(&captured).unwrap(),
        "capturing must not change the audio"
    );
    let writes = stream.writes();
    assert!(writes.windows(2).all(|w| w[0].frame <= w[1].frame), "writes in frame order");
    assert!(writes.iter().any(|w| w.address == 0x4002), "pulse 1 period written");

    let mut csv = Vec::new();
    stream.write_csv(&mut csv).unwrap();
    let text = String::from_utf8(csv).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("frame,address,value"));
    assert_eq!(lines.count(), writes.len());
    assert!(text.contains(",$4002,"), "addresses are written as $hex");
}
