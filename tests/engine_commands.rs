//! Engine thread behaviour observed through `SoundGen`

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use famisound::config::SettingsStore;
use famisound::document::{MemoryDocument, Note};
use famisound::instrument::{Instrument, Sequence, SequenceKind};
use famisound::player::NotePriority;
use famisound::streaming::{CaptureSink, NullSink};
use famisound::{Chip, ChipMask, EngineEvent, PlayerCursor, RenderLength, RenderSpec, Settings, SoundGen};

const TIMEOUT: Duration = Duration::from_secs(10);

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn wait_for<T>(events: &Receiver<EngineEvent>, mut pick: impl FnMut(EngineEvent) -> Option<T>) -> T {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = events.recv_timeout(left).expect("engine event before timeout");
        if let Some(value) = pick(event) {
            return value;
        }
    }
}

fn long_song() -> Arc<MemoryDocument> {
    let mut doc = MemoryDocument::default();
    doc.set_frame_count(0, 4);
    doc.set_note(0, 0, 0, 0, Note::note(48).with_volume(15));
    doc.set_note(0, 0, 2, 0, Note::note(36));
    Arc::new(doc)
}

#[test]
fn test_queued_note_plays_while_stopped() {
    let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
    engine.assign_document(long_song()).unwrap();
    assert_eq!(engine.get_reg(Chip::Apu2A03, 0) & 0x0F, 0);

    engine
        .queue_note(0, Note::note(57).with_volume(12), NotePriority::Live)
        .unwrap();
    assert!(
        wait_until(|| engine.get_reg(Chip::Apu2A03, 0) & 0x0F == 12),
        "live note reaches pulse 1 without starting playback"
    );
    assert!(!engine.is_playing());
    assert!(engine.get_channel_frequency(0) > 400.0, "A-4 is 440 Hz");
}

#[test]
fn test_set_chip_rebuilds_channels() {
    let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
    engine.assign_document(long_song()).unwrap();
    assert!(wait_until(|| engine.status().channels.len() == 5));

    engine.set_chip(ChipMask::VRC6).unwrap();
    assert!(wait_until(|| engine.status().channels.len() == 8));
    engine.remove_document().unwrap();
    assert!(engine.play(PlayerCursor::start_of(0)).is_err(), "no document after removal");
}

#[test]
fn test_load_settings_reopens_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    Settings::default().save(&path).unwrap();
    let store = SettingsStore::with_file(&path).unwrap();

    let sink = CaptureSink::new();
    let engine = SoundGen::spawn_with_store(store, Box::new(sink.clone())).unwrap();
    let events = engine.take_events().unwrap();
    assert!(wait_until(|| sink.opened().len() == 1));

    Settings::default().sample_rate(22_050).save(&path).unwrap();
    engine.load_settings().unwrap();
    let loaded = wait_for(&events, |e| match e {
        EngineEvent::SettingsLoaded(result) => Some(result),
        _ => None,
    })
    .unwrap();
    assert_eq!(loaded.sample_rate, 22_050);
    assert!(wait_until(|| sink.opened().len() == 2), "format change reopens the sink");
    assert_eq!(sink.opened()[1].sample_rate, 22_050);
}

#[test]
fn test_stop_render_discards_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.wav");
    let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
    let events = engine.take_events().unwrap();
    engine.assign_document(long_song()).unwrap();

    engine
        .start_render(&path, RenderSpec::new(RenderLength::Seconds(3600)), PlayerCursor::start_of(0))
        .unwrap();
    engine.stop_render().unwrap();
    let result = wait_for(&events, |e| match e {
        EngineEvent::RenderFinished(result) => Some(result),
        _ => None,
    });
    assert!(result.is_err(), "cancelled render reports failure");
    assert!(!path.exists());
    assert!(wait_until(|| !engine.is_rendering()));
}

#[test]
fn test_preview_reports_completion() {
    let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
    let events = engine.take_events().unwrap();
    let sample = famisound::instrument::DpcmSample {
        name: "hat".into(),
        data: vec![0x55; 65],
    };
    engine.preview_sample(Arc::new(sample), 0, 15).unwrap();
    wait_for(&events, |e| matches!(e, EngineEvent::PreviewDone).then_some(()));
    assert!(wait_until(|| !engine.status().previewing));
}

#[test]
fn test_sequence_play_position_reported() {
    let mut doc = MemoryDocument::default();
    let mut inst = Instrument::new("pad", Chip::Apu2A03);
    inst.sequences.volume = Some(Sequence::new(vec![15, 12, 9, 6]).looping(2));
    doc.set_instrument(0, inst);
    doc.set_frame_count(0, 4);
    doc.set_note(0, 0, 0, 0, Note::note(48).with_instrument(0));
    let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
    engine.assign_document(Arc::new(doc)).unwrap();
    assert_eq!(engine.get_sequence_play_pos(0, SequenceKind::Volume), None);

    engine.play(PlayerCursor::start_of(0)).unwrap();
    assert!(
        wait_until(|| matches!(engine.get_sequence_play_pos(0, SequenceKind::Volume), Some(2 | 3))),
        "looping volume sequence settles between its loop point and end"
    );
    assert_eq!(engine.get_sequence_play_pos(0, SequenceKind::Duty), None, "no duty sequence");
    assert_eq!(engine.get_sequence_play_pos(1, SequenceKind::Volume), None, "instrument not playing");
}
