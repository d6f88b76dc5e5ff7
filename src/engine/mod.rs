//! Sound engine thread and its public handle
//!
//! [`SoundGen`] spawns a worker that owns the emulator, the channel handlers
//! and the sequencer. Every mutating call becomes a command in the worker's
//! inbox; queries read a status snapshot the worker publishes once per output
//! buffer, or briefly lock the shared APU for register reads.
//!
//! Requests that can be checked without the worker (missing document, cursor
//! out of range, unwritable render target, empty sample) fail synchronously
//! and leave the engine untouched.

mod command;
mod driver;
mod session;
mod status;
mod worker;

pub use status::{ChannelStatus, EngineEvent, EngineStatus};

use self::command::Command;
use self::driver::EngineCore;
use self::session::RenderSession;
use self::worker::{Worker, WorkerLinks};
use crate::apu::{Apu, DpcmState, RegisterState, RegisterStream};
use crate::channels::KeyState;
use crate::chip::{Chip, ChipMask};
use crate::config::{Settings, SettingsStore};
use crate::document::{Document, Note};
use crate::instrument::{DpcmSample, Instrument, SequenceKind};
use crate::player::{NotePriority, Player, PlayerCursor, PlayerState};
use crate::preview::validate_preview;
use crate::recorder::{InstrumentRecorder, RecordSetting};
use crate::render::{RenderProgress, RenderReport, RenderSpec, WavRenderer};
use crate::streaming::OutputSink;
use crate::visualizer::{MeterDecay, VisualizerFeed};
use crate::{Result, SoundGenError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Capacity of the event channel; older events are kept, newer ones dropped
const EVENT_QUEUE: usize = 256;

/// Handle to a running sound engine
///
/// Dropping the handle shuts the worker down and waits for it.
pub struct SoundGen {
    commands: Sender<Command>,
    interrupt: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    apu: Arc<Mutex<Apu>>,
    recorder: Arc<Mutex<InstrumentRecorder>>,
    events: Mutex<Option<Receiver<EngineEvent>>>,
    visualizer: VisualizerFeed,
    store: SettingsStore,
    document: Mutex<Option<Arc<dyn Document>>>,
    thread: Option<JoinHandle<()>>,
}

impl SoundGen {
    /// Start the engine with fixed settings
    pub fn spawn(settings: Settings, sink: Box<dyn OutputSink>) -> Result<Self> {
        Self::spawn_with_store(SettingsStore::new(settings), sink)
    }

    /// Start the engine with a reloadable settings source
    ///
    /// [`SoundGen::load_settings`] re-reads `store`.
    pub fn spawn_with_store(store: SettingsStore, sink: Box<dyn OutputSink>) -> Result<Self> {
        let settings = store.get();
        settings.validate()?;

        let core = EngineCore::new(settings);
        let apu = core.apu();
        let recorder = core.recorder();
        let (commands, inbox) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::sync_channel(EVENT_QUEUE);
        let interrupt = Arc::new(AtomicBool::new(false));
        let status = Arc::new(Mutex::new(core.status(None)));
        let visualizer = VisualizerFeed::default();

        let links = WorkerLinks {
            inbox,
            events: events_tx,
            status: Arc::clone(&status),
            interrupt: Arc::clone(&interrupt),
            visualizer: visualizer.clone(),
            store: store.clone(),
        };
        let worker = Worker::new(core, links, sink);
        let thread = std::thread::Builder::new()
            .name("famisound-engine".into())
            .spawn(move || worker.run())?;

        Ok(SoundGen {
            commands,
            interrupt,
            status,
            apu,
            recorder,
            events: Mutex::new(Some(events_rx)),
            visualizer,
            store,
            document: Mutex::new(None),
            thread: Some(thread),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SoundGenError::EngineClosed)?;
        self.interrupt.store(true, Ordering::Release);
        Ok(())
    }

    fn current_document(&self) -> Result<Arc<dyn Document>> {
        self.document
            .lock()
            .clone()
            .ok_or_else(|| SoundGenError::InvalidPlayback("no document loaded".into()))
    }

    // Commands

    /// Hand a document to the engine; playback stops
    pub fn assign_document(&self, document: Arc<dyn Document>) -> Result<()> {
        *self.document.lock() = Some(Arc::clone(&document));
        self.send(Command::AssignDocument(document))
    }

    /// Drop the document; playback stops and the chips go quiet
    pub fn remove_document(&self) -> Result<()> {
        *self.document.lock() = None;
        self.send(Command::RemoveDocument)
    }

    /// Start playback at `cursor`, replacing any running session
    ///
    /// # Errors
    ///
    /// [`SoundGenError::InvalidPlayback`] when no document is loaded or the
    /// cursor lies outside it.
    pub fn play(&self, cursor: PlayerCursor) -> Result<()> {
        let doc = self.current_document()?;
        Player::validate(doc.as_ref(), cursor)?;
        self.send(Command::Play(cursor))
    }

    /// Stop after the current tick and silence every channel
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Stop and return the chips to power-on state
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Render the loaded document to a WAV file
    ///
    /// The target is opened here, so an unwritable location fails before the
    /// engine is touched. Completion is reported by
    /// [`EngineEvent::RenderFinished`].
    pub fn start_render(&self, path: impl AsRef<Path>, spec: RenderSpec, cursor: PlayerCursor) -> Result<()> {
        let doc = self.current_document()?;
        Player::validate(doc.as_ref(), cursor)?;
        let settings = self.store.get();
        let renderer = WavRenderer::create(path, settings.sample_rate, settings.bit_depth)?;
        self.send(Command::StartRender { renderer, spec, cursor })
    }

    /// Cancel the running render; its file is discarded
    pub fn stop_render(&self) -> Result<()> {
        self.send(Command::StopRender)
    }

    /// Play a DPCM sample from `offset` (64-byte units) at rate `pitch`
    pub fn preview_sample(&self, sample: Arc<DpcmSample>, offset: u8, pitch: u8) -> Result<()> {
        validate_preview(&sample, offset)?;
        self.send(Command::PreviewSample { sample, offset, pitch })
    }

    /// Stop a sample preview
    pub fn cancel_preview(&self) -> Result<()> {
        self.send(Command::CancelPreview)
    }

    /// Write a chip register directly
    pub fn write_apu(&self, addr: u16, value: u8) -> Result<()> {
        self.send(Command::WriteApu(addr, value))
    }

    /// Switch the active expansion chips
    pub fn set_chip(&self, chips: ChipMask) -> Result<()> {
        self.send(Command::SetChip(chips))
    }

    /// Re-read settings from the store
    pub fn load_settings(&self) -> Result<()> {
        self.send(Command::LoadSettings)
    }

    /// Cut every channel immediately
    pub fn silent_all(&self) -> Result<()> {
        self.send(Command::SilentAll)
    }

    /// Trigger a note on a tracker channel at the next tick
    pub fn queue_note(&self, channel: usize, note: Note, priority: NotePriority) -> Result<()> {
        self.send(Command::QueueNote { channel, note, priority })
    }

    /// Continue at the start of `frame` now
    pub fn move_to_frame(&self, frame: usize) -> Result<()> {
        self.send(Command::MoveToFrame(frame))
    }

    /// Continue at `frame` once the current frame ends
    pub fn set_queue_frame(&self, frame: Option<usize>) -> Result<()> {
        self.send(Command::SetQueueFrame(frame))
    }

    /// Move the cursor to a frame and row; effect state is cleared
    pub fn jump_to(&self, frame: usize, row: usize) -> Result<()> {
        self.send(Command::JumpTo { frame, row })
    }

    /// Continue at `row` of the next frame
    pub fn skip_to(&self, row: usize) -> Result<()> {
        self.send(Command::SkipTo(row))
    }

    /// Beat and measure highlight used for the BPM readout
    pub fn set_highlight_rows(&self, highlight: (u32, u32)) -> Result<()> {
        self.send(Command::SetHighlight(highlight))
    }

    /// Re-read instrument data on every channel
    pub fn force_reload_instrument(&self) -> Result<()> {
        self.send(Command::ForceReloadInstruments)
    }

    /// Re-upload N163/FDS waves
    pub fn wave_changed(&self) -> Result<()> {
        self.send(Command::WaveChanged)
    }

    // Instrument recorder

    /// Channel to record, or `None` to stop recording
    pub fn set_record_channel(&self, channel: Option<usize>) {
        self.recorder.lock().set_record_channel(channel);
    }

    /// Recording interval and instrument count
    pub fn set_record_setting(&self, setting: RecordSetting) -> Result<()> {
        self.recorder.lock().set_record_setting(setting)
    }

    /// Next finished recording, if any
    pub fn get_record_instrument(&self) -> Option<Instrument> {
        self.recorder.lock().get_record_instrument()
    }

    // Queries

    /// Latest status snapshot
    pub fn status(&self) -> EngineStatus {
        self.status.lock().clone()
    }

    /// Current (frame, row)
    pub fn get_player_pos(&self) -> (usize, usize) {
        let cursor = self.status.lock().cursor;
        (cursor.frame, cursor.row)
    }

    /// Current track
    pub fn get_player_track(&self) -> usize {
        self.status.lock().cursor.track
    }

    /// Ticks since playback started
    pub fn get_player_ticks(&self) -> u64 {
        self.status.lock().ticks
    }

    /// Engine tick rate in Hz
    pub fn get_frame_rate(&self) -> u32 {
        self.status.lock().frame_rate
    }

    /// Frame queued for the end of the current one
    pub fn get_queue_frame(&self) -> Option<usize> {
        self.status.lock().queue_frame
    }

    /// Tempo in rows per minute / 4
    pub fn get_tempo(&self) -> f64 {
        self.status.lock().tempo
    }

    /// Tempo smoothed over recent rows
    pub fn get_average_bpm(&self) -> f64 {
        self.status.lock().average_bpm
    }

    /// Tempo in beats of the first highlight
    pub fn get_current_bpm(&self) -> f64 {
        self.status.lock().current_bpm
    }

    /// Whether the sequencer is playing live
    pub fn is_playing(&self) -> bool {
        self.status.lock().state == PlayerState::Playing
    }

    /// Whether a render is running
    pub fn is_rendering(&self) -> bool {
        self.status.lock().render_progress.is_some()
    }

    /// Progress of the running render
    pub fn get_render_progress(&self) -> Option<RenderProgress> {
        self.status.lock().render_progress
    }

    /// Output volume of a tracker channel (0..15)
    pub fn get_channel_volume(&self, channel: usize) -> i32 {
        self.status
            .lock()
            .channels
            .get(channel)
            .map_or(0, |c| c.volume)
    }

    /// Position being played in one of an instrument's sequences
    ///
    /// Looks at every channel playing `instrument`; the lowest channel with a
    /// running `kind` sequence wins. None when no channel is playing it.
    pub fn get_sequence_play_pos(&self, instrument: u8, kind: SequenceKind) -> Option<usize> {
        let slot = SequenceKind::ALL.iter().position(|&k| k == kind)?;
        self.status
            .lock()
            .channels
            .iter()
            .filter(|c| c.instrument == Some(instrument))
            .find_map(|c| c.sequence_pos[slot])
    }

    /// Readable effect state of a tracker channel
    pub fn recall_channel_state(&self, channel: usize) -> String {
        self.status
            .lock()
            .channels
            .get(channel)
            .map(|c| c.state.clone())
            .unwrap_or_default()
    }

    /// Last note triggered on a tracker channel
    pub fn register_key_state(&self, channel: usize) -> Option<KeyState> {
        self.status
            .lock()
            .channels
            .get(channel)
            .and_then(|c| c.key_state)
    }

    /// DPCM sample position and delta counter
    pub fn get_dpcm_state(&self) -> DpcmState {
        self.apu.lock().dpcm_state()
    }

    /// Last value written to a chip register
    pub fn get_reg(&self, chip: Chip, reg: usize) -> u8 {
        self.apu.lock().get_reg(chip, reg)
    }

    /// Value and write history of a chip register
    pub fn get_reg_state(&self, chip: Chip, reg: usize) -> RegisterState {
        self.apu.lock().get_reg_state(chip, reg)
    }

    /// Frequency in Hz of a tracker channel, from its last written period
    pub fn get_channel_frequency(&self, channel: usize) -> f64 {
        let Some(channel) = self.status.lock().channels.get(channel).map(|c| c.channel) else {
            return 0.0;
        };
        self.apu.lock().channel_frequency(channel)
    }

    /// Begin capturing register writes
    pub fn start_capture(&self) {
        self.apu.lock().start_capture();
    }

    /// Stop capturing and return the writes
    pub fn take_capture(&self) -> Option<RegisterStream> {
        self.apu.lock().take_capture()
    }

    /// Oscilloscope feed of the live output
    pub fn visualizer(&self) -> VisualizerFeed {
        self.visualizer.clone()
    }

    /// Fall-off speed of the channel meters in the visualizer feed
    pub fn set_meter_decay_rate(&self, decay: MeterDecay) {
        self.visualizer.set_meter_decay(decay);
    }

    /// Current meter fall-off speed
    pub fn get_meter_decay_rate(&self) -> MeterDecay {
        self.visualizer.meter_decay()
    }

    /// Event receiver; available once
    pub fn take_events(&self) -> Option<Receiver<EngineEvent>> {
        self.events.lock().take()
    }

    /// Settings source the engine reloads from
    pub fn settings_store(&self) -> &SettingsStore {
        &self.store
    }

    /// Current settings
    pub fn settings(&self) -> Settings {
        self.store.get()
    }
}

impl Drop for SoundGen {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        self.interrupt.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("sound engine thread panicked");
            }
        }
    }
}

/// Render a document to a WAV file on the calling thread
///
/// Produces the same samples the engine thread would for the same document,
/// settings and cursor. The file only appears once the render succeeded.
pub fn render_document(
    document: Arc<dyn Document>,
    settings: &Settings,
    cursor: PlayerCursor,
    spec: RenderSpec,
    path: impl AsRef<Path>,
) -> Result<RenderReport> {
    render_offline(document, settings, cursor, spec, path.as_ref(), false).map(|(report, _)| report)
}

/// Like [`render_document`], also returning every register write of the render
pub fn render_document_with_registers(
    document: Arc<dyn Document>,
    settings: &Settings,
    cursor: PlayerCursor,
    spec: RenderSpec,
    path: impl AsRef<Path>,
) -> Result<(RenderReport, RegisterStream)> {
    let (report, capture) = render_offline(document, settings, cursor, spec, path.as_ref(), true)?;
    Ok((report, capture.unwrap_or_default()))
}

fn render_offline(
    document: Arc<dyn Document>,
    settings: &Settings,
    cursor: PlayerCursor,
    spec: RenderSpec,
    path: &Path,
    capture: bool,
) -> Result<(RenderReport, Option<RegisterStream>)> {
    settings.validate()?;
    Player::validate(document.as_ref(), cursor)?;
    let mut core = EngineCore::new(settings.clone());
    core.assign_document(Some(document));
    if capture {
        core.apu().lock().start_capture();
    }

    let renderer = WavRenderer::create(path, settings.sample_rate, settings.bit_depth)?;
    let mut session = RenderSession::begin(&mut core, renderer, spec, cursor)?;
    let mut block = Vec::new();
    while !session.is_done() {
        if let Err(e) = session.step(&mut core, &mut block) {
            session.cancel();
            return Err(e);
        }
    }
    let report = session.finish()?;
    let registers = core.apu().lock().take_capture();
    Ok((report, registers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{EffectKind, MemoryDocument};
    use crate::render::RenderLength;
    use crate::streaming::{CaptureSink, NullSink};
    use std::time::{Duration, Instant};

    fn song() -> Arc<dyn Document> {
        let mut doc = MemoryDocument::default();
        if let Some(track) = doc.track_mut(0) {
            track.pattern_length = 16;
        }
        doc.set_note(0, 0, 0, 0, Note::note(45).with_volume(15));
        doc.set_note(0, 0, 1, 0, Note::note(52).with_volume(12));
        Arc::new(doc)
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_invalid_playback_rejected() {
        let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
        assert!(matches!(
            engine.play(PlayerCursor::start_of(0)),
            Err(SoundGenError::InvalidPlayback(_))
        ));
        engine.assign_document(song()).unwrap();
        assert!(engine.play(PlayerCursor::start_of(3)).is_err(), "no track 3");
        assert!(engine.play(PlayerCursor::at(0, 0, 16)).is_err(), "row past the pattern");
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = Settings {
            bit_depth: 24,
            ..Settings::default()
        };
        assert!(matches!(
            SoundGen::spawn(settings, Box::new(NullSink::unpaced())),
            Err(SoundGenError::Config(_))
        ));
    }

    #[test]
    fn test_stop_mutes_every_channel() {
        let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
        let events = engine.take_events().unwrap();
        engine.assign_document(song()).unwrap();
        engine.play(PlayerCursor::start_of(0)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || engine.get_player_ticks() > 10));
        assert!(engine.get_reg(Chip::Apu2A03, 0) & 0x0F > 0, "pulse 1 sounding");

        engine.stop().unwrap();
        assert!(wait_until(Duration::from_secs(5), || engine.status().state == PlayerState::Stopped));
        assert_eq!(engine.get_reg(Chip::Apu2A03, 0) & 0x0F, 0, "pulse 1 muted");
        assert_eq!(engine.get_reg(Chip::Apu2A03, 4) & 0x0F, 0, "pulse 2 muted");
        assert!(events.try_iter().any(|e| matches!(e, EngineEvent::Halted)));
    }

    #[test]
    fn test_live_output_reaches_sink() {
        let sink = CaptureSink::new();
        let engine = SoundGen::spawn(Settings::default(), Box::new(sink.clone())).unwrap();
        engine.assign_document(song()).unwrap();
        engine.play(PlayerCursor::start_of(0)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || sink.len() >= 44_100));
        engine.stop().unwrap();
        assert_eq!(sink.opened().len(), 1, "sink opened once");
        assert!(sink.samples().iter().any(|&s| s != 0));
    }

    #[test]
    fn test_visualizer_meters_follow_playback() {
        let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
        let feed = engine.visualizer();
        engine.set_meter_decay_rate(MeterDecay::Slow);
        assert_eq!(engine.get_meter_decay_rate(), MeterDecay::Slow);

        engine.assign_document(song()).unwrap();
        engine.play(PlayerCursor::start_of(0)).unwrap();
        let mut levels = Vec::new();
        assert!(
            wait_until(Duration::from_secs(5), || {
                feed.channel_levels(&mut levels);
                levels.len() == 5 && levels[0] > 0.0 && levels[1] > 0.0
            }),
            "both pulse meters move while their notes play"
        );
    }

    #[test]
    fn test_position_events_follow_rows() {
        let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::unpaced())).unwrap();
        let events = engine.take_events().unwrap();
        assert!(engine.take_events().is_none(), "receiver is handed out once");
        engine.assign_document(song()).unwrap();
        engine.play(PlayerCursor::start_of(0)).unwrap();

        let rows: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::PositionChanged(cursor) => Some(cursor.row),
                _ => None,
            })
            .take(3)
            .collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[test]
    fn test_render_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::unpaced())).unwrap();
        let events = engine.take_events().unwrap();
        assert!(
            engine
                .start_render(&path, RenderSpec::new(RenderLength::Seconds(1)), PlayerCursor::start_of(0))
                .is_err(),
            "render needs a document"
        );

        engine.assign_document(song()).unwrap();
        engine
            .start_render(&path, RenderSpec::new(RenderLength::Seconds(1)), PlayerCursor::start_of(0))
            .unwrap();
        let report = loop {
            match events.recv_timeout(Duration::from_secs(10)).unwrap() {
                EngineEvent::RenderFinished(result) => break result.unwrap(),
                _ => continue,
            }
        };
        assert_eq!(report.samples_written, 44_100);
        assert!(path.exists());
    }

    #[test]
    fn test_render_document_halts_on_cxx() {
        let mut doc = MemoryDocument::default();
        if let Some(track) = doc.track_mut(0) {
            track.pattern_length = 4;
        }
        doc.set_note(0, 0, 0, 0, Note::note(40).with_volume(15));
        doc.set_note(0, 0, 0, 3, Note::empty().with_effect(EffectKind::Halt, 0));
        let dir = tempfile::tempdir().unwrap();
        let report = render_document(
            Arc::new(doc),
            &Settings::default(),
            PlayerCursor::start_of(0),
            RenderSpec::new(RenderLength::Loops(10)),
            dir.path().join("short.wav"),
        )
        .unwrap();
        // 4 rows of 6 ticks at 735 samples per tick
        assert_eq!(report.samples_written, 24 * 735);
    }

    #[test]
    fn test_preview_validated_synchronously() {
        let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
        let empty = Arc::new(DpcmSample::default());
        assert!(matches!(
            engine.preview_sample(empty, 0, 15),
            Err(SoundGenError::InvalidPlayback(_))
        ));
    }
}
