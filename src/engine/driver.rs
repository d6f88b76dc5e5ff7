//! Engine state owned by the worker thread
//!
//! [`EngineCore`] ties the emulator, the handlers and the sequencer together
//! and knows how to run one tick. The live worker and the offline renderer
//! both drive it, which is what keeps a render identical to what was heard.

use super::status::{ChannelStatus, EngineStatus};
use crate::apu::Apu;
use crate::channels::{ChannelSet, TickContext};
use crate::chip::{channel_layout, ChannelType, ChipMask, Machine, TrackerChannel, MAX_N163_CHANNELS};
use crate::config::Settings;
use crate::document::{Document, MemoryDocument, Note};
use crate::instrument::DpcmSample;
use crate::player::{NotePriority, Player, PlayerCursor, PlayerState, TickOutcome};
use crate::preview::SamplePreview;
use crate::recorder::InstrumentRecorder;
use crate::render::RenderProgress;
use crate::tables::{PeriodTables, VibratoTable};
use crate::{Result, SoundGenError};
use parking_lot::Mutex;
use std::sync::Arc;

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TickReport {
    pub outcome: TickOutcome,
    /// The player went silent at the end of this tick
    pub stopped: bool,
    /// A sample preview played out during this tick
    pub preview_done: bool,
}

pub(crate) struct EngineCore {
    settings: Settings,
    document: Option<Arc<dyn Document>>,
    fallback: Arc<dyn Document>,
    chip_override: Option<ChipMask>,
    apu: Arc<Mutex<Apu>>,
    recorder: Arc<Mutex<InstrumentRecorder>>,
    layout: Vec<TrackerChannel>,
    channels: ChannelSet,
    player: Player,
    preview: SamplePreview,
    tables: PeriodTables,
    vibrato: VibratoTable,
    linear_pitch: bool,
    machine: Machine,
    chips: ChipMask,
    n163_channels: usize,
    tick_rate: u32,
    sample_frac: u64,
}

impl EngineCore {
    pub fn new(settings: Settings) -> Self {
        let machine = settings.machine.unwrap_or_default();
        let mut core = EngineCore {
            apu: Arc::new(Mutex::new(Apu::new(machine, settings.sample_rate))),
            recorder: Arc::new(Mutex::new(InstrumentRecorder::new())),
            document: None,
            fallback: Arc::new(MemoryDocument::default()),
            chip_override: None,
            layout: Vec::new(),
            channels: ChannelSet::default(),
            player: Player::default(),
            preview: SamplePreview::new(),
            tables: PeriodTables::generate(machine, settings.base_frequency, 1),
            vibrato: VibratoTable::generate(settings.vibrato_style.unwrap_or_default()),
            linear_pitch: false,
            machine,
            chips: ChipMask::empty(),
            n163_channels: 1,
            tick_rate: machine.frame_rate(),
            sample_frac: 0,
            settings,
        };
        core.reconfigure();
        core
    }

    pub fn apu(&self) -> Arc<Mutex<Apu>> {
        Arc::clone(&self.apu)
    }

    pub fn recorder(&self) -> Arc<Mutex<InstrumentRecorder>> {
        Arc::clone(&self.recorder)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.player.state() != PlayerState::Stopped || self.preview.is_active()
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Frames in a track of the loaded document
    pub fn frame_count(&self, track: usize) -> usize {
        self.document.as_ref().map_or(0, |doc| doc.frame_count(track))
    }

    fn document(&self) -> Arc<dyn Document> {
        self.document.clone().unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Replace the document; playback stops and handlers are rebuilt
    pub fn assign_document(&mut self, document: Option<Arc<dyn Document>>) {
        self.player.halted();
        self.document = document;
        self.chip_override = None;
        self.reconfigure();
    }

    /// Apply new settings; returns true when the output format changed
    pub fn apply_settings(&mut self, settings: Settings) -> bool {
        let format_changed = settings.sample_rate != self.settings.sample_rate
            || settings.bit_depth != self.settings.bit_depth
            || settings.buffer_length_ms != self.settings.buffer_length_ms;
        self.settings = settings;
        if self.player.state().is_sequencing() {
            log::debug!("settings changed during playback; playback stopped");
            self.player.halted();
        }
        self.reconfigure();
        format_changed
    }

    /// Switch the active expansion chips
    pub fn set_chips(&mut self, chips: ChipMask) {
        self.player.halted();
        self.chip_override = Some(chips);
        self.reconfigure();
    }

    /// Regenerate tables and handlers from the settings and document
    fn reconfigure(&mut self) {
        let doc = self.document();
        let settings = &self.settings;
        self.machine = settings.machine.unwrap_or_else(|| doc.machine());
        self.chips = self.chip_override.unwrap_or_else(|| doc.expansion_chips());
        self.n163_channels = doc.n163_channels().clamp(1, MAX_N163_CHANNELS);
        self.tables = PeriodTables::generate(self.machine, settings.base_frequency, self.n163_channels);
        self.vibrato = VibratoTable::generate(settings.vibrato_style.unwrap_or_else(|| doc.vibrato_mode()));
        self.linear_pitch = settings.linear_pitch.unwrap_or_else(|| doc.linear_pitch());
        self.tick_rate = settings
            .frame_rate_override
            .or_else(|| doc.engine_speed())
            .unwrap_or_else(|| self.machine.frame_rate())
            .max(1);

        self.layout = channel_layout(self.chips, self.n163_channels);
        self.channels = ChannelSet::new(&self.layout);
        self.player.set_channel_count(self.layout.len());
        self.player.set_tick_rate(self.tick_rate);
        {
            let mut apu = self.apu.lock();
            apu.set_machine(self.machine);
            apu.configure(&self.settings);
            apu.set_chips(self.chips);
        }
        self.restart_hardware();
        log::debug!(
            "configured {} {:?}: {} channels at {} Hz",
            self.machine,
            self.chips,
            self.layout.len(),
            self.tick_rate
        );
    }

    /// Power-on state for the chips and every handler
    fn restart_hardware(&mut self) {
        let mut apu = self.apu.lock();
        apu.reset();
        self.preview.clear();
        self.channels.reset();
        self.channels.init_chips(self.chips, self.n163_channels, &mut *apu);
        self.sample_frac = 0;
    }

    /// Start sequencing at `cursor`; an active session is replaced
    pub fn play(&mut self, cursor: PlayerCursor, state: PlayerState) -> Result<()> {
        let Some(doc) = self.document.clone() else {
            return Err(SoundGenError::InvalidPlayback("no document loaded".into()));
        };
        Player::validate(doc.as_ref(), cursor)?;
        self.restart_hardware();
        self.player.start(doc.as_ref(), cursor, state)
    }

    /// Request a stop after the current tick
    pub fn stop(&mut self) {
        self.player.stop();
    }

    /// Stop everything and return the chips to power-on state
    pub fn reset(&mut self) {
        self.player.halted();
        self.restart_hardware();
    }

    /// Cut every channel now
    pub fn silent_all(&mut self) {
        let doc = self.document();
        let ctx = TickContext {
            document: doc.as_ref(),
            tables: &self.tables,
            vibrato: &self.vibrato,
            linear_pitch: self.linear_pitch,
            n163_channels: self.n163_channels,
        };
        let mut apu = self.apu.lock();
        self.channels.make_silent(&mut *apu, &ctx);
    }

    pub fn write_apu(&mut self, addr: u16, value: u8) {
        self.apu.lock().write(addr, value);
    }

    pub fn queue_note(&mut self, channel: usize, note: Note, priority: NotePriority) -> bool {
        self.player.queue_note(channel, note, priority)
    }

    pub fn move_to_frame(&mut self, frame: usize) {
        let doc = self.document();
        self.player.move_to_frame(doc.as_ref(), frame, &mut self.channels);
    }

    pub fn set_queue_frame(&mut self, frame: Option<usize>) {
        self.player.set_queue_frame(frame);
    }

    pub fn jump_to(&mut self, frame: usize, row: usize) {
        let doc = self.document();
        let frames = doc.frame_count(self.player.cursor().track).max(1);
        let rows = doc.pattern_length(self.player.cursor().track).max(1);
        self.player
            .player_jump_to(frame % frames, row.min(rows - 1), &mut self.channels);
    }

    pub fn skip_to(&mut self, row: usize) {
        let doc = self.document();
        self.player.player_skip_to(doc.as_ref(), row, &mut self.channels);
    }

    pub fn set_highlight_rows(&mut self, highlight: (u32, u32)) {
        self.player.set_highlight_rows(highlight);
    }

    pub fn force_reload_instruments(&mut self) {
        self.channels.force_reload_instruments();
    }

    pub fn wave_changed(&mut self) {
        self.channels.wave_changed();
    }

    pub fn preview_sample(&mut self, sample: &DpcmSample, offset: u8, pitch: u8) -> Result<()> {
        let mut apu = self.apu.lock();
        self.preview.start(&mut apu, sample, offset, pitch)
    }

    pub fn cancel_preview(&mut self) -> bool {
        let mut apu = self.apu.lock();
        self.preview.cancel(&mut apu)
    }

    fn next_tick_samples(&mut self) -> usize {
        self.sample_frac += self.settings.sample_rate as u64;
        let count = self.sample_frac / self.tick_rate as u64;
        self.sample_frac -= count * self.tick_rate as u64;
        count as usize
    }

    /// Run one engine tick and append its samples to `out`
    pub fn tick(&mut self, out: &mut Vec<i16>) -> TickReport {
        let count = self.next_tick_samples();
        let doc = self.document();
        let ctx = TickContext {
            document: doc.as_ref(),
            tables: &self.tables,
            vibrato: &self.vibrato,
            linear_pitch: self.linear_pitch,
            n163_channels: self.n163_channels,
        };
        let outcome = self.player.tick(doc.as_ref(), &mut self.channels, &ctx);
        let mut report = TickReport {
            outcome,
            ..TickReport::default()
        };

        let mut apu = self.apu.lock();
        self.channels.refresh(&mut *apu, &ctx);
        if self.player.state().is_sequencing() {
            self.recorder.lock().record_tick(&self.channels, &ctx);
        }
        if self.player.state() == PlayerState::Halting {
            self.channels.make_silent(&mut *apu, &ctx);
            self.player.halted();
            self.recorder.lock().flush(&self.channels);
            report.stopped = true;
        }
        apu.advance_samples(count, out);
        apu.next_frame();
        report.preview_done = self.preview.poll(&mut apu);
        report
    }

    /// Level of every tracker channel (0.0..1.0), in tracker order
    pub fn channel_levels(&self, out: &mut Vec<f32>) {
        let apu = self.apu.lock();
        out.clear();
        out.extend(self.layout.iter().map(|c| apu.channel_level(c.channel)));
    }

    /// Physical channel behind a tracker channel index
    pub fn channel_type(&self, index: usize) -> Option<ChannelType> {
        self.layout.get(index).map(|c| c.channel)
    }

    /// Snapshot for the query side
    pub fn status(&self, render_progress: Option<RenderProgress>) -> EngineStatus {
        let tempo = self.player.tempo();
        EngineStatus {
            state: self.player.state(),
            cursor: self.player.cursor(),
            ticks: self.player.ticks_played(),
            loops: self.player.loops(),
            frame_rate: self.tick_rate,
            tempo: tempo.tempo(),
            average_bpm: tempo.average_bpm(),
            current_bpm: tempo.current_bpm(),
            queue_frame: self.player.queue_frame(),
            channels: self
                .channels
                .iter()
                .map(|h| ChannelStatus {
                    channel: h.channel(),
                    volume: h.volume(),
                    key_state: h.register_key_state(),
                    state: h.state_string(),
                    instrument: h.instrument(),
                    sequence_pos: h.sequence_positions(),
                })
                .collect(),
            render_progress,
            previewing: self.preview.is_active(),
            has_document: self.has_document(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::Chip;
    use crate::document::EffectKind;
    use crate::instrument::{DpcmAssignment, Instrument};

    fn song() -> Arc<dyn Document> {
        let mut doc = MemoryDocument::default();
        doc.set_frame(0, 1, &[1, 1, 1, 1, 1]);
        if let Some(track) = doc.track_mut(0) {
            track.pattern_length = 8;
        }
        doc.set_note(0, 0, 0, 0, Note::note(45).with_volume(15));
        doc.set_note(0, 1, 0, 4, Note::empty().with_effect(EffectKind::Halt, 0));
        Arc::new(doc)
    }

    #[test]
    fn test_tick_produces_frame_of_samples() {
        let mut core = EngineCore::new(Settings::default());
        core.assign_document(Some(song()));
        core.play(PlayerCursor::start_of(0), PlayerState::Playing).unwrap();
        let mut out = Vec::new();
        for _ in 0..60 {
            core.tick(&mut out);
        }
        assert_eq!(out.len(), 44_100, "60 ticks at 60 Hz is one second");
        assert!(out.iter().any(|&s| s != 0));
        assert_eq!(core.apu().lock().get_reg(Chip::Apu2A03, 0) & 0x0F, 15);
    }

    #[test]
    fn test_play_without_document_rejected() {
        let mut core = EngineCore::new(Settings::default());
        let result = core.play(PlayerCursor::start_of(0), PlayerState::Playing);
        assert!(matches!(result, Err(SoundGenError::InvalidPlayback(_))));
        assert_eq!(core.player().state(), PlayerState::Stopped);
    }

    #[test]
    fn test_halt_effect_silences_every_channel() {
        let mut core = EngineCore::new(Settings::default());
        core.assign_document(Some(song()));
        core.play(PlayerCursor::start_of(0), PlayerState::Playing).unwrap();
        let mut out = Vec::new();
        let mut stopped = false;
        for _ in 0..200 {
            if core.tick(&mut out).stopped {
                stopped = true;
                break;
            }
        }
        assert!(stopped, "C00 on frame 1 row 4 stops the song");
        assert_eq!(core.player().state(), PlayerState::Stopped);
        assert_eq!(core.apu().lock().get_reg(Chip::Apu2A03, 0) & 0x0F, 0, "pulse 1 muted");
    }

    #[test]
    fn test_halt_silences_expansion_voices() {
        let chips = ChipMask::VRC6 | ChipMask::VRC7 | ChipMask::FDS | ChipMask::N163 | ChipMask::S5B;
        let mut doc = MemoryDocument::new(Machine::Ntsc, chips);
        let channels = channel_layout(chips, 1).len();
        for channel in 0..channels {
            doc.set_note(0, 0, channel, 0, Note::note(45).with_volume(15));
        }
        doc.set_note(0, 0, 0, 2, Note::empty().with_effect(EffectKind::Halt, 0));

        let mut core = EngineCore::new(Settings::default());
        core.assign_document(Some(Arc::new(doc)));
        core.play(PlayerCursor::start_of(0), PlayerState::Playing).unwrap();
        let mut out = Vec::new();
        let mut vrc7_sounded = false;
        let mut stopped = false;
        for _ in 0..100 {
            stopped = core.tick(&mut out).stopped;
            vrc7_sounded |= core.apu().lock().get_reg(Chip::Vrc7, 0x30) & 0x0F == 0;
            if stopped {
                break;
            }
        }
        assert!(stopped, "C00 on row 2 stops the song");
        assert!(vrc7_sounded, "VRC7 voice 0 played at full volume before the halt");

        let apu = core.apu();
        let apu = apu.lock();
        let reg = |chip: Chip, reg: usize| apu.get_reg(chip, reg);
        for index in 0..channels {
            let channel = core.channel_type(index).unwrap();
            match channel {
                ChannelType::Square1 => assert_eq!(reg(Chip::Apu2A03, 0x00) & 0x0F, 0),
                ChannelType::Square2 => assert_eq!(reg(Chip::Apu2A03, 0x04) & 0x0F, 0),
                ChannelType::Triangle => assert_eq!(reg(Chip::Apu2A03, 0x08), 0, "linear counter off"),
                ChannelType::Noise => assert_eq!(reg(Chip::Apu2A03, 0x0C) & 0x0F, 0),
                ChannelType::Dpcm => assert_eq!(reg(Chip::Apu2A03, 0x15) & 0x10, 0, "DMC disabled"),
                ChannelType::Vrc6Pulse(n) => assert_eq!(reg(Chip::Vrc6, n as usize * 4 + 2) & 0x80, 0),
                ChannelType::Vrc6Sawtooth => assert_eq!(reg(Chip::Vrc6, 10) & 0x80, 0),
                ChannelType::Vrc7(n) => {
                    let n = n as usize;
                    assert_eq!(reg(Chip::Vrc7, 0x30 + n) & 0x0F, 0x0F, "VRC7 {n} at minimum volume");
                    assert_eq!(reg(Chip::Vrc7, 0x20 + n) & 0x10, 0, "VRC7 {n} keyed off");
                }
                ChannelType::Fds => {
                    assert_eq!(reg(Chip::Fds, 0x40), 0x80, "FDS volume zero");
                    assert_eq!(reg(Chip::Fds, 0x43) & 0x80, 0x80, "FDS wave halted");
                }
                ChannelType::N163(n) => assert_eq!(reg(Chip::N163, 0x7F - 8 * n as usize) & 0x0F, 0),
                ChannelType::S5B(n) => {
                    let n = n as usize;
                    assert_eq!(reg(Chip::S5B, 8 + n) & 0x0F, 0, "5B {n} volume zero");
                    assert_eq!(reg(Chip::S5B, 7) & (0x09 << n), 0x09 << n, "5B {n} tone and noise off");
                }
                other => panic!("unexpected channel {other:?}"),
            }
        }
    }

    #[test]
    fn test_tick_rate_precedence() {
        let mut doc = MemoryDocument::default();
        doc.set_engine_speed(Some(120));
        let mut core = EngineCore::new(Settings::default());
        core.assign_document(Some(Arc::new(doc.clone())));
        assert_eq!(core.tick_rate(), 120, "document engine speed beats the machine rate");

        core.apply_settings(Settings::default().frame_rate(30));
        assert_eq!(core.tick_rate(), 30, "settings override beats the document");

        let mut pal = MemoryDocument::new(Machine::Pal, ChipMask::empty());
        pal.set_engine_speed(None);
        core.apply_settings(Settings::default());
        core.assign_document(Some(Arc::new(pal)));
        assert_eq!(core.tick_rate(), 50);
    }

    #[test]
    fn test_set_chips_rebuilds_layout() {
        let mut core = EngineCore::new(Settings::default());
        core.assign_document(Some(song()));
        assert_eq!(core.status(None).channels.len(), 5);
        core.set_chips(ChipMask::VRC6 | ChipMask::S5B);
        assert_eq!(core.status(None).channels.len(), 11);
        assert_eq!(core.channel_type(5), Some(ChannelType::Vrc6Pulse(0)));
    }

    #[test]
    fn test_double_start_leaves_one_cursor() {
        let mut core = EngineCore::new(Settings::default());
        core.assign_document(Some(song()));
        core.play(PlayerCursor::start_of(0), PlayerState::Playing).unwrap();
        let mut out = Vec::new();
        for _ in 0..10 {
            core.tick(&mut out);
        }
        core.play(PlayerCursor::at(0, 1, 2), PlayerState::Playing).unwrap();
        core.tick(&mut out);
        let cursor = core.player().cursor();
        assert_eq!((cursor.frame, cursor.row), (1, 2), "second start replaces the first");
        assert_eq!(core.player().ticks_played(), 1, "tick count restarts with the session");
    }

    #[test]
    fn test_preview_does_not_disturb_sequencer() {
        let sample = DpcmSample {
            name: "kick".into(),
            data: vec![0xAA; 129],
        };
        let mut plain = EngineCore::new(Settings::default());
        let mut previewed = EngineCore::new(Settings::default());
        for core in [&mut plain, &mut previewed] {
            core.assign_document(Some(song()));
            core.play(PlayerCursor::start_of(0), PlayerState::Playing).unwrap();
        }

        let mut out = Vec::new();
        let mut preview_done = false;
        for tick in 0..40 {
            if tick == 3 {
                previewed.preview_sample(&sample, 0, 15).unwrap();
            }
            plain.tick(&mut out);
            preview_done |= previewed.tick(&mut out).preview_done;
        }
        assert!(preview_done, "129 bytes at the top rate finish well within 40 ticks");
        assert_eq!(plain.player().cursor(), previewed.player().cursor());
        for reg in 0..0x14 {
            assert_eq!(
                plain.apu().lock().get_reg(Chip::Apu2A03, reg),
                previewed.apu().lock().get_reg(Chip::Apu2A03, reg),
                "register ${:04X} differs after the preview",
                0x4000 + reg
            );
        }
    }

    #[test]
    fn test_dpcm_row_during_preview_keeps_playing() {
        let mut doc = MemoryDocument::default();
        let index = doc.add_sample(DpcmSample {
            name: "pad".into(),
            data: vec![0xFF; 4081],
        });
        let mut inst = Instrument::new("drums", Chip::Apu2A03);
        inst.dpcm.push(DpcmAssignment {
            note: 36,
            sample: index,
            pitch: 0x0C,
            looped: false,
            delta: Some(0x10),
        });
        doc.set_instrument(0, inst);
        doc.set_note(0, 0, 4, 1, Note::note(36).with_instrument(0));
        let doc: Arc<dyn Document> = Arc::new(doc);

        let preview = DpcmSample {
            name: "kick".into(),
            data: vec![0x00; 513],
        };
        let mut plain = EngineCore::new(Settings::default());
        let mut previewed = EngineCore::new(Settings::default());
        for core in [&mut plain, &mut previewed] {
            core.assign_document(Some(doc.clone()));
            core.play(PlayerCursor::start_of(0), PlayerState::Playing).unwrap();
        }

        let mut out = Vec::new();
        let mut done_at = None;
        for tick in 0..40 {
            if tick == 4 {
                previewed.preview_sample(&preview, 0, 15).unwrap();
            }
            plain.tick(&mut out);
            if previewed.tick(&mut out).preview_done {
                done_at = Some(tick);
            }
        }
        // row 1 triggers on tick 6, while the preview is still on the output
        let done_at = done_at.expect("513 bytes at the top rate finish within 40 ticks");
        assert!(done_at > 6, "preview ended on tick {done_at}, before the DPCM row");

        let plain_apu = plain.apu();
        let previewed_apu = previewed.apu();
        let (plain_apu, previewed_apu) = (plain_apu.lock(), previewed_apu.lock());
        assert!(previewed_apu.dpcm_active(), "4081 bytes at rate 12 outlast 40 ticks");
        assert_eq!(
            previewed_apu.dpcm_state(),
            plain_apu.dpcm_state(),
            "sequencer sample advanced through the preview"
        );
    }
}
