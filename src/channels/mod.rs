//! Channel handlers
//!
//! One [`ChannelHandler`] drives each tracker channel. It accepts pattern
//! rows through [`ChannelHandler::play_note`], advances instrument sequences
//! and effects once per tick in [`ChannelHandler::process_channel`], and
//! emits the resulting register writes in [`ChannelHandler::refresh_channel`].
//! The chip-specific register formats live in the voice types of [`nes`] and
//! [`expansion`].
//!
//! Pitch is tracked in a per-channel domain: a period for divider-based
//! channels, a frequency for accumulator-based ones (FDS, N163, VRC7, and
//! the noise channel's note index), or sixteenths of a semitone when linear
//! pitch is enabled. Slides, vibrato and fine pitch are expressed as "pitch
//! up" amounts and mapped onto that domain.

pub mod expansion;
pub mod nes;
pub mod sequence;

use crate::apu::ChipWriter;
use crate::chip::{ChannelType, Chip, ChipMask, TrackerChannel};
use crate::document::{Document, EffectKind, Note, NoteValue};
use crate::instrument::{ArpeggioMode, Instrument, SequenceKind};
use crate::tables::{NoteTable, PeriodTables, VibratoMode, VibratoTable, NOTE_RANGE};
use sequence::SequenceCursor;
use std::fmt::Write as _;
use std::sync::Arc;

/// Column volume is kept with three fractional bits so `Axy` slides are smooth
const VOL_SHIFT: i32 = 3;
const VOL_MAX: i32 = 0x7F;
const FINE_PITCH_CENTER: i32 = 0x80;
const ECHO_LENGTH: usize = 4;
const HIGHEST_NOTE: i32 = NOTE_RANGE as i32 - 1;

/// Everything a handler reads while processing a tick
pub struct TickContext<'a> {
    /// Source of instruments and samples
    pub document: &'a dyn Document,
    /// Period tables for the active machine
    pub tables: &'a PeriodTables,
    /// Vibrato/tremolo waveform
    pub vibrato: &'a VibratoTable,
    /// Linear pitch mode
    pub linear_pitch: bool,
    /// Active N163 channel count
    pub n163_channels: usize,
}

/// Last note triggered on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyState {
    /// Note number
    pub note: i32,
    /// Instrument index at trigger time
    pub instrument: Option<u8>,
    /// Column volume (0..15)
    pub volume: u8,
}

/// Per-tick output values, as written to the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickState {
    /// Output volume (0..15)
    pub volume: i32,
    /// Sounding note
    pub note: i32,
    /// Register period/frequency
    pub period: i32,
    /// Duty/timbre
    pub duty: i32,
}

/// Values handed to a voice when it writes its registers
#[derive(Debug, Clone, Copy)]
pub(crate) struct Output {
    pub period: i32,
    /// Volume with the gate applied
    pub volume: i32,
    /// Volume ignoring the gate
    pub level: i32,
    pub duty: i32,
    pub gate: bool,
    pub triggered: bool,
    pub released: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PitchEffect {
    None,
    Arpeggio,
    Portamento,
    PortaUp,
    PortaDown,
    SlideUp,
    SlideDown,
}

/// Chip-specific register state
#[derive(Debug, Clone)]
pub(crate) enum Voice {
    Pulse(nes::PulseVoice),
    Triangle,
    Noise,
    Dpcm(nes::DpcmVoice),
    Vrc6Pulse(u8),
    Vrc6Saw,
    N163(expansion::N163Voice),
    Fds(expansion::FdsVoice),
    Vrc7(expansion::Vrc7Voice),
    S5B(u8),
}

impl Voice {
    fn for_channel(channel: ChannelType) -> Self {
        match channel {
            ChannelType::Square1 => Voice::Pulse(nes::PulseVoice::new(0x4000, true)),
            ChannelType::Square2 => Voice::Pulse(nes::PulseVoice::new(0x4004, true)),
            ChannelType::Triangle => Voice::Triangle,
            ChannelType::Noise => Voice::Noise,
            ChannelType::Dpcm => Voice::Dpcm(nes::DpcmVoice::default()),
            ChannelType::Vrc6Pulse(n) => Voice::Vrc6Pulse(n & 1),
            ChannelType::Vrc6Sawtooth => Voice::Vrc6Saw,
            ChannelType::Mmc5Pulse(n) => {
                Voice::Pulse(nes::PulseVoice::new(0x5000 + (n as u16 & 1) * 4, false))
            }
            ChannelType::N163(n) => Voice::N163(expansion::N163Voice::new(n)),
            ChannelType::Fds => Voice::Fds(expansion::FdsVoice::default()),
            ChannelType::Vrc7(n) => Voice::Vrc7(expansion::Vrc7Voice::new(n)),
            ChannelType::S5B(n) => Voice::S5B(n),
        }
    }

    fn refresh(
        &mut self,
        out: &Output,
        inst: Option<&Instrument>,
        writer: &mut dyn ChipWriter,
        ctx: &TickContext,
    ) {
        match self {
            Voice::Pulse(v) => v.refresh(out, writer),
            Voice::Triangle => nes::refresh_triangle(out, writer),
            Voice::Noise => nes::refresh_noise(out, writer),
            Voice::Dpcm(v) => v.refresh(writer, ctx),
            Voice::Vrc6Pulse(n) => expansion::refresh_vrc6_pulse(*n, out, writer),
            Voice::Vrc6Saw => expansion::refresh_vrc6_saw(out, writer),
            Voice::N163(v) => v.refresh(out, inst, writer, ctx),
            Voice::Fds(v) => v.refresh(out, inst, writer),
            Voice::Vrc7(v) => v.refresh(out, inst, writer),
            Voice::S5B(n) => expansion::refresh_s5b(*n, out, writer),
        }
    }

    fn trigger(&mut self, note: i32, inst: Option<&Instrument>) {
        match self {
            Voice::Pulse(v) => v.trigger(),
            Voice::Dpcm(v) => v.trigger(note, inst),
            Voice::Fds(v) => v.trigger(inst),
            _ => {}
        }
    }

    fn halt(&mut self) {
        match self {
            Voice::Pulse(v) => v.halt(),
            Voice::Dpcm(v) => v.halt(),
            _ => {}
        }
    }

    fn release(&mut self) {
        if let Voice::Dpcm(v) = self {
            v.release();
        }
    }

    fn effect(&mut self, kind: EffectKind, param: u8) {
        match self {
            Voice::Pulse(v) => v.effect(kind, param),
            Voice::Dpcm(v) => v.effect(kind, param),
            _ => {}
        }
    }

    fn tick(&mut self) {
        if let Voice::Dpcm(v) = self {
            v.tick();
        }
    }

    fn instrument_changed(&mut self) {
        match self {
            Voice::N163(v) => v.wave_changed(),
            Voice::Fds(v) => v.wave_changed(),
            Voice::Vrc7(v) => v.patch_changed(),
            _ => {}
        }
    }
}

/// Note/effect processor for one channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    channel: ChannelType,
    voice: Voice,

    note: i32,
    sounding_note: i32,
    period: i32,
    instrument: Option<u8>,
    inst: Option<Arc<Instrument>>,
    instrument_dirty: bool,
    gate: bool,
    released: bool,
    triggered: bool,
    volume: i32,

    sequences: [SequenceCursor; 5],
    seq_volume: i32,
    seq_arpeggio: i32,
    seq_fixed_note: Option<i32>,
    seq_pitch: i32,
    duty: i32,
    duty_base: i32,

    effect: PitchEffect,
    arpeggio: u8,
    arp_state: u8,
    porta_speed: i32,
    porta_to: Option<i32>,
    slide_note: i32,
    vibrato_speed: i32,
    vibrato_depth: i32,
    vibrato_phase: i32,
    tremolo_speed: i32,
    tremolo_depth: i32,
    tremolo_phase: i32,
    fine_pitch: i32,
    volume_slide: u8,
    delayed: Option<(Note, u8)>,
    note_cut: u8,
    note_release: u8,
    transpose: Option<(u8, i32)>,

    echo: [Option<i32>; ECHO_LENGTH],
    key_state: Option<KeyState>,
    last: TickState,
}

impl ChannelHandler {
    /// Handler for a physical channel
    pub fn new(channel: ChannelType) -> Self {
        ChannelHandler {
            channel,
            voice: Voice::for_channel(channel),
            note: 0,
            sounding_note: 0,
            period: 0,
            instrument: None,
            inst: None,
            instrument_dirty: false,
            gate: false,
            released: false,
            triggered: false,
            volume: 0x0F << VOL_SHIFT,
            sequences: Default::default(),
            seq_volume: 15,
            seq_arpeggio: 0,
            seq_fixed_note: None,
            seq_pitch: 0,
            duty: 0,
            duty_base: 0,
            effect: PitchEffect::None,
            arpeggio: 0,
            arp_state: 0,
            porta_speed: 0,
            porta_to: None,
            slide_note: 0,
            vibrato_speed: 0,
            vibrato_depth: 0,
            vibrato_phase: 0,
            tremolo_speed: 0,
            tremolo_depth: 0,
            tremolo_phase: 0,
            fine_pitch: FINE_PITCH_CENTER,
            volume_slide: 0,
            delayed: None,
            note_cut: 0,
            note_release: 0,
            transpose: None,
            echo: [None; ECHO_LENGTH],
            key_state: None,
            last: TickState::default(),
        }
    }

    /// Physical channel
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    /// Whether a note is sounding
    pub fn is_gated(&self) -> bool {
        self.gate
    }

    /// Last triggered note
    pub fn register_key_state(&self) -> Option<KeyState> {
        self.key_state
    }

    /// Output of the most recent refresh
    pub fn tick_state(&self) -> TickState {
        self.last
    }

    /// Output volume of the most recent refresh (0..15)
    pub fn volume(&self) -> i32 {
        self.last.volume
    }

    /// Selected instrument
    pub fn instrument(&self) -> Option<u8> {
        self.instrument
    }

    /// Position played this tick in each sequence, in [`SequenceKind::ALL`] order
    pub fn sequence_positions(&self) -> [Option<usize>; 5] {
        self.sequences.each_ref().map(SequenceCursor::play_position)
    }

    /// Whether vibrato is active
    pub fn vibrato_active(&self) -> bool {
        self.vibrato_speed > 0 && self.vibrato_depth > 0
    }

    /// Reload the instrument from the document on the next tick
    pub fn force_reload_instrument(&mut self) {
        self.instrument_dirty = true;
    }

    /// Re-upload wavetable data (N163/FDS) on the next refresh
    pub fn wave_changed(&mut self) {
        self.voice.instrument_changed();
    }

    /// Return to the power-on state
    pub fn reset_channel(&mut self) {
        *self = ChannelHandler::new(self.channel);
    }

    /// Clear effect state while keeping the sounding note
    pub fn reset_effects(&mut self) {
        self.effect = PitchEffect::None;
        self.arpeggio = 0;
        self.arp_state = 0;
        self.porta_speed = 0;
        self.porta_to = None;
        self.vibrato_speed = 0;
        self.vibrato_depth = 0;
        self.vibrato_phase = 0;
        self.tremolo_speed = 0;
        self.tremolo_depth = 0;
        self.tremolo_phase = 0;
        self.fine_pitch = FINE_PITCH_CENTER;
        self.volume_slide = 0;
        self.delayed = None;
        self.note_cut = 0;
        self.note_release = 0;
        self.transpose = None;
        self.voice.effect(EffectKind::Retrigger, 0);
    }

    /// Human-readable effect state
    pub fn state_string(&self) -> String {
        let mut s = String::new();
        let _ = write!(s, "{}: ", self.channel.name());
        if self.gate {
            let _ = write!(s, "note {} ", note_name(self.sounding_note));
        } else {
            s.push_str("note off ");
        }
        match self.instrument {
            Some(i) => {
                let _ = write!(s, "inst {i:02X} ");
            }
            None => s.push_str("inst -- "),
        }
        let _ = write!(
            s,
            "vol {:X} duty {} vib {:X}{:X} trem {:X}{:X} pitch {:02X}",
            self.volume >> VOL_SHIFT,
            self.duty,
            self.vibrato_speed,
            self.vibrato_depth,
            self.tremolo_speed,
            self.tremolo_depth,
            self.fine_pitch
        );
        if self.effect == PitchEffect::Arpeggio {
            let _ = write!(s, " arp {:02X}", self.arpeggio);
        }
        if self.porta_speed > 0 && self.effect != PitchEffect::None {
            let _ = write!(s, " porta {:02X}", self.porta_speed);
        }
        if self.volume_slide != 0 {
            let _ = write!(s, " slide {:02X}", self.volume_slide);
        }
        s
    }

    /// Accept a pattern row
    pub fn play_note(&mut self, note: &Note, ctx: &TickContext) {
        if let Some((pending, _)) = self.delayed.take() {
            self.apply_row(&pending, ctx);
        }
        if let Some(delay) = note.effect_param(EffectKind::Delay) {
            if delay > 0 {
                self.delayed = Some((*note, delay));
                return;
            }
        }
        self.apply_row(note, ctx);
    }

    fn apply_row(&mut self, note: &Note, ctx: &TickContext) {
        if note.value != NoteValue::None {
            self.note_cut = 0;
            self.note_release = 0;
        }
        if let Some(index) = note.instrument {
            self.select_instrument(index, ctx);
        }
        if let Some(volume) = note.volume {
            self.volume = ((volume as i32) & 0x0F) << VOL_SHIFT;
        }

        let effects = note.effects.iter().filter_map(|e| Some((e.kind()?, e.param)));
        let (after, before): (Vec<_>, Vec<_>) = effects.partition(|(kind, _)| {
            matches!(
                kind,
                EffectKind::SlideUp | EffectKind::SlideDown | EffectKind::Transpose
            )
        });
        for (kind, param) in before {
            self.apply_effect(kind, param, ctx);
        }

        match note.value {
            NoteValue::None => {}
            NoteValue::Note(n) => self.note_on(n as i32, ctx),
            NoteValue::Echo(k) => {
                if let Some(n) = self.echo.get(k as usize).copied().flatten() {
                    self.note_on(n, ctx);
                }
            }
            NoteValue::Halt => self.halt(),
            NoteValue::Release => self.release(),
        }

        for (kind, param) in after {
            self.apply_effect(kind, param, ctx);
        }
    }

    fn select_instrument(&mut self, index: u8, ctx: &TickContext) {
        if self.instrument == Some(index) && self.inst.is_some() && !self.instrument_dirty {
            return;
        }
        self.instrument = Some(index);
        self.instrument_dirty = false;
        let chip = self.channel.chip();
        self.inst = ctx
            .document
            .instrument(index)
            .filter(|inst| inst.chip == chip);
        if self.inst.is_none() {
            log::trace!("instrument {index:02X} unusable on {}", self.channel.name());
        }
        self.voice.instrument_changed();
    }

    fn apply_effect(&mut self, kind: EffectKind, param: u8, ctx: &TickContext) {
        let hi = (param >> 4) as i32;
        let lo = (param & 0x0F) as i32;
        match kind {
            EffectKind::Arpeggio => {
                self.arpeggio = param;
                if param == 0 {
                    if self.effect == PitchEffect::Arpeggio {
                        self.effect = PitchEffect::None;
                    }
                } else {
                    self.effect = PitchEffect::Arpeggio;
                }
            }
            EffectKind::Portamento => {
                self.porta_speed = param as i32;
                if param == 0 {
                    if self.effect == PitchEffect::Portamento {
                        self.effect = PitchEffect::None;
                    }
                } else {
                    self.effect = PitchEffect::Portamento;
                    if self.porta_to.is_none() {
                        self.porta_to = Some(self.period);
                    }
                }
            }
            EffectKind::PortaUp | EffectKind::PortaDown => {
                self.porta_speed = param as i32;
                self.effect = match (param, kind) {
                    (0, _) => PitchEffect::None,
                    (_, EffectKind::PortaUp) => PitchEffect::PortaUp,
                    _ => PitchEffect::PortaDown,
                };
            }
            EffectKind::SlideUp | EffectKind::SlideDown => {
                if param == 0 {
                    return;
                }
                let offset = if kind == EffectKind::SlideUp { lo } else { -lo };
                self.porta_speed = (hi << 1) + 1;
                self.slide_note = (self.note + offset).clamp(0, HIGHEST_NOTE);
                self.porta_to = Some(self.note_value(self.slide_note, ctx));
                self.effect = if kind == EffectKind::SlideUp {
                    PitchEffect::SlideUp
                } else {
                    PitchEffect::SlideDown
                };
            }
            EffectKind::Vibrato => {
                self.vibrato_speed = hi;
                self.vibrato_depth = lo;
                if param == 0 {
                    self.vibrato_phase = 0;
                }
            }
            EffectKind::Tremolo => {
                self.tremolo_speed = hi;
                self.tremolo_depth = lo;
                if param == 0 {
                    self.tremolo_phase = 0;
                }
            }
            EffectKind::Pitch => self.fine_pitch = param as i32,
            EffectKind::VolumeSlide => self.volume_slide = param,
            EffectKind::NoteCut => self.note_cut = param.saturating_add(1),
            EffectKind::NoteRelease => self.note_release = param.saturating_add(1),
            EffectKind::Transpose => {
                let delay = ((param >> 4) & 0x07) + 1;
                let amount = if param & 0x80 != 0 { -lo } else { lo };
                self.transpose = Some((delay, amount));
            }
            EffectKind::Duty => {
                self.duty_base = param as i32;
                self.duty = param as i32;
            }
            EffectKind::Delay => {}
            EffectKind::Dac
            | EffectKind::SampleOffset
            | EffectKind::Retrigger
            | EffectKind::DpcmPitch
            | EffectKind::SweepUp
            | EffectKind::SweepDown => self.voice.effect(kind, param),
            EffectKind::Speed | EffectKind::Jump | EffectKind::Skip | EffectKind::Halt => {}
        }
    }

    fn note_on(&mut self, note: i32, ctx: &TickContext) {
        let note = note.clamp(0, HIGHEST_NOTE);
        self.echo.rotate_right(1);
        self.echo[0] = Some(note);

        if matches!(self.effect, PitchEffect::SlideUp | PitchEffect::SlideDown) {
            self.effect = PitchEffect::None;
        }
        if self.effect == PitchEffect::Portamento
            && self.porta_speed > 0
            && self.gate
            && !self.released
        {
            self.note = note;
            self.sounding_note = note;
            self.porta_to = Some(self.note_value(note, ctx));
            return;
        }
        self.trigger(note, ctx);
    }

    fn trigger(&mut self, note: i32, ctx: &TickContext) {
        self.note = note;
        self.sounding_note = note;
        self.period = self.note_value(note, ctx);
        if self.effect == PitchEffect::Portamento {
            self.porta_to = Some(self.period);
        }
        self.gate = true;
        self.released = false;
        self.triggered = true;
        self.seq_volume = 15;
        self.seq_arpeggio = 0;
        self.seq_fixed_note = None;
        self.seq_pitch = 0;
        self.duty = self.duty_base;
        let inst = self.inst.clone();
        for (cursor, kind) in self.sequences.iter_mut().zip(SequenceKind::ALL) {
            cursor.start(inst.as_deref().and_then(|i| i.sequences.get(kind)));
        }
        self.voice.trigger(note, inst.as_deref());
        self.key_state = Some(KeyState {
            note,
            instrument: self.instrument,
            volume: (self.volume >> VOL_SHIFT) as u8,
        });
    }

    fn halt(&mut self) {
        self.gate = false;
        self.released = false;
        self.porta_to = None;
        for cursor in &mut self.sequences {
            cursor.stop();
        }
        self.voice.halt();
    }

    fn release(&mut self) {
        if !self.gate || self.released {
            return;
        }
        self.released = true;
        let inst = self.inst.clone();
        for (cursor, kind) in self.sequences.iter_mut().zip(SequenceKind::ALL) {
            cursor.release(inst.as_deref().and_then(|i| i.sequences.get(kind)));
        }
        self.voice.release();
    }

    /// Advance sequences and effects by one tick
    pub fn process_channel(&mut self, ctx: &TickContext) {
        if self.instrument_dirty {
            if let Some(index) = self.instrument {
                self.select_instrument(index, ctx);
            }
            self.instrument_dirty = false;
        }

        if let Some((note, ticks)) = self.delayed.as_mut() {
            if *ticks == 0 {
                let note = *note;
                self.delayed = None;
                self.apply_row(&note, ctx);
            } else {
                *ticks -= 1;
            }
        }

        if let Some((ticks, amount)) = self.transpose.as_mut() {
            *ticks -= 1;
            if *ticks == 0 {
                let target = (self.note + *amount).clamp(0, HIGHEST_NOTE);
                self.transpose = None;
                self.note = target;
                self.sounding_note = target;
                self.period = self.note_value(target, ctx);
            }
        }

        if self.note_cut > 0 {
            self.note_cut -= 1;
            if self.note_cut == 0 {
                self.halt();
            }
        }
        if self.note_release > 0 {
            self.note_release -= 1;
            if self.note_release == 0 {
                self.release();
            }
        }

        self.run_sequences(ctx);
        self.run_pitch_effect(ctx);

        if self.volume_slide != 0 {
            let up = (self.volume_slide >> 4) as i32;
            let down = (self.volume_slide & 0x0F) as i32;
            self.volume = if up > 0 {
                (self.volume + up).min(VOL_MAX)
            } else {
                (self.volume - down).max(0)
            };
        }

        self.vibrato_phase = (self.vibrato_phase + self.vibrato_speed) & 63;
        self.tremolo_phase = (self.tremolo_phase + self.tremolo_speed) & 63;
        self.voice.tick();
    }

    fn run_sequences(&mut self, ctx: &TickContext) {
        let inst = self.inst.clone();
        let seq = |kind| inst.as_deref().and_then(|i| i.sequences.get(kind));

        if let Some(v) = self.sequences[0].step(seq(SequenceKind::Volume)) {
            self.seq_volume = (v as i32).clamp(0, 15);
        }
        if let Some(v) = self.sequences[1].step(seq(SequenceKind::Arpeggio)) {
            let mode = seq(SequenceKind::Arpeggio)
                .map(|s| s.arpeggio_mode)
                .unwrap_or_default();
            match mode {
                ArpeggioMode::Absolute => self.seq_arpeggio = v as i32,
                ArpeggioMode::Fixed => self.seq_fixed_note = Some(v as i32),
                ArpeggioMode::Relative => {
                    self.note = (self.note + v as i32).clamp(0, HIGHEST_NOTE);
                }
            }
            if self.effect != PitchEffect::Arpeggio {
                self.retune(0, ctx);
            }
        }
        if let Some(v) = self.sequences[2].step(seq(SequenceKind::Pitch)) {
            self.seq_pitch += v as i32;
        }
        if let Some(v) = self.sequences[3].step(seq(SequenceKind::HiPitch)) {
            self.seq_pitch += (v as i32) << 4;
        }
        if let Some(v) = self.sequences[4].step(seq(SequenceKind::Duty)) {
            self.duty = v as i32;
        }
    }

    fn retune(&mut self, offset: i32, ctx: &TickContext) {
        let base = self
            .seq_fixed_note
            .unwrap_or(self.note + self.seq_arpeggio);
        let note = (base + offset).clamp(0, HIGHEST_NOTE);
        self.sounding_note = note;
        self.period = self.note_value(note, ctx);
    }

    fn run_pitch_effect(&mut self, ctx: &TickContext) {
        match self.effect {
            PitchEffect::None => {}
            PitchEffect::Arpeggio => {
                let x = (self.arpeggio >> 4) as i32;
                let y = (self.arpeggio & 0x0F) as i32;
                let offset = match self.arp_state {
                    1 => x,
                    2 => y,
                    _ => 0,
                };
                self.retune(offset, ctx);
                self.arp_state = match self.arp_state {
                    0 => 1,
                    1 if y == 0 => 0,
                    1 => 2,
                    _ => 0,
                };
            }
            PitchEffect::Portamento => {
                if let Some(target) = self.porta_to {
                    self.period = approach(self.period, target, self.porta_speed);
                }
            }
            PitchEffect::PortaUp => self.pitch_up(self.porta_speed, ctx),
            PitchEffect::PortaDown => self.pitch_up(-self.porta_speed, ctx),
            PitchEffect::SlideUp | PitchEffect::SlideDown => {
                if let Some(target) = self.porta_to {
                    self.period = approach(self.period, target, self.porta_speed);
                    if self.period == target {
                        self.effect = PitchEffect::None;
                        self.note = self.slide_note;
                        self.sounding_note = self.slide_note;
                        self.porta_to = None;
                    }
                }
            }
        }
    }

    /// Emit this tick's register writes
    pub fn refresh_channel(&mut self, writer: &mut dyn ChipWriter, ctx: &TickContext) {
        let level = self.calculate_volume(ctx);
        let out = Output {
            period: self.calculate_period(ctx),
            volume: if self.gate { level } else { 0 },
            level,
            duty: self.duty,
            gate: self.gate,
            triggered: self.triggered,
            released: self.released,
        };
        let inst = self.inst.clone();
        self.voice.refresh(&out, inst.as_deref(), writer, ctx);
        self.triggered = false;
        self.last = TickState {
            volume: out.volume,
            note: self.sounding_note,
            period: out.period,
            duty: self.duty,
        };
    }

    fn uses_linear(&self, ctx: &TickContext) -> bool {
        ctx.linear_pitch && !matches!(self.channel, ChannelType::Noise | ChannelType::Dpcm)
    }

    /// Register value rises with pitch
    fn inverted(&self) -> bool {
        matches!(
            self.channel,
            ChannelType::Noise | ChannelType::N163(_) | ChannelType::Fds | ChannelType::Vrc7(_)
        )
    }

    fn max_period(&self) -> i32 {
        match self.channel {
            ChannelType::Square1
            | ChannelType::Square2
            | ChannelType::Triangle
            | ChannelType::Mmc5Pulse(_) => 0x7FF,
            ChannelType::Noise | ChannelType::Dpcm => 0x0F,
            ChannelType::Vrc6Pulse(_)
            | ChannelType::Vrc6Sawtooth
            | ChannelType::Fds
            | ChannelType::S5B(_) => 0xFFF,
            ChannelType::N163(_) => 0x3FFFF,
            ChannelType::Vrc7(_) => 0x1FF << 7,
        }
    }

    fn wave_len(&self) -> i32 {
        self.inst
            .as_deref()
            .and_then(|i| i.n163.as_ref())
            .map(|w| w.wave_len() as i32)
            .unwrap_or(16)
    }

    /// Register value for a note
    fn note_period(&self, note: i32, ctx: &TickContext) -> i32 {
        let note = note.clamp(0, HIGHEST_NOTE);
        let tables = ctx.tables;
        let value = match self.channel {
            ChannelType::Square1
            | ChannelType::Square2
            | ChannelType::Triangle
            | ChannelType::Vrc6Pulse(_)
            | ChannelType::Mmc5Pulse(_) => tables.read(tables.machine_table(), note) as i32,
            ChannelType::Vrc6Sawtooth => tables.read(NoteTable::Sawtooth, note) as i32,
            ChannelType::Noise | ChannelType::Dpcm => note & 0x0F,
            ChannelType::N163(_) => tables.read(NoteTable::N163, note) as i32 * self.wave_len(),
            ChannelType::Fds => tables.read(NoteTable::Fds, note) as i32,
            ChannelType::Vrc7(_) => {
                let block = (note / 12).min(7);
                (tables.read(NoteTable::Vrc7, note) as i32) << block
            }
            ChannelType::S5B(_) => tables.read(NoteTable::S5B, note) as i32,
        };
        value.clamp(0, self.max_period())
    }

    /// Pitch-domain value for a note
    fn note_value(&self, note: i32, ctx: &TickContext) -> i32 {
        if self.uses_linear(ctx) {
            note.clamp(0, HIGHEST_NOTE) << 4
        } else {
            self.note_period(note, ctx)
        }
    }

    fn pitch_up(&mut self, amount: i32, ctx: &TickContext) {
        let linear = self.uses_linear(ctx);
        let rises = linear || self.inverted();
        let next = if rises {
            self.period + amount
        } else {
            self.period - amount
        };
        let max = if linear {
            HIGHEST_NOTE << 4
        } else {
            self.max_period()
        };
        self.period = next.clamp(0, max);
    }

    fn vibrato(&self, table: &VibratoTable) -> i32 {
        if self.vibrato_depth == 0 || self.vibrato_speed == 0 {
            return 0;
        }
        let depth = self.vibrato_depth << 4;
        let quarter = self.vibrato_phase & 0x0F;
        let segment = self.vibrato_phase >> 4;
        let index = if segment & 1 == 1 { 15 - quarter } else { quarter };
        let mut value = table.read(depth + index);
        if segment >= 2 {
            value = -value;
        }
        if table.mode() == VibratoMode::Old {
            value = (value + table.read(depth + 15) + 1) >> 1;
        }
        value
    }

    fn tremolo(&self, table: &VibratoTable) -> i32 {
        if self.tremolo_depth == 0 || self.tremolo_speed == 0 {
            return 0;
        }
        let phase = self.tremolo_phase >> 1;
        let quarter = phase & 0x0F;
        let index = if phase & 0x10 != 0 { 15 - quarter } else { quarter };
        table.read((self.tremolo_depth << 4) + index) >> 1
    }

    fn calculate_volume(&self, ctx: &TickContext) -> i32 {
        let column = self.volume >> VOL_SHIFT;
        let mut volume = column * self.seq_volume / 15 - self.tremolo(ctx.vibrato);
        volume = volume.clamp(0, 15);
        if volume == 0 && column > 0 && self.seq_volume > 0 {
            volume = 1;
        }
        volume
    }

    /// Last written period relative to the sounding note's table period
    ///
    /// Positive values lower the pitch on every chip, matching the sign of
    /// pitch sequence values.
    pub fn pitch_offset(&self, ctx: &TickContext) -> i32 {
        let diff = self.last.period - self.note_period(self.last.note, ctx);
        if self.inverted() {
            -diff
        } else {
            diff
        }
    }

    /// Register period/frequency with slides, vibrato and fine pitch applied
    pub(crate) fn calculate_period(&self, ctx: &TickContext) -> i32 {
        let base = if self.uses_linear(ctx) {
            let note = (self.period >> 4).clamp(0, HIGHEST_NOTE);
            let frac = self.period & 0x0F;
            let low = self.note_period(note, ctx);
            let high = self.note_period((note + 1).min(HIGHEST_NOTE), ctx);
            low + (high - low) * frac / 16
        } else {
            self.period
        };
        let mut up = self.vibrato(ctx.vibrato) + (self.fine_pitch - FINE_PITCH_CENTER)
            - self.seq_pitch;
        if let ChannelType::Vrc7(_) = self.channel {
            up <<= expansion::vrc7_block(base);
        }
        let period = if self.inverted() { base + up } else { base - up };
        period.clamp(0, self.max_period())
    }
}

fn approach(value: i32, target: i32, speed: i32) -> i32 {
    if value < target {
        (value + speed).min(target)
    } else {
        (value - speed).max(target)
    }
}

fn note_name(note: i32) -> String {
    const NAMES: [&str; 12] = [
        "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
    ];
    format!("{}{}", NAMES[note.rem_euclid(12) as usize], note / 12)
}

/// All handlers of the current chip configuration
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    handlers: Vec<ChannelHandler>,
    s5b_mixer: Option<u8>,
}

impl ChannelSet {
    /// One handler per tracker channel, in layout order
    pub fn new(layout: &[TrackerChannel]) -> Self {
        ChannelSet {
            handlers: layout
                .iter()
                .map(|c| ChannelHandler::new(c.channel))
                .collect(),
            s5b_mixer: None,
        }
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when there are no channels
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler by tracker index
    pub fn get(&self, index: usize) -> Option<&ChannelHandler> {
        self.handlers.get(index)
    }

    /// Mutable handler by tracker index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ChannelHandler> {
        self.handlers.get_mut(index)
    }

    /// All handlers
    pub fn iter(&self) -> impl Iterator<Item = &ChannelHandler> {
        self.handlers.iter()
    }

    /// Write the power-on register setup for the chips in use
    pub fn init_chips(&mut self, chips: ChipMask, n163_channels: usize, writer: &mut dyn ChipWriter) {
        writer.write(0x4015, 0x0F);
        writer.write(0x4017, 0x40);
        if chips.has(Chip::Vrc6) {
            writer.write(0x9003, 0x00);
        }
        if chips.has(Chip::Mmc5) {
            writer.write(0x5015, 0x03);
        }
        if chips.has(Chip::N163) {
            let count = n163_channels.clamp(1, 8) as u8;
            writer.write(0xF800, 0x7F);
            writer.write(0x4800, (count - 1) << 4);
        }
        if chips.has(Chip::Fds) {
            writer.write(0x4089, 0x00);
            writer.write(0x4083, 0x80);
            writer.write(0x4087, 0x80);
        }
        if chips.has(Chip::S5B) {
            writer.write(0xC000, 0x07);
            writer.write(0xE000, 0x3F);
        }
        self.s5b_mixer = Some(0x3F);
    }

    /// Advance every handler by one tick
    pub fn process(&mut self, ctx: &TickContext) {
        for handler in &mut self.handlers {
            handler.process_channel(ctx);
        }
    }

    /// Emit register writes for every handler
    pub fn refresh(&mut self, writer: &mut dyn ChipWriter, ctx: &TickContext) {
        let mut mixer = 0x3Fu8;
        let mut has_s5b = false;
        for handler in &mut self.handlers {
            handler.refresh_channel(writer, ctx);
            if let ChannelType::S5B(n) = handler.channel {
                has_s5b = true;
                if handler.gate {
                    mixer &= !expansion::s5b_mixer_enable(n, handler.duty);
                }
            }
        }
        if has_s5b && self.s5b_mixer != Some(mixer) {
            writer.write(0xC000, 0x07);
            writer.write(0xE000, mixer);
            self.s5b_mixer = Some(mixer);
        }
    }

    /// Cut every note and write the silent register state
    pub fn make_silent(&mut self, writer: &mut dyn ChipWriter, ctx: &TickContext) {
        for handler in &mut self.handlers {
            handler.halt();
            handler.delayed = None;
        }
        self.refresh(writer, ctx);
    }

    /// Power-on state for every handler
    pub fn reset(&mut self) {
        for handler in &mut self.handlers {
            handler.reset_channel();
        }
        self.s5b_mixer = None;
    }

    /// Clear effect state on every handler
    pub fn reset_effects(&mut self) {
        for handler in &mut self.handlers {
            handler.reset_effects();
        }
    }

    /// Mark every handler's instrument for reload
    pub fn force_reload_instruments(&mut self) {
        for handler in &mut self.handlers {
            handler.force_reload_instrument();
        }
    }

    /// Mark every wavetable for re-upload
    pub fn wave_changed(&mut self) {
        for handler in &mut self.handlers {
            handler.wave_changed();
        }
    }
}
