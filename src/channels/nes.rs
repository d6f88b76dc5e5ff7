//! 2A03 and MMC5 register formats

use super::{Output, TickContext};
use crate::apu::ChipWriter;
use crate::document::EffectKind;
use crate::instrument::Instrument;
use std::sync::Arc;

/// Pulse channel at `$4000`/`$4004` (2A03) or `$5000`/`$5004` (MMC5)
#[derive(Debug, Clone)]
pub(crate) struct PulseVoice {
    base: u16,
    has_sweep: bool,
    last_high: Option<u8>,
    sweep: Option<u8>,
    sweep_pending: bool,
    sweep_this_row: bool,
}

impl PulseVoice {
    pub fn new(base: u16, has_sweep: bool) -> Self {
        PulseVoice {
            base,
            has_sweep,
            last_high: None,
            sweep: None,
            sweep_pending: false,
            sweep_this_row: false,
        }
    }

    pub fn trigger(&mut self) {
        // a new note without Hxy/Ixy on its row turns the sweep off
        if !self.sweep_this_row && self.sweep.take().is_some() {
            self.last_high = None;
        }
        self.sweep_this_row = false;
    }

    pub fn halt(&mut self) {
        self.last_high = None;
        self.sweep = None;
    }

    pub fn effect(&mut self, kind: EffectKind, param: u8) {
        if !self.has_sweep {
            return;
        }
        let negate = match kind {
            EffectKind::SweepUp => 0x08,
            EffectKind::SweepDown => 0x00,
            _ => return,
        };
        self.sweep = Some(0x80 | negate | (param & 0x77));
        self.sweep_pending = true;
        self.sweep_this_row = true;
    }

    pub fn refresh(&mut self, out: &Output, writer: &mut dyn ChipWriter) {
        let duty = (out.duty & 0x03) as u8;
        let volume = out.volume.clamp(0, 15) as u8;
        writer.write(self.base, (duty << 6) | 0x30 | volume);
        if !out.gate {
            return;
        }

        let period = out.period.clamp(0, 0x7FF) as u16;
        let low = (period & 0xFF) as u8;
        let high = (period >> 8) as u8;

        if let Some(sweep) = self.sweep {
            if self.sweep_pending {
                writer.write(self.base + 1, sweep);
                writer.write(self.base + 2, low);
                writer.write(self.base + 3, high);
                self.sweep_pending = false;
                self.last_high = None;
            }
            return;
        }

        if self.has_sweep {
            writer.write(self.base + 1, 0x08);
        }
        writer.write(self.base + 2, low);
        // rewriting the high byte restarts the waveform, so only touch it on change
        if self.last_high != Some(high) {
            writer.write(self.base + 3, high);
            self.last_high = Some(high);
        }
    }
}

pub(crate) fn refresh_triangle(out: &Output, writer: &mut dyn ChipWriter) {
    if !out.gate || out.volume == 0 {
        writer.write(0x4008, 0x00);
        return;
    }
    let period = out.period.clamp(0, 0x7FF) as u16;
    writer.write(0x4008, 0x81);
    writer.write(0x400A, (period & 0xFF) as u8);
    writer.write(0x400B, (period >> 8) as u8);
}

pub(crate) fn refresh_noise(out: &Output, writer: &mut dyn ChipWriter) {
    writer.write(0x400C, 0x30 | out.volume.clamp(0, 15) as u8);
    if !out.gate {
        return;
    }
    let mode = ((out.duty & 0x01) as u8) << 7;
    let index = (out.period & 0x0F) as u8 ^ 0x0F;
    writer.write(0x400E, mode | index);
    if out.triggered {
        writer.write(0x400F, 0x00);
    }
}

#[derive(Debug, Clone, Copy)]
struct DpcmPlay {
    sample: usize,
    pitch: u8,
    looped: bool,
    delta: Option<u8>,
    offset: u8,
}

/// DPCM channel; samples are loaded into the DMC address space on trigger
#[derive(Debug, Clone, Default)]
pub(crate) struct DpcmVoice {
    pending: Option<DpcmPlay>,
    last: Option<DpcmPlay>,
    dac: Option<u8>,
    halt_pending: bool,
    release_pending: bool,
    offset: u8,
    pitch_override: Option<u8>,
    retrigger: u8,
    retrigger_counter: u8,
    loaded: Option<usize>,
}

impl DpcmVoice {
    pub fn trigger(&mut self, note: i32, inst: Option<&Instrument>) {
        let play = inst.and_then(|i| i.dpcm_for(note)).map(|a| DpcmPlay {
            sample: a.sample,
            pitch: self.pitch_override.unwrap_or(a.pitch) & 0x0F,
            looped: a.looped,
            delta: a.delta,
            offset: self.offset,
        });
        self.offset = 0;
        self.pitch_override = None;
        match play {
            Some(play) => {
                self.pending = Some(play);
                self.last = Some(play);
                self.retrigger_counter = self.retrigger;
            }
            None => {
                self.pending = None;
                self.halt_pending = true;
            }
        }
    }

    pub fn halt(&mut self) {
        self.pending = None;
        self.halt_pending = true;
        self.retrigger = 0;
    }

    pub fn release(&mut self) {
        self.release_pending = true;
    }

    pub fn effect(&mut self, kind: EffectKind, param: u8) {
        match kind {
            EffectKind::Dac => self.dac = Some(param & 0x7F),
            EffectKind::SampleOffset => self.offset = param,
            EffectKind::DpcmPitch => self.pitch_override = Some(param & 0x0F),
            EffectKind::Retrigger => {
                self.retrigger = param;
                self.retrigger_counter = param;
            }
            _ => {}
        }
    }

    pub fn tick(&mut self) {
        if self.retrigger == 0 {
            return;
        }
        self.retrigger_counter = self.retrigger_counter.saturating_sub(1);
        if self.retrigger_counter == 0 {
            self.pending = self.last;
            self.retrigger_counter = self.retrigger;
        }
    }

    pub fn refresh(&mut self, writer: &mut dyn ChipWriter, ctx: &TickContext) {
        if let Some(level) = self.dac.take() {
            writer.write(0x4011, level);
        }
        if std::mem::take(&mut self.halt_pending) {
            writer.write(0x4015, 0x0F);
        }
        if std::mem::take(&mut self.release_pending) {
            // drop the loop flag; the sample plays out
            if let Some(last) = self.last {
                writer.write(0x4010, last.pitch);
            }
        }

        let Some(play) = self.pending.take() else {
            return;
        };
        let sample = match ctx.document.dpcm_sample(play.sample) {
            Some(sample) if sample.playable_len() > 0 => sample,
            _ => {
                log::trace!("DPCM sample {} missing or empty", play.sample);
                writer.write(0x4015, 0x0F);
                return;
            }
        };
        if self.loaded != Some(play.sample) {
            writer.load_dpcm(Arc::from(sample.data.as_slice()));
            self.loaded = Some(play.sample);
        }

        let length = sample.length_register();
        // offset is in 64-byte units, the length register in 16-byte units
        let offset = if (play.offset as usize) * 64 < sample.playable_len() {
            play.offset
        } else {
            0
        };
        let length = length.saturating_sub(offset.saturating_mul(4));

        writer.write(0x4010, ((play.looped as u8) << 6) | play.pitch);
        writer.write(0x4012, offset);
        writer.write(0x4013, length);
        if let Some(delta) = play.delta {
            writer.write(0x4011, delta & 0x7F);
        }
        writer.write(0x4015, 0x0F);
        writer.write(0x4015, 0x1F);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{Fixture, WriteLog};
    use super::super::ChannelHandler;
    use crate::chip::{ChannelType, Chip};
    use crate::document::{EffectKind, Note, NoteValue};
    use crate::instrument::{DpcmAssignment, DpcmSample, Instrument};

    fn dpcm_fixture() -> Fixture {
        let mut fx = Fixture::new();
        let index = fx.doc.add_sample(DpcmSample {
            name: "kick".into(),
            data: vec![0x55; 257],
        });
        let mut inst = Instrument::new("drums", Chip::Apu2A03);
        inst.dpcm.push(DpcmAssignment {
            note: 36,
            sample: index,
            pitch: 0x0F,
            looped: false,
            delta: Some(0x40),
        });
        fx.doc.set_instrument(0, inst);
        fx
    }

    #[test]
    fn test_dpcm_trigger_sequence() {
        let fx = dpcm_fixture();
        let ctx = fx.ctx();
        let mut h = ChannelHandler::new(ChannelType::Dpcm);
        let mut log = WriteLog::default();
        h.play_note(&Note::note(36).with_instrument(0), &ctx);
        h.process_channel(&ctx);
        h.refresh_channel(&mut log, &ctx);

        let addrs: Vec<u16> = log.writes.iter().map(|w| w.0).collect();
        assert_eq!(addrs, vec![0x4010, 0x4012, 0x4013, 0x4011, 0x4015, 0x4015]);
        assert_eq!(log.last(0x4010), Some(0x0F));
        assert_eq!(log.last(0x4013), Some(0x10), "257 bytes -> (257 - 1) / 16");
        assert_eq!(log.last(0x4015), Some(0x1F));
    }

    #[test]
    fn test_unmapped_dpcm_note_stops_playback() {
        let fx = dpcm_fixture();
        let ctx = fx.ctx();
        let mut h = ChannelHandler::new(ChannelType::Dpcm);
        let mut log = WriteLog::default();
        h.play_note(&Note::note(50).with_instrument(0), &ctx);
        h.process_channel(&ctx);
        h.refresh_channel(&mut log, &ctx);
        assert_eq!(log.writes, vec![(0x4015, 0x0F)]);
    }

    #[test]
    fn test_dac_write() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let mut h = ChannelHandler::new(ChannelType::Dpcm);
        let mut log = WriteLog::default();
        h.play_note(&Note::empty().with_effect(EffectKind::Dac, 0x7F), &ctx);
        h.refresh_channel(&mut log, &ctx);
        assert_eq!(log.writes, vec![(0x4011, 0x7F)]);
    }

    #[test]
    fn test_sweep_written_once() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let mut h = ChannelHandler::new(ChannelType::Square2);
        let mut log = WriteLog::default();
        h.play_note(&Note::note(45).with_effect(EffectKind::SweepUp, 0x92), &ctx);
        for _ in 0..3 {
            h.process_channel(&ctx);
            h.refresh_channel(&mut log, &ctx);
        }
        let sweeps: Vec<u8> = log
            .writes
            .iter()
            .filter(|w| w.0 == 0x4005)
            .map(|w| w.1)
            .collect();
        assert_eq!(sweeps, vec![0x88 | 0x12]);

        h.play_note(&Note::note(45), &ctx);
        h.process_channel(&ctx);
        h.refresh_channel(&mut log, &ctx);
        assert_eq!(log.last(0x4005), Some(0x08), "next plain note disables the sweep");
    }

    #[test]
    fn test_noise_register_inverts_note() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let mut h = ChannelHandler::new(ChannelType::Noise);
        let mut log = WriteLog::default();
        h.play_note(&Note::note(0x1C).with_effect(EffectKind::Duty, 1), &ctx);
        h.process_channel(&ctx);
        h.refresh_channel(&mut log, &ctx);
        assert_eq!(log.last(0x400E), Some(0x80 | (0x0C ^ 0x0F)));

        let halt = Note {
            value: NoteValue::Halt,
            ..Note::empty()
        };
        h.play_note(&halt, &ctx);
        h.refresh_channel(&mut log, &ctx);
        assert_eq!(log.last(0x400C), Some(0x30));
    }

    #[test]
    fn test_mmc5_pulse_has_no_sweep_register() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let mut h = ChannelHandler::new(ChannelType::Mmc5Pulse(1));
        let mut log = WriteLog::default();
        h.play_note(&Note::note(57), &ctx);
        h.process_channel(&ctx);
        h.refresh_channel(&mut log, &ctx);
        assert!(log.writes.iter().all(|w| (0x5004..=0x5007).contains(&w.0)));
        assert!(log.last(0x5005).is_none());
        assert_eq!(log.last(0x5006), Some(0xFD));
    }
}
