//! Expansion chip register formats (VRC6, N163, FDS, VRC7, 5B)

use super::{Output, TickContext};
use crate::apu::ChipWriter;
use crate::instrument::Instrument;

/// Highest VRC7 F-number
const VRC7_FNUM_MAX: i32 = 0x1FF;

pub(crate) fn refresh_vrc6_pulse(index: u8, out: &Output, writer: &mut dyn ChipWriter) {
    let base = 0x9000 + 0x1000 * index as u16;
    let duty = (out.duty & 0x07) as u8;
    writer.write(base, (duty << 4) | out.volume.clamp(0, 15) as u8);
    if !out.gate {
        writer.write(base + 2, 0x00);
        return;
    }
    let period = out.period.clamp(0, 0xFFF) as u16;
    writer.write(base + 1, (period & 0xFF) as u8);
    writer.write(base + 2, 0x80 | (period >> 8) as u8);
}

pub(crate) fn refresh_vrc6_saw(out: &Output, writer: &mut dyn ChipWriter) {
    // duty bit 0 selects the high-rate range, which overflows the accumulator
    let rate = ((out.volume.clamp(0, 15) as u8) << 1) | (((out.duty & 0x01) as u8) << 5);
    writer.write(0xB000, rate & 0x3F);
    if !out.gate {
        writer.write(0xB002, 0x00);
        return;
    }
    let period = out.period.clamp(0, 0xFFF) as u16;
    writer.write(0xB001, (period & 0xFF) as u8);
    writer.write(0xB002, 0x80 | (period >> 8) as u8);
}

/// Namco 163 channel
#[derive(Debug, Clone)]
pub(crate) struct N163Voice {
    index: u8,
    wave_dirty: bool,
    loaded_wave: Option<usize>,
}

impl N163Voice {
    pub fn new(index: u8) -> Self {
        N163Voice {
            index: index & 7,
            wave_dirty: true,
            loaded_wave: None,
        }
    }

    pub fn wave_changed(&mut self) {
        self.wave_dirty = true;
    }

    pub fn refresh(
        &mut self,
        out: &Output,
        inst: Option<&Instrument>,
        writer: &mut dyn ChipWriter,
        ctx: &TickContext,
    ) {
        let count = ctx.n163_channels.clamp(1, 8) as u8;
        let base = 0x78 - 8 * self.index;
        let waves = inst.and_then(|i| i.n163.as_ref());

        let (length, position) = match waves {
            Some(w) if !w.waves.is_empty() => {
                let selected = (out.duty.max(0) as usize).min(w.waves.len() - 1);
                if self.wave_dirty || self.loaded_wave != Some(selected) {
                    upload_n163_wave(&w.waves[selected], w.position, writer);
                    self.loaded_wave = Some(selected);
                    self.wave_dirty = false;
                }
                (w.wave_len().clamp(4, 256), w.position)
            }
            _ => (16, 0),
        };

        let freq = out.period.clamp(0, 0x3FFFF) as u32;
        let volume = out.volume.clamp(0, 15) as u8;
        let length_reg = (256 - length as u32) as u8 & 0xFC;
        let registers = [
            (base, (freq & 0xFF) as u8),
            (base + 2, ((freq >> 8) & 0xFF) as u8),
            (base + 4, length_reg | ((freq >> 16) & 0x03) as u8),
            (base + 6, position),
            (base + 7, ((count - 1) << 4) | volume),
        ];
        for (reg, value) in registers {
            writer.write(0xF800, reg);
            writer.write(0x4800, value);
        }
    }
}

/// Write 4-bit samples into N163 RAM, two per byte, low nibble first
fn upload_n163_wave(samples: &[u8], position: u8, writer: &mut dyn ChipWriter) {
    writer.write(0xF800, 0x80 | (position >> 1));
    for pair in samples.chunks(2) {
        let low = pair[0] & 0x0F;
        let high = pair.get(1).copied().unwrap_or(0) & 0x0F;
        writer.write(0x4800, low | (high << 4));
    }
}

/// FDS channel
#[derive(Debug, Clone)]
pub(crate) struct FdsVoice {
    wave_dirty: bool,
    mod_delay: u8,
}

impl Default for FdsVoice {
    fn default() -> Self {
        FdsVoice {
            wave_dirty: true,
            mod_delay: 0,
        }
    }
}

impl FdsVoice {
    pub fn wave_changed(&mut self) {
        self.wave_dirty = true;
    }

    pub fn trigger(&mut self, inst: Option<&Instrument>) {
        self.mod_delay = inst
            .and_then(|i| i.fds.as_ref())
            .map_or(0, |f| f.mod_delay);
    }

    pub fn refresh(&mut self, out: &Output, inst: Option<&Instrument>, writer: &mut dyn ChipWriter) {
        let fds = inst.and_then(|i| i.fds.as_ref());
        if let Some(fds) = fds.filter(|_| self.wave_dirty) {
            writer.write(0x4089, 0x80);
            for i in 0..64 {
                let sample = fds.wave.get(i).copied().unwrap_or(0);
                writer.write(0x4040 + i as u16, sample & 0x3F);
            }
            writer.write(0x4089, 0x00);

            writer.write(0x4087, 0x80);
            writer.write(0x4085, 0x00);
            for i in 0..32 {
                writer.write(0x4088, fds.modulation.get(i).copied().unwrap_or(0) & 0x07);
            }
            self.wave_dirty = false;
        }

        if !out.gate {
            writer.write(0x4080, 0x80);
            writer.write(0x4083, 0x80);
            return;
        }

        let freq = out.period.clamp(0, 0xFFF) as u16;
        writer.write(0x4080, 0x80 | (out.volume.clamp(0, 15) as u8) << 1);
        writer.write(0x4082, (freq & 0xFF) as u8);
        writer.write(0x4083, (freq >> 8) as u8);

        let Some(fds) = fds else {
            return;
        };
        if self.mod_delay > 0 {
            self.mod_delay -= 1;
            writer.write(0x4087, 0x80);
        } else if fds.mod_depth > 0 && fds.mod_speed > 0 {
            writer.write(0x4084, 0x80 | (fds.mod_depth & 0x3F));
            writer.write(0x4086, (fds.mod_speed & 0xFF) as u8);
            writer.write(0x4087, ((fds.mod_speed >> 8) & 0x0F) as u8);
        } else {
            writer.write(0x4087, 0x80);
        }
    }
}

/// Block needed to express a linear VRC7 frequency with a 9-bit F-number
pub(crate) fn vrc7_block(value: i32) -> u32 {
    let mut value = value.max(0);
    let mut block = 0;
    while value > VRC7_FNUM_MAX && block < 7 {
        value >>= 1;
        block += 1;
    }
    block
}

/// VRC7 FM channel
#[derive(Debug, Clone)]
pub(crate) struct Vrc7Voice {
    index: u8,
    patch_dirty: bool,
}

impl Vrc7Voice {
    pub fn new(index: u8) -> Self {
        Vrc7Voice {
            index: index.min(5),
            patch_dirty: true,
        }
    }

    pub fn patch_changed(&mut self) {
        self.patch_dirty = true;
    }

    pub fn refresh(&mut self, out: &Output, inst: Option<&Instrument>, writer: &mut dyn ChipWriter) {
        let c = self.index;
        let patch = inst.and_then(|i| i.vrc7.as_ref());
        let patch_number = patch.map_or(1, |p| p.patch & 0x0F);
        if let Some(p) = patch.filter(|p| p.patch == 0 && self.patch_dirty) {
            for (reg, value) in p.custom.iter().enumerate() {
                writer.write(0x9010, reg as u8);
                writer.write(0x9030, *value);
            }
        }
        self.patch_dirty = false;

        let block = vrc7_block(out.period);
        let fnum = ((out.period.max(0) >> block) & VRC7_FNUM_MAX) as u16;
        // gated: a cut or halted voice drops to minimum volume instead of decaying
        let volume = out.volume.clamp(0, 15) as u8;

        writer.write(0x9010, 0x30 + c);
        writer.write(0x9030, (patch_number << 4) | (15 - volume));
        writer.write(0x9010, 0x10 + c);
        writer.write(0x9030, (fnum & 0xFF) as u8);

        let pitch = ((block as u8) << 1) | (fnum >> 8) as u8;
        let control = if !out.gate {
            pitch
        } else if out.released {
            0x20 | pitch
        } else {
            if out.triggered {
                writer.write(0x9010, 0x20 + c);
                writer.write(0x9030, pitch);
            }
            0x10 | pitch
        };
        writer.write(0x9010, 0x20 + c);
        writer.write(0x9030, control);
    }
}

pub(crate) fn refresh_s5b(index: u8, out: &Output, writer: &mut dyn ChipWriter) {
    let c = index.min(2);
    let period = out.period.clamp(0, 0xFFF) as u16;
    let registers = [
        (2 * c, (period & 0xFF) as u8),
        (2 * c + 1, (period >> 8) as u8),
        (8 + c, out.volume.clamp(0, 15) as u8),
    ];
    for (reg, value) in registers {
        writer.write(0xC000, reg);
        writer.write(0xE000, value);
    }
}

/// Register 7 bits a channel enables: tone for duty 0, noise for 1, both for 2
pub(crate) fn s5b_mixer_enable(index: u8, duty: i32) -> u8 {
    let c = index.min(2);
    let tone = 1 << c;
    let noise = 8 << c;
    match duty {
        1 => noise,
        2 => tone | noise,
        _ => tone,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{Fixture, WriteLog};
    use super::super::{ChannelHandler, ChannelSet};
    use super::*;
    use crate::chip::{channel_layout, ChannelType, Chip, ChipMask};
    use crate::document::{EffectKind, Note, NoteValue};
    use crate::instrument::{FdsWave, N163Wave, Vrc7Patch};

    fn run(h: &mut ChannelHandler, fx: &Fixture, log: &mut WriteLog, note: Note) {
        let ctx = fx.ctx();
        h.play_note(&note, &ctx);
        h.process_channel(&ctx);
        h.refresh_channel(log, &ctx);
    }

    #[test]
    fn test_vrc6_pulse_registers() {
        let fx = Fixture::new();
        let mut h = ChannelHandler::new(ChannelType::Vrc6Pulse(1));
        let mut log = WriteLog::default();
        run(&mut h, &fx, &mut log, Note::note(57).with_effect(EffectKind::Duty, 7));
        assert_eq!(log.last(0xA000), Some(0x7F));
        assert_eq!(log.last(0xA001), Some(0xFD));
        assert_eq!(log.last(0xA002), Some(0x80));
    }

    #[test]
    fn test_vrc6_saw_rate_follows_volume() {
        let fx = Fixture::new();
        let mut h = ChannelHandler::new(ChannelType::Vrc6Sawtooth);
        let mut log = WriteLog::default();
        run(&mut h, &fx, &mut log, Note::note(45).with_volume(0x0A));
        assert_eq!(log.last(0xB000), Some(20));
        assert_eq!(log.last(0xB002).map(|v| v & 0x80), Some(0x80));
    }

    #[test]
    fn test_n163_wave_upload_and_registers() {
        let mut fx = Fixture::new();
        let mut inst = Instrument::new("wave", Chip::N163);
        inst.n163 = Some(N163Wave {
            waves: vec![(0..16).collect()],
            position: 0,
        });
        fx.doc.set_instrument(2, inst);
        let mut h = ChannelHandler::new(ChannelType::N163(0));
        let mut log = WriteLog::default();
        run(&mut h, &fx, &mut log, Note::note(57).with_instrument(2));

        assert_eq!(log.writes[0], (0xF800, 0x80));
        assert_eq!(log.writes[1], (0x4800, 0x10), "samples 0 and 1 packed low nibble first");
        let expected = fx.tables.read(crate::tables::NoteTable::N163, 57) * 16;
        let value = |reg: u8| {
            log.writes
                .windows(2)
                .rev()
                .find(|w| w[0] == (0xF800, reg))
                .map(|w| w[1].1 as u32)
                .unwrap_or(0)
        };
        let freq = value(0x78) | value(0x7A) << 8 | (value(0x7C) & 3) << 16;
        assert_eq!(freq, expected);
        assert_eq!(value(0x7C) & 0xFC, 0xF0, "16-sample wave");
        assert_eq!(value(0x7F), 0x0F);
    }

    #[test]
    fn test_fds_wave_and_halt() {
        let mut fx = Fixture::new();
        let mut inst = Instrument::new("fds", Chip::Fds);
        inst.fds = Some(FdsWave {
            wave: vec![63; 64],
            modulation: vec![1; 32],
            mod_speed: 0x123,
            mod_depth: 8,
            mod_delay: 0,
        });
        fx.doc.set_instrument(0, inst);
        let mut h = ChannelHandler::new(ChannelType::Fds);
        let mut log = WriteLog::default();
        run(&mut h, &fx, &mut log, Note::note(57).with_instrument(0));
        assert_eq!(log.writes.iter().filter(|w| w.0 == 0x4088).count(), 32);
        assert_eq!(log.last(0x4080), Some(0x80 | 30));
        assert_eq!(log.last(0x4084), Some(0x88));
        assert_eq!(log.last(0x4086), Some(0x23));
        assert_eq!(log.last(0x4087), Some(0x01));

        let halt = Note {
            value: NoteValue::Halt,
            ..Note::empty()
        };
        run(&mut h, &fx, &mut log, halt);
        assert_eq!(log.last(0x4083), Some(0x80));
    }

    #[test]
    fn test_vrc7_key_on_and_release() {
        let mut fx = Fixture::new();
        let mut inst = Instrument::new("fm", Chip::Vrc7);
        inst.vrc7 = Some(Vrc7Patch {
            patch: 3,
            custom: [0; 8],
        });
        fx.doc.set_instrument(0, inst);
        let mut h = ChannelHandler::new(ChannelType::Vrc7(2));
        let mut log = WriteLog::default();
        run(&mut h, &fx, &mut log, Note::note(57).with_instrument(0));

        let regs: Vec<(u8, u8)> = log
            .writes
            .chunks(2)
            .map(|w| (w[0].1, w[1].1))
            .collect();
        let control: Vec<u8> = regs.iter().filter(|r| r.0 == 0x22).map(|r| r.1).collect();
        assert_eq!(control.len(), 2, "key off then key on");
        assert_eq!(control[0] & 0x10, 0);
        assert_eq!(control[1] & 0x10, 0x10);
        assert_eq!((control[1] >> 1) & 7, 4, "A-4 plays in block 4");
        assert!(regs.contains(&(0x32, 0x30)));

        let release = Note {
            value: NoteValue::Release,
            ..Note::empty()
        };
        log.writes.clear();
        run(&mut h, &fx, &mut log, release);
        assert_eq!(log.last(0x9030).map(|v| v & 0x30), Some(0x20), "sustain, key off");
    }

    #[test]
    fn test_vrc7_cut_writes_minimum_volume() {
        let fx = Fixture::new();
        let mut h = ChannelHandler::new(ChannelType::Vrc7(1));
        let mut log = WriteLog::default();
        run(&mut h, &fx, &mut log, Note::note(57).with_volume(15));

        let halt = Note {
            value: NoteValue::Halt,
            ..Note::empty()
        };
        log.writes.clear();
        run(&mut h, &fx, &mut log, halt);
        let regs: Vec<(u8, u8)> = log
            .writes
            .chunks(2)
            .map(|w| (w[0].1, w[1].1))
            .collect();
        let volume = regs.iter().rev().find(|r| r.0 == 0x31).map(|r| r.1);
        let control = regs.iter().rev().find(|r| r.0 == 0x21).map(|r| r.1);
        assert_eq!(volume.map(|v| v & 0x0F), Some(0x0F), "attenuation at maximum");
        assert_eq!(control.map(|v| v & 0x30), Some(0x00), "key off without sustain");
    }

    #[test]
    fn test_vrc7_block_split() {
        assert_eq!(vrc7_block(300), 0);
        assert_eq!(vrc7_block(300 << 3), 3);
        assert_eq!(vrc7_block(0x1FF << 7), 7);
    }

    #[test]
    fn test_s5b_mixer_combines_channels() {
        let fx = Fixture::new();
        let layout = channel_layout(ChipMask::S5B, 1);
        let mut set = ChannelSet::new(&layout);
        let mut log = WriteLog::default();
        let ctx = fx.ctx();
        set.init_chips(ChipMask::S5B, 1, &mut log);
        let first_s5b = layout
            .iter()
            .position(|c| c.channel == ChannelType::S5B(0))
            .unwrap();
        if let Some(h) = set.get_mut(first_s5b) {
            h.play_note(&Note::note(57), &ctx);
        }
        if let Some(h) = set.get_mut(first_s5b + 1) {
            h.play_note(&Note::note(45).with_effect(EffectKind::Duty, 1), &ctx);
        }
        set.process(&ctx);
        set.refresh(&mut log, &ctx);
        let mixer = log
            .writes
            .windows(2)
            .rev()
            .find(|w| w[0] == (0xC000, 0x07))
            .map(|w| w[1].1);
        assert_eq!(mixer, Some(0x3F & !0x01 & !0x10));
    }
}
