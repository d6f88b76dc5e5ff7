//! Konami VRC7 (OPLL-derived FM)
//!
//! Six two-operator FM channels addressed through $9010 (register select)
//! and $9030 (data). Fifteen instrument patches are built in, patch 0 is the
//! user patch in registers $00–$07. The synthesis runs at the chip's
//! 49.716 kHz internal rate (CPU clock / 36) with floating-point operators and
//! a simplified linear-in-dB envelope, which keeps the tone and dynamics of
//! each patch without modelling the OPLL's log-sin tables bit for bit.

use super::SoundChip;
use std::f32::consts::TAU;

/// CPU cycles per FM sample
const CYCLES_PER_FM_SAMPLE: u32 = 36;

/// Built-in patches 1..15 (registers $00..$07)
const PATCHES: [[u8; 8]; 15] = [
    [0x03, 0x21, 0x05, 0x06, 0xE8, 0x81, 0x42, 0x27],
    [0x13, 0x41, 0x14, 0x0D, 0xD8, 0xF6, 0x23, 0x12],
    [0x11, 0x11, 0x08, 0x08, 0xFA, 0xB2, 0x20, 0x12],
    [0x31, 0x61, 0x0C, 0x07, 0xA8, 0x64, 0x61, 0x27],
    [0x32, 0x21, 0x1E, 0x06, 0xE1, 0x76, 0x01, 0x28],
    [0x02, 0x01, 0x06, 0x00, 0xA3, 0xE2, 0xF4, 0xF4],
    [0x21, 0x61, 0x1D, 0x07, 0x82, 0x81, 0x11, 0x07],
    [0x23, 0x21, 0x22, 0x17, 0xA2, 0x72, 0x01, 0x17],
    [0x35, 0x11, 0x25, 0x00, 0x40, 0x73, 0x72, 0x01],
    [0xB5, 0x01, 0x0F, 0x0F, 0xA8, 0xA5, 0x51, 0x02],
    [0x17, 0xC1, 0x24, 0x07, 0xF8, 0xF8, 0x22, 0x12],
    [0x71, 0x23, 0x11, 0x06, 0x65, 0x74, 0x18, 0x16],
    [0x01, 0x02, 0xD3, 0x05, 0xC9, 0x95, 0x03, 0x02],
    [0x61, 0x63, 0x0C, 0x00, 0x94, 0xC0, 0x33, 0xF6],
    [0x21, 0x72, 0x0D, 0x00, 0xC1, 0xD5, 0x56, 0x06],
];

/// Frequency multipliers (x2) indexed by MULT
const MULTIPLIERS: [f32; 16] = [
    0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0, 12.0, 12.0, 15.0, 15.0,
];

/// Attenuation at which an envelope is treated as silent
const SILENT_DB: f32 = 48.0;

/// Built-in patch table entry, or `None` for the user patch
pub fn builtin_patch(index: u8) -> Option<[u8; 8]> {
    match index {
        1..=15 => Some(PATCHES[index as usize - 1]),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
    Release,
    #[default]
    Off,
}

/// Operator parameters decoded from a patch
#[derive(Debug, Clone, Copy, Default)]
struct OperatorParams {
    multiplier: f32,
    sustained: bool,
    total_level_db: f32,
    attack: u8,
    decay: u8,
    sustain_db: f32,
    release: u8,
    rectified: bool,
}

fn decode_patch(patch: &[u8; 8]) -> (OperatorParams, OperatorParams, u8) {
    let op = |flags: u8, ad: u8, sr: u8, tl_db: f32, rectified: bool| OperatorParams {
        multiplier: MULTIPLIERS[(flags & 0x0F) as usize],
        sustained: flags & 0x20 != 0,
        total_level_db: tl_db,
        attack: ad >> 4,
        decay: ad & 0x0F,
        sustain_db: (sr >> 4) as f32 * 3.0,
        release: sr & 0x0F,
        rectified,
    };
    let modulator = op(
        patch[0],
        patch[4],
        patch[6],
        (patch[2] & 0x3F) as f32 * 0.75,
        patch[3] & 0x08 != 0,
    );
    let carrier = op(patch[1], patch[5], patch[7], 0.0, patch[3] & 0x10 != 0);
    (modulator, carrier, patch[3] & 0x07)
}

/// dB change per FM sample for an envelope rate (0 = frozen)
fn rate_step(rate: u8, attack: bool) -> f32 {
    if rate == 0 {
        return 0.0;
    }
    let seconds = 10.0 / (1u32 << (rate - 1)) as f32;
    let samples = seconds * 49_716.0 / if attack { 5.0 } else { 1.0 };
    SILENT_DB / samples
}

#[derive(Debug, Clone, Copy, Default)]
struct Operator {
    phase: f32,
    attenuation: f32,
    state: EnvelopePhase,
    last: [f32; 2],
}

impl Operator {
    fn key_on(&mut self) {
        self.phase = 0.0;
        self.state = EnvelopePhase::Attack;
        self.attenuation = SILENT_DB;
    }

    fn key_off(&mut self) {
        if self.state != EnvelopePhase::Off {
            self.state = EnvelopePhase::Release;
        }
    }

    fn step_envelope(&mut self, p: &OperatorParams, sustain_on: bool) {
        match self.state {
            EnvelopePhase::Attack => {
                self.attenuation -= rate_step(p.attack, true);
                if self.attenuation <= 0.0 || p.attack == 15 {
                    self.attenuation = 0.0;
                    self.state = EnvelopePhase::Decay;
                }
            }
            EnvelopePhase::Decay => {
                self.attenuation += rate_step(p.decay, false);
                if self.attenuation >= p.sustain_db {
                    self.attenuation = p.sustain_db;
                    self.state = EnvelopePhase::Sustain;
                }
            }
            EnvelopePhase::Sustain => {
                if !p.sustained {
                    self.attenuation += rate_step(p.release, false);
                }
            }
            EnvelopePhase::Release => {
                let rate = if sustain_on { 5 } else { p.release };
                self.attenuation += rate_step(rate, false);
            }
            EnvelopePhase::Off => {}
        }
        if self.attenuation >= SILENT_DB {
            self.attenuation = SILENT_DB;
            if self.state != EnvelopePhase::Attack {
                self.state = EnvelopePhase::Off;
            }
        }
    }

    fn output(&mut self, increment: f32, p: &OperatorParams, modulation: f32, extra_db: f32) -> f32 {
        self.phase = (self.phase + increment * p.multiplier).fract();
        let mut wave = (TAU * (self.phase + modulation)).sin();
        if p.rectified && wave < 0.0 {
            wave = 0.0;
        }
        let db = self.attenuation + p.total_level_db + extra_db;
        let out = if db >= SILENT_DB {
            0.0
        } else {
            wave * 10f32.powf(-db / 20.0)
        };
        self.last = [self.last[1], out];
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FmChannel {
    fnum: u16,
    block: u8,
    key: bool,
    sustain: bool,
    patch: u8,
    volume: u8,
    modulator: Operator,
    carrier: Operator,
    output: f32,
}

/// VRC7 sound section
#[derive(Debug, Clone)]
pub struct Vrc7 {
    latch: u8,
    custom: [u8; 8],
    channels: [FmChannel; 6],
    divider: u32,
}

impl Default for Vrc7 {
    fn default() -> Self {
        Self::new()
    }
}

impl Vrc7 {
    /// Silent chip
    pub fn new() -> Self {
        Vrc7 {
            latch: 0,
            custom: [0; 8],
            channels: [FmChannel::default(); 6],
            divider: 0,
        }
    }

    fn patch_data(&self, patch: u8) -> [u8; 8] {
        builtin_patch(patch).unwrap_or(self.custom)
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x00..=0x07 => self.custom[reg as usize] = value,
            0x10..=0x15 => {
                let ch = &mut self.channels[(reg & 0x0F) as usize];
                ch.fnum = (ch.fnum & 0x100) | value as u16;
            }
            0x20..=0x25 => {
                let ch = &mut self.channels[(reg & 0x0F) as usize];
                ch.fnum = (ch.fnum & 0xFF) | ((value & 1) as u16) << 8;
                ch.block = (value >> 1) & 7;
                ch.sustain = value & 0x20 != 0;
                let key = value & 0x10 != 0;
                if key && !ch.key {
                    ch.modulator.key_on();
                    ch.carrier.key_on();
                } else if !key && ch.key {
                    ch.modulator.key_off();
                    ch.carrier.key_off();
                }
                ch.key = key;
            }
            0x30..=0x35 => {
                let ch = &mut self.channels[(reg & 0x0F) as usize];
                ch.patch = value >> 4;
                ch.volume = value & 0x0F;
            }
            _ => {}
        }
    }

    fn step(&mut self) {
        for index in 0..self.channels.len() {
            let patch = self.patch_data(self.channels[index].patch);
            let (mod_params, car_params, feedback) = decode_patch(&patch);
            let ch = &mut self.channels[index];
            let increment = ch.fnum as f32 * (1u32 << ch.block) as f32 / 524_288.0;

            ch.modulator.step_envelope(&mod_params, ch.sustain);
            ch.carrier.step_envelope(&car_params, ch.sustain);

            let fb = if feedback == 0 {
                0.0
            } else {
                (ch.modulator.last[0] + ch.modulator.last[1]) * 0.5 / (1u32 << (8 - feedback)) as f32
            };
            let modulation = ch.modulator.output(increment, &mod_params, fb, 0.0);
            let volume_db = ch.volume as f32 * 3.0;
            ch.output = ch.carrier.output(increment, &car_params, modulation, volume_db);
        }
    }

    /// Current output of each FM channel (-1.0..1.0)
    pub fn levels(&self) -> [f32; 6] {
        let mut out = [0.0; 6];
        for (o, ch) in out.iter_mut().zip(&self.channels) {
            *o = ch.output;
        }
        out
    }
}

/// Output weight of one FM channel at full scale
const VRC7_LEVEL: f32 = 0.15;

impl SoundChip for Vrc7 {
    fn reset(&mut self) {
        *self = Vrc7::new();
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x9010 => self.latch = data & 0x3F,
            0x9030 => self.write_register(self.latch, data),
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= CYCLES_PER_FM_SAMPLE {
            self.divider -= CYCLES_PER_FM_SAMPLE;
            self.step();
        }
    }

    fn output(&self) -> f32 {
        self.levels().iter().sum::<f32>() * VRC7_LEVEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(chip: &mut Vrc7, reg: u8, value: u8) {
        chip.write(0x9010, reg);
        chip.write(0x9030, value);
    }

    #[test]
    fn test_builtin_patches() {
        assert_eq!(builtin_patch(0), None);
        assert_eq!(builtin_patch(1).unwrap()[0], 0x03);
        assert_eq!(builtin_patch(15).unwrap()[7], 0x06);
        assert_eq!(builtin_patch(16), None);
    }

    #[test]
    fn test_key_on_produces_sound_and_release_fades() {
        let mut chip = Vrc7::new();
        set(&mut chip, 0x30, 0x10); // patch 1, full volume
        set(&mut chip, 0x10, 172);
        set(&mut chip, 0x20, 0x10 | (4 << 1));
        let mut peak = 0.0f32;
        for _ in 0..2000 {
            chip.clock(36);
            peak = peak.max(chip.levels()[0].abs());
        }
        assert!(peak > 0.1, "keyed channel should be audible, peak {peak}");

        set(&mut chip, 0x20, 4 << 1);
        for _ in 0..20_000 {
            chip.clock(36);
        }
        assert!(chip.levels()[0].abs() < 1e-3, "released channel must fade out");
    }

    #[test]
    fn test_idle_channels_silent() {
        let mut chip = Vrc7::new();
        chip.clock(36 * 100);
        assert_eq!(chip.output(), 0.0);
    }
}
