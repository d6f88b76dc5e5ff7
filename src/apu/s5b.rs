//! Sunsoft 5B (YM2149-compatible PSG)
//!
//! Three square tone generators, a shared 17-bit LFSR noise source and a
//! 32-step hardware envelope, addressed through the register latch at $C000
//! and the data port at $E000. The chip's internal clock is the CPU clock
//! divided by 16; the noise generator runs at half that rate.

use super::SoundChip;

/// Logarithmic DAC levels for the 4-bit volume registers
pub const VOLUME_TABLE: [u16; 16] = [
    20, 53, 88, 125, 193, 258, 385, 525, 753, 1029, 1523, 2077, 3110, 4395, 7073, 10922,
];

/// Scale mapping [`VOLUME_TABLE`] entries to 0.0..1.0
const VOLUME_SCALE: f32 = 1.0 / 32767.0;

/// CPU cycles per internal PSG clock
const CLOCK_DIVIDER: u32 = 16;

/// Output weight of one channel at full volume relative to the 2A03
const S5B_LEVEL: f32 = 0.5;

/// Volume for a 4-bit amplitude (0..15)
#[inline]
pub fn get_volume(amplitude: u8) -> f32 {
    VOLUME_TABLE[(amplitude & 0x0F) as usize] as f32 * VOLUME_SCALE
}

/// Square tone generator with a 12-bit period
#[derive(Clone, Debug, Default)]
struct ToneGenerator {
    counter: u32,
    period: u32,
    high: bool,
}

impl ToneGenerator {
    #[inline]
    fn tick(&mut self) {
        self.counter += 1;
        if self.counter >= self.period.max(1) {
            self.high = !self.high;
            self.counter = 0;
        }
    }
}

/// 17-bit LFSR noise source with taps at bits 13 and 16
#[derive(Clone, Debug)]
struct NoiseGenerator {
    counter: u32,
    period: u32,
    lfsr: u32,
    high: bool,
    half_tick: bool,
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        NoiseGenerator {
            counter: 0,
            period: 0,
            lfsr: 1,
            high: false,
            half_tick: false,
        }
    }
}

impl NoiseGenerator {
    #[inline]
    fn tick(&mut self) {
        self.half_tick = !self.half_tick;
        if !self.half_tick {
            return;
        }
        self.counter += 1;
        if self.counter >= self.period.max(1) {
            let lsb = self.lfsr & 1;
            self.lfsr >>= 1;
            if lsb != 0 {
                self.lfsr ^= 0x12000;
            }
            self.high = lsb != 0;
            self.counter = 0;
        }
    }
}

/// Hardware envelope: 32 steps per cycle, shape bits CONT/ATT/ALT/HOLD
#[derive(Clone, Debug, Default)]
struct EnvelopeGenerator {
    counter: u32,
    period: u32,
    shape: u8,
    step: u32,
    holding: bool,
}

impl EnvelopeGenerator {
    fn set_shape(&mut self, shape: u8) {
        self.shape = shape & 0x0F;
        self.step = 0;
        self.counter = 0;
        self.holding = false;
    }

    #[inline]
    fn tick(&mut self) {
        if self.holding {
            return;
        }
        self.counter += 1;
        if self.counter < self.period.max(1) {
            return;
        }
        self.counter = 0;
        self.step += 1;
        if self.step >= 32 {
            let cont = self.shape & 0x08 != 0;
            let hold = self.shape & 0x01 != 0;
            if !cont || hold {
                self.holding = true;
                self.step = 31;
            } else {
                self.step = 0;
                if self.shape & 0x02 != 0 {
                    // alternate: flip attack direction each cycle
                    self.shape ^= 0x04;
                }
            }
        }
    }

    /// Level 0..31
    fn level(&self) -> u8 {
        let attack = self.shape & 0x04 != 0;
        let step = self.step.min(31) as u8;
        if self.holding {
            let cont = self.shape & 0x08 != 0;
            if !cont {
                return 0;
            }
            // hold keeps the final level, flipped when ALT is also set
            let alt = self.shape & 0x02 != 0;
            let end_high = attack != alt;
            return if end_high { 31 } else { 0 };
        }
        if attack {
            step
        } else {
            31 - step
        }
    }
}

/// Sunsoft 5B sound section
#[derive(Debug, Clone, Default)]
pub struct Sunsoft5B {
    registers: [u8; 16],
    latch: u8,
    tones: [ToneGenerator; 3],
    noise: NoiseGenerator,
    envelope: EnvelopeGenerator,
    divider: u32,
}

impl Sunsoft5B {
    /// Silent chip
    pub fn new() -> Self {
        Sunsoft5B {
            // all tone and noise outputs disabled
            registers: {
                let mut r = [0u8; 16];
                r[7] = 0x3F;
                r
            },
            ..Default::default()
        }
    }

    fn write_register(&mut self, reg: usize, value: u8) {
        self.registers[reg] = value;
        match reg {
            0..=5 => {
                let ch = reg / 2;
                let period = self.registers[ch * 2] as u32
                    | ((self.registers[ch * 2 + 1] & 0x0F) as u32) << 8;
                self.tones[ch].period = period;
            }
            6 => self.noise.period = (value & 0x1F) as u32,
            11 | 12 => {
                self.envelope.period =
                    self.registers[11] as u32 | (self.registers[12] as u32) << 8;
            }
            13 => self.envelope.set_shape(value),
            _ => {}
        }
    }

    /// Amplitude of one channel (0.0..1.0)
    pub fn channel_level(&self, ch: usize) -> f32 {
        let mixer = self.registers[7];
        let tone_on = mixer & (1 << ch) == 0;
        let noise_on = mixer & (8 << ch) == 0;
        let gate = (!tone_on || self.tones[ch].high) && (!noise_on || self.noise.high);
        if !gate {
            return 0.0;
        }
        let vol = self.registers[8 + ch];
        if vol & 0x10 != 0 {
            get_volume(self.envelope.level() >> 1)
        } else {
            get_volume(vol & 0x0F)
        }
    }
}

impl SoundChip for Sunsoft5B {
    fn reset(&mut self) {
        *self = Sunsoft5B::new();
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0xC000 => self.latch = data & 0x0F,
            0xE000 => self.write_register(self.latch as usize, data),
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= CLOCK_DIVIDER {
            self.divider -= CLOCK_DIVIDER;
            for tone in &mut self.tones {
                tone.tick();
            }
            self.noise.tick();
            self.envelope.tick();
        }
    }

    fn output(&self) -> f32 {
        (0..3).map(|ch| self.channel_level(ch)).sum::<f32>() * S5B_LEVEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(chip: &mut Sunsoft5B, reg: u8, value: u8) {
        chip.write(0xC000, reg);
        chip.write(0xE000, value);
    }

    #[test]
    fn test_volume_table_monotonic() {
        for i in 1..16 {
            assert!(VOLUME_TABLE[i] > VOLUME_TABLE[i - 1], "entry {i} not increasing");
        }
        assert!(get_volume(0) < 0.001);
        assert_eq!(get_volume(0x1F), get_volume(0x0F), "masked to four bits");
    }

    #[test]
    fn test_tone_toggles() {
        let mut chip = Sunsoft5B::new();
        set(&mut chip, 0, 0x10);
        set(&mut chip, 7, 0x3E); // tone A only
        set(&mut chip, 8, 0x0F);
        let mut seen = (false, false);
        for _ in 0..2000 {
            chip.clock(16);
            if chip.channel_level(0) > 0.0 {
                seen.0 = true;
            } else {
                seen.1 = true;
            }
        }
        assert!(seen.0 && seen.1, "square must reach both states");
    }

    #[test]
    fn test_disabled_mixer_outputs_constant_level() {
        let mut chip = Sunsoft5B::new();
        set(&mut chip, 8, 0x0F);
        chip.clock(1000);
        assert!((chip.channel_level(0) - get_volume(15)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_envelope_decay_holds_at_zero() {
        let mut chip = Sunsoft5B::new();
        set(&mut chip, 11, 1);
        set(&mut chip, 13, 0x00);
        set(&mut chip, 8, 0x10);
        chip.clock(16 * 100);
        assert_eq!(chip.envelope.level(), 0);
    }
}
