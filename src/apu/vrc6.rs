//! Konami VRC6: two pulse channels with 16-step duty and one sawtooth
//!
//! Registers $9000–$9002 (pulse 1), $A000–$A002 (pulse 2) and $B000–$B002
//! (sawtooth). Periods are 12 bits; the sawtooth accumulator is clocked
//! every other divider step and resets after seven additions.

use super::SoundChip;

#[derive(Debug, Clone, Default)]
struct Vrc6Pulse {
    duty: u8,
    volume: u8,
    digitized: bool,
    enabled: bool,
    period: u16,
    divider: u16,
    step: u8,
}

impl Vrc6Pulse {
    fn write(&mut self, reg: u16, data: u8) {
        match reg {
            0 => {
                self.digitized = data & 0x80 != 0;
                self.duty = (data >> 4) & 7;
                self.volume = data & 0x0F;
            }
            1 => self.period = (self.period & 0x0F00) | data as u16,
            _ => {
                self.period = (self.period & 0x00FF) | ((data & 0x0F) as u16) << 8;
                self.enabled = data & 0x80 != 0;
                if !self.enabled {
                    self.step = 15;
                }
            }
        }
    }

    fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        if self.divider == 0 {
            self.divider = self.period;
            self.step = self.step.wrapping_sub(1) & 15;
        } else {
            self.divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        if self.digitized || self.step <= self.duty {
            self.volume
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Sawtooth {
    rate: u8,
    enabled: bool,
    period: u16,
    divider: u16,
    step: u8,
    accumulator: u8,
}

impl Sawtooth {
    fn write(&mut self, reg: u16, data: u8) {
        match reg {
            0 => self.rate = data & 0x3F,
            1 => self.period = (self.period & 0x0F00) | data as u16,
            _ => {
                self.period = (self.period & 0x00FF) | ((data & 0x0F) as u16) << 8;
                self.enabled = data & 0x80 != 0;
                if !self.enabled {
                    self.step = 0;
                    self.accumulator = 0;
                }
            }
        }
    }

    fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        if self.divider > 0 {
            self.divider -= 1;
            return;
        }
        self.divider = self.period;
        self.step += 1;
        if self.step >= 14 {
            self.step = 0;
            self.accumulator = 0;
        } else if self.step % 2 == 0 {
            self.accumulator = self.accumulator.wrapping_add(self.rate);
        }
    }

    /// Top five bits of the accumulator
    fn output(&self) -> u8 {
        if self.enabled {
            self.accumulator >> 3
        } else {
            0
        }
    }
}

/// VRC6 sound section
#[derive(Debug, Clone, Default)]
pub struct Vrc6 {
    pulse: [Vrc6Pulse; 2],
    saw: Sawtooth,
}

impl Vrc6 {
    /// Silent chip
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw levels: pulse 1, pulse 2 (0..15), sawtooth (0..31)
    pub fn levels(&self) -> [u8; 3] {
        [self.pulse[0].output(), self.pulse[1].output(), self.saw.output()]
    }
}

/// Output per unit of VRC6 volume, matched to a 2A03 pulse at the same volume
const VRC6_UNIT: f32 = 0.1494 / 15.0;

impl SoundChip for Vrc6 {
    fn reset(&mut self) {
        *self = Vrc6::new();
    }

    fn write(&mut self, addr: u16, data: u8) {
        let reg = addr & 3;
        if reg > 2 {
            return;
        }
        match addr & 0xF000 {
            0x9000 => self.pulse[0].write(reg, data),
            0xA000 => self.pulse[1].write(reg, data),
            0xB000 => self.saw.write(reg, data),
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.pulse[0].clock();
            self.pulse[1].clock();
            self.saw.clock();
        }
    }

    fn output(&self) -> f32 {
        let [p1, p2, saw] = self.levels();
        (p1 as f32 + p2 as f32 + saw as f32) * VRC6_UNIT
    }
}
