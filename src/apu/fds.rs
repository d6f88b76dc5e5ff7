//! Famicom Disk System wavetable channel
//!
//! A 64-step, 6-bit wavetable ($4040–$407F) played by a 12-bit frequency
//! accumulator, with a 32-entry modulation table (each entry played twice) bending the pitch. Only the
//! direct gain mode of the volume and modulation envelopes is emulated; the
//! sound driver always writes gains directly.

use super::SoundChip;

/// Modulation table step values; 4 resets the counter
const MOD_STEPS: [i32; 8] = [0, 1, 2, 4, 0, -4, -2, -1];

/// Master volume multipliers (numerator over 30)
const MASTER_VOLUME: [i32; 4] = [30, 20, 15, 12];

/// FDS sound section
#[derive(Debug, Clone)]
pub struct Fds {
    wave: [u8; 64],
    wave_write: bool,
    master: usize,
    gain: u8,
    freq: u16,
    wave_halt: bool,
    wave_acc: u32,
    mod_table: [u8; 64],
    mod_pos: usize,
    mod_counter: i32,
    mod_gain: u8,
    mod_freq: u16,
    mod_halt: bool,
    mod_acc: u32,
    /// Write position for $4088
    mod_write: usize,
    output: i32,
}

impl Default for Fds {
    fn default() -> Self {
        Self::new()
    }
}

impl Fds {
    /// Silent chip
    pub fn new() -> Self {
        Fds {
            wave: [0; 64],
            wave_write: false,
            master: 0,
            gain: 0,
            freq: 0,
            wave_halt: true,
            wave_acc: 0,
            mod_table: [0; 64],
            mod_pos: 0,
            mod_counter: 0,
            mod_gain: 0,
            mod_freq: 0,
            mod_halt: true,
            mod_acc: 0,
            mod_write: 0,
            output: 0,
        }
    }

    /// Signed 7-bit modulation counter
    pub fn mod_counter(&self) -> i32 {
        self.mod_counter
    }

    /// Wave output level before master volume (0..63 * 32)
    pub fn level(&self) -> i32 {
        self.output
    }

    fn step_mod(&mut self) {
        let step = self.mod_table[self.mod_pos] as usize & 7;
        if step == 4 {
            self.mod_counter = 0;
        } else {
            self.mod_counter += MOD_STEPS[step];
            if self.mod_counter > 63 {
                self.mod_counter -= 128;
            } else if self.mod_counter < -64 {
                self.mod_counter += 128;
            }
        }
        self.mod_pos = (self.mod_pos + 1) & 63;
    }

    /// Pitch after modulation
    fn modulated_pitch(&self) -> i32 {
        let pitch = self.freq as i32;
        if self.mod_halt || self.mod_gain == 0 {
            return pitch;
        }
        let mut temp = self.mod_counter * self.mod_gain as i32;
        let remainder = temp & 0x0F;
        temp >>= 4;
        if remainder > 0 && temp & 0x80 == 0 {
            temp += if self.mod_counter < 0 { -1 } else { 2 };
        }
        if temp >= 192 {
            temp -= 256;
        } else if temp < -64 {
            temp += 256;
        }
        temp *= pitch;
        let remainder = temp & 0x3F;
        temp >>= 6;
        if remainder >= 32 {
            temp += 1;
        }
        (pitch + temp).max(0)
    }
}

/// Output per unit of wave * gain, about 2.4x a 2A03 pulse at full scale
const FDS_UNIT: f32 = 0.36 / (63.0 * 32.0);

impl SoundChip for Fds {
    fn reset(&mut self) {
        *self = Fds::new();
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x4040..=0x407F => {
                if self.wave_write {
                    self.wave[(addr - 0x4040) as usize] = data & 0x3F;
                }
            }
            0x4080 => {
                if data & 0x80 != 0 {
                    self.gain = data & 0x3F;
                }
            }
            0x4082 => self.freq = (self.freq & 0x0F00) | data as u16,
            0x4083 => {
                self.freq = (self.freq & 0x00FF) | ((data & 0x0F) as u16) << 8;
                self.wave_halt = data & 0x80 != 0;
                if self.wave_halt {
                    self.wave_acc = 0;
                }
            }
            0x4084 => {
                if data & 0x80 != 0 {
                    self.mod_gain = data & 0x3F;
                }
            }
            0x4085 => {
                let raw = (data & 0x7F) as i32;
                self.mod_counter = if raw >= 64 { raw - 128 } else { raw };
            }
            0x4086 => self.mod_freq = (self.mod_freq & 0x0F00) | data as u16,
            0x4087 => {
                self.mod_freq = (self.mod_freq & 0x00FF) | ((data & 0x0F) as u16) << 8;
                self.mod_halt = data & 0x80 != 0;
                if self.mod_halt {
                    self.mod_acc = 0;
                    self.mod_write = self.mod_pos;
                }
            }
            0x4088 => {
                if self.mod_halt {
                    // each write fills two consecutive entries
                    self.mod_table[self.mod_write & 63] = data & 7;
                    self.mod_table[(self.mod_write + 1) & 63] = data & 7;
                    self.mod_write = (self.mod_write + 2) & 63;
                }
            }
            0x4089 => {
                self.wave_write = data & 0x80 != 0;
                self.master = (data & 3) as usize;
            }
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        for _ in 0..cycles {
            if !self.mod_halt && self.mod_freq > 0 {
                self.mod_acc += self.mod_freq as u32;
                if self.mod_acc >= 0x10000 {
                    self.mod_acc &= 0xFFFF;
                    self.step_mod();
                }
            }
            if !self.wave_halt && !self.wave_write {
                self.wave_acc = (self.wave_acc + self.modulated_pitch() as u32) & 0x3F_FFFF;
            }
        }
        let sample = if self.wave_write {
            0
        } else {
            self.wave[(self.wave_acc >> 16) as usize & 63] as i32
        };
        self.output = sample * self.gain.min(32) as i32;
    }

    fn output(&self) -> f32 {
        let scaled = self.output * MASTER_VOLUME[self.master] / 30;
        scaled as f32 * FDS_UNIT
    }
}
