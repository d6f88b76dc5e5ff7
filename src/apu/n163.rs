//! Namco 163 wavetable channels
//!
//! The chip holds 128 bytes of internal RAM reached through the address port
//! at $F800 (bit 7 enables auto-increment) and the data port at $4800. The
//! top of RAM holds up to eight channel register blocks, the rest is 4-bit
//! wave data. One channel is updated every 15 CPU cycles, round-robin from
//! the highest block down.

use super::SoundChip;

/// CPU cycles per channel update
const CYCLES_PER_CHANNEL: u32 = 15;

/// N163 sound section
#[derive(Debug, Clone)]
pub struct N163 {
    ram: [u8; 0x80],
    address: u8,
    auto_increment: bool,
    divider: u32,
    current: usize,
    outputs: [i8; 8],
    multiplex: bool,
}

impl Default for N163 {
    fn default() -> Self {
        Self::new()
    }
}

impl N163 {
    /// Silent chip
    pub fn new() -> Self {
        N163 {
            ram: [0; 0x80],
            address: 0,
            auto_increment: false,
            divider: 0,
            current: 0,
            outputs: [0; 8],
            multiplex: true,
        }
    }

    /// Output only the channel being updated (hardware behavior) or the
    /// average of all enabled channels
    pub fn set_multiplex(&mut self, multiplex: bool) {
        self.multiplex = multiplex;
    }

    /// Number of enabled channels (1..=8), from register $7F
    pub fn channel_count(&self) -> usize {
        ((self.ram[0x7F] >> 4) & 7) as usize + 1
    }

    fn base(channel: usize) -> usize {
        0x78 - channel * 8
    }

    fn step_channel(&mut self, channel: usize) {
        let base = Self::base(channel);
        let regs = &self.ram[base..base + 8];
        let freq = regs[0] as u32 | (regs[2] as u32) << 8 | ((regs[4] & 3) as u32) << 16;
        let length = 256 - (regs[4] & 0xFC) as u32;
        let offset = regs[6] as u32;
        let volume = (regs[7] & 0x0F) as i32;
        let mut phase = regs[1] as u32 | (regs[3] as u32) << 8 | (regs[5] as u32) << 16;

        phase = (phase + freq) % (length << 16);
        let index = ((phase >> 16) + offset) & 0xFF;
        let byte = self.ram[(index >> 1) as usize & 0x7F];
        let sample = if index & 1 == 0 { byte & 0x0F } else { byte >> 4 } as i32;
        self.outputs[channel] = ((sample - 8) * volume / 8) as i8;

        self.ram[base + 1] = phase as u8;
        self.ram[base + 3] = (phase >> 8) as u8;
        self.ram[base + 5] = (phase >> 16) as u8;
    }

    /// Per-channel signed outputs (-15..15)
    pub fn levels(&self) -> [i8; 8] {
        self.outputs
    }
}

/// Output per unit of channel level
const N163_UNIT: f32 = 0.2 / 15.0;

impl SoundChip for N163 {
    fn reset(&mut self) {
        let multiplex = self.multiplex;
        *self = N163::new();
        self.multiplex = multiplex;
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0xF800 => {
                self.address = data & 0x7F;
                self.auto_increment = data & 0x80 != 0;
            }
            0x4800 => {
                self.ram[self.address as usize] = data;
                if self.auto_increment {
                    self.address = (self.address + 1) & 0x7F;
                }
            }
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.divider += 1;
            if self.divider < CYCLES_PER_CHANNEL {
                continue;
            }
            self.divider = 0;
            let count = self.channel_count();
            self.current = (self.current + 1) % count;
            self.step_channel(self.current);
        }
    }

    fn output(&self) -> f32 {
        let count = self.channel_count();
        if self.multiplex {
            self.outputs[self.current.min(count - 1)] as f32 * N163_UNIT
        } else {
            let sum: i32 = self.outputs[..count].iter().map(|&v| v as i32).sum();
            sum as f32 * N163_UNIT / count as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_square(chip: &mut N163) {
        // 8-sample wave at RAM offset 0: four high, four low
        chip.write(0xF800, 0x80);
        for _ in 0..2 {
            chip.write(0x4800, 0xFF);
        }
        for _ in 0..2 {
            chip.write(0x4800, 0x00);
        }
        // channel block at $78
        chip.write(0xF800, 0x80 | 0x78);
        for value in [0x00, 0x00, 0x40, 0x00, (256 - 8) as u8, 0x00, 0x00, 0x0F] {
            chip.write(0x4800, value);
        }
    }

    #[test]
    fn test_single_channel_plays_wave() {
        let mut chip = N163::new();
        load_square(&mut chip);
        assert_eq!(chip.channel_count(), 1);
        let mut levels = std::collections::BTreeSet::new();
        for _ in 0..4000 {
            chip.clock(15);
            levels.insert(chip.levels()[0]);
        }
        assert!(levels.contains(&13), "high half: (15 - 8) * 15 / 8");
        assert!(levels.contains(&-15), "low half: (0 - 8) * 15 / 8");
    }

    #[test]
    fn test_channel_count_from_register() {
        let mut chip = N163::new();
        chip.write(0xF800, 0x7F);
        chip.write(0x4800, 0x30);
        assert_eq!(chip.channel_count(), 4);
    }

    #[test]
    fn test_mixing_modes() {
        let mut chip = N163::new();
        load_square(&mut chip);
        chip.clock(15 * 3);
        let muxed = chip.output();
        chip.set_multiplex(false);
        assert_eq!(chip.output(), muxed, "one channel: both modes agree");
    }
}
