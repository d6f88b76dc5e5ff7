//! Nintendo MMC5 pulse pair
//!
//! Two 2A03-style pulse channels without sweep units at $5000–$5007, enabled
//! through $5015. Envelopes and length counters run from the mapper's own
//! 240 Hz divider.

use super::nes::Pulse;
use super::SoundChip;

/// CPU cycles per envelope/length clock
const QUARTER_FRAME: u32 = 7457;

/// MMC5 sound section
#[derive(Debug, Clone)]
pub struct Mmc5 {
    pulse: [Pulse; 2],
    divider: u32,
    odd_cycle: bool,
    half: bool,
}

impl Default for Mmc5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmc5 {
    /// Silent chip
    pub fn new() -> Self {
        Mmc5 {
            pulse: [Pulse::new(false), Pulse::new(false)],
            divider: 0,
            odd_cycle: false,
            half: false,
        }
    }

    /// Raw pulse levels (0..15)
    pub fn levels(&self) -> [u8; 2] {
        [self.pulse[0].output(false), self.pulse[1].output(false)]
    }
}

impl SoundChip for Mmc5 {
    fn reset(&mut self) {
        *self = Mmc5::new();
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x5000..=0x5007 => {
                let pulse = &mut self.pulse[((addr >> 2) & 1) as usize];
                match addr & 3 {
                    0 => pulse.write_control(data),
                    2 => pulse.write_timer_low(data),
                    3 => pulse.write_timer_high(data),
                    _ => {}
                }
            }
            0x5015 => {
                self.pulse[0].set_enabled(data & 1 != 0);
                self.pulse[1].set_enabled(data & 2 != 0);
            }
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.divider += 1;
            if self.divider >= QUARTER_FRAME {
                self.divider = 0;
                self.half = !self.half;
                for pulse in &mut self.pulse {
                    pulse.clock_envelope();
                    if self.half {
                        pulse.clock_length();
                    }
                }
            }
            self.odd_cycle = !self.odd_cycle;
            if self.odd_cycle {
                self.pulse[0].clock_timer();
                self.pulse[1].clock_timer();
            }
        }
    }

    fn output(&self) -> f32 {
        let [p1, p2] = self.levels();
        super::nes::pulse_table((p1 + p2) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_gates_output() {
        let mut chip = Mmc5::new();
        chip.write(0x5004, 0xBF);
        chip.write(0x5006, 0x80);
        chip.write(0x5007, 0x00);
        chip.clock(2000);
        assert_eq!(chip.levels()[1], 0, "disabled pulse has no length");

        chip.write(0x5015, 0x02);
        chip.write(0x5007, 0x00);
        let mut seen_high = false;
        for _ in 0..2000 {
            chip.clock(1);
            seen_high |= chip.levels()[1] == 15;
        }
        assert!(seen_high);
    }
}
