//! Register shadow and write capture
//!
//! [`RegisterBank`] mirrors every byte written to every chip, keyed by the
//! chip's internal register index. Indirectly addressed chips (VRC7, N163,
//! 5B) are decoded through their address latches so observers see the same
//! register numbers a hardware reference would use.
//!
//! [`RegisterStream`] is the optional capture of raw bus writes used for
//! export; it can be dumped as CSV.

use crate::chip::Chip;
use crate::Result;
use serde::{Serialize, Serializer};
use std::io::Write;

/// Last value and write history of one register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterState {
    /// Last written byte
    pub value: u8,
    /// Total writes since the last reset
    pub writes: u32,
    /// Engine frame of the last write
    pub last_frame: u64,
}

impl RegisterState {
    /// Frames elapsed since the last write (`None` if never written)
    pub fn age(&self, current_frame: u64) -> Option<u64> {
        (self.writes > 0).then(|| current_frame.saturating_sub(self.last_frame))
    }
}

/// Number of shadowed registers per chip
const fn bank_size(chip: Chip) -> usize {
    match chip {
        Chip::Apu2A03 => 0x20,
        Chip::Vrc6 => 0x0C,
        Chip::Mmc5 => 0x20,
        Chip::Fds => 0x60,
        Chip::N163 => 0x80,
        Chip::Vrc7 => 0x40,
        Chip::S5B => 0x10,
    }
}

fn bank_index(chip: Chip) -> usize {
    match chip {
        Chip::Apu2A03 => 0,
        Chip::Vrc6 => 1,
        Chip::Vrc7 => 2,
        Chip::Fds => 3,
        Chip::Mmc5 => 4,
        Chip::N163 => 5,
        Chip::S5B => 6,
    }
}

/// Shadow copy of all chip registers
#[derive(Debug, Clone)]
pub struct RegisterBank {
    banks: [Vec<RegisterState>; 7],
    vrc7_latch: u8,
    n163_latch: u8,
    n163_auto_increment: bool,
    s5b_latch: u8,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    /// Empty bank
    pub fn new() -> Self {
        let mut banks: [Vec<RegisterState>; 7] = Default::default();
        for chip in Chip::ALL {
            banks[bank_index(chip)] = vec![RegisterState::default(); bank_size(chip)];
        }
        RegisterBank {
            banks,
            vrc7_latch: 0,
            n163_latch: 0,
            n163_auto_increment: false,
            s5b_latch: 0,
        }
    }

    /// Forget every write
    pub fn clear(&mut self) {
        for bank in &mut self.banks {
            bank.fill(RegisterState::default());
        }
        self.vrc7_latch = 0;
        self.n163_latch = 0;
        self.n163_auto_increment = false;
        self.s5b_latch = 0;
    }

    /// Record a bus write; address-port writes only move the latch
    pub fn record(&mut self, addr: u16, value: u8, frame: u64) {
        let Some((chip, reg)) = self.decode(addr, value) else {
            return;
        };
        if let Some(state) = self.banks[bank_index(chip)].get_mut(reg) {
            state.value = value;
            state.writes = state.writes.saturating_add(1);
            state.last_frame = frame;
        }
    }

    fn decode(&mut self, addr: u16, value: u8) -> Option<(Chip, usize)> {
        match addr {
            0x4000..=0x401F => Some((Chip::Apu2A03, (addr - 0x4000) as usize)),
            0x4040..=0x409F => Some((Chip::Fds, (addr - 0x4040) as usize)),
            0x5000..=0x501F => Some((Chip::Mmc5, (addr - 0x5000) as usize)),
            0x9010 => {
                self.vrc7_latch = value & 0x3F;
                None
            }
            0x9030 => Some((Chip::Vrc7, self.vrc7_latch as usize)),
            0x9000..=0x9002 | 0xA000..=0xA002 | 0xB000..=0xB002 => {
                let page = ((addr >> 12) - 9) as usize;
                Some((Chip::Vrc6, page * 4 + (addr & 3) as usize))
            }
            0xF800 => {
                self.n163_latch = value & 0x7F;
                self.n163_auto_increment = value & 0x80 != 0;
                None
            }
            0x4800 => {
                let reg = self.n163_latch as usize;
                if self.n163_auto_increment {
                    self.n163_latch = (self.n163_latch + 1) & 0x7F;
                }
                Some((Chip::N163, reg))
            }
            0xC000 => {
                self.s5b_latch = value & 0x0F;
                None
            }
            0xE000 => Some((Chip::S5B, self.s5b_latch as usize)),
            _ => None,
        }
    }

    /// Last value of a chip register (0 when out of range)
    pub fn get(&self, chip: Chip, reg: usize) -> u8 {
        self.state(chip, reg).value
    }

    /// Full state of a chip register
    pub fn state(&self, chip: Chip, reg: usize) -> RegisterState {
        self.banks[bank_index(chip)]
            .get(reg)
            .copied()
            .unwrap_or_default()
    }
}

/// One captured bus write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterWrite {
    /// Engine frame the write happened in
    pub frame: u64,
    /// CPU bus address
    #[serde(serialize_with = "hex_address")]
    pub address: u16,
    /// Written byte
    pub value: u8,
}

fn hex_address<S: Serializer>(addr: &u16, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format!("${addr:04X}"))
}

/// Ordered capture of register writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterStream {
    writes: Vec<RegisterWrite>,
}

impl RegisterStream {
    /// Empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write
    pub fn push(&mut self, frame: u64, address: u16, value: u8) {
        self.writes.push(RegisterWrite {
            frame,
            address,
            value,
        });
    }

    /// Captured writes in order
    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    /// Number of captured writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing was captured
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Remove and return all writes
    pub fn drain(&mut self) -> Vec<RegisterWrite> {
        std::mem::take(&mut self.writes)
    }

    /// Write the capture as `frame,address,value` CSV
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        for write in &self.writes {
            csv.serialize(write)?;
        }
        csv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_and_latched_registers() {
        let mut bank = RegisterBank::new();
        bank.record(0x4002, 0xFD, 3);
        bank.record(0x9010, 0x20, 3);
        bank.record(0x9030, 0x15, 4);
        bank.record(0xB002, 0x80, 4);

        assert_eq!(bank.get(Chip::Apu2A03, 2), 0xFD);
        assert_eq!(bank.get(Chip::Vrc7, 0x20), 0x15);
        assert_eq!(bank.get(Chip::Vrc6, 2 * 4 + 2), 0x80);
        let state = bank.state(Chip::Vrc7, 0x20);
        assert_eq!(state.last_frame, 4);
        assert_eq!(state.age(10), Some(6));
        assert_eq!(bank.state(Chip::S5B, 3).age(10), None);
    }

    #[test]
    fn test_n163_auto_increment() {
        let mut bank = RegisterBank::new();
        bank.record(0xF800, 0x80 | 0x7E, 0);
        bank.record(0x4800, 0x11, 0);
        bank.record(0x4800, 0x22, 0);
        assert_eq!(bank.get(Chip::N163, 0x7E), 0x11);
        assert_eq!(bank.get(Chip::N163, 0x7F), 0x22);
    }

    #[test]
    fn test_unknown_addresses_ignored() {
        let mut bank = RegisterBank::new();
        bank.record(0x1234, 0xFF, 0);
        assert_eq!(bank.get(Chip::Apu2A03, 0x40), 0, "out of range reads as zero");
    }

    #[test]
    fn test_stream_csv() {
        let mut stream = RegisterStream::new();
        stream.push(0, 0x4015, 0x0F);
        stream.push(1, 0x4000, 0x3F);
        let mut out = Vec::new();
        stream.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "frame,address,value\n0,$4015,15\n1,$4000,63\n");
    }
}
