//! Period and vibrato lookup tables
//!
//! Period tables map a note number (0 = C-0 .. 95 = B-7) to the register value
//! that makes a channel oscillate at that pitch. Each chip family uses its own
//! formula: pulse/triangle dividers count down (period), while the FDS, N163 and
//! VRC7 use phase accumulators (frequency). Tables are pure functions of the
//! machine, the base (A-4) frequency and, for the N163, the channel count.
//!
//! The vibrato table holds one quarter wave for each of the 16 depths; channel
//! handlers mirror and negate it to build a full 64-phase cycle. Tremolo reads
//! the same table at half phase resolution.

use crate::chip::Machine;
use serde::{Deserialize, Serialize};

/// Number of notes in the standard 8-octave range
pub const NOTE_RANGE: usize = 96;

/// Length of the VRC7 F-number table (one octave)
pub const VRC7_TABLE_LEN: usize = 12;

/// Length of the vibrato table (16 depths x 16 quarter-wave phases)
pub const VIBRATO_LENGTH: usize = 256;

/// Default tuning of A-4 in Hz
pub const DEFAULT_BASE_FREQUENCY: f64 = 440.0;

/// Note number of A-4
const A4_NOTE: i32 = 57;

/// VRC7 FM sample rate (3.579545 MHz / 72)
const VRC7_RATE: f64 = 49_716.0;

const NEW_VIBRATO_DEPTH: [f64; 16] = [
    1.0, 1.5, 2.5, 4.0, 5.0, 7.0, 10.0, 12.0, 14.0, 17.0, 22.0, 30.0, 44.0, 64.0, 96.0, 128.0,
];

const OLD_VIBRATO_DEPTH: [f64; 16] = [
    1.0, 1.0, 2.0, 3.0, 4.0, 7.0, 8.0, 15.0, 16.0, 31.0, 32.0, 63.0, 64.0, 127.0, 128.0, 255.0,
];

/// Selects which period table a channel reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteTable {
    /// 2A03/VRC6/MMC5 pulse dividers at NTSC clock
    Ntsc,
    /// 2A03/VRC6/MMC5 pulse dividers at PAL clock
    Pal,
    /// VRC6 sawtooth divider
    Sawtooth,
    /// VRC7 F-numbers (single octave, block supplies the octave)
    Vrc7,
    /// FDS 12-bit frequency
    Fds,
    /// N163 18-bit frequency for a one-sample wave; scaled by wave length
    N163,
    /// Sunsoft 5B 12-bit tone period
    S5B,
}

/// Generated period tables for one machine and base frequency
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodTables {
    machine: Machine,
    base_frequency: f64,
    n163_channels: usize,
    ntsc: [u32; NOTE_RANGE],
    pal: [u32; NOTE_RANGE],
    sawtooth: [u32; NOTE_RANGE],
    fds: [u32; NOTE_RANGE],
    n163: [u32; NOTE_RANGE],
    s5b: [u32; NOTE_RANGE],
    vrc7: [u32; VRC7_TABLE_LEN],
}

impl PeriodTables {
    /// Compute every table for the given machine and A-4 frequency
    pub fn generate(machine: Machine, base_frequency: f64, n163_channels: usize) -> Self {
        let base = if base_frequency.is_finite() && base_frequency > 0.0 {
            base_frequency
        } else {
            DEFAULT_BASE_FREQUENCY
        };
        let channels = n163_channels.clamp(1, 8) as f64;
        let ntsc_clock = Machine::Ntsc.cpu_clock() as f64;
        let pal_clock = Machine::Pal.cpu_clock() as f64;
        let clock = machine.cpu_clock() as f64;

        let mut tables = PeriodTables {
            machine,
            base_frequency: base,
            n163_channels: n163_channels.clamp(1, 8),
            ntsc: [0; NOTE_RANGE],
            pal: [0; NOTE_RANGE],
            sawtooth: [0; NOTE_RANGE],
            fds: [0; NOTE_RANGE],
            n163: [0; NOTE_RANGE],
            s5b: [0; NOTE_RANGE],
            vrc7: [0; VRC7_TABLE_LEN],
        };

        for note in 0..NOTE_RANGE {
            let freq = note_frequency(base, note as i32);
            tables.ntsc[note] = divider(ntsc_clock / 16.0 / freq - 1.0);
            tables.pal[note] = divider(pal_clock / 16.0 / freq - 1.0);
            tables.sawtooth[note] = divider(clock / 14.0 / freq - 1.0);
            tables.s5b[note] = divider(clock / 32.0 / freq);
            tables.fds[note] = divider(freq * 4_194_304.0 / clock);
            tables.n163[note] = divider(freq * 15.0 * 65_536.0 * channels / clock);
            if note < VRC7_TABLE_LEN {
                tables.vrc7[note] = divider(freq * 524_288.0 / VRC7_RATE);
            }
        }

        tables
    }

    /// Machine the expansion tables were generated for
    pub fn machine(&self) -> Machine {
        self.machine
    }

    /// A-4 frequency the tables were generated from
    pub fn base_frequency(&self) -> f64 {
        self.base_frequency
    }

    /// N163 channel count the N163 table was scaled for
    pub fn n163_channels(&self) -> usize {
        self.n163_channels
    }

    /// Pulse table matching the generation machine
    pub fn machine_table(&self) -> NoteTable {
        match self.machine {
            Machine::Ntsc => NoteTable::Ntsc,
            Machine::Pal => NoteTable::Pal,
        }
    }

    /// Full table slice
    pub fn table(&self, table: NoteTable) -> &[u32] {
        match table {
            NoteTable::Ntsc => &self.ntsc,
            NoteTable::Pal => &self.pal,
            NoteTable::Sawtooth => &self.sawtooth,
            NoteTable::Vrc7 => &self.vrc7,
            NoteTable::Fds => &self.fds,
            NoteTable::N163 => &self.n163,
            NoteTable::S5B => &self.s5b,
        }
    }

    /// Look up a note; out-of-range notes clamp to the table ends
    ///
    /// The VRC7 table is indexed by pitch class only.
    pub fn read(&self, table: NoteTable, note: i32) -> u32 {
        match table {
            NoteTable::Vrc7 => self.vrc7[note.rem_euclid(VRC7_TABLE_LEN as i32) as usize],
            _ => self.table(table)[note.clamp(0, NOTE_RANGE as i32 - 1) as usize],
        }
    }
}

/// Frequency in Hz of a note number relative to the A-4 base frequency
pub fn note_frequency(base_frequency: f64, note: i32) -> f64 {
    base_frequency * 2f64.powf((note - A4_NOTE) as f64 / 12.0)
}

fn divider(value: f64) -> u32 {
    value.round().max(0.0) as u32
}

/// Vibrato depth curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VibratoMode {
    /// Legacy linear curve, offset towards positive pitch
    Old,
    /// Sine curve with symmetric depth
    #[default]
    New,
}

/// One full vibrato lookup table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VibratoTable {
    mode: VibratoMode,
    values: [i32; VIBRATO_LENGTH],
}

impl VibratoTable {
    /// Build the table for a depth curve
    pub fn generate(mode: VibratoMode) -> Self {
        let mut values = [0i32; VIBRATO_LENGTH];
        for depth in 0..16 {
            for phase in 0..16 {
                let value = match mode {
                    VibratoMode::New => {
                        let angle = (phase as f64 / 16.0) * (std::f64::consts::PI / 2.0);
                        (angle.sin() * NEW_VIBRATO_DEPTH[depth]) as i32
                    }
                    VibratoMode::Old => {
                        ((phase as f64 * OLD_VIBRATO_DEPTH[depth]) / 16.0 + 1.0) as i32
                    }
                };
                values[depth * 16 + phase] = value;
            }
        }
        VibratoTable { mode, values }
    }

    /// Curve this table was generated with
    pub fn mode(&self) -> VibratoMode {
        self.mode
    }

    /// Modulo-wrapped lookup
    #[inline]
    pub fn read(&self, index: i32) -> i32 {
        self.values[index.rem_euclid(VIBRATO_LENGTH as i32) as usize]
    }
}

impl Default for VibratoTable {
    fn default() -> Self {
        Self::generate(VibratoMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_periods() {
        let tables = PeriodTables::generate(Machine::Ntsc, 440.0, 1);
        assert_eq!(tables.read(NoteTable::Ntsc, 57), 0x0FD);
        assert_eq!(tables.read(NoteTable::Pal, 57), 235);
    }

    #[test]
    fn test_generation_is_deterministic() {
        for machine in [Machine::Ntsc, Machine::Pal] {
            for base in [415.0, 440.0, 452.5] {
                let a = PeriodTables::generate(machine, base, 4);
                let b = PeriodTables::generate(machine, base, 4);
                assert_eq!(a, b, "tables differ for {machine} @ {base}");
            }
        }
    }

    #[test]
    fn test_divider_tables_descend_frequency_tables_ascend() {
        let tables = PeriodTables::generate(Machine::Ntsc, 440.0, 1);
        for note in 1..NOTE_RANGE as i32 {
            for t in [NoteTable::Ntsc, NoteTable::Pal, NoteTable::Sawtooth, NoteTable::S5B] {
                assert!(tables.read(t, note) <= tables.read(t, note - 1), "{t:?} at {note}");
            }
            for t in [NoteTable::Fds, NoteTable::N163] {
                assert!(tables.read(t, note) >= tables.read(t, note - 1), "{t:?} at {note}");
            }
        }
    }

    #[test]
    fn test_vrc7_fnums_fit_nine_bits() {
        let tables = PeriodTables::generate(Machine::Ntsc, 440.0, 1);
        assert_eq!(tables.table(NoteTable::Vrc7).len(), VRC7_TABLE_LEN);
        assert_eq!(tables.read(NoteTable::Vrc7, 0), 172);
        assert_eq!(tables.read(NoteTable::Vrc7, 12), tables.read(NoteTable::Vrc7, 0));
        for &fnum in tables.table(NoteTable::Vrc7) {
            assert!(fnum < 512, "fnum {fnum} overflows 9 bits");
        }
    }

    #[test]
    fn test_read_clamps_out_of_range_notes() {
        let tables = PeriodTables::generate(Machine::Ntsc, 440.0, 1);
        assert_eq!(tables.read(NoteTable::Ntsc, -5), tables.read(NoteTable::Ntsc, 0));
        assert_eq!(tables.read(NoteTable::Ntsc, 500), tables.read(NoteTable::Ntsc, 95));
    }

    #[test]
    fn test_n163_scales_with_channel_count() {
        let one = PeriodTables::generate(Machine::Ntsc, 440.0, 1);
        let four = PeriodTables::generate(Machine::Ntsc, 440.0, 4);
        let a = one.read(NoteTable::N163, 57) as f64;
        let b = four.read(NoteTable::N163, 57) as f64;
        assert!((b / a - 4.0).abs() < 0.02);
    }

    #[test]
    fn test_vibrato_table_wraps() {
        let table = VibratoTable::generate(VibratoMode::New);
        for i in -600..600 {
            assert_eq!(table.read(i), table.read(i.rem_euclid(256)));
        }
        assert_eq!(table.read(256), table.read(0));
    }

    #[test]
    fn test_vibrato_curves() {
        let new = VibratoTable::generate(VibratoMode::New);
        assert_eq!(new.read(0), 0);
        assert_eq!(new.read(15 * 16 + 15), 127);

        let old = VibratoTable::generate(VibratoMode::Old);
        assert_eq!(old.read(0), 1);
        assert_eq!(old.read(15 * 16 + 15), 240);
    }
}
