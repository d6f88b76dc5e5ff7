//! Chip emulation
//!
//! [`Apu`] owns one instance of every supported sound chip, routes bus writes
//! to them, keeps a shadow of all register values and produces mixed 16-bit
//! samples. Chips not in the active [`ChipMask`] still receive shadowed
//! writes but are never clocked or mixed.

pub mod fds;
pub mod mixer;
pub mod mmc5;
pub mod n163;
pub mod nes;
pub mod registers;
pub mod s5b;
pub mod vrc6;
pub mod vrc7;

use crate::chip::{ChannelType, Chip, ChipMask, Machine};
use crate::config::Settings;
use std::sync::Arc;

pub use mixer::{Mixer, MixerConfig};
pub use nes::{Dmc, Nes2A03, DPCM_BASE};
pub use registers::{RegisterBank, RegisterState, RegisterStream, RegisterWrite};

/// A register-level sound chip driven by the CPU clock
pub trait SoundChip: Send {
    /// Return to the power-on state
    fn reset(&mut self);

    /// Apply a CPU bus write; unknown addresses are ignored
    fn write(&mut self, addr: u16, data: u8);

    /// Advance the chip by a number of CPU cycles
    fn clock(&mut self, cycles: u32);

    /// Current analog output, roughly 0.0..1.0 at full scale
    fn output(&self) -> f32;
}

/// Sink for the register writes emitted by channel handlers
pub trait ChipWriter {
    /// Write one byte to the CPU bus
    fn write(&mut self, addr: u16, value: u8);

    /// Map sample data into DPCM memory at $C000
    fn load_dpcm(&mut self, data: Arc<[u8]>);
}

/// DPCM channel read-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DpcmState {
    /// Bytes consumed from the current sample
    pub sample_pos: usize,
    /// 7-bit delta counter
    pub delta: u8,
}

/// All sound hardware of one cartridge/console combination
pub struct Apu {
    machine: Machine,
    sample_rate: u32,
    cycles_per_sample: f64,
    cycle_acc: f64,
    chips: ChipMask,
    nes: Nes2A03,
    vrc6: vrc6::Vrc6,
    mmc5: mmc5::Mmc5,
    n163: n163::N163,
    fds: fds::Fds,
    vrc7: vrc7::Vrc7,
    s5b: s5b::Sunsoft5B,
    mixer: Mixer,
    mixer_config: MixerConfig,
    registers: RegisterBank,
    capture: Option<RegisterStream>,
    frame: u64,
    dpcm_reverse: bool,
}

impl Apu {
    /// Create an APU with only the 2A03 enabled
    pub fn new(machine: Machine, sample_rate: u32) -> Self {
        let mixer_config = MixerConfig::default();
        let sample_rate = sample_rate.max(1);
        Apu {
            machine,
            sample_rate,
            cycles_per_sample: machine.cpu_clock() as f64 / sample_rate as f64,
            cycle_acc: 0.0,
            chips: ChipMask::empty(),
            nes: Nes2A03::new(machine),
            vrc6: vrc6::Vrc6::new(),
            mmc5: mmc5::Mmc5::new(),
            n163: n163::N163::new(),
            fds: fds::Fds::new(),
            vrc7: vrc7::Vrc7::new(),
            s5b: s5b::Sunsoft5B::new(),
            mixer: Mixer::new(sample_rate, &mixer_config),
            mixer_config,
            registers: RegisterBank::new(),
            capture: None,
            frame: 0,
            dpcm_reverse: false,
        }
    }

    /// Apply output settings (rate, mix levels, filters, N163 mixing)
    pub fn configure(&mut self, settings: &Settings) {
        self.mixer_config = MixerConfig {
            levels_db: settings.mix_levels.to_array(),
            high_pass_hz: settings.high_pass_hz,
            low_pass_hz: settings.low_pass_hz,
        };
        self.n163.set_multiplex(settings.n163_multiplex);
        self.dpcm_reverse = settings.dpcm_reverse;
        self.set_sample_rate(settings.sample_rate);
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Change the output sample rate; filter history is cleared
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.cycles_per_sample = self.machine.cpu_clock() as f64 / self.sample_rate as f64;
        self.mixer.configure(self.sample_rate, &self.mixer_config);
    }

    /// Active machine
    pub fn machine(&self) -> Machine {
        self.machine
    }

    /// Switch NTSC/PAL timing
    pub fn set_machine(&mut self, machine: Machine) {
        self.machine = machine;
        self.nes.set_machine(machine);
        self.cycles_per_sample = machine.cpu_clock() as f64 / self.sample_rate as f64;
    }

    /// Enabled expansion chips
    pub fn chips(&self) -> ChipMask {
        self.chips
    }

    /// Select the expansion chips; newly disabled chips are silenced
    pub fn set_chips(&mut self, chips: ChipMask) {
        let removed = self.chips - chips;
        for chip in removed.chips() {
            if let Some(c) = self.chip_mut(chip) {
                c.reset();
            }
        }
        self.chips = chips;
    }

    fn chip_mut(&mut self, chip: Chip) -> Option<&mut dyn SoundChip> {
        match chip {
            Chip::Apu2A03 => Some(&mut self.nes),
            Chip::Vrc6 => Some(&mut self.vrc6),
            Chip::Mmc5 => Some(&mut self.mmc5),
            Chip::N163 => Some(&mut self.n163),
            Chip::Fds => Some(&mut self.fds),
            Chip::Vrc7 => Some(&mut self.vrc7),
            Chip::S5B => Some(&mut self.s5b),
        }
    }

    fn route(addr: u16) -> Option<Chip> {
        match addr {
            0x4000..=0x4017 => Some(Chip::Apu2A03),
            0x4040..=0x408A => Some(Chip::Fds),
            0x4800 | 0xF800 => Some(Chip::N163),
            0x5000..=0x5015 => Some(Chip::Mmc5),
            0x9010 | 0x9030 => Some(Chip::Vrc7),
            0x9000..=0x9003 | 0xA000..=0xA002 | 0xB000..=0xB002 => Some(Chip::Vrc6),
            0xC000 | 0xE000 => Some(Chip::S5B),
            _ => None,
        }
    }

    /// Write one byte to the bus
    ///
    /// The write is shadowed and captured even when the owning chip is
    /// disabled; unmapped addresses are ignored.
    pub fn write(&mut self, addr: u16, value: u8) {
        let Some(chip) = Self::route(addr) else {
            return;
        };
        self.registers.record(addr, value, self.frame);
        if let Some(capture) = self.capture.as_mut() {
            capture.push(self.frame, addr, value);
        }
        if self.chips.has(chip) {
            if let Some(c) = self.chip_mut(chip) {
                c.write(addr, value);
            }
        }
    }

    /// Generate `count` samples and append them to `out`
    pub fn advance_samples(&mut self, count: usize, out: &mut Vec<i16>) {
        out.reserve(count);
        let chips = self.chips;
        for _ in 0..count {
            self.cycle_acc += self.cycles_per_sample;
            let cycles = self.cycle_acc as u32;
            self.cycle_acc -= cycles as f64;

            let mut outputs = [0.0f32; 7];
            self.nes.clock(cycles);
            outputs[0] = self.nes.output();
            if chips.has(Chip::Vrc6) {
                self.vrc6.clock(cycles);
                outputs[1] = self.vrc6.output();
            }
            if chips.has(Chip::Mmc5) {
                self.mmc5.clock(cycles);
                outputs[2] = self.mmc5.output();
            }
            if chips.has(Chip::N163) {
                self.n163.clock(cycles);
                outputs[3] = self.n163.output();
            }
            if chips.has(Chip::Fds) {
                self.fds.clock(cycles);
                outputs[4] = self.fds.output();
            }
            if chips.has(Chip::Vrc7) {
                self.vrc7.clock(cycles);
                outputs[5] = self.vrc7.output();
            }
            if chips.has(Chip::S5B) {
                self.s5b.clock(cycles);
                outputs[6] = self.s5b.output();
            }
            out.push(self.mixer.mix(&outputs));
        }
    }

    /// Zero all chip and shadow state and silence the output
    pub fn reset(&mut self) {
        let memory = self.nes.sequencer_dmc_mut().memory();
        self.nes.reset();
        self.nes.dmc_mut().load_memory(memory);
        self.vrc6.reset();
        self.mmc5.reset();
        self.n163.reset();
        self.fds.reset();
        self.vrc7.reset();
        self.s5b.reset();
        self.mixer.reset();
        self.registers.clear();
        if self.capture.is_some() {
            self.capture = Some(RegisterStream::new());
        }
        self.cycle_acc = 0.0;
    }

    /// Advance the frame counter used to age register writes
    pub fn next_frame(&mut self) {
        self.frame += 1;
    }

    /// Current engine frame
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Last value written to a chip register
    pub fn get_reg(&self, chip: Chip, reg: usize) -> u8 {
        self.registers.get(chip, reg)
    }

    /// Value and history of a chip register
    pub fn get_reg_state(&self, chip: Chip, reg: usize) -> RegisterState {
        self.registers.state(chip, reg)
    }

    /// DPCM sample position and delta counter
    pub fn dpcm_state(&self) -> DpcmState {
        let dmc = self.nes.dmc();
        DpcmState {
            sample_pos: dmc.sample_position(),
            delta: dmc.output(),
        }
    }

    /// Begin capturing bus writes
    ///
    /// A reset (every playback start goes through one) empties the capture,
    /// so it holds the writes of the latest session only. Stopping keeps it.
    pub fn start_capture(&mut self) {
        self.capture = Some(RegisterStream::new());
    }

    /// Stop capturing and hand back what was recorded
    pub fn take_capture(&mut self) -> Option<RegisterStream> {
        self.capture.take()
    }

    /// Whether bus writes are being captured
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Play a standalone DMC in place of the sequencer's one
    pub fn begin_dmc_preview(&mut self, preview: Dmc) {
        self.nes.begin_preview(preview);
    }

    /// Give the DMC back to the sequencer; false when no preview was running
    pub fn end_dmc_preview(&mut self) -> bool {
        self.nes.end_preview()
    }

    /// Whether a preview DMC is on the output
    pub fn is_previewing(&self) -> bool {
        self.nes.is_previewing()
    }

    /// Map sample data at $C000, honoring the DPCM bit-reverse setting
    pub fn load_dpcm(&mut self, data: Arc<[u8]>) {
        let data = if self.dpcm_reverse {
            data.iter().map(|b| b.reverse_bits()).collect()
        } else {
            data
        };
        self.nes.sequencer_dmc_mut().load_memory(data);
    }

    /// Build a standalone DMC for the current machine
    pub fn make_dmc(&self, data: Arc<[u8]>) -> Dmc {
        let mut dmc = Dmc::default();
        let data = if self.dpcm_reverse {
            data.iter().map(|b| b.reverse_bits()).collect()
        } else {
            data
        };
        dmc.load_memory(data);
        dmc
    }

    /// Whether the DMC on the output is still playing sample bytes
    pub fn dpcm_active(&self) -> bool {
        self.nes.dmc().is_active()
    }

    /// Frequency in Hz implied by the last written period of a channel
    pub fn channel_frequency(&self, channel: ChannelType) -> f64 {
        let cpu = self.machine.cpu_clock() as f64;
        let r = |chip: Chip, reg: usize| self.registers.get(chip, reg) as u32;
        let divide = |div: f64, period: u32| cpu / (div * (period as f64 + 1.0));
        match channel {
            ChannelType::Square1 | ChannelType::Square2 => {
                let base = if channel == ChannelType::Square1 { 0 } else { 4 };
                let period = r(Chip::Apu2A03, base + 2) | (r(Chip::Apu2A03, base + 3) & 7) << 8;
                divide(16.0, period)
            }
            ChannelType::Triangle => {
                let period = r(Chip::Apu2A03, 0x0A) | (r(Chip::Apu2A03, 0x0B) & 7) << 8;
                divide(32.0, period)
            }
            ChannelType::Noise => {
                let periods = match self.machine {
                    Machine::Ntsc => &nes::NOISE_PERIODS_NTSC,
                    Machine::Pal => &nes::NOISE_PERIODS_PAL,
                };
                cpu / periods[(r(Chip::Apu2A03, 0x0E) & 0x0F) as usize] as f64
            }
            ChannelType::Dpcm => {
                let periods = match self.machine {
                    Machine::Ntsc => &nes::DMC_PERIODS_NTSC,
                    Machine::Pal => &nes::DMC_PERIODS_PAL,
                };
                cpu / periods[(r(Chip::Apu2A03, 0x10) & 0x0F) as usize] as f64 / 8.0
            }
            ChannelType::Vrc6Pulse(n) => {
                let base = n as usize * 4;
                let period = r(Chip::Vrc6, base + 1) | (r(Chip::Vrc6, base + 2) & 0x0F) << 8;
                divide(16.0, period)
            }
            ChannelType::Vrc6Sawtooth => {
                let period = r(Chip::Vrc6, 9) | (r(Chip::Vrc6, 10) & 0x0F) << 8;
                divide(14.0, period)
            }
            ChannelType::Mmc5Pulse(n) => {
                let base = n as usize * 4;
                let period = r(Chip::Mmc5, base + 2) | (r(Chip::Mmc5, base + 3) & 7) << 8;
                divide(16.0, period)
            }
            ChannelType::N163(n) => {
                let base = 0x78 - n as usize * 8;
                let freq = r(Chip::N163, base)
                    | r(Chip::N163, base + 2) << 8
                    | (r(Chip::N163, base + 4) & 3) << 16;
                let length = 256 - (r(Chip::N163, base + 4) & 0xFC);
                let count = ((r(Chip::N163, 0x7F) >> 4) & 7) + 1;
                cpu * freq as f64 / (15.0 * count as f64 * 65536.0 * length as f64)
            }
            ChannelType::Fds => {
                let freq = r(Chip::Fds, 0x42) | (r(Chip::Fds, 0x43) & 0x0F) << 8;
                cpu * freq as f64 / (1u32 << 22) as f64
            }
            ChannelType::Vrc7(n) => {
                let c = n as usize;
                let fnum = r(Chip::Vrc7, 0x10 + c) | (r(Chip::Vrc7, 0x20 + c) & 1) << 8;
                let block = (r(Chip::Vrc7, 0x20 + c) >> 1) & 7;
                let fm_rate = cpu / 36.0;
                fm_rate * fnum as f64 * (1u32 << block) as f64 / (1u32 << 19) as f64
            }
            ChannelType::S5B(n) => {
                let c = n as usize * 2;
                let period = r(Chip::S5B, c) | (r(Chip::S5B, c + 1) & 0x0F) << 8;
                if period == 0 {
                    0.0
                } else {
                    cpu / (32.0 * period as f64)
                }
            }
        }
    }

    /// Instantaneous level of one channel (0.0..1.0), for meters
    pub fn channel_level(&self, channel: ChannelType) -> f32 {
        match channel {
            ChannelType::Square1 => self.nes.levels()[0] as f32 / 15.0,
            ChannelType::Square2 => self.nes.levels()[1] as f32 / 15.0,
            ChannelType::Triangle => self.nes.levels()[2] as f32 / 15.0,
            ChannelType::Noise => self.nes.levels()[3] as f32 / 15.0,
            ChannelType::Dpcm => self.nes.levels()[4] as f32 / 127.0,
            ChannelType::Vrc6Pulse(n) => self.vrc6.levels()[n as usize & 1] as f32 / 15.0,
            ChannelType::Vrc6Sawtooth => self.vrc6.levels()[2] as f32 / 31.0,
            ChannelType::Mmc5Pulse(n) => self.mmc5.levels()[n as usize & 1] as f32 / 15.0,
            ChannelType::N163(n) => {
                (self.n163.levels()[n as usize & 7] as f32 / 15.0).abs()
            }
            ChannelType::Fds => self.fds.level() as f32 / (63.0 * 32.0),
            ChannelType::Vrc7(n) => self.vrc7.levels()[(n as usize).min(5)].abs(),
            ChannelType::S5B(n) => self.s5b.channel_level((n as usize).min(2)),
        }
    }
}

impl ChipWriter for Apu {
    fn write(&mut self, addr: u16, value: u8) {
        Apu::write(self, addr, value);
    }

    fn load_dpcm(&mut self, data: Arc<[u8]>) {
        Apu::load_dpcm(self, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_on(apu: &mut Apu) {
        apu.write(0x4015, 0x01);
        apu.write(0x4000, 0xBF);
        apu.write(0x4002, 0xFD);
        apu.write(0x4003, 0x00);
    }

    #[test]
    fn test_advance_appends_requested_samples() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        let mut out = Vec::new();
        apu.advance_samples(735, &mut out);
        assert_eq!(out.len(), 735);
        apu.advance_samples(10, &mut out);
        assert_eq!(out.len(), 745, "samples must be appended");
    }

    #[test]
    fn test_pulse_is_audible_and_reset_silences() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        tone_on(&mut apu);
        let mut out = Vec::new();
        apu.advance_samples(2000, &mut out);
        assert!(out.iter().any(|&s| s.abs() > 500), "pulse should be audible");

        apu.reset();
        out.clear();
        apu.advance_samples(2000, &mut out);
        assert!(out.iter().all(|&s| s == 0), "reset must silence output");
        assert_eq!(apu.get_reg(Chip::Apu2A03, 0), 0);
    }

    #[test]
    fn test_register_read_reflects_last_write() {
        let mut apu = Apu::new(Machine::Ntsc, 48_000);
        apu.write(0x4002, 0x12);
        apu.write(0x4002, 0x34);
        assert_eq!(apu.get_reg(Chip::Apu2A03, 2), 0x34);
        assert_eq!(apu.get_reg_state(Chip::Apu2A03, 2).writes, 2);
    }

    #[test]
    fn test_disabled_chip_write_is_inaudible() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        apu.write(0x9000, 0x8F);
        apu.write(0x9001, 0x80);
        apu.write(0x9002, 0x81);
        assert_eq!(apu.get_reg(Chip::Vrc6, 0), 0x8F, "write is still shadowed");
        let mut out = Vec::new();
        apu.advance_samples(1000, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_unknown_address_is_ignored() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        apu.start_capture();
        apu.write(0x1234, 0xFF);
        assert!(apu.take_capture().unwrap().is_empty());
    }

    #[test]
    fn test_capture_records_in_order() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        apu.start_capture();
        apu.write(0x4000, 1);
        apu.next_frame();
        apu.write(0x4001, 2);
        let capture = apu.take_capture().unwrap();
        let writes = capture.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!((writes[0].frame, writes[0].address), (0, 0x4000));
        assert_eq!((writes[1].frame, writes[1].address), (1, 0x4001));
        assert!(!apu.is_capturing());
    }

    #[test]
    fn test_reset_starts_new_capture() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        apu.start_capture();
        apu.write(0x4000, 1);
        apu.reset();
        assert!(apu.is_capturing(), "capture survives a reset");
        apu.write(0x4002, 3);
        let capture = apu.take_capture().unwrap();
        assert_eq!(capture.len(), 1, "writes of the previous session are gone");
        assert_eq!(capture.writes()[0].address, 0x4002);

        apu.reset();
        assert!(!apu.is_capturing(), "reset does not start a capture");
    }

    #[test]
    fn test_channel_frequency_from_period() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        tone_on(&mut apu);
        let hz = apu.channel_frequency(ChannelType::Square1);
        assert!((hz - 440.0).abs() < 1.0, "period 0x0FD is about A-4, got {hz}");
    }

    #[test]
    fn test_vrc7_routed_before_vrc6() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        apu.write(0x9010, 0x30);
        apu.write(0x9030, 0x1F);
        assert_eq!(apu.get_reg(Chip::Vrc7, 0x30), 0x1F);
        assert_eq!(apu.get_reg(Chip::Vrc6, 0), 0);
    }
}
