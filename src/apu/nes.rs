//! Ricoh 2A03 sound channels
//!
//! Two pulse channels, triangle, noise and the delta modulation channel,
//! with the frame sequencer that clocks envelopes, sweeps and length
//! counters. Registers $4000–$4013, $4015 and $4017.
//!
//! Timing follows the hardware: pulse timers advance every other CPU cycle,
//! triangle/noise/DMC every CPU cycle, and the frame sequencer runs in 4-step
//! mode at roughly 240 Hz. The DMC reads sample bytes straight from the
//! engine's sample memory (mapped at $C000) instead of stalling a CPU.

use super::SoundChip;
use crate::chip::Machine;
use std::sync::Arc;

/// Length counter load values indexed by the 5-bit field of $4003/$4007/$400B/$400F
const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

pub(crate) const NOISE_PERIODS_NTSC: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

pub(crate) const NOISE_PERIODS_PAL: [u16; 16] = [
    4, 8, 14, 30, 60, 88, 118, 148, 188, 236, 354, 472, 708, 944, 1890, 3778,
];

/// CPU cycles per DMC output bit
pub(crate) const DMC_PERIODS_NTSC: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

pub(crate) const DMC_PERIODS_PAL: [u16; 16] = [
    398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
];

const PULSE_DUTY: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [0, 0, 0, 0, 0, 0, 1, 1],
    [0, 0, 0, 0, 1, 1, 1, 1],
    [1, 1, 1, 1, 1, 1, 0, 0],
];

const TRIANGLE_SEQUENCE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15,
];

/// Sample memory base address
pub const DPCM_BASE: u16 = 0xC000;

/// Frame sequencer step points (quarter frames) for 4-step mode
fn frame_steps(machine: Machine) -> [u32; 4] {
    match machine {
        Machine::Ntsc => [7457, 14913, 22371, 29829],
        Machine::Pal => [8313, 16627, 24939, 33253],
    }
}

/// 2A03 and MMC5 pulse channel
#[derive(Debug, Clone, Default)]
pub(crate) struct Pulse {
    pub(crate) enabled: bool,
    duty: u8,
    length_halt: bool,
    constant_volume: bool,
    volume: u8,
    sweep_enable: bool,
    sweep_period: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    /// Pulse 1 negates with one's complement
    ones_complement: bool,
    pub(crate) timer_period: u16,
    timer: u16,
    step: u8,
    pub(crate) length_counter: u8,
    envelope_start: bool,
    envelope_divider: u8,
    envelope_decay: u8,
    sweep_divider: u8,
    sweep_reload: bool,
}

impl Pulse {
    pub(crate) fn new(ones_complement: bool) -> Self {
        Pulse {
            ones_complement,
            ..Default::default()
        }
    }

    pub(crate) fn write_control(&mut self, data: u8) {
        self.duty = (data >> 6) & 3;
        self.length_halt = data & 0x20 != 0;
        self.constant_volume = data & 0x10 != 0;
        self.volume = data & 0x0F;
    }

    fn write_sweep(&mut self, data: u8) {
        self.sweep_enable = data & 0x80 != 0;
        self.sweep_period = (data >> 4) & 7;
        self.sweep_negate = data & 0x08 != 0;
        self.sweep_shift = data & 7;
        self.sweep_reload = true;
    }

    pub(crate) fn write_timer_low(&mut self, data: u8) {
        self.timer_period = (self.timer_period & 0x0700) | data as u16;
    }

    pub(crate) fn write_timer_high(&mut self, data: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | ((data & 7) as u16) << 8;
        if self.enabled {
            self.length_counter = LENGTH_TABLE[(data >> 3) as usize & 0x1F];
        }
        self.envelope_start = true;
        self.step = 0;
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.length_counter = 0;
        }
    }

    pub(crate) fn clock_length(&mut self) {
        if !self.length_halt && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    pub(crate) fn clock_envelope(&mut self) {
        if self.envelope_start {
            self.envelope_decay = 15;
            self.envelope_divider = self.volume;
            self.envelope_start = false;
        } else if self.envelope_divider > 0 {
            self.envelope_divider -= 1;
        } else {
            self.envelope_divider = self.volume;
            if self.envelope_decay > 0 {
                self.envelope_decay -= 1;
            } else if self.length_halt {
                self.envelope_decay = 15;
            }
        }
    }

    fn sweep_target(&self) -> u16 {
        let delta = self.timer_period >> self.sweep_shift;
        if self.sweep_negate {
            let extra = u16::from(self.ones_complement);
            self.timer_period.saturating_sub(delta + extra)
        } else {
            self.timer_period.saturating_add(delta)
        }
    }

    fn clock_sweep(&mut self) {
        if self.sweep_divider == 0
            && self.sweep_enable
            && self.sweep_shift > 0
            && !self.sweep_muted()
        {
            self.timer_period = self.sweep_target();
        }
        if self.sweep_divider == 0 || self.sweep_reload {
            self.sweep_divider = self.sweep_period;
            self.sweep_reload = false;
        } else {
            self.sweep_divider -= 1;
        }
    }

    fn sweep_muted(&self) -> bool {
        self.timer_period < 8 || (!self.sweep_negate && self.sweep_target() > 0x7FF)
    }

    /// Current 4-bit output
    pub(crate) fn output(&self, use_sweep: bool) -> u8 {
        if !self.enabled
            || self.length_counter == 0
            || (use_sweep && self.sweep_muted())
            || PULSE_DUTY[self.duty as usize][self.step as usize] == 0
        {
            return 0;
        }
        if self.constant_volume {
            self.volume
        } else {
            self.envelope_decay
        }
    }

    /// One APU cycle (every second CPU cycle)
    pub(crate) fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
        } else {
            self.timer = self.timer_period;
            self.step = self.step.wrapping_sub(1) & 7;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Triangle {
    enabled: bool,
    control: bool,
    linear_load: u8,
    timer_period: u16,
    timer: u16,
    length_counter: u8,
    linear_counter: u8,
    linear_reload: bool,
    step: u8,
}

impl Triangle {
    fn write_linear(&mut self, data: u8) {
        self.control = data & 0x80 != 0;
        self.linear_load = data & 0x7F;
    }

    fn write_timer_low(&mut self, data: u8) {
        self.timer_period = (self.timer_period & 0x0700) | data as u16;
    }

    fn write_timer_high(&mut self, data: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | ((data & 7) as u16) << 8;
        if self.enabled {
            self.length_counter = LENGTH_TABLE[(data >> 3) as usize & 0x1F];
        }
        self.linear_reload = true;
    }

    fn clock_length(&mut self) {
        if !self.control && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn clock_linear(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_load;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.timer_period < 2 {
            return 0;
        }
        // The sequencer holds its last step when halted
        TRIANGLE_SEQUENCE[self.step as usize]
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.timer_period;
        if self.length_counter > 0 && self.linear_counter > 0 {
            self.step = (self.step + 1) & 31;
        }
    }
}

#[derive(Debug, Clone)]
struct Noise {
    enabled: bool,
    length_halt: bool,
    constant_volume: bool,
    volume: u8,
    mode: bool,
    period: u16,
    length_counter: u8,
    envelope_start: bool,
    envelope_divider: u8,
    envelope_decay: u8,
    timer: u16,
    shift: u16,
}

impl Default for Noise {
    fn default() -> Self {
        Noise {
            enabled: false,
            length_halt: false,
            constant_volume: false,
            volume: 0,
            mode: false,
            period: NOISE_PERIODS_NTSC[0],
            length_counter: 0,
            envelope_start: false,
            envelope_divider: 0,
            envelope_decay: 0,
            timer: 0,
            shift: 1,
        }
    }
}

impl Noise {
    fn write_control(&mut self, data: u8) {
        self.length_halt = data & 0x20 != 0;
        self.constant_volume = data & 0x10 != 0;
        self.volume = data & 0x0F;
    }

    fn write_period(&mut self, data: u8, periods: &[u16; 16]) {
        self.mode = data & 0x80 != 0;
        self.period = periods[(data & 0x0F) as usize];
    }

    fn write_length(&mut self, data: u8) {
        if self.enabled {
            self.length_counter = LENGTH_TABLE[(data >> 3) as usize & 0x1F];
        }
        self.envelope_start = true;
    }

    fn clock_length(&mut self) {
        if !self.length_halt && self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn clock_envelope(&mut self) {
        if self.envelope_start {
            self.envelope_decay = 15;
            self.envelope_divider = self.volume;
            self.envelope_start = false;
        } else if self.envelope_divider > 0 {
            self.envelope_divider -= 1;
        } else {
            self.envelope_divider = self.volume;
            if self.envelope_decay > 0 {
                self.envelope_decay -= 1;
            } else if self.length_halt {
                self.envelope_decay = 15;
            }
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length_counter == 0 || (self.shift & 1) != 0 {
            return 0;
        }
        if self.constant_volume {
            self.volume
        } else {
            self.envelope_decay
        }
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.period.saturating_sub(1);
        let tap = if self.mode { 6 } else { 1 };
        let feedback = (self.shift & 1) ^ ((self.shift >> tap) & 1);
        self.shift = (self.shift >> 1) | (feedback << 14);
    }
}

/// Delta modulation channel
///
/// Cloning is cheap: the sample memory is shared. The sample preview swaps a
/// whole `Dmc` in and out to borrow the channel.
#[derive(Debug, Clone)]
pub struct Dmc {
    enabled: bool,
    loop_flag: bool,
    rate_index: u8,
    periods: &'static [u16; 16],
    rate_timer: u16,
    output_level: u8,
    start_address: u16,
    sample_length: u16,
    current_address: u16,
    bytes_remaining: u16,
    buffer: Option<u8>,
    shift_register: u8,
    bits_remaining: u8,
    silence: bool,
    memory: Arc<[u8]>,
}

impl Default for Dmc {
    fn default() -> Self {
        Dmc {
            enabled: false,
            loop_flag: false,
            rate_index: 0,
            periods: &DMC_PERIODS_NTSC,
            rate_timer: 0,
            output_level: 0,
            start_address: DPCM_BASE,
            sample_length: 1,
            current_address: DPCM_BASE,
            bytes_remaining: 0,
            buffer: None,
            shift_register: 0,
            bits_remaining: 8,
            silence: true,
            memory: Arc::from(Vec::new()),
        }
    }
}

impl Dmc {
    /// Replace the sample memory mapped at $C000
    pub fn load_memory(&mut self, memory: Arc<[u8]>) {
        self.memory = memory;
    }

    /// Apply a write to $4010..$4013; other addresses are ignored
    pub fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x4010 => {
                self.loop_flag = data & 0x40 != 0;
                self.rate_index = data & 0x0F;
            }
            0x4011 => self.output_level = data & 0x7F,
            0x4012 => self.start_address = DPCM_BASE + (data as u16) * 64,
            0x4013 => self.sample_length = (data as u16) * 16 + 1,
            _ => {}
        }
    }

    /// Mapped sample memory
    pub fn memory(&self) -> Arc<[u8]> {
        Arc::clone(&self.memory)
    }

    /// $4015 bit 4
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.bytes_remaining = 0;
        } else if self.bytes_remaining == 0 {
            self.current_address = self.start_address;
            self.bytes_remaining = self.sample_length;
        }
    }

    fn fetch(&mut self) {
        if self.buffer.is_some() || self.bytes_remaining == 0 {
            return;
        }
        let offset = self.current_address.wrapping_sub(DPCM_BASE) as usize;
        self.buffer = Some(self.memory.get(offset).copied().unwrap_or(0));
        self.current_address = self.current_address.checked_add(1).unwrap_or(0x8000);
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 && self.loop_flag {
            self.current_address = self.start_address;
            self.bytes_remaining = self.sample_length;
        }
    }

    fn clock_timer(&mut self) {
        self.fetch();
        if self.rate_timer > 0 {
            self.rate_timer -= 1;
            return;
        }
        self.rate_timer = self.periods[self.rate_index as usize].saturating_sub(1);

        if !self.silence {
            if self.shift_register & 1 != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
        }
        self.shift_register >>= 1;
        self.bits_remaining = self.bits_remaining.saturating_sub(1);
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.buffer.take() {
                Some(byte) => {
                    self.shift_register = byte;
                    self.silence = false;
                }
                None => self.silence = true,
            }
        }
    }

    /// 7-bit delta counter, always fed to the mixer
    pub fn output(&self) -> u8 {
        self.output_level
    }

    /// Sample bytes still to be played (including the buffered byte)
    pub fn is_active(&self) -> bool {
        self.bytes_remaining > 0 || self.buffer.is_some()
    }

    /// Bytes consumed since the current sample started
    pub fn sample_position(&self) -> usize {
        self.current_address.wrapping_sub(self.start_address) as usize
    }
}

/// The complete 2A03 sound section
#[derive(Debug, Clone)]
pub struct Nes2A03 {
    machine: Machine,
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,
    parked: Option<Dmc>,
    frame_cycle: u32,
    odd_cycle: bool,
}

impl Nes2A03 {
    /// Power-on state for a machine
    pub fn new(machine: Machine) -> Self {
        let mut chip = Nes2A03 {
            machine,
            pulse1: Pulse::new(true),
            pulse2: Pulse::new(false),
            triangle: Triangle::default(),
            noise: Noise::default(),
            dmc: Dmc::default(),
            parked: None,
            frame_cycle: 0,
            odd_cycle: false,
        };
        chip.set_machine(machine);
        chip
    }

    /// Switch NTSC/PAL rate tables
    pub fn set_machine(&mut self, machine: Machine) {
        self.machine = machine;
        let periods = match machine {
            Machine::Ntsc => &DMC_PERIODS_NTSC,
            Machine::Pal => &DMC_PERIODS_PAL,
        };
        self.dmc.periods = periods;
        if let Some(parked) = self.parked.as_mut() {
            parked.periods = periods;
        }
    }

    fn noise_periods(&self) -> &'static [u16; 16] {
        match self.machine {
            Machine::Ntsc => &NOISE_PERIODS_NTSC,
            Machine::Pal => &NOISE_PERIODS_PAL,
        }
    }

    /// Delta modulation channel
    pub fn dmc(&self) -> &Dmc {
        &self.dmc
    }

    /// Mutable delta modulation channel
    pub fn dmc_mut(&mut self) -> &mut Dmc {
        &mut self.dmc
    }

    /// DMC owned by the sequencer, parked or not
    pub fn sequencer_dmc_mut(&mut self) -> &mut Dmc {
        match self.parked {
            Some(ref mut dmc) => dmc,
            None => &mut self.dmc,
        }
    }

    /// Put `preview` on the DMC output and park the sequencer's DMC
    ///
    /// While parked, $4010-$4013 and $4015 bit 4 go to the parked DMC, which
    /// keeps running silently. A second preview replaces the first one.
    pub fn begin_preview(&mut self, mut preview: Dmc) {
        preview.periods = self.dmc.periods;
        let previous = std::mem::replace(&mut self.dmc, preview);
        if self.parked.is_none() {
            self.parked = Some(previous);
        }
    }

    /// Restore the parked DMC; false when no preview was running
    pub fn end_preview(&mut self) -> bool {
        match self.parked.take() {
            Some(dmc) => {
                self.dmc = dmc;
                true
            }
            None => false,
        }
    }

    /// Whether a preview DMC is on the output
    pub fn is_previewing(&self) -> bool {
        self.parked.is_some()
    }

    /// Raw channel levels: pulse1, pulse2, triangle, noise, dmc
    pub fn levels(&self) -> [u8; 5] {
        [
            self.pulse1.output(true),
            self.pulse2.output(true),
            self.triangle.output(),
            self.noise.output(),
            self.dmc.output(),
        ]
    }

    fn quarter_frame(&mut self) {
        self.pulse1.clock_envelope();
        self.pulse2.clock_envelope();
        self.noise.clock_envelope();
        self.triangle.clock_linear();
    }

    fn half_frame(&mut self) {
        self.pulse1.clock_length();
        self.pulse2.clock_length();
        self.triangle.clock_length();
        self.noise.clock_length();
        self.pulse1.clock_sweep();
        self.pulse2.clock_sweep();
    }
}

/// Non-linear pulse DAC, n = pulse1 + pulse2
pub fn pulse_table(n: usize) -> f32 {
    if n == 0 {
        return 0.0;
    }
    95.52 / (8128.0 / n as f32 + 100.0)
}

/// Non-linear triangle/noise/DMC DAC, n = 3*tri + 2*noise + dmc
pub fn tnd_table(n: usize) -> f32 {
    if n == 0 {
        return 0.0;
    }
    163.67 / (24329.0 / n as f32 + 100.0)
}

impl SoundChip for Nes2A03 {
    fn reset(&mut self) {
        *self = Nes2A03::new(self.machine);
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x4000 => self.pulse1.write_control(data),
            0x4001 => self.pulse1.write_sweep(data),
            0x4002 => self.pulse1.write_timer_low(data),
            0x4003 => self.pulse1.write_timer_high(data),
            0x4004 => self.pulse2.write_control(data),
            0x4005 => self.pulse2.write_sweep(data),
            0x4006 => self.pulse2.write_timer_low(data),
            0x4007 => self.pulse2.write_timer_high(data),
            0x4008 => self.triangle.write_linear(data),
            0x400A => self.triangle.write_timer_low(data),
            0x400B => self.triangle.write_timer_high(data),
            0x400C => self.noise.write_control(data),
            0x400E => {
                let periods = self.noise_periods();
                self.noise.write_period(data, periods);
            }
            0x400F => self.noise.write_length(data),
            0x4010..=0x4013 => self.sequencer_dmc_mut().write(addr, data),
            0x4015 => {
                self.pulse1.set_enabled(data & 0x01 != 0);
                self.pulse2.set_enabled(data & 0x02 != 0);
                self.triangle.enabled = data & 0x04 != 0;
                if !self.triangle.enabled {
                    self.triangle.length_counter = 0;
                }
                self.noise.enabled = data & 0x08 != 0;
                if !self.noise.enabled {
                    self.noise.length_counter = 0;
                }
                self.sequencer_dmc_mut().set_enabled(data & 0x10 != 0);
            }
            0x4017 => self.frame_cycle = 0,
            _ => {}
        }
    }

    fn clock(&mut self, cycles: u32) {
        let steps = frame_steps(self.machine);
        for _ in 0..cycles {
            self.frame_cycle += 1;
            if self.frame_cycle == steps[0] || self.frame_cycle == steps[2] {
                self.quarter_frame();
            } else if self.frame_cycle == steps[1] {
                self.quarter_frame();
                self.half_frame();
            } else if self.frame_cycle >= steps[3] {
                self.quarter_frame();
                self.half_frame();
                self.frame_cycle = 0;
            }

            self.odd_cycle = !self.odd_cycle;
            if self.odd_cycle {
                self.pulse1.clock_timer();
                self.pulse2.clock_timer();
            }
            self.triangle.clock_timer();
            self.noise.clock_timer();
            self.dmc.clock_timer();
            if let Some(parked) = self.parked.as_mut() {
                parked.clock_timer();
            }
        }
    }

    fn output(&self) -> f32 {
        let [p1, p2, tri, noise, dmc] = self.levels();
        let pulse = pulse_table((p1 + p2) as usize);
        let tnd = tnd_table(3 * tri as usize + 2 * noise as usize + dmc as usize);
        pulse + tnd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_pulse(chip: &mut Nes2A03) -> Vec<u8> {
        (0..4000)
            .map(|_| {
                chip.clock(1);
                chip.levels()[0]
            })
            .collect()
    }

    #[test]
    fn test_pulse_toggles_when_enabled() {
        let mut chip = Nes2A03::new(Machine::Ntsc);
        chip.write(0x4015, 0x0F);
        chip.write(0x4000, 0xBF); // 50% duty, constant volume 15
        chip.write(0x4001, 0x08);
        chip.write(0x4002, 0xFD);
        chip.write(0x4003, 0x00);
        let out = run_pulse(&mut chip);
        assert!(out.contains(&15), "pulse never went high");
        assert!(out.contains(&0), "pulse never went low");
    }

    #[test]
    fn test_disabled_channel_is_silent() {
        let mut chip = Nes2A03::new(Machine::Ntsc);
        chip.write(0x4000, 0xBF);
        chip.write(0x4002, 0xFD);
        chip.write(0x4003, 0x00);
        assert!(run_pulse(&mut chip).iter().all(|&v| v == 0));
        assert_eq!(chip.output(), 0.0);
    }

    #[test]
    fn test_dmc_plays_from_memory() {
        let mut chip = Nes2A03::new(Machine::Ntsc);
        chip.dmc_mut().load_memory(Arc::from(vec![0xFFu8; 17]));
        chip.write(0x4010, 0x0F);
        chip.write(0x4011, 0x00);
        chip.write(0x4012, 0x00);
        chip.write(0x4013, 0x01);
        chip.write(0x4015, 0x10);
        assert!(chip.dmc().is_active());
        chip.clock(20_000);
        assert!(chip.dmc().output() > 0, "all-ones sample must ramp up");
        assert!(!chip.dmc().is_active(), "17 bytes at rate 15 finish well before 20k cycles");
    }

    #[test]
    fn test_preview_parks_sequencer_dmc() {
        let mut chip = Nes2A03::new(Machine::Ntsc);
        chip.write(0x4011, 0x20);
        let mut preview = Dmc::default();
        preview.load_memory(Arc::from(vec![0u8; 64]));
        preview.write(0x4013, 0x01);
        preview.set_enabled(true);
        chip.begin_preview(preview);
        assert!(chip.is_previewing());

        chip.write(0x4011, 0x40);
        assert_eq!(chip.dmc().output(), 0, "sequencer writes go to the parked DMC");
        chip.clock(100);

        assert!(chip.end_preview());
        assert_eq!(chip.dmc().output(), 0x40);
        assert!(!chip.end_preview(), "nothing left to restore");
    }

    #[test]
    fn test_parked_dmc_keeps_playing() {
        let sample: Arc<[u8]> = Arc::from(vec![0xFFu8; 1025]);
        let mut plain = Nes2A03::new(Machine::Ntsc);
        let mut previewed = Nes2A03::new(Machine::Ntsc);
        for chip in [&mut plain, &mut previewed] {
            chip.sequencer_dmc_mut().load_memory(sample.clone());
        }

        let mut preview = Dmc::default();
        preview.load_memory(Arc::from(vec![0u8; 1025]));
        preview.write(0x4013, 0x40);
        preview.set_enabled(true);
        previewed.begin_preview(preview);

        for chip in [&mut plain, &mut previewed] {
            chip.write(0x4010, 0x0F);
            chip.write(0x4011, 0x00);
            chip.write(0x4012, 0x00);
            chip.write(0x4013, 0x40);
            chip.write(0x4015, 0x10);
            chip.clock(30_000);
        }
        assert!(previewed.end_preview());
        assert!(previewed.dmc().is_active(), "1025 bytes outlast 30k cycles");
        assert_eq!(
            previewed.dmc().sample_position(),
            plain.dmc().sample_position(),
            "parked DMC advances as if nothing was previewed"
        );
        assert_eq!(previewed.dmc().output(), plain.dmc().output());
    }

    #[test]
    fn test_mixer_tables() {
        assert_eq!(pulse_table(0), 0.0);
        assert!((pulse_table(30) - 0.2575).abs() < 0.001);
        assert!((tnd_table(202) - 0.7425).abs() < 0.001);
    }
}
