//! Output mixer
//!
//! Combines the per-chip outputs into one signed 16-bit stream.
//!
//! Features:
//! - Per-chip gain from the configured mix levels (in dB)
//! - High-pass via a moving-average DC remover whose window is derived from
//!   the configured cutoff
//! - One-pole low-pass filter
//! - Non-finite input guard (NaN/inf never reach the output)

use crate::chip::Chip;

/// Levels and filter cutoffs applied by the mixer
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    /// Per-chip level in dB, indexed in [`Chip::ALL`] order
    pub levels_db: [f32; 7],
    /// High-pass cutoff in Hz
    pub high_pass_hz: u32,
    /// Low-pass cutoff in Hz (0 disables)
    pub low_pass_hz: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        MixerConfig {
            levels_db: [0.0; 7],
            high_pass_hz: 30,
            low_pass_hz: 12_000,
        }
    }
}

fn chip_slot(chip: Chip) -> usize {
    Chip::ALL.iter().position(|c| *c == chip).unwrap_or(0)
}

/// Output mixer
#[derive(Debug, Clone)]
pub struct Mixer {
    gains: [f32; 7],
    dc_buffer: Vec<f32>,
    dc_pos: usize,
    dc_sum: f32,
    low_pass_alpha: f32,
    low_pass_state: f32,
}

impl Mixer {
    /// Output gain mapping the mixed level to the 16-bit range with headroom
    const OUTPUT_GAIN: f32 = 0.75 * 32767.0;
    /// Smallest and largest DC window
    const MIN_DC_LEN: usize = 16;
    const MAX_DC_LEN: usize = 8192;

    /// Create a mixer for a sample rate
    pub fn new(sample_rate: u32, config: &MixerConfig) -> Self {
        let mut mixer = Mixer {
            gains: [1.0; 7],
            dc_buffer: Vec::new(),
            dc_pos: 0,
            dc_sum: 0.0,
            low_pass_alpha: 1.0,
            low_pass_state: 0.0,
        };
        mixer.configure(sample_rate, config);
        mixer
    }

    /// Apply new levels/cutoffs; filter state is reset
    pub fn configure(&mut self, sample_rate: u32, config: &MixerConfig) {
        for (gain, db) in self.gains.iter_mut().zip(config.levels_db) {
            *gain = 10f32.powf(db / 20.0);
        }
        // A moving average over N samples has its -3 dB point near 0.443 * fs / N
        let window = if config.high_pass_hz == 0 {
            Self::MAX_DC_LEN
        } else {
            (0.443 * sample_rate as f32 / config.high_pass_hz as f32) as usize
        };
        let window = window
            .clamp(Self::MIN_DC_LEN, Self::MAX_DC_LEN)
            .next_power_of_two()
            .min(Self::MAX_DC_LEN);
        self.dc_buffer = vec![0.0; window];
        self.low_pass_alpha = if config.low_pass_hz == 0 || sample_rate == 0 {
            1.0
        } else {
            let x = -std::f32::consts::TAU * config.low_pass_hz as f32 / sample_rate as f32;
            1.0 - x.exp()
        };
        self.reset();
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        self.dc_buffer.fill(0.0);
        self.dc_pos = 0;
        self.dc_sum = 0.0;
        self.low_pass_state = 0.0;
    }

    /// Gain applied to a chip
    pub fn gain(&self, chip: Chip) -> f32 {
        self.gains[chip_slot(chip)]
    }

    #[inline]
    fn remove_dc(&mut self, sample: f32) -> f32 {
        self.dc_sum -= self.dc_buffer[self.dc_pos];
        self.dc_sum += sample;
        self.dc_buffer[self.dc_pos] = sample;
        self.dc_pos = (self.dc_pos + 1) & (self.dc_buffer.len() - 1);
        sample - self.dc_sum / self.dc_buffer.len() as f32
    }

    /// Mix one sample; `outputs` is indexed in [`Chip::ALL`] order
    pub fn mix(&mut self, outputs: &[f32; 7]) -> i16 {
        let mut sum: f32 = outputs.iter().zip(&self.gains).map(|(o, g)| o * g).sum();
        if !sum.is_finite() {
            sum = 0.0;
        }
        let centered = self.remove_dc(sum);
        self.low_pass_state += self.low_pass_alpha * (centered - self.low_pass_state);
        (self.low_pass_state * Self::OUTPUT_GAIN)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }
}

/// Slot of a chip in mixer input order
pub fn slot(chip: Chip) -> usize {
    chip_slot(chip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_stays_silent() {
        let mut mixer = Mixer::new(44_100, &MixerConfig::default());
        for _ in 0..100 {
            assert_eq!(mixer.mix(&[0.0; 7]), 0);
        }
    }

    #[test]
    fn test_dc_is_removed() {
        let mut mixer = Mixer::new(44_100, &MixerConfig::default());
        let mut input = [0.0; 7];
        input[0] = 0.5;
        let mut last = 0;
        for _ in 0..20_000 {
            last = mixer.mix(&input);
        }
        assert!(last.abs() < 10, "constant input must settle to zero, got {last}");
    }

    #[test]
    fn test_nan_and_infinity_are_muted() {
        let mut mixer = Mixer::new(44_100, &MixerConfig::default());
        let mut input = [0.0; 7];
        input[1] = f32::NAN;
        assert_eq!(mixer.mix(&input), 0, "NaN should produce silence");
        input[1] = f32::INFINITY;
        assert_eq!(mixer.mix(&input), 0, "Infinity should produce silence");
    }

    #[test]
    fn test_levels_in_db() {
        let mut config = MixerConfig::default();
        config.levels_db[slot(Chip::Vrc6)] = -6.0;
        let mixer = Mixer::new(48_000, &config);
        assert!((mixer.gain(Chip::Vrc6) - 0.501).abs() < 0.01);
        assert!((mixer.gain(Chip::Apu2A03) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_output_clamps() {
        let config = MixerConfig {
            high_pass_hz: 0,
            low_pass_hz: 0,
            ..MixerConfig::default()
        };
        let mut mixer = Mixer::new(44_100, &config);
        let out = mixer.mix(&[10.0; 7]);
        assert_eq!(out, i16::MAX, "overload must clip, not wrap");
    }
}
