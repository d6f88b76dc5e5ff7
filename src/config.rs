//! Engine settings
//!
//! [`Settings`] is persisted as JSON. The engine reads it through a shared
//! [`SettingsStore`]; the `LoadSettings` command re-reads the store (and its
//! backing file, if any) and applies the result.

use crate::chip::{Chip, Machine};
use crate::tables::{VibratoMode, DEFAULT_BASE_FREQUENCY};
use crate::{Result, SoundGenError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-chip output level in dB (-12..=12)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MixLevels {
    /// Internal 2A03
    pub apu: f32,
    /// VRC6
    pub vrc6: f32,
    /// MMC5
    pub mmc5: f32,
    /// Namco 163
    pub n163: f32,
    /// FDS
    pub fds: f32,
    /// VRC7
    pub vrc7: f32,
    /// Sunsoft 5B
    pub s5b: f32,
}

impl MixLevels {
    /// Levels in [`Chip::ALL`] order
    pub fn to_array(&self) -> [f32; 7] {
        [
            self.apu, self.vrc6, self.mmc5, self.n163, self.fds, self.vrc7, self.s5b,
        ]
    }

    /// Level of one chip
    pub fn get(&self, chip: Chip) -> f32 {
        match chip {
            Chip::Apu2A03 => self.apu,
            Chip::Vrc6 => self.vrc6,
            Chip::Mmc5 => self.mmc5,
            Chip::N163 => self.n163,
            Chip::Fds => self.fds,
            Chip::Vrc7 => self.vrc7,
            Chip::S5B => self.s5b,
        }
    }
}

/// Sound engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Output buffer length in milliseconds
    pub buffer_length_ms: u32,
    /// Output bit depth (8 or 16)
    pub bit_depth: u16,
    /// Machine override; the document's machine is used when unset
    pub machine: Option<Machine>,
    /// Frequency of A-4 in Hz
    pub base_frequency: f64,
    /// Vibrato style override; the document's style is used when unset
    pub vibrato_style: Option<VibratoMode>,
    /// Linear pitch override; the document's flag is used when unset
    pub linear_pitch: Option<bool>,
    /// Per-chip mix levels
    pub mix_levels: MixLevels,
    /// Low-pass cutoff in Hz (0 disables)
    pub low_pass_hz: u32,
    /// High-pass cutoff in Hz
    pub high_pass_hz: u32,
    /// Reverse the bit order of DPCM sample bytes
    pub dpcm_reverse: bool,
    /// Engine tick rate override in Hz
    pub frame_rate_override: Option<u32>,
    /// N163 hardware multiplexing (off: average the channels)
    pub n163_multiplex: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sample_rate: 44_100,
            buffer_length_ms: 40,
            bit_depth: 16,
            machine: None,
            base_frequency: DEFAULT_BASE_FREQUENCY,
            vibrato_style: None,
            linear_pitch: None,
            mix_levels: MixLevels::default(),
            low_pass_hz: 12_000,
            high_pass_hz: 30,
            dpcm_reverse: false,
            frame_rate_override: None,
            n163_multiplex: true,
        }
    }
}

impl Settings {
    /// Supported sample rates
    pub const SAMPLE_RATES: std::ops::RangeInclusive<u32> = 11_025..=96_000;

    /// Read settings from a JSON file and validate them
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SoundGenError::Config(msg));
        if !Self::SAMPLE_RATES.contains(&self.sample_rate) {
            return fail(format!("sample rate {} out of range", self.sample_rate));
        }
        if !(10..=1000).contains(&self.buffer_length_ms) {
            return fail(format!("buffer length {} ms out of range", self.buffer_length_ms));
        }
        if self.bit_depth != 8 && self.bit_depth != 16 {
            return fail(format!("unsupported bit depth {}", self.bit_depth));
        }
        if !(300.0..=600.0).contains(&self.base_frequency) {
            return fail(format!("base frequency {} Hz out of range", self.base_frequency));
        }
        for chip in Chip::ALL {
            let level = self.mix_levels.get(chip);
            if !(-12.0..=12.0).contains(&level) {
                return fail(format!("{chip} level {level} dB out of range"));
            }
        }
        if self.low_pass_hz != 0 && (self.low_pass_hz < 100 || self.low_pass_hz >= self.sample_rate / 2) {
            return fail(format!("low-pass cutoff {} Hz out of range", self.low_pass_hz));
        }
        if self.high_pass_hz > 1000 {
            return fail(format!("high-pass cutoff {} Hz out of range", self.high_pass_hz));
        }
        if let Some(rate) = self.frame_rate_override {
            if !(1..=400).contains(&rate) {
                return fail(format!("frame rate override {rate} Hz out of range"));
            }
        }
        Ok(())
    }

    /// Samples per output buffer
    pub fn buffer_samples(&self) -> usize {
        (self.sample_rate as u64 * self.buffer_length_ms as u64 / 1000).max(1) as usize
    }

    /// Set the output sample rate
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Force a machine regardless of the document
    pub fn machine(mut self, machine: Machine) -> Self {
        self.machine = Some(machine);
        self
    }

    /// Set the A-4 tuning
    pub fn base_frequency(mut self, hz: f64) -> Self {
        self.base_frequency = hz;
        self
    }

    /// Force the engine tick rate
    pub fn frame_rate(mut self, hz: u32) -> Self {
        self.frame_rate_override = Some(hz);
        self
    }
}

/// Shared, reloadable settings source
#[derive(Debug, Clone)]
pub struct SettingsStore {
    current: Arc<RwLock<Settings>>,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// In-memory store
    pub fn new(settings: Settings) -> Self {
        SettingsStore {
            current: Arc::new(RwLock::new(settings)),
            path: None,
        }
    }

    /// Store backed by a JSON file; a missing file yields the defaults
    pub fn with_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            Settings::load(&path)?
        } else {
            Settings::default()
        };
        Ok(SettingsStore {
            current: Arc::new(RwLock::new(settings)),
            path: Some(path),
        })
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    /// Modify the settings; the change is rejected if it fails validation
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut next = self.get();
        f(&mut next);
        next.validate()?;
        *self.current.write() = next;
        Ok(())
    }

    /// Re-read the backing file (if any) and return the current settings
    pub fn reload(&self) -> Result<Settings> {
        if let Some(path) = &self.path {
            if path.exists() {
                let settings = Settings::load(path)?;
                *self.current.write() = settings;
            }
        }
        Ok(self.get())
    }

    /// Persist to the backing file
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.get().save(path),
            None => Err(SoundGenError::Config("settings store has no file".into())),
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        SettingsStore::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.buffer_samples(), 1764);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut settings = Settings::default();
        settings.mix_levels.vrc6 = 20.0;
        assert!(matches!(settings.validate(), Err(SoundGenError::Config(_))));

        let settings = Settings::default().sample_rate(1_000);
        assert!(settings.validate().is_err(), "sample rate below range");

        let settings = Settings::default().frame_rate(0);
        assert!(settings.validate().is_err(), "zero tick rate");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"sample_rate": 48000}"#).unwrap();
        assert_eq!(settings.sample_rate, 48_000);
        assert_eq!(settings.bit_depth, 16);
        assert!(settings.n163_multiplex);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::with_file(&path).unwrap();
        assert_eq!(store.get(), Settings::default(), "missing file gives defaults");

        store.update(|s| s.base_frequency = 432.0).unwrap();
        store.save().unwrap();

        let other = SettingsStore::with_file(&path).unwrap();
        assert_eq!(other.get().base_frequency, 432.0);

        let mut edited = other.get();
        edited.sample_rate = 22_050;
        edited.save(&path).unwrap();
        assert_eq!(store.reload().unwrap().sample_rate, 22_050);
    }

    #[test]
    fn test_invalid_update_keeps_previous() {
        let store = SettingsStore::default();
        let result = store.update(|s| s.bit_depth = 24);
        assert!(result.is_err());
        assert_eq!(store.get().bit_depth, 16);
    }
}
