//! Instrument and sample data read by channel handlers
//!
//! Instruments belong to the document; handlers only interpret them while a
//! note is playing. The types here are plain data with serde support so an
//! in-memory document can be loaded from JSON.

use crate::chip::Chip;
use serde::{Deserialize, Serialize};

/// Sequence slot within an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    /// Volume envelope (0..15)
    Volume,
    /// Note offset per tick
    Arpeggio,
    /// Relative period offset per tick
    Pitch,
    /// Relative period offset per tick, scaled by 16
    HiPitch,
    /// Duty/timbre per tick
    Duty,
}

impl SequenceKind {
    /// All sequence kinds in slot order
    pub const ALL: [SequenceKind; 5] = [
        SequenceKind::Volume,
        SequenceKind::Arpeggio,
        SequenceKind::Pitch,
        SequenceKind::HiPitch,
        SequenceKind::Duty,
    ];
}

/// How arpeggio sequence values are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArpeggioMode {
    /// Offset from the played note, reset every tick
    #[default]
    Absolute,
    /// Absolute note number, ignoring the played note
    Fixed,
    /// Offset accumulated onto the current note
    Relative,
}

/// A per-tick value sequence with optional loop and release points
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sequence {
    /// Values, one per tick
    pub values: Vec<i8>,
    /// Index jumped back to after the last value
    #[serde(default)]
    pub loop_point: Option<usize>,
    /// Index where playback holds until the note is released
    #[serde(default)]
    pub release_point: Option<usize>,
    /// Arpeggio interpretation (only meaningful for arpeggio sequences)
    #[serde(default)]
    pub arpeggio_mode: ArpeggioMode,
}

impl Sequence {
    /// Sequence with the given values and no loop/release
    pub fn new(values: Vec<i8>) -> Self {
        Sequence {
            values,
            ..Default::default()
        }
    }

    /// Set the loop point
    pub fn looping(mut self, point: usize) -> Self {
        self.loop_point = Some(point);
        self
    }

    /// Set the release point
    pub fn releasing(mut self, point: usize) -> Self {
        self.release_point = Some(point);
        self
    }
}

/// The five sequence slots of an instrument
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSet {
    /// Volume sequence
    pub volume: Option<Sequence>,
    /// Arpeggio sequence
    pub arpeggio: Option<Sequence>,
    /// Pitch sequence
    pub pitch: Option<Sequence>,
    /// Hi-pitch sequence
    pub hi_pitch: Option<Sequence>,
    /// Duty sequence
    pub duty: Option<Sequence>,
}

impl SequenceSet {
    /// Sequence in a slot, if any
    pub fn get(&self, kind: SequenceKind) -> Option<&Sequence> {
        match kind {
            SequenceKind::Volume => self.volume.as_ref(),
            SequenceKind::Arpeggio => self.arpeggio.as_ref(),
            SequenceKind::Pitch => self.pitch.as_ref(),
            SequenceKind::HiPitch => self.hi_pitch.as_ref(),
            SequenceKind::Duty => self.duty.as_ref(),
        }
    }

    /// Replace a slot
    pub fn set(&mut self, kind: SequenceKind, seq: Option<Sequence>) {
        match kind {
            SequenceKind::Volume => self.volume = seq,
            SequenceKind::Arpeggio => self.arpeggio = seq,
            SequenceKind::Pitch => self.pitch = seq,
            SequenceKind::HiPitch => self.hi_pitch = seq,
            SequenceKind::Duty => self.duty = seq,
        }
    }
}

/// Note-to-sample mapping of a 2A03 instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpcmAssignment {
    /// Note number (0..95) this entry responds to
    pub note: u8,
    /// Index into the document's sample list
    pub sample: usize,
    /// Playback rate index (0..15)
    #[serde(default = "default_dpcm_pitch")]
    pub pitch: u8,
    /// Loop the sample
    #[serde(default)]
    pub looped: bool,
    /// Initial delta counter value, written to $4011
    #[serde(default)]
    pub delta: Option<u8>,
}

fn default_dpcm_pitch() -> u8 {
    15
}

/// FDS wave and modulation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdsWave {
    /// 64 wave samples, 0..63
    pub wave: Vec<u8>,
    /// 32 modulation table entries, 0..7
    #[serde(default)]
    pub modulation: Vec<u8>,
    /// Modulation frequency (12 bits)
    #[serde(default)]
    pub mod_speed: u16,
    /// Modulation depth (6 bits)
    #[serde(default)]
    pub mod_depth: u8,
    /// Ticks before modulation starts
    #[serde(default)]
    pub mod_delay: u8,
}

/// N163 wavetable settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct N163Wave {
    /// One or more waves of 4-bit samples; the duty sequence selects the wave
    pub waves: Vec<Vec<u8>>,
    /// Sample offset of the wave in N163 RAM
    #[serde(default)]
    pub position: u8,
}

impl N163Wave {
    /// Samples per wave (multiple of 4, at least 4)
    pub fn wave_len(&self) -> usize {
        let len = self.waves.first().map(Vec::len).unwrap_or(0);
        (len.max(4) + 3) & !3
    }
}

/// VRC7 patch selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vrc7Patch {
    /// Built-in patch 1..15, or 0 for the custom patch
    pub patch: u8,
    /// Custom patch registers $00..$07
    #[serde(default)]
    pub custom: [u8; 8],
}

/// Instrument as seen by a channel handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Chip this instrument targets
    pub chip: Chip,
    /// Per-tick sequences
    #[serde(default)]
    pub sequences: SequenceSet,
    /// DPCM note map (2A03 instruments only)
    #[serde(default)]
    pub dpcm: Vec<DpcmAssignment>,
    /// FDS wave (FDS instruments only)
    #[serde(default)]
    pub fds: Option<FdsWave>,
    /// N163 waves (N163 instruments only)
    #[serde(default)]
    pub n163: Option<N163Wave>,
    /// VRC7 patch (VRC7 instruments only)
    #[serde(default)]
    pub vrc7: Option<Vrc7Patch>,
}

impl Instrument {
    /// Empty instrument for a chip
    pub fn new(name: impl Into<String>, chip: Chip) -> Self {
        Instrument {
            name: name.into(),
            chip,
            sequences: SequenceSet::default(),
            dpcm: Vec::new(),
            fds: None,
            n163: None,
            vrc7: None,
        }
    }

    /// DPCM mapping for a note, if any
    pub fn dpcm_for(&self, note: i32) -> Option<&DpcmAssignment> {
        self.dpcm.iter().find(|d| d.note as i32 == note)
    }
}

/// Raw 1-bit delta sample data
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DpcmSample {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Sample bytes, played LSB first
    pub data: Vec<u8>,
}

impl DpcmSample {
    /// Length in bytes as the hardware plays it (multiple of 16, plus one)
    pub fn playable_len(&self) -> usize {
        if self.data.is_empty() {
            return 0;
        }
        ((self.data.len() - 1) & !0x0F) + 1
    }

    /// Value for the $4013 length register
    pub fn length_register(&self) -> u8 {
        (self.playable_len().saturating_sub(1) / 16).min(0xFF) as u8
    }
}
