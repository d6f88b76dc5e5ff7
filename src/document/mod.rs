//! Document collaborator interface
//!
//! The engine only ever reads a document: pattern cells, instrument lookups and
//! the track/frame/row geometry. [`Document`] is that read-only surface, and
//! [`MemoryDocument`] is a plain in-memory implementation that can be built in
//! code or loaded from JSON. Module-file parsing is deliberately not part of
//! this crate.
//!
//! Every accessor is total: out-of-range coordinates read as empty cells or
//! neutral values so a malformed document can never stop the worker.

pub mod effect;
pub mod note;

pub use effect::{EffectEntry, EffectKind};
pub use note::{Note, NoteValue, MAX_EFFECT_COLUMNS};

use crate::chip::{channel_layout, Chip, ChipMask, Machine, TrackerChannel, MAX_N163_CHANNELS};
use crate::instrument::{DpcmSample, Instrument};
use crate::tables::VibratoMode;
use crate::{Result, SoundGenError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default `Fxx` value at which speed changes become tempo changes
pub const DEFAULT_SPEED_SPLIT: u8 = 32;

/// Default rows per pattern
pub const DEFAULT_PATTERN_LENGTH: usize = 64;

/// Default ticks per row
pub const DEFAULT_SPEED: u32 = 6;

/// Default tempo in BPM
pub const DEFAULT_TEMPO: u32 = 150;

/// Highest instrument index
pub const MAX_INSTRUMENTS: usize = 64;

/// Read-only view of a tracked-music document
pub trait Document: Send + Sync {
    /// Machine the song was written for
    fn machine(&self) -> Machine;

    /// Expansion chips used by the song
    fn expansion_chips(&self) -> ChipMask;

    /// Number of N163 channels (1..=8)
    fn n163_channels(&self) -> usize {
        1
    }

    /// Custom engine tick rate in Hz, if any
    fn engine_speed(&self) -> Option<u32> {
        None
    }

    /// Vibrato curve
    fn vibrato_mode(&self) -> VibratoMode {
        VibratoMode::New
    }

    /// Whether pitch effects move in linear (1/16 semitone) steps
    fn linear_pitch(&self) -> bool {
        false
    }

    /// `Fxx` parameters at or above this value set tempo instead of speed
    fn speed_split_point(&self) -> u8 {
        DEFAULT_SPEED_SPLIT
    }

    /// Number of tracks (sub-songs)
    fn track_count(&self) -> usize;

    /// Frames in a track
    fn frame_count(&self, track: usize) -> usize;

    /// Rows per frame in a track
    fn pattern_length(&self, track: usize) -> usize;

    /// Initial ticks per row
    fn song_speed(&self, track: usize) -> u32;

    /// Initial tempo in BPM (0 disables tempo accounting)
    fn song_tempo(&self, track: usize) -> u32;

    /// Primary and secondary row highlight
    fn highlight(&self, _track: usize) -> (u32, u32) {
        (4, 16)
    }

    /// Effect columns shown for a channel
    fn effect_columns(&self, _track: usize, _channel: usize) -> usize {
        MAX_EFFECT_COLUMNS
    }

    /// Pattern cell; out-of-range coordinates read as empty
    fn note(&self, track: usize, frame: usize, channel: usize, row: usize) -> Note;

    /// Instrument lookup
    fn instrument(&self, index: u8) -> Option<Arc<Instrument>>;

    /// DPCM sample lookup
    fn dpcm_sample(&self, index: usize) -> Option<Arc<DpcmSample>>;

    /// Tracker channel layout
    fn channels(&self) -> Vec<TrackerChannel> {
        channel_layout(self.expansion_chips(), self.n163_channels())
    }

    /// Number of tracker channels
    fn channel_count(&self) -> usize {
        self.channels().len()
    }
}

/// One track of a [`MemoryDocument`]
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Track title
    pub name: String,
    /// Initial speed
    pub speed: u32,
    /// Initial tempo
    pub tempo: u32,
    /// Rows per frame
    pub pattern_length: usize,
    /// Row highlight
    pub highlight: (u32, u32),
    /// Pattern index per channel, per frame
    frames: Vec<Vec<usize>>,
    /// Pattern rows per channel, per pattern index
    patterns: Vec<Vec<Vec<Note>>>,
}

impl Track {
    fn new(name: impl Into<String>, channels: usize) -> Self {
        Track {
            name: name.into(),
            speed: DEFAULT_SPEED,
            tempo: DEFAULT_TEMPO,
            pattern_length: DEFAULT_PATTERN_LENGTH,
            highlight: (4, 16),
            frames: vec![vec![0; channels]],
            patterns: vec![Vec::new(); channels],
        }
    }

    fn pattern_index(&self, frame: usize, channel: usize) -> Option<usize> {
        self.frames.get(frame).map(|f| f.get(channel).copied().unwrap_or(0))
    }

    fn cell(&self, frame: usize, channel: usize, row: usize) -> Note {
        if row >= self.pattern_length {
            return Note::empty();
        }
        self.pattern_index(frame, channel)
            .and_then(|p| self.patterns.get(channel)?.get(p)?.get(row).copied())
            .unwrap_or_default()
    }

    fn cell_mut(&mut self, pattern: usize, channel: usize, row: usize) -> Option<&mut Note> {
        let length = self.pattern_length;
        let patterns = self.patterns.get_mut(channel)?;
        if patterns.len() <= pattern {
            patterns.resize(pattern + 1, Vec::new());
        }
        let rows = &mut patterns[pattern];
        if rows.len() < length {
            rows.resize(length, Note::empty());
        }
        rows.get_mut(row)
    }
}

/// In-memory document
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    machine: Machine,
    chips: ChipMask,
    n163_channels: usize,
    engine_speed: Option<u32>,
    vibrato_mode: VibratoMode,
    linear_pitch: bool,
    split_point: u8,
    tracks: Vec<Track>,
    instruments: Vec<Option<Arc<Instrument>>>,
    samples: Vec<Arc<DpcmSample>>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new(Machine::Ntsc, ChipMask::empty())
    }
}

impl MemoryDocument {
    /// Document with one empty track
    pub fn new(machine: Machine, chips: ChipMask) -> Self {
        let mut doc = MemoryDocument {
            machine,
            chips,
            n163_channels: 1,
            engine_speed: None,
            vibrato_mode: VibratoMode::New,
            linear_pitch: false,
            split_point: DEFAULT_SPEED_SPLIT,
            tracks: Vec::new(),
            instruments: vec![None; MAX_INSTRUMENTS],
            samples: Vec::new(),
        };
        doc.add_track("");
        doc
    }

    /// Set the N163 channel count; rebuilds track channel slots
    pub fn set_n163_channels(&mut self, channels: usize) {
        self.n163_channels = channels.clamp(1, MAX_N163_CHANNELS);
        let count = self.channel_count();
        for track in &mut self.tracks {
            for frame in &mut track.frames {
                frame.resize(count, 0);
            }
            track.patterns.resize(count, Vec::new());
        }
    }

    /// Set a custom engine tick rate
    pub fn set_engine_speed(&mut self, rate: Option<u32>) {
        self.engine_speed = rate.filter(|r| *r > 0);
    }

    /// Select the vibrato curve
    pub fn set_vibrato_mode(&mut self, mode: VibratoMode) {
        self.vibrato_mode = mode;
    }

    /// Enable linear pitch slides
    pub fn set_linear_pitch(&mut self, linear: bool) {
        self.linear_pitch = linear;
    }

    /// Change the `Fxx` speed/tempo split point
    pub fn set_speed_split_point(&mut self, split: u8) {
        self.split_point = split.max(1);
    }

    /// Append a track and return its index
    pub fn add_track(&mut self, name: impl Into<String>) -> usize {
        let channels = self.channel_count();
        self.tracks.push(Track::new(name, channels));
        self.tracks.len() - 1
    }

    /// Mutable access to a track's timing fields
    pub fn track_mut(&mut self, track: usize) -> Option<&mut Track> {
        self.tracks.get_mut(track)
    }

    /// Resize a track's frame list; new frames use pattern 0
    pub fn set_frame_count(&mut self, track: usize, frames: usize) {
        let channels = self.channel_count();
        if let Some(t) = self.tracks.get_mut(track) {
            t.frames.resize(frames.max(1), vec![0; channels]);
        }
    }

    /// Assign pattern indices for one frame
    pub fn set_frame(&mut self, track: usize, frame: usize, patterns: &[usize]) {
        let channels = self.channel_count();
        if let Some(t) = self.tracks.get_mut(track) {
            if t.frames.len() <= frame {
                t.frames.resize(frame + 1, vec![0; channels]);
            }
            for (slot, pattern) in t.frames[frame].iter_mut().zip(patterns) {
                *slot = *pattern;
            }
        }
    }

    /// Write a cell into the pattern currently placed at (frame, channel)
    pub fn set_note(&mut self, track: usize, frame: usize, channel: usize, row: usize, note: Note) {
        if let Some(t) = self.tracks.get_mut(track) {
            if let Some(pattern) = t.pattern_index(frame, channel) {
                if let Some(cell) = t.cell_mut(pattern, channel, row) {
                    *cell = note;
                }
            }
        }
    }

    /// Store an instrument at an index
    pub fn set_instrument(&mut self, index: u8, instrument: Instrument) {
        if let Some(slot) = self.instruments.get_mut(index as usize) {
            *slot = Some(Arc::new(instrument));
        }
    }

    /// Append a DPCM sample and return its index
    pub fn add_sample(&mut self, sample: DpcmSample) -> usize {
        self.samples.push(Arc::new(sample));
        self.samples.len() - 1
    }

    /// Load a document from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let file: SongFile = serde_json::from_str(json)?;
        file.into_document()
    }

    /// Serialize the document to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&SongFile::from_document(self))?)
    }
}

impl Document for MemoryDocument {
    fn machine(&self) -> Machine {
        self.machine
    }

    fn expansion_chips(&self) -> ChipMask {
        self.chips
    }

    fn n163_channels(&self) -> usize {
        self.n163_channels
    }

    fn engine_speed(&self) -> Option<u32> {
        self.engine_speed
    }

    fn vibrato_mode(&self) -> VibratoMode {
        self.vibrato_mode
    }

    fn linear_pitch(&self) -> bool {
        self.linear_pitch
    }

    fn speed_split_point(&self) -> u8 {
        self.split_point
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn frame_count(&self, track: usize) -> usize {
        self.tracks.get(track).map(|t| t.frames.len()).unwrap_or(0)
    }

    fn pattern_length(&self, track: usize) -> usize {
        self.tracks.get(track).map(|t| t.pattern_length).unwrap_or(0)
    }

    fn song_speed(&self, track: usize) -> u32 {
        self.tracks.get(track).map(|t| t.speed).unwrap_or(DEFAULT_SPEED)
    }

    fn song_tempo(&self, track: usize) -> u32 {
        self.tracks.get(track).map(|t| t.tempo).unwrap_or(DEFAULT_TEMPO)
    }

    fn highlight(&self, track: usize) -> (u32, u32) {
        self.tracks.get(track).map(|t| t.highlight).unwrap_or((4, 16))
    }

    fn note(&self, track: usize, frame: usize, channel: usize, row: usize) -> Note {
        self.tracks
            .get(track)
            .map(|t| t.cell(frame, channel, row))
            .unwrap_or_default()
    }

    fn instrument(&self, index: u8) -> Option<Arc<Instrument>> {
        self.instruments.get(index as usize).cloned().flatten()
    }

    fn dpcm_sample(&self, index: usize) -> Option<Arc<DpcmSample>> {
        self.samples.get(index).cloned()
    }
}

// JSON form of a document

fn default_speed() -> u32 {
    DEFAULT_SPEED
}

fn default_tempo() -> u32 {
    DEFAULT_TEMPO
}

fn default_rows() -> usize {
    DEFAULT_PATTERN_LENGTH
}

fn default_highlight() -> (u32, u32) {
    (4, 16)
}

fn default_n163() -> usize {
    1
}

fn default_split() -> u8 {
    DEFAULT_SPEED_SPLIT
}

#[derive(Debug, Serialize, Deserialize)]
struct TrackFile {
    #[serde(default)]
    name: String,
    #[serde(default = "default_speed")]
    speed: u32,
    #[serde(default = "default_tempo")]
    tempo: u32,
    #[serde(default = "default_rows")]
    rows: usize,
    #[serde(default = "default_highlight")]
    highlight: (u32, u32),
    /// frames[frame][channel] = pattern index
    #[serde(default)]
    frames: Vec<Vec<usize>>,
    /// patterns[channel][pattern] = row cells as text
    #[serde(default)]
    patterns: Vec<Vec<Vec<String>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SongFile {
    #[serde(default)]
    machine: Machine,
    #[serde(default)]
    chips: Vec<Chip>,
    #[serde(default = "default_n163")]
    n163_channels: usize,
    #[serde(default)]
    engine_speed: Option<u32>,
    #[serde(default)]
    vibrato: VibratoMode,
    #[serde(default)]
    linear_pitch: bool,
    #[serde(default = "default_split")]
    speed_split: u8,
    #[serde(default)]
    instruments: Vec<Option<Instrument>>,
    #[serde(default)]
    samples: Vec<DpcmSample>,
    #[serde(default)]
    tracks: Vec<TrackFile>,
}

impl SongFile {
    fn into_document(self) -> Result<MemoryDocument> {
        let mut doc = MemoryDocument::new(self.machine, ChipMask::from_chips(self.chips));
        doc.set_n163_channels(self.n163_channels);
        doc.set_engine_speed(self.engine_speed);
        doc.vibrato_mode = self.vibrato;
        doc.linear_pitch = self.linear_pitch;
        doc.set_speed_split_point(self.speed_split);

        if self.instruments.len() > MAX_INSTRUMENTS {
            return Err(SoundGenError::Document(format!(
                "{} instruments, at most {MAX_INSTRUMENTS} supported",
                self.instruments.len()
            )));
        }
        for (index, inst) in self.instruments.into_iter().enumerate() {
            if let Some(inst) = inst {
                doc.set_instrument(index as u8, inst);
            }
        }
        for sample in self.samples {
            doc.add_sample(sample);
        }

        if !self.tracks.is_empty() {
            doc.tracks.clear();
        }
        let channels = doc.channel_count();
        for (index, file) in self.tracks.into_iter().enumerate() {
            let mut track = Track::new(file.name, channels);
            track.speed = file.speed.max(1);
            track.tempo = file.tempo;
            track.pattern_length = file.rows.clamp(1, 256);
            track.highlight = file.highlight;
            if !file.frames.is_empty() {
                track.frames = file
                    .frames
                    .into_iter()
                    .map(|mut f| {
                        f.resize(channels, 0);
                        f
                    })
                    .collect();
            }
            for (channel, patterns) in file.patterns.into_iter().enumerate().take(channels) {
                let parsed = patterns
                    .iter()
                    .map(|rows| {
                        rows.iter()
                            .map(|cell| cell.parse::<Note>())
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| {
                        SoundGenError::Document(format!("track {index} channel {channel}: {e}"))
                    })?;
                track.patterns[channel] = parsed;
            }
            doc.tracks.push(track);
        }
        Ok(doc)
    }

    fn from_document(doc: &MemoryDocument) -> Self {
        SongFile {
            machine: doc.machine,
            chips: doc.chips.chips().into_iter().filter(|c| *c != Chip::Apu2A03).collect(),
            n163_channels: doc.n163_channels,
            engine_speed: doc.engine_speed,
            vibrato: doc.vibrato_mode,
            linear_pitch: doc.linear_pitch,
            speed_split: doc.split_point,
            instruments: doc
                .instruments
                .iter()
                .map(|i| i.as_deref().cloned())
                .collect(),
            samples: doc.samples.iter().map(|s| (**s).clone()).collect(),
            tracks: doc
                .tracks
                .iter()
                .map(|t| TrackFile {
                    name: t.name.clone(),
                    speed: t.speed,
                    tempo: t.tempo,
                    rows: t.pattern_length,
                    highlight: t.highlight,
                    frames: t.frames.clone(),
                    patterns: t
                        .patterns
                        .iter()
                        .map(|pats| {
                            pats.iter()
                                .map(|rows| rows.iter().map(Note::to_string).collect())
                                .collect()
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
