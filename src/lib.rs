//! NES/Famicom sound engine
//!
//! Emulates the Ricoh 2A03 APU together with the Famicom expansion sound chips
//! (VRC6, VRC7, FDS, MMC5, Namco 163 and Sunsoft 5B) and drives them from a
//! tick-based tracker sequencer. Playback runs on a dedicated worker thread fed
//! by a command inbox; audio is delivered either to a live output sink or to an
//! offline WAV renderer that reproduces the same samples deterministically.
//!
//! # Features
//! - Register-level emulation of every supported chip with a shared mixer
//! - NTSC/PAL period tables and legacy/new vibrato tables
//! - Per-channel effect processing (arpeggio, portamento, vibrato, tremolo,
//!   volume slide, note delay/cut/release, transpose, DPCM control)
//! - Frame/row/tick sequencing with fractional tempo accounting
//! - Sample preview on the DPCM channel without disturbing playback
//! - Register write capture and per-tick instrument recording
//!
//! # Crate feature flags
//! - `streaming` (opt-in): live audio output through rodio (`streaming::AudioDevice`)
//! - `cli` (opt-in): the `famisound` command line player/renderer
//!
//! # Quick start
//! ## Render a document to WAV
//! ```no_run
//! use std::sync::Arc;
//! use famisound::document::MemoryDocument;
//! use famisound::engine::render_document;
//! use famisound::player::PlayerCursor;
//! use famisound::render::{RenderLength, RenderSpec};
//! use famisound::Settings;
//!
//! let json = std::fs::read_to_string("song.json").unwrap();
//! let doc = Arc::new(MemoryDocument::from_json(&json).unwrap());
//! let spec = RenderSpec::new(RenderLength::Loops(1));
//! let report = render_document(doc, &Settings::default(), PlayerCursor::start_of(0), spec, "song.wav").unwrap();
//! println!("{} samples", report.samples_written);
//! ```
//!
//! ## Drive the engine thread
//! ```no_run
//! use std::sync::Arc;
//! use famisound::document::MemoryDocument;
//! use famisound::player::PlayerCursor;
//! use famisound::streaming::NullSink;
//! use famisound::{Settings, SoundGen};
//!
//! let doc = Arc::new(MemoryDocument::from_json("{}").unwrap());
//! let engine = SoundGen::spawn(Settings::default(), Box::new(NullSink::paced())).unwrap();
//! engine.assign_document(doc).unwrap();
//! engine.play(PlayerCursor::start_of(0)).unwrap();
//! ```

#![warn(missing_docs)]

// Domain modules
pub mod apu; // Chip emulation, mixer and register capture
pub mod channels; // Per-channel note/effect handlers
pub mod chip; // Chip identities, machine types and channel layout
pub mod config; // Engine settings
pub mod document; // Document collaborator interface and in-memory document
pub mod engine; // Worker thread, command inbox and query surface
pub mod instrument; // Instrument and DPCM sample data consumed by handlers
pub mod player; // Tick/row/frame sequencer
pub mod preview; // DPCM sample preview
pub mod recorder; // Instrument recorder
pub mod render; // Offline WAV rendering
pub mod streaming; // Ring buffer and output sinks
pub mod tables; // Period and vibrato tables
pub mod visualizer; // Visualizer handoff

/// Error types for sound engine operations
#[derive(thiserror::Error, Debug)]
pub enum SoundGenError {
    /// A playback request was rejected before touching engine state
    #[error("Invalid playback request: {0}")]
    InvalidPlayback(String),

    /// Rendering to file failed; the partial file has been discarded
    #[error("Render error: {0}")]
    Render(String),

    /// Output device could not be opened or was lost
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed document data
    #[error("Document error: {0}")]
    Document(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encoder error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The engine thread is no longer accepting commands
    #[error("Sound engine is not running")]
    EngineClosed,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SoundGenError {
    /// Converts a String into `SoundGenError::Other`.
    ///
    /// Prefer the specific variants where the failure category is known;
    /// callers match on `InvalidPlayback`, `Render` and `AudioDevice`.
    fn from(msg: String) -> Self {
        SoundGenError::Other(msg)
    }
}

impl From<&str> for SoundGenError {
    /// Converts a string slice into `SoundGenError::Other`.
    fn from(msg: &str) -> Self {
        SoundGenError::Other(msg.to_string())
    }
}

/// Result type for sound engine operations
pub type Result<T> = std::result::Result<T, SoundGenError>;

// Public API exports
pub use apu::{Apu, RegisterState};
pub use chip::{Chip, ChipMask, Machine};
pub use config::Settings;
pub use engine::{EngineEvent, SoundGen};
pub use player::{PlayerCursor, PlayerState};
pub use render::{RenderLength, RenderSpec};
pub use tables::{PeriodTables, VibratoMode, VibratoTable};
