//! Snapshot of engine state published for queries

use crate::channels::KeyState;
use crate::chip::ChannelType;
use crate::player::{PlayerCursor, PlayerState};
use crate::render::{RenderProgress, RenderReport};
use crate::config::Settings;
use crate::Result;

/// One channel as seen from outside the engine thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Physical channel
    pub channel: ChannelType,
    /// Output volume of the last tick (0..15)
    pub volume: i32,
    /// Last triggered note
    pub key_state: Option<KeyState>,
    /// Human-readable effect state
    pub state: String,
    /// Selected instrument
    pub instrument: Option<u8>,
    /// Sequence positions played on the last tick, in `SequenceKind::ALL` order
    pub sequence_pos: [Option<usize>; 5],
}

/// Engine state, refreshed by the worker once per output buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStatus {
    /// Sequencer state
    pub state: PlayerState,
    /// Current position
    pub cursor: PlayerCursor,
    /// Ticks since playback started
    pub ticks: u64,
    /// Completed song loops
    pub loops: u32,
    /// Engine tick rate in Hz
    pub frame_rate: u32,
    /// Rows per minute / 4
    pub tempo: f64,
    /// Smoothed tempo over the last rows
    pub average_bpm: f64,
    /// Tempo in beats of the row highlight
    pub current_bpm: f64,
    /// Frame queued for the end of the current frame
    pub queue_frame: Option<usize>,
    /// Per-channel state in tracker order
    pub channels: Vec<ChannelStatus>,
    /// Progress of the running render
    pub render_progress: Option<RenderProgress>,
    /// A sample preview is playing
    pub previewing: bool,
    /// A document is loaded
    pub has_document: bool,
}

/// Notification from the engine thread
#[derive(Debug)]
pub enum EngineEvent {
    /// A new row started
    PositionChanged(PlayerCursor),
    /// Playback stopped (`Cxx`, stop request or end of render)
    Halted,
    /// A render ended; errors mean the file was discarded
    RenderFinished(Result<RenderReport>),
    /// A sample preview played out or was cancelled
    PreviewDone,
    /// The output device failed; audio continues into a silent sink
    DeviceError(String),
    /// Settings were re-read
    SettingsLoaded(Result<Settings>),
}
