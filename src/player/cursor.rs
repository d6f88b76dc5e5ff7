//! Playback position and state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequencer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    /// Not sequencing
    #[default]
    Stopped,
    /// Sequencing to the output sink
    Playing,
    /// Finishing the current tick before going silent
    Halting,
    /// Sequencing to a file renderer
    Rendering,
}

impl PlayerState {
    /// Whether rows are being read
    pub fn is_sequencing(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Rendering)
    }
}

/// Track, frame, row and tick-within-row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PlayerCursor {
    /// Track (sub-song) index
    pub track: usize,
    /// Frame index
    pub frame: usize,
    /// Row within the frame
    pub row: usize,
    /// Tick within the row
    pub tick: u32,
}

impl PlayerCursor {
    /// First row of a track
    pub fn start_of(track: usize) -> Self {
        PlayerCursor {
            track,
            ..Self::default()
        }
    }

    /// Arbitrary position
    pub fn at(track: usize, frame: usize, row: usize) -> Self {
        PlayerCursor {
            track,
            frame,
            row,
            tick: 0,
        }
    }
}

impl fmt::Display for PlayerCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "track {} frame {:02X} row {:02X}",
            self.track, self.frame, self.row
        )
    }
}
