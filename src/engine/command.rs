//! Commands accepted by the engine thread

use crate::chip::ChipMask;
use crate::document::{Document, Note};
use crate::instrument::DpcmSample;
use crate::player::{NotePriority, PlayerCursor};
use crate::render::{RenderSpec, WavRenderer};
use std::fmt;
use std::sync::Arc;

/// Message to the engine thread; applied in submission order
pub(crate) enum Command {
    AssignDocument(Arc<dyn Document>),
    RemoveDocument,
    Play(PlayerCursor),
    Stop,
    Reset,
    StartRender {
        renderer: WavRenderer,
        spec: RenderSpec,
        cursor: PlayerCursor,
    },
    StopRender,
    PreviewSample {
        sample: Arc<DpcmSample>,
        offset: u8,
        pitch: u8,
    },
    CancelPreview,
    WriteApu(u16, u8),
    SetChip(ChipMask),
    LoadSettings,
    SilentAll,
    QueueNote {
        channel: usize,
        note: Note,
        priority: NotePriority,
    },
    MoveToFrame(usize),
    SetQueueFrame(Option<usize>),
    JumpTo {
        frame: usize,
        row: usize,
    },
    SkipTo(usize),
    SetHighlight((u32, u32)),
    ForceReloadInstruments,
    WaveChanged,
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AssignDocument(doc) => write!(f, "AssignDocument({} tracks)", doc.track_count()),
            Command::RemoveDocument => f.write_str("RemoveDocument"),
            Command::Play(cursor) => write!(f, "Play({cursor})"),
            Command::Stop => f.write_str("Stop"),
            Command::Reset => f.write_str("Reset"),
            Command::StartRender { renderer, spec, cursor } => write!(
                f,
                "StartRender({}, {:?}, {cursor})",
                renderer.target().display(),
                spec.length
            ),
            Command::StopRender => f.write_str("StopRender"),
            Command::PreviewSample { sample, offset, pitch } => {
                write!(f, "PreviewSample({}, {offset}, {pitch})", sample.name)
            }
            Command::CancelPreview => f.write_str("CancelPreview"),
            Command::WriteApu(addr, value) => write!(f, "WriteApu(${addr:04X}, ${value:02X})"),
            Command::SetChip(chips) => write!(f, "SetChip({chips:?})"),
            Command::LoadSettings => f.write_str("LoadSettings"),
            Command::SilentAll => f.write_str("SilentAll"),
            Command::QueueNote { channel, priority, .. } => {
                write!(f, "QueueNote({channel}, {priority:?})")
            }
            Command::MoveToFrame(frame) => write!(f, "MoveToFrame({frame})"),
            Command::SetQueueFrame(frame) => write!(f, "SetQueueFrame({frame:?})"),
            Command::JumpTo { frame, row } => write!(f, "JumpTo({frame}, {row})"),
            Command::SkipTo(row) => write!(f, "SkipTo({row})"),
            Command::SetHighlight(rows) => write!(f, "SetHighlight({rows:?})"),
            Command::ForceReloadInstruments => f.write_str("ForceReloadInstruments"),
            Command::WaveChanged => f.write_str("WaveChanged"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}
