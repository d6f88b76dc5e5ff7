//! One WAV render driven tick by tick

use super::driver::{EngineCore, TickReport};
use crate::player::{PlayerCursor, PlayerState};
use crate::render::{RenderProgress, RenderReport, RenderSpec, RenderTracker, WavRenderer};
use crate::Result;

pub(crate) struct RenderSession {
    renderer: WavRenderer,
    tracker: RenderTracker,
}

impl RenderSession {
    /// Restart the engine at `cursor` in render mode
    ///
    /// On error the renderer is dropped and its staging file removed.
    pub fn begin(core: &mut EngineCore, renderer: WavRenderer, spec: RenderSpec, cursor: PlayerCursor) -> Result<Self> {
        core.play(cursor, PlayerState::Rendering)?;
        let tracker = RenderTracker::new(spec, core.settings().sample_rate, core.frame_count(cursor.track));
        Ok(RenderSession { renderer, tracker })
    }

    pub fn is_done(&self) -> bool {
        self.tracker.is_done()
    }

    pub fn progress(&self) -> RenderProgress {
        self.tracker.progress()
    }

    /// Generate and write one tick; `buf` is scratch space
    pub fn step(&mut self, core: &mut EngineCore, buf: &mut Vec<i16>) -> Result<TickReport> {
        buf.clear();
        let in_song = self.tracker.in_song();
        let report = core.tick(buf);
        let block = self.tracker.next_block(buf.len());
        buf.truncate(block);
        self.renderer.write_block(buf)?;
        self.tracker
            .record(block, in_song.then_some(report.outcome), core.player().loops());

        if in_song && !self.tracker.in_song() {
            core.stop();
        }
        if report.stopped {
            self.tracker.finish_song();
        }
        Ok(report)
    }

    /// Persist the file
    pub fn finish(self) -> Result<RenderReport> {
        self.renderer.finalize()
    }

    /// Discard the file
    pub fn cancel(self) {
        self.renderer.cancel();
    }
}
