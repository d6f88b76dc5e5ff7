//! Tick/row/frame sequencer
//!
//! [`Player`] owns the cursor, the row timer and the note queue. Each call to
//! [`Player::tick`] runs one engine tick: at a row boundary the pattern row is
//! read and its global effects evaluated, pending notes are handed to the
//! channel handlers, every handler is processed, and the cursor advances when
//! the row timer runs out.

mod cursor;
mod queue;
mod tempo;

pub use cursor::{PlayerCursor, PlayerState};
pub use queue::{NotePriority, NoteQueue};
pub use tempo::TempoCounter;

use crate::channels::{ChannelSet, TickContext};
use crate::document::{Document, EffectKind, Note};
use crate::{Result, SoundGenError};

/// What happened during a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// A new row was read at the start of this tick
    pub new_row: bool,
    /// The cursor moved to a different frame after this tick
    pub frame_changed: bool,
    /// The song wrapped or jumped backwards after this tick
    pub looped: bool,
    /// A `Cxx` halt took effect after this tick
    pub halted: bool,
}

/// Sequencer state machine
#[derive(Debug, Clone)]
pub struct Player {
    state: PlayerState,
    cursor: PlayerCursor,
    tempo: TempoCounter,
    queue: NoteQueue,
    row_pending: bool,
    jump: Option<usize>,
    skip: Option<usize>,
    halt_pending: bool,
    queued_frame: Option<usize>,
    ticks_played: u64,
    loops: u32,
}

impl Default for Player {
    fn default() -> Self {
        Player::new(0, 60)
    }
}

impl Player {
    /// Stopped player for `channels` channels at the given tick rate
    pub fn new(channels: usize, tick_rate: u32) -> Self {
        Player {
            state: PlayerState::Stopped,
            cursor: PlayerCursor::default(),
            tempo: TempoCounter::new(6, 150, tick_rate),
            queue: NoteQueue::new(channels),
            row_pending: false,
            jump: None,
            skip: None,
            halt_pending: false,
            queued_frame: None,
            ticks_played: 0,
            loops: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Current position
    pub fn cursor(&self) -> PlayerCursor {
        self.cursor
    }

    /// Row timer
    pub fn tempo(&self) -> &TempoCounter {
        &self.tempo
    }

    /// Ticks since playback started
    pub fn ticks_played(&self) -> u64 {
        self.ticks_played
    }

    /// Completed loops of the song
    pub fn loops(&self) -> u32 {
        self.loops
    }

    /// Change the engine tick rate
    pub fn set_tick_rate(&mut self, rate: u32) {
        self.tempo.set_tick_rate(rate);
    }

    /// Change the number of channels, dropping queued notes
    pub fn set_channel_count(&mut self, channels: usize) {
        self.queue.resize(channels);
    }

    /// Row highlight used for the BPM display
    pub fn set_highlight_rows(&mut self, highlight: (u32, u32)) {
        self.tempo.set_highlight_rows(highlight);
    }

    /// Frame to continue with once the current frame ends
    pub fn set_queue_frame(&mut self, frame: Option<usize>) {
        self.queued_frame = frame;
    }

    /// Frame queued for the end of the current frame
    pub fn queue_frame(&self) -> Option<usize> {
        self.queued_frame
    }

    /// Offer a note to a channel
    pub fn queue_note(&mut self, channel: usize, note: Note, priority: NotePriority) -> bool {
        self.queue.push(channel, note, priority)
    }

    /// Check a start position against a document
    pub fn validate(doc: &dyn Document, cursor: PlayerCursor) -> Result<()> {
        if cursor.track >= doc.track_count() {
            return Err(SoundGenError::InvalidPlayback(format!(
                "track {} out of range ({} tracks)",
                cursor.track,
                doc.track_count()
            )));
        }
        let frames = doc.frame_count(cursor.track);
        if cursor.frame >= frames {
            return Err(SoundGenError::InvalidPlayback(format!(
                "frame {} out of range ({frames} frames)",
                cursor.frame
            )));
        }
        let rows = doc.pattern_length(cursor.track);
        if cursor.row >= rows {
            return Err(SoundGenError::InvalidPlayback(format!(
                "row {} out of range ({rows} rows)",
                cursor.row
            )));
        }
        Ok(())
    }

    /// Begin sequencing at `cursor`; a running session is replaced
    pub fn start(&mut self, doc: &dyn Document, cursor: PlayerCursor, state: PlayerState) -> Result<()> {
        Self::validate(doc, cursor)?;
        self.cursor = PlayerCursor { tick: 0, ..cursor };
        self.state = state;
        self.tempo
            .reset(doc.song_speed(cursor.track), doc.song_tempo(cursor.track));
        self.tempo.set_highlight_rows(doc.highlight(cursor.track));
        self.row_pending = true;
        self.jump = None;
        self.skip = None;
        self.halt_pending = false;
        self.queued_frame = None;
        self.ticks_played = 0;
        self.loops = 0;
        self.queue.clear();
        log::debug!("player {:?} at {}", state, self.cursor);
        Ok(())
    }

    /// Stop sequencing after the current tick
    pub fn stop(&mut self) {
        if self.state.is_sequencing() {
            self.state = PlayerState::Halting;
        }
    }

    /// Finish a halt
    pub fn halted(&mut self) {
        self.state = PlayerState::Stopped;
        self.row_pending = false;
        self.queue.clear();
    }

    /// Move to the start of a frame immediately
    pub fn move_to_frame(&mut self, doc: &dyn Document, frame: usize, channels: &mut ChannelSet) {
        let frames = doc.frame_count(self.cursor.track).max(1);
        self.player_jump_to(frame % frames, 0, channels);
    }

    /// Place the cursor on a frame/row and start a new row there
    pub fn player_jump_to(&mut self, frame: usize, row: usize, channels: &mut ChannelSet) {
        self.cursor.frame = frame;
        self.cursor.row = row;
        self.cursor.tick = 0;
        self.row_pending = true;
        self.jump = None;
        self.skip = None;
        channels.reset_effects();
    }

    /// Continue at a row of the next frame
    pub fn player_skip_to(&mut self, doc: &dyn Document, row: usize, channels: &mut ChannelSet) {
        let frames = doc.frame_count(self.cursor.track).max(1);
        let next = (self.cursor.frame + 1) % frames;
        if next == 0 {
            self.loops += 1;
        }
        let rows = doc.pattern_length(self.cursor.track).max(1);
        self.player_jump_to(next, row.min(rows - 1), channels);
    }

    fn read_pattern_row(&mut self, doc: &dyn Document) -> Vec<Note> {
        let count = self.queue.len();
        let mut notes = Vec::with_capacity(count);
        for channel in 0..count {
            let note = doc.note(self.cursor.track, self.cursor.frame, channel, self.cursor.row);
            self.queue.push(channel, note, NotePriority::Pattern);
            notes.push(note);
        }
        notes
    }

    fn evaluate_global_effects(&mut self, doc: &dyn Document, notes: &[Note]) {
        let split = doc.speed_split_point() as u32;
        for entry in notes.iter().flat_map(|n| n.effects.iter()) {
            let param = entry.param as usize;
            match entry.kind() {
                Some(EffectKind::Speed) if param > 0 => {
                    if (param as u32) < split {
                        self.tempo.set_speed(param as u32);
                    } else {
                        self.tempo.set_tempo(param as u32);
                    }
                }
                Some(EffectKind::Jump) => self.jump = Some(param),
                Some(EffectKind::Skip) => self.skip = Some(param),
                Some(EffectKind::Halt) => self.halt_pending = true,
                _ => {}
            }
        }
    }

    /// Run one engine tick
    pub fn tick(&mut self, doc: &dyn Document, channels: &mut ChannelSet, ctx: &TickContext) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let sequencing = self.state.is_sequencing();

        if sequencing && self.row_pending {
            self.row_pending = false;
            let notes = self.read_pattern_row(doc);
            self.evaluate_global_effects(doc, &notes);
            self.tempo.start_row();
            outcome.new_row = true;
        }

        for (channel, note) in self.queue.drain() {
            if let Some(handler) = channels.get_mut(channel) {
                handler.play_note(&note, ctx);
            }
        }
        channels.process(ctx);

        if !sequencing {
            return outcome;
        }

        self.ticks_played += 1;
        self.cursor.tick += 1;
        if self.tempo.tick() {
            let frame = self.cursor.frame;
            let loops = self.loops;
            self.advance_row(doc, channels);
            outcome.frame_changed = self.cursor.frame != frame;
            outcome.looped = self.loops != loops;
            if std::mem::take(&mut self.halt_pending) {
                self.state = PlayerState::Halting;
                outcome.halted = true;
            }
        }
        outcome
    }

    fn advance_row(&mut self, doc: &dyn Document, channels: &mut ChannelSet) {
        let track = self.cursor.track;
        let frames = doc.frame_count(track).max(1);
        let rows = doc.pattern_length(track).max(1);

        if let Some(frame) = self.jump.take() {
            let target = frame % frames;
            let row = self.skip.take().unwrap_or(0).min(rows - 1);
            if target <= self.cursor.frame {
                self.loops += 1;
            }
                self.player_jump_to(target, row, channels);
            return;
        }
        if let Some(row) = self.skip.take() {
            self.player_skip_to(doc, row, channels);
            return;
        }

        self.cursor.row += 1;
        self.cursor.tick = 0;
        self.row_pending = true;
        if self.cursor.row >= rows {
            self.cursor.row = 0;
                let next = match self.queued_frame.take() {
                Some(frame) => frame % frames,
                None => self.cursor.frame + 1,
            };
            if next >= frames {
                self.cursor.frame = 0;
                self.loops += 1;
            } else {
                self.cursor.frame = next;
            }
        }
    }
}
