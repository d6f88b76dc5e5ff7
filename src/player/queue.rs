//! Per-channel pending notes

use crate::document::Note;

/// Source of a queued note; higher wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotePriority {
    /// Read from the pattern
    Pattern,
    /// Auditioned from the editor
    Preview,
    /// Played live from a keyboard
    Live,
}

/// One pending note per channel, resolved by priority
#[derive(Debug, Clone, Default)]
pub struct NoteQueue {
    slots: Vec<Option<(Note, NotePriority)>>,
}

impl NoteQueue {
    /// Queue for `channels` channels
    pub fn new(channels: usize) -> Self {
        NoteQueue {
            slots: vec![None; channels],
        }
    }

    /// Change the channel count, dropping pending notes
    pub fn resize(&mut self, channels: usize) {
        self.slots.clear();
        self.slots.resize(channels, None);
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the queue has no channels
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Offer a note; it replaces a pending note of lower or equal priority
    ///
    /// Returns false when the channel does not exist or a higher-priority note
    /// is already pending.
    pub fn push(&mut self, channel: usize, note: Note, priority: NotePriority) -> bool {
        let Some(slot) = self.slots.get_mut(channel) else {
            return false;
        };
        match slot {
            Some((_, pending)) if *pending > priority => false,
            _ => {
                *slot = Some((note, priority));
                true
            }
        }
    }

    /// Take every pending note in channel order
    pub fn drain(&mut self) -> Vec<(usize, Note)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(ch, slot)| slot.take().map(|(note, _)| (ch, note)))
            .collect()
    }

    /// Drop every pending note
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}
