//! Per-tick instrument sequence playback

use crate::instrument::Sequence;

/// Playback state of one sequence slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    /// No sequence, or reset without one
    #[default]
    Disabled,
    /// Producing values
    Running,
    /// Ran off the end without a loop; the last value stays in effect
    Finished,
}

/// Position within one instrument sequence
#[derive(Debug, Clone, Default)]
pub struct SequenceCursor {
    position: usize,
    phase: Phase,
    released: bool,
    /// Index of the value produced by the latest step
    played: Option<usize>,
}

impl SequenceCursor {
    /// Restart from the first value
    pub fn start(&mut self, sequence: Option<&Sequence>) {
        self.position = 0;
        self.released = false;
        self.played = None;
        self.phase = match sequence {
            Some(seq) if !seq.values.is_empty() => Phase::Running,
            _ => Phase::Disabled,
        };
    }

    /// Stop producing values
    pub fn stop(&mut self) {
        self.phase = Phase::Disabled;
        self.played = None;
    }

    /// Index of the value played on the latest tick, while running
    pub fn play_position(&self) -> Option<usize> {
        self.played.filter(|_| self.phase != Phase::Disabled)
    }

    /// Whether the sequence still yields values
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Leave the hold at the release point
    pub fn release(&mut self, sequence: Option<&Sequence>) {
        self.released = true;
        let Some(seq) = sequence else {
            return;
        };
        if self.phase != Phase::Running {
            return;
        }
        if let Some(point) = seq.release_point {
            self.position = point + 1;
            if self.position >= seq.values.len() {
                self.phase = Phase::Finished;
            }
        }
    }

    /// Value for this tick, then advance
    pub fn step(&mut self, sequence: Option<&Sequence>) -> Option<i8> {
        let seq = sequence?;
        if self.phase != Phase::Running || self.position >= seq.values.len() {
            return None;
        }
        let value = seq.values[self.position];
        self.played = Some(self.position);
        self.position += 1;

        let release = seq.release_point.filter(|&r| r < seq.values.len());
        match release {
            Some(r) if !self.released && self.position == r + 1 => {
                // hold at the release point, or loop inside the sustained part
                self.position = match seq.loop_point {
                    Some(lp) if lp <= r => lp,
                    _ => r,
                };
            }
            _ if self.position >= seq.values.len() => {
                let loop_ok = seq
                    .loop_point
                    .filter(|&lp| lp < seq.values.len())
                    .filter(|&lp| release.map_or(true, |r| lp > r));
                match loop_ok {
                    Some(lp) => self.position = lp,
                    None => self.phase = Phase::Finished,
                }
            }
            _ => {}
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(seq: &Sequence, cursor: &mut SequenceCursor, ticks: usize) -> Vec<Option<i8>> {
        (0..ticks).map(|_| cursor.step(Some(seq))).collect()
    }

    #[test]
    fn test_plays_once_then_finishes() {
        let seq = Sequence::new(vec![3, 2, 1]);
        let mut cursor = SequenceCursor::default();
        cursor.start(Some(&seq));
        assert_eq!(run(&seq, &mut cursor, 4), vec![Some(3), Some(2), Some(1), None]);
        assert!(!cursor.is_running());
    }

    #[test]
    fn test_loop_point() {
        let seq = Sequence::new(vec![1, 2, 3]).looping(1);
        let mut cursor = SequenceCursor::default();
        cursor.start(Some(&seq));
        assert_eq!(
            run(&seq, &mut cursor, 6),
            vec![Some(1), Some(2), Some(3), Some(2), Some(3), Some(2)]
        );
    }

    #[test]
    fn test_release_point_holds_until_release() {
        let seq = Sequence::new(vec![15, 10, 5, 0]).releasing(1);
        let mut cursor = SequenceCursor::default();
        cursor.start(Some(&seq));
        assert_eq!(run(&seq, &mut cursor, 4), vec![Some(15), Some(10), Some(10), Some(10)]);
        cursor.release(Some(&seq));
        assert_eq!(run(&seq, &mut cursor, 3), vec![Some(5), Some(0), None]);
    }

    #[test]
    fn test_loop_before_release_sustains() {
        let seq = Sequence::new(vec![8, 9, 4, 1]).looping(0).releasing(1);
        let mut cursor = SequenceCursor::default();
        cursor.start(Some(&seq));
        assert_eq!(run(&seq, &mut cursor, 4), vec![Some(8), Some(9), Some(8), Some(9)]);
        cursor.release(Some(&seq));
        assert_eq!(run(&seq, &mut cursor, 3), vec![Some(4), Some(1), None]);
    }

    #[test]
    fn test_empty_sequence_is_disabled() {
        let seq = Sequence::new(Vec::new());
        let mut cursor = SequenceCursor::default();
        cursor.start(Some(&seq));
        assert_eq!(cursor.step(Some(&seq)), None);
        cursor.start(None);
        assert!(!cursor.is_running());
    }

    #[test]
    fn test_play_position_follows_loop() {
        let seq = Sequence::new(vec![1, 2, 3]).looping(1);
        let mut cursor = SequenceCursor::default();
        assert_eq!(cursor.play_position(), None);
        cursor.start(Some(&seq));
        assert_eq!(cursor.play_position(), None, "nothing played yet");

        let positions: Vec<_> = (0..5)
            .map(|_| {
                cursor.step(Some(&seq));
                cursor.play_position()
            })
            .collect();
        assert_eq!(positions, vec![Some(0), Some(1), Some(2), Some(1), Some(2)]);
        cursor.stop();
        assert_eq!(cursor.play_position(), None);
    }
}
