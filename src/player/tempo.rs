//! Row timing
//!
//! Rows are timed with a fractional accumulator. A row adds `60 * rate * speed`
//! and every tick removes `tempo * 24`; a new row starts once the accumulator
//! is exhausted. The remainder carries over, so uneven tempos average out
//! exactly. With tempo 0 a row lasts `speed` ticks.

use std::collections::VecDeque;

/// Rows kept for the average BPM
const BPM_HISTORY: usize = 8;

/// Fractional row timer
#[derive(Debug, Clone)]
pub struct TempoCounter {
    speed: u32,
    tempo: u32,
    tick_rate: u32,
    pending_speed: Option<u32>,
    pending_tempo: Option<u32>,
    accum: i64,
    ticks_in_row: u32,
    history: VecDeque<u32>,
    highlight: (u32, u32),
}

impl TempoCounter {
    /// Timer at the given speed, tempo and engine tick rate
    pub fn new(speed: u32, tempo: u32, tick_rate: u32) -> Self {
        TempoCounter {
            speed: speed.max(1),
            tempo,
            tick_rate: tick_rate.max(1),
            pending_speed: None,
            pending_tempo: None,
            accum: 0,
            ticks_in_row: 0,
            history: VecDeque::with_capacity(BPM_HISTORY),
            highlight: (4, 16),
        }
    }

    /// Ticks per row
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Engine tick rate in Hz
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Change the tick rate; takes effect immediately
    pub fn set_tick_rate(&mut self, rate: u32) {
        self.tick_rate = rate.max(1);
    }

    /// Schedule a speed change for the next row
    pub fn set_speed(&mut self, speed: u32) {
        self.pending_speed = Some(speed.max(1));
    }

    /// Schedule a tempo change for the next row
    pub fn set_tempo(&mut self, tempo: u32) {
        self.pending_tempo = Some(tempo);
    }

    /// Primary and secondary row highlight
    pub fn set_highlight_rows(&mut self, highlight: (u32, u32)) {
        self.highlight = highlight;
    }

    /// Restart timing at a row boundary
    pub fn reset(&mut self, speed: u32, tempo: u32) {
        self.speed = speed.max(1);
        self.tempo = tempo;
        self.pending_speed = None;
        self.pending_tempo = None;
        self.accum = 0;
        self.ticks_in_row = 0;
        self.history.clear();
    }

    fn row_amount(&self) -> i64 {
        if self.tempo == 0 {
            self.speed as i64
        } else {
            60 * self.tick_rate as i64 * self.speed as i64
        }
    }

    fn tick_amount(&self) -> i64 {
        if self.tempo == 0 {
            1
        } else {
            self.tempo as i64 * 24
        }
    }

    /// A row begins: apply pending changes and credit one row
    pub fn start_row(&mut self) {
        if let Some(speed) = self.pending_speed.take() {
            self.speed = speed;
        }
        if let Some(tempo) = self.pending_tempo.take() {
            // switching between tempo and speed-only timing drops the remainder
            if (tempo == 0) != (self.tempo == 0) {
                self.accum = 0;
            }
            self.tempo = tempo;
        }
        self.accum += self.row_amount();
        self.ticks_in_row = 0;
    }

    /// Consume one tick; true when the row ends after it
    pub fn tick(&mut self) -> bool {
        self.accum -= self.tick_amount();
        self.ticks_in_row += 1;
        let done = self.accum <= 0;
        if done {
            if self.history.len() == BPM_HISTORY {
                self.history.pop_front();
            }
            self.history.push_back(self.ticks_in_row);
        }
        done
    }

    /// Rows per minute at the current settings
    fn rows_per_minute(&self) -> f64 {
        if self.tempo == 0 {
            60.0 * self.tick_rate as f64 / self.speed as f64
        } else {
            self.tempo as f64 * 24.0 / self.speed as f64
        }
    }

    /// Nominal tempo in BPM, assuming four rows per beat
    pub fn tempo(&self) -> f64 {
        self.rows_per_minute() / 4.0
    }

    /// Measured tempo over the last rows, assuming four rows per beat
    pub fn average_bpm(&self) -> f64 {
        if self.history.is_empty() {
            return self.tempo();
        }
        let ticks: u32 = self.history.iter().sum();
        let per_row = ticks as f64 / self.history.len() as f64;
        60.0 * self.tick_rate as f64 / per_row / 4.0
    }

    /// BPM with the beat length taken from the first highlight
    pub fn current_bpm(&self) -> f64 {
        let rows_per_beat = if self.highlight.0 > 0 {
            self.highlight.0 as f64
        } else {
            4.0
        };
        self.tempo().min(self.average_bpm()) * 4.0 / rows_per_beat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn row_lengths(counter: &mut TempoCounter, rows: usize) -> Vec<u32> {
        (0..rows)
            .map(|_| {
                counter.start_row();
                let mut ticks = 1;
                while !counter.tick() {
                    ticks += 1;
                }
                ticks
            })
            .collect()
    }

    #[test]
    fn test_default_tempo_gives_six_ticks() {
        let mut counter = TempoCounter::new(6, 150, 60);
        assert_eq!(row_lengths(&mut counter, 10), vec![6; 10]);
        assert_relative_eq!(counter.tempo(), 150.0);
        assert_relative_eq!(counter.average_bpm(), 150.0);
    }

    #[test]
    fn test_fractional_tempo_averages_out() {
        let mut counter = TempoCounter::new(6, 125, 60);
        let lengths = row_lengths(&mut counter, 100);
        let total: u32 = lengths.iter().sum();
        // 60 * 60 * 6 / (125 * 24) = 7.2 ticks per row
        assert_eq!(total, 720, "remainders must carry over");
        assert!(lengths.iter().all(|&l| l == 7 || l == 8));
    }

    #[test]
    fn test_speed_only_mode() {
        let mut counter = TempoCounter::new(3, 0, 50);
        assert_eq!(row_lengths(&mut counter, 4), vec![3; 4]);
        assert_relative_eq!(counter.tempo(), 250.0);
    }

    #[test]
    fn test_change_applies_at_next_row() {
        let mut counter = TempoCounter::new(6, 150, 60);
        counter.start_row();
        counter.set_speed(3);
        let mut ticks = 1;
        while !counter.tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 6, "row in progress keeps its speed");
        assert_eq!(row_lengths(&mut counter, 1), vec![3]);
    }

    #[test]
    fn test_current_bpm_uses_highlight() {
        let mut counter = TempoCounter::new(6, 150, 60);
        counter.set_highlight_rows((8, 32));
        assert_relative_eq!(counter.current_bpm(), 75.0);
    }
}
