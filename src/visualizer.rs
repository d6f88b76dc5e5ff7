//! Visualizer handoff
//!
//! The engine pushes every mixed tick, together with the level of each
//! tracker channel, into a rolling window that a display thread reads at its
//! own pace. Pushes use `try_lock`: if the reader holds the window, the tick
//! is dropped rather than stalling audio.
//!
//! Channel levels feed peak meters that fall off at the [`MeterDecay`] rate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fall-off speed of the channel meters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeterDecay {
    /// Meters halve every tick
    #[default]
    Fast,
    /// Meters lose 15% per tick
    Slow,
}

impl MeterDecay {
    fn factor(self) -> f32 {
        match self {
            MeterDecay::Fast => 0.5,
            MeterDecay::Slow => 0.85,
        }
    }
}

/// Rolling window of the most recent output samples
#[derive(Debug, Clone)]
struct Window {
    samples: Vec<i16>,
    /// Meter level per channel, in tracker order
    levels: Vec<f32>,
    decay: MeterDecay,
    index: usize,
    generation: u64,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Window {
            samples: vec![0; capacity.max(1)],
            levels: Vec::new(),
            decay: MeterDecay::default(),
            index: 0,
            generation: 0,
        }
    }

    fn push(&mut self, samples: &[i16], levels: &[f32]) {
        if self.levels.len() == levels.len() {
            let factor = self.decay.factor();
            for (meter, &level) in self.levels.iter_mut().zip(levels) {
                *meter = level.max(*meter * factor);
            }
        } else {
            // channel layout changed
            self.levels.clear();
            self.levels.extend_from_slice(levels);
        }
        let capacity = self.samples.len();
        // only the tail can survive in the window
        let tail = &samples[samples.len().saturating_sub(capacity)..];
        for &sample in tail {
            self.samples[self.index] = sample;
            self.index = (self.index + 1) % capacity;
        }
        self.generation += 1;
    }

    fn ordered(&self, out: &mut Vec<i16>) {
        out.clear();
        out.extend_from_slice(&self.samples[self.index..]);
        out.extend_from_slice(&self.samples[..self.index]);
    }
}

/// Shared oscilloscope feed; clones share the same window
#[derive(Debug, Clone)]
pub struct VisualizerFeed {
    window: Arc<Mutex<Window>>,
    dropped: Arc<AtomicU64>,
}

impl Default for VisualizerFeed {
    fn default() -> Self {
        VisualizerFeed::new(2048)
    }
}

impl VisualizerFeed {
    /// Feed keeping the last `capacity` samples
    pub fn new(capacity: usize) -> Self {
        VisualizerFeed {
            window: Arc::new(Mutex::new(Window::new(capacity))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Window length in samples
    pub fn capacity(&self) -> usize {
        self.window.lock().samples.len()
    }

    /// Offer a tick of output and its channel levels (0.0..1.0)
    ///
    /// Returns false if the reader was busy and the tick was dropped.
    pub fn push(&self, samples: &[i16], levels: &[f32]) -> bool {
        match self.window.try_lock() {
            Some(mut window) => {
                window.push(samples, levels);
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Copy the window, oldest sample first; returns the push count
    pub fn snapshot(&self, out: &mut Vec<i16>) -> u64 {
        let window = self.window.lock();
        window.ordered(out);
        window.generation
    }

    /// Copy the current meter level of every channel
    pub fn channel_levels(&self, out: &mut Vec<f32>) {
        let window = self.window.lock();
        out.clear();
        out.extend_from_slice(&window.levels);
    }

    /// Change how fast the channel meters fall
    pub fn set_meter_decay(&self, decay: MeterDecay) {
        self.window.lock().decay = decay;
    }

    /// Current meter fall-off speed
    pub fn meter_decay(&self) -> MeterDecay {
        self.window.lock().decay
    }

    /// Ticks dropped because the reader held the window
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Zero the window
    pub fn clear(&self) {
        let mut window = self.window.lock();
        window.samples.fill(0);
        window.levels.clear();
        window.index = 0;
    }
}
