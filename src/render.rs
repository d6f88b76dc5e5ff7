//! Offline WAV rendering
//!
//! Rendering runs the same tick loop as live playback but hands each block to
//! a [`WavRenderer`] instead of an output sink, without real-time pacing.
//! Samples are staged in a temporary file next to the target and only moved
//! into place by [`WavRenderer::finalize`]; a cancelled or failed render leaves
//! nothing behind.

use crate::player::TickOutcome;
use crate::{Result, SoundGenError};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};

/// How much of the song to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderLength {
    /// Fixed duration in seconds
    Seconds(u32),
    /// Play the song through this many times
    Loops(u32),
}

/// Render request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSpec {
    /// Song length
    pub length: RenderLength,
    /// Silence appended after the song, in milliseconds
    pub trailing_silence_ms: u32,
}

impl RenderSpec {
    /// Render `length` with no trailing silence
    pub fn new(length: RenderLength) -> Self {
        RenderSpec {
            length,
            trailing_silence_ms: 0,
        }
    }

    /// Append silence after the song so release tails decay
    pub fn with_trailing_silence(mut self, ms: u32) -> Self {
        self.trailing_silence_ms = ms;
        self
    }
}

/// Render progress
///
/// Units follow the requested length: seconds for [`RenderLength::Seconds`],
/// frames for [`RenderLength::Loops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderProgress {
    /// Amount rendered so far
    pub rendered: u64,
    /// Amount to render
    pub total: u64,
}

impl RenderProgress {
    /// Completed fraction (0.0 to 1.0)
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.rendered.min(self.total) as f64 / self.total as f64) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Song,
    Tail { remaining: u64 },
    Done,
}

/// Decides when a render session ends
#[derive(Debug, Clone)]
pub struct RenderTracker {
    spec: RenderSpec,
    sample_rate: u32,
    frames_per_loop: u64,
    samples: u64,
    frames: u64,
    phase: Phase,
}

impl RenderTracker {
    /// Tracker for a song of `frames_per_loop` frames
    pub fn new(spec: RenderSpec, sample_rate: u32, frames_per_loop: usize) -> Self {
        RenderTracker {
            spec,
            sample_rate: sample_rate.max(1),
            frames_per_loop: frames_per_loop.max(1) as u64,
            samples: 0,
            frames: 0,
            phase: Phase::Song,
        }
    }

    /// True while the sequencer should keep running
    pub fn in_song(&self) -> bool {
        self.phase == Phase::Song
    }

    /// True once the song and the trailing silence are complete
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Samples to generate for the next block, given the size of one tick
    ///
    /// Song ticks are generated whole; the tail and a `Seconds` limit clip
    /// the last block.
    pub fn next_block(&self, tick_samples: usize) -> usize {
        match self.phase {
            Phase::Song => match self.spec.length {
                RenderLength::Seconds(secs) => {
                    let total = secs as u64 * self.sample_rate as u64;
                    (tick_samples as u64).min(total.saturating_sub(self.samples)) as usize
                }
                RenderLength::Loops(_) => tick_samples,
            },
            Phase::Tail { remaining } => (tick_samples as u64).min(remaining) as usize,
            Phase::Done => 0,
        }
    }

    /// Account for a generated block and the tick that produced it
    pub fn record(&mut self, samples: usize, outcome: Option<TickOutcome>, loops: u32) {
        self.samples += samples as u64;
        match self.phase {
            Phase::Song => {
                if let Some(outcome) = outcome {
                    if outcome.frame_changed || outcome.looped {
                        self.frames += 1;
                    }
                }
                let finished = match self.spec.length {
                    RenderLength::Seconds(secs) => self.samples >= secs as u64 * self.sample_rate as u64,
                    RenderLength::Loops(n) => loops >= n.max(1),
                } || outcome.is_some_and(|o| o.halted);
                if finished {
                    self.enter_tail();
                }
            }
            Phase::Tail { remaining } => {
                let remaining = remaining.saturating_sub(samples as u64);
                self.phase = if remaining == 0 {
                    Phase::Done
                } else {
                    Phase::Tail { remaining }
                };
            }
            Phase::Done => {}
        }
    }

    /// End the song early (player stopped on its own)
    pub fn finish_song(&mut self) {
        if self.phase == Phase::Song {
            self.enter_tail();
        }
    }

    fn enter_tail(&mut self) {
        let remaining = self.spec.trailing_silence_ms as u64 * self.sample_rate as u64 / 1000;
        self.phase = if remaining == 0 {
            Phase::Done
        } else {
            Phase::Tail { remaining }
        };
    }

    /// Progress in the units of the requested length
    pub fn progress(&self) -> RenderProgress {
        match self.spec.length {
            RenderLength::Seconds(secs) => RenderProgress {
                rendered: (self.samples / self.sample_rate as u64).min(secs as u64),
                total: secs as u64,
            },
            RenderLength::Loops(n) => {
                let total = self.frames_per_loop * n.max(1) as u64;
                RenderProgress {
                    rendered: if self.in_song() { self.frames.min(total) } else { total },
                    total,
                }
            }
        }
    }
}

/// Summary of a completed render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    /// Final file location
    pub path: PathBuf,
    /// Samples written (mono)
    pub samples_written: u64,
    /// Sample rate of the file
    pub sample_rate: u32,
}

impl RenderReport {
    /// Length of the file in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples_written as f64 / self.sample_rate.max(1) as f64
    }
}

/// Mono WAV writer staging into a temporary file
pub struct WavRenderer {
    writer: Option<WavWriter<BufWriter<File>>>,
    temp: Option<TempPath>,
    target: PathBuf,
    sample_rate: u32,
    bit_depth: u16,
    samples_written: u64,
}

impl std::fmt::Debug for WavRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavRenderer")
            .field("target", &self.target)
            .field("bit_depth", &self.bit_depth)
            .field("samples_written", &self.samples_written)
            .finish()
    }
}

impl WavRenderer {
    /// Start a render to `path` (8 or 16 bit)
    ///
    /// # Errors
    ///
    /// Returns [`SoundGenError::Render`] if the staging file cannot be created.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, bit_depth: u16) -> Result<Self> {
        let target = path.as_ref().to_path_buf();
        if bit_depth != 8 && bit_depth != 16 {
            return Err(SoundGenError::Render(format!("unsupported bit depth {bit_depth}")));
        }
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let staged = NamedTempFile::new_in(&dir).map_err(|e| {
            SoundGenError::Render(format!("cannot create file in {}: {e}", dir.display()))
        })?;
        let (file, temp) = staged.into_parts();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: bit_depth,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::new(BufWriter::new(file), spec)
            .map_err(|e| SoundGenError::Render(format!("failed to write WAV header: {e}")))?;
        log::info!("render started: {}", target.display());
        Ok(WavRenderer {
            writer: Some(writer),
            temp: Some(temp),
            target,
            sample_rate,
            bit_depth,
            samples_written: 0,
        })
    }

    /// Destination path
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Samples written so far
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Append one block in generation order
    pub fn write_block(&mut self, samples: &[i16]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SoundGenError::Render("render already closed".into()));
        };
        let eight_bit = self.bit_depth == 8;
        for &sample in samples {
            let result = if eight_bit {
                writer.write_sample((sample >> 8) as i8)
            } else {
                writer.write_sample(sample)
            };
            result.map_err(|e| SoundGenError::Render(format!("write failed: {e}")))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Finish the file and move it into place
    pub fn finalize(mut self) -> Result<RenderReport> {
        let (Some(writer), Some(temp)) = (self.writer.take(), self.temp.take()) else {
            return Err(SoundGenError::Render("render already closed".into()));
        };
        writer
            .finalize()
            .map_err(|e| SoundGenError::Render(format!("failed to finalize WAV file: {e}")))?;
        temp.persist(&self.target).map_err(|e| {
            SoundGenError::Render(format!("cannot move render to {}: {}", self.target.display(), e.error))
        })?;
        log::info!(
            "render finished: {} ({} samples)",
            self.target.display(),
            self.samples_written
        );
        Ok(RenderReport {
            path: self.target.clone(),
            samples_written: self.samples_written,
            sample_rate: self.sample_rate,
        })
    }

    /// Abandon the render; the staging file is deleted
    pub fn cancel(mut self) {
        self.discard();
        log::info!("render cancelled: {}", self.target.display());
    }

    fn discard(&mut self) {
        self.writer = None;
        if let Some(temp) = self.temp.take() {
            if let Err(e) = temp.close() {
                log::warn!("failed to remove partial render: {e}");
            }
        }
    }
}

impl Drop for WavRenderer {
    fn drop(&mut self) {
        self.discard();
    }
}
