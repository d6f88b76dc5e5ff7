//! Audio output sinks
//!
//! The engine worker hands every mixed buffer to an [`OutputSink`]. A sink may
//! block until the device has room, but must return early once the interrupt
//! flag is raised so commands are never stuck behind a full device.
//!
//! - [`NullSink`]: discards samples, optionally paced to real time
//! - [`CaptureSink`]: keeps samples in memory (tests, analysis)
//! - `DeviceSink` (feature `streaming`): rodio output through a [`RingBuffer`]

#[cfg(feature = "streaming")]
pub mod device;
pub mod ring_buffer;

#[cfg(feature = "streaming")]
pub use device::{AudioDevice, DeviceSink};
pub use ring_buffer::RingBuffer;

use crate::config::Settings;
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sleep between attempts to write into a full buffer
pub const BUFFER_BACKOFF_MICROS: u64 = 200;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Ring buffer size in samples
    pub ring_buffer_size: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bits per sample (8 or 16)
    pub bit_depth: u16,
}

impl StreamConfig {
    /// Format derived from the engine settings
    pub fn from_settings(settings: &Settings) -> Self {
        StreamConfig {
            ring_buffer_size: settings.buffer_samples() * 2,
            sample_rate: settings.sample_rate,
            channels: 1,
            bit_depth: settings.bit_depth,
        }
    }

    /// Latency of a full ring buffer in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.ring_buffer_size as f32 / self.sample_rate as f32 * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::from_settings(&Settings::default())
    }
}

/// Destination for mixed audio buffers
pub trait OutputSink: Send {
    /// Prepare for a format; called again on format change
    fn open(&mut self, config: &StreamConfig) -> Result<()>;

    /// Deliver one buffer; returns how many leading samples were accepted
    ///
    /// Fewer than `samples.len()` means the write was abandoned because
    /// `interrupt` was raised. The caller keeps the rest and offers it again
    /// on the next call.
    fn flush_buffer(&mut self, samples: &[i16], interrupt: &AtomicBool) -> Result<usize>;

    /// Release the output
    fn close(&mut self);

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Sink that discards samples
#[derive(Debug)]
pub struct NullSink {
    paced: bool,
    sample_rate: u32,
    started: Option<Instant>,
    delivered: u64,
}

impl NullSink {
    /// Consumes samples no faster than real time
    pub fn paced() -> Self {
        NullSink {
            paced: true,
            sample_rate: 44_100,
            started: None,
            delivered: 0,
        }
    }

    /// Consumes samples immediately
    pub fn unpaced() -> Self {
        NullSink {
            paced: false,
            ..NullSink::paced()
        }
    }
}

impl OutputSink for NullSink {
    fn open(&mut self, config: &StreamConfig) -> Result<()> {
        self.sample_rate = config.sample_rate.max(1);
        self.started = None;
        self.delivered = 0;
        Ok(())
    }

    fn flush_buffer(&mut self, samples: &[i16], interrupt: &AtomicBool) -> Result<usize> {
        if !self.paced {
            return Ok(samples.len());
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        self.delivered += samples.len() as u64;
        let due = Duration::from_secs_f64(self.delivered as f64 / self.sample_rate as f64);
        while started.elapsed() < due {
            // samples are already counted; only the wait is cut short
            if interrupt.load(Ordering::Acquire) {
                break;
            }
            let left = due.saturating_sub(started.elapsed());
            std::thread::sleep(left.min(Duration::from_millis(5)));
        }
        Ok(samples.len())
    }

    fn close(&mut self) {
        self.started = None;
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Sink that records every sample it receives
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    samples: Arc<Mutex<Vec<i16>>>,
    opened: Arc<Mutex<Vec<StreamConfig>>>,
}

impl CaptureSink {
    /// Empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples captured so far
    pub fn samples(&self) -> Vec<i16> {
        self.samples.lock().clone()
    }

    /// Number of samples captured
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// True when nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Formats the sink was opened with, in order
    pub fn opened(&self) -> Vec<StreamConfig> {
        self.opened.lock().clone()
    }

    /// Forget captured samples
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

impl OutputSink for CaptureSink {
    fn open(&mut self, config: &StreamConfig) -> Result<()> {
        self.opened.lock().push(*config);
        Ok(())
    }

    fn flush_buffer(&mut self, samples: &[i16], _interrupt: &AtomicBool) -> Result<usize> {
        self.samples.lock().extend_from_slice(samples);
        Ok(samples.len())
    }

    fn close(&mut self) {}

    fn name(&self) -> &str {
        "capture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_from_settings() {
        let config = StreamConfig::from_settings(&Settings::default());
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.ring_buffer_size, 3528);
        assert!((config.latency_ms() - 80.0).abs() < 0.1);
    }

    #[test]
    fn test_paced_null_sink_keeps_real_time() {
        let mut sink = NullSink::paced();
        sink.open(&StreamConfig {
            sample_rate: 10_000,
            ..StreamConfig::default()
        })
        .unwrap();
        let interrupt = AtomicBool::new(false);
        let start = Instant::now();
        for _ in 0..5 {
            assert_eq!(sink.flush_buffer(&[0; 100], &interrupt).unwrap(), 100);
        }
        assert!(start.elapsed() >= Duration::from_millis(45), "500 samples at 10 kHz");
    }

    #[test]
    fn test_interrupt_abandons_write() {
        let mut sink = NullSink::paced();
        sink.open(&StreamConfig::default()).unwrap();
        let interrupt = AtomicBool::new(true);
        let start = Instant::now();
        let accepted = sink.flush_buffer(&[0; 44_100], &interrupt).unwrap();
        assert!(start.elapsed() < Duration::from_millis(500), "raised interrupt must cut the wait short");
        assert_eq!(accepted, 44_100, "a null sink never hands samples back");
    }

    #[test]
    fn test_capture_sink_shares_samples() {
        let capture = CaptureSink::new();
        let mut sink: Box<dyn OutputSink> = Box::new(capture.clone());
        let interrupt = AtomicBool::new(false);
        sink.flush_buffer(&[1, 2, 3], &interrupt).unwrap();
        assert_eq!(capture.samples(), vec![1, 2, 3]);
    }
}
