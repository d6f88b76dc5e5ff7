//! Live output through rodio
//!
//! The rodio stream is not `Send`, so [`DeviceSink`] opens it on a dedicated
//! audio thread and talks to it only through the shared [`RingBuffer`].

use super::{OutputSink, RingBuffer, StreamConfig, BUFFER_BACKOFF_MICROS};
use crate::{Result, SoundGenError};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Samples pulled from the ring buffer per lock
const SOURCE_CHUNK: usize = 1024;

/// rodio source reading from the ring buffer
struct RingBufferSource {
    ring_buffer: Arc<RingBuffer>,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    buffer: Vec<i16>,
    buffer_pos: usize,
}

impl RingBufferSource {
    fn new(ring_buffer: Arc<RingBuffer>, sample_rate: u32, channels: u16, finished: Arc<AtomicBool>) -> Self {
        RingBufferSource {
            ring_buffer,
            sample_rate,
            channels,
            finished,
            buffer: vec![0; SOURCE_CHUNK],
            buffer_pos: SOURCE_CHUNK,
        }
    }
}

impl Source for RingBufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(SOURCE_CHUNK)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingBufferSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.buffer_pos >= self.buffer.len() {
            let read = self.ring_buffer.read(&mut self.buffer);
            // underrun plays silence to keep the stream alive
            self.buffer[read..].fill(0);
            self.buffer_pos = 0;
        }
        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Open rodio stream playing a ring buffer
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start playing `ring_buffer`
    pub fn new(sample_rate: u32, channels: u16, ring_buffer: Arc<RingBuffer>) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| SoundGenError::AudioDevice(format!("failed to open output stream: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| SoundGenError::AudioDevice(format!("failed to create sink: {e}")))?;
        let finished = Arc::new(AtomicBool::new(false));
        sink.append(RingBufferSource::new(
            ring_buffer,
            sample_rate,
            channels,
            Arc::clone(&finished),
        ));
        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// End the stream
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
        self.sink.stop();
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Sink playing through the default output device
#[derive(Default)]
pub struct DeviceSink {
    ring: Option<Arc<RingBuffer>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSink {
    /// Closed sink; [`OutputSink::open`] starts the device
    pub fn new() -> Self {
        Self::default()
    }

    /// Ring buffer fill level (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        self.ring.as_ref().map_or(0.0, |r| r.fill_percentage())
    }
}

impl OutputSink for DeviceSink {
    fn open(&mut self, config: &StreamConfig) -> Result<()> {
        self.close();
        let ring = Arc::new(RingBuffer::new(config.ring_buffer_size)?);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_ring = Arc::clone(&ring);
        let thread_stop = Arc::clone(&stop);
        let (sample_rate, channels) = (config.sample_rate, config.channels);
        let thread = std::thread::Builder::new()
            .name("famisound-audio".into())
            .spawn(move || {
                let device = match AudioDevice::new(sample_rate, channels, thread_ring) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::park_timeout(Duration::from_millis(50));
                }
                device.finish();
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "audio device open: {} Hz, {:.0} ms buffer",
                    config.sample_rate,
                    config.latency_ms()
                );
                self.ring = Some(ring);
                self.stop = stop;
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SoundGenError::AudioDevice("audio thread exited during open".into()))
            }
        }
    }

    fn flush_buffer(&mut self, samples: &[i16], interrupt: &AtomicBool) -> Result<usize> {
        let Some(ring) = &self.ring else {
            return Err(SoundGenError::AudioDevice("device not open".into()));
        };
        let mut remaining = samples;
        while !remaining.is_empty() {
            let written = ring.write(remaining);
            remaining = &remaining[written..];
            if written == 0 {
                if interrupt.load(Ordering::Acquire) {
                    return Ok(samples.len() - remaining.len());
                }
                if self.thread.as_ref().is_some_and(|t| t.is_finished()) {
                    return Err(SoundGenError::AudioDevice("audio thread stopped".into()));
                }
                std::thread::sleep(Duration::from_micros(BUFFER_BACKOFF_MICROS));
            }
        }
        Ok(samples.len())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
            log::debug!("audio device closed");
        }
        self.ring = None;
    }

    fn name(&self) -> &str {
        "device"
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_plays_silence_on_underrun() {
        let ring = Arc::new(RingBuffer::new(64).unwrap());
        let finished = Arc::new(AtomicBool::new(false));
        let mut source = RingBufferSource::new(Arc::clone(&ring), 44_100, 1, Arc::clone(&finished));
        assert_eq!(source.next(), Some(0));
        assert_eq!(source.sample_rate(), 44_100);

        finished.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None, "finished source ends the stream");
    }

    #[test]
    fn test_source_reads_ring_in_order() {
        let ring = Arc::new(RingBuffer::new(64).unwrap());
        ring.write(&[5, 6, 7]);
        let mut source = RingBufferSource::new(ring, 48_000, 1, Arc::new(AtomicBool::new(false)));
        let head: Vec<i16> = (0..4).filter_map(|_| source.next()).collect();
        assert_eq!(head, vec![5, 6, 7, 0]);
    }

    #[test]
    fn test_device_sink_open_or_skip() {
        let mut sink = DeviceSink::new();
        match sink.open(&StreamConfig::default()) {
            Ok(()) => {
                let interrupt = AtomicBool::new(false);
                assert_eq!(sink.flush_buffer(&[0; 256], &interrupt).unwrap(), 256);

                interrupt.store(true, Ordering::Release);
                let accepted = sink.flush_buffer(&[0; 44_100], &interrupt).unwrap();
                assert!(accepted < 44_100, "an interrupted write reports the unwritten tail");
                sink.close();
            }
            Err(e) => {
                eprintln!("Skipping device test (audio backend unavailable): {e}");
                assert!(matches!(e, SoundGenError::AudioDevice(_)));
            }
        }
    }
}
