//! Ring buffer between the engine thread and the audio callback
//!
//! One producer (the engine worker) writes mixed samples, one consumer (the
//! device callback) reads them. Memory is fixed at `capacity * 2` bytes.
//! Buffer access goes through a `parking_lot::Mutex`; the positions are
//! atomics so fill queries never take the lock.

use crate::{Result, SoundGenError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Largest accepted capacity (64 MB of samples)
const MAX_CAPACITY: usize = 64 * 1024 * 1024 / std::mem::size_of::<i16>();

/// Fixed-size sample FIFO
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<i16>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    /// Power of two
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a buffer; the capacity is rounded up to a power of two
    ///
    /// # Errors
    ///
    /// Returns [`SoundGenError::AudioDevice`] for a zero or oversized capacity.
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(SoundGenError::AudioDevice(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested_capacity.next_power_of_two();
        if capacity > MAX_CAPACITY {
            return Err(SoundGenError::AudioDevice(format!(
                "ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }
        Ok(RingBuffer {
            buffer: Mutex::new(vec![0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be read
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Samples that can be written without overwriting unread data
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read() - 1
    }

    /// Write as many samples as fit; returns the count written
    pub fn write(&self, samples: &[i16]) -> usize {
        let mut buf = self.buffer.lock();

        // computed under the lock so the consumer cannot race the check
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let available = self.capacity - write_pos.wrapping_sub(read_pos) - 1;
        let to_write = samples.len().min(available);
        if to_write == 0 {
            return 0;
        }

        let start = write_pos & self.mask;
        if start + to_write <= self.capacity {
            buf[start..start + to_write].copy_from_slice(&samples[..to_write]);
        } else {
            let first = self.capacity - start;
            buf[start..].copy_from_slice(&samples[..first]);
            buf[..to_write - first].copy_from_slice(&samples[first..to_write]);
        }
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read up to `dest.len()` samples; returns the count read
    pub fn read(&self, dest: &mut [i16]) -> usize {
        let buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let to_read = dest.len().min(write_pos.wrapping_sub(read_pos));
        if to_read == 0 {
            return 0;
        }

        let start = read_pos & self.mask;
        if start + to_read <= self.capacity {
            dest[..to_read].copy_from_slice(&buf[start..start + to_read]);
        } else {
            let first = self.capacity - start;
            dest[..first].copy_from_slice(&buf[start..]);
            dest[first..to_read].copy_from_slice(&buf[..to_read - first]);
        }
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Discard unread samples
    pub fn flush(&self) {
        let _guard = self.buffer.lock();
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Fill level (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }
}
