use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

/// Thread-safe ring buffer between a device callback and the capture collector
pub struct AudioRingBuffer {
    buffer: Arc<Mutex<HeapRb<i16>>>,
    overruns: Arc<AtomicU64>,
}

impl AudioRingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity.max(1)))),
            overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Write samples to the buffer
    ///
    /// When the reader falls behind, the oldest samples are dropped and
    /// counted as overruns.
    pub fn write(&self, samples: &[i16]) -> usize {
        let mut buffer = self.buffer.lock();
        let mut dropped = 0;

        for &sample in samples {
            if buffer.try_push(sample).is_err() {
                let _ = buffer.try_pop();
                let _ = buffer.try_push(sample);
                dropped += 1;
            }
        }

        if dropped > 0 {
            self.overruns.fetch_add(dropped, Ordering::Relaxed);
        }
        samples.len()
    }

    /// Read up to `count` samples from the buffer
    pub fn read(&self, count: usize) -> Vec<i16> {
        let mut buffer = self.buffer.lock();
        let mut samples = Vec::with_capacity(count.min(buffer.occupied_len()));

        for _ in 0..count {
            match buffer.try_pop() {
                Some(sample) => samples.push(sample),
                None => break,
            }
        }

        samples
    }

    /// Get the number of samples available to read
    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity().get()
    }

    /// Samples dropped because the reader fell behind
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl Clone for AudioRingBuffer {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            overruns: Arc::clone(&self.overruns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let buffer = AudioRingBuffer::new(1024);
        let data: Vec<i16> = (0..100).collect();

        let written = buffer.write(&data);
        assert_eq!(written, 100);

        let read_data = buffer.read(100);
        assert_eq!(read_data, data);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow() {
        let buffer = AudioRingBuffer::new(10);
        let data: Vec<i16> = (0..20).collect();

        buffer.write(&data);
        assert_eq!(buffer.overruns(), 10);

        // Only the newest 10 samples survive
        let read_data = buffer.read(20);
        assert_eq!(read_data, (10..20).collect::<Vec<i16>>());
    }

    #[test]
    fn test_clones_share_storage() {
        let writer = AudioRingBuffer::new(16);
        let reader = writer.clone();
        writer.write(&[1, 2, 3]);
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.read(2), vec![1, 2]);
    }
}
