/// Audio buffer module for staging captured sample bytes
///
/// Implements a ring buffer sitting between the capture callback (single
/// writer) and the per-tick analysis loop (single reader). Holds a handful
/// of analysis frames; when the reader falls behind, the oldest bytes are
/// overwritten.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Audio sample format: unsigned time-domain byte, 128 = silence.
pub type AudioSample = u8;

/// Byte value representing zero amplitude.
pub const SAMPLE_CENTER: AudioSample = 128;

/// Samples per analysis frame.
pub const FRAME_SIZE: usize = 512;

/// Nominal capture rate, used only for duration reporting.
pub const SAMPLE_RATE: usize = 48_000;

/// Buffer capacity: 16 frames of slack between writer and reader.
pub const BUFFER_FRAMES: usize = 16;
pub const BUFFER_SIZE: usize = BUFFER_FRAMES * FRAME_SIZE; // 8,192 samples

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Buffer overflow: attempted to write {0} samples, but only {1} slots available")]
    Overflow(usize, usize),

    #[error("Buffer underflow: attempted to read {0} samples, but only {1} available")]
    Underflow(usize, usize),

    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Ring buffer for captured sample bytes
/// Uses separate producer and consumer for thread-safe access
pub struct AudioBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    sample_rate: usize,
}

impl AudioBuffer {
    /// Create a new buffer with the default 16-frame capacity
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_SIZE)
    }

    /// Create a buffer with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating audio buffer with capacity: {} samples", capacity);

        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Write sample bytes to the buffer (non-blocking)
    ///
    /// Returns the number of samples accepted. If the buffer is full,
    /// the oldest samples are dropped to make room.
    pub fn write(&mut self, samples: &[AudioSample]) -> usize {
        let mut producer = self.producer.lock().unwrap();

        let available_space = producer.vacant_len();
        let to_write = samples.len();

        if to_write > available_space {
            let to_drop = to_write - available_space;
            let mut consumer = self.consumer.lock().unwrap();
            consumer.skip(to_drop);
            drop(consumer);

            warn!(
                "Buffer full, dropping {} oldest samples to make room",
                to_drop
            );
        }

        let written = producer.push_slice(samples);
        debug!("Wrote {} samples to buffer", written);

        written
    }

    /// Read samples from the buffer without removing them (peek)
    pub fn peek(&self, count: usize) -> Vec<AudioSample> {
        let consumer = self.consumer.lock().unwrap();
        let available = consumer.occupied_len();
        let to_read = count.min(available);

        let mut result = Vec::with_capacity(to_read);

        for item in consumer.iter().take(to_read) {
            result.push(*item);
        }

        result
    }

    /// Read and remove samples from the buffer
    pub fn read(&mut self, count: usize) -> Result<Vec<AudioSample>, AudioBufferError> {
        let mut consumer = self.consumer.lock().unwrap();
        let available = consumer.occupied_len();

        if count > available {
            return Err(AudioBufferError::Underflow(count, available));
        }

        let mut result = vec![SAMPLE_CENTER; count];
        let read = consumer.pop_slice(&mut result);
        result.truncate(read);

        debug!("Read {} samples from buffer", read);
        Ok(result)
    }

    /// Get the number of samples currently in the buffer
    pub fn len(&self) -> usize {
        let consumer = self.consumer.lock().unwrap();
        consumer.occupied_len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        let consumer = self.consumer.lock().unwrap();
        consumer.capacity().get()
    }

    /// Get the amount of free space in the buffer
    pub fn free_space(&self) -> usize {
        let producer = self.producer.lock().unwrap();
        producer.vacant_len()
    }

    /// Clear all data from the buffer
    pub fn clear(&mut self) {
        let mut consumer = self.consumer.lock().unwrap();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
        debug!("Cleared audio buffer");
    }

    /// Get the nominal sample rate
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Get duration of audio currently in buffer (in seconds)
    pub fn duration_secs(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}
