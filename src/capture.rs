/// Audio capture module
///
/// The platform boundary as an explicit capability: acquiring a source can
/// fail (permission denied, no device), but once acquired the pipeline only
/// ever pulls sample bytes from it. Live capture goes through cpal; WAV
/// files provide a hardware-free source for the service and for tests.

use crate::audio_buffer::{AudioSample, FRAME_SIZE, SAMPLE_CENTER};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

/// Staging capacity between the cpal callback and the frame reader.
const CAPTURE_RB_SIZE: usize = FRAME_SIZE * 32;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No default input device available")]
    NoDevice,

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to query input devices: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to build input stream: {0}")]
    StreamBuild(#[from] cpal::BuildStreamError),

    #[error("Failed to start input stream: {0}")]
    StreamStart(#[from] cpal::PlayStreamError),

    #[error("Failed to read WAV input: {0}")]
    Wav(#[from] hound::Error),
}

/// A source of time-domain sample bytes, pulled once per tick
///
/// `None` means the source is exhausted (or torn down); the drive loop
/// stops. A live microphone never ends on its own, so it always yields
/// whatever bytes have arrived since the last tick (possibly none).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSource {
    async fn next_frame(&mut self) -> Option<Vec<AudioSample>>;
}

/// List available input device names
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Convert one mono f32 sample in [-1.0, 1.0] to a centered byte
fn f32_to_byte(sample: f32) -> AudioSample {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * (SAMPLE_CENTER as f32) + SAMPLE_CENTER as f32)
        .clamp(0.0, 255.0) as AudioSample
}

/// Down-mix multi-channel audio to mono by averaging channels
fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Find and configure the input device
fn resolve_device(device_name: Option<&str>) -> Result<(cpal::Device, StreamConfig), CaptureError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?
    } else {
        host.default_input_device().ok_or(CaptureError::NoDevice)?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let sample_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    info!(
        device = %dev_name,
        sample_rate,
        channels,
        "Selected input device"
    );

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    Ok((device, stream_config))
}

type CaptureRb = HeapRb<AudioSample>;
type CaptureConsumer = <CaptureRb as Split>::Cons;

/// Keeps the platform capture session alive
///
/// Dropping the handle stops the stream and releases the microphone.
pub struct CaptureHandle {
    _stream: Stream,
}

/// Frame source backed by a live cpal input stream
pub struct MicFrames {
    consumer: CaptureConsumer,
}

#[async_trait]
impl FrameSource for MicFrames {
    async fn next_frame(&mut self) -> Option<Vec<AudioSample>> {
        let available = self.consumer.occupied_len();
        let to_read = available.min(FRAME_SIZE);

        let mut frame = vec![SAMPLE_CENTER; to_read];
        let read = self.consumer.pop_slice(&mut frame);
        frame.truncate(read);

        Some(frame)
    }
}

/// Request and acquire the microphone
///
/// This is the only fallible point in the pipeline: permission denial or a
/// missing device surfaces here, once, before the sampling loop exists.
/// Returns the keep-alive handle and the frame source feeding off it.
pub fn start_capture(
    device_name: Option<&str>,
) -> Result<(CaptureHandle, MicFrames), CaptureError> {
    let (device, stream_config) = resolve_device(device_name)?;
    let channels = stream_config.channels;

    let rb = CaptureRb::new(CAPTURE_RB_SIZE);
    let (mut producer, consumer) = rb.split();

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            let mono = to_mono(data, channels as usize);
            let bytes: Vec<AudioSample> = mono.iter().map(|&s| f32_to_byte(s)).collect();
            let written = producer.push_slice(&bytes);
            if written < bytes.len() {
                // Reader fell behind; the oldest capture bytes are lost and
                // the meter simply picks up again on the next tick.
            }
        },
        move |err| {
            error!("Audio input stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;

    info!("Audio capture started");

    Ok((CaptureHandle { _stream: stream }, MicFrames { consumer }))
}

/// Frame source backed by a WAV file
///
/// Yields successive fixed-size frames, then `None`. Lets the service and
/// the tests run the full pipeline without audio hardware.
pub struct WavCapture {
    samples: Vec<AudioSample>,
    position: usize,
}

impl WavCapture {
    /// Read and convert a WAV file into centered sample bytes
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels as usize;

        let mono: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                let raw: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
                to_mono(&raw?, channels)
            }
            hound::SampleFormat::Int => {
                let half_range = (1i64 << (spec.bits_per_sample - 1)) as f32;
                let raw: Result<Vec<i32>, _> = reader.samples::<i32>().collect();
                let floats: Vec<f32> = raw?.iter().map(|&s| s as f32 / half_range).collect();
                to_mono(&floats, channels)
            }
        };

        let samples: Vec<AudioSample> = mono.iter().map(|&s| f32_to_byte(s)).collect();

        info!(
            path = %path.as_ref().display(),
            samples = samples.len(),
            "Loaded WAV capture source"
        );

        Ok(Self { samples, position: 0 })
    }

    /// Number of whole frames remaining
    pub fn frames_remaining(&self) -> usize {
        (self.samples.len() - self.position) / FRAME_SIZE
    }
}

#[async_trait]
impl FrameSource for WavCapture {
    async fn next_frame(&mut self) -> Option<Vec<AudioSample>> {
        if self.position + FRAME_SIZE > self.samples.len() {
            return None;
        }

        let frame = self.samples[self.position..self.position + FRAME_SIZE].to_vec();
        self.position += FRAME_SIZE;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_byte_mapping() {
        assert_eq!(f32_to_byte(0.0), SAMPLE_CENTER);
        assert_eq!(f32_to_byte(1.0), 255); // 128 + 128 clamps to the byte max
        assert_eq!(f32_to_byte(-1.0), 0);
        assert_eq!(f32_to_byte(2.5), 255); // out-of-range input clamps
        assert_eq!(f32_to_byte(-2.5), 0);
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let stereo = vec![1.0, -1.0, 0.5, 0.5];
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_to_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(to_mono(&samples, 1), samples);
    }

    #[tokio::test]
    async fn test_wav_capture_yields_frames_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        // Two whole frames plus a ragged tail that must be dropped.
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(FRAME_SIZE * 2 + 100) {
            let s = if i % 2 == 0 { i16::MAX } else { i16::MIN };
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut capture = WavCapture::open(&path).unwrap();
        assert_eq!(capture.frames_remaining(), 2);

        let first = capture.next_frame().await.unwrap();
        assert_eq!(first.len(), FRAME_SIZE);
        // Full-scale alternating samples map to the byte extremes.
        assert_eq!(first[0], 255);
        assert_eq!(first[1], 0);

        assert!(capture.next_frame().await.is_some());
        assert!(capture.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_wav_capture_silence_maps_to_center() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..FRAME_SIZE {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let mut capture = WavCapture::open(&path).unwrap();
        let frame = capture.next_frame().await.unwrap();
        assert!(frame.iter().all(|&s| s == SAMPLE_CENTER));
    }

    #[test]
    fn test_missing_wav_is_a_capture_error() {
        let result = WavCapture::open("/nonexistent/input.wav");
        assert!(matches!(result, Err(CaptureError::Wav(_))));
    }
}
