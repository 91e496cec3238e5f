/// Blow-detector library
///
/// Recognizes a sustained "blow" gesture from live microphone audio: a
/// smoothed RMS loudness estimate held above a threshold for a continuous
/// minimum duration, published as a one-shot event.

pub mod audio_buffer;
pub mod capture;
pub mod detector;
pub mod level;
pub mod session;

// Re-export main types
pub use audio_buffer::{AudioBuffer, AudioSample, FRAME_SIZE, SAMPLE_CENTER, SAMPLE_RATE};
pub use capture::{start_capture, CaptureError, CaptureHandle, FrameSource, MicFrames, WavCapture};
pub use detector::{BlowDetector, BlowState, DetectorConfig, DetectorError};
pub use level::{LevelConfig, LevelError, LevelEstimator};
pub use session::{BlowEvent, BlowSession, SessionConfig, SessionError, SessionStats};
