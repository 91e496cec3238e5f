/// Loudness level estimation module
///
/// Converts raw time-domain sample bytes into a smoothed loudness score.
/// RMS over the frame gives the raw level; exponential smoothing across
/// frames dampens transient spikes (pops, breath noise) so the meter and
/// the blow detector see a stable value.

use crate::audio_buffer::{AudioSample, FRAME_SIZE, SAMPLE_CENTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum LevelError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Level estimator configuration parameters
///
/// The scale and smoothing defaults are empirically tuned; they are plain
/// constants, not derived values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Byte value representing zero amplitude
    pub center: f32,

    /// Divisor mapping centered bytes onto [-1.0, 1.0]
    pub half_range: f32,

    /// Multiplier mapping unit RMS onto the display scale
    pub scale: f32,

    /// Exponential smoothing factor: weight given to history (0.0 - 1.0)
    pub smoothing: f32,

    /// Expected frame size in samples
    pub frame_size: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            center: SAMPLE_CENTER as f32,
            half_range: 128.0,
            scale: 1000.0,    // unit RMS maps to level 1000
            smoothing: 0.8,   // 80% history, 20% new sample
            frame_size: FRAME_SIZE,
        }
    }
}

impl LevelConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), LevelError> {
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(LevelError::InvalidConfig(
                "smoothing must be in [0.0, 1.0)".to_string()
            ));
        }

        if self.scale <= 0.0 || !self.scale.is_finite() {
            return Err(LevelError::InvalidConfig(
                "scale must be a positive finite value".to_string()
            ));
        }

        if self.half_range <= 0.0 {
            return Err(LevelError::InvalidConfig(
                "half_range must be greater than 0".to_string()
            ));
        }

        if self.frame_size == 0 {
            return Err(LevelError::InvalidConfig(
                "frame_size must be greater than 0".to_string()
            ));
        }

        Ok(())
    }
}

/// Smoothed loudness estimator
pub struct LevelEstimator {
    config: LevelConfig,
    smoothed: f32,
}

impl LevelEstimator {
    /// Create a new estimator with default configuration
    pub fn new() -> Self {
        Self::with_config(LevelConfig::default())
    }

    /// Create a new estimator with custom configuration
    pub fn with_config(config: LevelConfig) -> Self {
        debug!("Initializing level estimator with config: {:?}", config);

        Self {
            config,
            smoothed: 0.0,
        }
    }

    /// Process one frame of sample bytes and return the rounded smoothed level
    ///
    /// An empty or short frame is skipped: the prior smoothed level is
    /// returned unchanged. The pipeline is total over its input, so there
    /// is no error path here.
    pub fn process_frame(&mut self, samples: &[AudioSample]) -> u32 {
        if samples.len() < self.config.frame_size {
            trace!(
                "Skipping short frame ({} < {} samples)",
                samples.len(),
                self.config.frame_size
            );
            return self.level();
        }

        let raw = self.raw_level(samples);

        let alpha = self.config.smoothing;
        self.smoothed = self.smoothed * alpha + raw * (1.0 - alpha);

        trace!("Frame analysis: raw={:.2}, smoothed={:.2}", raw, self.smoothed);

        self.level()
    }

    /// Compute the scaled RMS of a frame without updating the smoothed state
    pub fn raw_level(&self, samples: &[AudioSample]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = samples
            .iter()
            .map(|&s| {
                let normalized = (s as f64 - self.config.center as f64)
                    / self.config.half_range as f64;
                normalized * normalized
            })
            .sum();

        let rms = (sum_squares / samples.len() as f64).sqrt();
        rms as f32 * self.config.scale
    }

    /// Current rounded smoothed level
    pub fn level(&self) -> u32 {
        self.smoothed.round() as u32
    }

    /// Current smoothed level before rounding
    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    /// Reset the smoothed state (session recreation only)
    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        debug!("Level estimator reset to initial state");
    }

    /// Get current configuration
    pub fn config(&self) -> &LevelConfig {
        &self.config
    }
}

impl Default for LevelEstimator {
    fn default() -> Self {
        Self::new()
    }
}
