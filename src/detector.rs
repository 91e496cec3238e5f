/// Blow gesture detection module
///
/// A one-shot recognizer over the smoothed level time series: the gesture
/// completes when the level stays strictly above the threshold for a
/// continuous minimum duration. The clock is injected per sample, so the
/// machine is a pure function of `(level, now)` pairs.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Blow detector configuration parameters
///
/// Threshold and duration are empirically tuned constants on the scaled
/// loudness range, matching the estimator's default scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Level above which a frame counts toward the gesture
    pub threshold: f32,

    /// Continuous exceedance required to complete the gesture, in milliseconds
    pub required_duration_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 50.0,           // sensitivity on the 0-1000 scale
            required_duration_ms: 1000,
        }
    }
}

impl DetectorConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(DetectorError::InvalidConfig(
                "threshold must be a non-negative finite value".to_string()
            ));
        }

        if self.required_duration_ms == 0 {
            return Err(DetectorError::InvalidConfig(
                "required_duration_ms must be greater than 0".to_string()
            ));
        }

        Ok(())
    }

    /// Required continuous exceedance as a `Duration`
    pub fn required_duration(&self) -> Duration {
        Duration::from_millis(self.required_duration_ms)
    }
}

/// Blow detector state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlowState {
    /// No sustained exceedance; timer cleared
    Idle,

    /// Level currently above threshold; timer running
    Armed,

    /// Gesture completed (terminal)
    Triggered,
}

/// Sustained-blow gesture detector
pub struct BlowDetector {
    config: DetectorConfig,
    state: BlowState,
    armed_at: Option<Instant>,
}

impl BlowDetector {
    /// Create a new detector with default configuration
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::default())
    }

    /// Create a new detector with custom configuration
    pub fn with_config(config: DetectorConfig) -> Self {
        debug!("Initializing blow detector with config: {:?}", config);

        Self {
            config,
            state: BlowState::Idle,
            armed_at: None,
        }
    }

    /// Feed one smoothed level sample taken at `now`
    ///
    /// Returns true exactly once, at the sample that completes the gesture.
    /// The exceedance must be continuous: any sample at or below the
    /// threshold while Armed clears the timer. Once Triggered, all further
    /// input is ignored.
    pub fn update(&mut self, level: f32, now: Instant) -> bool {
        match self.state {
            BlowState::Idle => {
                if level > self.config.threshold {
                    self.armed_at = Some(now);
                    self.state = BlowState::Armed;
                    debug!("State: Idle -> Armed (level {:.1})", level);
                }
                false
            }

            BlowState::Armed => {
                if level > self.config.threshold {
                    if let Some(armed_at) = self.armed_at {
                        let sustained = now.duration_since(armed_at);
                        if sustained > self.config.required_duration() {
                            self.state = BlowState::Triggered;
                            debug!("State: Armed -> Triggered (sustained for {:?})", sustained);
                            return true;
                        }
                    }
                    false
                } else {
                    self.armed_at = None;
                    self.state = BlowState::Idle;
                    debug!("State: Armed -> Idle (level {:.1} dropped)", level);
                    false
                }
            }

            // Terminal: the flag never reverts within a session.
            BlowState::Triggered => false,
        }
    }

    /// Whether the gesture has completed
    pub fn is_blown_out(&self) -> bool {
        self.state == BlowState::Triggered
    }

    /// When the current continuous exceedance began, if any
    pub fn armed_since(&self) -> Option<Instant> {
        self.armed_at.filter(|_| self.state == BlowState::Armed)
    }

    /// Get current detector state
    pub fn state(&self) -> BlowState {
        self.state
    }

    /// Reset to initial state (session recreation only)
    pub fn reset(&mut self) {
        self.state = BlowState::Idle;
        self.armed_at = None;
        debug!("Blow detector reset to initial state");
    }

    /// Get current configuration
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

impl Default for BlowDetector {
    fn default() -> Self {
        Self::new()
    }
}
