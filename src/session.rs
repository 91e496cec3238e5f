/// Blow session orchestration module
///
/// Wires the pipeline together: capture bytes land in the ring buffer, the
/// session drains whole frames, runs the level estimator and the blow
/// detector on each, and publishes a single BlowEvent when the gesture
/// completes.

use crate::audio_buffer::{AudioBuffer, AudioSample};
use crate::capture::FrameSource;
use crate::detector::{BlowDetector, DetectorConfig, DetectorError};
use crate::level::{LevelConfig, LevelError, LevelEstimator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Level estimator config error: {0}")]
    Level(#[from] LevelError),

    #[error("Detector config error: {0}")]
    Detector(#[from] DetectorError),
}

/// Emitted once per session, when the sustained blow completes
#[derive(Debug, Clone)]
pub struct BlowEvent {
    /// Timestamp when the gesture completed (microseconds since epoch)
    pub timestamp: i64,

    /// Smoothed level at the triggering frame
    pub level: u32,

    /// How long the level stayed continuously above threshold
    pub sustained: Duration,
}

/// Configuration for a blow session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Level estimator parameters
    pub level: LevelConfig,

    /// Blow detector parameters
    pub detector: DetectorConfig,
}

impl SessionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), SessionError> {
        self.level.validate()?;
        self.detector.validate()?;
        Ok(())
    }
}

/// Session state behind the lock
struct SessionState {
    audio_buffer: AudioBuffer,
    estimator: LevelEstimator,
    detector: BlowDetector,
    is_running: bool,
    frames_processed: u64,
    current_level: u32,
}

/// One microphone-to-gesture session
pub struct BlowSession {
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    event_tx: mpsc::UnboundedSender<BlowEvent>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<BlowEvent>>>,
}

impl BlowSession {
    /// Create a new session
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;

        info!("Initializing blow session");
        info!("Threshold: {}", config.detector.threshold);
        info!("Required duration: {}ms", config.detector.required_duration_ms);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let state = SessionState {
            audio_buffer: AudioBuffer::new(),
            estimator: LevelEstimator::with_config(config.level.clone()),
            detector: BlowDetector::with_config(config.detector.clone()),
            is_running: false,
            frames_processed: 0,
            current_level: 0,
        };

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(state)),
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
        })
    }

    /// Start the session
    pub async fn start(&self) {
        let mut state = self.state.write().await;

        if state.is_running {
            warn!("Session already running");
            return;
        }

        state.is_running = true;
        info!("Blow session started");
    }

    /// Stop the session
    pub async fn stop(&self) {
        let mut state = self.state.write().await;

        if !state.is_running {
            warn!("Session not running");
            return;
        }

        state.is_running = false;
        info!("Blow session stopped");
    }

    /// Process incoming sample bytes against the wall clock
    ///
    /// Main entry point for live audio; chunks of any size are accepted
    /// and analyzed in frame-sized pieces.
    pub async fn process_audio(&self, samples: &[AudioSample]) {
        self.process_audio_at(samples, Instant::now()).await;
    }

    /// Process incoming sample bytes at an injected clock value
    ///
    /// Used by tests to drive synthetic frames without real delays. Every
    /// frame drained from this chunk is stamped with the same `now`.
    pub async fn process_audio_at(&self, samples: &[AudioSample], now: Instant) {
        let mut state = self.state.write().await;

        if !state.is_running {
            return;
        }

        state.audio_buffer.write(samples);

        let frame_size = self.config.level.frame_size;

        while state.audio_buffer.len() >= frame_size {
            let frame = match state.audio_buffer.read(frame_size) {
                Ok(frame) => frame,
                Err(e) => {
                    // Length was checked above; a failed read means the
                    // writer raced us, so just wait for the next chunk.
                    warn!("Frame read failed: {}", e);
                    break;
                }
            };

            let level = state.estimator.process_frame(&frame);
            state.current_level = level;
            state.frames_processed += 1;

            if state.detector.update(level as f32, now) {
                self.emit_event(&state);
            }

            if state.frames_processed % 600 == 0 {
                debug!(
                    "Processed {} frames, current level {}",
                    state.frames_processed, state.current_level
                );
            }
        }
    }

    /// Build and publish the one-shot blow event
    fn emit_event(&self, state: &SessionState) {
        let sustained = self.config.detector.required_duration();

        let event = BlowEvent {
            timestamp: Self::current_timestamp_micros(),
            level: state.current_level,
            sustained,
        };

        info!(
            "Blow detected! level={}, sustained>={:?}",
            event.level, event.sustained
        );

        if let Err(e) = self.event_tx.send(event) {
            error!("Failed to send blow event: {}", e);
        }
    }

    /// Whether the gesture has completed in this session
    pub async fn is_blown_out(&self) -> bool {
        self.state.read().await.detector.is_blown_out()
    }

    /// Current rounded smoothed level, for a live meter display
    pub async fn current_level(&self) -> u32 {
        self.state.read().await.current_level
    }

    /// Get the next blow event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<BlowEvent> {
        let mut rx = self.event_rx.write().await;
        rx.try_recv().ok()
    }

    /// Get the next blow event (blocking)
    pub async fn recv_event(&self) -> Option<BlowEvent> {
        let mut rx = self.event_rx.write().await;
        rx.recv().await
    }

    /// Get current statistics
    pub async fn stats(&self) -> SessionStats {
        let state = self.state.read().await;

        SessionStats {
            frames_processed: state.frames_processed,
            current_level: state.current_level,
            blown_out: state.detector.is_blown_out(),
            buffer_fill_percent: (state.audio_buffer.len() as f32
                                / state.audio_buffer.capacity() as f32 * 100.0),
            is_running: state.is_running,
        }
    }

    /// Recreate the session state: new buffer, estimator, and detector
    ///
    /// The blown-out flag is irreversible within a session; this starts a
    /// fresh one.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.audio_buffer.clear();
        state.estimator.reset();
        state.detector.reset();
        state.frames_processed = 0;
        state.current_level = 0;
        info!("Session reset");
    }

    /// Drive the session from a frame source at a fixed tick interval
    ///
    /// Pulls one frame per tick and feeds it through the pipeline. Returns
    /// when the source is exhausted or the gesture completes; further ticks
    /// would be harmless but useless, since the flag is already set.
    pub async fn run_from<S: FrameSource + Send>(
        &self,
        mut source: S,
        frame_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(frame_interval);

        loop {
            ticker.tick().await;

            match source.next_frame().await {
                Some(frame) => {
                    self.process_audio(&frame).await;

                    if self.is_blown_out().await {
                        debug!("Gesture complete, stopping frame loop");
                        break;
                    }
                }
                None => {
                    debug!("Frame source exhausted");
                    break;
                }
            }
        }
    }

    /// Get current timestamp in microseconds
    fn current_timestamp_micros() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub current_level: u32,
    pub blown_out: bool,
    pub buffer_fill_percent: f32,
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_buffer::{FRAME_SIZE, SAMPLE_CENTER};

    fn test_config() -> SessionConfig {
        SessionConfig::default()
    }

    fn silent_frame() -> Vec<u8> {
        vec![SAMPLE_CENTER; FRAME_SIZE]
    }

    fn loud_frame() -> Vec<u8> {
        (0..FRAME_SIZE)
            .map(|i| if i % 2 == 0 { 0 } else { 255 })
            .collect()
    }

    #[tokio::test]
    async fn test_session_creation() {
        let session = BlowSession::new(test_config()).unwrap();

        let stats = session.stats().await;
        assert!(!stats.is_running);
        assert!(!stats.blown_out);
        assert_eq!(stats.frames_processed, 0);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let session = BlowSession::new(test_config()).unwrap();

        session.start().await;
        assert!(session.stats().await.is_running);

        session.stop().await;
        assert!(!session.stats().await.is_running);
    }

    #[tokio::test]
    async fn test_ignores_audio_when_stopped() {
        let session = BlowSession::new(test_config()).unwrap();

        session.process_audio(&loud_frame()).await;

        let stats = session.stats().await;
        assert_eq!(stats.frames_processed, 0);
    }

    #[tokio::test]
    async fn test_meter_updates_per_frame() {
        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        for _ in 0..20 {
            session.process_audio(&loud_frame()).await;
        }

        let stats = session.stats().await;
        assert_eq!(stats.frames_processed, 20);
        assert!(stats.current_level > 50);
        assert_eq!(session.current_level().await, stats.current_level);
    }

    #[tokio::test]
    async fn test_silence_never_triggers() {
        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        for _ in 0..120 {
            session.process_audio(&silent_frame()).await;
        }

        assert!(!session.is_blown_out().await);
        assert!(session.try_recv_event().await.is_none());
    }

    #[tokio::test]
    async fn test_sustained_blow_emits_single_event() {
        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        let start = Instant::now();
        let tick = Duration::from_micros(16_667);

        // Two seconds of loud frames at a synthetic 60 fps clock.
        for i in 0..120u32 {
            session.process_audio_at(&loud_frame(), start + tick * i).await;
        }

        assert!(session.is_blown_out().await);

        let event = session.try_recv_event().await.expect("expected blow event");
        assert!(event.level > 50);
        assert_eq!(event.sustained, Duration::from_millis(1000));

        // One-shot: no second event.
        assert!(session.try_recv_event().await.is_none());
    }

    #[tokio::test]
    async fn test_blown_out_flag_survives_silence() {
        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        let start = Instant::now();
        let tick = Duration::from_micros(16_667);

        for i in 0..120u32 {
            session.process_audio_at(&loud_frame(), start + tick * i).await;
        }
        assert!(session.is_blown_out().await);

        for i in 120..240u32 {
            session.process_audio_at(&silent_frame(), start + tick * i).await;
        }
        assert!(session.is_blown_out().await);
        assert!(session.try_recv_event().await.is_some());
        assert!(session.try_recv_event().await.is_none());
    }

    #[tokio::test]
    async fn test_partial_chunks_are_buffered() {
        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        // Half a frame at a time: frames complete every second chunk.
        let half = vec![SAMPLE_CENTER; FRAME_SIZE / 2];
        session.process_audio(&half).await;
        assert_eq!(session.stats().await.frames_processed, 0);

        session.process_audio(&half).await;
        assert_eq!(session.stats().await.frames_processed, 1);
    }

    #[tokio::test]
    async fn test_reset_recreates_session() {
        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        let start = Instant::now();
        let tick = Duration::from_micros(16_667);
        for i in 0..120u32 {
            session.process_audio_at(&loud_frame(), start + tick * i).await;
        }
        assert!(session.is_blown_out().await);

        session.reset().await;

        let stats = session.stats().await;
        assert!(!stats.blown_out);
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.current_level, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = test_config();
        assert!(config.validate().is_ok());

        config.detector.required_duration_ms = 0;
        assert!(config.validate().is_err());

        config.detector.required_duration_ms = 1000;
        config.level.smoothing = 1.5;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_run_from_stops_when_source_ends() {
        use crate::capture::MockFrameSource;

        let session = BlowSession::new(test_config()).unwrap();
        session.start().await;

        let mut source = MockFrameSource::new();
        let mut remaining = 5u32;
        source.expect_next_frame().times(6).returning(move || {
            if remaining == 0 {
                None
            } else {
                remaining -= 1;
                Some(vec![SAMPLE_CENTER; FRAME_SIZE])
            }
        });

        session.run_from(source, Duration::from_millis(1)).await;

        let stats = session.stats().await;
        assert_eq!(stats.frames_processed, 5);
        assert!(!stats.blown_out);
    }

    #[tokio::test]
    async fn test_run_from_stops_on_trigger() {
        use crate::capture::MockFrameSource;

        // Short gate so the wall clock crosses it within the test.
        let mut config = test_config();
        config.detector.required_duration_ms = 20;

        let session = BlowSession::new(config).unwrap();
        session.start().await;

        let loud = loud_frame();
        let mut source = MockFrameSource::new();
        source.expect_next_frame().returning(move || Some(loud.clone()));

        session.run_from(source, Duration::from_millis(5)).await;

        assert!(session.is_blown_out().await);
        assert!(session.try_recv_event().await.is_some());
    }
}
