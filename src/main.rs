/// Blow detection service binary
///
/// Standalone service that watches the microphone (or a WAV file) for a
/// sustained blow and reports the gesture once.

use anyhow::{Context, Result};
use blow_detector::{start_capture, BlowSession, FrameSource, SessionConfig, WavCapture};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Drive cadence: one analysis tick per display frame at 60 fps.
const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blow_detector=debug".parse().unwrap())
        )
        .init();

    info!("Starting blow detection service");

    // Load configuration
    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Create session
    let session = match BlowSession::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create session: {}", e);
            std::process::exit(1);
        }
    };

    session.start().await;

    // Acquire the capture source. This is the single failure point: a
    // denied or absent device is reported once and the loop never starts.
    let result = match std::env::var("BLOW_WAV") {
        Ok(path) => {
            info!("Using WAV capture source: {}", path);
            match WavCapture::open(&path) {
                Ok(source) => {
                    run(&session, source).await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Err(_) => {
            let device = std::env::var("BLOW_DEVICE").ok();
            match start_capture(device.as_deref()) {
                Ok((handle, source)) => {
                    info!("Listening for a sustained blow...");
                    run(&session, source).await;
                    drop(handle); // releases the microphone
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        error!("Capture unavailable: {}", e);
        std::process::exit(1);
    }

    session.stop().await;
    info!("Blow detection service stopped");
}

/// Drive the session and report the outcome
async fn run<S: FrameSource + Send>(session: &Arc<BlowSession>, source: S) {
    let meter = spawn_meter(Arc::clone(session));

    session.run_from(source, FRAME_INTERVAL).await;

    meter.abort();

    match session.try_recv_event().await {
        Some(event) => {
            info!(
                "Candles blown out! level={}, sustained={:?}, timestamp={}",
                event.level, event.sustained, event.timestamp
            );
        }
        None => {
            info!("Capture ended without a sustained blow");
        }
    }
}

/// Periodically log the live level meter
fn spawn_meter(session: Arc<BlowSession>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            let stats = session.stats().await;
            info!(
                "Mic level: {} (frames: {}, buffer: {:.0}%)",
                stats.current_level, stats.frames_processed, stats.buffer_fill_percent
            );
        }
    })
}

/// Load configuration from an optional JSON file, then environment overrides
fn load_config() -> Result<SessionConfig> {
    let mut config = match std::env::var("BLOW_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config file {path}"))?
        }
        Err(_) => SessionConfig::default(),
    };

    if let Ok(threshold) = std::env::var("BLOW_THRESHOLD") {
        config.detector.threshold = threshold
            .parse::<f32>()
            .context("BLOW_THRESHOLD must be a number")?;
    }

    if let Ok(duration) = std::env::var("BLOW_DURATION_MS") {
        config.detector.required_duration_ms = duration
            .parse::<u64>()
            .context("BLOW_DURATION_MS must be a whole number of milliseconds")?;
    }

    Ok(config)
}
