//! Motion detector seam.
//!
//! Pixel acquisition and frame differencing live outside the crate: an [`ActivitySource`]
//! yields raw activity scores (fraction of changed pixels in the region of interest) and the
//! [`ScoreDetector`] turns them into one-shot [`MotionDetected`] events while armed.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Region of interest inside the camera frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 320,
            height: 240,
        }
    }
}

/// Detector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetectorConfig {
    /// Region watched for motion.
    #[serde(default)]
    pub roi: Roi,
    /// Score at or above which motion fires.
    #[serde(default = "DetectorConfig::default_threshold")]
    pub threshold: f32,
    /// Multiplier applied to raw scores before comparing with the threshold.
    #[serde(default = "DetectorConfig::default_sensitivity")]
    pub sensitivity: f32,
}

impl DetectorConfig {
    fn default_threshold() -> f32 {
        0.12
    }

    fn default_sensitivity() -> f32 {
        1.0
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            roi: Roi::default(),
            threshold: Self::default_threshold(),
            sensitivity: Self::default_sensitivity(),
        }
    }
}

/// One-shot notification that motion crossed the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionDetected {
    /// Scaled score that fired.
    pub score: f32,
    /// Arm generation the event fired under; see [`MotionDetector::arm_generation`].
    pub generation: u64,
}

/// Resource failures of the detector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    /// The camera cannot be opened or stopped delivering frames.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
}

/// Collaborator interface of a motion detector.
pub trait MotionDetector: Send + Sync {
    /// Replace the detector tuning.
    fn configure(&self, config: DetectorConfig);
    /// Enable or disable firing. Disarming never fails.
    fn arm(&self, armed: bool) -> Result<(), DetectorError>;
    /// Whether the next crossing will fire.
    fn is_armed(&self) -> bool;
    /// Counter bumped by every successful arm. Events from an older generation are stale.
    fn arm_generation(&self) -> u64;
    /// Latest scaled activity score, for calibration displays.
    fn activity_score(&self) -> f32;
    /// Stream of one-shot motion events.
    fn subscribe(&self) -> broadcast::Receiver<MotionDetected>;
}

/// Threshold detector over externally computed activity scores.
///
/// Firing disarms the detector atomically, so at most one event is produced per arm.
pub struct ScoreDetector {
    config: Mutex<DetectorConfig>,
    armed: AtomicBool,
    generation: AtomicU64,
    camera_available: AtomicBool,
    last_score: Mutex<f32>,
    events: broadcast::Sender<MotionDetected>,
}

impl ScoreDetector {
    /// Create a disarmed detector with the given tuning.
    pub fn new(config: DetectorConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config: Mutex::new(config),
            armed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            camera_available: AtomicBool::new(true),
            last_score: Mutex::new(0.0),
            events,
        }
    }

    /// Mark the camera as usable or not; an unavailable camera also disarms.
    pub fn set_camera_available(&self, available: bool) {
        self.camera_available.store(available, Ordering::SeqCst);
        if !available {
            self.armed.store(false, Ordering::SeqCst);
        }
    }

    fn current_config(&self) -> DetectorConfig {
        self.config
            .lock()
            .map(|config| *config)
            .unwrap_or_default()
    }

    /// Feed a raw activity score. Returns the event when this observation fired.
    pub fn observe(&self, raw: f32) -> Option<MotionDetected> {
        let config = self.current_config();
        let score = raw * config.sensitivity;
        if let Ok(mut last) = self.last_score.lock() {
            *last = score;
        }
        if score < config.threshold {
            return None;
        }
        // Read before firing: a re-arm racing this call yields a stale event, never a fresh one.
        let generation = self.generation.load(Ordering::SeqCst);
        self.armed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let event = MotionDetected { score, generation };
        debug!(score, "motion detected");
        let _ = self.events.send(event);
        Some(event)
    }
}

impl Default for ScoreDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl MotionDetector for ScoreDetector {
    fn configure(&self, config: DetectorConfig) {
        if let Ok(mut current) = self.config.lock() {
            *current = config;
        }
        info!(?config, "detector configured");
    }

    fn arm(&self, armed: bool) -> Result<(), DetectorError> {
        if armed && !self.camera_available.load(Ordering::SeqCst) {
            return Err(DetectorError::CameraUnavailable(
                "no frames from camera".into(),
            ));
        }
        if armed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.armed.store(armed, Ordering::SeqCst);
        Ok(())
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn arm_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn activity_score(&self) -> f32 {
        self.last_score.lock().map(|score| *score).unwrap_or(0.0)
    }

    fn subscribe(&self) -> broadcast::Receiver<MotionDetected> {
        self.events.subscribe()
    }
}

/// Producer of raw activity scores, one per sampled frame.
pub trait ActivitySource: Send {
    /// Next score, or `None` once the source is exhausted.
    fn next_score(&mut self) -> BoxFuture<'_, Option<f32>>;
}

impl ActivitySource for mpsc::UnboundedReceiver<f32> {
    fn next_score(&mut self) -> BoxFuture<'_, Option<f32>> {
        self.recv().boxed()
    }
}

/// Running sampling task feeding a [`ScoreDetector`]. Dropping the handle stops the task.
pub struct SamplingHandle {
    task: JoinHandle<()>,
}

impl SamplingHandle {
    /// Spawn a task pulling scores from `source` into `detector` until the source ends.
    pub fn start<S>(detector: Arc<ScoreDetector>, mut source: S) -> Self
    where
        S: ActivitySource + 'static,
    {
        let task = tokio::spawn(async move {
            while let Some(score) = source.next_score().await {
                detector.observe(score);
            }
            warn!("activity source ended; motion sampling stopped");
        });
        Self { task }
    }

    /// Whether the task is still sampling.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop sampling now.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SamplingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
