//! Lifecycle and per-frame driving of a tracking session.

use crate::config::TrackerConfig;
use crate::session::{FrameOutcome, SkipReason, TrackerError, TrackingSession};
use board_tracker_core::{CameraIntrinsics, ColorImageMut, ColorImageView};
use board_tracker_pose::PoseData;
use log::{debug, error, info, warn};
use nalgebra::Isometry3;

/// Supplies the latest camera frame, if any.
pub trait FrameSource {
    fn frame(&mut self) -> Option<ColorImageView<'_>>;
}

/// Receives the world pose of the tracked board.
pub trait PoseTarget {
    fn set_world_pose(&mut self, pose: &PoseData);
}

/// World transform of the camera at the time of the current frame.
pub trait CameraPoseProvider {
    fn camera_world_pose(&self) -> Isometry3<f64>;
}

/// Camera that never moves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticCamera(pub Isometry3<f64>);

impl Default for StaticCamera {
    fn default() -> Self {
        Self(Isometry3::identity())
    }
}

impl CameraPoseProvider for StaticCamera {
    fn camera_world_pose(&self) -> Isometry3<f64> {
        self.0
    }
}

#[derive(Debug)]
enum State {
    NotReady,
    Ready(Box<TrackingSession>),
}

/// Drives the pipeline once per host frame.
///
/// Starts `NotReady`; [`initialize`](Self::initialize) builds the session
/// exactly once. Only frames that end in [`FrameOutcome::Estimated`] touch
/// the target, so it keeps its last pose whenever tracking drops out.
#[derive(Debug)]
pub struct TrackingCoordinator<F, T, C> {
    config: TrackerConfig,
    state: State,
    frames: F,
    target: T,
    camera: C,
}

impl<F, T, C> TrackingCoordinator<F, T, C>
where
    F: FrameSource,
    T: PoseTarget,
    C: CameraPoseProvider,
{
    /// Validate the configuration and wire the collaborators.
    pub fn new(config: TrackerConfig, frames: F, target: T, camera: C) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self {
            config,
            state: State::NotReady,
            frames,
            target,
            camera,
        })
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// The live session, once initialized.
    pub fn session(&self) -> Option<&TrackingSession> {
        match &self.state {
            State::Ready(session) => Some(session),
            State::NotReady => None,
        }
    }

    #[inline]
    pub fn target(&self) -> &T {
        &self.target
    }

    #[inline]
    pub fn frames(&self) -> &F {
        &self.frames
    }

    #[inline]
    pub fn frames_mut(&mut self) -> &mut F {
        &mut self.frames
    }

    /// Build the session from full-resolution intrinsics.
    ///
    /// A second call is rejected; a failed call leaves the coordinator
    /// `NotReady` so it can be retried.
    pub fn initialize(&mut self, intrinsics: CameraIntrinsics) -> Result<(), TrackerError> {
        if self.is_ready() {
            warn!("initialize called on a ready tracker; ignored");
            return Err(TrackerError::AlreadyInitialized);
        }
        match TrackingSession::new(&self.config, intrinsics) {
            Ok(session) => {
                self.state = State::Ready(Box::new(session));
                info!("tracker ready");
                Ok(())
            }
            Err(e) => {
                error!("tracker initialization failed: {e}");
                Err(e)
            }
        }
    }

    /// Run one frame.
    pub fn tick(&mut self) -> FrameOutcome {
        self.run(None)
    }

    /// Run one frame and annotate `overlay` with what was found.
    pub fn tick_with_overlay(&mut self, overlay: &mut ColorImageMut<'_>) -> FrameOutcome {
        self.run(Some(overlay))
    }

    fn run(&mut self, overlay: Option<&mut ColorImageMut<'_>>) -> FrameOutcome {
        let State::Ready(session) = &mut self.state else {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        };

        let camera_world = self.camera.camera_world_pose();
        let frame = self.frames.frame();
        let outcome = session.process_frame(frame.as_ref(), &camera_world);

        if let Some(overlay) = overlay {
            session.draw_overlay(overlay);
        }
        match &outcome {
            FrameOutcome::Estimated(pose) => self.target.set_world_pose(pose),
            FrameOutcome::Skipped(reason) => debug!("frame skipped: {reason:?}"),
            FrameOutcome::Failed(reason) => debug!("frame failed: {reason}"),
        }
        outcome
    }

    /// Release the session and return the collaborators.
    pub fn shutdown(self) -> (F, T, C) {
        if let State::Ready(session) = self.state {
            drop(session);
        }
        info!("tracker shut down");
        (self.frames, self.target, self.camera)
    }
}
