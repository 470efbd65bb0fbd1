//! One tracking session: every pipeline stage and buffer for a camera.

use crate::config::{ConfigError, TrackerConfig};
use crate::overlay;
use crate::preprocess::{FramePreprocessor, PreprocessError};
use board_tracker_aruco::{ArucoDetector, MarkerDetectionSet, Quad};
use board_tracker_charuco::{
    refine_detected_markers, BoardCornerSet, CharucoBoard, CharucoResolver, RefineParams,
    RefineScratch,
};
use board_tracker_core::{CameraIntrinsics, ColorImageMut, ColorImageView, IntrinsicsError};
use board_tracker_pose::{PnpSolver, PoseData, PoseError, PoseStabilizer, StabilizerError};
use log::{debug, info};
use nalgebra::Isometry3;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Intrinsics(#[from] IntrinsicsError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Stabilizer(#[from] StabilizerError),
    #[error("tracker is already initialized")]
    AlreadyInitialized,
}

/// Why a frame produced no pose while the pipeline itself worked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotReady,
    NoFrame,
    NoMarkers,
    TooFewBoardCorners { found: usize },
}

/// A pipeline stage failed on this frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FailReason {
    Preprocess(PreprocessError),
    Solve(PoseError),
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailReason::Preprocess(e) => write!(f, "preprocess: {e}"),
            FailReason::Solve(e) => write!(f, "solve: {e}"),
        }
    }
}

/// Result of one tracking cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Skipped(SkipReason),
    Estimated(PoseData),
    Failed(FailReason),
}

impl FrameOutcome {
    #[inline]
    pub fn pose(&self) -> Option<&PoseData> {
        match self {
            FrameOutcome::Estimated(pose) => Some(pose),
            _ => None,
        }
    }
}

/// Pipeline state for one camera and board.
///
/// Built once from the configuration and the full-resolution intrinsics.
/// Every buffer the pipeline touches is a field and is reused frame over
/// frame; dropping the session releases all of them.
#[derive(Debug)]
pub struct TrackingSession {
    intrinsics: CameraIntrinsics,
    board: CharucoBoard,
    preprocessor: FramePreprocessor,
    detector: ArucoDetector,
    refine: RefineParams,
    refine_scratch: RefineScratch,
    markers: MarkerDetectionSet,
    rejected: Vec<Quad>,
    resolver: CharucoResolver,
    corners: BoardCornerSet,
    solver: PnpSolver,
    stabilizer: PoseStabilizer,
    last_rms: Option<f64>,
}

impl TrackingSession {
    /// Build a session for frames of `intrinsics.width x intrinsics.height`.
    pub fn new(config: &TrackerConfig, intrinsics: CameraIntrinsics) -> Result<Self, TrackerError> {
        config.validate()?;
        intrinsics.validate()?;
        let derived = intrinsics.downsampled(config.downsample)?;
        let board = config.build_board()?;
        let preprocessor = FramePreprocessor::new(
            intrinsics.width as usize,
            intrinsics.height as usize,
            config.downsample,
        )?;
        let stabilizer = PoseStabilizer::new(config.filter_alpha)?;
        let detector = ArucoDetector::new(board.dictionary(), config.detector_params());
        let resolver = CharucoResolver::new(board.clone(), config.resolver_params());

        info!(
            "tracking session: {}x{} {} board, frames at 1/{} ({}x{})",
            config.squares_x,
            config.squares_y,
            board.dictionary().name,
            config.downsample,
            derived.width,
            derived.height
        );

        Ok(Self {
            intrinsics: derived,
            markers: MarkerDetectionSet::with_capacity(board.marker_count()),
            corners: BoardCornerSet::new(),
            board,
            preprocessor,
            detector,
            refine: config.refine_params(),
            refine_scratch: RefineScratch::default(),
            rejected: Vec::new(),
            resolver,
            solver: PnpSolver::new(config.solver_params()),
            stabilizer,
            last_rms: None,
        })
    }

    /// Intrinsics of the downsampled frames the solver works on.
    #[inline]
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    #[inline]
    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    /// Markers kept on the last processed frame.
    #[inline]
    pub fn markers(&self) -> &MarkerDetectionSet {
        &self.markers
    }

    /// Board corners resolved on the last processed frame.
    #[inline]
    pub fn corners(&self) -> &BoardCornerSet {
        &self.corners
    }

    /// Reprojection RMS of the last accepted pose, in downsampled pixels.
    #[inline]
    pub fn last_rms(&self) -> Option<f64> {
        self.last_rms
    }

    #[inline]
    pub fn stabilizer(&self) -> &PoseStabilizer {
        &self.stabilizer
    }

    /// Forget the filter history; the next pose is taken as is.
    pub fn reset_filter(&mut self) {
        self.stabilizer.reset();
    }

    /// Run preprocess, detect, resolve, solve and stabilize on one frame.
    ///
    /// Every stage short-circuits the rest; per-frame results stay readable
    /// through [`markers`](Self::markers) and [`corners`](Self::corners).
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn process_frame(
        &mut self,
        frame: Option<&ColorImageView<'_>>,
        camera_world: &Isometry3<f64>,
    ) -> FrameOutcome {
        self.markers.clear();
        self.rejected.clear();
        self.corners.clear();

        let Some(frame) = frame else {
            return FrameOutcome::Skipped(SkipReason::NoFrame);
        };
        let gray = match self.preprocessor.process(Some(frame)) {
            Ok(gray) => gray,
            Err(e) => {
                debug!("frame rejected by preprocessor: {e}");
                return FrameOutcome::Failed(FailReason::Preprocess(e));
            }
        };

        self.detector
            .detect_into(&gray, &mut self.markers, &mut self.rejected);
        refine_detected_markers(
            &gray,
            &self.board,
            &mut self.detector,
            &mut self.markers,
            &mut self.rejected,
            &self.refine,
            &mut self.refine_scratch,
        );
        if self.markers.is_empty() {
            return FrameOutcome::Skipped(SkipReason::NoMarkers);
        }

        self.resolver
            .resolve_into(&gray, &self.markers, &mut self.corners);
        if !self.corners.is_solvable() {
            return FrameOutcome::Skipped(SkipReason::TooFewBoardCorners {
                found: self.corners.len(),
            });
        }

        let estimate = match self.solver.solve(&self.corners, &self.board, &self.intrinsics) {
            Ok(estimate) => estimate,
            Err(e) => {
                debug!("pose solve failed: {e}");
                return FrameOutcome::Failed(FailReason::Solve(e));
            }
        };
        self.last_rms = Some(estimate.rms);
        FrameOutcome::Estimated(self.stabilizer.stabilize(&estimate, camera_world))
    }

    /// Draw the last frame's markers (green) and board corners (red) onto a
    /// full-resolution overlay.
    pub fn draw_overlay(&self, overlay: &mut ColorImageMut<'_>) {
        let scale = self.preprocessor.factor() as f32;
        overlay::draw_markers(overlay, &self.markers, scale);
        overlay::draw_corners(overlay, &self.corners, scale);
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        let (w, h) = self.preprocessor.output_size();
        debug!("releasing gray buffer {w}x{h}");
        debug!(
            "releasing detector buffers, {} markers, {} rejected candidates",
            self.markers.len(),
            self.rejected.len()
        );
        debug!("releasing board corner buffer ({} corners)", self.corners.len());
        info!("tracking session closed");
    }
}
