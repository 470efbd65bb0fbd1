//! Tracker configuration, fixed for the lifetime of a session.

use board_tracker_aruco::{ArucoDetectorParams, DictionaryId};
use board_tracker_charuco::{BoardError, CharucoBoard, CharucoBoardSpec, RefineParams, ResolverParams};
use board_tracker_pose::SolverParams;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("filter_alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("downsample factor must be >= 1")]
    InvalidDownsample,
    #[error("charuco_min_markers must be >= 1")]
    InvalidMinMarkers,
}

/// Board, filter and pipeline settings.
///
/// Lengths share the unit poses are reported in. The optional parameter
/// blocks override the defaults of the respective pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub dictionary: DictionaryId,
    pub marker_length: f64,
    pub square_length: f64,
    pub squares_x: u32,
    pub squares_y: u32,
    /// Minimum decoded markers before board corners are resolved.
    pub charuco_min_markers: usize,
    /// Weight of the previous pose when blending (0 = no smoothing).
    pub filter_alpha: f64,
    /// Integer downsample factor applied to every frame.
    pub downsample: u32,
    pub detector: Option<ArucoDetectorParams>,
    pub refine: Option<RefineParams>,
    pub resolver: Option<ResolverParams>,
    pub solver: Option<SolverParams>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            dictionary: DictionaryId::ArucoOriginal,
            marker_length: 0.03,
            square_length: 0.04,
            squares_x: 5,
            squares_y: 7,
            charuco_min_markers: 2,
            filter_alpha: 0.5,
            downsample: 1,
            detector: None,
            refine: None,
            resolver: None,
            solver: None,
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn board_spec(&self) -> CharucoBoardSpec {
        CharucoBoardSpec {
            squares_x: self.squares_x,
            squares_y: self.squares_y,
            square_length: self.square_length,
            marker_length: self.marker_length,
            dictionary: self.dictionary,
        }
    }

    /// Build a validated board from the config.
    pub fn build_board(&self) -> Result<CharucoBoard, ConfigError> {
        Ok(CharucoBoard::new(self.board_spec())?)
    }

    /// Check every setting, including the board layout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build_board()?;
        if !(0.0..=1.0).contains(&self.filter_alpha) {
            return Err(ConfigError::InvalidAlpha(self.filter_alpha));
        }
        if self.downsample == 0 {
            return Err(ConfigError::InvalidDownsample);
        }
        if self.charuco_min_markers == 0 {
            return Err(ConfigError::InvalidMinMarkers);
        }
        Ok(())
    }

    pub fn detector_params(&self) -> ArucoDetectorParams {
        self.detector.clone().unwrap_or_default()
    }

    pub fn refine_params(&self) -> RefineParams {
        self.refine.clone().unwrap_or_default()
    }

    /// Resolver parameters with `charuco_min_markers` applied.
    pub fn resolver_params(&self) -> ResolverParams {
        let mut params = self.resolver.clone().unwrap_or_default();
        params.min_markers = self.charuco_min_markers;
        params
    }

    pub fn solver_params(&self) -> SolverParams {
        self.solver.clone().unwrap_or_default()
    }
}
