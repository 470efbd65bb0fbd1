//! High-level facade for single-board ChArUco tracking.
//!
//! This crate provides:
//! - re-exports of the pipeline crates,
//! - [`TrackerConfig`] (JSON) and [`TrackingSession`], which owns every stage
//!   and buffer: preprocess, detect, resolve, solve, stabilize,
//! - [`TrackingCoordinator`], the NotReady/Ready lifecycle driven once per
//!   host frame through the [`FrameSource`], [`PoseTarget`] and
//!   [`CameraPoseProvider`] collaborators,
//! - (feature `image`) PNG interop used by the `board-tracker` CLI.
//!
//! ## Quickstart
//!
//! ```no_run
//! use board_tracker::{StaticCamera, TrackerConfig, TrackingCoordinator};
//! use board_tracker::core::CameraIntrinsics;
//! use board_tracker::frames::ImageFileSource;
//! use board_tracker::pose::PoseData;
//!
//! struct Print;
//! impl board_tracker::PoseTarget for Print {
//!     fn set_world_pose(&mut self, pose: &PoseData) {
//!         println!("{:?}", pose.position);
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrackerConfig::load_json("tracker.json")?;
//! let frames = ImageFileSource::new(vec!["frame0.png".into()]);
//! let mut tracker = TrackingCoordinator::new(config, frames, Print, StaticCamera::default())?;
//! tracker.initialize(CameraIntrinsics::new(1280, 960, 640.0, 480.0, 900.0, 900.0)?)?;
//! let outcome = tracker.tick();
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `board_tracker::core`: images, homographies, intrinsics, logging.
//! - `board_tracker::aruco`: dictionaries and marker detection.
//! - `board_tracker::charuco`: board layout, refinement, corner resolution, rendering.
//! - `board_tracker::pose`: PnP, pose conventions, stabilizer.

pub use board_tracker_aruco as aruco;
pub use board_tracker_charuco as charuco;
pub use board_tracker_core as core;
pub use board_tracker_pose as pose;

mod config;
mod coordinator;
pub mod overlay;
mod preprocess;
mod report;
mod session;

#[cfg(feature = "image")]
pub mod frames;

pub use config::{ConfigError, IoError, TrackerConfig};
pub use coordinator::{CameraPoseProvider, FrameSource, PoseTarget, StaticCamera, TrackingCoordinator};
pub use preprocess::{FramePreprocessor, PreprocessError};
pub use report::{FrameReport, OutcomeKind};
pub use session::{FailReason, FrameOutcome, SkipReason, TrackerError, TrackingSession};
