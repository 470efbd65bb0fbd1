//! ChArUco board support: layout, board-aware marker refinement and
//! inner-corner resolution.
//!
//! The pipeline for one frame is
//! 1. detect markers with [`board_tracker_aruco::ArucoDetector`],
//! 2. [`refine_detected_markers`] against the board layout,
//! 3. [`CharucoResolver::resolve`] to interpolate the chessboard corners.
//!
//! [`render_board`] and [`render_camera_view`] produce printable targets and
//! synthetic frames for tests and tooling.

mod board;
mod refine;
mod render;
mod resolver;

pub use board::{BoardError, CharucoBoard, CharucoBoardSpec};
pub use refine::{refine_detected_markers, RefineParams, RefineScratch};
pub use render::{render_board, render_camera_view, RenderParams};
pub use resolver::{BoardCornerSet, CharucoResolver, ResolverParams};
