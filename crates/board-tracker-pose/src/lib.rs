//! Camera pose of a planar board and its conversion into a smoothed
//! world-space pose.
//!
//! - [`PnpSolver`] recovers the board-to-camera pose from resolved corners:
//!   homography initialisation followed by Levenberg-Marquardt on pixel
//!   reprojection error.
//! - [`to_target_convention`] maps that pose from the camera frame
//!   (x right, y down, z forward) into the left-handed y-up frame of the
//!   consumer and flips it about the board normal.
//! - [`PoseStabilizer`] blends each new pose with the previous one and
//!   composes it with the camera's world transform.

mod convention;
mod pose_data;
mod solver;
mod stabilizer;

pub use convention::{board_flip, from_target_convention, target_basis, to_target_convention};
pub use pose_data::PoseData;
pub use solver::{
    project, reprojection_rms, PnpSolver, PoseError, PoseEstimate, SolverParams,
};
pub use stabilizer::{PoseStabilizer, StabilizerError};
