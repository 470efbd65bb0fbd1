//! Camera-frame poses to the consumer's coordinate convention.
//!
//! The solver works in the camera frame (x right, y down, z forward). The
//! consumer is left-handed with y up and z forward, so the change of basis
//! is `S = diag(1, -1, 1)`: `p' = S p`, `R' = S R S`. Board objects are
//! then turned half way around the board normal so the consumer's forward
//! axis faces the camera.

use crate::{PoseData, PoseEstimate};
use nalgebra::{Isometry3, Matrix3, Quaternion, Translation3, UnitQuaternion, Vector3};

/// Change of basis from the camera frame to the target frame.
pub fn target_basis() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, 1.0))
}

/// Fixed 180° turn about board-local Z applied after the basis change.
pub fn board_flip() -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::PI)
}

/// Convert a solved pose into the target convention, board flip included.
pub fn to_target_convention(estimate: &PoseEstimate) -> PoseData {
    let t = estimate.tvec;
    let q = estimate.rotation();
    // Conjugating by a reflection of y flips the x and z axis components.
    let mirrored = UnitQuaternion::new_unchecked(Quaternion::new(q.w, -q.i, q.j, -q.k));
    PoseData {
        position: Vector3::new(t.x, -t.y, t.z),
        rotation: mirrored * board_flip(),
    }
}

/// Inverse of [`to_target_convention`]: the board-to-camera isometry in the
/// camera frame.
pub fn from_target_convention(pose: &PoseData) -> Isometry3<f64> {
    let q = pose.rotation * board_flip().inverse();
    let rotation = UnitQuaternion::new_unchecked(Quaternion::new(q.w, -q.i, q.j, -q.k));
    let p = pose.position;
    Isometry3::from_parts(Translation3::new(p.x, -p.y, p.z), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quaternion_mirror_matches_matrix_conjugation() {
        let estimate = PoseEstimate {
            rvec: Vector3::new(0.3, -0.5, 0.9),
            tvec: Vector3::new(0.1, 0.2, 0.7),
            rms: 0.0,
        };
        let s = target_basis();
        let r = estimate.rotation().to_rotation_matrix().into_inner();
        let expected = s * r * s;

        let pose = to_target_convention(&estimate);
        let unflipped = pose.rotation * board_flip().inverse();
        assert_relative_eq!(unflipped.to_rotation_matrix().into_inner(), expected, epsilon = 1e-12);
        assert_relative_eq!(pose.position, Vector3::new(0.1, -0.2, 0.7));
    }

    #[test]
    fn board_flip_turns_about_the_board_normal() {
        // Board parallel to the image plane, 1 unit ahead.
        let estimate = PoseEstimate {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 1.0),
            rms: 0.0,
        };
        let pose = to_target_convention(&estimate);
        let x = pose.rotation * Vector3::x();
        let z = pose.rotation * Vector3::z();
        assert_relative_eq!(x, -Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(z, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn conversion_round_trips() {
        let estimate = PoseEstimate {
            rvec: Vector3::new(-0.2, 0.4, 0.1),
            tvec: Vector3::new(0.3, -0.1, 0.5),
            rms: 0.0,
        };
        let back = from_target_convention(&to_target_convention(&estimate));
        assert_relative_eq!(back.translation.vector, estimate.tvec, epsilon = 1e-12);
        assert!(back.rotation.angle_to(&estimate.rotation()) < 1e-9);
    }

    #[test]
    fn basis_is_a_reflection() {
        assert_relative_eq!(target_basis().determinant(), -1.0);
    }
}
