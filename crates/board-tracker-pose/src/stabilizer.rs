//! Temporal filtering of solved poses.

use crate::{to_target_convention, PoseData, PoseEstimate};
use log::trace;
use nalgebra::Isometry3;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StabilizerError {
    #[error("filter alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f64),
}

/// Exponential-style pose filter with one frame of memory.
///
/// Each accepted estimate is converted to the target convention, blended
/// towards the previous local pose by `alpha` (`0` disables smoothing, `1`
/// freezes the first pose) and composed with the camera's world transform.
/// The first estimate after construction or [`reset`](Self::reset) passes
/// through unblended.
#[derive(Clone, Debug)]
pub struct PoseStabilizer {
    alpha: f64,
    previous: Option<PoseData>,
}

impl PoseStabilizer {
    pub fn new(alpha: f64) -> Result<Self, StabilizerError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(StabilizerError::InvalidAlpha(alpha));
        }
        Ok(Self {
            alpha,
            previous: None,
        })
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Blended local pose of the last accepted estimate.
    #[inline]
    pub fn previous(&self) -> Option<&PoseData> {
        self.previous.as_ref()
    }

    /// Forget the previous pose; the next estimate passes through unblended.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn stabilize(&mut self, estimate: &PoseEstimate, camera_world: &Isometry3<f64>) -> PoseData {
        let raw = to_target_convention(estimate);
        let local = match &self.previous {
            Some(prev) => raw.interpolate(prev, self.alpha),
            None => raw,
        };
        trace!(
            "stabilized local position ({:.4}, {:.4}, {:.4})",
            local.position.x,
            local.position.y,
            local.position.z
        );
        self.previous = Some(local);
        local.in_frame(camera_world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn estimate(z: f64, yaw: f64) -> PoseEstimate {
        PoseEstimate {
            rvec: Vector3::new(0.0, yaw, 0.0),
            tvec: Vector3::new(0.0, 0.0, z),
            rms: 0.0,
        }
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        assert_eq!(
            PoseStabilizer::new(1.5).unwrap_err(),
            StabilizerError::InvalidAlpha(1.5)
        );
        assert!(PoseStabilizer::new(f64::NAN).is_err());
        assert!(PoseStabilizer::new(0.0).is_ok());
        assert!(PoseStabilizer::new(1.0).is_ok());
    }

    #[test]
    fn half_alpha_lands_midway() {
        let mut s = PoseStabilizer::new(0.5).expect("alpha");
        let world = Isometry3::identity();
        s.stabilize(&estimate(1.0, 0.0), &world);
        let out = s.stabilize(&estimate(2.0, 0.0), &world);
        assert_relative_eq!(out.position, Vector3::new(0.0, 0.0, 1.5));
    }

    #[test]
    fn first_pose_and_pose_after_reset_pass_through() {
        let mut s = PoseStabilizer::new(0.9).expect("alpha");
        let world = Isometry3::identity();
        let first = s.stabilize(&estimate(3.0, 0.2), &world);
        let raw = to_target_convention(&estimate(3.0, 0.2));
        assert_relative_eq!(first.position, raw.position, epsilon = 1e-12);
        assert!(first.rotation.angle_to(&raw.rotation) < 1e-9);

        s.reset();
        assert!(s.previous().is_none());
        let after = s.stabilize(&estimate(1.0, -0.1), &world);
        let raw = to_target_convention(&estimate(1.0, -0.1));
        assert_relative_eq!(after.position, raw.position, epsilon = 1e-12);
        assert!(after.rotation.angle_to(&raw.rotation) < 1e-9);
    }
}
