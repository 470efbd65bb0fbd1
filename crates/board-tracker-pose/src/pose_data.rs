use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Position and orientation handed to the pose consumer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseData {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Default for PoseData {
    fn default() -> Self {
        Self::identity()
    }
}

impl PoseData {
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self::new(iso.translation.vector, iso.rotation)
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.rotation)
    }

    /// `parent ∘ self`: express this pose in the frame `parent` maps into.
    pub fn in_frame(&self, parent: &Isometry3<f64>) -> Self {
        Self::from_isometry(&(parent * self.to_isometry()))
    }

    /// Interpolate from `self` towards `other` by `t`.
    ///
    /// Position is linear, rotation spherical along the shorter arc. Rotations
    /// too close for a stable slerp fall back to normalised lerp.
    pub fn interpolate(&self, other: &Self, t: f64) -> Self {
        let position = self.position.lerp(&other.position, t);
        let rotation = self
            .rotation
            .try_slerp(&other.rotation, t, 1e-9)
            .unwrap_or_else(|| nlerp_shortest(&self.rotation, &other.rotation, t));
        Self { position, rotation }
    }
}

fn nlerp_shortest(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>, t: f64) -> UnitQuaternion<f64> {
    let mut target = *b.quaternion();
    if a.quaternion().dot(&target) < 0.0 {
        target = -target;
    }
    let q = a.quaternion().lerp(&target, t);
    UnitQuaternion::try_new(q, 1e-12).unwrap_or(*a)
}
