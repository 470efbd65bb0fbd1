//! Pinhole camera intrinsics.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum IntrinsicsError {
    #[error("image size must be non-zero (width={width}, height={height})")]
    InvalidSize { width: u32, height: u32 },
    #[error("focal lengths must be finite and > 0 (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("principal point must be finite (cx={cx}, cy={cy})")]
    InvalidPrincipalPoint { cx: f64, cy: f64 },
    #[error("downsample factor must be >= 1 and leave a non-empty image (factor={factor})")]
    InvalidDownsample { factor: u32 },
}

/// Focal length, principal point and image size of an undistorted pinhole camera.
///
/// Values are in pixels of the image they describe. Use [`CameraIntrinsics::downsampled`]
/// to obtain the intrinsics of a frame reduced by an integer factor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Build intrinsics in the argument order of the external calibration bootstrapper.
    pub fn new(
        width: u32,
        height: u32,
        cx: f64,
        cy: f64,
        fx: f64,
        fy: f64,
    ) -> Result<Self, IntrinsicsError> {
        let k = Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        };
        k.validate()?;
        Ok(k)
    }

    pub fn validate(&self) -> Result<(), IntrinsicsError> {
        if self.width == 0 || self.height == 0 {
            return Err(IntrinsicsError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        if !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0) {
            return Err(IntrinsicsError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(IntrinsicsError::InvalidPrincipalPoint {
                cx: self.cx,
                cy: self.cy,
            });
        }
        Ok(())
    }

    /// Intrinsics of the same camera after downsampling by `factor`.
    ///
    /// Focal length and principal point are divided by `factor`, the image
    /// size uses integer division (trailing pixels are dropped).
    pub fn downsampled(&self, factor: u32) -> Result<Self, IntrinsicsError> {
        if factor == 0 || self.width / factor == 0 || self.height / factor == 0 {
            return Err(IntrinsicsError::InvalidDownsample { factor });
        }
        let d = factor as f64;
        Ok(Self {
            width: self.width / factor,
            height: self.height / factor,
            fx: self.fx / d,
            fy: self.fy / d,
            cx: self.cx / d,
            cy: self.cy / d,
        })
    }

    /// Camera matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point (x right, y down, z forward).
    ///
    /// Returns `None` for points at or behind the camera plane.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Pixel to normalized image plane (`z = 1`).
    #[inline]
    pub fn normalize(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }
}
