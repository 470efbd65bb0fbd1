//! Gradient-based sub-pixel corner refinement.
//!
//! For a true corner `q`, every gradient `g(p)` in its neighbourhood is
//! orthogonal to `p - q` (either `g` vanishes inside a flat region or `p - q`
//! runs along an edge). Stacking `g gᵀ (p - q) = 0` over a window gives a 2x2
//! linear system that is iterated until the estimate stops moving.

use crate::{sample_bilinear, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SubpixParams {
    /// Half size of the search window in pixels (window is `2 * half_window + 1`).
    pub half_window: u32,
    /// Maximum number of fixed-point iterations.
    pub max_iterations: u32,
    /// Stop once an iteration moves the corner less than this many pixels.
    pub epsilon: f32,
}

impl Default for SubpixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

/// Refine `initial` towards the nearest saddle/corner point.
///
/// The estimate is returned unchanged when the window has no usable gradient
/// or the iteration drifts out of the search window.
pub fn refine_corner_subpix(
    image: &GrayImageView<'_>,
    initial: Point2<f32>,
    params: &SubpixParams,
) -> Point2<f32> {
    let hw = params.half_window.max(1) as i32;
    let sigma = hw as f32 * 0.5;
    let inv_two_sigma2 = 1.0 / (2.0 * sigma * sigma);
    let eps2 = params.epsilon * params.epsilon;

    let mut q = initial;
    for _ in 0..params.max_iterations.max(1) {
        let (mut a, mut b, mut c) = (0.0f64, 0.0f64, 0.0f64);
        let (mut bb1, mut bb2) = (0.0f64, 0.0f64);

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let px = q.x + dx as f32;
                let py = q.y + dy as f32;
                let gx = 0.5 * (sample_bilinear(image, px + 1.0, py) - sample_bilinear(image, px - 1.0, py));
                let gy = 0.5 * (sample_bilinear(image, px, py + 1.0) - sample_bilinear(image, px, py - 1.0));
                let w = (-((dx * dx + dy * dy) as f32) * inv_two_sigma2).exp();

                let gxx = (gx * gx * w) as f64;
                let gxy = (gx * gy * w) as f64;
                let gyy = (gy * gy * w) as f64;

                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px as f64 + gxy * py as f64;
                bb2 += gxy * px as f64 + gyy * py as f64;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * (a * c).abs().max(1.0) {
            break;
        }
        let next = Point2::new(
            ((c * bb1 - b * bb2) / det) as f32,
            ((a * bb2 - b * bb1) / det) as f32,
        );
        let shift = (next - q).norm_squared();
        q = next;
        if shift <= eps2 {
            break;
        }
    }

    if !q.x.is_finite() || !q.y.is_finite() {
        return initial;
    }
    let drift = q - initial;
    if drift.x.abs() > hw as f32 || drift.y.abs() > hw as f32 {
        return initial;
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GrayImage;

    /// Checkerboard saddle with the true corner at `(cx, cy)`, anti-aliased by supersampling.
    fn saddle_image(size: usize, cx: f32, cy: f32) -> GrayImage {
        let mut img = GrayImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let mut acc = 0u32;
                for sy in 0..4 {
                    for sx in 0..4 {
                        let fx = x as f32 + (sx as f32 + 0.5) / 4.0 - 0.5;
                        let fy = y as f32 + (sy as f32 + 0.5) / 4.0 - 0.5;
                        let dark = (fx < cx) == (fy < cy);
                        acc += if dark { 20 } else { 230 };
                    }
                }
                img.set(x, y, (acc / 16) as u8);
            }
        }
        img
    }

    #[test]
    fn converges_to_saddle_point() {
        let img = saddle_image(40, 20.3, 18.7);
        let refined = refine_corner_subpix(
            &img.view(),
            Point2::new(21.5, 17.6),
            &SubpixParams::default(),
        );
        assert!((refined.x - 20.3).abs() < 0.15, "x = {}", refined.x);
        assert!((refined.y - 18.7).abs() < 0.15, "y = {}", refined.y);
    }

    #[test]
    fn flat_region_keeps_initial_estimate() {
        let img = GrayImage::filled(30, 30, 128);
        let p = Point2::new(15.0, 15.0);
        assert_eq!(
            refine_corner_subpix(&img.view(), p, &SubpixParams::default()),
            p
        );
    }
}
