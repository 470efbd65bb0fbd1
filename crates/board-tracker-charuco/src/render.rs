//! Board rendering: printable images and synthetic camera views.

use crate::CharucoBoard;
use board_tracker_core::{CameraIntrinsics, GrayImage};
use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Intensities and sampling used by the renderers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub black: u8,
    pub white: u8,
    /// Value outside the board and its quiet zone (camera views only).
    pub background: u8,
    /// White quiet zone around the board, in squares.
    pub quiet_zone_squares: f64,
    /// Supersamples per pixel axis.
    pub supersample: u32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            black: 20,
            white: 235,
            background: 110,
            quiet_zone_squares: 1.0,
            supersample: 3,
        }
    }
}

/// Render the board flat, `px_per_square` pixels per square, with a quiet
/// zone of `params.quiet_zone_squares` on every side.
pub fn render_board(board: &CharucoBoard, px_per_square: u32, params: &RenderParams) -> GrayImage {
    let spec = board.spec();
    let px = px_per_square.max(1) as f64;
    let margin = (params.quiet_zone_squares.max(0.0) * px).round() as usize;
    let width = spec.squares_x as usize * px_per_square.max(1) as usize + 2 * margin;
    let height = spec.squares_y as usize * px_per_square.max(1) as usize + 2 * margin;
    let scale = spec.square_length / px;

    let mut img = GrayImage::new(width, height);
    let ss = params.supersample.max(1);
    for y in 0..height {
        for x in 0..width {
            let v = supersample(ss, params, |dx, dy| {
                let bx = (x as f64 + dx - margin as f64) * scale;
                let by = (y as f64 + dy - margin as f64) * scale;
                Some(board.is_black_at(bx, by))
            });
            img.set(x, y, v);
        }
    }
    img
}

/// Render what a pinhole camera sees of the board.
///
/// `board_to_camera` maps board-frame points into the camera frame
/// (x right, y down, z forward), i.e. the pose a solver would return.
pub fn render_camera_view(
    board: &CharucoBoard,
    intrinsics: &CameraIntrinsics,
    board_to_camera: &Isometry3<f64>,
    params: &RenderParams,
) -> GrayImage {
    let width = intrinsics.width as usize;
    let height = intrinsics.height as usize;
    let mut img = GrayImage::new(width, height);

    let inv = board_to_camera.inverse();
    // Camera centre and ray directions expressed in the board frame.
    let origin = inv.transform_point(&Point3::origin());
    let (board_w, board_h) = board.size();
    let quiet = params.quiet_zone_squares.max(0.0) * board.spec().square_length;
    let ss = params.supersample.max(1);

    for y in 0..height {
        for x in 0..width {
            let v = supersample(ss, params, |dx, dy| {
                let u = x as f64 + dx;
                let w = y as f64 + dy;
                let ray_cam = Vector3::new(
                    (u - intrinsics.cx) / intrinsics.fx,
                    (w - intrinsics.cy) / intrinsics.fy,
                    1.0,
                );
                let ray = inv.rotation * ray_cam;
                if ray.z.abs() < 1e-12 {
                    return None;
                }
                let s = -origin.z / ray.z;
                if s <= 0.0 {
                    return None;
                }
                let bx = origin.x + s * ray.x;
                let by = origin.y + s * ray.y;
                if bx < -quiet || by < -quiet || bx > board_w + quiet || by > board_h + quiet {
                    return None;
                }
                Some(board.is_black_at(bx, by))
            });
            img.set(x, y, v);
        }
    }
    img
}

/// Average `ss x ss` samples spread over one pixel centred on its integer
/// coordinate. `sample` returns `Some(is_black)` on the board, `None` for
/// background.
fn supersample(
    ss: u32,
    params: &RenderParams,
    mut sample: impl FnMut(f64, f64) -> Option<bool>,
) -> u8 {
    let mut acc = 0u32;
    for sy in 0..ss {
        for sx in 0..ss {
            let dx = (sx as f64 + 0.5) / ss as f64 - 0.5;
            let dy = (sy as f64 + 0.5) / ss as f64 - 0.5;
            acc += match sample(dx, dy) {
                Some(true) => params.black as u32,
                Some(false) => params.white as u32,
                None => params.background as u32,
            };
        }
    }
    (acc / (ss * ss)) as u8
}
