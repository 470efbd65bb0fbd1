//! Board-aware filtering and recovery of marker detections.

use crate::CharucoBoard;
use board_tracker_aruco::{ArucoDetector, MarkerDetection, MarkerDetectionSet, Quad};
use board_tracker_core::{estimate_homography, GrayImageView, Homography};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Tuning knobs of [`refine_detected_markers`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Maximum mean corner distance (pixels) between a rejected candidate
    /// and the projected outline of a missing marker.
    pub min_rep_distance: f32,
    /// Multiplier on the dictionary correction capacity when checking the
    /// bits of a recovered candidate. Negative disables the bit check.
    pub error_correction_rate: f32,
    /// Try all four cyclic corner orders of each candidate.
    pub check_all_orders: bool,
    /// Markers whose mean corner error against the board homography exceeds
    /// this fraction of their side length are dropped.
    pub consistency_tolerance_rel: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            min_rep_distance: 10.0,
            error_correction_rate: 3.0,
            check_all_orders: true,
            consistency_tolerance_rel: 0.25,
        }
    }
}

/// Reusable buffers for homography fits.
#[derive(Debug, Default)]
pub struct RefineScratch {
    src: Vec<Point2<f64>>,
    dst: Vec<Point2<f64>>,
    used: Vec<bool>,
}

/// Filter `detections` against the board layout and recover missing markers
/// from `rejected`.
///
/// 1. Ids that are not on the board are dropped.
/// 2. Markers inconsistent with a board-to-image homography fitted to all
///    detections are dropped, worst first.
/// 3. For every board marker still missing, the rejected candidate closest
///    to its projected outline is accepted if it is within
///    `min_rep_distance` and its bits match the expected code.
///
/// Recovered candidates are removed from `rejected`. Detections come back
/// sorted by id. Returns the number of recovered markers.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(markers = detections.len(), rejected = rejected.len()))
)]
pub fn refine_detected_markers(
    image: &GrayImageView<'_>,
    board: &CharucoBoard,
    detector: &mut ArucoDetector,
    detections: &mut MarkerDetectionSet,
    rejected: &mut Vec<Quad>,
    params: &RefineParams,
    scratch: &mut RefineScratch,
) -> usize {
    let marker_count = board.marker_count() as u32;
    detections.retain(|d| d.id < marker_count);

    drop_inconsistent(board, detections, params, scratch);
    if detections.is_empty() {
        return 0;
    }

    let Some(h) = fit_board_homography(board, detections, scratch) else {
        return 0;
    };

    let dict = board.dictionary();
    let tolerance = (params.error_correction_rate >= 0.0)
        .then(|| (dict.max_correction_bits as f32 * params.error_correction_rate).floor() as u8);
    let shifts = if params.check_all_orders { 4 } else { 1 };
    let max_x = image.width as f32 - 1.0;
    let max_y = image.height as f32 - 1.0;

    scratch.used.clear();
    scratch.used.resize(rejected.len(), false);
    let mut recovered = 0usize;

    for id in 0..marker_count {
        if detections.contains_id(id) {
            continue;
        }
        let Some(xy) = board.marker_corners_xy(id) else {
            continue;
        };
        let projected: Quad = xy.map(|p| {
            let q = h.apply_f64(p);
            Point2::new(q.x as f32, q.y as f32)
        });
        if projected
            .iter()
            .any(|p| !(p.x >= 0.0 && p.y >= 0.0 && p.x <= max_x && p.y <= max_y))
        {
            continue;
        }

        let mut best: Option<(f32, usize, Quad)> = None;
        for (ci, cand) in rejected.iter().enumerate() {
            if scratch.used[ci] {
                continue;
            }
            for shift in 0..shifts {
                let aligned: Quad = std::array::from_fn(|k| cand[(k + shift) % 4]);
                let dist = aligned
                    .iter()
                    .zip(projected.iter())
                    .map(|(a, b)| (a - b).norm())
                    .sum::<f32>()
                    * 0.25;
                if dist < params.min_rep_distance && best.is_none_or(|(d, _, _)| dist < d) {
                    best = Some((dist, ci, aligned));
                }
            }
        }
        let Some((_, ci, aligned)) = best else {
            continue;
        };

        let hamming = match tolerance {
            Some(tol) => {
                let Some(code) = detector.read_code(image, &aligned) else {
                    continue;
                };
                match detector.matcher().distance_to(code, id, 0) {
                    Some(d) if d <= tol => d,
                    _ => continue,
                }
            }
            None => 0,
        };

        scratch.used[ci] = true;
        let corners = detector.refine_corners(image, &aligned);
        detections.push(MarkerDetection {
            id,
            corners,
            hamming,
        });
        recovered += 1;
    }

    if recovered > 0 {
        let mut idx = 0;
        rejected.retain(|_| {
            let keep = !scratch.used[idx];
            idx += 1;
            keep
        });
        debug!("board refinement recovered {} markers", recovered);
    }
    detections.sort_by_id();
    recovered
}

/// Iteratively drop the marker with the largest homography residual while
/// it exceeds the tolerance.
///
/// Two markers give eight correspondences, which any homography fits
/// exactly, so at least three are needed for a meaningful residual.
fn drop_inconsistent(
    board: &CharucoBoard,
    detections: &mut MarkerDetectionSet,
    params: &RefineParams,
    scratch: &mut RefineScratch,
) {
    while detections.len() >= 3 {
        let Some(h) = fit_board_homography(board, detections, scratch) else {
            return;
        };

        let mut worst: Option<(f32, u32)> = None;
        for det in detections.iter() {
            let Some(xy) = board.marker_corners_xy(det.id) else {
                continue;
            };
            let side = (0..4)
                .map(|i| (det.corners[(i + 1) % 4] - det.corners[i]).norm())
                .sum::<f32>()
                * 0.25;
            let err = mean_corner_error(&h, &xy, &det.corners);
            let rel = err / side.max(1.0);
            if rel > params.consistency_tolerance_rel && worst.is_none_or(|(w, _)| rel > w) {
                worst = Some((rel, det.id));
            }
        }

        match worst {
            Some((rel, id)) => {
                debug!("dropping marker {id}: board residual {rel:.2} x side");
                detections.retain(|d| d.id != id);
            }
            None => return,
        }
    }
}

fn mean_corner_error(h: &Homography, xy: &[Point2<f64>; 4], corners: &Quad) -> f32 {
    xy.iter()
        .zip(corners.iter())
        .map(|(p, c)| {
            let q = h.apply_f64(*p);
            let dx = q.x - c.x as f64;
            let dy = q.y - c.y as f64;
            (dx * dx + dy * dy).sqrt() as f32
        })
        .sum::<f32>()
        * 0.25
}

fn fit_board_homography(
    board: &CharucoBoard,
    detections: &MarkerDetectionSet,
    scratch: &mut RefineScratch,
) -> Option<Homography> {
    scratch.src.clear();
    scratch.dst.clear();
    for det in detections.iter() {
        let Some(xy) = board.marker_corners_xy(det.id) else {
            continue;
        };
        scratch.src.extend_from_slice(&xy);
        scratch
            .dst
            .extend(det.corners.iter().map(|c| Point2::new(c.x as f64, c.y as f64)));
    }
    estimate_homography(&scratch.src, &scratch.dst)
}
