//! Interpolation of ChArUco corners from decoded markers.

use crate::CharucoBoard;
use board_tracker_aruco::MarkerDetectionSet;
use board_tracker_core::{estimate_homography, refine_corner_subpix, GrayImageView, SubpixParams};
use log::trace;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Board corners visible in one frame.
///
/// `ids` and `points` are parallel; `points` are image pixels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardCornerSet {
    pub ids: Vec<u32>,
    pub points: Vec<Point2<f32>>,
}

impl BoardCornerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: u32, point: Point2<f32>) {
        self.ids.push(id);
        self.points.push(point);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.points.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Enough consistent correspondences for a pose solve.
    pub fn is_solvable(&self) -> bool {
        self.ids.len() == self.points.len() && self.ids.len() >= 4
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverParams {
    /// Minimum number of decoded markers before any corner is resolved.
    pub min_markers: usize,
    /// Run gradient sub-pixel refinement on interpolated corners.
    pub refine_subpix: bool,
    /// Upper bound on the sub-pixel half window, in pixels.
    pub max_half_window: u32,
    pub subpix_max_iterations: u32,
    pub subpix_epsilon: f32,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            min_markers: 2,
            refine_subpix: true,
            max_half_window: 8,
            subpix_max_iterations: 30,
            subpix_epsilon: 0.01,
        }
    }
}

/// Resolves inner board corners from the markers around them.
///
/// Each inner corner touches exactly two marker squares. A corner is
/// resolved when at least `min(min_markers, 2)` of those markers were
/// decoded: a board-to-image homography is fitted to their corners, the
/// corner is projected through it and then refined on the image.
#[derive(Clone, Debug)]
pub struct CharucoResolver {
    board: CharucoBoard,
    params: ResolverParams,
    src: Vec<Point2<f64>>,
    dst: Vec<Point2<f64>>,
}

impl CharucoResolver {
    pub fn new(board: CharucoBoard, params: ResolverParams) -> Self {
        Self {
            board,
            params,
            src: Vec::with_capacity(8),
            dst: Vec::with_capacity(8),
        }
    }

    #[inline]
    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    #[inline]
    pub fn params(&self) -> &ResolverParams {
        &self.params
    }

    pub fn resolve(
        &mut self,
        image: &GrayImageView<'_>,
        detections: &MarkerDetectionSet,
    ) -> BoardCornerSet {
        let mut out = BoardCornerSet::new();
        self.resolve_into(image, detections, &mut out);
        out
    }

    /// Resolve visible corners into `out` (cleared first), sorted by id.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(markers = detections.len()))
    )]
    pub fn resolve_into(
        &mut self,
        image: &GrayImageView<'_>,
        detections: &MarkerDetectionSet,
        out: &mut BoardCornerSet,
    ) {
        out.clear();
        if detections.len() < self.params.min_markers.max(1) {
            return;
        }
        let needed = self.params.min_markers.clamp(1, 2);
        let max_x = image.width as f32 - 1.0;
        let max_y = image.height as f32 - 1.0;
        let inside = |p: Point2<f32>| p.x >= 0.0 && p.y >= 0.0 && p.x <= max_x && p.y <= max_y;

        for id in 0..self.board.corner_count() as u32 {
            let (Some(adjacent), Some(xy)) =
                (self.board.corner_adjacent_markers(id), self.board.corner_xy(id))
            else {
                continue;
            };

            self.src.clear();
            self.dst.clear();
            let mut found = 0usize;
            for marker in adjacent {
                let (Some(img), Some(obj)) = (
                    detections.corners_of(marker),
                    self.board.marker_corners_xy(marker),
                ) else {
                    continue;
                };
                self.src.extend_from_slice(&obj);
                self.dst
                    .extend(img.iter().map(|c| Point2::new(c.x as f64, c.y as f64)));
                found += 1;
            }
            if found < needed {
                continue;
            }

            let Some(h) = estimate_homography(&self.src, &self.dst) else {
                continue;
            };
            let q = h.apply_f64(xy);
            let mut p = Point2::new(q.x as f32, q.y as f32);
            if !inside(p) {
                continue;
            }

            if self.params.refine_subpix {
                let nearest = self
                    .dst
                    .iter()
                    .map(|d| ((d.x - q.x).powi(2) + (d.y - q.y).powi(2)).sqrt())
                    .fold(f64::INFINITY, f64::min);
                let half_window = (nearest * 0.5)
                    .round()
                    .clamp(2.0, self.params.max_half_window.max(2) as f64)
                    as u32;
                let subpix = SubpixParams {
                    half_window,
                    max_iterations: self.params.subpix_max_iterations,
                    epsilon: self.params.subpix_epsilon,
                };
                p = refine_corner_subpix(image, p, &subpix);
                if !inside(p) {
                    continue;
                }
            }

            trace!("corner {id}: ({:.2}, {:.2}) from {found} markers", p.x, p.y);
            out.push(id, p);
        }
    }
}
