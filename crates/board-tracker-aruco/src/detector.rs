//! Full-frame ArUco detection.

use crate::decode::{decode_candidate, DecodeConfig, MarkerDecoder};
use crate::quad::{extract_quads, perimeter, push_merged, refine_quad_lines, ComponentScratch, Quad, QuadFilter};
use crate::threshold::{adaptive_threshold, integral_image};
use crate::{Dictionary, Matcher};
use board_tracker_core::{refine_corner_subpix, GrayImageView, SubpixParams};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Corner refinement applied to decoded markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CornerRefinement {
    /// Keep the hull-fitted corners.
    None,
    /// Intersect straight lines fitted to the four edges.
    Lines,
    /// Gradient-based sub-pixel refinement of each corner.
    #[default]
    Subpix,
}

/// Detector tuning knobs.
///
/// Rates are relative to the larger image dimension (perimeters) or to the
/// candidate perimeter (corner distances), following the usual ArUco
/// conventions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArucoDetectorParams {
    pub adaptive_thresh_win_size_min: u32,
    pub adaptive_thresh_win_size_max: u32,
    pub adaptive_thresh_win_size_step: u32,
    /// Pixels darker than `local_mean - constant` are foreground.
    pub adaptive_thresh_constant: f32,
    pub min_marker_perimeter_rate: f32,
    pub max_marker_perimeter_rate: f32,
    /// Minimum side length as a fraction of the candidate perimeter.
    pub min_corner_distance_rate: f32,
    /// Minimum side length of a candidate in pixels.
    pub min_side_length_px: f32,
    /// Minimum distance of any corner from the image border, in pixels.
    pub min_distance_to_border: u32,
    /// Candidates closer than this (mean corner distance / perimeter) are merged.
    pub min_marker_distance_rate: f32,
    /// Minimum ratio of quad area to convex hull area.
    pub min_quad_fill: f32,
    pub marker_border_bits: u32,
    /// Fraction of each cell ignored along its edges when sampling.
    pub cell_margin_rate: f32,
    /// Candidates whose cell intensities vary less than this are dropped.
    pub min_otsu_std_dev: f32,
    pub max_erroneous_bits_in_border_rate: f32,
    /// Fraction of the dictionary's correction capacity actually used.
    pub error_correction_rate: f32,
    pub corner_refinement: CornerRefinement,
    /// Upper bound on the refinement half window, in pixels.
    pub corner_refinement_win_size: u32,
    pub corner_refinement_max_iterations: u32,
    pub corner_refinement_min_accuracy: f32,
}

impl Default for ArucoDetectorParams {
    fn default() -> Self {
        Self {
            adaptive_thresh_win_size_min: 3,
            adaptive_thresh_win_size_max: 23,
            adaptive_thresh_win_size_step: 10,
            adaptive_thresh_constant: 7.0,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            min_corner_distance_rate: 0.05,
            min_side_length_px: 8.0,
            min_distance_to_border: 3,
            min_marker_distance_rate: 0.05,
            min_quad_fill: 0.85,
            marker_border_bits: 1,
            cell_margin_rate: 0.13,
            min_otsu_std_dev: 5.0,
            max_erroneous_bits_in_border_rate: 0.35,
            error_correction_rate: 0.6,
            corner_refinement: CornerRefinement::Subpix,
            corner_refinement_win_size: 5,
            corner_refinement_max_iterations: 30,
            corner_refinement_min_accuracy: 0.1,
        }
    }
}

impl ArucoDetectorParams {
    /// Hamming tolerance for a dictionary under these parameters.
    pub fn max_hamming(&self, dict: &Dictionary) -> u8 {
        (dict.max_correction_bits as f32 * self.error_correction_rate.max(0.0)).floor() as u8
    }

    /// Window sizes of the adaptive threshold pyramid (always odd, at least 3).
    pub fn window_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        let min = self.adaptive_thresh_win_size_min.max(3);
        let max = self.adaptive_thresh_win_size_max.max(min);
        let step = self.adaptive_thresh_win_size_step.max(1);
        (min..=max).step_by(step as usize).map(|w| (w | 1) as usize)
    }
}

/// One decoded marker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerDetection {
    pub id: u32,
    /// Image corners in marker order TL, TR, BR, BL.
    pub corners: Quad,
    pub hamming: u8,
}

/// Decoded markers of one frame.
///
/// Ids, corners and Hamming distances are parallel sequences that are only
/// ever modified together, so they always have the same length.
#[derive(Clone, Debug, Default)]
pub struct MarkerDetectionSet {
    ids: Vec<u32>,
    corners: Vec<Quad>,
    hamming: Vec<u8>,
}

impl MarkerDetectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            corners: Vec::with_capacity(capacity),
            hamming: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, detection: MarkerDetection) {
        self.ids.push(detection.id);
        self.corners.push(detection.corners);
        self.hamming.push(detection.hamming);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.corners.clear();
        self.hamming.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    #[inline]
    pub fn corners(&self) -> &[Quad] {
        &self.corners
    }

    #[inline]
    pub fn hamming(&self) -> &[u8] {
        &self.hamming
    }

    pub fn get(&self, index: usize) -> Option<MarkerDetection> {
        Some(MarkerDetection {
            id: *self.ids.get(index)?,
            corners: *self.corners.get(index)?,
            hamming: *self.hamming.get(index)?,
        })
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    /// Corners of marker `id`, if detected.
    pub fn corners_of(&self, id: u32) -> Option<&Quad> {
        let idx = self.ids.iter().position(|&i| i == id)?;
        self.corners.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = MarkerDetection> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// Keep only detections for which `keep` returns true (order preserved).
    pub fn retain(&mut self, mut keep: impl FnMut(&MarkerDetection) -> bool) {
        let mut write = 0;
        for read in 0..self.len() {
            let det = MarkerDetection {
                id: self.ids[read],
                corners: self.corners[read],
                hamming: self.hamming[read],
            };
            if keep(&det) {
                self.ids[write] = det.id;
                self.corners[write] = det.corners;
                self.hamming[write] = det.hamming;
                write += 1;
            }
        }
        self.ids.truncate(write);
        self.corners.truncate(write);
        self.hamming.truncate(write);
    }

    /// Sort detections by ascending id.
    pub fn sort_by_id(&mut self) {
        let mut all: Vec<MarkerDetection> = self.iter().collect();
        all.sort_by_key(|d| d.id);
        self.clear();
        for d in all {
            self.push(d);
        }
    }
}

impl FromIterator<MarkerDetection> for MarkerDetectionSet {
    fn from_iter<I: IntoIterator<Item = MarkerDetection>>(iter: I) -> Self {
        let mut set = MarkerDetectionSet::new();
        for d in iter {
            set.push(d);
        }
        set
    }
}

#[derive(Clone, Copy, Debug)]
struct Decoded {
    detection: MarkerDetection,
    perimeter: f32,
}

/// Square-marker detector for one dictionary.
///
/// Owns every intermediate buffer; repeated calls on same-sized frames do
/// not allocate once the buffers have grown.
#[derive(Debug)]
pub struct ArucoDetector {
    params: ArucoDetectorParams,
    matcher: Matcher,
    decode_cfg: DecodeConfig,
    integral: Vec<u32>,
    binary: Vec<u8>,
    components: ComponentScratch,
    raw: Vec<Quad>,
    merged: Vec<Quad>,
    decoder: MarkerDecoder,
    decoded: Vec<Decoded>,
}

impl ArucoDetector {
    pub fn new(dictionary: Dictionary, params: ArucoDetectorParams) -> Self {
        let max_hamming = params.max_hamming(&dictionary);
        let border_bits = params.marker_border_bits.max(1) as usize;
        let max_erroneous_border_bits = (params.max_erroneous_bits_in_border_rate.max(0.0)
            * (dictionary.marker_size * dictionary.marker_size) as f32)
            .floor() as usize;
        let decode_cfg = DecodeConfig {
            marker_size: dictionary.marker_size,
            border_bits,
            cell_margin_rate: params.cell_margin_rate,
            min_otsu_std_dev: params.min_otsu_std_dev,
            max_erroneous_border_bits,
        };
        Self {
            matcher: Matcher::new(dictionary, max_hamming),
            params,
            decode_cfg,
            integral: Vec::new(),
            binary: Vec::new(),
            components: ComponentScratch::default(),
            raw: Vec::new(),
            merged: Vec::new(),
            decoder: MarkerDecoder::default(),
            decoded: Vec::new(),
        }
    }

    #[inline]
    pub fn params(&self) -> &ArucoDetectorParams {
        &self.params
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.matcher.dictionary()
    }

    #[inline]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Convenience wrapper around [`ArucoDetector::detect_into`] that
    /// discards rejected candidates.
    pub fn detect(&mut self, image: &GrayImageView<'_>) -> MarkerDetectionSet {
        let mut out = MarkerDetectionSet::new();
        let mut rejected = Vec::new();
        self.detect_into(image, &mut out, &mut rejected);
        out
    }

    /// Detect markers in `image`.
    ///
    /// `out` receives decoded markers sorted by id, one per id (lowest
    /// Hamming distance wins, then the larger outline). `rejected` receives
    /// quadrilateral candidates that did not decode. Both are cleared first.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = image.width, height = image.height))
    )]
    pub fn detect_into(
        &mut self,
        image: &GrayImageView<'_>,
        out: &mut MarkerDetectionSet,
        rejected: &mut Vec<Quad>,
    ) {
        out.clear();
        rejected.clear();
        if image.width < 8 || image.height < 8 {
            return;
        }

        self.collect_candidates(image);

        self.decoded.clear();
        for i in 0..self.merged.len() {
            let quad = self.merged[i];
            match decode_candidate(&mut self.decoder, image, &quad, &self.decode_cfg, &self.matcher) {
                Some((m, corners)) => {
                    let corners = self.refine_corners(image, &corners);
                    self.decoded.push(Decoded {
                        detection: MarkerDetection {
                            id: m.id,
                            corners,
                            hamming: m.hamming,
                        },
                        perimeter: perimeter(&quad),
                    });
                }
                None => rejected.push(quad),
            }
        }

        self.decoded.sort_by(|a, b| {
            a.detection
                .id
                .cmp(&b.detection.id)
                .then(a.detection.hamming.cmp(&b.detection.hamming))
                .then(b.perimeter.total_cmp(&a.perimeter))
        });
        let mut last_id = None;
        for d in &self.decoded {
            if last_id == Some(d.detection.id) {
                continue;
            }
            last_id = Some(d.detection.id);
            out.push(d.detection);
        }

        debug!(
            "aruco: {} candidates, {} markers, {} rejected",
            self.merged.len(),
            out.len(),
            rejected.len()
        );
    }

    fn collect_candidates(&mut self, image: &GrayImageView<'_>) {
        let p = &self.params;
        let max_dim = image.width.max(image.height) as f32;
        let filter = QuadFilter {
            min_perimeter: p.min_marker_perimeter_rate * max_dim,
            max_perimeter: p.max_marker_perimeter_rate * max_dim,
            min_corner_distance_rate: p.min_corner_distance_rate,
            min_side_px: p.min_side_length_px,
            min_border_distance: p.min_distance_to_border as f32,
            min_fill: p.min_quad_fill,
            width: image.width,
            height: image.height,
        };

        integral_image(image, &mut self.integral);
        self.merged.clear();
        for win in p.window_sizes() {
            adaptive_threshold(
                image,
                &self.integral,
                win,
                p.adaptive_thresh_constant,
                &mut self.binary,
            );
            self.raw.clear();
            extract_quads(&self.binary, &filter, &mut self.components, &mut self.raw);
            for &quad in &self.raw {
                push_merged(&mut self.merged, quad, p.min_marker_distance_rate);
            }
        }
    }

    /// Apply the configured corner refinement to marker corners.
    pub fn refine_corners(&self, image: &GrayImageView<'_>, corners: &Quad) -> Quad {
        let cells = self.decode_cfg.cells() as f32;
        let min_side = (0..4)
            .map(|i| (corners[(i + 1) % 4] - corners[i]).norm())
            .fold(f32::INFINITY, f32::min);
        let half_cell = (min_side / (2.0 * cells)).max(1.0);
        let half_window = (self.params.corner_refinement_win_size as f32).min(half_cell);

        match self.params.corner_refinement {
            CornerRefinement::None => *corners,
            CornerRefinement::Lines => refine_quad_lines(image, corners, half_window),
            CornerRefinement::Subpix => {
                let params = SubpixParams {
                    half_window: half_window.round().max(1.0) as u32,
                    max_iterations: self.params.corner_refinement_max_iterations,
                    epsilon: self.params.corner_refinement_min_accuracy,
                };
                corners.map(|c| refine_corner_subpix(image, c, &params))
            }
        }
    }

    /// Read the inner code of an arbitrary quad (corner 0 = top-left cell).
    ///
    /// Returns `None` when the quad is unreadable.
    pub fn read_code(&mut self, image: &GrayImageView<'_>, quad: &Quad) -> Option<u64> {
        self.decoder
            .observe(image, quad, &self.decode_cfg)
            .map(|obs| obs.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::render_marker;
    use crate::DictionaryId;
    use board_tracker_core::GrayImage;
    use nalgebra::Point2;

    fn paste(dst: &mut GrayImage, src: &GrayImage, x0: usize, y0: usize) {
        for y in 0..src.height {
            for x in 0..src.width {
                dst.set(x0 + x, y0 + y, src.get(x, y));
            }
        }
    }

    #[test]
    fn detection_set_stays_parallel_under_retain() {
        let mut set = MarkerDetectionSet::new();
        for id in [4u32, 1, 9] {
            set.push(MarkerDetection {
                id,
                corners: [Point2::new(id as f32, 0.0); 4],
                hamming: 0,
            });
        }
        set.retain(|d| d.id != 1);
        assert_eq!(set.ids(), &[4, 9]);
        assert_eq!(set.corners().len(), 2);
        assert_eq!(set.corners_of(9).map(|q| q[0].x), Some(9.0));
        set.sort_by_id();
        assert_eq!(set.ids(), &[4, 9]);
        set.clear();
        assert!(set.is_empty() && set.corners().is_empty() && set.hamming().is_empty());
    }

    #[test]
    fn window_sizes_are_odd() {
        let params = ArucoDetectorParams::default();
        let sizes: Vec<usize> = params.window_sizes().collect();
        assert_eq!(sizes, vec![3, 13, 23]);
    }

    #[test]
    fn detects_markers_in_synthetic_frame() {
        let dict = DictionaryId::Generated4x4_50.dictionary();
        let mut frame = GrayImage::filled(200, 120, 230);
        paste(&mut frame, &render_marker(&dict, 5, 8, 0), 20, 30);
        paste(&mut frame, &render_marker(&dict, 31, 9, 0), 110, 40);

        let mut detector = ArucoDetector::new(dict, ArucoDetectorParams::default());
        let mut out = MarkerDetectionSet::new();
        let mut rejected = Vec::new();
        detector.detect_into(&frame.view(), &mut out, &mut rejected);

        assert_eq!(out.ids(), &[5, 31]);
        let tl = out.corners()[0][0];
        assert!((tl.x - 19.5).abs() < 1.0 && (tl.y - 29.5).abs() < 1.0, "{tl:?}");
        let br = out.corners()[1][2];
        assert!((br.x - 163.5).abs() < 1.0 && (br.y - 93.5).abs() < 1.0, "{br:?}");
    }

    #[test]
    fn blank_frame_has_no_markers() {
        let dict = DictionaryId::ArucoOriginal.dictionary();
        let frame = GrayImage::filled(64, 48, 200);
        let mut detector = ArucoDetector::new(dict, ArucoDetectorParams::default());
        assert!(detector.detect(&frame.view()).is_empty());
    }

    #[test]
    fn plain_dark_squares_are_rejected_candidates() {
        let dict = DictionaryId::Generated4x4_50.dictionary();
        let mut frame = GrayImage::filled(120, 120, 230);
        for y in 30..80 {
            for x in 30..80 {
                frame.set(x, y, 20);
            }
        }
        let mut detector = ArucoDetector::new(dict, ArucoDetectorParams::default());
        let mut out = MarkerDetectionSet::new();
        let mut rejected = Vec::new();
        detector.detect_into(&frame.view(), &mut out, &mut rejected);
        assert!(out.is_empty());
        assert!(!rejected.is_empty());
    }
}
