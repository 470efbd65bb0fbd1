//! Bit sampling and identification of quadrilateral candidates.

use crate::quad::Quad;
use crate::threshold::{otsu_threshold_from_samples, std_dev};
use crate::{Match, Matcher};
use board_tracker_core::{homography_from_4pt, sample_bilinear, GrayImageView};
use nalgebra::Point2;

/// Sub-samples per cell axis used to average one cell.
const SUBSAMPLES: usize = 3;

/// Decoder settings derived from the detector parameters.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DecodeConfig {
    pub marker_size: usize,
    pub border_bits: usize,
    pub cell_margin_rate: f32,
    pub min_otsu_std_dev: f32,
    pub max_erroneous_border_bits: usize,
}

impl DecodeConfig {
    #[inline]
    pub fn cells(&self) -> usize {
        self.marker_size + 2 * self.border_bits
    }
}

/// Observed inner code of a candidate, before dictionary lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Observation {
    /// Inner bits, row-major, black = 1.
    pub code: u64,
    pub border_errors: usize,
}

/// Reusable cell-sampling state.
#[derive(Debug, Default)]
pub(crate) struct MarkerDecoder {
    cell_means: Vec<u8>,
}

impl MarkerDecoder {
    /// Sample the cell grid inside `quad` and threshold it into bits.
    ///
    /// Returns `None` for unreadable candidates: degenerate quads, cells
    /// without contrast, or too many white border cells.
    pub fn observe(
        &mut self,
        image: &GrayImageView<'_>,
        quad: &Quad,
        cfg: &DecodeConfig,
    ) -> Option<Observation> {
        let cells = cfg.cells();
        if cfg.marker_size == 0 || cfg.marker_size * cfg.marker_size > 64 {
            return None;
        }
        let c = cells as f32;
        let canonical = [
            Point2::new(0.0, 0.0),
            Point2::new(c, 0.0),
            Point2::new(c, c),
            Point2::new(0.0, c),
        ];
        let h = homography_from_4pt(&canonical, quad)?;

        let margin = cfg.cell_margin_rate.clamp(0.0, 0.45);
        let span = 1.0 - 2.0 * margin;
        self.cell_means.clear();
        for cy in 0..cells {
            for cx in 0..cells {
                let mut acc = 0.0f32;
                for sy in 0..SUBSAMPLES {
                    for sx in 0..SUBSAMPLES {
                        let u = cx as f32 + margin + span * (sx as f32 + 0.5) / SUBSAMPLES as f32;
                        let v = cy as f32 + margin + span * (sy as f32 + 0.5) / SUBSAMPLES as f32;
                        let q = h.apply(Point2::new(u, v));
                        if q.x < 0.0
                            || q.y < 0.0
                            || q.x > (image.width - 1) as f32
                            || q.y > (image.height - 1) as f32
                        {
                            return None;
                        }
                        acc += sample_bilinear(image, q.x, q.y);
                    }
                }
                let mean = acc / (SUBSAMPLES * SUBSAMPLES) as f32;
                self.cell_means.push(mean.round().clamp(0.0, 255.0) as u8);
            }
        }

        if std_dev(&self.cell_means) < cfg.min_otsu_std_dev {
            return None;
        }
        let thr = otsu_threshold_from_samples(&self.cell_means);
        Some(classify_cells(&self.cell_means, thr, cfg)).filter(|obs| {
            obs.border_errors <= cfg.max_erroneous_border_bits
        })
    }
}

fn classify_cells(means: &[u8], thr: u8, cfg: &DecodeConfig) -> Observation {
    let cells = cfg.cells();
    let border = cfg.border_bits;
    let mut code = 0u64;
    let mut border_errors = 0usize;

    for cy in 0..cells {
        for cx in 0..cells {
            let is_black = means[cy * cells + cx] <= thr;
            let is_border = cx < border || cy < border || cx >= cells - border || cy >= cells - border;
            if is_border {
                if !is_black {
                    border_errors += 1;
                }
            } else if is_black {
                let idx = (cy - border) * cfg.marker_size + (cx - border);
                code |= 1u64 << idx;
            }
        }
    }

    Observation {
        code,
        border_errors,
    }
}

/// Rotate candidate corners so that index 0 is the marker's top-left corner.
///
/// A match with rotation `r` saw the dictionary's top-left bit at candidate
/// corner `r`.
pub(crate) fn orient_corners(quad: &Quad, m: &Match) -> Quad {
    let r = m.rotation as usize;
    std::array::from_fn(|k| quad[(k + r) % 4])
}

/// Read and identify a candidate.
pub(crate) fn decode_candidate(
    decoder: &mut MarkerDecoder,
    image: &GrayImageView<'_>,
    quad: &Quad,
    cfg: &DecodeConfig,
    matcher: &Matcher,
) -> Option<(Match, Quad)> {
    let obs = decoder.observe(image, quad, cfg)?;
    let m = matcher.match_code(obs.code)?;
    Some((m, orient_corners(quad, &m)))
}
