//! Thresholding utilities for candidate extraction and marker decoding.

use board_tracker_core::GrayImageView;

/// Compute Otsu threshold from a set of sample intensities.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut min_v = 255u8;
    let mut max_v = 0u8;
    for &v in samples {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    let nonzero_bins = hist.iter().filter(|&&h| h > 0).count();
    if nonzero_bins <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Population standard deviation of `samples`.
pub(crate) fn std_dev(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().map(|&v| v as f32).sum::<f32>() / n;
    let var = samples
        .iter()
        .map(|&v| {
            let d = v as f32 - mean;
            d * d
        })
        .sum::<f32>()
        / n;
    var.sqrt()
}

/// Fill `integral` with the `(w + 1) x (h + 1)` summed-area table of `img`.
///
/// `u32` holds the sum of any frame up to ~16.8 Mpx.
pub(crate) fn integral_image(img: &GrayImageView<'_>, integral: &mut Vec<u32>) {
    let stride = img.width + 1;
    integral.clear();
    integral.resize(stride * (img.height + 1), 0);

    for y in 0..img.height {
        let mut row_sum = 0u32;
        let row = &img.data[y * img.width..(y + 1) * img.width];
        for (x, &v) in row.iter().enumerate() {
            row_sum += v as u32;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }
}

/// Sum over `[x0, x1) x [y0, y1)` from a summed-area table with row `stride`.
///
/// Column strips are differenced before combining, so every intermediate
/// stays below the table values.
#[inline]
fn box_sum(
    integral: &[u32],
    stride: usize,
    (x0, y0): (usize, usize),
    (x1, y1): (usize, usize),
) -> u32 {
    let right = integral[y1 * stride + x1] - integral[y0 * stride + x1];
    let left = integral[y1 * stride + x0] - integral[y0 * stride + x0];
    right - left
}

/// Mean-based adaptive threshold.
///
/// A pixel is marked dark (`1`) when it is more than `constant` below the
/// mean of the `win x win` box around it (box clipped to the image).
pub(crate) fn adaptive_threshold(
    img: &GrayImageView<'_>,
    integral: &[u32],
    win: usize,
    constant: f32,
    binary: &mut Vec<u8>,
) {
    let (w, h) = (img.width, img.height);
    let stride = w + 1;
    let half = win / 2;
    binary.clear();
    binary.resize(w * h, 0);

    for y in 0..h {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(w);
            let sum = box_sum(integral, stride, (x0, y0), (x1, y1));
            let area = ((y1 - y0) * (x1 - x0)) as f32;
            let mean = sum as f32 / area;
            let v = img.data[y * w + x] as f32;
            binary[y * w + x] = u8::from(v < mean - constant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_tracker_core::GrayImage;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut samples = vec![20u8; 50];
        samples.extend(std::iter::repeat(200u8).take(50));
        samples.extend([25, 30, 190, 210]);
        let t = otsu_threshold_from_samples(&samples);
        assert!((30..190).contains(&t), "t = {t}");
    }

    #[test]
    fn integral_image_sums_rectangles() {
        let mut img = GrayImage::new(3, 2);
        img.data.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let mut integral = Vec::new();
        integral_image(&img.view(), &mut integral);
        assert_eq!(integral.len(), 4 * 3);
        assert_eq!(integral[2 * 4 + 3], 21);
        assert_eq!(integral[4 + 2], 3);
    }

    #[test]
    fn box_sum_near_the_top_of_the_table_range() {
        // Corners of a box deep into a bright multi-megapixel frame: the
        // naive `a + d - b - c` wraps, the strip differences do not.
        let stride = 3;
        let mut integral = vec![0u32; stride * 3];
        integral[stride + 1] = 2_000_000_000;
        integral[stride + 2] = 2_100_000_000;
        integral[2 * stride + 1] = 4_000_000_000;
        integral[2 * stride + 2] = 4_100_000_005;
        assert_eq!(box_sum(&integral, stride, (1, 1), (2, 2)), 5);
    }

    #[test]
    fn adaptive_threshold_marks_dark_edges_only() {
        // Dark square on a light background: the border of the square is
        // below its local mean, the far background is not.
        let mut img = GrayImage::filled(40, 40, 220);
        for y in 10..30 {
            for x in 10..30 {
                img.set(x, y, 30);
            }
        }
        let mut integral = Vec::new();
        let mut binary = Vec::new();
        integral_image(&img.view(), &mut integral);
        adaptive_threshold(&img.view(), &integral, 7, 7.0, &mut binary);
        assert_eq!(binary[10 * 40 + 10], 1);
        assert_eq!(binary[2 * 40 + 2], 0);
        // Deep inside the square the box is uniformly dark.
        assert_eq!(binary[20 * 40 + 20], 0);
    }
}
