//! Quadrilateral candidate extraction from a binary image.
//!
//! Dark pixels are grouped into 4-connected components. The boundary pixels
//! of each component are reduced to a convex hull, and a quadrilateral is
//! fitted from four extreme hull vertices. Components whose hull is not well
//! approximated by that quadrilateral are dropped.

use board_tracker_core::{sample_bilinear, GrayImageView};
use nalgebra::{Point2, Vector2};

/// Four image corners, clockwise in image coordinates (y down).
pub type Quad = [Point2<f32>; 4];

/// Geometric gates applied to every fitted quadrilateral.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QuadFilter {
    pub min_perimeter: f32,
    pub max_perimeter: f32,
    pub min_corner_distance_rate: f32,
    pub min_side_px: f32,
    pub min_border_distance: f32,
    pub min_fill: f32,
    pub width: usize,
    pub height: usize,
}

/// Buffers reused across frames.
#[derive(Debug, Default)]
pub(crate) struct ComponentScratch {
    labels: Vec<u32>,
    stack: Vec<usize>,
    boundary: Vec<Point2<f32>>,
    hull: Vec<Point2<f32>>,
}

/// Extract candidate quads from `binary` (1 = dark) and append them to `out`.
pub(crate) fn extract_quads(
    binary: &[u8],
    filter: &QuadFilter,
    scratch: &mut ComponentScratch,
    out: &mut Vec<Quad>,
) {
    let (w, h) = (filter.width, filter.height);
    let ComponentScratch {
        labels,
        stack,
        boundary,
        hull,
    } = scratch;
    labels.clear();
    labels.resize(w * h, 0);

    let mut next_label = 0u32;
    for start in 0..w * h {
        if binary[start] == 0 || labels[start] != 0 {
            continue;
        }
        next_label += 1;
        labels[start] = next_label;
        stack.clear();
        stack.push(start);
        boundary.clear();

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0usize, 0usize);
        while let Some(idx) = stack.pop() {
            let x = idx % w;
            let y = idx / w;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            let mut on_boundary = false;
            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];
            for n in neighbours {
                match n {
                    Some(n) if binary[n] != 0 => {
                        if labels[n] == 0 {
                            labels[n] = next_label;
                            stack.push(n);
                        }
                    }
                    _ => on_boundary = true,
                }
            }
            if on_boundary {
                boundary.push(Point2::new(x as f32, y as f32));
            }
        }

        let bbox_perimeter = 2.0 * ((max_x - min_x + 1) + (max_y - min_y + 1)) as f32;
        if bbox_perimeter < filter.min_perimeter || boundary.len() < 4 {
            continue;
        }

        convex_hull(boundary, hull);
        let Some(quad) = fit_quad(hull) else {
            continue;
        };
        if accept_quad(&quad, hull, filter) {
            out.push(quad);
        }
    }
}

fn cross(o: Point2<f32>, a: Point2<f32>, b: Point2<f32>) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain. `points` is reordered in place.
pub(crate) fn convex_hull(points: &mut [Point2<f32>], hull: &mut Vec<Point2<f32>>) {
    hull.clear();
    if points.len() < 3 {
        hull.extend_from_slice(points);
        return;
    }
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));

    for &p in points.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
}

/// Absolute polygon area (shoelace).
pub(crate) fn polygon_area(poly: &[Point2<f32>]) -> f32 {
    let n = poly.len();
    let mut acc = 0.0f32;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc.abs()
}

pub(crate) fn perimeter(quad: &Quad) -> f32 {
    (0..4).map(|i| (quad[(i + 1) % 4] - quad[i]).norm()).sum()
}

/// Pick four extreme hull vertices and order them clockwise.
///
/// `p0` is farthest from the centroid, `p1` farthest from `p0`; the other two
/// are the farthest vertices on either side of the `p0 -> p1` diagonal.
pub(crate) fn fit_quad(hull: &[Point2<f32>]) -> Option<Quad> {
    if hull.len() < 4 {
        return None;
    }
    let n = hull.len() as f32;
    let centroid = hull
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords)
        / n;
    let centroid = Point2::from(centroid);

    let farthest_from = |q: Point2<f32>| {
        hull.iter()
            .copied()
            .max_by(|a, b| (a - q).norm_squared().total_cmp(&(b - q).norm_squared()))
    };
    let p0 = farthest_from(centroid)?;
    let p1 = farthest_from(p0)?;

    let mut left: Option<(f32, Point2<f32>)> = None;
    let mut right: Option<(f32, Point2<f32>)> = None;
    for &p in hull {
        let d = cross(p0, p1, p);
        if d > 0.0 && left.is_none_or(|(best, _)| d > best) {
            left = Some((d, p));
        } else if d < 0.0 && right.is_none_or(|(best, _)| -d > best) {
            right = Some((-d, p));
        }
    }
    let (_, p2) = left?;
    let (_, p3) = right?;

    let mut quad = [p0, p2, p1, p3];
    if cross(quad[0], quad[1], quad[2]) < 0.0 {
        quad.swap(1, 3);
    }
    Some(quad)
}

fn accept_quad(quad: &Quad, hull: &[Point2<f32>], filter: &QuadFilter) -> bool {
    let per = perimeter(quad);
    if per < filter.min_perimeter || per > filter.max_perimeter {
        return false;
    }

    let min_side = (filter.min_corner_distance_rate * per).max(filter.min_side_px);
    if (0..4).any(|i| (quad[(i + 1) % 4] - quad[i]).norm() < min_side) {
        return false;
    }

    let b = filter.min_border_distance;
    let max_x = filter.width as f32 - 1.0 - b;
    let max_y = filter.height as f32 - 1.0 - b;
    if quad
        .iter()
        .any(|p| p.x < b || p.y < b || p.x > max_x || p.y > max_y)
    {
        return false;
    }

    let hull_area = polygon_area(hull);
    hull_area > 0.0 && polygon_area(quad) / hull_area >= filter.min_fill
}

/// Mean corner distance between two quads under the best cyclic alignment.
pub(crate) fn quad_distance(a: &Quad, b: &Quad) -> f32 {
    (0..4)
        .map(|shift| {
            (0..4)
                .map(|i| (a[i] - b[(i + shift) % 4]).norm())
                .sum::<f32>()
                * 0.25
        })
        .fold(f32::INFINITY, f32::min)
}

/// Insert `quad` unless a near-identical quad exists; of two near-identical
/// quads the one with the larger perimeter is kept.
pub(crate) fn push_merged(merged: &mut Vec<Quad>, quad: Quad, min_distance_rate: f32) {
    let per = perimeter(&quad);
    for existing in merged.iter_mut() {
        let limit = min_distance_rate * per.min(perimeter(existing));
        if quad_distance(existing, &quad) < limit {
            if per > perimeter(existing) {
                *existing = quad;
            }
            return;
        }
    }
    merged.push(quad);
}

/// Refine corners by fitting a straight line to each side's strongest edge
/// response and intersecting neighbouring lines.
///
/// Returns the input unchanged when any side yields too few edge samples.
pub(crate) fn refine_quad_lines(image: &GrayImageView<'_>, quad: &Quad, search: f32) -> Quad {
    const SAMPLES: usize = 12;
    const STEP: f32 = 0.5;
    let mut lines = [(Point2::origin(), Vector2::zeros()); 4];

    for side in 0..4 {
        let a = quad[side];
        let b = quad[(side + 1) % 4];
        let dir = b - a;
        let len = dir.norm();
        if len < 1.0 {
            return *quad;
        }
        let normal = Vector2::new(-dir.y, dir.x) / len;

        let mut pts: Vec<Point2<f32>> = Vec::with_capacity(SAMPLES);
        for k in 0..SAMPLES {
            let t = 0.15 + 0.7 * k as f32 / (SAMPLES - 1) as f32;
            let base = a + dir * t;
            let response = |s: i32| {
                let p = base + normal * (s as f32 * STEP);
                let half = normal * STEP;
                (sample_bilinear(image, p.x + half.x, p.y + half.y)
                    - sample_bilinear(image, p.x - half.x, p.y - half.y))
                .abs()
            };
            let steps = (search / STEP).ceil() as i32;
            let mut best = (0.0f32, 0i32);
            for s in -steps..=steps {
                let g = response(s);
                if g > best.0 {
                    best = (g, s);
                }
            }
            if best.0 <= 0.0 {
                continue;
            }
            // Parabolic peak interpolation between neighbouring responses.
            let (g0, s) = best;
            let gm = response(s - 1);
            let gp = response(s + 1);
            let denom = gm - 2.0 * g0 + gp;
            let offset = if denom.abs() > 1e-6 {
                (0.5 * (gm - gp) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            pts.push(base + normal * ((s as f32 + offset) * STEP));
        }
        if pts.len() < SAMPLES / 2 {
            return *quad;
        }
        match fit_line(&pts) {
            Some(line) => lines[side] = line,
            None => return *quad,
        }
    }

    let mut out = *quad;
    for (i, corner) in out.iter_mut().enumerate() {
        let prev = lines[(i + 3) % 4];
        let next = lines[i];
        match intersect(prev, next) {
            Some(p) if (p - quad[i]).norm() <= 2.0 * search => *corner = p,
            _ => return *quad,
        }
    }
    out
}

/// Total least squares line through `pts`: `(point, unit direction)`.
fn fit_line(pts: &[Point2<f32>]) -> Option<(Point2<f32>, Vector2<f32>)> {
    let n = pts.len() as f32;
    let mean = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let (mut sxx, mut sxy, mut syy) = (0.0f32, 0.0f32, 0.0f32);
    for p in pts {
        let d = p.coords - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let dir = Vector2::new(angle.cos(), angle.sin());
    dir.iter()
        .all(|v| v.is_finite())
        .then_some((Point2::from(mean), dir))
}

fn intersect(
    (p, u): (Point2<f32>, Vector2<f32>),
    (q, v): (Point2<f32>, Vector2<f32>),
) -> Option<Point2<f32>> {
    let denom = u.x * v.y - u.y * v.x;
    if denom.abs() < 1e-6 {
        return None;
    }
    let w = q - p;
    let t = (w.x * v.y - w.y * v.x) / denom;
    Some(p + u * t)
}
