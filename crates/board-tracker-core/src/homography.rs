//! Planar homographies: board or marker plane to image.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Projective map `dst ~ h * src`, normalized so `h[(2, 2)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply_f64(Point2::new(p.x as f64, p.y as f64));
        Point2::new(q.x as f32, q.y as f32)
    }

    #[inline]
    pub fn apply_f64(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().and_then(scale_to_unit).map(Self::new)
    }
}

/// Similarity that moves a point set to its centroid and scales it to a
/// mean radius of sqrt(2).
#[derive(Clone, Copy, Debug)]
struct Conditioner {
    cx: f64,
    cy: f64,
    s: f64,
}

impl Conditioner {
    fn fit(pts: &[Point2<f64>]) -> Self {
        let n = pts.len() as f64;
        let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
        let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;
        let radius = pts.iter().map(|p| (p.x - cx).hypot(p.y - cy)).sum::<f64>() / n;
        let s = if radius > 1e-12 {
            std::f64::consts::SQRT_2 / radius
        } else {
            1.0
        };
        Self { cx, cy, s }
    }

    #[inline]
    fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) * self.s, (p.y - self.cy) * self.s)
    }

    fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.s, 0.0, -self.s * self.cx, //
            0.0, self.s, -self.s * self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    fn inverse_matrix(&self) -> Matrix3<f64> {
        let inv = 1.0 / self.s;
        Matrix3::new(
            inv, 0.0, self.cx, //
            0.0, inv, self.cy, //
            0.0, 0.0, 1.0,
        )
    }
}

fn scale_to_unit(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let w = h[(2, 2)];
    (w.is_finite() && w.abs() > 1e-12).then(|| h / w)
}

/// Estimate `H` with `dst ~ H * src` from at least four correspondences.
///
/// Both point sets are conditioned first. Exactly four pairs are solved as
/// an 8x8 linear system; more pairs go through the DLT, accumulated into
/// its 9x9 normal matrix so the cost of the decomposition does not grow
/// with the number of points.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    let cs = Conditioner::fit(src);
    let cd = Conditioner::fit(dst);
    let pairs = src.iter().zip(dst).map(|(s, d)| (cs.apply(s), cd.apply(d)));

    let hn = if src.len() == 4 {
        solve_exact(pairs)?
    } else {
        solve_dlt(pairs)?
    };
    let h = cd.inverse_matrix() * hn * cs.matrix();
    scale_to_unit(h).map(Homography::new)
}

/// Four-corner homography in `f32` pixel space, e.g. marker cell to image.
///
/// Corner order must match between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let src = src.map(|p| Point2::new(p.x as f64, p.y as f64));
    let dst = dst.map(|p| Point2::new(p.x as f64, p.y as f64));
    estimate_homography(&src, &dst)
}

/// Two DLT rows for `(x, y) -> (u, v)`.
#[inline]
fn dlt_rows(s: Point2<f64>, d: Point2<f64>) -> [[f64; 9]; 2] {
    let (x, y, u, v) = (s.x, s.y, d.x, d.y);
    [
        [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
        [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
    ]
}

fn solve_dlt(pairs: impl Iterator<Item = (Point2<f64>, Point2<f64>)>) -> Option<Matrix3<f64>> {
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in pairs {
        for row in dlt_rows(s, d) {
            let r = SVector::<f64, 9>::from(row);
            ata += r * r.transpose();
        }
    }
    // Null vector of A is the eigenvector of A^T A with the smallest eigenvalue.
    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eig.eigenvectors.column(min_idx);
    Some(Matrix3::from_fn(|r, c| h[3 * r + c]))
}

/// Direct solve with `h33 = 1`.
fn solve_exact(pairs: impl Iterator<Item = (Point2<f64>, Point2<f64>)>) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (s, d)) in pairs.enumerate() {
        for (i, row) in dlt_rows(s, d).iter().enumerate() {
            let r = 2 * k + i;
            for j in 0..8 {
                a[(r, j)] = -row[j];
            }
            b[r] = row[8];
        }
    }
    let x = a.lu().solve(&b)?;
    Some(Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    ))
}
