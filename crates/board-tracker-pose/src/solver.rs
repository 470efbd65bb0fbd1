//! Planar Perspective-n-Point for board corners.

use board_tracker_charuco::{BoardCornerSet, CharucoBoard};
use board_tracker_core::{estimate_homography, CameraIntrinsics};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::debug;
use nalgebra::storage::Owned;
use nalgebra::{
    DVector, Dyn, Isometry3, Matrix2x3, Matrix3, OMatrix, Point2, Point3, Rotation3, Translation3,
    UnitQuaternion, Vector2, Vector3, Vector6, U6,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("corner ids and points differ in length ({ids} vs {points})")]
    MismatchedCorrespondences { ids: usize, points: usize },
    #[error("need at least 4 correspondences, got {found}")]
    NotEnoughPoints { found: usize },
    #[error("corner id {id} is not on the board")]
    UnknownCornerId { id: u32 },
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("pose refinement did not converge after {evaluations} evaluations")]
    NonConvergent { evaluations: usize },
    #[error("reprojection RMS {rms:.3}px exceeds {max:.3}px")]
    ReprojectionTooLarge { rms: f64, max: f64 },
}

/// Board-to-camera pose.
///
/// `rvec` is an axis-angle vector (direction = axis, norm = angle in
/// radians), `tvec` the board origin in the camera frame. Camera frame:
/// x right, y down, z forward. `rms` is the pixel reprojection error over
/// the correspondences the pose was solved from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    pub rms: f64,
}

impl PoseEstimate {
    pub fn from_isometry(iso: &Isometry3<f64>, rms: f64) -> Self {
        Self {
            rvec: iso.rotation.scaled_axis(),
            tvec: iso.translation.vector,
            rms,
        }
    }

    #[inline]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_scaled_axis(self.rvec)
    }

    #[inline]
    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.tvec), self.rotation())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Refinement gives up after `max_iterations * 7` residual evaluations.
    pub max_iterations: usize,
    /// Solutions with a larger RMS reprojection error are rejected.
    pub max_reprojection_error_px: f64,
    /// Relative reduction of the squared residual norm that counts as converged.
    pub ftol: f64,
    /// Relative parameter change that counts as converged.
    pub xtol: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_reprojection_error_px: 5.0,
            ftol: 1e-12,
            xtol: 1e-12,
        }
    }
}

/// Planar PnP solver with reusable buffers.
#[derive(Clone, Debug, Default)]
pub struct PnpSolver {
    params: SolverParams,
    object: Vec<Point2<f64>>,
    image: Vec<Point2<f64>>,
    normalized: Vec<Point2<f64>>,
}

impl PnpSolver {
    pub fn new(params: SolverParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    #[inline]
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Solve the board pose from resolved corners.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(corners = corners.ids.len()))
    )]
    pub fn solve(
        &mut self,
        corners: &BoardCornerSet,
        board: &CharucoBoard,
        intrinsics: &CameraIntrinsics,
    ) -> Result<PoseEstimate, PoseError> {
        if corners.ids.len() != corners.points.len() {
            return Err(PoseError::MismatchedCorrespondences {
                ids: corners.ids.len(),
                points: corners.points.len(),
            });
        }
        if corners.ids.len() < 4 {
            return Err(PoseError::NotEnoughPoints {
                found: corners.ids.len(),
            });
        }

        self.object.clear();
        self.image.clear();
        for (&id, p) in corners.ids.iter().zip(corners.points.iter()) {
            let xy = board
                .corner_xy(id)
                .ok_or(PoseError::UnknownCornerId { id })?;
            self.object.push(xy);
            self.image.push(Point2::new(p.x as f64, p.y as f64));
        }
        let object = std::mem::take(&mut self.object);
        let image = std::mem::take(&mut self.image);
        let result = self.solve_planar(&object, &image, intrinsics);
        self.object = object;
        self.image = image;
        result
    }

    /// Solve from board-plane points (`z = 0`) and their pixel positions.
    pub fn solve_planar(
        &mut self,
        object: &[Point2<f64>],
        image: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
    ) -> Result<PoseEstimate, PoseError> {
        if object.len() != image.len() {
            return Err(PoseError::MismatchedCorrespondences {
                ids: object.len(),
                points: image.len(),
            });
        }
        if object.len() < 4 {
            return Err(PoseError::NotEnoughPoints {
                found: object.len(),
            });
        }
        if is_collinear(object) {
            return Err(PoseError::Degenerate);
        }

        self.normalized.clear();
        self.normalized
            .extend(image.iter().map(|p| intrinsics.normalize(p)));
        let h = estimate_homography(object, &self.normalized).ok_or(PoseError::Degenerate)?;
        let init = pose_from_homography(&h.h).ok_or(PoseError::Degenerate)?;

        let pose = refine(object, image, intrinsics, &init, &self.params)?;
        let rms = rms_error(&pose, object, image, intrinsics).ok_or(PoseError::Degenerate)?;
        if rms > self.params.max_reprojection_error_px {
            debug!("pose rejected: rms {rms:.3}px");
            return Err(PoseError::ReprojectionTooLarge {
                rms,
                max: self.params.max_reprojection_error_px,
            });
        }
        Ok(PoseEstimate::from_isometry(&pose, rms))
    }
}

/// Project a board-frame point through `pose` and `intrinsics`.
pub fn project(
    pose: &PoseEstimate,
    point: &Point3<f64>,
    intrinsics: &CameraIntrinsics,
) -> Option<Point2<f64>> {
    intrinsics.project(&pose.isometry().transform_point(point))
}

/// RMS pixel distance between projected board corners and observed points.
///
/// `None` when a corner id is unknown, lengths differ, the set is empty or
/// a point projects behind the camera.
pub fn reprojection_rms(
    pose: &PoseEstimate,
    corners: &BoardCornerSet,
    board: &CharucoBoard,
    intrinsics: &CameraIntrinsics,
) -> Option<f64> {
    if corners.ids.is_empty() || corners.ids.len() != corners.points.len() {
        return None;
    }
    let iso = pose.isometry();
    let mut sum = 0.0;
    for (&id, p) in corners.ids.iter().zip(corners.points.iter()) {
        let q = intrinsics.project(&iso.transform_point(&board.corner_object_point(id)?))?;
        sum += (q.x - p.x as f64).powi(2) + (q.y - p.y as f64).powi(2);
    }
    Some((sum / corners.ids.len() as f64).sqrt())
}

fn is_collinear(points: &[Point2<f64>]) -> bool {
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p.coords - mean;
        sxx += d.x * d.x;
        syy += d.y * d.y;
        sxy += d.x * d.y;
    }
    let trace = sxx + syy;
    if trace <= f64::EPSILON {
        return true;
    }
    let det = sxx * syy - sxy * sxy;
    let disc = (trace * trace - 4.0 * det).max(0.0).sqrt();
    let smallest = 0.5 * (trace - disc);
    smallest <= 1e-9 * trace
}

/// Decompose a board-plane to normalized-image homography into `R|t`.
///
/// The rotation is projected onto SO(3) and the sign chosen so the board
/// lies in front of the camera.
fn pose_from_homography(h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let norm = 0.5 * (h1.norm() + h2.norm());
    if !(norm.is_finite() && norm > f64::EPSILON) {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Some(Isometry3::from_parts(Translation3::from(h3 * lambda), rotation))
}

/// Sum of squared pixel residuals, `None` if a point falls behind the camera.
fn cost(
    pose: &Isometry3<f64>,
    object: &[Point2<f64>],
    image: &[Point2<f64>],
    k: &CameraIntrinsics,
) -> Option<f64> {
    let mut sum = 0.0;
    for (o, p) in object.iter().zip(image.iter()) {
        let q = k.project(&pose.transform_point(&Point3::new(o.x, o.y, 0.0)))?;
        sum += (q - *p).norm_squared();
    }
    sum.is_finite().then_some(sum)
}

fn rms_error(
    pose: &Isometry3<f64>,
    object: &[Point2<f64>],
    image: &[Point2<f64>],
    k: &CameraIntrinsics,
) -> Option<f64> {
    cost(pose, object, image, k).map(|c| (c / object.len() as f64).sqrt())
}

/// Left Jacobian of SO(3) at `omega`.
fn left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let w = omega.cross_matrix();
    if theta < 1e-8 {
        return Matrix3::identity() + 0.5 * w;
    }
    let t2 = theta * theta;
    let a = (1.0 - theta.cos()) / t2;
    let b = (theta - theta.sin()) / (t2 * theta);
    Matrix3::identity() + a * w + b * w * w
}

/// Pixel reprojection residuals of board-plane points.
///
/// Parameters are `[omega, t]`: the rotation is `exp(omega) * base`, with
/// `base` the pose the refinement started from.
struct PlanarReprojection<'a> {
    object: &'a [Point2<f64>],
    image: &'a [Point2<f64>],
    k: &'a CameraIntrinsics,
    base: UnitQuaternion<f64>,
    omega: Vector3<f64>,
    translation: Vector3<f64>,
}

impl<'a> PlanarReprojection<'a> {
    fn new(
        object: &'a [Point2<f64>],
        image: &'a [Point2<f64>],
        k: &'a CameraIntrinsics,
        init: &Isometry3<f64>,
    ) -> Self {
        Self {
            object,
            image,
            k,
            base: init.rotation,
            omega: Vector3::zeros(),
            translation: init.translation.vector,
        }
    }

    fn pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_scaled_axis(self.omega) * self.base,
        )
    }
}

impl LeastSquaresProblem<f64, Dyn, U6> for PlanarReprojection<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, x: &Vector6<f64>) {
        self.omega = x.fixed_rows::<3>(0).into_owned();
        self.translation = x.fixed_rows::<3>(3).into_owned();
    }

    fn params(&self) -> Vector6<f64> {
        let (w, t) = (&self.omega, &self.translation);
        Vector6::new(w.x, w.y, w.z, t.x, t.y, t.z)
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let pose = self.pose();
        let mut r = DVector::zeros(2 * self.object.len());
        for (i, (o, p)) in self.object.iter().zip(self.image).enumerate() {
            let q = self
                .k
                .project(&pose.transform_point(&Point3::new(o.x, o.y, 0.0)))?;
            r[2 * i] = q.x - p.x;
            r[2 * i + 1] = q.y - p.y;
        }
        Some(r)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U6>> {
        let rotation = UnitQuaternion::from_scaled_axis(self.omega) * self.base;
        let j_left = left_jacobian(&self.omega);
        let k = self.k;
        let mut jac = OMatrix::<f64, Dyn, U6>::zeros(2 * self.object.len());
        for (i, o) in self.object.iter().enumerate() {
            let rotated = rotation * Vector3::new(o.x, o.y, 0.0);
            let pc = rotated + self.translation;
            if pc.z <= 1e-12 {
                return None;
            }
            let inv_z = 1.0 / pc.z;
            let d_proj = Matrix2x3::new(
                k.fx * inv_z, 0.0, -k.fx * pc.x * inv_z * inv_z, //
                0.0, k.fy * inv_z, -k.fy * pc.y * inv_z * inv_z,
            );
            // d(pc)/d(omega) = -[R X]x * J_l(omega), d(pc)/dt = I.
            let d_rot = d_proj * (-rotated.cross_matrix()) * j_left;
            jac.fixed_view_mut::<2, 3>(2 * i, 0).copy_from(&d_rot);
            jac.fixed_view_mut::<2, 3>(2 * i, 3).copy_from(&d_proj);
        }
        Some(jac)
    }
}

/// Levenberg-Marquardt refinement of `init` on pixel reprojection error.
fn refine(
    object: &[Point2<f64>],
    image: &[Point2<f64>],
    k: &CameraIntrinsics,
    init: &Isometry3<f64>,
    params: &SolverParams,
) -> Result<Isometry3<f64>, PoseError> {
    let lm = LevenbergMarquardt::new()
        .with_ftol(params.ftol.max(f64::EPSILON))
        .with_xtol(params.xtol.max(f64::EPSILON))
        .with_patience(params.max_iterations.max(1));
    let (problem, report) = lm.minimize(PlanarReprojection::new(object, image, k, init));
    debug!(
        "pose refinement: {:?} after {} evaluations, objective {:.3e}",
        report.termination, report.number_of_evaluations, report.objective_function
    );
    match &report.termination {
        t if t.was_successful() => Ok(problem.pose()),
        // The start is already a minimum up to floating point precision.
        TerminationReason::NoImprovementPossible(_) => Ok(problem.pose()),
        TerminationReason::Numerical(_) => Err(PoseError::Degenerate),
        _ => Err(PoseError::NonConvergent {
            evaluations: report.number_of_evaluations,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(640, 480, 320.0, 240.0, 600.0, 600.0).expect("k")
    }

    fn grid() -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for y in 1..4 {
            for x in 1..5 {
                pts.push(Point2::new(x as f64 * 0.04, y as f64 * 0.04));
            }
        }
        pts
    }

    fn truth() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(-0.1, -0.08, 0.6),
            UnitQuaternion::from_euler_angles(0.3, -0.2, 0.1),
        )
    }

    fn observe(pose: &Isometry3<f64>, object: &[Point2<f64>]) -> Vec<Point2<f64>> {
        let k = intrinsics();
        object
            .iter()
            .map(|o| {
                k.project(&pose.transform_point(&Point3::new(o.x, o.y, 0.0)))
                    .expect("visible")
            })
            .collect()
    }

    #[test]
    fn recovers_exact_pose_from_noise_free_points() {
        let object = grid();
        let image = observe(&truth(), &object);
        let mut solver = PnpSolver::new(SolverParams::default());
        let est = solver
            .solve_planar(&object, &image, &intrinsics())
            .expect("pose");

        assert!(est.rms < 1e-6);
        let iso = est.isometry();
        assert_relative_eq!(iso.translation.vector, truth().translation.vector, epsilon = 1e-6);
        assert!(iso.rotation.angle_to(&truth().rotation) < 1e-6);
    }

    #[test]
    fn homography_initialisation_is_already_close() {
        let object = grid();
        let image = observe(&truth(), &object);
        let k = intrinsics();
        let normalized: Vec<_> = image.iter().map(|p| k.normalize(p)).collect();
        let h = estimate_homography(&object, &normalized).expect("h");
        let init = pose_from_homography(&h.h).expect("init");
        assert!(init.translation.vector.z > 0.0);
        assert!(init.rotation.angle_to(&truth().rotation) < 1e-3);
    }

    #[test]
    fn refinement_recovers_truth_from_a_perturbed_start() {
        let object = grid();
        let image = observe(&truth(), &object);
        let start = Isometry3::from_parts(
            Translation3::new(-0.09, -0.07, 0.65),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.05, -0.04, 0.03)) * truth().rotation,
        );
        let pose = refine(&object, &image, &intrinsics(), &start, &SolverParams::default())
            .expect("refined");
        assert_relative_eq!(pose.translation.vector, truth().translation.vector, epsilon = 1e-6);
        assert!(pose.rotation.angle_to(&truth().rotation) < 1e-6);
    }

    #[test]
    fn start_behind_the_camera_is_not_refined() {
        let object = grid();
        let image = observe(&truth(), &object);
        let start = Isometry3::from_parts(Translation3::new(-0.1, -0.08, -0.6), truth().rotation);
        let result = refine(&object, &image, &intrinsics(), &start, &SolverParams::default());
        assert!(matches!(
            result,
            Err(PoseError::NonConvergent { .. } | PoseError::Degenerate)
        ));
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let object = grid();
        let image = observe(&truth(), &object);
        let k = intrinsics();
        let mut problem = PlanarReprojection::new(&object, &image, &k, &truth());
        let x0 = Vector6::new(0.02, -0.01, 0.03, -0.1, -0.08, 0.6);
        problem.set_params(&x0);
        let analytic = problem.jacobian().expect("jacobian");

        let h = 1e-6;
        for c in 0..6 {
            let mut plus = x0;
            plus[c] += h;
            problem.set_params(&plus);
            let r_plus = problem.residuals().expect("residuals");
            let mut minus = x0;
            minus[c] -= h;
            problem.set_params(&minus);
            let r_minus = problem.residuals().expect("residuals");
            let numeric = (r_plus - r_minus) / (2.0 * h);
            assert_relative_eq!(analytic.column(c).into_owned(), numeric, epsilon = 1e-3);
        }
    }

    #[test]
    fn noisy_points_converge_to_small_residual() {
        let object = grid();
        let mut image = observe(&truth(), &object);
        for (i, p) in image.iter_mut().enumerate() {
            let s = if i % 2 == 0 { 0.3 } else { -0.3 };
            p.x += s;
            p.y -= s * 0.5;
        }
        let est = PnpSolver::new(SolverParams::default())
            .solve_planar(&object, &image, &intrinsics())
            .expect("pose");
        assert!(est.rms < 0.5);
        assert!((est.tvec - truth().translation.vector).norm() < 5e-3);
    }

    #[test]
    fn precondition_errors() {
        let k = intrinsics();
        let mut solver = PnpSolver::default();
        let object = grid();
        let image = observe(&truth(), &object);

        assert_eq!(
            solver.solve_planar(&object[..3], &image[..3], &k),
            Err(PoseError::NotEnoughPoints { found: 3 })
        );
        assert_eq!(
            solver.solve_planar(&object, &image[..5], &k),
            Err(PoseError::MismatchedCorrespondences {
                ids: object.len(),
                points: 5
            })
        );

        let line: Vec<_> = (0..5).map(|i| Point2::new(i as f64 * 0.04, 0.04)).collect();
        let line_img = observe(&truth(), &line);
        assert_eq!(
            solver.solve_planar(&line, &line_img, &k),
            Err(PoseError::Degenerate)
        );
    }

    #[test]
    fn inconsistent_points_exceed_reprojection_gate() {
        let object = grid();
        let mut image = observe(&truth(), &object);
        image[0].x += 60.0;
        image[5].y -= 45.0;
        let result = PnpSolver::new(SolverParams {
            max_reprojection_error_px: 1.0,
            ..SolverParams::default()
        })
        .solve_planar(&object, &image, &intrinsics());
        assert!(matches!(result, Err(PoseError::ReprojectionTooLarge { .. })));
    }

    #[test]
    fn projection_matches_intrinsics() {
        let est = PoseEstimate::from_isometry(&truth(), 0.0);
        let p = Point3::new(0.04, 0.08, 0.0);
        let expected = intrinsics()
            .project(&truth().transform_point(&p))
            .expect("visible");
        let got = project(&est, &p, &intrinsics()).expect("visible");
        assert_relative_eq!(got, expected, epsilon = 1e-9);
    }
}
