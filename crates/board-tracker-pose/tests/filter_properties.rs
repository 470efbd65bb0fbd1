use approx::assert_relative_eq;
use board_tracker_aruco::DictionaryId;
use board_tracker_charuco::{BoardCornerSet, CharucoBoard, CharucoBoardSpec};
use board_tracker_core::CameraIntrinsics;
use board_tracker_pose::{
    from_target_convention, reprojection_rms, to_target_convention, PnpSolver, PoseEstimate,
    PoseStabilizer, SolverParams,
};
use nalgebra::{Isometry3, Point2, Translation3, UnitQuaternion, Vector3};

fn board() -> CharucoBoard {
    CharucoBoard::new(CharucoBoardSpec {
        squares_x: 6,
        squares_y: 5,
        square_length: 0.03,
        marker_length: 0.022,
        dictionary: DictionaryId::Generated4x4_50,
    })
    .expect("board")
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(1280, 960, 640.0, 480.0, 600.0, 600.0)
        .expect("intrinsics")
        .downsampled(2)
        .expect("downsampled")
}

fn observed(board: &CharucoBoard, pose: &Isometry3<f64>) -> BoardCornerSet {
    let k = intrinsics();
    let mut set = BoardCornerSet::new();
    for id in 0..board.corner_count() as u32 {
        let p = board.corner_object_point(id).expect("corner");
        let q = k.project(&pose.transform_point(&p)).expect("visible");
        set.push(id, Point2::new(q.x as f32, q.y as f32));
    }
    set
}

fn estimate_at(z: f64) -> PoseEstimate {
    PoseEstimate {
        rvec: Vector3::new(0.1, -0.2, 0.05),
        tvec: Vector3::new(0.02, -0.01, z),
        rms: 0.0,
    }
}

#[test]
fn downsampled_intrinsics_match_the_scenario() {
    let k = intrinsics();
    assert_eq!((k.width, k.height), (640, 480));
    assert_relative_eq!(k.fx, 300.0);
    assert_relative_eq!(k.fy, 300.0);
    assert_relative_eq!(k.cx, 320.0);
    assert_relative_eq!(k.cy, 240.0);
}

#[test]
fn solve_then_stabilize_round_trips_through_reprojection() {
    let board = board();
    let k = intrinsics();
    let truth = Isometry3::from_parts(
        Translation3::new(-0.08, -0.06, 0.5),
        UnitQuaternion::from_euler_angles(-0.25, 0.15, 0.05),
    );
    let corners = observed(&board, &truth);
    assert!(corners.is_solvable());

    let est = PnpSolver::new(SolverParams::default())
        .solve(&corners, &board, &k)
        .expect("pose");
    let rms = reprojection_rms(&est, &corners, &board, &k).expect("rms");
    assert!(rms < 0.05, "rms {rms}");

    let mut stabilizer = PoseStabilizer::new(0.0).expect("alpha");
    let world = stabilizer.stabilize(&est, &Isometry3::identity());
    let back = PoseEstimate::from_isometry(&from_target_convention(&world), 0.0);
    let rms = reprojection_rms(&back, &corners, &board, &k).expect("rms");
    assert!(rms < 0.05, "rms after stabilize {rms}");
}

#[test]
fn zero_alpha_never_blends() {
    let mut s = PoseStabilizer::new(0.0).expect("alpha");
    let world = Isometry3::identity();
    for z in [0.4, 0.9, 0.3, 1.2] {
        let out = s.stabilize(&estimate_at(z), &world);
        let raw = to_target_convention(&estimate_at(z));
        assert_relative_eq!(out.position, raw.position, epsilon = 1e-12);
        assert!(out.rotation.angle_to(&raw.rotation) < 1e-9);
    }
}

#[test]
fn unit_alpha_freezes_after_the_first_pose() {
    let mut s = PoseStabilizer::new(1.0).expect("alpha");
    let world = Isometry3::from_parts(
        Translation3::new(0.5, 1.6, -0.2),
        UnitQuaternion::from_euler_angles(0.0, 0.7, 0.0),
    );
    let first = s.stabilize(&estimate_at(0.5), &world);
    for z in [0.8, 0.2, 1.5] {
        let mut moved = estimate_at(z);
        moved.rvec = Vector3::new(0.6, 0.1, -0.3);
        let out = s.stabilize(&moved, &world);
        assert_relative_eq!(out.position, first.position, epsilon = 1e-9);
        assert!(out.rotation.angle_to(&first.rotation) < 1e-9);
    }
}

#[test]
fn step_response_moves_monotonically_without_overshoot() {
    let mut s = PoseStabilizer::new(0.6).expect("alpha");
    let world = Isometry3::identity();
    s.stabilize(&estimate_at(0.5), &world);

    let target = to_target_convention(&estimate_at(1.5));
    let mut last_gap = f64::INFINITY;
    for _ in 0..20 {
        let out = s.stabilize(&estimate_at(1.5), &world);
        let gap = (target.position - out.position).norm();
        assert!(gap < last_gap);
        assert!(out.position.z <= target.position.z + 1e-12);
        last_gap = gap;
    }
    assert!(last_gap < 1e-3);
}

#[test]
fn camera_world_transform_is_applied_last() {
    let mut s = PoseStabilizer::new(0.5).expect("alpha");
    let camera = Isometry3::translation(0.0, 1.7, 0.0);
    let out = s.stabilize(&estimate_at(1.0), &camera);
    let local = to_target_convention(&estimate_at(1.0));
    assert_relative_eq!(out.position, local.position + Vector3::new(0.0, 1.7, 0.0), epsilon = 1e-12);
    // The filter keeps the local pose, not the world one.
    let prev = s.previous().expect("previous");
    assert_relative_eq!(prev.position, local.position, epsilon = 1e-12);
}
