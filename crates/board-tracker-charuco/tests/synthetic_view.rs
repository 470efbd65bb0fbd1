use board_tracker_aruco::{ArucoDetector, ArucoDetectorParams, DictionaryId, MarkerDetectionSet};
use board_tracker_charuco::{
    refine_detected_markers, render_camera_view, CharucoBoard, CharucoBoardSpec, CharucoResolver,
    RefineParams, RefineScratch, RenderParams, ResolverParams,
};
use board_tracker_core::{CameraIntrinsics, GrayImage};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};

fn board() -> CharucoBoard {
    CharucoBoard::new(CharucoBoardSpec {
        squares_x: 5,
        squares_y: 4,
        square_length: 0.04,
        marker_length: 0.03,
        dictionary: DictionaryId::Generated4x4_50,
    })
    .expect("board")
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(640, 480, 320.0, 240.0, 600.0, 600.0).expect("intrinsics")
}

/// Board centred on the optical axis, tilted about its X axis.
fn pose(board: &CharucoBoard, tilt: f64) -> Isometry3<f64> {
    let (w, h) = board.size();
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), tilt);
    let centre = rotation * Vector3::new(w / 2.0, h / 2.0, 0.0);
    Isometry3::from_parts(
        Translation3::new(-centre.x, -centre.y, 0.45 - centre.z),
        rotation,
    )
}

fn project(k: &CameraIntrinsics, pose: &Isometry3<f64>, p: Point3<f64>) -> Point2<f64> {
    k.project(&pose.transform_point(&p)).expect("in front of camera")
}

fn render(board: &CharucoBoard, pose: &Isometry3<f64>) -> GrayImage {
    render_camera_view(board, &intrinsics(), pose, &RenderParams::default())
}

#[test]
fn resolves_every_corner_of_a_tilted_board() {
    let board = board();
    let pose = pose(&board, 0.25);
    let img = render(&board, &pose);
    let view = img.view();

    let mut detector = ArucoDetector::new(board.dictionary(), ArucoDetectorParams::default());
    let mut markers = MarkerDetectionSet::new();
    let mut rejected = Vec::new();
    detector.detect_into(&view, &mut markers, &mut rejected);
    refine_detected_markers(
        &view,
        &board,
        &mut detector,
        &mut markers,
        &mut rejected,
        &RefineParams::default(),
        &mut RefineScratch::default(),
    );
    assert_eq!(markers.len(), board.marker_count());

    let k = intrinsics();
    for det in markers.iter() {
        let xy = board.marker_corners_xy(det.id).expect("marker");
        for (c, p) in det.corners.iter().zip(xy.iter()) {
            let expected = project(&k, &pose, Point3::new(p.x, p.y, 0.0));
            let err = ((c.x as f64 - expected.x).powi(2) + (c.y as f64 - expected.y).powi(2)).sqrt();
            assert!(err < 1.5, "marker {} corner off by {err:.2}px", det.id);
        }
    }

    let mut resolver = CharucoResolver::new(board.clone(), ResolverParams::default());
    let corners = resolver.resolve(&view, &markers);
    assert_eq!(corners.len(), board.corner_count());
    for (&id, p) in corners.ids.iter().zip(corners.points.iter()) {
        let expected = project(&k, &pose, board.corner_object_point(id).expect("corner"));
        let err = ((p.x as f64 - expected.x).powi(2) + (p.y as f64 - expected.y).powi(2)).sqrt();
        assert!(err < 0.75, "corner {id} off by {err:.2}px");
    }
}

#[test]
fn refinement_recovers_a_marker_handed_back_as_rejected() {
    let board = board();
    let pose = pose(&board, -0.15);
    let img = render(&board, &pose);
    let view = img.view();

    let mut detector = ArucoDetector::new(board.dictionary(), ArucoDetectorParams::default());
    let mut markers = MarkerDetectionSet::new();
    let mut rejected = Vec::new();
    detector.detect_into(&view, &mut markers, &mut rejected);
    let outline = *markers.corners_of(4).expect("marker 4 visible");

    markers.retain(|d| d.id != 4);
    // Hand the outline back starting from a different corner.
    rejected.push([outline[2], outline[3], outline[0], outline[1]]);

    let recovered = refine_detected_markers(
        &view,
        &board,
        &mut detector,
        &mut markers,
        &mut rejected,
        &RefineParams::default(),
        &mut RefineScratch::default(),
    );
    assert_eq!(recovered, 1);
    assert!(markers.contains_id(4));
    let idx = markers.ids().iter().position(|&id| id == 4).expect("id");
    assert_eq!(markers.hamming()[idx], 0);
}

#[test]
fn half_hidden_board_yields_only_corners_between_visible_markers() {
    let board = board();
    let pose = pose(&board, 0.0);
    let mut img = render(&board, &pose);
    // Paint over the right half of the frame.
    for y in 0..img.height {
        for x in img.width / 2..img.width {
            img.set(x, y, 110);
        }
    }
    let view = img.view();

    let mut detector = ArucoDetector::new(board.dictionary(), ArucoDetectorParams::default());
    let markers = detector.detect(&view);
    assert!(!markers.is_empty());
    assert!(markers.len() < board.marker_count());

    let mut resolver = CharucoResolver::new(board.clone(), ResolverParams::default());
    let corners = resolver.resolve(&view, &markers);
    for &id in &corners.ids {
        let pair = board.corner_adjacent_markers(id).expect("inner corner");
        assert!(pair.iter().all(|&m| markers.contains_id(m)));
    }
    assert!(corners.len() < board.corner_count());
}
