//! Debug annotations drawn onto the camera frame.

use board_tracker_aruco::MarkerDetectionSet;
use board_tracker_charuco::BoardCornerSet;
use board_tracker_core::ColorImageMut;
use nalgebra::Point2;

pub const MARKER_COLOR: [u8; 3] = [0, 255, 0];
pub const CORNER_COLOR: [u8; 3] = [255, 0, 0];

/// Map a downsampled pixel centre back onto the full-resolution frame.
#[inline]
fn upscale(p: Point2<f32>, scale: f32) -> Point2<f32> {
    Point2::new((p.x + 0.5) * scale - 0.5, (p.y + 0.5) * scale - 0.5)
}

/// Outline every marker; `scale` maps detection pixels to overlay pixels.
pub fn draw_markers(overlay: &mut ColorImageMut<'_>, markers: &MarkerDetectionSet, scale: f32) {
    for quad in markers.corners() {
        for i in 0..4 {
            let a = upscale(quad[i], scale);
            let b = upscale(quad[(i + 1) % 4], scale);
            draw_line(overlay, a, b, MARKER_COLOR);
        }
    }
}

/// Mark every resolved board corner with a small filled dot.
pub fn draw_corners(overlay: &mut ColorImageMut<'_>, corners: &BoardCornerSet, scale: f32) {
    let radius = (1.5 * scale).max(2.0);
    for &p in &corners.points {
        draw_dot(overlay, upscale(p, scale), radius, CORNER_COLOR);
    }
}

pub fn draw_line(overlay: &mut ColorImageMut<'_>, a: Point2<f32>, b: Point2<f32>, rgb: [u8; 3]) {
    let steps = (b - a).abs().max().ceil().max(1.0) as usize;
    for s in 0..=steps {
        let p = a + (b - a) * (s as f32 / steps as f32);
        overlay.put_pixel(p.x.round() as i32, p.y.round() as i32, rgb);
    }
}

pub fn draw_dot(overlay: &mut ColorImageMut<'_>, c: Point2<f32>, radius: f32, rgb: [u8; 3]) {
    let r = radius.ceil() as i32;
    let (cx, cy) = (c.x.round() as i32, c.y.round() as i32);
    for dy in -r..=r {
        for dx in -r..=r {
            if ((dx * dx + dy * dy) as f32) <= radius * radius {
                overlay.put_pixel(cx + dx, cy + dy, rgb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_tracker_aruco::MarkerDetection;
    use board_tracker_core::PixelFormat;

    #[test]
    fn markers_are_outlined_in_green() {
        let mut data = vec![0u8; 20 * 20 * 3];
        let mut img = ColorImageMut::new(20, 20, PixelFormat::Rgb8, &mut data).expect("image");
        let mut markers = MarkerDetectionSet::new();
        markers.push(MarkerDetection {
            id: 1,
            corners: [
                Point2::new(2.0, 2.0),
                Point2::new(12.0, 2.0),
                Point2::new(12.0, 12.0),
                Point2::new(2.0, 12.0),
            ],
            hamming: 0,
        });
        draw_markers(&mut img, &markers, 1.0);
        let px = |x: usize, y: usize| &data[(y * 20 + x) * 3..(y * 20 + x) * 3 + 3];
        assert_eq!(px(7, 2), &MARKER_COLOR);
        assert_eq!(px(12, 9), &MARKER_COLOR);
        assert_eq!(px(7, 7), &[0, 0, 0]);
    }

    #[test]
    fn corners_scale_to_full_resolution() {
        let mut data = vec![0u8; 40 * 40 * 3];
        let mut img = ColorImageMut::new(40, 40, PixelFormat::Rgb8, &mut data).expect("image");
        let mut corners = BoardCornerSet::new();
        corners.push(0, Point2::new(9.5, 9.5));
        draw_corners(&mut img, &corners, 2.0);
        let idx = (20 * 40 + 20) * 3;
        assert_eq!(&data[idx..idx + 3], &CORNER_COLOR);
    }

    #[test]
    fn drawing_off_image_is_clipped() {
        let mut data = vec![0u8; 4 * 4];
        let mut img = ColorImageMut::new(4, 4, PixelFormat::Gray8, &mut data).expect("image");
        draw_line(&mut img, Point2::new(-10.0, 1.0), Point2::new(10.0, 1.0), [255, 255, 255]);
        assert_eq!(&data[4..8], &[255, 255, 255, 255]);
        assert_eq!(&data[..4], &[0, 0, 0, 0]);
    }
}
