//! `image` crate interop: PNG frames in, annotated PNGs and renders out.

use crate::coordinator::FrameSource;
use board_tracker_core::{ColorImageMut, ColorImageView, GrayImage, PixelFormat};
use log::warn;
use std::path::{Path, PathBuf};

/// Borrow an `image::RgbImage` as a frame.
pub fn rgb_view(img: &::image::RgbImage) -> ColorImageView<'_> {
    ColorImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        format: PixelFormat::Rgb8,
        data: img.as_raw(),
    }
}

/// Borrow an `image::RgbImage` as an overlay target.
pub fn rgb_view_mut(img: &mut ::image::RgbImage) -> ColorImageMut<'_> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    ColorImageMut {
        width,
        height,
        format: PixelFormat::Rgb8,
        data: img,
    }
}

/// Copy a gray buffer into an `image::GrayImage`.
pub fn to_luma_image(gray: &GrayImage) -> ::image::GrayImage {
    ::image::GrayImage::from_fn(gray.width as u32, gray.height as u32, |x, y| {
        ::image::Luma([gray.get(x as usize, y as usize)])
    })
}

/// Load any supported image file as RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> Result<::image::RgbImage, ::image::ImageError> {
    Ok(::image::open(path)?.to_rgb8())
}

/// Frames read one by one from image files.
///
/// A file that fails to load yields no frame for that tick.
#[derive(Debug)]
pub struct ImageFileSource {
    paths: Vec<PathBuf>,
    next: usize,
    current: Option<::image::RgbImage>,
}

impl ImageFileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            next: 0,
            current: None,
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.paths.len().saturating_sub(self.next)
    }

    /// The frame returned by the last call to [`FrameSource::frame`].
    pub fn current(&self) -> Option<&::image::RgbImage> {
        self.current.as_ref()
    }
}

impl FrameSource for ImageFileSource {
    fn frame(&mut self) -> Option<ColorImageView<'_>> {
        let path = self.paths.get(self.next)?;
        self.next += 1;
        self.current = match load_rgb(path) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("failed to load {}: {e}", path.display());
                None
            }
        };
        self.current.as_ref().map(rgb_view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_share_layout_with_the_image() {
        let mut img = ::image::RgbImage::from_pixel(3, 2, ::image::Rgb([10, 20, 30]));
        let view = rgb_view(&img);
        assert_eq!((view.width, view.height), (3, 2));
        assert_eq!(view.luma_at(2, 1), PixelFormat::Rgb8.luma(&[10, 20, 30]));

        rgb_view_mut(&mut img).put_pixel(0, 0, [1, 2, 3]);
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn missing_files_yield_no_frame() {
        let mut src = ImageFileSource::new(vec![PathBuf::from("/definitely/not/here.png")]);
        assert_eq!(src.remaining(), 1);
        assert!(src.frame().is_none());
        assert_eq!(src.remaining(), 0);
        assert!(src.frame().is_none());
    }

    #[test]
    fn gray_buffers_convert() {
        let mut gray = GrayImage::new(2, 2);
        gray.set(1, 0, 200);
        let img = to_luma_image(&gray);
        assert_eq!(img.get_pixel(1, 0).0, [200]);
    }
}
