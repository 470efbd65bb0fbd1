//! Frame downsampling and luma conversion.

use board_tracker_core::{ColorImageView, GrayImage, GrayImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("no frame available")]
    MissingFrame,
    #[error("frame is {got_width}x{got_height}, expected {width}x{height}")]
    FrameSizeMismatch {
        width: usize,
        height: usize,
        got_width: usize,
        got_height: usize,
    },
    #[error("frame buffer too short (expected {expected} bytes, got {got})")]
    BufferLength { expected: usize, got: usize },
    #[error("downsample factor {factor} is zero or larger than the frame")]
    InvalidFactor { factor: u32 },
}

/// Box-averages `D x D` blocks of a color frame into a gray buffer.
///
/// The output buffer is sized once; trailing rows and columns that do not
/// fill a whole block are dropped, matching
/// [`CameraIntrinsics::downsampled`](board_tracker_core::CameraIntrinsics::downsampled).
#[derive(Debug)]
pub struct FramePreprocessor {
    width: usize,
    height: usize,
    factor: usize,
    out: GrayImage,
}

impl FramePreprocessor {
    pub fn new(width: usize, height: usize, factor: u32) -> Result<Self, PreprocessError> {
        let d = factor as usize;
        if d == 0 || width / d.max(1) == 0 || height / d.max(1) == 0 {
            return Err(PreprocessError::InvalidFactor { factor });
        }
        Ok(Self {
            width,
            height,
            factor: d,
            out: GrayImage::new(width / d, height / d),
        })
    }

    #[inline]
    pub fn factor(&self) -> u32 {
        self.factor as u32
    }

    /// Size of the downsampled output.
    #[inline]
    pub fn output_size(&self) -> (usize, usize) {
        (self.out.width, self.out.height)
    }

    /// Convert `frame` into the internal gray buffer and return a view of it.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(factor = self.factor))
    )]
    pub fn process(
        &mut self,
        frame: Option<&ColorImageView<'_>>,
    ) -> Result<GrayImageView<'_>, PreprocessError> {
        let frame = frame.ok_or(PreprocessError::MissingFrame)?;
        if frame.width != self.width || frame.height != self.height {
            return Err(PreprocessError::FrameSizeMismatch {
                width: self.width,
                height: self.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }
        let expected = frame.width * frame.height * frame.format.channels();
        if frame.data.len() < expected {
            return Err(PreprocessError::BufferLength {
                expected,
                got: frame.data.len(),
            });
        }

        let d = self.factor;
        let area = (d * d) as u32;
        let (ow, oh) = (self.out.width, self.out.height);
        for oy in 0..oh {
            for ox in 0..ow {
                let mut sum = 0u32;
                for y in oy * d..(oy + 1) * d {
                    for x in ox * d..(ox + 1) * d {
                        sum += frame.luma_at(x, y) as u32;
                    }
                }
                self.out.data[oy * ow + ox] = ((sum + area / 2) / area) as u8;
            }
        }
        Ok(self.out.view())
    }
}
