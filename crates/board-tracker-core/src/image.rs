//! Image views, owned gray buffers and pixel sampling.

/// Errors raised when wrapping raw pixel buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
    #[error("image buffer too short (expected {expected} bytes, got {got})")]
    BufferLength { expected: usize, got: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Allocate a black image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height],
        }
    }

    /// Allocate an image filled with `value`.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }
}

impl<'a> GrayImageView<'a> {
    /// Wrap a row-major buffer, checking its length.
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions { width, height });
        }
        let expected = width * height;
        if data.len() < expected {
            return Err(ImageError::BufferLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Interleaved 8-bit pixel layouts accepted as camera frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
    Bgr8,
    Bgra8,
}

impl PixelFormat {
    /// Bytes per pixel.
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    /// `(r, g, b)` channel offsets inside one pixel.
    #[inline]
    fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Gray8 => (0, 0, 0),
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => (0, 1, 2),
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => (2, 1, 0),
        }
    }

    /// BT.601 luma with integer weights (77, 150, 29) / 256.
    #[inline]
    pub fn luma(self, px: &[u8]) -> u8 {
        if self == PixelFormat::Gray8 {
            return px[0];
        }
        let (r, g, b) = self.rgb_offsets();
        ((77 * px[r] as u32 + 150 * px[g] as u32 + 29 * px[b] as u32) >> 8) as u8
    }
}

/// Borrowed interleaved color frame.
#[derive(Clone, Copy, Debug)]
pub struct ColorImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl<'a> ColorImageView<'a> {
    pub fn new(
        width: usize,
        height: usize,
        format: PixelFormat,
        data: &'a [u8],
    ) -> Result<Self, ImageError> {
        check_color_buffer(width, height, format, data.len())?;
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Luma of pixel `(x, y)`. Caller guarantees bounds.
    #[inline]
    pub fn luma_at(&self, x: usize, y: usize) -> u8 {
        let c = self.format.channels();
        let idx = (y * self.width + x) * c;
        self.format.luma(&self.data[idx..idx + c])
    }
}

/// Mutable interleaved color image, used as an annotation target.
#[derive(Debug)]
pub struct ColorImageMut<'a> {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: &'a mut [u8],
}

impl<'a> ColorImageMut<'a> {
    pub fn new(
        width: usize,
        height: usize,
        format: PixelFormat,
        data: &'a mut [u8],
    ) -> Result<Self, ImageError> {
        check_color_buffer(width, height, format, data.len())?;
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Write an RGB color at `(x, y)`; out-of-bounds writes are ignored.
    ///
    /// Gray images receive the luma of the color, alpha is left untouched.
    pub fn put_pixel(&mut self, x: i32, y: i32, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let c = self.format.channels();
        let idx = (y as usize * self.width + x as usize) * c;
        let px = &mut self.data[idx..idx + c];
        match self.format {
            PixelFormat::Gray8 => px[0] = PixelFormat::Rgb8.luma(&rgb),
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => px[..3].copy_from_slice(&rgb),
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => {
                px[0] = rgb[2];
                px[1] = rgb[1];
                px[2] = rgb[0];
            }
        }
    }
}

fn check_color_buffer(
    width: usize,
    height: usize,
    format: PixelFormat,
    len: usize,
) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    let expected = width * height * format.channels();
    if len < expected {
        return Err(ImageError::BufferLength { expected, got: len });
    }
    Ok(())
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}
