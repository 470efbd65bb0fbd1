//! Core types and utilities for fiducial board tracking.
//!
//! This crate is intentionally small and purely geometric: image views and
//! owned buffers, bilinear sampling, homographies, sub-pixel corner
//! refinement and pinhole intrinsics. It does *not* know about markers,
//! boards or poses.

mod homography;
mod image;
mod intrinsics;
mod logger;
mod subpix;

pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{
    sample_bilinear, sample_bilinear_u8, ColorImageMut, ColorImageView, GrayImage, GrayImageView,
    ImageError, PixelFormat,
};
pub use intrinsics::{CameraIntrinsics, IntrinsicsError};
pub use subpix::{refine_corner_subpix, SubpixParams};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
