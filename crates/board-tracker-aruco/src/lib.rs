//! ArUco dictionaries, quad candidate extraction and marker decoding.
//!
//! This crate focuses on:
//! - a closed set of named dictionaries, built once and cached,
//! - matching observed marker codes against those dictionaries,
//! - full-frame detection: adaptive threshold, dark-component quads,
//!   bit sampling and corner refinement.
//!
//! It knows nothing about boards; board-aware filtering lives in
//! `board-tracker-charuco`.

mod builtins;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quad;
mod threshold;

pub use detector::{
    ArucoDetector, ArucoDetectorParams, CornerRefinement, MarkerDetection, MarkerDetectionSet,
};
pub use dictionary::{Dictionary, DictionaryId};
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use quad::Quad;
