//! Dictionary metadata, packed marker codes and the closed set of named dictionaries.

use crate::builtins;
use serde::{Deserialize, Serialize};

/// A fixed ArUco-style dictionary.
#[derive(Clone, Copy, Debug)]
pub struct Dictionary {
    /// Human-readable name (for debugging/logging).
    pub name: &'static str,
    /// Marker side length (number of inner bits per side).
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the dictionary.
    pub max_correction_bits: u8,
    /// One `u64` per marker id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order with **black = 1**.
    pub codes: &'static [u64],
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    /// Number of marker ids.
    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// True if inner bit `(x, y)` of marker `id` is black.
    ///
    /// Returns `None` for unknown ids or out-of-range bit coordinates.
    pub fn is_black(&self, id: u32, x: usize, y: usize) -> Option<bool> {
        if x >= self.marker_size || y >= self.marker_size {
            return None;
        }
        let code = *self.codes.get(id as usize)?;
        Some((code >> (y * self.marker_size + x)) & 1 == 1)
    }
}

/// Named dictionaries this workspace can decode.
///
/// This is the only place where a configuration value turns into marker codes.
///
/// Only [`DictionaryId::ArucoOriginal`] is bit-compatible with an OpenCV
/// dictionary (`DICT_ARUCO_ORIGINAL`). The `Generated*` variants share the
/// marker size and id count of OpenCV's `DICT_4X4_50`, `DICT_5X5_100` and
/// `DICT_6X6_250` but their codes come from a seeded generator, so boards
/// printed by OpenCV with those tables do not decode. Print them with this
/// crate's renderer instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryId {
    /// The original 5x5 ArUco code (1024 ids, no error correction).
    #[default]
    ArucoOriginal,
    /// Seeded 4x4 dictionary with 50 ids. Not OpenCV's `DICT_4X4_50` codes.
    #[serde(rename = "generated_4x4_50")]
    Generated4x4_50,
    /// Seeded 5x5 dictionary with 100 ids. Not OpenCV's `DICT_5X5_100` codes.
    #[serde(rename = "generated_5x5_100")]
    Generated5x5_100,
    /// Seeded 6x6 dictionary with 250 ids. Not OpenCV's `DICT_6X6_250` codes.
    #[serde(rename = "generated_6x6_250")]
    Generated6x6_250,
}

impl DictionaryId {
    pub const ALL: [DictionaryId; 4] = [
        DictionaryId::ArucoOriginal,
        DictionaryId::Generated4x4_50,
        DictionaryId::Generated5x5_100,
        DictionaryId::Generated6x6_250,
    ];

    /// Resolve the id into dictionary codes (built once, then cached).
    pub fn dictionary(self) -> Dictionary {
        match self {
            DictionaryId::ArucoOriginal => builtins::aruco_original(),
            DictionaryId::Generated4x4_50 => builtins::generated_4x4_50(),
            DictionaryId::Generated5x5_100 => builtins::generated_5x5_100(),
            DictionaryId::Generated6x6_250 => builtins::generated_6x6_250(),
        }
    }

    /// Stable snake-case name, matching the serde representation.
    pub fn name(self) -> &'static str {
        match self {
            DictionaryId::ArucoOriginal => "aruco_original",
            DictionaryId::Generated4x4_50 => "generated_4x4_50",
            DictionaryId::Generated5x5_100 => "generated_5x5_100",
            DictionaryId::Generated6x6_250 => "generated_6x6_250",
        }
    }

    /// Name of the OpenCV dictionary with identical codes, if there is one.
    pub fn opencv_name(self) -> Option<&'static str> {
        match self {
            DictionaryId::ArucoOriginal => Some("DICT_ARUCO_ORIGINAL"),
            DictionaryId::Generated4x4_50
            | DictionaryId::Generated5x5_100
            | DictionaryId::Generated6x6_250 => None,
        }
    }

    /// Parse a snake-case dictionary name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_serde() {
        for id in DictionaryId::ALL {
            let json = serde_json::to_string(&id).expect("serialize");
            assert_eq!(json, format!("\"{}\"", id.name()));
            let back: DictionaryId = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, id);
            assert_eq!(DictionaryId::from_name(id.name()), Some(id));
        }
        assert_eq!(DictionaryId::from_name("DICT_7X7_1000"), None);
    }

    #[test]
    fn only_the_original_code_matches_opencv() {
        assert_eq!(
            DictionaryId::ArucoOriginal.opencv_name(),
            Some("DICT_ARUCO_ORIGINAL")
        );
        for id in &DictionaryId::ALL[1..] {
            assert_eq!(id.opencv_name(), None, "{id:?}");
        }
    }

    #[test]
    fn resolved_dictionaries_have_expected_shape() {
        let cases = [
            (DictionaryId::ArucoOriginal, 5, 1024),
            (DictionaryId::Generated4x4_50, 4, 50),
            (DictionaryId::Generated5x5_100, 5, 100),
            (DictionaryId::Generated6x6_250, 6, 250),
        ];
        for (id, size, count) in cases {
            let dict = id.dictionary();
            assert_eq!(dict.marker_size, size, "{}", dict.name);
            assert_eq!(dict.len(), count, "{}", dict.name);
        }
    }
}
