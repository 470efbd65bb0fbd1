//! Dictionary matching and rotation helpers.

use crate::Dictionary;

/// A dictionary match for an observed marker code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Marker id in the dictionary.
    pub id: u32,
    /// Clockwise quarter turns `0..=3` such that `observed_code == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance between observed and dictionary code (after rotation).
    pub hamming: u8,
}

/// Brute-force matcher over every id and rotation of one dictionary.
///
/// The four rotations of each code are computed up front.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Build a matcher for the given dictionary and Hamming threshold.
    pub fn new(dict: Dictionary, max_hamming: u8) -> Self {
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&base| {
                [
                    base,
                    rotate_code_u64(base, n, 1),
                    rotate_code_u64(base, n, 2),
                    rotate_code_u64(base, n, 3),
                ]
            })
            .collect();

        Self {
            dict,
            max_hamming,
            rotated,
        }
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Lowest-Hamming id and rotation within `max_hamming`; ties keep the
    /// first id found.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;
        for (id, rots) in self.rotated.iter().enumerate() {
            for (rotation, &code) in rots.iter().enumerate() {
                let hamming = (observed ^ code).count_ones() as u8;
                if hamming > self.max_hamming || best.is_some_and(|b| b.hamming <= hamming) {
                    continue;
                }
                best = Some(Match {
                    id: id as u32,
                    rotation: rotation as u8,
                    hamming,
                });
                if hamming == 0 {
                    return best;
                }
            }
        }
        best
    }

    /// Hamming distance between `observed` and marker `id` seen at `rotation`.
    ///
    /// Used when the expected id and orientation are already known, e.g.
    /// from a board layout. Returns `None` for unknown ids.
    pub fn distance_to(&self, observed: u64, id: u32, rotation: u8) -> Option<u8> {
        let rots = self.rotated.get(id as usize)?;
        Some((observed ^ rots[(rotation & 3) as usize]).count_ones() as u8)
    }
}

/// Rotate a code stored in row-major bits (`idx = y * N + x`) by `rot`
/// clockwise quarter turns.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    (0..rot & 3).fold(code, |c, _| quarter_turn(c, n))
}

fn quarter_turn(code: u64, n: usize) -> u64 {
    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            // Cell (x, y) receives the cell at (y, n - 1 - x).
            let bit = (code >> ((n - 1 - x) * n + y)) & 1;
            out |= bit << (y * n + x);
        }
    }
    out
}
