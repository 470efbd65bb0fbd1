//! Built-in dictionaries.
//!
//! Codes are constructed on first use and cached for the lifetime of the
//! process, so a `Dictionary` can hand out `&'static` code tables.

use crate::matcher::rotate_code_u64;
use crate::Dictionary;
use std::sync::OnceLock;

/// Row words of the original ArUco code, white = 1, MSB = leftmost column.
const ARUCO_ORIGINAL_WORDS: [u8; 4] = [0x10, 0x17, 0x09, 0x0e];

/// Candidate budget per minimum-distance level before the target is relaxed.
const MAX_GENERATION_ATTEMPTS: usize = 2_000_000;

struct Generated {
    codes: Vec<u64>,
    min_distance: u32,
}

pub(crate) fn aruco_original() -> Dictionary {
    static CODES: OnceLock<Vec<u64>> = OnceLock::new();
    let codes = CODES.get_or_init(|| (0..1024u32).map(aruco_original_code).collect());
    Dictionary {
        name: "aruco_original",
        marker_size: 5,
        max_correction_bits: 0,
        codes,
    }
}

pub(crate) fn generated_4x4_50() -> Dictionary {
    static GEN: OnceLock<Generated> = OnceLock::new();
    let gen = GEN.get_or_init(|| generate(4, 50, 4, 0x4a4b_0050));
    generated_dictionary("generated_4x4_50", 4, gen)
}

pub(crate) fn generated_5x5_100() -> Dictionary {
    static GEN: OnceLock<Generated> = OnceLock::new();
    let gen = GEN.get_or_init(|| generate(5, 100, 6, 0x5a5b_0100));
    generated_dictionary("generated_5x5_100", 5, gen)
}

pub(crate) fn generated_6x6_250() -> Dictionary {
    static GEN: OnceLock<Generated> = OnceLock::new();
    let gen = GEN.get_or_init(|| generate(6, 250, 8, 0x6a6b_0250));
    generated_dictionary("generated_6x6_250", 6, gen)
}

fn generated_dictionary(name: &'static str, marker_size: usize, gen: &'static Generated) -> Dictionary {
    Dictionary {
        name,
        marker_size,
        max_correction_bits: (gen.min_distance.saturating_sub(1) / 2) as u8,
        codes: &gen.codes,
    }
}

/// Original ArUco encoding: each of the 5 rows carries 2 id bits (row 0 most
/// significant) selecting one of four 5-bit words.
fn aruco_original_code(id: u32) -> u64 {
    let mut code = 0u64;
    for y in 0..5 {
        let word = ARUCO_ORIGINAL_WORDS[((id >> (2 * (4 - y))) & 3) as usize];
        for x in 0..5 {
            let white = (word >> (4 - x)) & 1 == 1;
            if !white {
                code |= 1u64 << (y * 5 + x);
            }
        }
    }
    code
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Smallest Hamming distance between `code` and its own 90/180/270 degree rotations.
pub(crate) fn self_rotation_distance(code: u64, n: usize) -> u32 {
    (1..4)
        .map(|r| (code ^ rotate_code_u64(code, n, r)).count_ones())
        .min()
        .unwrap_or(0)
}

/// Smallest Hamming distance between `a` and any rotation of `b`.
pub(crate) fn rotation_distance(a: u64, b: u64, n: usize) -> u32 {
    (0..4)
        .map(|r| (a ^ rotate_code_u64(b, n, r)).count_ones())
        .min()
        .unwrap_or(0)
}

/// Greedy dictionary generation with a fixed seed.
///
/// Accepts random codes whose distance to every accepted code (under all
/// rotations) and to their own rotations is at least the current target.
/// If the candidate budget runs out the target is lowered by one and the
/// generation restarts from the same seed.
fn generate(n: usize, count: usize, min_distance: u32, seed: u64) -> Generated {
    let bits = n * n;
    let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let mut target = min_distance;

    loop {
        let mut state = seed;
        let mut codes: Vec<u64> = Vec::with_capacity(count);
        let mut attempts = 0usize;

        while codes.len() < count && attempts < MAX_GENERATION_ATTEMPTS {
            attempts += 1;
            let code = (splitmix64(&mut state) >> 7) & mask;
            if self_rotation_distance(code, n) < target {
                continue;
            }
            if codes.iter().any(|&c| rotation_distance(code, c, n) < target) {
                continue;
            }
            codes.push(code);
        }

        if codes.len() == count || target <= 1 {
            log::debug!(
                "generated {}x{} dictionary: {} codes, min distance {}",
                n,
                n,
                codes.len(),
                target
            );
            return Generated {
                codes,
                min_distance: target,
            };
        }
        log::warn!(
            "{}x{} dictionary: only {} of {} codes at distance {}, relaxing",
            n,
            n,
            codes.len(),
            count,
            target
        );
        target -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DictionaryId;

    #[test]
    fn aruco_original_id0_has_white_first_column() {
        let dict = aruco_original();
        for y in 0..5 {
            assert_eq!(dict.is_black(0, 0, y), Some(false));
            for x in 1..5 {
                assert_eq!(dict.is_black(0, x, y), Some(true));
            }
        }
    }

    #[test]
    fn aruco_original_rows_encode_id_bits() {
        let dict = aruco_original();
        // id 1023 selects word 0x0e (01110) in every row.
        for y in 0..5 {
            let row: Vec<bool> = (0..5)
                .map(|x| dict.is_black(1023, x, y).expect("bit"))
                .collect();
            assert_eq!(row, vec![true, false, false, false, true]);
        }
    }

    #[test]
    fn generated_dictionaries_respect_their_correction_capacity() {
        for id in [
            DictionaryId::Generated4x4_50,
            DictionaryId::Generated5x5_100,
            DictionaryId::Generated6x6_250,
        ] {
            let dict = id.dictionary();
            let min_d = 2 * dict.max_correction_bits as u32 + 1;
            assert!(dict.max_correction_bits >= 1, "{}", dict.name);
            for (i, &a) in dict.codes.iter().enumerate() {
                assert!(self_rotation_distance(a, dict.marker_size) >= min_d);
                for &b in &dict.codes[i + 1..] {
                    assert!(rotation_distance(a, b, dict.marker_size) >= min_d);
                }
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate(4, 20, 3, 7);
        let b = generate(4, 20, 3, 7);
        assert_eq!(a.codes, b.codes);
    }
}
