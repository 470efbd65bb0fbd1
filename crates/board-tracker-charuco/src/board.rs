//! Board specification and layout helpers for ChArUco.

use board_tracker_aruco::{Dictionary, DictionaryId};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Static ChArUco board specification.
///
/// `squares_x`/`squares_y` are **square counts** (not inner corner counts).
/// Lengths share one arbitrary unit (usually metres); poses come out in it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharucoBoardSpec {
    pub squares_x: u32,
    pub squares_y: u32,
    pub square_length: f64,
    pub marker_length: f64,
    #[serde(default)]
    pub dictionary: DictionaryId,
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("squares_x and squares_y must be >= 2 (got {squares_x}x{squares_y})")]
    InvalidSize { squares_x: u32, squares_y: u32 },
    #[error("square_length must be finite and > 0")]
    InvalidSquareLength,
    #[error("marker_length must be finite, > 0 and smaller than square_length")]
    InvalidMarkerLength,
    #[error("board needs {needed} markers, dictionary has {available}")]
    NotEnoughDictionaryCodes { needed: usize, available: usize },
}

/// Validated board with precomputed marker placement.
///
/// Board frame: origin at the top-left board corner, +X along `squares_x`,
/// +Y along `squares_y` (down on the printed board), Z = 0 on the board.
/// The top-left square is black; markers sit centred in white squares and
/// are numbered row-major. Inner corners are numbered row-major too.
#[derive(Clone, Debug)]
pub struct CharucoBoard {
    spec: CharucoBoardSpec,
    dictionary: Dictionary,
    marker_cells: Vec<[u32; 2]>,
    /// Row-major square grid -> marker id (black squares hold `None`).
    square_markers: Vec<Option<u32>>,
}

impl CharucoBoard {
    /// Validate and create a board from a spec.
    pub fn new(spec: CharucoBoardSpec) -> Result<Self, BoardError> {
        if spec.squares_x < 2 || spec.squares_y < 2 {
            return Err(BoardError::InvalidSize {
                squares_x: spec.squares_x,
                squares_y: spec.squares_y,
            });
        }
        if !spec.square_length.is_finite() || spec.square_length <= 0.0 {
            return Err(BoardError::InvalidSquareLength);
        }
        if !spec.marker_length.is_finite()
            || spec.marker_length <= 0.0
            || spec.marker_length >= spec.square_length
        {
            return Err(BoardError::InvalidMarkerLength);
        }

        let squares = spec
            .squares_x
            .checked_mul(spec.squares_y)
            .ok_or(BoardError::InvalidSize {
                squares_x: spec.squares_x,
                squares_y: spec.squares_y,
            })? as usize;
        // The top-left square is black, so half the squares (rounded down) are white.
        let dictionary = spec.dictionary.dictionary();
        let needed = squares / 2;
        let available = dictionary.len();
        if available < needed {
            return Err(BoardError::NotEnoughDictionaryCodes { needed, available });
        }

        let mut marker_cells = Vec::with_capacity(needed);
        let mut square_markers = Vec::with_capacity(squares);
        for sy in 0..spec.squares_y {
            for sx in 0..spec.squares_x {
                // Top-left square is black, so white squares have (sx + sy) odd.
                if (sx + sy) % 2 == 1 {
                    square_markers.push(Some(marker_cells.len() as u32));
                    marker_cells.push([sx, sy]);
                } else {
                    square_markers.push(None);
                }
            }
        }

        Ok(Self {
            spec,
            dictionary,
            marker_cells,
            square_markers,
        })
    }

    #[inline]
    pub fn spec(&self) -> CharucoBoardSpec {
        self.spec
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dictionary
    }

    /// Number of markers on the board.
    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_cells.len()
    }

    /// Number of inner chessboard corners.
    #[inline]
    pub fn corner_count(&self) -> usize {
        ((self.spec.squares_x - 1) * (self.spec.squares_y - 1)) as usize
    }

    /// Physical board width and height.
    pub fn size(&self) -> (f64, f64) {
        (
            self.spec.squares_x as f64 * self.spec.square_length,
            self.spec.squares_y as f64 * self.spec.square_length,
        )
    }

    /// Square-cell coordinates `(sx, sy)` for the given marker id.
    #[inline]
    pub fn marker_cell(&self, id: u32) -> Option<[u32; 2]> {
        self.marker_cells.get(id as usize).copied()
    }

    /// Marker id placed in square `(sx, sy)`, `None` for black or out-of-board squares.
    pub fn marker_at(&self, sx: u32, sy: u32) -> Option<u32> {
        if sx >= self.spec.squares_x || sy >= self.spec.squares_y {
            return None;
        }
        self.square_markers[(sy * self.spec.squares_x + sx) as usize]
    }

    /// Board-plane corners of marker `id` in marker order TL, TR, BR, BL.
    pub fn marker_corners_xy(&self, id: u32) -> Option<[Point2<f64>; 4]> {
        let [sx, sy] = self.marker_cell(id)?;
        let s = self.spec.square_length;
        let m = self.spec.marker_length;
        let x0 = sx as f64 * s + 0.5 * (s - m);
        let y0 = sy as f64 * s + 0.5 * (s - m);
        Some([
            Point2::new(x0, y0),
            Point2::new(x0 + m, y0),
            Point2::new(x0 + m, y0 + m),
            Point2::new(x0, y0 + m),
        ])
    }

    /// Row-major corner id of the inner intersection `(ix, iy)`, `1 <= ix < squares_x`.
    pub fn corner_id(&self, ix: u32, iy: u32) -> Option<u32> {
        if ix == 0 || iy == 0 || ix >= self.spec.squares_x || iy >= self.spec.squares_y {
            return None;
        }
        Some((iy - 1) * (self.spec.squares_x - 1) + (ix - 1))
    }

    /// Intersection coordinates `(ix, iy)` of a corner id.
    pub fn corner_grid(&self, id: u32) -> Option<[u32; 2]> {
        if id as usize >= self.corner_count() {
            return None;
        }
        let stride = self.spec.squares_x - 1;
        Some([id % stride + 1, id / stride + 1])
    }

    /// Board-plane position of a corner id.
    pub fn corner_xy(&self, id: u32) -> Option<Point2<f64>> {
        let [ix, iy] = self.corner_grid(id)?;
        let s = self.spec.square_length;
        Some(Point2::new(ix as f64 * s, iy as f64 * s))
    }

    /// 3D board-frame position of a corner id (`z = 0`).
    pub fn corner_object_point(&self, id: u32) -> Option<Point3<f64>> {
        self.corner_xy(id).map(|p| Point3::new(p.x, p.y, 0.0))
    }

    /// The two markers in the white squares touching inner corner `id`.
    pub fn corner_adjacent_markers(&self, id: u32) -> Option<[u32; 2]> {
        let [ix, iy] = self.corner_grid(id)?;
        let mut out = [0u32; 2];
        let mut n = 0;
        for (sx, sy) in [(ix - 1, iy - 1), (ix, iy - 1), (ix - 1, iy), (ix, iy)] {
            if let Some(m) = self.marker_at(sx, sy) {
                out[n] = m;
                n += 1;
            }
        }
        (n == 2).then_some(out)
    }

    /// True if the board point `(x, y)` is printed black.
    ///
    /// Points outside the board are white.
    pub fn is_black_at(&self, x: f64, y: f64) -> bool {
        let s = self.spec.square_length;
        let (w, h) = self.size();
        if x < 0.0 || y < 0.0 || x >= w || y >= h {
            return false;
        }
        let sx = (x / s).floor() as u32;
        let sy = (y / s).floor() as u32;
        let Some(id) = self.marker_at(sx, sy) else {
            return true;
        };

        let m = self.spec.marker_length;
        let off = 0.5 * (s - m);
        let u = x - sx as f64 * s - off;
        let v = y - sy as f64 * s - off;
        if u < 0.0 || v < 0.0 || u >= m || v >= m {
            return false;
        }
        let n = self.dictionary.marker_size;
        let cells = n + 2;
        let cell = m / cells as f64;
        let cx = ((u / cell).floor() as usize).min(cells - 1);
        let cy = ((v / cell).floor() as usize).min(cells - 1);
        if cx == 0 || cy == 0 || cx == cells - 1 || cy == cells - 1 {
            return true;
        }
        self.dictionary
            .is_black(id, cx - 1, cy - 1)
            .unwrap_or(false)
    }
}
