//! Compact storage for bounding-box-relative boolean masks.
//!
//! # Format
//!
//! A `PackedMask` is `rows`, `cols` and a byte vector of
//! `ceil(rows * cols / 8)` bytes. Pixels are laid out row-major; pixel
//! `(r, c)` has flat index `i = r * cols + c` and lives in bit `i % 8`
//! (least significant bit first) of byte `i / 8`. Trailing bits of the last
//! byte are zero. Coordinates are relative to the owning compartment's
//! bounding box.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{Result, TrackingError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPackedMask")]
pub struct PackedMask {
    rows: usize,
    cols: usize,
    bits: Vec<u8>,
}

/// Unchecked serialized form of a [`PackedMask`].
#[derive(Deserialize)]
struct RawPackedMask {
    rows: usize,
    cols: usize,
    bits: Vec<u8>,
}

impl TryFrom<RawPackedMask> for PackedMask {
    type Error = TrackingError;

    fn try_from(RawPackedMask { rows, cols, bits }: RawPackedMask) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| TrackingError::Shape(format!("mask of {rows}x{cols} overflows")))?;
        if bits.len() != len.div_ceil(8) {
            return Err(TrackingError::Shape(format!(
                "{rows}x{cols} mask needs {} bytes, got {}",
                len.div_ceil(8),
                bits.len()
            )));
        }
        let trailing = len % 8;
        if trailing != 0 && bits.last().is_some_and(|&b| b >> trailing != 0) {
            return Err(TrackingError::Shape("mask has set bits past its last pixel".into()));
        }
        Ok(Self { rows, cols, bits })
    }
}

impl PackedMask {
    /// Pack a boolean raster.
    pub fn pack(mask: ArrayView2<'_, bool>) -> Self {
        let (rows, cols) = mask.dim();
        let mut bits = vec![0u8; (rows * cols).div_ceil(8)];
        for ((r, c), &set) in mask.indexed_iter() {
            if set {
                let i = r * cols + c;
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        Self { rows, cols, bits }
    }

    /// (rows, cols) of the packed raster.
    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Pixel value at `(r, c)`; out-of-range pixels read as `false`.
    #[inline]
    pub fn get(&self, r: usize, c: usize) -> bool {
        if r >= self.rows || c >= self.cols {
            return false;
        }
        let i = r * self.cols + c;
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }

    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Iterate over the coordinates of set pixels in row-major order.
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.cols;
        (0..self.rows * self.cols)
            .filter(move |&i| self.bits[i / 8] & (1 << (i % 8)) != 0)
            .map(move |i| (i / cols, i % cols))
    }

    /// Raw packed bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Expand back to a boolean raster of shape [`dim`](Self::dim).
    pub fn unpack(&self) -> Array2<bool> {
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| self.get(r, c))
    }
}
