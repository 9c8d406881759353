use serde::{Deserialize, Serialize};

use crate::TrackingError;

/// Axis-aligned rectangle in frame (row, column) coordinates.
///
/// Bounds are half-open: a box covering the single pixel at (1, 1) is
/// `rows[1:2], cols[1:2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    /// First row inside the box
    pub row_start: usize,
    /// One past the last row inside the box
    pub row_end: usize,
    /// First column inside the box
    pub col_start: usize,
    /// One past the last column inside the box
    pub col_end: usize,
}

/// Unchecked serialized form of a [`BoundingBox`].
#[derive(Deserialize)]
struct RawBoundingBox {
    row_start: usize,
    row_end: usize,
    col_start: usize,
    col_end: usize,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = TrackingError;

    fn try_from(raw: RawBoundingBox) -> Result<Self, Self::Error> {
        if raw.row_end < raw.row_start || raw.col_end < raw.col_start {
            return Err(TrackingError::Shape(format!(
                "bounding box rows {}..{} cols {}..{} is reversed",
                raw.row_start, raw.row_end, raw.col_start, raw.col_end
            )));
        }
        Ok(Self::new(raw.row_start, raw.row_end, raw.col_start, raw.col_end))
    }
}

impl BoundingBox {
    /// Create a box from half-open row and column ranges.
    #[inline]
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    /// Tightest box around every `true` pixel of `mask`, or `None` if it has none.
    pub fn enclosing<'a, I>(pixels: I) -> Option<Self>
    where
        I: IntoIterator<Item = ((usize, usize), &'a bool)>,
    {
        let mut bbox: Option<Self> = None;
        for ((r, c), &set) in pixels {
            if !set {
                continue;
            }
            bbox = Some(match bbox {
                None => Self::new(r, r + 1, c, c + 1),
                Some(b) => Self::new(
                    b.row_start.min(r),
                    b.row_end.max(r + 1),
                    b.col_start.min(c),
                    b.col_end.max(c + 1),
                ),
            });
        }
        bbox
    }

    /// Number of rows covered.
    #[inline]
    pub fn height(&self) -> usize {
        self.row_end - self.row_start
    }

    /// Number of columns covered.
    #[inline]
    pub fn width(&self) -> usize {
        self.col_end - self.col_start
    }

    /// (height, width) of the box.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Number of pixels covered.
    #[inline]
    pub fn area(&self) -> usize {
        self.height() * self.width()
    }

    /// Whether the box fits inside a raster of the given shape.
    #[inline]
    pub fn fits_in(&self, (rows, cols): (usize, usize)) -> bool {
        self.row_end <= rows && self.col_end <= cols
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        Self::new(
            self.row_start.min(other.row_start),
            self.row_end.max(other.row_end),
            self.col_start.min(other.col_start),
            self.col_end.max(other.col_end),
        )
    }

    /// Box grown by `margin` pixels on every side, clamped to `shape`.
    pub fn expanded(&self, margin: usize, (rows, cols): (usize, usize)) -> BoundingBox {
        Self::new(
            self.row_start.saturating_sub(margin),
            (self.row_end + margin).min(rows),
            self.col_start.saturating_sub(margin),
            (self.col_end + margin).min(cols),
        )
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_enclosing_single_pixel() {
        let mut mask = Array2::from_elem((3, 3), false);
        mask[[1, 1]] = true;
        let bbox = BoundingBox::enclosing(mask.indexed_iter()).unwrap();
        assert_eq!(bbox, BoundingBox::new(1, 2, 1, 2));
        assert_eq!(bbox.shape(), (1, 1));
    }

    #[test]
    fn test_enclosing_empty() {
        let mask = Array2::from_elem((4, 4), false);
        assert!(BoundingBox::enclosing(mask.indexed_iter()).is_none());
    }

    #[test]
    fn test_union() {
        let a = BoundingBox::new(0, 4, 0, 4);
        let b = BoundingBox::new(2, 6, 3, 5);
        assert_eq!(a.union(&b), BoundingBox::new(0, 6, 0, 5));
        assert_eq!(a.union(&b).area(), 30);
    }

    #[test]
    fn test_expanded_clamps() {
        let b = BoundingBox::new(0, 2, 3, 5);
        assert_eq!(b.expanded(1, (4, 5)), BoundingBox::new(0, 3, 2, 5));
    }

    #[test]
    fn test_deserialize_rejects_reversed_box() {
        let ok: BoundingBox =
            serde_json::from_str(r#"{"row_start":1,"row_end":3,"col_start":0,"col_end":2}"#)
                .unwrap();
        assert_eq!(ok, BoundingBox::new(1, 3, 0, 2));

        let reversed = r#"{"row_start":5,"row_end":2,"col_start":0,"col_end":2}"#;
        assert!(serde_json::from_str::<BoundingBox>(reversed).is_err());
    }
}
