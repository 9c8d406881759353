//! A 2D raster together with the cells discovered on it.

use std::any::Any;
use std::collections::HashMap;

use ndarray::{Array2, ArrayD, Ix2};

use crate::model::cell::Cell;
use crate::{Result, TrackingError};

/// Free-form per-frame runtime cache (e.g. memoized registration offsets).
#[derive(Default)]
pub struct FrameCache {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl FrameCache {
    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Typed lookup; `None` when the key is missing or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Drop the entry under `key`; returns whether one was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Whether an entry exists under `key`, whatever its type.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("FrameCache").field("keys", &keys).finish()
    }
}

#[derive(Debug)]
pub struct Frame {
    raster: Array2<f32>,
    cells: Vec<Cell>,
    cache: FrameCache,
}

impl Frame {
    /// Frame over `raster` with no cells yet.
    pub fn new(raster: Array2<f32>) -> Self {
        Self {
            raster,
            cells: Vec::new(),
            cache: FrameCache::default(),
        }
    }

    /// Build a frame from a raster of unknown dimensionality; fails unless it is 2-D.
    pub fn from_dyn(raster: ArrayD<f32>) -> Result<Self> {
        let ndim = raster.ndim();
        let raster = raster.into_dimensionality::<Ix2>().map_err(|_| {
            TrackingError::Shape(format!("frame raster must be 2-D, got {ndim} dimensions"))
        })?;
        Ok(Self::new(raster))
    }

    /// A blank raster of the given (rows, cols) shape.
    pub fn blank(shape: (usize, usize)) -> Self {
        Self::new(Array2::zeros(shape))
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.raster.dim()
    }

    /// Intensity raster the cells were segmented from.
    pub fn raster(&self) -> &Array2<f32> {
        &self.raster
    }

    /// Cells in insertion order; index `i` is the cell labelled `i + 1`.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Mutable access to the cells, used by feature extraction and assembly.
    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    /// Append a cell; its bounding box must lie inside the raster.
    pub fn push_cell(&mut self, cell: Cell) -> Result<()> {
        cell.outline().check_fits(self.shape())?;
        self.cells.push(cell);
        Ok(())
    }

    /// Per-frame scratch storage shared by trackers and extractors.
    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FrameCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_from_dyn_requires_two_dimensions() {
        let ok = Frame::from_dyn(ArrayD::zeros(IxDyn(&[4, 5]))).unwrap();
        assert_eq!(ok.shape(), (4, 5));

        let err = Frame::from_dyn(ArrayD::zeros(IxDyn(&[2, 4, 5]))).unwrap_err();
        assert!(matches!(err, TrackingError::Shape(_)));
    }

    #[test]
    fn test_push_cell_checks_bounds() {
        let mut mask = Array2::from_elem((6, 6), false);
        mask[[5, 5]] = true;
        let cell = Cell::from_masks(1, Some(mask.view()), None, None).unwrap();

        let mut small = Frame::blank((4, 4));
        assert!(small.push_cell(cell.clone()).is_err());

        let mut frame = Frame::blank((6, 6));
        frame.push_cell(cell).unwrap();
        assert_eq!(frame.cells().len(), 1);
    }

    #[test]
    fn test_cache_is_typed() {
        let mut frame = Frame::blank((2, 2));
        frame.cache_mut().insert("registration_offset", (3i64, -1i64));
        assert_eq!(frame.cache().get::<(i64, i64)>("registration_offset"), Some(&(3, -1)));
        assert!(frame.cache().get::<f64>("registration_offset").is_none());
        assert!(frame.cache_mut().remove("registration_offset"));
        assert!(!frame.cache().contains("registration_offset"));
    }
}
