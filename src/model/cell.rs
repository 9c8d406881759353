//! Cell model: an outer region plus optional cytoplasm and up to two nuclei.

use nalgebra::Point2;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::model::bbox::BoundingBox;
use crate::model::compartment::{Compartment, FeatureValue};
use crate::segmentation::morphology::fill_holes;
use crate::{Result, TrackingError};

/// Biological state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    #[default]
    Unknown,
    Living,
    Dividing,
    Dead,
}

/// Region that defines a cell's geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Body {
    /// Only a whole-cell mask is known.
    Whole(Compartment),
    /// The cytoplasm defines the geometry; the whole-cell mask is an overlay.
    Cytoplasm {
        cytoplasm: Compartment,
        whole: Option<Compartment>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Connected-component label, unique within its frame, starting at 1
    pub label: u32,
    body: Body,
    nuclei: Vec<Compartment>,
    state: CellState,
}

impl Cell {
    /// Build a cell from full-frame masks.
    ///
    /// Geometry comes from `cytoplasm_mask` when given, otherwise from
    /// `cell_mask`. One of the two must be present and non-empty.
    pub fn from_masks(
        label: u32,
        cell_mask: Option<ArrayView2<'_, bool>>,
        cytoplasm_mask: Option<ArrayView2<'_, bool>>,
        nucleus_mask: Option<ArrayView2<'_, bool>>,
    ) -> Result<Self> {
        Self::from_compartments(
            label,
            cell_mask.map(Compartment::from_mask).transpose()?,
            cytoplasm_mask.map(Compartment::from_mask).transpose()?,
            nucleus_mask.map(Compartment::from_mask).transpose()?,
        )
    }

    /// Build a cell from already extracted compartments, with the same
    /// precedence as [`from_masks`](Self::from_masks).
    pub fn from_compartments(
        label: u32,
        whole: Option<Compartment>,
        cytoplasm: Option<Compartment>,
        nucleus: Option<Compartment>,
    ) -> Result<Self> {
        let body = match (cytoplasm, whole) {
            (Some(cytoplasm), whole) => Body::Cytoplasm { cytoplasm, whole },
            (None, Some(whole)) => Body::Whole(whole),
            (None, None) => {
                return Err(TrackingError::Shape(format!(
                    "cell {label} needs a cell or cytoplasm mask"
                )));
            }
        };

        Ok(Self {
            label,
            body,
            nuclei: nucleus.into_iter().collect(),
            state: CellState::Unknown,
        })
    }

    /// Record a second nucleus, turning the cell into a dividing one.
    pub fn add_nucleus(&mut self, nucleus_mask: ArrayView2<'_, bool>) -> Result<()> {
        self.push_nucleus(Compartment::from_mask(nucleus_mask)?)
    }

    /// Like [`add_nucleus`](Self::add_nucleus), for an extracted compartment.
    pub fn push_nucleus(&mut self, nucleus: Compartment) -> Result<()> {
        match self.nuclei.len() {
            0 => Err(TrackingError::State(format!(
                "cell {}: cannot add a second nucleus before a first exists",
                self.label
            ))),
            1 => {
                self.nuclei.push(nucleus);
                self.state = CellState::Dividing;
                Ok(())
            }
            _ => Err(TrackingError::State(format!(
                "cell {} already owns two nuclei",
                self.label
            ))),
        }
    }

    /// The compartment that carries the cell's geometry and features.
    pub fn outline(&self) -> &Compartment {
        match &self.body {
            Body::Whole(c) | Body::Cytoplasm { cytoplasm: c, .. } => c,
        }
    }

    fn outline_mut(&mut self) -> &mut Compartment {
        match &mut self.body {
            Body::Whole(c) | Body::Cytoplasm { cytoplasm: c, .. } => c,
        }
    }

    /// Whole-cell compartment, if a cell mask was supplied.
    pub fn whole(&self) -> Option<&Compartment> {
        match &self.body {
            Body::Whole(c) => Some(c),
            Body::Cytoplasm { whole, .. } => whole.as_ref(),
        }
    }

    /// Cytoplasm compartment, if the cell was built from a cytoplasm mask.
    pub fn cytoplasm(&self) -> Option<&Compartment> {
        match &self.body {
            Body::Whole(_) => None,
            Body::Cytoplasm { cytoplasm, .. } => Some(cytoplasm),
        }
    }

    /// Zero, one or (while dividing) two nuclei.
    pub fn nuclei(&self) -> &[Compartment] {
        &self.nuclei
    }

    #[inline]
    pub fn centroid(&self) -> Point2<f64> {
        self.outline().centroid
    }

    #[inline]
    pub fn bbox(&self) -> BoundingBox {
        self.outline().bbox
    }

    #[inline]
    pub fn state(&self) -> CellState {
        self.state
    }

    /// Overwrite the state, e.g. to mark a cell `Dead`.
    pub fn set_state(&mut self, state: CellState) {
        self.state = state;
    }

    /// Insert or overwrite a feature on the outer compartment.
    pub fn add_feature(&mut self, name: &str, value: impl Into<FeatureValue>) -> Result<()> {
        self.outline_mut().add_feature(name, value)
    }

    /// Feature of the outer compartment.
    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.outline().feature(name)
    }

    /// Rasterize the cell.
    ///
    /// The outer region is drawn as 1. With `with_labels`, nuclei are drawn
    /// as 2 and 3; otherwise every cell pixel is 1. A cell without nuclei
    /// has the holes of its outer region filled.
    pub fn to_map(&self, frame_shape: (usize, usize), with_labels: bool) -> Result<Array2<u32>> {
        let mut map = Array2::zeros(frame_shape);
        self.draw(&mut map, |part| if with_labels { part } else { 1 })?;
        Ok(map)
    }

    /// Write `value` into every pixel covered by the cell.
    pub fn paint_footprint(&self, raster: &mut Array2<u32>, value: u32) -> Result<()> {
        self.draw(raster, |_| value)
    }

    fn draw(&self, raster: &mut Array2<u32>, value_of: impl Fn(u32) -> u32) -> Result<()> {
        let outline = self.outline();
        if self.nuclei.is_empty() {
            outline.check_fits(raster.dim())?;
            let filled = fill_holes(outline.cropped_mask().view());
            let (r0, c0) = (outline.bbox.row_start, outline.bbox.col_start);
            for ((r, c), &set) in filled.indexed_iter() {
                if set {
                    raster[[r0 + r, c0 + c]] = value_of(1);
                }
            }
        } else {
            outline.paint(raster, value_of(1))?;
        }
        for (part, nucleus) in (2..).zip(&self.nuclei) {
            nucleus.paint(raster, value_of(part))?;
        }
        Ok(())
    }
}
