//! Turning segmentation channels into cells on a frame.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array2, ArrayView2, s};
use tracing::{debug, warn};

use crate::model::{BoundingBox, Cell, Compartment, Frame};
use crate::segmentation::morphology::{dilate_cross, label_boxes, label_components};
use crate::{Result, TrackingError};

/// Named boolean channel of a segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Cell,
    Cytoplasm,
    Nucleus,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Cell, Channel::Cytoplasm, Channel::Nucleus];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Cell => "cell",
            Channel::Cytoplasm => "cytoplasm",
            Channel::Nucleus => "nucleus",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame set of optional boolean channels produced by a segmentation model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub cell: Option<Array2<bool>>,
    pub cytoplasm: Option<Array2<bool>>,
    pub nucleus: Option<Array2<bool>>,
}

impl Segmentation {
    /// Mask of `channel`, if the model produced it.
    pub fn channel(&self, channel: Channel) -> Option<&Array2<bool>> {
        match channel {
            Channel::Cell => self.cell.as_ref(),
            Channel::Cytoplasm => self.cytoplasm.as_ref(),
            Channel::Nucleus => self.nucleus.as_ref(),
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> Option<&mut Array2<bool>> {
        match channel {
            Channel::Cell => self.cell.as_mut(),
            Channel::Cytoplasm => self.cytoplasm.as_mut(),
            Channel::Nucleus => self.nucleus.as_mut(),
        }
    }

    /// Set or replace the mask of `channel`.
    pub fn set_channel(&mut self, channel: Channel, mask: Array2<bool>) {
        match channel {
            Channel::Cell => self.cell = Some(mask),
            Channel::Cytoplasm => self.cytoplasm = Some(mask),
            Channel::Nucleus => self.nucleus = Some(mask),
        }
    }

    /// Present channels in `Channel::ALL` order.
    pub fn channels(&self) -> impl Iterator<Item = (Channel, &Array2<bool>)> {
        Channel::ALL
            .into_iter()
            .filter_map(|ch| self.channel(ch).map(|m| (ch, m)))
    }

    pub fn is_empty(&self) -> bool {
        self.channels().next().is_none()
    }

    /// Check every present channel against `expected`.
    pub fn check_shape(&self, expected: (usize, usize)) -> Result<()> {
        for (channel, mask) in self.channels() {
            if mask.dim() != expected {
                return Err(TrackingError::ChannelShape {
                    channel: channel.name(),
                    expected,
                    found: mask.dim(),
                });
            }
        }
        Ok(())
    }
}

/// Non-fatal inconsistency found while extracting cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyWarning {
    /// Inner and outer channels have different component counts,
    /// usually a division in progress.
    ComponentCountMismatch {
        inner: Channel,
        outer: Channel,
        inner_count: u32,
        outer_count: u32,
    },
    /// A component overlaps no component of the outer channel.
    Unassociated { channel: Channel, label: u32 },
    /// An outer region received no component of an inner channel.
    Unoccupied {
        outer: Channel,
        inner: Channel,
        label: u32,
    },
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComponentCountMismatch {
                inner,
                outer,
                inner_count,
                outer_count,
            } => write!(
                f,
                "{inner_count} {inner} components for {outer_count} {outer} components"
            ),
            Self::Unassociated { channel, label } => {
                write!(f, "{channel} component {label} has no enclosing region")
            }
            Self::Unoccupied {
                outer,
                inner,
                label,
            } => write!(f, "{outer} region {label} contains no {inner} component"),
        }
    }
}

/// Associate each inner component with the outer label it overlaps most
/// after a one-pixel dilation. Ties go to the lowest outer label.
///
/// Entry `i` of the result belongs to inner label `i + 1`.
pub fn associate_components(
    inner: ArrayView2<'_, u32>,
    inner_count: u32,
    outer: ArrayView2<'_, u32>,
) -> Vec<Option<u32>> {
    let shape = inner.dim();
    label_boxes(inner, inner_count)
        .iter()
        .zip(1..)
        .map(|(bbox, label)| {
            let window = bbox.as_ref()?.expanded(1, shape);
            let rows = window.row_start..window.row_end;
            let cols = window.col_start..window.col_end;
            let own = inner.slice(s![rows.clone(), cols.clone()]).mapv(|l| l == label);
            let grown = dilate_cross(own.view());

            let mut votes: BTreeMap<u32, usize> = BTreeMap::new();
            for (&g, &o) in grown.iter().zip(outer.slice(s![rows, cols]).iter()) {
                if g && o != 0 {
                    *votes.entry(o).or_default() += 1;
                }
            }
            let mut best: Option<(u32, usize)> = None;
            for (o, n) in votes {
                if best.is_none_or(|(_, m)| n > m) {
                    best = Some((o, n));
                }
            }
            best.map(|(o, _)| o)
        })
        .collect()
}

/// A labelled channel together with the label boxes used for cropping.
struct Labelled {
    labels: Array2<u32>,
    count: u32,
    boxes: Vec<Option<BoundingBox>>,
}

impl Labelled {
    fn new(mask: ArrayView2<'_, bool>) -> Self {
        let (labels, count) = label_components(mask);
        let boxes = label_boxes(labels.view(), count);
        Self {
            labels,
            count,
            boxes,
        }
    }

    /// Compartment covering the union of `members`, cropped to their joint box.
    fn compartment(&self, members: &[u32]) -> Result<Option<Compartment>> {
        let Some(bbox) = members
            .iter()
            .filter_map(|&m| self.boxes.get((m as usize).checked_sub(1)?).copied().flatten())
            .reduce(|a, b| a.union(&b))
        else {
            return Ok(None);
        };
        let window = self
            .labels
            .slice(s![bbox.row_start..bbox.row_end, bbox.col_start..bbox.col_end])
            .mapv(|l| l != 0 && members.contains(&l));
        Compartment::from_cropped(window.view(), (bbox.row_start, bbox.col_start)).map(Some)
    }
}

/// An inner channel with its components grouped by outer label.
struct Inner {
    channel: Labelled,
    groups: BTreeMap<u32, Vec<u32>>,
}

impl Inner {
    /// Label `mask` and attach its components to the labels of `outer`.
    ///
    /// Inner components touching no outer region and outer regions left
    /// without any inner component are both reported.
    fn associate(
        mask: ArrayView2<'_, bool>,
        channel: Channel,
        outer: &Labelled,
        outer_channel: Channel,
        warnings: &mut Vec<ConsistencyWarning>,
    ) -> Self {
        let labelled = Labelled::new(mask);
        let assoc =
            associate_components(labelled.labels.view(), labelled.count, outer.labels.view());
        let mut groups: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (target, label) in assoc.iter().zip(1..) {
            match target {
                Some(o) => groups.entry(*o).or_default().push(label),
                None => warnings.push(ConsistencyWarning::Unassociated { channel, label }),
            }
        }
        for label in (1..=outer.count).filter(|l| !groups.contains_key(l)) {
            warnings.push(ConsistencyWarning::Unoccupied {
                outer: outer_channel,
                inner: channel,
                label,
            });
        }
        Self {
            channel: labelled,
            groups,
        }
    }

    fn members_of(&self, outer_label: u32) -> &[u32] {
        self.groups
            .get(&outer_label)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Segmentation extraction implementation block
impl Frame {
    /// Label the segmentation channels and add one cell per outer component.
    ///
    /// The outer channel is `cytoplasm` when present, otherwise `cell`, and
    /// `nucleus` only when it is the sole channel. Nuclei are attached to
    /// the outer region they overlap most; a second nucleus is recorded as a
    /// division and a third is a fatal [`TrackingError::TooManyNuclei`].
    /// Returns the non-fatal inconsistencies found on the way.
    pub fn add_cells_from_segmentation(
        &mut self,
        segmentation: &Segmentation,
    ) -> Result<Vec<ConsistencyWarning>> {
        segmentation.check_shape(self.shape())?;
        let mut warnings = Vec::new();

        let Some((outer_channel, outer_mask)) =
            [Channel::Cytoplasm, Channel::Cell, Channel::Nucleus]
                .into_iter()
                .find_map(|ch| segmentation.channel(ch).map(|m| (ch, m)))
        else {
            return Ok(warnings);
        };
        let outer = Labelled::new(outer_mask.view());

        let nuclei = match (&segmentation.nucleus, outer_channel) {
            (Some(mask), Channel::Cytoplasm | Channel::Cell) => {
                let inner = Inner::associate(
                    mask.view(),
                    Channel::Nucleus,
                    &outer,
                    outer_channel,
                    &mut warnings,
                );
                if inner.channel.count != outer.count {
                    warnings.push(ConsistencyWarning::ComponentCountMismatch {
                        inner: Channel::Nucleus,
                        outer: outer_channel,
                        inner_count: inner.channel.count,
                        outer_count: outer.count,
                    });
                }
                if let Some((&label, members)) = inner.groups.iter().find(|(_, m)| m.len() > 2) {
                    return Err(TrackingError::TooManyNuclei {
                        label,
                        count: members.len(),
                    });
                }
                Some(inner)
            }
            _ => None,
        };

        let wholes = match (&segmentation.cell, outer_channel) {
            (Some(mask), Channel::Cytoplasm) => Some(Inner::associate(
                mask.view(),
                Channel::Cell,
                &outer,
                outer_channel,
                &mut warnings,
            )),
            _ => None,
        };

        for label in 1..=outer.count {
            let Some(region) = outer.compartment(&[label])? else {
                continue;
            };
            let whole = match &wholes {
                Some(inner) => inner.channel.compartment(inner.members_of(label))?,
                None => None,
            };
            let (whole, cytoplasm) = match outer_channel {
                Channel::Cytoplasm => (whole, Some(region)),
                _ => (Some(region), None),
            };

            let mut parts = Vec::with_capacity(2);
            if let Some(inner) = &nuclei {
                for &n in inner.members_of(label) {
                    parts.extend(inner.channel.compartment(&[n])?);
                }
            }
            let mut parts = parts.into_iter();

            let mut cell = Cell::from_compartments(label, whole, cytoplasm, parts.next())?;
            if let Some(second) = parts.next() {
                debug!(label, "outer region holds two nuclei, recording division");
                cell.push_nucleus(second)?;
            }
            self.push_cell(cell)?;
        }

        for w in &warnings {
            warn!(warning = %w, "segmentation inconsistency");
        }
        debug!(
            cells = outer.count,
            outer = %outer_channel,
            warnings = warnings.len(),
            "extracted cells from segmentation"
        );
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CellState;
    use std::ops::Range;

    fn rect(shape: (usize, usize), r: Range<usize>, c: Range<usize>) -> Array2<bool> {
        Array2::from_shape_fn(shape, |(i, j)| r.contains(&i) && c.contains(&j))
    }

    fn or(a: &Array2<bool>, b: &Array2<bool>) -> Array2<bool> {
        ndarray::Zip::from(a).and(b).map_collect(|&x, &y| x || y)
    }

    #[test]
    fn test_cells_from_single_channel() {
        let mask = or(&rect((10, 10), 0..3, 0..3), &rect((10, 10), 6..9, 6..9));
        let seg = Segmentation {
            cell: Some(mask),
            ..Default::default()
        };
        let mut frame = Frame::blank((10, 10));
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(frame.cells().len(), 2);
        assert_eq!(frame.cells()[0].label, 1);
        assert_eq!(frame.cells()[1].label, 2);
        assert!(frame.cells()[1].nuclei().is_empty());
    }

    #[test]
    fn test_nucleus_association() {
        let cells = or(&rect((10, 10), 0..4, 0..4), &rect((10, 10), 5..10, 5..10));
        let nuclei = or(&rect((10, 10), 1..3, 1..3), &rect((10, 10), 7..8, 7..8));
        let seg = Segmentation {
            cell: Some(cells),
            nucleus: Some(nuclei),
            ..Default::default()
        };
        let mut frame = Frame::blank((10, 10));
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(frame.cells()[0].nuclei().len(), 1);
        assert_eq!(frame.cells()[1].nuclei().len(), 1);
        assert_eq!(frame.cells()[1].nuclei()[0].bbox, BoundingBox::new(7, 8, 7, 8));
    }

    #[test]
    fn test_two_nuclei_is_division_with_warning() {
        let cells = rect((8, 8), 0..8, 0..8);
        let nuclei = or(&rect((8, 8), 1..3, 1..3), &rect((8, 8), 5..7, 5..7));
        let seg = Segmentation {
            cell: Some(cells),
            nucleus: Some(nuclei),
            ..Default::default()
        };
        let mut frame = Frame::blank((8, 8));
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();
        assert_eq!(
            warnings,
            vec![ConsistencyWarning::ComponentCountMismatch {
                inner: Channel::Nucleus,
                outer: Channel::Cell,
                inner_count: 2,
                outer_count: 1,
            }]
        );
        let cell = &frame.cells()[0];
        assert_eq!(cell.nuclei().len(), 2);
        assert_eq!(cell.state(), CellState::Dividing);
    }

    #[test]
    fn test_three_nuclei_is_fatal() {
        let cells = rect((9, 9), 0..9, 0..9);
        let nuclei = or(
            &or(&rect((9, 9), 1..2, 1..2), &rect((9, 9), 4..5, 4..5)),
            &rect((9, 9), 7..8, 7..8),
        );
        let seg = Segmentation {
            cell: Some(cells),
            nucleus: Some(nuclei),
            ..Default::default()
        };
        let mut frame = Frame::blank((9, 9));
        let err = frame.add_cells_from_segmentation(&seg).unwrap_err();
        assert!(matches!(err, TrackingError::TooManyNuclei { label: 1, count: 3 }));
        assert!(err.is_data_error());
    }

    #[test]
    fn test_unassociated_nucleus_warns() {
        let cells = rect((10, 10), 0..3, 0..3);
        let nuclei = or(&rect((10, 10), 1..2, 1..2), &rect((10, 10), 8..9, 8..9));
        let seg = Segmentation {
            cell: Some(cells),
            nucleus: Some(nuclei),
            ..Default::default()
        };
        let mut frame = Frame::blank((10, 10));
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();
        assert!(warnings.contains(&ConsistencyWarning::Unassociated {
            channel: Channel::Nucleus,
            label: 2
        }));
        assert_eq!(frame.cells().len(), 1);
    }

    #[test]
    fn test_nucleus_adjacent_to_ring_cytoplasm() {
        // cytoplasm ring around a nucleus it does not overlap: dilation bridges the gap
        let mut cyto = rect((7, 7), 1..6, 1..6);
        for r in 2..5 {
            for c in 2..5 {
                cyto[[r, c]] = false;
            }
        }
        let nucleus = rect((7, 7), 2..5, 2..5);
        let whole = rect((7, 7), 1..6, 1..6);
        let seg = Segmentation {
            cell: Some(whole),
            cytoplasm: Some(cyto),
            nucleus: Some(nucleus),
        };
        let mut frame = Frame::blank((7, 7));
        frame.add_cells_from_segmentation(&seg).unwrap();
        let cell = &frame.cells()[0];
        assert_eq!(cell.nuclei().len(), 1);
        assert!(cell.cytoplasm().is_some());
        assert_eq!(cell.whole().map(|w| w.area()), Some(25));
    }

    #[test]
    fn test_channel_shape_mismatch() {
        let seg = Segmentation {
            cell: Some(rect((4, 5), 0..1, 0..1)),
            ..Default::default()
        };
        let mut frame = Frame::blank((4, 4));
        let err = frame.add_cells_from_segmentation(&seg).unwrap_err();
        assert!(matches!(
            err,
            TrackingError::ChannelShape {
                channel: "cell",
                ..
            }
        ));
    }

    #[test]
    fn test_association_tie_goes_to_lowest_label() {
        let inner = ndarray::array![[0, 0, 0], [0, 1, 0], [0, 0, 0]];
        let outer = ndarray::array![[0, 2, 0], [0, 0, 0], [0, 1, 0]];
        let assoc = associate_components(inner.view(), 1, outer.view());
        assert_eq!(assoc, vec![Some(1)]);
    }

    #[test]
    fn test_region_without_nucleus_warns() {
        let cells = or(&rect((10, 10), 0..4, 0..10), &rect((10, 10), 6..10, 0..10));
        let nuclei = or(&rect((10, 10), 1..3, 1..3), &rect((10, 10), 1..3, 6..8));
        let seg = Segmentation {
            cell: Some(cells),
            nucleus: Some(nuclei),
            ..Default::default()
        };
        let mut frame = Frame::blank((10, 10));
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();

        assert_eq!(frame.cells()[0].nuclei().len(), 2);
        assert!(frame.cells()[1].nuclei().is_empty());
        assert_eq!(
            warnings,
            vec![ConsistencyWarning::Unoccupied {
                outer: Channel::Cell,
                inner: Channel::Nucleus,
                label: 2,
            }]
        );
    }

    #[test]
    fn test_cytoplasm_without_cell_overlay_warns() {
        let cyto = or(&rect((8, 8), 0..3, 0..3), &rect((8, 8), 5..8, 5..8));
        let seg = Segmentation {
            cell: Some(rect((8, 8), 0..3, 0..3)),
            cytoplasm: Some(cyto),
            nucleus: None,
        };
        let mut frame = Frame::blank((8, 8));
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();
        assert!(frame.cells()[0].whole().is_some());
        assert!(frame.cells()[1].whole().is_none());
        assert_eq!(
            warnings,
            vec![ConsistencyWarning::Unoccupied {
                outer: Channel::Cytoplasm,
                inner: Channel::Cell,
                label: 2,
            }]
        );
    }

    #[test]
    fn test_many_cells_keep_frame_geometry() {
        let shape = (64, 64);
        let mut cells = Array2::from_elem(shape, false);
        let mut nuclei = Array2::from_elem(shape, false);
        for i in 0..8 {
            for j in 0..8 {
                let (r, c) = (i * 8, j * 8);
                cells.slice_mut(s![r + 1..r + 6, c + 1..c + 6]).fill(true);
                nuclei.slice_mut(s![r + 3..r + 4, c + 3..c + 4]).fill(true);
            }
        }
        let seg = Segmentation {
            cell: Some(cells),
            nucleus: Some(nuclei),
            ..Default::default()
        };
        let mut frame = Frame::blank(shape);
        let warnings = frame.add_cells_from_segmentation(&seg).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(frame.cells().len(), 64);

        for (k, cell) in frame.cells().iter().enumerate() {
            let (r, c) = ((k / 8) * 8, (k % 8) * 8);
            assert_eq!(cell.label as usize, k + 1);
            assert_eq!(cell.bbox(), BoundingBox::new(r + 1, r + 6, c + 1, c + 6));
            assert_eq!(cell.outline().area(), 25);
            assert!((cell.centroid().x - (r + 3) as f64).abs() < 1e-12);
            assert!((cell.centroid().y - (c + 3) as f64).abs() < 1e-12);
            assert_eq!(cell.nuclei()[0].bbox, BoundingBox::new(r + 3, r + 4, c + 3, c + 4));
        }
    }
}
