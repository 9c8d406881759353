//! Drives a [`Tracker`] over a frame sequence and compiles the lineage.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{Cell, CellState, Compartment, FeatureValue, Frame};
use crate::tracker::protocol::Tracker;
use crate::tracker::track::{self, CellRef, Track, TrackId, UnstructuredEdge};
use crate::{Result, TrackingError};

/// Feeds frames to a tracker one at a time and accumulates association edges.
pub struct TrackAssembler<T: Tracker> {
    tracker: T,
    frames: Vec<Frame>,
    edges: Vec<UnstructuredEdge>,
    halted: bool,
}

impl<T: Tracker> TrackAssembler<T> {
    /// Assembler driving `tracker`, with no frames pushed yet.
    pub fn new(tracker: T) -> Self {
        Self {
            tracker,
            frames: Vec::new(),
            edges: Vec::new(),
            halted: false,
        }
    }

    /// Number of frames accepted so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Edges discovered so far, in frame order.
    pub fn edges(&self) -> &[UnstructuredEdge] {
        &self.edges
    }

    /// Run one tracker step for `frame`.
    ///
    /// A frame without cells, or any tracker failure, is fatal: the error
    /// carries the frame index and the assembler refuses further frames.
    pub fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if self.halted {
            return Err(TrackingError::Protocol(
                "assembler halted by an earlier fatal error",
            ));
        }
        let frame_index = self.frames.len();
        if let Err(e) = self.step(frame_index, &frame) {
            self.halted = true;
            return Err(e.at_frame(frame_index));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn step(&mut self, frame_index: usize, frame: &Frame) -> Result<()> {
        if frame.cells().is_empty() {
            return Err(TrackingError::EmptyFrame { frame_index });
        }
        self.tracker.discover_next_cells(frame.cells(), frame.shape())?;

        if let Some(prev) = frame_index.checked_sub(1) {
            let prev_count = self.frames[prev].cells().len();
            let before = self.edges.len();
            for (i, cell) in frame.cells().iter().enumerate() {
                let Some(assoc) = self.tracker.predecessor_of_cell(cell, i)? else {
                    continue;
                };
                if assoc.prev_index >= prev_count {
                    return Err(TrackingError::Protocol(
                        "tracker returned a predecessor outside the previous frame",
                    ));
                }
                self.edges.push(UnstructuredEdge {
                    prev: CellRef::new(prev, assoc.prev_index),
                    next: CellRef::new(frame_index, i),
                    frame_index: prev,
                    affinity: assoc.affinity,
                });
            }
            debug!(
                frame_index,
                cells = frame.cells().len(),
                linked = self.edges.len() - before,
                "linked frame to predecessor"
            );
        }

        self.tracker.advance()
    }

    /// Compile the accumulated edges into tracks.
    ///
    /// Cells at a branch point become `Dividing`; other tracked cells whose
    /// state is still unknown become `Living`.
    pub fn finish(self) -> Lineage {
        let Self {
            mut frames, edges, ..
        } = self;
        let tracks = track::compile_tracks(&edges);

        for t in &tracks {
            for r in t.cells() {
                let cell = &mut frames[r.frame_index].cells_mut()[r.cell_index];
                if cell.state() == CellState::Unknown {
                    cell.set_state(CellState::Living);
                }
            }
        }
        for r in track::branch_points(&edges) {
            frames[r.frame_index].cells_mut()[r.cell_index].set_state(CellState::Dividing);
        }

        info!(
            frames = frames.len(),
            edges = edges.len(),
            tracks = tracks.len(),
            "assembled lineage"
        );
        Lineage {
            frames,
            edges,
            tracks,
        }
    }
}

/// Run `tracker` over `frames` and compile the resulting tracks.
pub fn assemble<T, I>(tracker: T, frames: I) -> Result<Lineage>
where
    T: Tracker,
    I: IntoIterator<Item = Frame>,
{
    let mut assembler = TrackAssembler::new(tracker);
    for frame in frames {
        assembler.push_frame(frame)?;
    }
    Ok(assembler.finish())
}

/// Frames, association edges and the tracks referencing their cells.
#[derive(Debug)]
pub struct Lineage {
    frames: Vec<Frame>,
    edges: Vec<UnstructuredEdge>,
    tracks: Vec<Track>,
}

impl Lineage {
    /// Frames in time order, with cell states updated by assembly.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn edges(&self) -> &[UnstructuredEdge] {
        &self.edges
    }

    /// Tracks ordered by id.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id.0)
    }

    /// Tracks that start from a division at the end of `id`.
    pub fn daughters(&self, id: TrackId) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.parent() == Some(id))
    }

    /// Cell addressed by `r`, if it exists.
    pub fn cell(&self, r: CellRef) -> Option<&Cell> {
        self.frames.get(r.frame_index)?.cells().get(r.cell_index)
    }

    /// Serializable view of every track.
    pub fn records(&self) -> Vec<TrackRecord<'_>> {
        self.tracks
            .iter()
            .map(|t| TrackRecord {
                lineage_id: t.id(),
                parent: t.parent(),
                from_division: t.from_division(),
                entries: t
                    .cells()
                    .iter()
                    .zip(std::iter::once(None).chain(t.affinities().iter().copied().map(Some)))
                    .filter_map(|(&r, affinity)| {
                        let cell = self.cell(r)?;
                        Some(TrackEntry {
                            frame_index: r.frame_index,
                            cell_label: cell.label,
                            state: cell.state(),
                            affinity,
                            masks: CellMasks {
                                cell: cell.whole(),
                                cytoplasm: cell.cytoplasm(),
                                nuclei: cell.nuclei(),
                            },
                            features: cell.outline().features(),
                        })
                    })
                    .collect(),
            })
            .collect()
    }

    /// Serialize the track records as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.records())?)
    }
}

#[derive(Debug, Serialize)]
pub struct TrackRecord<'a> {
    pub lineage_id: TrackId,
    pub parent: Option<TrackId>,
    pub from_division: bool,
    pub entries: Vec<TrackEntry<'a>>,
}

#[derive(Debug, Serialize)]
pub struct TrackEntry<'a> {
    pub frame_index: usize,
    pub cell_label: u32,
    pub state: CellState,
    /// Affinity of the edge leading to this entry; `None` for the first one
    pub affinity: Option<f64>,
    pub masks: CellMasks<'a>,
    pub features: &'a BTreeMap<String, FeatureValue>,
}

#[derive(Debug, Serialize)]
pub struct CellMasks<'a> {
    pub cell: Option<&'a Compartment>,
    pub cytoplasm: Option<&'a Compartment>,
    pub nuclei: &'a [Compartment],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::global_matching::{GlobalMatchingTracker, TrackerConfig};
    use ndarray::Array2;
    use std::ops::Range;

    fn frame_with_blocks(shape: (usize, usize), blocks: &[(Range<usize>, Range<usize>)]) -> Frame {
        let mut frame = Frame::blank(shape);
        for (label, (r, c)) in (1..).zip(blocks) {
            let mask = Array2::from_shape_fn(shape, |(i, j)| r.contains(&i) && c.contains(&j));
            frame
                .push_cell(Cell::from_masks(label, Some(mask.view()), None, None).unwrap())
                .unwrap();
        }
        frame
    }

    fn tracker() -> GlobalMatchingTracker {
        GlobalMatchingTracker::new(TrackerConfig {
            min_jaccard: 0.6,
            division_min_jaccard: Some(0.3),
        })
        .unwrap()
    }

    #[test]
    fn test_first_frame_records_no_edges() {
        let mut asm = TrackAssembler::new(tracker());
        asm.push_frame(frame_with_blocks((6, 6), &[(0..3, 0..3)])).unwrap();
        assert!(asm.edges().is_empty());
        assert_eq!(asm.frame_count(), 1);
    }

    #[test]
    fn test_edges_reference_previous_frame() {
        let frames = vec![
            frame_with_blocks((6, 6), &[(0..3, 0..3), (4..6, 4..6)]),
            frame_with_blocks((6, 6), &[(4..6, 4..6), (0..3, 0..3)]),
        ];
        let lineage = assemble(tracker(), frames).unwrap();
        let mut edges = lineage.edges().to_vec();
        edges.sort_by_key(|e| e.next);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].prev, CellRef::new(0, 1));
        assert_eq!(edges[0].next, CellRef::new(1, 0));
        assert_eq!(edges[0].frame_index, 0);
        assert_eq!(lineage.tracks().len(), 2);
        assert_eq!(lineage.cell(CellRef::new(1, 0)).map(|c| c.state()), Some(CellState::Living));
    }

    #[test]
    fn test_empty_frame_halts() {
        let mut asm = TrackAssembler::new(tracker());
        asm.push_frame(frame_with_blocks((6, 6), &[(0..3, 0..3)])).unwrap();
        let err = asm.push_frame(Frame::blank((6, 6))).unwrap_err();
        assert!(matches!(err, TrackingError::EmptyFrame { frame_index: 1 }));
        assert!(asm.push_frame(frame_with_blocks((6, 6), &[(0..3, 0..3)])).is_err());
        assert_eq!(asm.frame_count(), 1);
    }

    #[test]
    fn test_division_marks_parent_dividing() {
        let frames = vec![
            frame_with_blocks((8, 8), &[(0..4, 0..8)]),
            frame_with_blocks((8, 8), &[(0..4, 0..4), (0..4, 4..8)]),
        ];
        let lineage = assemble(tracker(), frames).unwrap();
        assert_eq!(lineage.tracks().len(), 2);
        assert_eq!(
            lineage.cell(CellRef::new(0, 0)).map(|c| c.state()),
            Some(CellState::Dividing)
        );
    }

    #[test]
    fn test_records_serialize() {
        let frames = vec![
            frame_with_blocks((6, 6), &[(0..3, 0..3)]),
            frame_with_blocks((6, 6), &[(0..3, 0..3)]),
        ];
        let lineage = assemble(tracker(), frames).unwrap();
        let records = lineage.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entries.len(), 2);
        assert_eq!(records[0].entries[0].affinity, None);
        assert_eq!(records[0].entries[1].affinity, Some(1.0));

        let json: serde_json::Value = serde_json::from_str(&lineage.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["lineage_id"], 0);
        assert_eq!(json[0]["entries"][1]["cell_label"], 1);
        assert_eq!(json[0]["entries"][1]["state"], "living");
    }
}
